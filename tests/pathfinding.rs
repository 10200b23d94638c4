//! Route and field searches over mixed, partially known terrain

use tile_game_client::map::{GridPosition, TileKnowledge, TileKnowledgeProvider, WorldMap};
use tile_game_client::pathfinding::{FieldSearchParams, PathSearch, PathStatus};

fn pos(x: i32, y: i32) -> GridPosition {
    GridPosition::new(x, y, 7)
}

const MIXED: &str = "\
..........
..###.....
....#..,,.
.p..#.....
....#..>..
..........";

#[test]
fn routes_are_connected_and_never_revisit_the_origin() {
    let map = WorldMap::from_ascii(7, MIXED);
    let search = PathSearch::default();
    let origin = pos(0, 0);

    for destination in [pos(9, 0), pos(9, 5), pos(6, 2), pos(0, 5), pos(5, 3), pos(3, 3)] {
        let result = search.find_path(origin, destination, &map);
        assert_eq!(result.status(), PathStatus::Ok, "to {destination}");
        assert!(result.complexity() <= 50_000);

        let positions = origin.translated_along(result.steps());
        assert_eq!(positions.last(), Some(&destination));
        assert!(!positions.contains(&origin), "route to {destination} revisits the origin");

        let mut previous = origin;
        for position in positions {
            assert!(previous.is_adjacent(&position));
            assert!(map.is_walkable(&position) && map.is_pathable(&position), "{position} is blocked");
            previous = position;
        }
    }
}

#[test]
fn unreachable_goal_on_a_large_floor_saturates_the_budget() {
    let mut map = WorldMap::open_floor(300, 300, 7, 100);
    let goal = pos(150, 150);
    for dx in -1..=1 {
        for dy in -1..=1 {
            if dx != 0 || dy != 0 {
                map.set_loaded(goal.translated(dx, dy), TileKnowledge::wall());
            }
        }
    }

    let result = PathSearch::default().find_path(pos(10, 10), goal, &map);
    assert_eq!(result.status(), PathStatus::TooComplex);
    assert_eq!(result.complexity(), 50_000);
    assert!(result.is_empty());
}

#[test]
fn remembered_terrain_outside_the_loaded_area_is_routable() {
    // Loaded near the origin, minimap memory further out
    let map = WorldMap::from_ascii(7, "...~~~~\n...xxxx\n");
    let result = PathSearch::default().find_path(pos(0, 0), pos(6, 0), &map);

    assert_eq!(result.status(), PathStatus::Ok);
    assert_eq!(result.end_position(), pos(6, 0));
    assert_eq!(result.steps().len(), 6);
}

#[test]
fn long_unseen_corridor_is_not_crossed() {
    let wall = "x".repeat(84);
    let layout = format!("{wall}\nx.{}.x\n{wall}", "?".repeat(80));
    let map = WorldMap::from_ascii(7, &layout);

    let result = PathSearch::default().find_path(pos(1, 1), pos(82, 1), &map);
    assert_eq!(result.status(), PathStatus::NoPath);
    assert!(result.complexity() <= 52, "blind run went {} deep", result.complexity());
}

#[test]
fn snapshot_search_matches_the_live_map() {
    let mut map = WorldMap::from_ascii(7, MIXED);
    let snapshot = map.snapshot_floor(7);
    let search = PathSearch::default();

    let live = search.find_path(pos(0, 0), pos(9, 5), &map);
    let frozen = search.find_path(pos(0, 0), pos(9, 5), &snapshot);
    assert_eq!(live, frozen);

    // Later edits do not leak into the snapshot
    map.set_loaded(pos(5, 5), TileKnowledge::wall());
    assert_eq!(search.find_path(pos(0, 0), pos(9, 5), &snapshot), frozen);
}

#[test]
fn scripted_field_search_options() {
    let map = WorldMap::from_ascii(7, MIXED);
    let params = FieldSearchParams::from_pairs([
        ("ignoreNonPathable", "1"),
        ("ignoreCost", "1"),
        ("ignoreCreatures", "0"),
        ("somethingElse", "1"),
    ])
    .unwrap();
    assert!(params.ignore_non_pathable && params.ignore_cost);
    assert!(!params.ignore_creatures);
    assert_eq!(params.destination, None);

    let field = PathSearch::default().find_every_path(pos(0, 0), 6, &params, &map);
    assert_eq!(field.get(&pos(0, 3)).map(|entry| entry.depth), Some(3));
    // The non-pathable tile is reported when pathability is relaxed
    assert!(field.contains(&pos(1, 3)));
    assert!(!field.contains(&pos(3, 1)), "walls stay blocked");

    let targeted = FieldSearchParams::from_pairs([("destination", "0,3,7"), ("marginMax", "")]).unwrap();
    assert_eq!(targeted.destination, Some(pos(0, 3)));
    assert!(targeted.margin);
    assert!(FieldSearchParams::from_pairs([("destination", "not-a-position")]).is_err());
}
