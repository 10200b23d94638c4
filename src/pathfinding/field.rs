//! Full-field search: cost and predecessor of every reachable cell within a radius

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use tracing::{debug, trace};

use crate::error::MovementError;
use crate::map::{Direction, GridPosition, KnowledgeSource, TileKnowledgeProvider};

use super::node::{Frontier, NodeArena, SearchNode, Slot};
use super::search::PathSearch;

/// Extra radius granted once the nominal destination is reached with a margin
pub const DESTINATION_MARGIN: u32 = 4;

/// Cost added to an occupied tile reported through `ignoreLastCreature`
pub const OCCUPIED_TILE_PENALTY: f32 = 100.0;

/// Option keys accepted by [`FieldSearchParams::from_pairs`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldSearchOption {
    IgnoreCreatures,
    IgnoreLastCreature,
    IgnoreNonPathable,
    IgnoreNonWalkable,
    IgnoreStairs,
    IgnoreCost,
    AllowUnseen,
    AllowOnlyVisibleTiles,
    MarginMin,
    MarginMax,
    Destination,
}

impl FieldSearchOption {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldSearchOption::IgnoreCreatures => "ignoreCreatures",
            FieldSearchOption::IgnoreLastCreature => "ignoreLastCreature",
            FieldSearchOption::IgnoreNonPathable => "ignoreNonPathable",
            FieldSearchOption::IgnoreNonWalkable => "ignoreNonWalkable",
            FieldSearchOption::IgnoreStairs => "ignoreStairs",
            FieldSearchOption::IgnoreCost => "ignoreCost",
            FieldSearchOption::AllowUnseen => "allowUnseen",
            FieldSearchOption::AllowOnlyVisibleTiles => "allowOnlyVisibleTiles",
            FieldSearchOption::MarginMin => "marginMin",
            FieldSearchOption::MarginMax => "marginMax",
            FieldSearchOption::Destination => "destination",
        }
    }
}

impl FromStr for FieldSearchOption {
    type Err = MovementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let option = match s {
            "ignoreCreatures" => FieldSearchOption::IgnoreCreatures,
            "ignoreLastCreature" => FieldSearchOption::IgnoreLastCreature,
            "ignoreNonPathable" => FieldSearchOption::IgnoreNonPathable,
            "ignoreNonWalkable" => FieldSearchOption::IgnoreNonWalkable,
            "ignoreStairs" => FieldSearchOption::IgnoreStairs,
            "ignoreCost" => FieldSearchOption::IgnoreCost,
            "allowUnseen" => FieldSearchOption::AllowUnseen,
            "allowOnlyVisibleTiles" => FieldSearchOption::AllowOnlyVisibleTiles,
            "marginMin" => FieldSearchOption::MarginMin,
            "marginMax" => FieldSearchOption::MarginMax,
            "destination" => FieldSearchOption::Destination,
            other => return Err(MovementError::UnknownSearchOption(other.to_string())),
        };
        Ok(option)
    }
}

/// Pruning relaxations for one full-field search
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldSearchParams {
    pub ignore_creatures: bool,
    /// Report occupied tiles (with a penalty) without expanding them
    pub ignore_last_creature: bool,
    pub ignore_non_pathable: bool,
    pub ignore_non_walkable: bool,
    pub ignore_stairs: bool,
    /// Every step costs 1
    pub ignore_cost: bool,
    pub allow_unseen: bool,
    /// Treat everything outside the loaded area as blocked
    pub allow_only_visible_tiles: bool,
    pub destination: Option<GridPosition>,
    /// Keep searching [`DESTINATION_MARGIN`] steps past the destination
    pub margin: bool,
}

impl FieldSearchParams {
    /// Parse scripting-layer `key=value` options.
    ///
    /// Boolean options are on unless their value is `"0"` or empty. Either
    /// margin key enables the margin regardless of its value. Unknown keys are
    /// skipped.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, MovementError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            let option = match key.parse::<FieldSearchOption>() {
                Ok(option) => option,
                Err(_) => {
                    trace!(key, "Skipping unknown field search option");
                    continue;
                }
            };
            match option {
                FieldSearchOption::Destination => params.destination = Some(value.parse()?),
                FieldSearchOption::MarginMin | FieldSearchOption::MarginMax => params.margin = true,
                flag => params.set(flag, !value.is_empty() && value != "0"),
            }
        }
        Ok(params)
    }

    /// Builder form of a boolean option
    pub fn with(mut self, option: FieldSearchOption) -> Self {
        self.set(option, true);
        self
    }

    pub fn with_destination(mut self, destination: GridPosition) -> Self {
        self.destination = Some(destination);
        self
    }

    fn set(&mut self, option: FieldSearchOption, on: bool) {
        match option {
            FieldSearchOption::IgnoreCreatures => self.ignore_creatures = on,
            FieldSearchOption::IgnoreLastCreature => self.ignore_last_creature = on,
            FieldSearchOption::IgnoreNonPathable => self.ignore_non_pathable = on,
            FieldSearchOption::IgnoreNonWalkable => self.ignore_non_walkable = on,
            FieldSearchOption::IgnoreStairs => self.ignore_stairs = on,
            FieldSearchOption::IgnoreCost => self.ignore_cost = on,
            FieldSearchOption::AllowUnseen => self.allow_unseen = on,
            FieldSearchOption::AllowOnlyVisibleTiles => self.allow_only_visible_tiles = on,
            FieldSearchOption::MarginMin | FieldSearchOption::MarginMax => self.margin = on,
            FieldSearchOption::Destination => {}
        }
    }
}

/// Best known way to reach one cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldEntry {
    pub total_cost: f32,
    /// Steps from the origin
    pub depth: u32,
    /// Direction of the last step into this cell; `None` for the origin
    pub arrived_from: Option<Direction>,
    pub predecessor: Option<GridPosition>,
}

/// Every cell reached by a full-field search
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldResult {
    #[serde(serialize_with = "serialize_keyed")]
    entries: BTreeMap<GridPosition, FieldEntry>,
    expansions: u32,
}

impl FieldResult {
    pub fn get(&self, position: &GridPosition) -> Option<&FieldEntry> {
        self.entries.get(position)
    }

    pub fn contains(&self, position: &GridPosition) -> bool {
        self.entries.contains_key(position)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GridPosition, &FieldEntry)> {
        self.entries.iter()
    }

    /// Queue pops that produced an entry
    pub fn expansions(&self) -> u32 {
        self.expansions
    }

    /// Entries keyed by the `x,y,z` strings the scripting layer uses
    pub fn to_keyed(&self) -> BTreeMap<String, FieldEntry> {
        self.entries
            .iter()
            .map(|(pos, entry)| (pos.to_string(), *entry))
            .collect()
    }
}

/// JSON object keys must be strings, so cells are written as `x,y,z`
fn serialize_keyed<S>(entries: &BTreeMap<GridPosition, FieldEntry>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(entries.iter().map(|(pos, entry)| (pos.to_string(), entry)))
}

/// Outcome of classifying a newly discovered neighbour
enum Cell {
    Blocked,
    Occupied,
    Open(SearchNode),
}

impl PathSearch {
    /// Dijkstra flood from `origin` up to `max_distance` steps.
    ///
    /// Runs to completion; there is no iteration budget. With a destination and
    /// no margin the flood stops as soon as the destination is settled.
    pub fn find_every_path<K>(
        &self,
        origin: GridPosition,
        max_distance: u32,
        params: &FieldSearchParams,
        knowledge: &K,
    ) -> FieldResult
    where
        K: TileKnowledgeProvider + ?Sized,
    {
        let mut result = FieldResult::default();
        let mut arena = NodeArena::new();
        let mut frontier = Frontier::new();
        let mut max_distance = max_distance;

        let start = arena.insert(SearchNode::origin(origin));
        frontier.push(0.0, start);

        while let Some((queued_cost, current)) = frontier.pop() {
            let node = *arena.node(current);
            if queued_cost > node.total_cost {
                continue;
            }
            result.expansions += 1;

            let predecessor = node.predecessor.map(|prev| arena.node(prev).position);
            result.entries.insert(
                node.position,
                FieldEntry {
                    total_cost: node.total_cost,
                    depth: node.depth,
                    arrived_from: predecessor.and_then(|prev| prev.direction_to(&node.position)),
                    predecessor,
                },
            );

            if params.destination == Some(node.position) {
                if params.margin {
                    max_distance = max_distance.min(node.depth + DESTINATION_MARGIN);
                } else {
                    break;
                }
            }
            if node.depth >= max_distance {
                continue;
            }

            for direction in Direction::ALL {
                let neighbor = node.position.translated_to(direction);
                if neighbor.x < 0 || neighbor.y < 0 {
                    continue;
                }

                let id = match arena.slot(&neighbor) {
                    Some(Slot::Blocked) => continue,
                    Some(Slot::Open(id)) => id,
                    None => match Self::classify_field_cell(neighbor, params, knowledge) {
                        Cell::Open(discovered) => arena.insert(discovered),
                        Cell::Occupied => {
                            arena.block(neighbor);
                            if params.ignore_last_creature {
                                result.entries.insert(
                                    neighbor,
                                    FieldEntry {
                                        total_cost: node.total_cost + OCCUPIED_TILE_PENALTY,
                                        depth: node.depth + 1,
                                        arrived_from: Some(direction),
                                        predecessor: Some(node.position),
                                    },
                                );
                            }
                            continue;
                        }
                        Cell::Blocked => {
                            arena.block(neighbor);
                            continue;
                        }
                    },
                };

                let next = *arena.node(id);
                let cost = if params.ignore_cost {
                    1.0
                } else if direction.is_diagonal() {
                    next.cost * self.limits().diagonal_multiplier
                } else {
                    next.cost
                };
                let candidate = node.total_cost + cost;

                if candidate < next.total_cost {
                    let entry = arena.node_mut(id);
                    entry.total_cost = candidate;
                    entry.predecessor = Some(current);
                    entry.depth = node.depth + 1;
                    if entry.uncertainty > 0 {
                        entry.uncertainty = node.uncertainty + 1;
                    }
                    frontier.push(candidate, id);
                }
            }
        }

        debug!(
            origin = %origin,
            max_distance,
            reached = result.len(),
            expansions = result.expansions,
            "Full-field search finished"
        );

        result
    }

    fn classify_field_cell<K>(position: GridPosition, params: &FieldSearchParams, knowledge: &K) -> Cell
    where
        K: TileKnowledgeProvider + ?Sized,
    {
        let tile = knowledge.tile(&position);
        let is_destination = params.destination == Some(position);

        let (seen, walkable, pathable, occupied, stairs) = match tile.source {
            KnowledgeSource::Loaded => (
                true,
                tile.walkable,
                tile.pathable,
                tile.blocking_occupant,
                tile.stairs,
            ),
            _ if params.allow_only_visible_tiles => (false, false, false, false, false),
            _ => (
                tile.observed || !tile.walkable || !tile.pathable,
                tile.walkable,
                tile.pathable,
                false,
                tile.stairs,
            ),
        };

        let blocked = (!seen && !params.allow_unseen)
            || (stairs && !params.ignore_stairs && !is_destination)
            || (!pathable && !params.ignore_non_pathable && !is_destination)
            || (!walkable && !params.ignore_non_walkable);
        if blocked {
            return Cell::Blocked;
        }
        if occupied && !params.ignore_creatures {
            return Cell::Occupied;
        }

        Cell::Open(SearchNode::discovered(
            position,
            f32::from(tile.speed_or_default()),
            !seen,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::WorldMap;

    fn pos(x: i32, y: i32) -> GridPosition {
        GridPosition::new(x, y, 7)
    }

    fn flood(map: &WorldMap, origin: GridPosition, radius: u32, params: FieldSearchParams) -> FieldResult {
        PathSearch::default().find_every_path(origin, radius, &params, map)
    }

    #[test]
    fn radius_one_reaches_all_neighbours() {
        let map = WorldMap::open_floor(5, 5, 7, 100);
        let field = flood(&map, pos(2, 2), 1, FieldSearchParams::default());

        assert_eq!(field.len(), 9);
        let origin = field.get(&pos(2, 2)).unwrap();
        assert_eq!(origin.total_cost, 0.0);
        assert_eq!(origin.arrived_from, None);
        assert_eq!(origin.predecessor, None);

        let east = field.get(&pos(3, 2)).unwrap();
        assert_eq!(east.total_cost, 100.0);
        assert_eq!(east.depth, 1);
        assert_eq!(east.arrived_from, Some(Direction::East));
        assert_eq!(east.predecessor, Some(pos(2, 2)));

        assert_eq!(field.get(&pos(3, 3)).unwrap().total_cost, 300.0);
    }

    #[test]
    fn unknown_surroundings_bound_the_flood() {
        let map = WorldMap::open_floor(3, 3, 7, 100);
        let field = flood(&map, pos(0, 0), 10, FieldSearchParams::default());
        assert_eq!(field.len(), 9);
        assert!(!field.contains(&pos(3, 0)));

        let open = flood(
            &map,
            pos(0, 0),
            4,
            FieldSearchParams::default().with(FieldSearchOption::AllowUnseen),
        );
        assert!(open.contains(&pos(3, 0)));
        assert_eq!(open.get(&pos(4, 0)).unwrap().depth, 4);
        assert!(!open.contains(&pos(5, 0)));
    }

    #[test]
    fn walls_need_ignore_non_walkable() {
        let map = WorldMap::from_ascii(7, ".#.");
        let default = flood(&map, pos(0, 0), 5, FieldSearchParams::default());
        assert!(!default.contains(&pos(1, 0)));
        assert!(!default.contains(&pos(2, 0)));

        // Walls are also non-pathable
        let params = FieldSearchParams::default()
            .with(FieldSearchOption::IgnoreNonWalkable)
            .with(FieldSearchOption::IgnoreNonPathable);
        let through = flood(&map, pos(0, 0), 5, params);
        assert_eq!(through.get(&pos(2, 0)).unwrap().depth, 2);
    }

    #[test]
    fn creatures_block_or_are_reported() {
        let map = WorldMap::from_ascii(7, ".c.");

        let blocked = flood(&map, pos(0, 0), 5, FieldSearchParams::default());
        assert!(!blocked.contains(&pos(1, 0)));

        let reported = flood(
            &map,
            pos(0, 0),
            5,
            FieldSearchParams::default().with(FieldSearchOption::IgnoreLastCreature),
        );
        let occupied = reported.get(&pos(1, 0)).unwrap();
        assert_eq!(occupied.total_cost, OCCUPIED_TILE_PENALTY);
        assert_eq!(occupied.predecessor, Some(pos(0, 0)));
        assert!(!reported.contains(&pos(2, 0)));

        let ignored = flood(
            &map,
            pos(0, 0),
            5,
            FieldSearchParams::default().with(FieldSearchOption::IgnoreCreatures),
        );
        assert_eq!(ignored.get(&pos(2, 0)).unwrap().total_cost, 200.0);
    }

    #[test]
    fn stairs_need_both_relaxations_unless_destination() {
        let map = WorldMap::from_ascii(7, "..>");
        let stairs = pos(2, 0);

        let pathable_only = FieldSearchParams::default().with(FieldSearchOption::IgnoreNonPathable);
        assert!(!flood(&map, pos(0, 0), 5, pathable_only).contains(&stairs));

        let both = pathable_only.with(FieldSearchOption::IgnoreStairs);
        assert!(flood(&map, pos(0, 0), 5, both).contains(&stairs));

        let as_goal = FieldSearchParams::default().with_destination(stairs);
        assert!(flood(&map, pos(0, 0), 5, as_goal).contains(&stairs));
    }

    #[test]
    fn destination_stops_the_flood_unless_margin() {
        let map = WorldMap::open_floor(12, 1, 7, 100);
        let goal = pos(3, 0);

        let stop = flood(&map, pos(0, 0), 20, FieldSearchParams::default().with_destination(goal));
        assert_eq!(stop.len(), 4);
        assert!(stop.contains(&goal));

        let margin = FieldSearchParams {
            margin: true,
            ..FieldSearchParams::default().with_destination(goal)
        };
        let extended = flood(&map, pos(0, 0), 20, margin);
        assert_eq!(extended.len(), 8);
        assert!(extended.contains(&pos(7, 0)));
        assert!(!extended.contains(&pos(8, 0)));
    }

    #[test]
    fn ignore_cost_counts_steps() {
        let map = WorldMap::from_ascii(7, ".,,,.");
        let field = flood(
            &map,
            pos(0, 0),
            10,
            FieldSearchParams::default().with(FieldSearchOption::IgnoreCost),
        );
        assert_eq!(field.get(&pos(4, 0)).unwrap().total_cost, 4.0);
    }

    #[test]
    fn visible_only_excludes_remembered_tiles() {
        let map = WorldMap::from_ascii(7, "..~~");
        assert!(flood(&map, pos(0, 0), 5, FieldSearchParams::default()).contains(&pos(3, 0)));

        let visible = FieldSearchParams::default().with(FieldSearchOption::AllowOnlyVisibleTiles);
        let field = flood(&map, pos(0, 0), 5, visible);
        assert!(field.contains(&pos(1, 0)));
        assert!(!field.contains(&pos(2, 0)));
    }

    #[test]
    fn option_pairs() {
        let params = FieldSearchParams::from_pairs([
            ("ignoreCreatures", "1"),
            ("allowUnseen", "0"),
            ("ignoreCost", ""),
            ("destination", "3,3,7"),
            ("marginMin", "0"),
            ("somethingElse", "1"),
        ])
        .unwrap();

        assert!(params.ignore_creatures);
        assert!(!params.allow_unseen);
        assert!(!params.ignore_cost);
        assert!(params.margin);
        assert_eq!(params.destination, Some(pos(3, 3)));

        assert!(FieldSearchParams::from_pairs([("destination", "3,3")]).is_err());
        assert!("ignoreEverything".parse::<FieldSearchOption>().is_err());
        assert_eq!(
            FieldSearchOption::AllowOnlyVisibleTiles.as_str().parse::<FieldSearchOption>().unwrap(),
            FieldSearchOption::AllowOnlyVisibleTiles
        );
    }

    #[test]
    fn keyed_output_uses_position_strings() {
        let map = WorldMap::open_floor(2, 1, 7, 100);
        let keyed = flood(&map, pos(0, 0), 1, FieldSearchParams::default()).to_keyed();
        assert_eq!(keyed.keys().collect::<Vec<_>>(), vec!["0,0,7", "1,0,7"]);
    }
}
