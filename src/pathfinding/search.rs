//! Guided best-first route search over partially observed terrain

use tracing::{debug, trace};

use crate::config::SearchLimits;
use crate::map::{Direction, GridPosition, TileKnowledgeProvider};

use super::node::{Frontier, NodeArena, NodeId, SearchNode, Slot};
use super::result::{PathStatus, RouteResult};

/// Route search engine.
///
/// Stateless between calls; every call owns a fresh [`NodeArena`] that is
/// dropped on return.
#[derive(Debug, Clone, Default)]
pub struct PathSearch {
    limits: SearchLimits,
}

impl PathSearch {
    pub fn new(limits: SearchLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &SearchLimits {
        &self.limits
    }

    /// Find a step sequence from `origin` to `destination`.
    ///
    /// Never fails: every outcome is reported through [`RouteResult::status`].
    pub fn find_path<K>(
        &self,
        origin: GridPosition,
        destination: GridPosition,
        knowledge: &K,
    ) -> RouteResult
    where
        K: TileKnowledgeProvider + ?Sized,
    {
        if origin == destination {
            return RouteResult::failed(origin, destination, PathStatus::SamePosition, 0);
        }
        if origin.z != destination.z {
            return RouteResult::failed(origin, destination, PathStatus::NoPath, 0);
        }

        let limits = &self.limits;
        let mut arena = NodeArena::new();
        let mut frontier = Frontier::new();

        let start = arena.insert(SearchNode::origin(origin));
        frontier.push(0.0, start);

        let mut iterations: u32 = 0;
        let mut reached: Option<NodeId> = None;

        while iterations < limits.iteration_budget {
            let Some((queued_cost, current)) = frontier.pop() else {
                break;
            };
            iterations += 1;

            let node = *arena.node(current);
            if queued_cost > node.total_cost {
                // Superseded by a cheaper relaxation
                continue;
            }
            if node.position == destination {
                reached = Some(current);
                break;
            }

            for direction in Direction::ALL {
                let neighbor = node.position.translated_to(direction);
                if neighbor.x < 0 || neighbor.y < 0 {
                    continue;
                }

                let id = match arena.slot(&neighbor) {
                    Some(Slot::Blocked) => continue,
                    Some(Slot::Open(id)) => id,
                    None => match self.classify(neighbor, destination, knowledge) {
                        Some(discovered) => arena.insert(discovered),
                        None => {
                            arena.block(neighbor);
                            continue;
                        }
                    },
                };

                let next = *arena.node(id);
                // Unseen cells extend the blind run they are entered from
                let uncertainty = if next.uncertainty > 0 {
                    node.uncertainty + 1
                } else {
                    0
                };
                if uncertainty > limits.uncertainty_cap {
                    continue;
                }

                let diagonal = if direction.is_diagonal() {
                    limits.diagonal_multiplier
                } else {
                    1.0
                };
                let heuristic = limits.heuristic_weight
                    * limits.heuristic_floor.max(next.position.distance(&destination));
                let step_cost = next.cost * diagonal + diagonal * heuristic;
                let candidate = node.total_cost + step_cost;

                if candidate + limits.relax_margin < next.total_cost {
                    let entry = arena.node_mut(id);
                    entry.total_cost = candidate;
                    entry.predecessor = Some(current);
                    entry.depth = node.depth + 1;
                    entry.uncertainty = uncertainty;
                    frontier.push(candidate, id);
                }
            }
        }

        let result = match reached {
            Some(goal) => Self::reconstruct(&arena, goal, origin, destination, iterations),
            None if iterations >= limits.iteration_budget && !frontier.is_empty() => {
                RouteResult::failed(origin, destination, PathStatus::TooComplex, iterations)
            }
            None => RouteResult::failed(origin, destination, PathStatus::NoPath, iterations),
        };

        debug!(
            origin = %origin,
            destination = %destination,
            status = ?result.status(),
            steps = result.steps().len(),
            complexity = result.complexity(),
            nodes = arena.len(),
            "Path search finished"
        );

        result
    }

    /// Decide whether a newly seen neighbour gets a node, and at what cost
    fn classify<K>(
        &self,
        position: GridPosition,
        destination: GridPosition,
        knowledge: &K,
    ) -> Option<SearchNode>
    where
        K: TileKnowledgeProvider + ?Sized,
    {
        let tile = knowledge.tile(&position);
        let impassable = !tile.walkable || !tile.pathable || tile.blocking_occupant;
        if impassable && position != destination {
            return None;
        }

        if tile.observed {
            Some(SearchNode::discovered(position, f32::from(tile.speed_or_default()), false))
        } else {
            Some(SearchNode::discovered(position, self.limits.unseen_cost, true))
        }
    }

    /// Walk predecessor links back to the origin and emit directions.
    ///
    /// A chain touching any node with remaining uncertainty is discarded whole.
    fn reconstruct(
        arena: &NodeArena,
        goal: NodeId,
        origin: GridPosition,
        destination: GridPosition,
        iterations: u32,
    ) -> RouteResult {
        let mut steps = Vec::new();
        for id in arena.chain(goal) {
            let node = arena.node(id);
            let Some(prev) = node.predecessor else {
                break;
            };
            if node.uncertainty > 0 {
                trace!(position = %node.position, uncertainty = node.uncertainty, "Route crosses unseen terrain");
                return RouteResult::failed(origin, destination, PathStatus::Unreliable, iterations);
            }
            if let Some(direction) = arena.node(prev).position.direction_to(&node.position) {
                steps.push(direction);
            }
        }
        steps.reverse();
        RouteResult::found(origin, destination, steps, iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{TileKnowledge, WorldMap};

    fn pos(x: i32, y: i32) -> GridPosition {
        GridPosition::new(x, y, 7)
    }

    /// Sum of per-step multipliers along the route
    fn weighted_length(result: &RouteResult, diagonal: u32) -> u32 {
        result
            .steps()
            .iter()
            .map(|dir| if dir.is_diagonal() { diagonal } else { 1 })
            .sum()
    }

    fn assert_connected(result: &RouteResult) {
        let mut previous = result.origin();
        for position in result.positions() {
            assert!(previous.is_adjacent(&position), "{previous} -> {position} is not a single step");
            assert_ne!(position, result.origin(), "route revisits its origin");
            previous = position;
        }
        assert_eq!(previous, result.destination());
    }

    #[test]
    fn same_position_does_no_work() {
        let map = WorldMap::open_floor(5, 5, 7, 100);
        let result = PathSearch::default().find_path(pos(2, 2), pos(2, 2), &map);
        assert_eq!(result.status(), PathStatus::SamePosition);
        assert!(result.is_empty());
        assert_eq!(result.complexity(), 0);
    }

    #[test]
    fn other_floor_is_not_searched() {
        let map = WorldMap::open_floor(5, 5, 7, 100);
        let result = PathSearch::default().find_path(pos(0, 0), GridPosition::new(0, 0, 6), &map);
        assert_eq!(result.status(), PathStatus::NoPath);
        assert_eq!(result.complexity(), 0);
    }

    #[test]
    fn open_grid_prefers_orthogonal_steps_under_default_multiplier() {
        let map = WorldMap::open_floor(5, 5, 7, 100);
        let result = PathSearch::default().find_path(pos(0, 0), pos(4, 4), &map);

        assert_eq!(result.status(), PathStatus::Ok);
        assert_connected(&result);
        assert_eq!(result.steps().len(), 8);
        assert_eq!(weighted_length(&result, 3), 8);
    }

    #[test]
    fn unit_diagonal_multiplier_walks_the_diagonal() {
        let map = WorldMap::open_floor(5, 5, 7, 100);
        let search = PathSearch::new(SearchLimits {
            diagonal_multiplier: 1.0,
            ..SearchLimits::default()
        });
        let result = search.find_path(pos(0, 0), pos(4, 4), &map);

        assert_eq!(result.status(), PathStatus::Ok);
        assert_eq!(result.steps(), &[Direction::SouthEast; 4]);
    }

    #[test]
    fn routes_around_walls() {
        let map = WorldMap::from_ascii(
            7,
            "\
.....
.###.
.#...
.#.#.
.....",
        );
        let result = PathSearch::default().find_path(pos(2, 2), pos(0, 0), &map);
        assert_eq!(result.status(), PathStatus::Ok);
        assert_connected(&result);
        for position in result.positions() {
            assert!(map.is_walkable(&position));
        }
    }

    #[test]
    fn blocked_destination_is_still_enterable() {
        let map = WorldMap::from_ascii(7, "...\n.#.\n...");
        let result = PathSearch::default().find_path(pos(0, 0), pos(1, 1), &map);
        assert_eq!(result.status(), PathStatus::Ok);
        assert_eq!(result.end_position(), pos(1, 1));
    }

    #[test]
    fn enclosed_destination_has_no_path() {
        let map = WorldMap::from_ascii(
            7,
            "\
#######
#..#..#
#..#..#
#######",
        );
        let result = PathSearch::default().find_path(pos(1, 1), pos(5, 2), &map);
        assert_eq!(result.status(), PathStatus::NoPath);
        assert!(result.is_empty());
        assert!(result.complexity() > 0);
    }

    #[test]
    fn budget_exhaustion_reports_too_complex() {
        let map = WorldMap::open_floor(60, 60, 7, 100);
        let search = PathSearch::new(SearchLimits {
            iteration_budget: 10,
            ..SearchLimits::default()
        });
        let result = search.find_path(pos(0, 0), pos(59, 59), &map);
        assert_eq!(result.status(), PathStatus::TooComplex);
        assert_eq!(result.complexity(), 10);
        assert!(result.is_empty());
    }

    #[test]
    fn route_through_unseen_terrain_is_unreliable() {
        // The only opening in the wall was never observed
        let map = WorldMap::from_ascii(
            7,
            "\
xxxxxxx
x..x..x
x..?..x
x..x..x
xxxxxxx",
        );
        let result = PathSearch::default().find_path(pos(1, 2), pos(5, 2), &map);
        assert_eq!(result.status(), PathStatus::Unreliable);
        assert!(result.is_empty());
    }

    #[test]
    fn blind_run_stops_at_the_uncertainty_cap() {
        let search = PathSearch::new(SearchLimits {
            uncertainty_cap: 3,
            ..SearchLimits::default()
        });
        let short = WorldMap::from_ascii(7, "xxxxxxx\nx.???.x\nxxxxxxx");
        assert_eq!(search.find_path(pos(1, 1), pos(5, 1), &short).status(), PathStatus::Unreliable);

        let long = WorldMap::from_ascii(7, "xxxxxxxx\nx.????.x\nxxxxxxxx");
        let result = search.find_path(pos(1, 1), pos(6, 1), &long);
        assert_eq!(result.status(), PathStatus::NoPath);
        assert!(result.complexity() <= 4);
    }

    #[test]
    fn blocking_creature_is_avoided_unless_it_is_the_goal() {
        let map = WorldMap::from_ascii(7, "...\n.c.\n...");
        let search = PathSearch::new(SearchLimits {
            diagonal_multiplier: 1.0,
            ..SearchLimits::default()
        });

        let around = search.find_path(pos(0, 0), pos(2, 2), &map);
        assert_eq!(around.status(), PathStatus::Ok);
        assert!(!around.positions().contains(&pos(1, 1)));

        let onto = search.find_path(pos(0, 0), pos(1, 1), &map);
        assert_eq!(onto.steps(), &[Direction::SouthEast]);
    }

    #[test]
    fn complexity_grows_with_difficulty() {
        let open = WorldMap::open_floor(20, 20, 7, 100);
        let mut walled = open.clone();
        for y in 0..19 {
            walled.set_loaded(pos(10, y), TileKnowledge::wall());
        }
        let search = PathSearch::default();
        let easy = search.find_path(pos(2, 2), pos(17, 2), &open);
        let hard = search.find_path(pos(2, 2), pos(17, 2), &walled);

        assert_eq!(easy.status(), PathStatus::Ok);
        assert_eq!(hard.status(), PathStatus::Ok);
        assert!(hard.complexity() >= easy.complexity());
        assert!(hard.complexity() <= search.limits().iteration_budget);
    }
}
