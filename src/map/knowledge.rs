//! Tile knowledge: what the client has loaded, remembers, or has never seen

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::position::GridPosition;

/// Ground speed assumed for tiles whose speed is unknown
pub const DEFAULT_GROUND_SPEED: u16 = 150;

/// Where a piece of tile knowledge comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeSource {
    /// Tile inside the currently loaded area
    Loaded,
    /// Lower-fidelity minimap memory of a tile outside the loaded area
    Remembered,
    /// Nothing is known about the tile
    Unknown,
}

/// Everything the movement core asks about a single tile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileKnowledge {
    pub walkable: bool,
    pub pathable: bool,
    /// Ground speed, `None` when unknown
    pub ground_speed: Option<u16>,
    /// The client has observed this tile at some point
    pub observed: bool,
    /// A creature or object currently blocks the tile (loaded tiles only)
    pub blocking_occupant: bool,
    /// Floor change tile
    pub stairs: bool,
    pub source: KnowledgeSource,
}

impl TileKnowledge {
    /// Loaded, walkable ground with the given speed
    pub fn ground(speed: u16) -> Self {
        Self {
            walkable: true,
            pathable: true,
            ground_speed: Some(speed),
            observed: true,
            blocking_occupant: false,
            stairs: false,
            source: KnowledgeSource::Loaded,
        }
    }

    /// Loaded tile that can never be entered
    pub fn wall() -> Self {
        Self {
            walkable: false,
            pathable: false,
            ..Self::ground(DEFAULT_GROUND_SPEED)
        }
    }

    /// Walkable but excluded from automatic routes (fields, stairs, ...)
    pub fn non_pathable(speed: u16) -> Self {
        Self {
            pathable: false,
            ..Self::ground(speed)
        }
    }

    /// Floor change tile; never pathable
    pub fn stairs(speed: u16) -> Self {
        Self {
            pathable: false,
            stairs: true,
            ..Self::ground(speed)
        }
    }

    /// A tile the client knows nothing about
    pub fn unknown() -> Self {
        Self {
            walkable: true,
            pathable: true,
            ground_speed: None,
            observed: false,
            blocking_occupant: false,
            stairs: false,
            source: KnowledgeSource::Unknown,
        }
    }

    /// Downgrade to minimap fidelity: occupants are forgotten
    pub fn remembered(self) -> Self {
        Self {
            blocking_occupant: false,
            source: KnowledgeSource::Remembered,
            ..self
        }
    }

    pub fn unseen(self) -> Self {
        Self {
            observed: false,
            ..self
        }
    }

    pub fn with_occupant(self) -> Self {
        Self {
            blocking_occupant: true,
            ..self
        }
    }

    /// Ground speed with the unknown default applied
    pub fn speed_or_default(&self) -> u16 {
        match self.ground_speed {
            Some(0) | None => DEFAULT_GROUND_SPEED,
            Some(speed) => speed,
        }
    }
}

/// Read access to tile knowledge.
///
/// Implemented by the live [`WorldMap`] and by immutable [`KnowledgeSnapshot`]s
/// handed to background searches.
pub trait TileKnowledgeProvider: Send + Sync {
    /// Best knowledge for `pos`: loaded state first, then minimap memory
    fn tile(&self, pos: &GridPosition) -> TileKnowledge;

    fn is_walkable(&self, pos: &GridPosition) -> bool {
        self.tile(pos).walkable
    }

    fn is_pathable(&self, pos: &GridPosition) -> bool {
        self.tile(pos).pathable
    }

    fn ground_speed(&self, pos: &GridPosition) -> Option<u16> {
        self.tile(pos).ground_speed
    }

    fn was_observed(&self, pos: &GridPosition) -> bool {
        self.tile(pos).observed
    }

    fn has_blocking_occupant(&self, pos: &GridPosition) -> bool {
        self.tile(pos).blocking_occupant
    }

    /// Whether `pos` lies inside the currently loaded area
    fn is_loaded(&self, pos: &GridPosition) -> bool {
        self.tile(pos).source == KnowledgeSource::Loaded
    }
}

/// In-memory world knowledge, owned by the main timeline
#[derive(Debug, Clone, Default)]
pub struct WorldMap {
    loaded: HashMap<GridPosition, TileKnowledge>,
    remembered: HashMap<GridPosition, TileKnowledge>,
}

/// Live map shared between the timeline and snapshot capture
pub type SharedMap = Arc<RwLock<WorldMap>>;

impl WorldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedMap {
        Arc::new(RwLock::new(self))
    }

    /// Store a loaded tile; its minimap memory is refreshed as well
    pub fn set_loaded(&mut self, pos: GridPosition, tile: TileKnowledge) {
        let tile = TileKnowledge {
            source: KnowledgeSource::Loaded,
            ..tile
        };
        self.remembered.insert(pos, tile.remembered());
        self.loaded.insert(pos, tile);
    }

    /// Store minimap memory only
    pub fn remember(&mut self, pos: GridPosition, tile: TileKnowledge) {
        self.remembered.insert(pos, tile.remembered());
    }

    pub fn set_occupant(&mut self, pos: GridPosition, blocking: bool) {
        if let Some(tile) = self.loaded.get_mut(&pos) {
            tile.blocking_occupant = blocking;
        }
    }

    /// Forget the loaded area, keeping only minimap memory
    pub fn unload_all(&mut self) {
        self.loaded.clear();
    }

    pub fn loaded_len(&self) -> usize {
        self.loaded.len()
    }

    /// Immutable point-in-time copy of one floor for background searches
    pub fn snapshot_floor(&self, z: u8) -> KnowledgeSnapshot {
        let filter = |map: &HashMap<GridPosition, TileKnowledge>| {
            map.iter()
                .filter(|(pos, _)| pos.z == z)
                .map(|(pos, tile)| (*pos, *tile))
                .collect()
        };
        KnowledgeSnapshot {
            map: Arc::new(WorldMap {
                loaded: filter(&self.loaded),
                remembered: filter(&self.remembered),
            }),
        }
    }

    /// Build a fully loaded floor from an ASCII layout.
    ///
    /// `.` ground (speed 100), `,` slow ground (speed 200), `#` wall,
    /// `p` walkable but not pathable, `>` stairs, `c` ground with a blocking
    /// creature, `~` remembered ground, `x` remembered wall, `?` remembered but
    /// never seen, space or any other character leaves the tile unknown.
    pub fn from_ascii(z: u8, layout: &str) -> Self {
        let mut map = Self::new();
        for (y, line) in layout.lines().enumerate() {
            for (x, ch) in line.chars().enumerate() {
                let pos = GridPosition::new(x as i32, y as i32, z);
                match ch {
                    '.' => map.set_loaded(pos, TileKnowledge::ground(100)),
                    ',' => map.set_loaded(pos, TileKnowledge::ground(200)),
                    '#' => map.set_loaded(pos, TileKnowledge::wall()),
                    'p' => map.set_loaded(pos, TileKnowledge::non_pathable(100)),
                    '>' => map.set_loaded(pos, TileKnowledge::stairs(100)),
                    'c' => map.set_loaded(pos, TileKnowledge::ground(100).with_occupant()),
                    '~' => map.remember(pos, TileKnowledge::ground(100)),
                    'x' => map.remember(pos, TileKnowledge::wall()),
                    '?' => map.remember(pos, TileKnowledge::ground(100).unseen()),
                    _ => {}
                }
            }
        }
        map
    }

    /// Rectangle of loaded ground tiles
    pub fn open_floor(width: i32, height: i32, z: u8, speed: u16) -> Self {
        let mut map = Self::new();
        for y in 0..height {
            for x in 0..width {
                map.set_loaded(GridPosition::new(x, y, z), TileKnowledge::ground(speed));
            }
        }
        map
    }
}

impl TileKnowledgeProvider for WorldMap {
    fn tile(&self, pos: &GridPosition) -> TileKnowledge {
        if let Some(tile) = self.loaded.get(pos) {
            return *tile;
        }
        self.remembered
            .get(pos)
            .copied()
            .unwrap_or_else(TileKnowledge::unknown)
    }
}

/// Read-only knowledge captured before a search is dispatched off the timeline
#[derive(Debug, Clone)]
pub struct KnowledgeSnapshot {
    map: Arc<WorldMap>,
}

impl TileKnowledgeProvider for KnowledgeSnapshot {
    fn tile(&self, pos: &GridPosition) -> TileKnowledge {
        self.map.tile(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loaded_knowledge_wins_over_memory() {
        let mut map = WorldMap::new();
        let pos = GridPosition::new(3, 3, 7);
        map.remember(pos, TileKnowledge::wall());
        map.set_loaded(pos, TileKnowledge::ground(120).with_occupant());

        assert!(map.is_loaded(&pos));
        assert!(map.is_walkable(&pos));
        assert!(map.has_blocking_occupant(&pos));

        map.unload_all();
        let tile = map.tile(&pos);
        assert_eq!(tile.source, KnowledgeSource::Remembered);
        assert!(tile.walkable);
        assert!(!tile.blocking_occupant);
        assert_eq!(tile.ground_speed, Some(120));
    }

    #[test]
    fn unknown_tiles_are_unseen_and_speedless() {
        let map = WorldMap::new();
        let tile = map.tile(&GridPosition::new(100, 100, 7));
        assert_eq!(tile.source, KnowledgeSource::Unknown);
        assert!(!tile.observed);
        assert_eq!(tile.speed_or_default(), DEFAULT_GROUND_SPEED);
    }

    #[test]
    fn snapshot_is_isolated_from_later_edits() {
        let mut map = WorldMap::open_floor(4, 4, 7, 100);
        let snapshot = map.snapshot_floor(7);
        let pos = GridPosition::new(1, 1, 7);
        map.set_loaded(pos, TileKnowledge::wall());

        assert!(snapshot.is_walkable(&pos));
        assert!(!map.is_walkable(&pos));
    }

    #[test]
    fn ascii_layout() {
        let map = WorldMap::from_ascii(7, ".#>\n~x?\nc, ");
        assert!(map.is_walkable(&GridPosition::new(0, 0, 7)));
        assert!(!map.is_walkable(&GridPosition::new(1, 0, 7)));
        assert!(map.tile(&GridPosition::new(2, 0, 7)).stairs);
        assert_eq!(map.tile(&GridPosition::new(0, 1, 7)).source, KnowledgeSource::Remembered);
        assert!(!map.was_observed(&GridPosition::new(2, 1, 7)));
        assert!(map.has_blocking_occupant(&GridPosition::new(0, 2, 7)));
        assert_eq!(map.ground_speed(&GridPosition::new(1, 2, 7)), Some(200));
        assert_eq!(map.tile(&GridPosition::new(2, 2, 7)).source, KnowledgeSource::Unknown);
    }
}
