//! World geometry and tile knowledge

pub mod knowledge;
pub mod position;

pub use knowledge::{
    KnowledgeSnapshot, KnowledgeSource, SharedMap, TileKnowledge, TileKnowledgeProvider, WorldMap,
    DEFAULT_GROUND_SPEED,
};
pub use position::{Direction, GridPosition, MAX_FLOOR};
