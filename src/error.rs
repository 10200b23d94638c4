//! Error types shared across the movement core

use crate::config::ConfigError;
use crate::map::Direction;

/// Crate-level errors
#[derive(Debug, thiserror::Error)]
pub enum MovementError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    #[error("Unknown search option: {0}")]
    UnknownSearchOption(String),

    #[error("Main timeline is no longer running")]
    TimelineClosed,
}

/// Why a locally requested step was refused.
///
/// Rejections are not surfaced to the player; the request is simply dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StepRejection {
    #[error("actor cannot move (speed is zero)")]
    Paralyzed,

    #[error("previous step has not finished")]
    StepInProgress,

    #[error("too many unconfirmed steps ({outstanding})")]
    PredictionLimit { outstanding: usize },

    #[error("legacy protocol allows a single unconfirmed step")]
    LegacySingleStep,

    #[error("last predicted step is still being walked")]
    PrewalkPending,

    #[error("diagonal step {0:?} into unconfirmed terrain")]
    UnconfirmedDiagonal(Direction),

    #[error("predicted position is not walkable")]
    UnconfirmedTerrain,
}
