//! Actor movement: step timing for every actor, prediction for the local one

pub mod actor;
pub mod predictor;
pub mod walk;

pub use actor::{ActorId, Movable, SpeedFormula};
pub use predictor::{
    AutoWalkCommand, AutoWalkState, CancelOutcome, Confirmation, ControllerState,
    PredictiveMovementController, SearchToken,
};
pub use walk::{StepTiming, WalkPhase, WalkProgress, WalkScheduler, WalkState, WALK_PROGRESS_UNITS};
