//! Everything the main timeline reacts to

use crate::map::{Direction, GridPosition, TileKnowledge};
use crate::movement::{ActorId, SearchToken, SpeedFormula};
use crate::pathfinding::{FieldResult, FieldSearchParams, RouteResult};

/// One unit of work for the main timeline.
///
/// Local input, decoded server messages, finished background work and
/// delayed callbacks all arrive as events on the same channel, so they are
/// applied strictly one after another.
#[derive(Debug, Clone)]
pub enum TimelineEvent {
    // Local input
    /// Player pressed a direction key
    Step(Direction),
    AutoWalk(GridPosition),
    StopAutoWalk,
    /// Diagnostic full-field search; answered with a `FieldSearchCompleted` event
    FieldSearch {
        request: u64,
        origin: GridPosition,
        max_distance: u32,
        params: FieldSearchParams,
    },

    // Server messages
    /// An actor moved on the server, confirmed or forced
    ServerStep {
        actor: ActorId,
        from: GridPosition,
        to: GridPosition,
    },
    /// The server rejected the local walk
    ServerCancel(Direction),
    /// The server rejected one specific predicted step
    ServerRejectPrediction {
        position: GridPosition,
        direction: Direction,
    },
    ActorSpawned {
        actor: ActorId,
        position: GridPosition,
        speed: i32,
    },
    ActorRemoved(ActorId),
    SpeedChanged {
        actor: ActorId,
        speed: i32,
    },
    SpeedFormulaChanged(Option<SpeedFormula>),
    TileUpdate {
        position: GridPosition,
        tile: TileKnowledge,
    },

    // Internal callbacks
    RouteReady {
        token: SearchToken,
        result: RouteResult,
    },
    FieldReady {
        request: u64,
        result: FieldResult,
    },
    RetryAutoWalk {
        token: SearchToken,
    },
    WalkTick {
        actor: ActorId,
        step: u64,
    },

    Shutdown,
}

impl TimelineEvent {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Step(_) => "step",
            Self::AutoWalk(_) => "auto_walk",
            Self::StopAutoWalk => "stop_auto_walk",
            Self::FieldSearch { .. } => "field_search",
            Self::ServerStep { .. } => "server_step",
            Self::ServerCancel(_) => "server_cancel",
            Self::ServerRejectPrediction { .. } => "server_reject_prediction",
            Self::ActorSpawned { .. } => "actor_spawned",
            Self::ActorRemoved(_) => "actor_removed",
            Self::SpeedChanged { .. } => "speed_changed",
            Self::SpeedFormulaChanged(_) => "speed_formula_changed",
            Self::TileUpdate { .. } => "tile_update",
            Self::RouteReady { .. } => "route_ready",
            Self::FieldReady { .. } => "field_ready",
            Self::RetryAutoWalk { .. } => "retry_auto_walk",
            Self::WalkTick { .. } => "walk_tick",
            Self::Shutdown => "shutdown",
        }
    }
}
