//! Everything the movement core reports outward

use serde::{Deserialize, Serialize};

use crate::map::{Direction, GridPosition};
use crate::movement::ActorId;
use crate::pathfinding::{FieldResult, PathStatus};

/// Why an auto-walk gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoWalkFailure {
    /// The last search attempt ended with this status
    Search(PathStatus),
    /// The server kept canceling the walk
    Canceled,
}

/// Notifications for the UI/scripting layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    StepStarted {
        actor: ActorId,
        from: GridPosition,
        to: GridPosition,
        duration_ms: u64,
        /// Started locally ahead of server confirmation
        predicted: bool,
    },
    StepCompleted {
        actor: ActorId,
        position: GridPosition,
    },
    /// Confirmed (server-side) position moved
    PositionChanged {
        actor: ActorId,
        from: GridPosition,
        to: GridPosition,
    },
    WalkCanceled {
        direction: Direction,
    },
    AutoWalkFailed {
        destination: GridPosition,
        reason: AutoWalkFailure,
    },
    FieldSearchCompleted {
        request: u64,
        result: FieldResult,
    },
}

/// Requests for the network layer to encode and send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerRequest {
    Step {
        direction: Direction,
    },
    AutoWalk {
        origin: GridPosition,
        steps: Vec<Direction>,
    },
    Stop,
}

/// Collects effects produced while handling one timeline event
#[derive(Debug, Default)]
pub struct Outbox {
    events: Vec<ClientEvent>,
    requests: Vec<ServerRequest>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: ClientEvent) {
        self.events.push(event);
    }

    pub fn request(&mut self, request: ServerRequest) {
        self.requests.push(request);
    }

    pub fn events(&self) -> &[ClientEvent] {
        &self.events
    }

    pub fn requests(&self) -> &[ServerRequest] {
        &self.requests
    }

    pub fn drain_events(&mut self) -> std::vec::Drain<'_, ClientEvent> {
        self.events.drain(..)
    }

    pub fn drain_requests(&mut self) -> std::vec::Drain<'_, ServerRequest> {
        self.requests.drain(..)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.requests.is_empty()
    }
}
