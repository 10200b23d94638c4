//! Client-side prediction for the locally controlled actor.
//!
//! Steps are started locally before the server acknowledges them and kept in
//! a FIFO of predicted positions. Server positions are matched against that
//! queue; anything the queue cannot explain is a correction and wins.
//!
//! The controller never touches timers or threads. Work that has to happen
//! later (a path search, a retry after a delay) is returned as an
//! [`AutoWalkCommand`] for the timeline to schedule, and outward effects are
//! written to an [`Outbox`].

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::{AutoWalkConfig, Config, PredictionConfig};
use crate::error::StepRejection;
use crate::map::{Direction, GridPosition, KnowledgeSource, TileKnowledgeProvider};
use crate::pathfinding::{PathStatus, RouteResult};
use crate::runtime::outbox::{AutoWalkFailure, ClientEvent, Outbox, ServerRequest};
use crate::util::time::as_millis_u64;

use super::actor::Movable;
use super::walk::{StepTiming, WalkScheduler};

/// Generation tag of one auto-walk search; results with an older tag are dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SearchToken(pub u64);

impl fmt::Display for SearchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    /// Unconfirmed steps are outstanding
    PreWalking,
    /// Walking a step the server pushed without a matching prediction
    ServerWalking,
}

/// Follow-up work the timeline must schedule for an auto-walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoWalkCommand {
    /// Run a route search and report it back with the token
    Search {
        token: SearchToken,
        origin: GridPosition,
        destination: GridPosition,
    },
    /// Fire a retry after `delay`
    Retry { token: SearchToken, delay: Duration },
}

/// What a server position did to the prediction queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Found in the queue; `dropped` earlier entries were implicitly confirmed
    Matched { dropped: usize },
    /// Not predicted; `discarded` entries were thrown away
    Resync {
        discarded: usize,
        timing: Option<StepTiming>,
    },
    /// Nothing was predicted; the server moved the actor on its own
    ServerWalk(Option<StepTiming>),
}

impl Confirmation {
    /// Step started by the confirmation, if any
    pub fn timing(&self) -> Option<StepTiming> {
        match self {
            Confirmation::Matched { .. } => None,
            Confirmation::Resync { timing, .. } => *timing,
            Confirmation::ServerWalk(timing) => *timing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The rejected position is not predicted (already confirmed or discarded)
    Ignored,
    /// Prediction cleared; an auto-walk may want another attempt
    Canceled { retry: Option<AutoWalkCommand> },
    /// Only the rejected entry and its successors were dropped
    Truncated { dropped: usize },
}

/// The auto-walk currently in force
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoWalkState {
    pub destination: GridPosition,
    pub token: SearchToken,
}

/// Speculative movement state of the local actor
#[derive(Debug, Clone)]
pub struct PredictiveMovementController {
    prediction: PredictionConfig,
    auto_walk_config: AutoWalkConfig,
    scheduler: WalkScheduler,
    confirmed: GridPosition,
    queue: VecDeque<GridPosition>,
    server_walking: bool,
    auto_walk: Option<AutoWalkState>,
    /// Attempts since the last server confirmation
    retries: u32,
    next_token: u64,
    /// End of a clamped auto-walk route that stops short of its destination
    last_auto_walk_position: Option<GridPosition>,
}

impl PredictiveMovementController {
    pub fn new(config: &Config, confirmed: GridPosition) -> Self {
        Self {
            prediction: config.prediction.clone(),
            auto_walk_config: config.auto_walk.clone(),
            scheduler: WalkScheduler::new(config.protocol.clone()),
            confirmed,
            queue: VecDeque::new(),
            server_walking: false,
            auto_walk: None,
            retries: 0,
            next_token: 0,
            last_auto_walk_position: None,
        }
    }

    pub fn scheduler(&self) -> &WalkScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut WalkScheduler {
        &mut self.scheduler
    }

    pub fn confirmed_position(&self) -> GridPosition {
        self.confirmed
    }

    /// Outstanding predicted positions, oldest first
    pub fn predicted(&self) -> impl ExactSizeIterator<Item = &GridPosition> {
        self.queue.iter()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Where the next predicted step starts from
    pub fn prewalking_position(&self) -> GridPosition {
        self.queue.back().copied().unwrap_or(self.confirmed)
    }

    pub fn state(&self, actor: &Movable) -> ControllerState {
        if !self.queue.is_empty() {
            ControllerState::PreWalking
        } else if self.server_walking && actor.is_walking() {
            ControllerState::ServerWalking
        } else {
            ControllerState::Idle
        }
    }

    pub fn auto_walk(&self) -> Option<AutoWalkState> {
        self.auto_walk
    }

    pub fn is_auto_walking(&self) -> bool {
        self.auto_walk.is_some()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn last_auto_walk_position(&self) -> Option<GridPosition> {
        self.last_auto_walk_position
    }

    /// Check every precondition of a locally requested step
    pub fn can_walk<K>(
        &self,
        actor: &Movable,
        direction: Direction,
        knowledge: &K,
        now: Instant,
    ) -> Result<(), StepRejection>
    where
        K: TileKnowledgeProvider + ?Sized,
    {
        if actor.is_paralyzed() {
            return Err(StepRejection::Paralyzed);
        }

        let walk = actor.walk();
        let step_done = walk.is_step_done(now);
        if walk.is_walking() && !step_done && !self.is_auto_walking() && !self.server_walking {
            return Err(StepRejection::StepInProgress);
        }

        let protocol = self.scheduler.protocol();
        if let Some(last) = self.queue.back() {
            if !step_done || knowledge.has_blocking_occupant(last) {
                return Err(StepRejection::PrewalkPending);
            }
            if !protocol.new_walking {
                return Err(StepRejection::LegacySingleStep);
            }
        }

        let limit = self.prediction.step_limit(protocol);
        if self.queue.len() >= limit {
            // A stalled server gets one more step once the last one is long over
            let stall = walk.step_duration() + Duration::from_millis(u64::from(self.prediction.stall_escape_ms));
            if walk.elapsed(now) >= stall {
                return Ok(());
            }
            return Err(StepRejection::PredictionLimit {
                outstanding: self.queue.len(),
            });
        }

        if let Some(&last) = self.queue.back() {
            if direction.is_diagonal() {
                let ahead = knowledge.tile(&last.translated_to(direction));
                let confirmed = ahead.source == KnowledgeSource::Loaded && ahead.observed && ahead.walkable;
                if !confirmed {
                    return Err(StepRejection::UnconfirmedDiagonal(direction));
                }
            }
            if !knowledge.is_walkable(&last) {
                return Err(StepRejection::UnconfirmedTerrain);
            }
        }

        Ok(())
    }

    /// Predict one step and start walking it immediately
    pub fn request_step<K>(
        &mut self,
        actor: &mut Movable,
        direction: Direction,
        knowledge: &K,
        now: Instant,
        outbox: &mut Outbox,
    ) -> Result<StepTiming, StepRejection>
    where
        K: TileKnowledgeProvider + ?Sized,
    {
        if let Err(rejection) = self.can_walk(actor, direction, knowledge, now) {
            debug!(actor = %actor.id(), ?direction, %rejection, "Step rejected");
            return Err(rejection);
        }

        if self.stop_auto_walk() {
            outbox.request(ServerRequest::Stop);
        }

        let from = self.prewalking_position();
        let to = from.translated_to(direction);
        self.queue.push_back(to);
        self.server_walking = false;

        let timing = self
            .scheduler
            .begin_step(actor, from, to, knowledge.ground_speed(&to), false, now);

        outbox.request(ServerRequest::Step { direction });
        outbox.emit(ClientEvent::StepStarted {
            actor: actor.id(),
            from,
            to,
            duration_ms: as_millis_u64(timing.duration),
            predicted: true,
        });

        trace!(actor = %actor.id(), to = %to, outstanding = self.queue.len(), "Predicted step");
        Ok(timing)
    }

    /// Apply a position the server says the actor moved to
    pub fn confirm_step<K>(
        &mut self,
        actor: &mut Movable,
        server_position: GridPosition,
        knowledge: &K,
        now: Instant,
        outbox: &mut Outbox,
    ) -> Confirmation
    where
        K: TileKnowledgeProvider + ?Sized,
    {
        self.retries = 0;
        let previous = self.confirmed;
        self.confirmed = server_position;

        if let Some(index) = self.queue.iter().position(|p| *p == server_position) {
            self.queue.drain(..=index);
            if index > 0 {
                debug!(actor = %actor.id(), skipped = index, "Server confirmed a later prediction");
            }
            self.emit_position_change(actor, previous, outbox);
            self.finish_arrived_auto_walk();
            return Confirmation::Matched { dropped: index };
        }

        let discarded = self.queue.len();
        self.queue.clear();

        let timing = if previous.is_adjacent(&server_position) {
            self.server_walking = true;
            let timing = self.scheduler.begin_step(
                actor,
                previous,
                server_position,
                knowledge.ground_speed(&server_position),
                true,
                now,
            );
            outbox.emit(ClientEvent::StepStarted {
                actor: actor.id(),
                from: previous,
                to: server_position,
                duration_ms: as_millis_u64(timing.duration),
                predicted: false,
            });
            Some(timing)
        } else {
            // Teleport or a correction in place
            self.server_walking = false;
            self.scheduler.stop(actor);
            actor.set_position(server_position);
            None
        };

        self.emit_position_change(actor, previous, outbox);
        self.finish_arrived_auto_walk();

        if discarded > 0 {
            info!(
                actor = %actor.id(),
                discarded,
                position = %server_position,
                "Prediction contradicted by server, resyncing"
            );
            Confirmation::Resync { discarded, timing }
        } else {
            Confirmation::ServerWalk(timing)
        }
    }

    /// The server rejected the queued walk: drop every prediction
    pub fn cancel(&mut self, actor: &mut Movable, direction: Direction, outbox: &mut Outbox) -> CancelOutcome {
        if !self.queue.is_empty() {
            self.queue.clear();
            self.scheduler.stop(actor);
            self.snap_to(actor, self.confirmed, outbox);
        }

        if let Some(retry) = self.retry_auto_walk(outbox) {
            return CancelOutcome::Canceled { retry: Some(retry) };
        }

        let protocol = self.scheduler.protocol();
        if !(protocol.ignore_server_direction && protocol.new_walking) {
            actor.face(direction);
        }
        outbox.emit(ClientEvent::WalkCanceled { direction });
        debug!(actor = %actor.id(), ?direction, "Walk canceled");

        CancelOutcome::Canceled { retry: None }
    }

    /// The server rejected one specific predicted step
    pub fn predictive_cancel(
        &mut self,
        actor: &mut Movable,
        position: GridPosition,
        direction: Direction,
        outbox: &mut Outbox,
    ) -> CancelOutcome {
        let Some(index) = self.queue.iter().position(|p| *p == position) else {
            return CancelOutcome::Ignored;
        };
        if index == 0 {
            return self.cancel(actor, direction, outbox);
        }

        let dropped = self.queue.len() - index;
        self.queue.truncate(index);
        self.scheduler.stop(actor);
        let keep = self.prewalking_position();
        self.snap_to(actor, keep, outbox);

        debug!(actor = %actor.id(), dropped, kept = self.queue.len(), "Predicted steps rejected");
        CancelOutcome::Truncated { dropped }
    }

    /// Start walking to `destination` along a searched route.
    ///
    /// Returns the search to run, or `None` when already there.
    pub fn start_auto_walk(&mut self, destination: GridPosition, retry: bool) -> Option<AutoWalkCommand> {
        self.auto_walk = None;
        self.last_auto_walk_position = None;
        if !retry {
            self.retries = 0;
        }

        let origin = self.prewalking_position();
        if destination == origin {
            return None;
        }

        self.next_token += 1;
        let token = SearchToken(self.next_token);
        self.auto_walk = Some(AutoWalkState { destination, token });

        debug!(%token, origin = %origin, destination = %destination, retry, "Auto-walk search requested");
        Some(AutoWalkCommand::Search {
            token,
            origin,
            destination,
        })
    }

    /// A search posted by [`Self::start_auto_walk`] finished
    pub fn on_route_ready(
        &mut self,
        token: SearchToken,
        result: &RouteResult,
        outbox: &mut Outbox,
    ) -> Option<AutoWalkCommand> {
        let Some(state) = self.auto_walk.filter(|state| state.token == token) else {
            trace!(%token, "Dropping stale route");
            return None;
        };

        debug!(
            %token,
            status = ?result.status(),
            complexity = result.complexity(),
            steps = result.steps().len(),
            "Auto-walk route ready"
        );

        if result.status() == PathStatus::SamePosition {
            self.auto_walk = None;
            return None;
        }
        if !result.status().is_ok() || result.is_empty() {
            return self.retry_or_fail(state, AutoWalkFailure::Search(result.status()), outbox);
        }

        let limit = self.scheduler.protocol().max_route_len();
        let steps: Vec<Direction> = result.steps().iter().copied().take(limit).collect();
        let end = result
            .origin()
            .translated_along(&steps)
            .last()
            .copied()
            .unwrap_or_else(|| result.origin());
        if end != state.destination {
            self.last_auto_walk_position = Some(end);
        }

        outbox.request(ServerRequest::AutoWalk {
            origin: result.origin(),
            steps,
        });
        None
    }

    /// A scheduled retry fired
    pub fn on_retry(&mut self, token: SearchToken) -> Option<AutoWalkCommand> {
        let Some(state) = self.auto_walk.filter(|state| state.token == token) else {
            trace!(%token, "Dropping stale retry");
            return None;
        };
        self.start_auto_walk(state.destination, true)
    }

    /// Abandon the current auto-walk; returns whether one was active
    pub fn stop_auto_walk(&mut self) -> bool {
        self.last_auto_walk_position = None;
        self.auto_walk.take().is_some()
    }

    /// A step of the local actor finished walking
    pub fn on_step_completed(&mut self, server_driven: bool) {
        if server_driven {
            self.server_walking = false;
        }
    }

    fn retry_auto_walk(&mut self, outbox: &mut Outbox) -> Option<AutoWalkCommand> {
        let state = self.auto_walk?;
        outbox.request(ServerRequest::Stop);
        self.retry_or_fail(state, AutoWalkFailure::Canceled, outbox)
    }

    fn retry_or_fail(
        &mut self,
        state: AutoWalkState,
        failure: AutoWalkFailure,
        outbox: &mut Outbox,
    ) -> Option<AutoWalkCommand> {
        if self.retries < self.auto_walk_config.max_retries {
            self.retries += 1;
            let delay = self.auto_walk_config.retry_delay(self.retries);
            // Searches still in flight belong to the abandoned attempt
            self.next_token += 1;
            let token = SearchToken(self.next_token);
            self.auto_walk = Some(AutoWalkState { token, ..state });
            debug!(
                %token,
                attempt = self.retries,
                delay_ms = as_millis_u64(delay),
                ?failure,
                "Retrying auto-walk"
            );
            return Some(AutoWalkCommand::Retry { token, delay });
        }

        warn!(destination = %state.destination, ?failure, retries = self.retries, "Auto-walk failed");
        self.auto_walk = None;
        self.last_auto_walk_position = None;
        outbox.emit(ClientEvent::AutoWalkFailed {
            destination: state.destination,
            reason: failure,
        });
        None
    }

    fn finish_arrived_auto_walk(&mut self) {
        let Some(state) = self.auto_walk else {
            return;
        };
        let arrived = state.destination == self.confirmed
            || self.last_auto_walk_position == Some(self.confirmed);
        if arrived {
            info!(destination = %state.destination, position = %self.confirmed, "Auto-walk finished");
            self.auto_walk = None;
            self.last_auto_walk_position = None;
        }
    }

    fn emit_position_change(&self, actor: &Movable, previous: GridPosition, outbox: &mut Outbox) {
        if previous != self.confirmed {
            outbox.emit(ClientEvent::PositionChanged {
                actor: actor.id(),
                from: previous,
                to: self.confirmed,
            });
        }
    }

    /// Move the actor back onto a position the prediction still trusts
    fn snap_to(&self, actor: &mut Movable, position: GridPosition, outbox: &mut Outbox) {
        let predicted = actor.position();
        if predicted != position {
            actor.set_position(position);
            outbox.emit(ClientEvent::PositionChanged {
                actor: actor.id(),
                from: predicted,
                to: position,
            });
        }
    }
}
