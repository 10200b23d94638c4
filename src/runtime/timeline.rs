//! The main timeline: sole owner of actor state and the prediction queue.
//!
//! Every input (local keys, decoded server messages, finished searches,
//! retry and walk-tick timers) arrives as a [`TimelineEvent`] on one channel
//! and is handled to completion before the next one is looked at. Effects
//! collected in the [`Outbox`] are flushed after each event: client events
//! to broadcast subscribers, server requests to the network layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::error::MovementError;
use crate::map::{Direction, GridPosition, SharedMap, TileKnowledge, TileKnowledgeProvider};
use crate::movement::{
    ActorId, AutoWalkCommand, CancelOutcome, Movable, PredictiveMovementController, StepTiming,
    WalkProgress,
};
use crate::pathfinding::{FieldSearchParams, PathSearch};
use crate::util::time::as_millis_u64;

use super::dispatcher::{Dispatcher, ScheduledEvent, TokioDispatcher};
use super::event::TimelineEvent;
use super::outbox::{ClientEvent, Outbox, ServerRequest};
use super::runner::{InlineTaskRunner, Task, TaskRunner, TokioTaskRunner};

/// Route searches at most this far (Chebyshev) run inline on the timeline
pub const INLINE_SEARCH_RADIUS: u32 = 8;

const CLIENT_EVENT_CAPACITY: usize = 256;

/// Cloneable sender side of a running [`Timeline`]
#[derive(Clone)]
pub struct TimelineHandle {
    events: mpsc::UnboundedSender<TimelineEvent>,
    client_events: broadcast::Sender<ClientEvent>,
    next_field_request: Arc<AtomicU64>,
}

impl TimelineHandle {
    pub fn send(&self, event: TimelineEvent) -> Result<(), MovementError> {
        self.events.send(event).map_err(|_| MovementError::TimelineClosed)
    }

    /// Raw sender, for wiring custom runners and dispatchers
    pub fn event_sender(&self) -> mpsc::UnboundedSender<TimelineEvent> {
        self.events.clone()
    }

    /// Receive every [`ClientEvent`] flushed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.client_events.subscribe()
    }

    pub fn step(&self, direction: Direction) -> Result<(), MovementError> {
        self.send(TimelineEvent::Step(direction))
    }

    pub fn auto_walk(&self, destination: GridPosition) -> Result<(), MovementError> {
        self.send(TimelineEvent::AutoWalk(destination))
    }

    pub fn stop_auto_walk(&self) -> Result<(), MovementError> {
        self.send(TimelineEvent::StopAutoWalk)
    }

    /// Queue a full-field search; the returned id tags its `FieldSearchCompleted` event
    pub fn field_search(
        &self,
        origin: GridPosition,
        max_distance: u32,
        params: FieldSearchParams,
    ) -> Result<u64, MovementError> {
        let request = self.next_field_request.fetch_add(1, Ordering::Relaxed);
        self.send(TimelineEvent::FieldSearch {
            request,
            origin,
            max_distance,
            params,
        })?;
        Ok(request)
    }

    pub fn server_step(&self, actor: ActorId, from: GridPosition, to: GridPosition) -> Result<(), MovementError> {
        self.send(TimelineEvent::ServerStep { actor, from, to })
    }

    pub fn server_cancel(&self, direction: Direction) -> Result<(), MovementError> {
        self.send(TimelineEvent::ServerCancel(direction))
    }

    pub fn reject_prediction(&self, position: GridPosition, direction: Direction) -> Result<(), MovementError> {
        self.send(TimelineEvent::ServerRejectPrediction { position, direction })
    }

    pub fn update_tile(&self, position: GridPosition, tile: TileKnowledge) -> Result<(), MovementError> {
        self.send(TimelineEvent::TileUpdate { position, tile })
    }

    pub fn shutdown(&self) -> Result<(), MovementError> {
        self.send(TimelineEvent::Shutdown)
    }
}

/// Single-threaded owner of the local actor, remote actors and the predictor
pub struct Timeline {
    map: SharedMap,
    search: PathSearch,
    controller: PredictiveMovementController,
    local: Movable,
    remotes: HashMap<ActorId, Movable>,
    events_rx: mpsc::UnboundedReceiver<TimelineEvent>,
    runner: Arc<dyn TaskRunner>,
    inline: InlineTaskRunner,
    dispatcher: Arc<dyn Dispatcher>,
    /// Backoff timer of the current auto-walk, if one is waiting
    pending_retry: Option<ScheduledEvent>,
    outbox: Outbox,
    client_events: broadcast::Sender<ClientEvent>,
    server_requests: mpsc::UnboundedSender<ServerRequest>,
}

impl Timeline {
    /// Create a timeline for `local`, standing on its current position.
    ///
    /// Returns the timeline, a handle for feeding it, and the stream of
    /// requests for the network layer.
    pub fn new(
        config: &Config,
        map: SharedMap,
        local: Movable,
    ) -> (Self, TimelineHandle, mpsc::UnboundedReceiver<ServerRequest>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (client_events, _) = broadcast::channel(CLIENT_EVENT_CAPACITY);
        let (server_requests, requests_rx) = mpsc::unbounded_channel();

        let handle = TimelineHandle {
            events: events_tx.clone(),
            client_events: client_events.clone(),
            next_field_request: Arc::new(AtomicU64::new(1)),
        };

        let timeline = Self {
            map,
            search: PathSearch::new(config.search.clone()),
            controller: PredictiveMovementController::new(config, local.position()),
            local,
            remotes: HashMap::new(),
            events_rx,
            runner: Arc::new(TokioTaskRunner::new(events_tx.clone())),
            inline: InlineTaskRunner::new(events_tx.clone()),
            dispatcher: Arc::new(TokioDispatcher::new(events_tx)),
            pending_retry: None,
            outbox: Outbox::new(),
            client_events,
            server_requests,
        };

        (timeline, handle, requests_rx)
    }

    /// Replace the runner used for background searches
    pub fn with_task_runner(mut self, runner: Arc<dyn TaskRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn local(&self) -> &Movable {
        &self.local
    }

    pub fn remote(&self, actor: ActorId) -> Option<&Movable> {
        self.remotes.get(&actor)
    }

    pub fn controller(&self) -> &PredictiveMovementController {
        &self.controller
    }

    pub fn map(&self) -> &SharedMap {
        &self.map
    }

    /// Handle events until `Shutdown`
    pub async fn run(mut self) {
        info!(
            actor = %self.local.id(),
            position = %self.local.position(),
            "Movement timeline started"
        );

        while let Some(event) = self.events_rx.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }

        if let Some(retry) = self.pending_retry.take() {
            retry.cancel();
        }
        info!(
            actor = %self.local.id(),
            position = %self.controller.confirmed_position(),
            "Movement timeline stopped"
        );
    }

    /// Handle everything already queued without waiting; returns the count handled
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            handled += 1;
            if !self.handle_event(event) {
                break;
            }
        }
        handled
    }

    /// Apply one event and flush its effects; `false` once shut down
    pub fn handle_event(&mut self, event: TimelineEvent) -> bool {
        let now = Instant::now();
        trace!(kind = event.kind(), "Timeline event");

        match event {
            TimelineEvent::Step(direction) => self.on_local_step(direction, now),
            TimelineEvent::AutoWalk(destination) => {
                self.cancel_pending_retry();
                if let Some(command) = self.controller.start_auto_walk(destination, false) {
                    self.run_command(command);
                }
            }
            TimelineEvent::StopAutoWalk => {
                self.cancel_pending_retry();
                if self.controller.stop_auto_walk() {
                    self.outbox.request(ServerRequest::Stop);
                }
            }
            TimelineEvent::FieldSearch {
                request,
                origin,
                max_distance,
                params,
            } => self.post_field_search(request, origin, max_distance, params),
            TimelineEvent::ServerStep { actor, from, to } => {
                if actor == self.local.id() {
                    self.on_local_confirm(to, now);
                } else {
                    self.on_remote_step(actor, from, to, now);
                }
            }
            TimelineEvent::ServerCancel(direction) => {
                let outcome = self.controller.cancel(&mut self.local, direction, &mut self.outbox);
                self.after_cancel(outcome);
            }
            TimelineEvent::ServerRejectPrediction { position, direction } => {
                let outcome = self
                    .controller
                    .predictive_cancel(&mut self.local, position, direction, &mut self.outbox);
                self.after_cancel(outcome);
            }
            TimelineEvent::ActorSpawned { actor, position, speed } => {
                if actor == self.local.id() {
                    warn!(actor = %actor, "Ignoring spawn of the local actor");
                } else {
                    debug!(actor = %actor, position = %position, speed, "Remote actor spawned");
                    self.remotes.insert(actor, Movable::new(actor, position, speed));
                }
            }
            TimelineEvent::ActorRemoved(actor) => {
                if self.remotes.remove(&actor).is_some() {
                    debug!(actor = %actor, "Remote actor removed");
                }
            }
            TimelineEvent::SpeedChanged { actor, speed } => {
                if actor == self.local.id() {
                    self.local.set_speed(speed);
                } else if let Some(remote) = self.remotes.get_mut(&actor) {
                    remote.set_speed(speed);
                }
            }
            TimelineEvent::SpeedFormulaChanged(formula) => {
                self.controller.scheduler_mut().set_formula(formula);
            }
            TimelineEvent::TileUpdate { position, tile } => {
                self.map.write().set_loaded(position, tile);
            }
            TimelineEvent::RouteReady { token, result } => {
                if let Some(command) = self.controller.on_route_ready(token, &result, &mut self.outbox) {
                    self.run_command(command);
                }
            }
            TimelineEvent::FieldReady { request, result } => {
                debug!(request, cells = result.len(), "Field search finished");
                self.outbox
                    .emit(ClientEvent::FieldSearchCompleted { request, result });
            }
            TimelineEvent::RetryAutoWalk { token } => {
                self.pending_retry = None;
                if let Some(command) = self.controller.on_retry(token) {
                    self.run_command(command);
                }
            }
            TimelineEvent::WalkTick { actor, step } => self.on_walk_tick(actor, step, now),
            TimelineEvent::Shutdown => {
                self.flush();
                return false;
            }
        }

        self.flush();
        true
    }

    fn on_local_step(&mut self, direction: Direction, now: Instant) {
        let was_auto_walking = self.controller.is_auto_walking();
        let result = {
            let map = self.map.read();
            self.controller
                .request_step(&mut self.local, direction, &*map, now, &mut self.outbox)
        };

        if let Ok(timing) = result {
            if was_auto_walking {
                self.cancel_pending_retry();
            }
            self.schedule_tick(&timing);
        }
    }

    fn on_local_confirm(&mut self, position: GridPosition, now: Instant) {
        let confirmation = {
            let map = self.map.read();
            self.controller
                .confirm_step(&mut self.local, position, &*map, now, &mut self.outbox)
        };
        if let Some(timing) = confirmation.timing() {
            self.schedule_tick(&timing);
        }
    }

    fn on_remote_step(&mut self, id: ActorId, from: GridPosition, to: GridPosition, now: Instant) {
        let ground = self.map.read().ground_speed(&to);
        let Some(actor) = self.remotes.get_mut(&id) else {
            warn!(actor = %id, "Step for an unknown actor");
            return;
        };
        let scheduler = self.controller.scheduler();

        // Trust the server's origin over our copy
        let previous = actor.position();
        if from.is_adjacent(&to) {
            let timing = scheduler.begin_step(actor, from, to, ground, true, now);
            self.outbox.emit(ClientEvent::StepStarted {
                actor: id,
                from,
                to,
                duration_ms: as_millis_u64(timing.duration),
                predicted: false,
            });
            self.schedule_tick(&timing);
        } else {
            scheduler.stop(actor);
            actor.set_position(to);
        }

        self.outbox.emit(ClientEvent::PositionChanged {
            actor: id,
            from: previous,
            to,
        });
    }

    fn on_walk_tick(&mut self, id: ActorId, step: u64, now: Instant) {
        let is_local = id == self.local.id();
        let actor = if is_local {
            &mut self.local
        } else {
            match self.remotes.get_mut(&id) {
                Some(actor) => actor,
                None => return,
            }
        };

        if actor.walk().step_id() != step {
            trace!(actor = %id, step, "Stale walk tick");
            return;
        }

        let progress = self.controller.scheduler().tick(actor, now);
        match progress {
            WalkProgress::Idle => {}
            WalkProgress::InProgress { next_tick, .. } => {
                self.dispatcher
                    .schedule(next_tick, TimelineEvent::WalkTick { actor: id, step });
            }
            WalkProgress::Completed {
                position,
                server_driven,
                ..
            } => {
                self.outbox.emit(ClientEvent::StepCompleted { actor: id, position });
                if is_local {
                    self.controller.on_step_completed(server_driven);
                }
            }
        }
    }

    fn after_cancel(&mut self, outcome: CancelOutcome) {
        match outcome {
            CancelOutcome::Canceled { retry: Some(command) } => self.run_command(command),
            CancelOutcome::Canceled { retry: None } => self.cancel_pending_retry(),
            CancelOutcome::Truncated { .. } | CancelOutcome::Ignored => {}
        }
    }

    fn run_command(&mut self, command: AutoWalkCommand) {
        match command {
            AutoWalkCommand::Search {
                token,
                origin,
                destination,
            } => {
                let snapshot = self.map.read().snapshot_floor(origin.z);
                let search = self.search.clone();
                let task: Task = Box::new(move || TimelineEvent::RouteReady {
                    token,
                    result: search.find_path(origin, destination, &snapshot),
                });

                let inline = origin.chebyshev_distance(&destination) <= INLINE_SEARCH_RADIUS;
                let task_id = if inline {
                    self.inline.post(task)
                } else {
                    self.runner.post(task)
                };
                debug!(%token, task = %task_id, inline, "Route search posted");
            }
            AutoWalkCommand::Retry { token, delay } => {
                self.cancel_pending_retry();
                self.pending_retry = Some(
                    self.dispatcher
                        .schedule(delay, TimelineEvent::RetryAutoWalk { token }),
                );
            }
        }
    }

    fn post_field_search(
        &mut self,
        request: u64,
        origin: GridPosition,
        max_distance: u32,
        params: FieldSearchParams,
    ) {
        let snapshot = self.map.read().snapshot_floor(origin.z);
        let search = self.search.clone();
        let task_id = self.runner.post(Box::new(move || TimelineEvent::FieldReady {
            request,
            result: search.find_every_path(origin, max_distance, &params, &snapshot),
        }));
        debug!(request, task = %task_id, origin = %origin, max_distance, "Field search posted");
    }

    fn schedule_tick(&self, timing: &StepTiming) {
        self.dispatcher.schedule(
            timing.tick_interval,
            TimelineEvent::WalkTick {
                actor: timing.actor,
                step: timing.step,
            },
        );
    }

    fn cancel_pending_retry(&mut self) {
        if let Some(retry) = self.pending_retry.take() {
            retry.cancel();
        }
    }

    fn flush(&mut self) {
        for event in self.outbox.drain_events() {
            // No subscribers is fine
            let _ = self.client_events.send(event);
        }
        for request in self.outbox.drain_requests() {
            if self.server_requests.send(request).is_err() {
                debug!("Network layer gone, dropping server request");
            }
        }
    }
}
