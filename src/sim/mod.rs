//! Loopback stand-in for the authoritative game server.
//!
//! Consumes [`ServerRequest`]s from a timeline and answers with server
//! events after a seeded, jittered latency. It keeps its own authoritative
//! copy of the world and of the local actor's position, so predictions made
//! against stale client knowledge get corrected the same way a real server
//! would correct them.

use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::config::ProtocolProfile;
use crate::map::{Direction, GridPosition, TileKnowledgeProvider, WorldMap};
use crate::movement::{ActorId, WalkScheduler};
use crate::runtime::{ServerRequest, TimelineEvent, TimelineHandle};

/// Network and server behavior of the loopback
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// One-way base latency
    pub latency_ms: u64,
    /// Uniform extra latency in `0..=jitter_ms`
    pub jitter_ms: u64,
    /// Chance that the server refuses an otherwise valid step
    pub reject_chance: f64,
    pub seed: u64,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            latency_ms: 40,
            jitter_ms: 30,
            reject_chance: 0.0,
            seed: 42,
        }
    }
}

/// Authoritative view of the single actor the loopback moves
#[derive(Debug, Clone, Copy)]
pub struct LoopbackActor {
    pub id: ActorId,
    pub position: GridPosition,
    pub speed: i32,
}

pub struct LoopbackServer {
    config: LoopbackConfig,
    world: WorldMap,
    actor: LoopbackActor,
    facing: Direction,
    scheduler: WalkScheduler,
    rng: ChaCha8Rng,
    requests: mpsc::UnboundedReceiver<ServerRequest>,
    timeline: TimelineHandle,
}

impl LoopbackServer {
    pub fn new(
        config: LoopbackConfig,
        world: WorldMap,
        actor: LoopbackActor,
        protocol: ProtocolProfile,
        requests: mpsc::UnboundedReceiver<ServerRequest>,
        timeline: TimelineHandle,
    ) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            config,
            world,
            actor,
            facing: Direction::South,
            scheduler: WalkScheduler::new(protocol),
            rng,
            requests,
            timeline,
        }
    }

    /// Serve requests until the timeline drops its request sender
    pub async fn run(mut self) {
        info!(actor = %self.actor.id, position = %self.actor.position, "Loopback server started");

        let mut pending: Option<ServerRequest> = None;
        loop {
            let request = match pending.take() {
                Some(request) => request,
                None => match self.requests.recv().await {
                    Some(request) => request,
                    None => break,
                },
            };

            self.network_delay().await;
            match request {
                ServerRequest::Step { direction } => self.handle_step(direction),
                ServerRequest::AutoWalk { origin, steps } => {
                    pending = self.walk_route(origin, steps).await;
                }
                ServerRequest::Stop => trace!("Stop with no route in progress"),
            }
        }

        info!(actor = %self.actor.id, position = %self.actor.position, "Loopback server stopped");
    }

    pub fn position(&self) -> GridPosition {
        self.actor.position
    }

    /// Manual step: confirm it, or reject exactly that prediction
    fn handle_step(&mut self, direction: Direction) {
        let target = self.actor.position.translated_to(direction);
        match self.try_move(direction) {
            Some(from) => self.notify(TimelineEvent::ServerStep {
                actor: self.actor.id,
                from,
                to: self.actor.position,
            }),
            None => self.notify(TimelineEvent::ServerRejectPrediction {
                position: target,
                direction: self.facing,
            }),
        }
    }

    /// Walk a route step by step at server pace.
    ///
    /// Any request arriving mid-route aborts it and is returned for handling.
    async fn walk_route(&mut self, origin: GridPosition, steps: Vec<Direction>) -> Option<ServerRequest> {
        if origin != self.actor.position {
            debug!(origin = %origin, position = %self.actor.position, "Route starts elsewhere, canceling");
            self.notify(TimelineEvent::ServerCancel(self.facing));
            return None;
        }

        debug!(steps = steps.len(), "Walking route");
        for direction in steps {
            let Some(from) = self.try_move(direction) else {
                self.notify(TimelineEvent::ServerCancel(self.facing));
                return None;
            };
            self.notify(TimelineEvent::ServerStep {
                actor: self.actor.id,
                from,
                to: self.actor.position,
            });

            let duration = self.scheduler.step_duration(
                self.actor.speed,
                self.world.ground_speed(&self.actor.position),
                direction.is_diagonal(),
                true,
            );
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                next = self.requests.recv() => {
                    trace!("Route interrupted by a new request");
                    return next;
                }
            }
        }
        None
    }

    /// Move one tile if the server's world allows it; returns the previous position
    fn try_move(&mut self, direction: Direction) -> Option<GridPosition> {
        let from = self.actor.position;
        let to = from.translated_to(direction);
        self.facing = direction;

        let refused = self.config.reject_chance > 0.0 && self.rng.gen_bool(self.config.reject_chance.min(1.0));
        if refused || !self.world.is_walkable(&to) || self.world.has_blocking_occupant(&to) {
            debug!(from = %from, to = %to, refused, "Step refused");
            return None;
        }

        self.actor.position = to;
        Some(from)
    }

    async fn network_delay(&mut self) {
        let jitter = if self.config.jitter_ms > 0 {
            self.rng.gen_range(0..=self.config.jitter_ms)
        } else {
            0
        };
        tokio::time::sleep(Duration::from_millis(self.config.latency_ms + jitter)).await;
    }

    fn notify(&self, event: TimelineEvent) {
        if self.timeline.send(event).is_err() {
            debug!("Timeline closed, dropping server event");
        }
    }
}
