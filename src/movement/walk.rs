//! Per-step timing shared by every actor

use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::config::ProtocolProfile;
use crate::map::{Direction, GridPosition, DEFAULT_GROUND_SPEED};
use crate::util::time::as_millis_u64;

use super::actor::{ActorId, Movable, SpeedFormula};

/// Discrete visual progress of one step
pub const WALK_PROGRESS_UNITS: u8 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalkPhase {
    #[default]
    Idle,
    Walking,
}

/// Timing of the step an actor is walking, or walked last
#[derive(Debug, Clone, Default)]
pub struct WalkState {
    phase: WalkPhase,
    /// Increments with every started step; stale ticks carry an older value
    step: u64,
    from: Option<GridPosition>,
    to: Option<GridPosition>,
    direction: Option<Direction>,
    started_at: Option<Instant>,
    step_duration: Duration,
    /// Duration without the diagonal factor; drives visual progress
    progress_duration: Duration,
    progress: u8,
    server_driven: bool,
}

impl WalkState {
    pub fn phase(&self) -> WalkPhase {
        self.phase
    }

    pub fn is_walking(&self) -> bool {
        self.phase == WalkPhase::Walking
    }

    pub fn step_id(&self) -> u64 {
        self.step
    }

    pub fn from(&self) -> Option<GridPosition> {
        self.from
    }

    pub fn to(&self) -> Option<GridPosition> {
        self.to
    }

    /// Direction of the most recently started step
    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    pub fn step_duration(&self) -> Duration {
        self.step_duration
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn is_server_driven(&self) -> bool {
        self.server_driven
    }

    /// Time since the most recent step started; zero before the first step
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.started_at
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or(Duration::ZERO)
    }

    /// True once the current step's time is up, or when idle
    pub fn is_step_done(&self, now: Instant) -> bool {
        !self.is_walking() || self.elapsed(now) >= self.step_duration
    }

    fn finish(&mut self) {
        self.phase = WalkPhase::Idle;
        self.progress = 0;
    }
}

/// A step that has just been started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTiming {
    pub actor: ActorId,
    pub step: u64,
    pub from: GridPosition,
    pub to: GridPosition,
    pub duration: Duration,
    /// Delay until the first progress tick
    pub tick_interval: Duration,
}

/// Result of one progress tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkProgress {
    /// Nothing is being walked
    Idle,
    InProgress { progress: u8, next_tick: Duration },
    Completed {
        step: u64,
        position: GridPosition,
        server_driven: bool,
    },
}

/// Computes step durations and drives walks forward.
///
/// Holds no per-actor state; every actor's [`WalkState`] lives on its [`Movable`].
#[derive(Debug, Clone, Default)]
pub struct WalkScheduler {
    protocol: ProtocolProfile,
    formula: Option<SpeedFormula>,
}

impl WalkScheduler {
    pub fn new(protocol: ProtocolProfile) -> Self {
        Self {
            protocol,
            formula: None,
        }
    }

    pub fn with_formula(mut self, formula: SpeedFormula) -> Self {
        self.formula = Some(formula);
        self
    }

    pub fn set_formula(&mut self, formula: Option<SpeedFormula>) {
        self.formula = formula;
    }

    pub fn protocol(&self) -> &ProtocolProfile {
        &self.protocol
    }

    /// Duration of one step onto a tile with `ground_speed`.
    ///
    /// `diagonal` is the direction of the step being timed; `server_driven`
    /// steps get no manual slack. Paralyzed speeds yield zero.
    pub fn step_duration(
        &self,
        speed: i32,
        ground_speed: Option<u16>,
        diagonal: bool,
        server_driven: bool,
    ) -> Duration {
        if speed < 1 {
            return Duration::ZERO;
        }
        let protocol = &self.protocol;

        let mut speed = i64::from(speed);
        if protocol.new_speed_law {
            speed *= 2;
        }

        let ground = match ground_speed {
            Some(0) | None => DEFAULT_GROUND_SPEED,
            Some(value) => value,
        };
        let mut interval = 1000 * i64::from(ground);

        match self.formula {
            Some(formula) if protocol.new_speed_law => {
                let divisor = formula.formulated(speed.min(i64::from(i32::MAX)) as i32);
                interval = (interval as f64 / divisor as f64).floor() as i64;
            }
            _ => interval /= speed,
        }

        let beat = i64::from(protocol.server_beat_ms.max(1));
        if protocol.rounds_to_beat() {
            interval = (interval + beat - 1) / beat * beat;
        }
        interval = interval.max(beat);

        if diagonal {
            interval *= i64::from(protocol.diagonal_factor());
        }
        if !server_driven {
            interval += i64::from(protocol.manual_step_slack_ms());
        }

        Duration::from_millis(interval.max(0) as u64)
    }

    /// Start walking `actor` from `from` to `to`.
    ///
    /// The actor's position becomes `to` immediately; progress is tracked
    /// against the returned timing.
    pub fn begin_step(
        &self,
        actor: &mut Movable,
        from: GridPosition,
        to: GridPosition,
        ground_speed: Option<u16>,
        server_driven: bool,
        now: Instant,
    ) -> StepTiming {
        let direction = from.direction_to(&to);
        let diagonal = direction.is_some_and(Direction::is_diagonal);
        let duration = self.step_duration(actor.speed(), ground_speed, diagonal, server_driven);
        let progress_duration = self.step_duration(actor.speed(), ground_speed, false, server_driven);

        if let Some(direction) = direction {
            actor.face(direction);
        }
        actor.set_position(to);

        let walk = actor.walk_mut();
        walk.step += 1;
        walk.phase = WalkPhase::Walking;
        walk.from = Some(from);
        walk.to = Some(to);
        walk.direction = direction;
        walk.started_at = Some(now);
        walk.step_duration = duration;
        walk.progress_duration = progress_duration;
        walk.progress = 0;
        walk.server_driven = server_driven;

        trace!(
            actor = %actor.id(),
            from = %from,
            to = %to,
            duration_ms = as_millis_u64(duration),
            server_driven,
            "Step started"
        );

        StepTiming {
            actor: actor.id(),
            step: actor.walk().step,
            from,
            to,
            duration,
            tick_interval: Self::update_interval(actor.walk()),
        }
    }

    /// Advance the walk to `now`, completing it once its duration has elapsed
    pub fn tick(&self, actor: &mut Movable, now: Instant) -> WalkProgress {
        let walk = actor.walk_mut();
        if !walk.is_walking() {
            return WalkProgress::Idle;
        }

        let elapsed = walk.elapsed(now);
        let per_unit = walk.progress_duration / u32::from(WALK_PROGRESS_UNITS);
        let units = if per_unit.is_zero() {
            WALK_PROGRESS_UNITS
        } else {
            (elapsed.as_nanos() / per_unit.as_nanos()).min(u128::from(WALK_PROGRESS_UNITS)) as u8
        };
        // Never move backwards, even if the speed dropped mid-step
        walk.progress = walk.progress.max(units);

        if elapsed >= walk.step_duration {
            let step = walk.step;
            let server_driven = walk.server_driven;
            walk.finish();
            return WalkProgress::Completed {
                step,
                position: actor.position(),
                server_driven,
            };
        }

        WalkProgress::InProgress {
            progress: walk.progress,
            next_tick: Self::update_interval(walk),
        }
    }

    /// Abort the current step; the actor keeps its position
    pub fn stop(&self, actor: &mut Movable) {
        let walk = actor.walk_mut();
        if walk.is_walking() {
            walk.finish();
        }
    }

    /// Delay between progress ticks of the current step
    pub fn update_interval(walk: &WalkState) -> Duration {
        (walk.step_duration / u32::from(WALK_PROGRESS_UNITS)).max(Duration::from_millis(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol(client_version: u16) -> ProtocolProfile {
        ProtocolProfile {
            client_version,
            ..ProtocolProfile::default()
        }
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn duration_rounds_to_beat_and_adds_manual_slack() {
        let scheduler = WalkScheduler::new(protocol(1100));
        // 100000 / 220 = 454, rounded up to the 50 ms beat
        assert_eq!(scheduler.step_duration(220, Some(100), false, true), ms(500));
        assert_eq!(scheduler.step_duration(220, Some(100), false, false), ms(505));
        assert_eq!(scheduler.step_duration(220, Some(100), true, true), ms(1500));
    }

    #[test]
    fn legacy_versions_skip_rounding_and_use_smaller_diagonal_factor() {
        let scheduler = WalkScheduler::new(protocol(810));
        assert_eq!(scheduler.step_duration(220, Some(100), false, true), ms(454));
        assert_eq!(scheduler.step_duration(220, Some(100), true, false), ms(913));
    }

    #[test]
    fn unknown_ground_uses_default_speed() {
        let scheduler = WalkScheduler::new(protocol(1100));
        assert_eq!(scheduler.step_duration(220, None, false, true), ms(700));
        assert_eq!(scheduler.step_duration(220, Some(0), false, true), ms(700));
    }

    #[test]
    fn beat_is_the_minimum_interval() {
        let scheduler = WalkScheduler::new(protocol(1100));
        assert_eq!(scheduler.step_duration(5000, Some(100), false, true), ms(50));
    }

    #[test]
    fn paralyzed_speed_has_no_duration() {
        let scheduler = WalkScheduler::default();
        assert_eq!(scheduler.step_duration(0, Some(100), false, false), Duration::ZERO);
        assert_eq!(scheduler.step_duration(-5, Some(100), true, false), Duration::ZERO);
    }

    #[test]
    fn new_speed_law_doubles_speed_and_applies_formula() {
        let law = ProtocolProfile {
            new_speed_law: true,
            ..ProtocolProfile::default()
        };
        let plain = WalkScheduler::new(law.clone());
        // 100000 / 440 = 227 -> 250
        assert_eq!(plain.step_duration(220, Some(100), false, true), ms(250));

        let formula = plain.with_formula(SpeedFormula::new(857.36, 261.29, -4795.01));
        // formulated(440) = 500 -> 100000 / 500 = 200
        assert_eq!(formula.step_duration(220, Some(100), false, true), ms(200));

        // The formula is ignored without the speed law
        let ignored = WalkScheduler::new(protocol(1100)).with_formula(SpeedFormula::new(857.36, 261.29, -4795.01));
        assert_eq!(ignored.step_duration(220, Some(100), false, true), ms(500));
    }

    #[test]
    fn slower_manual_walking_increases_slack() {
        let scheduler = WalkScheduler::new(ProtocolProfile {
            slower_manual_walking: true,
            ..ProtocolProfile::default()
        });
        assert_eq!(scheduler.step_duration(220, Some(100), false, false), ms(525));
    }

    #[test]
    fn tick_progresses_then_completes() {
        let scheduler = WalkScheduler::new(protocol(1100));
        let mut actor = Movable::new(ActorId(7), GridPosition::new(5, 5, 7), 220);
        let start = Instant::now();

        let timing = scheduler.begin_step(
            &mut actor,
            GridPosition::new(5, 5, 7),
            GridPosition::new(6, 5, 7),
            Some(100),
            true,
            start,
        );
        assert_eq!(timing.duration, ms(500));
        assert_eq!(timing.tick_interval, Duration::from_micros(15_625));
        assert_eq!(actor.position(), GridPosition::new(6, 5, 7));
        assert_eq!(actor.direction(), Direction::East);
        assert!(actor.is_walking());

        match scheduler.tick(&mut actor, start + ms(250)) {
            WalkProgress::InProgress { progress, .. } => assert_eq!(progress, 16),
            other => panic!("unexpected {other:?}"),
        }

        let done = scheduler.tick(&mut actor, start + ms(500));
        assert_eq!(
            done,
            WalkProgress::Completed {
                step: timing.step,
                position: GridPosition::new(6, 5, 7),
                server_driven: true,
            }
        );
        assert!(!actor.is_walking());
        assert_eq!(scheduler.tick(&mut actor, start + ms(600)), WalkProgress::Idle);
    }

    #[test]
    fn diagonal_progress_uses_straight_duration() {
        let scheduler = WalkScheduler::new(protocol(1100));
        let mut actor = Movable::new(ActorId(7), GridPosition::new(5, 5, 7), 220);
        let start = Instant::now();
        scheduler.begin_step(
            &mut actor,
            GridPosition::new(5, 5, 7),
            GridPosition::new(6, 6, 7),
            Some(100),
            true,
            start,
        );

        // Visual progress saturates long before the diagonal step ends
        match scheduler.tick(&mut actor, start + ms(600)) {
            WalkProgress::InProgress { progress, .. } => assert_eq!(progress, WALK_PROGRESS_UNITS),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            scheduler.tick(&mut actor, start + ms(1500)),
            WalkProgress::Completed { .. }
        ));
    }

    #[test]
    fn stop_keeps_position_and_elapsed_time() {
        let scheduler = WalkScheduler::default();
        let mut actor = Movable::new(ActorId(1), GridPosition::new(1, 1, 7), 220);
        let start = Instant::now();
        scheduler.begin_step(
            &mut actor,
            GridPosition::new(1, 1, 7),
            GridPosition::new(1, 2, 7),
            Some(100),
            false,
            start,
        );
        scheduler.stop(&mut actor);

        assert!(!actor.is_walking());
        assert_eq!(actor.position(), GridPosition::new(1, 2, 7));
        assert_eq!(actor.walk().elapsed(start + ms(40)), ms(40));
        assert!(actor.walk().is_step_done(start));
    }
}
