//! Prediction queue properties of the movement controller

use std::time::Duration;

use tokio::time::Instant;

use tile_game_client::config::{Config, ProtocolProfile};
use tile_game_client::map::{Direction, GridPosition, WorldMap};
use tile_game_client::movement::{ActorId, Confirmation, ControllerState, Movable, PredictiveMovementController};
use tile_game_client::runtime::{ClientEvent, Outbox, ServerRequest};
use tile_game_client::StepRejection;

fn pos(x: i32, y: i32) -> GridPosition {
    GridPosition::new(x, y, 7)
}

fn extended() -> Config {
    Config {
        protocol: ProtocolProfile {
            extended_prediction: true,
            ..ProtocolProfile::default()
        },
        ..Config::default()
    }
}

struct Session {
    map: WorldMap,
    actor: Movable,
    controller: PredictiveMovementController,
    outbox: Outbox,
    clock: Instant,
}

impl Session {
    fn new(config: &Config, at: GridPosition) -> Self {
        Self {
            map: WorldMap::open_floor(30, 30, 7, 100),
            actor: Movable::new(ActorId(1), at, 220),
            controller: PredictiveMovementController::new(config, at),
            outbox: Outbox::new(),
            clock: Instant::now(),
        }
    }

    fn advance(&mut self, millis: u64) {
        self.clock += Duration::from_millis(millis);
    }

    fn step(&mut self, direction: Direction) -> Result<GridPosition, StepRejection> {
        let timing = self.controller.request_step(
            &mut self.actor,
            direction,
            &self.map,
            self.clock,
            &mut self.outbox,
        )?;
        Ok(timing.to)
    }

    fn confirm(&mut self, position: GridPosition) -> Confirmation {
        self.controller
            .confirm_step(&mut self.actor, position, &self.map, self.clock, &mut self.outbox)
    }
}

#[test]
fn matching_confirmations_drain_the_queue_in_order() {
    let paths: [&[Direction]; 3] = [
        &[Direction::East],
        &[Direction::East, Direction::East, Direction::South],
        &[Direction::South, Direction::West, Direction::South],
    ];

    for path in paths {
        let mut session = Session::new(&extended(), pos(10, 10));
        let mut predicted = Vec::new();
        for &direction in path {
            predicted.push(session.step(direction).unwrap());
            // Let each step finish before predicting the next one
            session.advance(520);
        }
        assert_eq!(session.controller.queue_len(), path.len());
        assert_eq!(session.controller.state(&session.actor), ControllerState::PreWalking);

        for &position in &predicted {
            assert_eq!(session.confirm(position), Confirmation::Matched { dropped: 0 });
        }

        let last = *predicted.last().unwrap();
        assert_eq!(session.controller.queue_len(), 0);
        assert_eq!(session.controller.confirmed_position(), last);
        assert_eq!(session.actor.position(), last);

        let steps_sent = session
            .outbox
            .requests()
            .iter()
            .filter(|request| matches!(request, ServerRequest::Step { .. }))
            .count();
        assert_eq!(steps_sent, path.len());
    }
}

#[test]
fn later_confirmation_skips_ahead() {
    let mut session = Session::new(&extended(), pos(10, 10));
    let first = session.step(Direction::North).unwrap();
    session.advance(520);
    let second = session.step(Direction::North).unwrap();
    session.advance(520);
    let third = session.step(Direction::North).unwrap();
    assert_eq!([first, second, third], [pos(10, 9), pos(10, 8), pos(10, 7)]);

    assert_eq!(session.confirm(second), Confirmation::Matched { dropped: 1 });
    assert_eq!(session.controller.predicted().copied().collect::<Vec<_>>(), vec![third]);
    assert_eq!(session.controller.confirmed_position(), second);
}

#[test]
fn unexplained_confirmation_always_empties_the_queue() {
    for outstanding in 0..=3 {
        let mut session = Session::new(&extended(), pos(10, 10));
        for _ in 0..outstanding {
            session.step(Direction::East).unwrap();
            session.advance(520);
        }
        assert_eq!(session.controller.queue_len(), outstanding);

        // Somewhere the queue never predicted
        let confirmation = session.confirm(pos(9, 11));
        assert_eq!(session.controller.queue_len(), 0);
        assert_eq!(session.controller.confirmed_position(), pos(9, 11));
        assert_eq!(session.actor.position(), pos(9, 11));

        match confirmation {
            Confirmation::Resync { discarded, timing } => {
                assert!(outstanding > 0);
                assert_eq!(discarded, outstanding);
                assert!(timing.is_some(), "adjacent correction is walked");
            }
            Confirmation::ServerWalk(timing) => {
                assert_eq!(outstanding, 0);
                assert!(timing.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[test]
fn teleport_snaps_without_walking() {
    let mut session = Session::new(&Config::default(), pos(10, 10));
    session.step(Direction::East).unwrap();

    let confirmation = session.confirm(pos(20, 3));
    assert_eq!(confirmation, Confirmation::Resync { discarded: 1, timing: None });
    assert!(!session.actor.is_walking());
    assert_eq!(session.actor.position(), pos(20, 3));
    assert!(session.outbox.events().contains(&ClientEvent::PositionChanged {
        actor: ActorId(1),
        from: pos(10, 10),
        to: pos(20, 3),
    }));
}

#[test]
fn default_profile_allows_a_single_outstanding_step() {
    let mut session = Session::new(&Config::default(), pos(10, 10));
    tokio_test::assert_ok!(session.step(Direction::East));
    session.advance(520);

    assert_eq!(
        session.step(Direction::East),
        Err(StepRejection::PredictionLimit { outstanding: 1 })
    );

    // Stalled server: once the step is long over, one more is let through
    session.advance(400);
    assert_eq!(session.step(Direction::East), Ok(pos(12, 10)));
}
