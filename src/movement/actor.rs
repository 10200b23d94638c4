//! Movable actors: position, facing, speed and the walk in progress

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::map::{Direction, GridPosition};

use super::walk::WalkState;

/// Server-assigned creature id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub u32);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logarithmic speed transform sent by servers using the new speed law.
///
/// `formulated = max(1, floor(a * ln(speed / 2 + b) + c + 0.5))`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedFormula {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl SpeedFormula {
    pub fn new(a: f64, b: f64, c: f64) -> Self {
        Self { a, b, c }
    }

    /// Effective divisor for an already law-adjusted speed
    pub fn formulated(&self, speed: i32) -> i64 {
        if f64::from(speed) <= -self.b {
            return 1;
        }
        let value = self.a * (f64::from(speed / 2) + self.b).ln() + self.c + 0.5;
        (value.floor() as i64).max(1)
    }
}

/// Shared movement state of any actor, local or remote
#[derive(Debug, Clone)]
pub struct Movable {
    id: ActorId,
    /// Tile the actor stands on, or walks toward while a step is in progress
    position: GridPosition,
    direction: Direction,
    /// Base speed; zero or less means paralyzed
    speed: i32,
    walk: WalkState,
}

impl Movable {
    pub fn new(id: ActorId, position: GridPosition, speed: i32) -> Self {
        Self {
            id,
            position,
            direction: Direction::South,
            speed,
            walk: WalkState::default(),
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn position(&self) -> GridPosition {
        self.position
    }

    pub(crate) fn set_position(&mut self, position: GridPosition) {
        self.position = position;
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn face(&mut self, direction: Direction) {
        self.direction = direction;
    }

    pub fn speed(&self) -> i32 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: i32) {
        self.speed = speed;
    }

    pub fn is_paralyzed(&self) -> bool {
        self.speed <= 0
    }

    pub fn walk(&self) -> &WalkState {
        &self.walk
    }

    pub(crate) fn walk_mut(&mut self) -> &mut WalkState {
        &mut self.walk
    }

    pub fn is_walking(&self) -> bool {
        self.walk.is_walking()
    }
}
