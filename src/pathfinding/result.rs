//! Outcome of a single path search

use serde::{Deserialize, Serialize};

use crate::map::{Direction, GridPosition};

/// How a search ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStatus {
    /// Route found
    Ok,
    /// Origin equals destination; nothing to do
    SamePosition,
    /// Queue exhausted, or destination on another floor
    NoPath,
    /// Iteration budget exhausted
    TooComplex,
    /// Route reached the destination only through unseen terrain
    Unreliable,
}

impl PathStatus {
    pub fn is_ok(self) -> bool {
        self == PathStatus::Ok
    }
}

/// Immutable result of one `find_path` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    origin: GridPosition,
    destination: GridPosition,
    steps: Vec<Direction>,
    status: PathStatus,
    complexity: u32,
}

impl RouteResult {
    pub(crate) fn found(
        origin: GridPosition,
        destination: GridPosition,
        steps: Vec<Direction>,
        complexity: u32,
    ) -> Self {
        Self {
            origin,
            destination,
            steps,
            status: PathStatus::Ok,
            complexity,
        }
    }

    pub(crate) fn failed(
        origin: GridPosition,
        destination: GridPosition,
        status: PathStatus,
        complexity: u32,
    ) -> Self {
        Self {
            origin,
            destination,
            steps: Vec::new(),
            status,
            complexity,
        }
    }

    pub fn origin(&self) -> GridPosition {
        self.origin
    }

    pub fn destination(&self) -> GridPosition {
        self.destination
    }

    /// Step directions in origin → destination order
    pub fn steps(&self) -> &[Direction] {
        &self.steps
    }

    pub fn status(&self) -> PathStatus {
        self.status
    }

    /// Queue pops consumed by the search
    pub fn complexity(&self) -> u32 {
        self.complexity
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Every position visited when walking the route (origin excluded)
    pub fn positions(&self) -> Vec<GridPosition> {
        self.origin.translated_along(&self.steps)
    }

    /// Where the route ends, or the origin for an empty route
    pub fn end_position(&self) -> GridPosition {
        self.positions().last().copied().unwrap_or(self.origin)
    }
}
