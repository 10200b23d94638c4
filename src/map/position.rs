//! Grid coordinates and the eight step directions

use std::fmt;

use serde::{Deserialize, Serialize};

/// Highest floor index a position may carry
pub const MAX_FLOOR: u8 = 15;

/// One of the eight grid-adjacent step directions.
///
/// Discriminants are the direction codes the network layer encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    North = 0,
    East = 1,
    South = 2,
    West = 3,
    NorthEast = 4,
    SouthEast = 5,
    SouthWest = 6,
    NorthWest = 7,
}

impl Direction {
    /// All directions in code order
    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
        Direction::NorthEast,
        Direction::SouthEast,
        Direction::SouthWest,
        Direction::NorthWest,
    ];

    /// Unit offset (dx, dy); y grows southward
    pub const fn offset(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
            Direction::NorthEast => (1, -1),
            Direction::SouthEast => (1, 1),
            Direction::SouthWest => (-1, 1),
            Direction::NorthWest => (-1, -1),
        }
    }

    /// Direction matching a unit offset, `None` for (0, 0)
    pub fn from_offset(dx: i32, dy: i32) -> Option<Self> {
        match (dx.signum(), dy.signum()) {
            (0, -1) => Some(Direction::North),
            (1, 0) => Some(Direction::East),
            (0, 1) => Some(Direction::South),
            (-1, 0) => Some(Direction::West),
            (1, -1) => Some(Direction::NorthEast),
            (1, 1) => Some(Direction::SouthEast),
            (-1, 1) => Some(Direction::SouthWest),
            (-1, -1) => Some(Direction::NorthWest),
            _ => None,
        }
    }

    pub const fn is_diagonal(self) -> bool {
        matches!(
            self,
            Direction::NorthEast | Direction::SouthEast | Direction::SouthWest | Direction::NorthWest
        )
    }

    /// Wire code of the direction
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }
}

/// Integer (x, y, floor) coordinate on the world grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPosition {
    pub x: i32,
    pub y: i32,
    pub z: u8,
}

impl GridPosition {
    pub const fn new(x: i32, y: i32, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Floor within [0, MAX_FLOOR] and non-negative coordinates
    pub fn is_valid(&self) -> bool {
        self.x >= 0 && self.y >= 0 && self.z <= MAX_FLOOR
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z)
    }

    pub fn translated_to(&self, direction: Direction) -> Self {
        let (dx, dy) = direction.offset();
        self.translated(dx, dy)
    }

    /// Walk a direction sequence, returning every visited position (origin excluded)
    pub fn translated_along(&self, steps: &[Direction]) -> Vec<GridPosition> {
        let mut current = *self;
        steps
            .iter()
            .map(|&dir| {
                current = current.translated_to(dir);
                current
            })
            .collect()
    }

    /// Direction of the step from `self` toward `other` (sign of the delta)
    pub fn direction_to(&self, other: &GridPosition) -> Option<Direction> {
        Direction::from_offset(other.x - self.x, other.y - self.y)
    }

    /// Euclidean distance on the floor plane
    pub fn distance(&self, other: &GridPosition) -> f32 {
        let dx = (self.x - other.x) as f32;
        let dy = (self.y - other.y) as f32;
        (dx * dx + dy * dy).sqrt()
    }

    /// Number of king moves between the two positions (floor ignored)
    pub fn chebyshev_distance(&self, other: &GridPosition) -> u32 {
        (self.x - other.x).unsigned_abs().max((self.y - other.y).unsigned_abs())
    }

    pub fn manhattan_distance(&self, other: &GridPosition) -> u32 {
        (self.x - other.x).unsigned_abs() + (self.y - other.y).unsigned_abs()
    }

    /// True for the eight neighbours on the same floor
    pub fn is_adjacent(&self, other: &GridPosition) -> bool {
        self.z == other.z && self != other && self.chebyshev_distance(other) == 1
    }
}

impl fmt::Display for GridPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

impl std::str::FromStr for GridPosition {
    type Err = crate::error::MovementError;

    /// Parses the `x,y,z` form used by the scripting layer
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let invalid = || crate::error::MovementError::InvalidPosition(s.to_string());
        if parts.len() != 3 {
            return Err(invalid());
        }
        let x = parts[0].parse().map_err(|_| invalid())?;
        let y = parts[1].parse().map_err(|_| invalid())?;
        let z: u8 = parts[2].parse().map_err(|_| invalid())?;
        if z > MAX_FLOOR {
            return Err(invalid());
        }
        Ok(Self::new(x, y, z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_offsets_round_trip() {
        for dir in Direction::ALL {
            let (dx, dy) = dir.offset();
            assert_eq!(Direction::from_offset(dx, dy), Some(dir));
            assert_eq!(Direction::from_code(dir.code()), Some(dir));
        }
        assert_eq!(Direction::from_offset(0, 0), None);
        assert_eq!(Direction::from_code(8), None);
    }

    #[test]
    fn direction_to_uses_delta_sign() {
        let a = GridPosition::new(10, 10, 7);
        assert_eq!(a.direction_to(&GridPosition::new(10, 9, 7)), Some(Direction::North));
        assert_eq!(a.direction_to(&GridPosition::new(14, 14, 7)), Some(Direction::SouthEast));
        assert_eq!(a.direction_to(&a), None);
    }

    #[test]
    fn translated_along_visits_each_step() {
        let origin = GridPosition::new(0, 0, 7);
        let visited = origin.translated_along(&[Direction::East, Direction::SouthEast, Direction::South]);
        assert_eq!(
            visited,
            vec![
                GridPosition::new(1, 0, 7),
                GridPosition::new(2, 1, 7),
                GridPosition::new(2, 2, 7),
            ]
        );
    }

    #[test]
    fn distances() {
        let a = GridPosition::new(0, 0, 7);
        let b = GridPosition::new(3, 4, 7);
        assert_eq!(a.distance(&b), 5.0);
        assert_eq!(a.chebyshev_distance(&b), 4);
        assert_eq!(a.manhattan_distance(&b), 7);
        assert!(a.is_adjacent(&GridPosition::new(1, 1, 7)));
        assert!(!a.is_adjacent(&GridPosition::new(1, 1, 6)));
    }

    #[test]
    fn parse_and_validate() {
        let pos: GridPosition = "32,17,7".parse().unwrap();
        assert_eq!(pos, GridPosition::new(32, 17, 7));
        assert_eq!(pos.to_string(), "32,17,7");
        assert!("1,2".parse::<GridPosition>().is_err());
        assert!("1,2,16".parse::<GridPosition>().is_err());
        assert!(!GridPosition::new(-1, 0, 7).is_valid());
    }
}
