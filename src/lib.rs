//! Movement core of a tile-based multiplayer game client.
//!
//! - `pathfinding`: route search over partially known terrain, plus a
//!   full-field flood for tooling
//! - `movement`: step timing and client-side prediction of the local actor
//! - `runtime`: the single main timeline that owns all actor state, with
//!   background search and delayed callbacks delivered back onto it
//! - `sim`: a loopback server for demos and end-to-end tests

pub mod config;
pub mod error;
pub mod map;
pub mod movement;
pub mod pathfinding;
pub mod runtime;
pub mod sim;
pub mod util;

pub use config::Config;
pub use error::{MovementError, StepRejection};
