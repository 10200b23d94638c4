//! Route search over partially observed terrain

pub mod field;
pub mod node;
pub mod result;
pub mod search;

pub use field::{FieldEntry, FieldResult, FieldSearchOption, FieldSearchParams};
pub use result::{PathStatus, RouteResult};
pub use search::PathSearch;
