//! Main-timeline runtime: event loop, background runners, timers and outbound effects

pub mod dispatcher;
pub mod event;
pub mod outbox;
pub mod runner;
pub mod timeline;

pub use dispatcher::{Dispatcher, ScheduledEvent, TokioDispatcher};
pub use event::TimelineEvent;
pub use outbox::{AutoWalkFailure, ClientEvent, Outbox, ServerRequest};
pub use runner::{InlineTaskRunner, Task, TaskId, TaskRunner, TokioTaskRunner};
pub use timeline::{Timeline, TimelineHandle, INLINE_SEARCH_RADIUS};
