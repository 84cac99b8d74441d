//! Worker-facing dispatch.
//!
//! [`DispatchQueueManager`] answers worker polls; [`DispatcherService`]
//! applies the events workers report back. Remote kill requests run as
//! tracked background tasks in [`BackgroundKills`].

mod dispatcher;
mod kills;
mod priority;
mod queue;

pub use dispatcher::DispatcherService;
pub use kills::BackgroundKills;
pub use priority::PriorityCache;
pub use queue::DispatchQueueManager;
