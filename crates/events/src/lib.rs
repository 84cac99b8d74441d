//! Event channel for the spool dispatch engine.
//!
//! - [`EventBus`] is the in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`EngineEvent`] is the closed set of messages it carries.
//! - [`EventLogger`] is a background consumer that traces every event.

pub mod bus;
pub mod logger;

pub use bus::{EngineEvent, EventBus};
pub use logger::EventLogger;
