//! The spool dispatch engine.
//!
//! [`JobService`] owns job and task lifecycle, [`DependService`] the
//! dependency edges between them, and [`DispatcherService`] with
//! [`DispatchQueueManager`] the worker-facing poll and event protocol.
//! [`MaintenanceSweeper`] reclaims orphaned work in the background.
//! [`Engine`] wires them together over one [`spool_db::StateStore`].

pub mod config;
pub mod depend;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod maintenance;
pub mod metrics;
pub mod ports;
pub mod workers;

pub use config::EngineConfig;
pub use depend::DependService;
pub use dispatch::{BackgroundKills, DispatchQueueManager, DispatcherService, PriorityCache};
pub use engine::{Collaborators, Engine};
pub use error::{EngineError, EngineResult};
pub use jobs::JobService;
pub use maintenance::{MaintenanceSweeper, SweepReport};
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use workers::WorkerRegistry;
