//! Domain types and pure logic for the spool job/task dispatch engine.
//!
//! Nothing in this crate performs I/O. The state store, event channel and
//! dispatch services live in `spool-db`, `spool-events` and `spool-engine`.

pub mod dispatch;
pub mod error;
pub mod graph;
pub mod job_spec;
pub mod priority;
pub mod protocol;
pub mod retry;
pub mod script;
pub mod status;
pub mod types;
pub mod worker;
