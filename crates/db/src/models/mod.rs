//! Row models and insert DTOs for the state store.

pub mod depend;
pub mod dispatch;
pub mod job;
pub mod task;
pub mod task_error;
pub mod worker;
