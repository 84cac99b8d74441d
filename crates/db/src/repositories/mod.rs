//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod depend_repo;
pub mod job_repo;
pub mod task_error_repo;
pub mod task_repo;
pub mod worker_repo;

pub use depend_repo::DependRepo;
pub use job_repo::JobRepo;
pub use task_error_repo::TaskErrorRepo;
pub use task_repo::TaskRepo;
pub use worker_repo::WorkerRepo;
