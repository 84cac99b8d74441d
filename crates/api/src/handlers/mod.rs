pub mod cluster;
pub mod jobs;
pub mod tasks;
pub mod workers;
