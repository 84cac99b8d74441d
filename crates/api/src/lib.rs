//! spool API server library.
//!
//! Exposes config, state, error handling, the collaborator clients and the
//! route tree so integration tests and the binary entrypoint share them.

pub mod clients;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
