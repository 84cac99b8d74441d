//! Shared response envelope types for API handlers.
//!
//! All API responses use a `{ "data": ... }` envelope.

use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// Result of a conditional administrative action. `changed: false` means
/// the entity was already in, or could not move to, the requested state.
#[derive(Debug, Serialize)]
pub struct Changed {
    pub changed: bool,
}

impl DataResponse<Changed> {
    pub fn changed(changed: bool) -> Self {
        DataResponse {
            data: Changed { changed },
        }
    }
}
