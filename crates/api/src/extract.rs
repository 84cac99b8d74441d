//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use spool_core::types::DbId;

use crate::error::AppError;

pub const PROJECT_ID_HEADER: &str = "x-project-id";

/// The project a request acts for, from the `X-Project-Id` header.
#[derive(Debug, Clone, Copy)]
pub struct ProjectId(pub DbId);

impl<S: Send + Sync> FromRequestParts<S> for ProjectId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(PROJECT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::BadRequest("Missing X-Project-Id header".into()))?;

        raw.trim()
            .parse::<DbId>()
            .map(ProjectId)
            .map_err(|_| AppError::BadRequest(format!("Invalid X-Project-Id header: {raw}")))
    }
}
