use spool_core::error::CoreError;
use spool_db::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A collaborator service failed or could not be reached.
    #[error("{service} failed: {message}")]
    Collaborator { service: &'static str, message: String },
}

impl EngineError {
    pub fn collaborator(service: &'static str, message: impl Into<String>) -> Self {
        EngineError::Collaborator {
            service,
            message: message.into(),
        }
    }

    /// Whether the error is a missing entity, from either layer.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::Core(CoreError::NotFound { .. })
                | EngineError::Store(StoreError::NotFound { .. })
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
