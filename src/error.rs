use thiserror::Error;

/// Failure taxonomy shared by the report and sync engines.
///
/// Value-level coercion failures and malformed filter literals never reach
/// this type: the former become empty cells, the latter drop the filter.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation error: {message}")]
    Validation { message: String },
    #[error("{entity} '{name}' not found")]
    NotFound { entity: &'static str, name: String },
    #[error("remote failure: {message}")]
    Remote { message: String },
    #[error("local store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            name: name.into(),
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
