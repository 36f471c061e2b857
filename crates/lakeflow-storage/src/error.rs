use thiserror::Error;

/// Errors surfaced by the zone store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("invalid storage configuration: {message}")]
    InvalidConfig { message: String },

    #[error("storage backend error: {0}")]
    Backend(#[from] opendal::Error),
}

impl StorageError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Transient errors are worth a bounded retry; configuration and
    /// not-found errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Backend(e) => e.is_temporary() || matches!(
                e.kind(),
                opendal::ErrorKind::RateLimited | opendal::ErrorKind::Unexpected
            ),
            _ => false,
        }
    }
}
