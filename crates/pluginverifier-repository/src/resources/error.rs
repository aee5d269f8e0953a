use std::sync::Arc;

use thiserror::Error;

use super::ResourceLock;

/// Why a resource could not be handed out by a repository.
///
/// All requesters waiting on the same provisioning observe a clone of the same error.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The provider determined that the resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The provider failed, either with an error or by panicking.
    ///
    /// Nothing is cached for the key, so a later request retries.
    #[error("{reason}: {cause:#}")]
    Failed {
        reason: String,
        cause: Arc<anyhow::Error>,
    },
    /// The request was abandoned before the resource became available.
    #[error("interrupted while waiting for the resource")]
    Interrupted,
    /// The repository was closed.
    #[error("repository is closed")]
    Closed,
}

impl FetchError {
    pub fn failed(reason: impl Into<String>, cause: anyhow::Error) -> Self {
        Self::Failed {
            reason: reason.into(),
            cause: Arc::new(cause),
        }
    }

    /// A short, static description for metric tags.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            FetchError::NotFound(_) => "not_found",
            FetchError::Failed { .. } => "failed",
            FetchError::Interrupted => "interrupted",
            FetchError::Closed => "closed",
        }
    }
}

/// The result of looking a resource up, holding a lock on success.
pub type FetchResult<K, R, W> = Result<ResourceLock<K, R, W>, FetchError>;
