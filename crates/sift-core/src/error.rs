use sift_index::IndexError;
use sift_remote::RemoteError;
use thiserror::Error;

/// Broad failure classes reported to callers and the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Auth,
    State,
    Network,
    Persistence,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{0}")]
    State(String),

    #[error(transparent)]
    Remote(RemoteError),

    #[error("sync window was not ready after {0} polls")]
    PollExhausted(u32),

    #[error("sync cancelled")]
    Cancelled,

    #[error(transparent)]
    Embedding(IndexError),

    #[error("persistence failed: {0:#}")]
    Persistence(anyhow::Error),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Auth(_) => ErrorKind::Auth,
            SyncError::State(_) => ErrorKind::State,
            SyncError::Remote(_)
            | SyncError::PollExhausted(_)
            | SyncError::Cancelled
            | SyncError::Embedding(_) => ErrorKind::Network,
            SyncError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// Whether running the same sync again later can succeed without
    /// operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network | ErrorKind::Persistence)
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unauthorized { .. } => SyncError::Auth(err.to_string()),
            RemoteError::CursorExpired => SyncError::State(err.to_string()),
            other => SyncError::Remote(other),
        }
    }
}

impl From<IndexError> for SyncError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Embedding(_) => SyncError::Embedding(err),
            IndexError::EmbedderMismatch { .. } => SyncError::State(err.to_string()),
            other => SyncError::Persistence(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_errors_map_to_kinds() {
        let auth: SyncError = RemoteError::Unauthorized { status: 401 }.into();
        assert_eq!(auth.kind(), ErrorKind::Auth);
        assert!(!auth.is_retryable());

        let expired: SyncError = RemoteError::CursorExpired.into();
        assert_eq!(expired.kind(), ErrorKind::State);
        assert!(expired.to_string().contains("full resync"));

        let status: SyncError = RemoteError::Status {
            status: 503,
            body: "busy".to_string(),
        }
        .into();
        assert_eq!(status.kind(), ErrorKind::Network);
        assert!(status.is_retryable());
    }

    #[test]
    fn test_index_errors_map_to_kinds() {
        let embed: SyncError = IndexError::Embedding(anyhow::anyhow!("timeout")).into();
        assert_eq!(embed.kind(), ErrorKind::Network);

        let storage: SyncError = IndexError::Storage(anyhow::anyhow!("disk full")).into();
        assert_eq!(storage.kind(), ErrorKind::Persistence);
        assert!(storage.is_retryable());
        assert!(storage.to_string().contains("disk full"));

        let mismatch: SyncError = IndexError::EmbedderMismatch {
            stored: "openai/text-embedding-ada-002/1536".to_string(),
            configured: "hash/1536".to_string(),
        }
        .into();
        assert_eq!(mismatch.kind(), ErrorKind::State);
        assert!(!mismatch.is_retryable());
    }

    #[test]
    fn test_cancelled_is_network_class() {
        assert_eq!(SyncError::Cancelled.kind(), ErrorKind::Network);
        assert_eq!(SyncError::PollExhausted(60).kind(), ErrorKind::Network);
    }
}
