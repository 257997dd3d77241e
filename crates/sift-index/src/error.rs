use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("document {id} has a {actual}-dimension embedding, index expects {expected}")]
    Dimension {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),

    #[error("snapshot is not readable: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("unsupported snapshot version {0}")]
    SnapshotVersion(u32),

    #[error("snapshot storage failed: {0:#}")]
    Storage(anyhow::Error),

    #[error("index was built with embedder {stored}, but {configured} is configured")]
    EmbedderMismatch { stored: String, configured: String },

    #[error("index writer for account {0} has stopped")]
    WriterClosed(String),
}
