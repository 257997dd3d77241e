use reqwest::StatusCode;
use thiserror::Error;

/// Failures surfaced by the provider client. The client never retries.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("provider rejected the account token (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("provider no longer accepts this delta token; a full resync is required")]
    CursorExpired,

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid provider base url: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),

    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl RemoteError {
    /// Map a non-success HTTP status to an error kind.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => RemoteError::Unauthorized {
                status: status.as_u16(),
            },
            410 => RemoteError::CursorExpired,
            code => RemoteError::Status { status: code, body },
        }
    }
}
