//! Client side of the remote mail provider.
//!
//! [`RemoteMailClient`] is the seam the sync engine is written against;
//! [`AurinkoClient`] is the HTTP implementation.

mod client;
mod error;
pub mod types;

use async_trait::async_trait;

pub use client::{AurinkoClient, DEFAULT_BASE_URL, DEFAULT_BODY_TYPE};
pub use error::RemoteError;
pub use types::{
    DeltaRequest, EmailAddress, EmailAttachment, EmailHeader, EmailMessage, OutgoingMessage,
    SentMessage, Sensitivity, Subscription, SubscriptionList, SyncStartResponse,
    SyncUpdatedResponse, SysClassification, SysLabel,
};

/// The two sync endpoints the engine consumes.
#[async_trait]
pub trait RemoteMailClient: Send + Sync {
    /// Ask the provider to prepare a sync window. Poll until `ready`.
    async fn start_sync(&self, days_within: u32) -> Result<SyncStartResponse, RemoteError>;

    /// Fetch one page of changed messages.
    async fn get_updated_emails(
        &self,
        request: &DeltaRequest,
    ) -> Result<SyncUpdatedResponse, RemoteError>;
}
