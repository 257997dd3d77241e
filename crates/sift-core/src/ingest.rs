use serde::{Deserialize, Serialize};
use sift_index::IndexHandle;
use sift_remote::EmailMessage;
use sift_store::MailStore;
use tracing::{debug, instrument};

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub stored: usize,
    pub indexed: usize,
}

/// Store a batch of synced messages, then index them.
///
/// Both steps are idempotent per message id, so a batch re-delivered after a
/// failed run converges to the same state.
#[instrument(skip_all, fields(account = account_id, count = records.len()))]
pub async fn ingest(
    store: &MailStore,
    index: &IndexHandle,
    account_id: &str,
    records: &[EmailMessage],
) -> Result<IngestSummary, SyncError> {
    if records.is_empty() {
        return Ok(IngestSummary::default());
    }
    let stored = store
        .upsert_emails(account_id, records)
        .await
        .map_err(SyncError::Persistence)?;
    let indexed = index.index_messages(records).await?;
    debug!("ingested {} messages ({} indexed)", stored, indexed);
    Ok(IngestSummary { stored, indexed })
}
