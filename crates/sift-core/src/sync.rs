//! Delta-token driven mail synchronization.
//!
//! The engine only fetches. Storing records and committing the returned
//! cursor is the caller's job, and must happen in that order.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sift_remote::{DeltaRequest, EmailMessage, RemoteMailClient, SyncStartResponse};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::error::SyncError;

pub const DEFAULT_WINDOW_DAYS: u32 = 3;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// How far back the initial sync window reaches.
    pub window_days: u32,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

/// Everything one sync run fetched, plus the cursor to commit once the
/// records are stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncBatch {
    pub records: Vec<EmailMessage>,
    pub cursor: String,
    pub pages: usize,
}

pub struct SyncEngine<C> {
    client: C,
    options: SyncOptions,
}

impl<C: RemoteMailClient> SyncEngine<C> {
    pub fn new(client: C, options: SyncOptions) -> Self {
        Self { client, options }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Open a sync window, wait for the provider to prepare it, then drain
    /// every page of it.
    #[instrument(skip_all, fields(window_days = self.options.window_days))]
    pub async fn perform_initial_sync(&self, cancel: &CancellationToken) -> Result<SyncBatch, SyncError> {
        let start = self.wait_until_ready(cancel).await?;
        if start.sync_updated_token.is_empty() {
            return Err(SyncError::State(
                "provider reported a ready sync window without a delta token".to_string(),
            ));
        }
        let batch = self.drain(start.sync_updated_token, cancel).await?;
        info!(
            "initial sync fetched {} messages over {} pages",
            batch.records.len(),
            batch.pages
        );
        Ok(batch)
    }

    /// Fetch everything that changed since `stored_cursor`.
    ///
    /// Fails without touching the network when there is no cursor.
    #[instrument(skip_all)]
    pub async fn sync_emails(
        &self,
        stored_cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SyncBatch, SyncError> {
        let cursor = stored_cursor.filter(|c| !c.is_empty()).ok_or_else(|| {
            SyncError::State("no delta token stored; run an initial sync first".to_string())
        })?;
        let batch = self.drain(cursor.to_string(), cancel).await?;
        info!(
            "incremental sync fetched {} messages over {} pages",
            batch.records.len(),
            batch.pages
        );
        Ok(batch)
    }

    async fn wait_until_ready(&self, cancel: &CancellationToken) -> Result<SyncStartResponse, SyncError> {
        let attempts = self.options.max_poll_attempts.max(1);
        for attempt in 1..=attempts {
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                response = self.client.start_sync(self.options.window_days) => response?,
            };
            if response.ready {
                debug!("sync window ready after {} polls", attempt);
                return Ok(response);
            }
            debug!("sync window not ready (poll {}/{})", attempt, attempts);
            if attempt < attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    _ = tokio::time::sleep(self.options.poll_interval) => {}
                }
            }
        }
        Err(SyncError::PollExhausted(attempts))
    }

    /// Follow page tokens from `cursor` until the provider stops handing
    /// them out. Pages are requested one after another; records keep page
    /// order. The cursor tracks the last non-empty delta token seen.
    async fn drain(&self, mut cursor: String, cancel: &CancellationToken) -> Result<SyncBatch, SyncError> {
        let mut request = DeltaRequest::Delta(cursor.clone());
        let mut records = Vec::new();
        let mut pages = 0;

        loop {
            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                page = self.client.get_updated_emails(&request) => page?,
            };
            pages += 1;

            if let Some(token) = page.delta_token() {
                cursor = token.to_string();
            }
            let next = page.page_token().map(str::to_string);
            debug!("page {} carried {} records", pages, page.records.len());
            records.extend(page.records);

            match next {
                Some(token) => request = DeltaRequest::Page(token),
                None => break,
            }
        }

        Ok(SyncBatch {
            records,
            cursor,
            pages,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedClient;
    use super::*;
    use crate::error::ErrorKind;
    use sift_remote::RemoteError;

    fn engine(client: ScriptedClient) -> SyncEngine<ScriptedClient> {
        SyncEngine::new(
            client,
            SyncOptions {
                poll_interval: Duration::ZERO,
                ..SyncOptions::default()
            },
        )
    }

    fn ids(batch: &SyncBatch) -> Vec<&str> {
        batch.records.iter().map(|m| m.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_initial_sync_polls_until_ready() {
        let client = ScriptedClient::new()
            .start(false, "")
            .start(false, "")
            .start(true, "T0")
            .page(&[], None, None);
        let engine = engine(client);

        let batch = engine
            .perform_initial_sync(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(engine.client().start_calls(), 3);
        assert_eq!(engine.client().requests(), vec![DeltaRequest::Delta("T0".into())]);
        assert!(batch.records.is_empty());
        assert_eq!(batch.cursor, "T0");
    }

    #[tokio::test]
    async fn test_initial_sync_follows_pages_in_order() {
        let client = ScriptedClient::new()
            .start(true, "T0")
            .page(&["a", "b"], Some("P1"), Some("T1"))
            .page(&["c"], None, Some("T2"));
        let engine = engine(client);

        let batch = engine
            .perform_initial_sync(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ids(&batch), vec!["a", "b", "c"]);
        assert_eq!(batch.cursor, "T2");
        assert_eq!(batch.pages, 2);
        assert_eq!(
            engine.client().requests(),
            vec![DeltaRequest::Delta("T0".into()), DeltaRequest::Page("P1".into())]
        );
    }

    #[tokio::test]
    async fn test_poll_limit() {
        let client = ScriptedClient::new().start(false, "").start(false, "");
        let engine = SyncEngine::new(
            client,
            SyncOptions {
                poll_interval: Duration::ZERO,
                max_poll_attempts: 2,
                ..SyncOptions::default()
            },
        );
        let err = engine
            .perform_initial_sync(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::PollExhausted(2)));
        assert!(engine.client().requests().is_empty());
    }

    #[tokio::test]
    async fn test_incremental_without_cursor_makes_no_calls() {
        let engine = engine(ScriptedClient::new());
        for stored in [None, Some("")] {
            let err = engine
                .sync_emails(stored, &CancellationToken::new())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::State);
        }
        assert_eq!(engine.client().start_calls(), 0);
        assert!(engine.client().requests().is_empty());
    }

    #[tokio::test]
    async fn test_incremental_keeps_cursor_without_new_token() {
        let client = ScriptedClient::new()
            .page(&["x"], Some("P1"), None)
            .page(&["y"], None, Some(""));
        let engine = engine(client);

        let batch = engine
            .sync_emails(Some("T5"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ids(&batch), vec!["x", "y"]);
        assert_eq!(batch.cursor, "T5");
        assert_eq!(engine.client().requests()[0], DeltaRequest::Delta("T5".into()));
    }

    #[tokio::test]
    async fn test_incremental_takes_last_delta_token() {
        let client = ScriptedClient::new()
            .page(&["x"], Some("P1"), Some("T6"))
            .page(&[], Some("P2"), Some("T7"))
            .page(&[], None, None);
        let engine = engine(client);

        let batch = engine
            .sync_emails(Some("T5"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(batch.cursor, "T7");
        assert_eq!(batch.pages, 3);
    }

    #[tokio::test]
    async fn test_empty_terminal_page_still_moves_cursor() {
        let client = ScriptedClient::new().page(&[], None, Some("T9"));
        let engine = engine(client);
        let batch = engine
            .sync_emails(Some("T8"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(batch.cursor, "T9");
    }

    #[tokio::test]
    async fn test_failure_mid_loop_returns_no_batch() {
        let client = ScriptedClient::new()
            .page(&["a"], Some("P1"), Some("T1"))
            .page_error(RemoteError::Status {
                status: 502,
                body: "bad gateway".into(),
            });
        let engine = engine(client);
        let err = engine
            .sync_emails(Some("T0"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_expired_cursor_is_state_error() {
        let client = ScriptedClient::new().page_error(RemoteError::CursorExpired);
        let engine = engine(client);
        let err = engine
            .sync_emails(Some("stale"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let engine = engine(ScriptedClient::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine.sync_emails(Some("T0"), &cancel).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }
}
