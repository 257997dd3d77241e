//! Account sync and search orchestration.
//!
//! [`Core`] ties the provider client, the SQLite store and the per-account
//! search indexes together. A sync run fetches with [`SyncEngine`], stores
//! and indexes the records, and only then commits the new delta token.

pub mod config;
pub mod error;
pub mod ingest;
pub mod scheduler;
pub mod sync;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sift_index::{IndexError, IndexHandle, IndexRegistry, SearchResults};
use sift_remote::{AurinkoClient, RemoteMailClient};
use sift_store::{Account, MailStore};
use sift_vector::{embedder_from_config_or_hash, Embedder};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub use config::{RemoteConfig, SiftConfig, SiftPaths};
pub use error::{ErrorKind, SyncError};
pub use ingest::IngestSummary;
pub use scheduler::{SchedulerConfig, ScheduledSync, SyncScheduler};
pub use sync::{SyncBatch, SyncEngine, SyncOptions};

/// Longest the daemon sleeps between scheduling passes.
const MAX_TICK: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub account_id: String,
    pub messages: usize,
    pub pages: usize,
    pub indexed: usize,
    pub cursor: String,
}

pub struct Core {
    store: MailStore,
    indexes: IndexRegistry,
    config: SiftConfig,
    /// Serializes sync runs per account.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Core {
    pub async fn init(paths: &SiftPaths, config: SiftConfig) -> Result<Self> {
        info!("Initializing sift in {}", paths.base_dir.display());
        paths.ensure_dirs()?;
        let store = MailStore::open(&paths.db_path).await?;
        let embedder = embedder_from_config_or_hash(&config.embedding);
        Ok(Self::new(store, embedder, config))
    }

    pub fn new(store: MailStore, embedder: Arc<dyn Embedder>, config: SiftConfig) -> Self {
        let indexes = IndexRegistry::new(
            Arc::new(store.clone()),
            embedder,
            config.search.clone(),
        );
        Self {
            store,
            indexes,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &MailStore {
        &self.store
    }

    pub fn config(&self) -> &SiftConfig {
        &self.config
    }

    pub async fn add_account(&self, account_id: &str, token: &str) -> Result<()> {
        self.store.upsert_account(account_id, token).await
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.store.list_accounts().await
    }

    /// The account's index, restored or created on first use.
    pub async fn index(&self, account_id: &str) -> Result<IndexHandle, IndexError> {
        self.indexes.open(account_id).await
    }

    async fn account(&self, account_id: &str) -> Result<Account, SyncError> {
        self.store
            .get_account(account_id)
            .await
            .map_err(SyncError::Persistence)?
            .ok_or_else(|| SyncError::State(format!("unknown account {account_id}")))
    }

    fn client_for(&self, account: &Account) -> Result<AurinkoClient, SyncError> {
        if account.token.trim().is_empty() {
            return Err(SyncError::Auth(format!("account {} has no token", account.id)));
        }
        let remote = &self.config.remote;
        let client = AurinkoClient::new(&remote.base_url, account.token.clone(), remote.timeout())?
            .with_body_type(remote.body_type.clone());
        Ok(client)
    }

    async fn account_lock(&self, account_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Open a fresh sync window for the account and ingest it.
    pub async fn initial_sync(&self, account_id: &str, cancel: &CancellationToken) -> Result<SyncSummary, SyncError> {
        let account = self.account(account_id).await?;
        let client = self.client_for(&account)?;
        self.initial_sync_with(account_id, client, cancel).await
    }

    /// Fetch and ingest everything since the account's stored delta token.
    pub async fn sync_account(&self, account_id: &str, cancel: &CancellationToken) -> Result<SyncSummary, SyncError> {
        let account = self.account(account_id).await?;
        let client = self.client_for(&account)?;
        self.sync_account_with(account_id, client, cancel).await
    }

    /// [`Core::initial_sync`] against a given client.
    #[instrument(skip(self, client, cancel))]
    pub async fn initial_sync_with<C: RemoteMailClient>(
        &self,
        account_id: &str,
        client: C,
        cancel: &CancellationToken,
    ) -> Result<SyncSummary, SyncError> {
        let lock = self.account_lock(account_id).await;
        let _guard = lock.lock().await;
        self.account(account_id).await?;

        let engine = SyncEngine::new(client, self.config.remote.sync_options());
        let batch = engine.perform_initial_sync(cancel).await?;
        self.commit(account_id, batch).await
    }

    /// [`Core::sync_account`] against a given client.
    #[instrument(skip(self, client, cancel))]
    pub async fn sync_account_with<C: RemoteMailClient>(
        &self,
        account_id: &str,
        client: C,
        cancel: &CancellationToken,
    ) -> Result<SyncSummary, SyncError> {
        let lock = self.account_lock(account_id).await;
        let _guard = lock.lock().await;
        let account = self.account(account_id).await?;

        let engine = SyncEngine::new(client, self.config.remote.sync_options());
        let batch = engine
            .sync_emails(account.next_delta_token.as_deref(), cancel)
            .await?;
        self.commit(account_id, batch).await
    }

    /// Ingest the batch, then record its cursor. A failed ingest leaves the
    /// previous cursor in place so the next run fetches the batch again.
    async fn commit(&self, account_id: &str, batch: SyncBatch) -> Result<SyncSummary, SyncError> {
        let index = self.index(account_id).await?;
        let ingested = ingest::ingest(&self.store, &index, account_id, &batch.records).await?;
        self.store
            .set_delta_token(account_id, &batch.cursor)
            .await
            .map_err(SyncError::Persistence)?;
        info!(
            "synced {} messages for {}, cursor advanced",
            batch.records.len(),
            account_id
        );
        Ok(SyncSummary {
            account_id: account_id.to_string(),
            messages: batch.records.len(),
            pages: batch.pages,
            indexed: ingested.indexed,
            cursor: batch.cursor,
        })
    }

    /// Hybrid search over the account's mail.
    pub async fn search(
        &self,
        account_id: &str,
        prompt: &str,
        num_results: Option<usize>,
    ) -> Result<SearchResults, IndexError> {
        self.index(account_id).await?.vector_search(prompt, num_results).await
    }

    /// Lexical-only search over the account's mail.
    pub async fn text_search(
        &self,
        account_id: &str,
        term: &str,
        limit: Option<usize>,
    ) -> Result<SearchResults, IndexError> {
        self.index(account_id).await?.text_search(term, limit).await
    }

    /// Run incremental syncs for every account that has completed an initial
    /// sync, until `cancel` fires.
    pub async fn run_scheduler(&self, cancel: &CancellationToken) -> Result<()> {
        let mut scheduler = SyncScheduler::with_config(self.config.scheduler.clone());
        if !scheduler.is_enabled() {
            info!("scheduler disabled");
            return Ok(());
        }
        let mut ticker = tokio::time::interval(scheduler.config().interval().min(MAX_TICK));

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let accounts = match self.store.list_accounts().await {
                Ok(accounts) => accounts,
                Err(err) => {
                    warn!("failed to list accounts: {:#}", err);
                    continue;
                }
            };
            scheduler.schedule_due(
                accounts
                    .iter()
                    .filter(|a| a.next_delta_token.is_some())
                    .map(|a| a.id.as_str()),
            );

            while let Some(job) = scheduler.next_sync() {
                match self.sync_account(&job.account_id, cancel).await {
                    Ok(summary) => scheduler.complete_sync(&job.account_id, summary.messages),
                    Err(SyncError::Cancelled) => return Ok(()),
                    Err(err) => {
                        warn!("sync of {} failed: {}", job.account_id, err);
                        scheduler.fail_sync(&job.account_id, err.is_retryable());
                    }
                }
            }
        }
        info!("scheduler stopped");
        Ok(())
    }
}
