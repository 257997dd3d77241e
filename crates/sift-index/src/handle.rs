//! Per-account index ownership.
//!
//! Each account's index is owned by one writer task. Inserts are queued to
//! that task, which writes the snapshot first and only then publishes the
//! documents to the live index. Queries take a read lock on the live index
//! and never wait behind a snapshot write.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sift_remote::EmailMessage;
use sift_vector::Embedder;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::document::SearchDocument;
use crate::error::IndexError;
use crate::index::{MailIndex, SearchResults};
use crate::snapshot::{self, SnapshotStore};

pub const DEFAULT_SIMILARITY: f32 = 0.80;
pub const DEFAULT_LIMIT: usize = 10;

const COMMAND_QUEUE: usize = 64;

/// Query tuning shared by every account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Minimum cosine similarity for a hybrid hit.
    pub similarity: f32,
    pub default_limit: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            similarity: DEFAULT_SIMILARITY,
            default_limit: DEFAULT_LIMIT,
        }
    }
}

enum Command {
    Insert {
        documents: Vec<SearchDocument>,
        reply: oneshot::Sender<Result<usize, IndexError>>,
    },
}

#[derive(Clone)]
pub struct IndexHandle {
    account_id: Arc<str>,
    index: Arc<RwLock<MailIndex>>,
    commands: mpsc::Sender<Command>,
    embedder: Arc<dyn Embedder>,
    settings: SearchSettings,
}

impl IndexHandle {
    /// Restore the account's snapshot, or create and persist an empty index.
    ///
    /// Callers that may race on the same account go through [`IndexRegistry`].
    #[instrument(skip(store, embedder, settings))]
    pub async fn open(
        account_id: &str,
        store: Arc<dyn SnapshotStore>,
        embedder: Arc<dyn Embedder>,
        settings: SearchSettings,
    ) -> Result<Self, IndexError> {
        let existing = store
            .load_snapshot(account_id)
            .await
            .map_err(IndexError::Storage)?;

        let identity = embedder.identity();
        let index = match existing {
            Some(bytes) => {
                let index = snapshot::restore(&bytes)?;
                check_embedder(&index, &identity, embedder.dimensions())?;
                info!("restored index for {} ({} documents)", account_id, index.len());
                // Snapshots written before identities were recorded adopt the current one.
                match index.embedder() {
                    Some(_) => index,
                    None => index.with_embedder(identity),
                }
            }
            None => {
                let index = MailIndex::new(embedder.dimensions()).with_embedder(identity);
                let bytes = snapshot::persist(&index)?;
                store
                    .save_snapshot(account_id, &bytes)
                    .await
                    .map_err(IndexError::Storage)?;
                info!("created empty index for {}", account_id);
                index
            }
        };

        let account_id: Arc<str> = Arc::from(account_id);
        let index = Arc::new(RwLock::new(index));
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        tokio::spawn(run_writer(account_id.clone(), index.clone(), store, rx));

        Ok(Self {
            account_id,
            index,
            commands: tx,
            embedder,
            settings,
        })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.read().await.is_empty()
    }

    pub async fn get(&self, id: &str) -> Option<SearchDocument> {
        self.index.read().await.get(id).cloned()
    }

    /// Insert one document. Returns once the snapshot containing it is durable.
    pub async fn insert(&self, document: SearchDocument) -> Result<(), IndexError> {
        self.insert_many(vec![document]).await.map(|_| ())
    }

    /// Insert a batch with a single snapshot write. All or nothing.
    pub async fn insert_many(&self, documents: Vec<SearchDocument>) -> Result<usize, IndexError> {
        if documents.is_empty() {
            return Ok(0);
        }
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Insert { documents, reply })
            .await
            .map_err(|_| IndexError::WriterClosed(self.account_id.to_string()))?;
        rx.await
            .map_err(|_| IndexError::WriterClosed(self.account_id.to_string()))?
    }

    /// Embed every message, then insert them as one batch.
    #[instrument(skip_all, fields(account = %self.account_id, messages = messages.len()))]
    pub async fn index_messages(&self, messages: &[EmailMessage]) -> Result<usize, IndexError> {
        let mut documents = Vec::with_capacity(messages.len());
        for message in messages {
            documents.push(self.embed_message(message).await?);
        }
        self.insert_many(documents).await
    }

    async fn embed_message(&self, message: &EmailMessage) -> Result<SearchDocument, IndexError> {
        let document = SearchDocument::from_message(message);
        let embeddings = self
            .embedder
            .embed(&document.embedding_text())
            .await
            .map_err(IndexError::Embedding)?;
        Ok(document.with_embeddings(embeddings))
    }

    /// Hybrid lexical + vector query. Hits below the similarity floor are never returned.
    #[instrument(skip(self), fields(account = %self.account_id))]
    pub async fn vector_search(
        &self,
        prompt: &str,
        num_results: Option<usize>,
    ) -> Result<SearchResults, IndexError> {
        let embedding = self
            .embedder
            .embed(prompt)
            .await
            .map_err(IndexError::Embedding)?;
        let limit = num_results.unwrap_or(self.settings.default_limit);
        let index = self.index.read().await;
        Ok(index.hybrid_search(prompt, &embedding, self.settings.similarity, limit))
    }

    /// Lexical-only query.
    #[instrument(skip(self), fields(account = %self.account_id))]
    pub async fn text_search(&self, term: &str, limit: Option<usize>) -> Result<SearchResults, IndexError> {
        let limit = limit.unwrap_or(self.settings.default_limit);
        Ok(self.index.read().await.text_search(term, limit))
    }
}

/// Vectors from another embedder would make every similarity score meaningless.
fn check_embedder(index: &MailIndex, identity: &str, dimensions: usize) -> Result<(), IndexError> {
    let stored = match index.embedder() {
        Some(stored) => stored.to_string(),
        None if index.dimensions() == dimensions => return Ok(()),
        None => format!("unknown/{}", index.dimensions()),
    };
    if stored != identity {
        return Err(IndexError::EmbedderMismatch {
            stored,
            configured: identity.to_string(),
        });
    }
    Ok(())
}

async fn run_writer(
    account_id: Arc<str>,
    index: Arc<RwLock<MailIndex>>,
    store: Arc<dyn SnapshotStore>,
    mut commands: mpsc::Receiver<Command>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Insert { documents, reply } => {
                let result = apply_insert(&account_id, &index, store.as_ref(), documents).await;
                if let Err(err) = &result {
                    warn!("insert into {} failed: {}", account_id, err);
                }
                let _ = reply.send(result);
            }
        }
    }
    debug!("index writer for {} stopped", account_id);
}

async fn apply_insert(
    account_id: &str,
    index: &RwLock<MailIndex>,
    store: &dyn SnapshotStore,
    documents: Vec<SearchDocument>,
) -> Result<usize, IndexError> {
    // This task is the only writer, so the state read here is still current
    // when the write lock is taken below.
    let bytes = {
        let live = index.read().await;
        for document in &documents {
            live.validate(document)?;
        }
        snapshot::persist_with(&live, &documents)?
    };
    store
        .save_snapshot(account_id, &bytes)
        .await
        .map_err(IndexError::Storage)?;

    let count = documents.len();
    index.write().await.insert_many(documents)?;
    debug!("indexed {} documents for {}", count, account_id);
    Ok(count)
}

/// Hands out one [`IndexHandle`] per account. Opening is serialized so two
/// callers never both create and persist an empty index for the same account.
pub struct IndexRegistry {
    store: Arc<dyn SnapshotStore>,
    embedder: Arc<dyn Embedder>,
    settings: SearchSettings,
    handles: Mutex<HashMap<String, IndexHandle>>,
}

impl IndexRegistry {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        embedder: Arc<dyn Embedder>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            settings,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub async fn open(&self, account_id: &str) -> Result<IndexHandle, IndexError> {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(account_id) {
            return Ok(handle.clone());
        }
        let handle = IndexHandle::open(
            account_id,
            self.store.clone(),
            self.embedder.clone(),
            self.settings.clone(),
        )
        .await?;
        handles.insert(account_id.to_string(), handle.clone());
        Ok(handle)
    }
}
