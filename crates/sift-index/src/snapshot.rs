//! Whole-index snapshots.
//!
//! A snapshot is a versioned JSON document holding the index settings, the
//! embedder identity and every document in insertion order. Restoring rebuilds the lexical
//! postings from the documents.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::document::SearchDocument;
use crate::error::IndexError;
use crate::index::MailIndex;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    dimensions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    embedder: Option<&'a str>,
    documents: Vec<&'a SearchDocument>,
}

#[derive(Debug, Deserialize)]
struct SnapshotOwned {
    version: u32,
    dimensions: usize,
    #[serde(default)]
    embedder: Option<String>,
    documents: Vec<SearchDocument>,
}

/// Serialize the full index.
pub fn persist(index: &MailIndex) -> Result<Vec<u8>, IndexError> {
    encode(index, index.documents().collect())
}

/// Serialize the index as it will look once `incoming` is inserted.
pub fn persist_with(index: &MailIndex, incoming: &[SearchDocument]) -> Result<Vec<u8>, IndexError> {
    encode(index, index.merged_with(incoming))
}

fn encode<'a>(index: &'a MailIndex, documents: Vec<&'a SearchDocument>) -> Result<Vec<u8>, IndexError> {
    let snapshot = SnapshotRef {
        version: SNAPSHOT_VERSION,
        dimensions: index.dimensions(),
        embedder: index.embedder(),
        documents,
    };
    Ok(serde_json::to_vec(&snapshot)?)
}

/// Rebuild an index from a snapshot produced by [`persist`].
pub fn restore(bytes: &[u8]) -> Result<MailIndex, IndexError> {
    let snapshot: SnapshotOwned = serde_json::from_slice(bytes)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(IndexError::SnapshotVersion(snapshot.version));
    }
    let mut index = MailIndex::new(snapshot.dimensions);
    if let Some(identity) = snapshot.embedder {
        index = index.with_embedder(identity);
    }
    index.insert_many(snapshot.documents)?;
    Ok(index)
}

/// Where snapshot blobs live, keyed by account.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load_snapshot(&self, account_id: &str) -> anyhow::Result<Option<Vec<u8>>>;

    async fn save_snapshot(&self, account_id: &str, snapshot: &[u8]) -> anyhow::Result<()>;
}

/// Process-local snapshot store.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account_id: &str) -> Option<Vec<u8>> {
        self.snapshots
            .lock()
            .ok()
            .and_then(|map| map.get(account_id).cloned())
    }

    pub fn contains(&self, account_id: &str) -> bool {
        self.get(account_id).is_some()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load_snapshot(&self, account_id: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.get(account_id))
    }

    async fn save_snapshot(&self, account_id: &str, snapshot: &[u8]) -> anyhow::Result<()> {
        let mut map = self
            .snapshots
            .lock()
            .map_err(|_| anyhow::anyhow!("snapshot map lock poisoned"))?;
        map.insert(account_id.to_string(), snapshot.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn doc(id: &str, embedding: Vec<f32>) -> SearchDocument {
        SearchDocument {
            id: id.to_string(),
            title: format!("subject {id}"),
            body: "hello world".to_string(),
            raw_body: "hello".to_string(),
            from: "alice@example.com".to_string(),
            to: vec!["bob@example.com".to_string(), "carol@example.com".to_string()],
            sent_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            embeddings: embedding,
            thread_id: "t1".to_string(),
        }
    }

    #[test]
    fn test_round_trip_preserves_documents() {
        let mut index = MailIndex::new(3);
        index
            .insert_many(vec![
                doc("m1", vec![0.1, -0.25, 0.333_333_34]),
                doc("m2", vec![1.0e-7, 0.5, 12_345.678]),
            ])
            .unwrap();

        let restored = restore(&persist(&index).unwrap()).unwrap();
        assert_eq!(restored.len(), index.len());
        assert_eq!(restored.dimensions(), 3);
        let before: Vec<&SearchDocument> = index.documents().collect();
        let after: Vec<&SearchDocument> = restored.documents().collect();
        assert_eq!(before, after);
        assert_eq!(restored.text_search("hello", 10).count, 2);
    }

    #[test]
    fn test_empty_index_round_trip() {
        let restored = restore(&persist(&MailIndex::new(1536)).unwrap()).unwrap();
        assert!(restored.is_empty());
        assert_eq!(restored.dimensions(), 1536);
    }

    #[test]
    fn test_persist_with_includes_pending_documents() {
        let mut index = MailIndex::new(3);
        index.insert(doc("m1", vec![1.0, 0.0, 0.0])).unwrap();
        let bytes = persist_with(&index, &[doc("m2", vec![0.0, 1.0, 0.0])]).unwrap();
        assert_eq!(index.len(), 1);
        let restored = restore(&bytes).unwrap();
        assert_eq!(restored.len(), 2);
        assert!(restored.contains("m2"));
    }

    #[test]
    fn test_embedder_identity_round_trips() {
        let index = MailIndex::new(3).with_embedder("hash/3");
        let restored = restore(&persist(&index).unwrap()).unwrap();
        assert_eq!(restored.embedder(), Some("hash/3"));

        let legacy = restore(br#"{"version":1,"dimensions":3,"documents":[]}"#).unwrap();
        assert_eq!(legacy.embedder(), None);
    }

    #[test]
    fn test_restore_rejects_unknown_version() {
        let bytes = br#"{"version":99,"dimensions":3,"documents":[]}"#;
        assert!(matches!(restore(bytes), Err(IndexError::SnapshotVersion(99))));
        assert!(matches!(restore(b"not json"), Err(IndexError::Snapshot(_))));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySnapshotStore::new();
        assert!(store.load_snapshot("acc").await.unwrap().is_none());
        store.save_snapshot("acc", b"blob").await.unwrap();
        assert_eq!(store.load_snapshot("acc").await.unwrap().unwrap(), b"blob");
        assert!(store.contains("acc"));
    }
}
