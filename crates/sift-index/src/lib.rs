//! Hybrid lexical and vector search over one account's synced mail.

mod document;
mod error;
mod handle;
mod index;
pub mod snapshot;

pub use document::{html_to_text, SearchDocument};
pub use error::IndexError;
pub use handle::{IndexHandle, IndexRegistry, SearchSettings, DEFAULT_LIMIT, DEFAULT_SIMILARITY};
pub use index::{MailIndex, SearchHit, SearchResults, TEXT_WEIGHT, VECTOR_WEIGHT};
pub use snapshot::{MemorySnapshotStore, SnapshotStore};
