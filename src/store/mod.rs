//! Document store abstraction.
//!
//! The [`DocumentStore`] trait is the single long-lived handle the pipeline
//! shares across requests. It is created once (see [`SqliteDocumentStore`],
//! which connects lazily on first use) and passed explicitly to every
//! component that needs it, so tests can substitute [`InMemoryDocumentStore`].
//!
//! Records are keyed by `(file_id, row_index)`. A file's records are always
//! replaced as a whole through [`DocumentStore::replace_file`].

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::DocumentRecord;

pub use memory::InMemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;

/// A record returned from a vector query with its cosine distance.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: DocumentRecord,
    /// Lower is closer.
    pub distance: f64,
}

/// Abstract vector table backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`has_table`](DocumentStore::has_table) | Whether anything was ever indexed |
/// | [`insert`](DocumentStore::insert) | Append records, creating the table if needed |
/// | [`delete_by_file`](DocumentStore::delete_by_file) | Remove every record of one upload |
/// | [`replace_file`](DocumentStore::replace_file) | Swap one upload's records in a single step |
/// | [`count_rows`](DocumentStore::count_rows) | Total record count |
/// | [`vector_query`](DocumentStore::vector_query) | Nearest neighbours by cosine distance |
/// | [`scan`](DocumentStore::scan) | Bounded scan in insertion order |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn has_table(&self) -> Result<bool>;

    /// Insert records. Fails if any vector's dimension differs from the
    /// dimension already present in the table.
    async fn insert(&self, records: &[DocumentRecord]) -> Result<()>;

    /// Delete all records of `file_id`, returning how many were removed.
    /// Returns `0` when no table exists.
    async fn delete_by_file(&self, file_id: i64) -> Result<u64>;

    /// Delete the records of `file_id` and insert `records` as one atomic
    /// step: on failure the file keeps its previous records. Returns how many
    /// records were removed.
    async fn replace_file(&self, file_id: i64, records: &[DocumentRecord]) -> Result<u64>;

    async fn count_rows(&self) -> Result<u64>;

    /// Up to `limit` records ordered by ascending cosine distance to
    /// `query_vec`, optionally restricted to one file.
    async fn vector_query(
        &self,
        query_vec: &[f32],
        limit: usize,
        file_id: Option<i64>,
    ) -> Result<Vec<ScoredRecord>>;

    /// Up to `limit` records in insertion order, optionally restricted to
    /// one file.
    async fn scan(&self, limit: usize, file_id: Option<i64>) -> Result<Vec<DocumentRecord>>;
}

/// Check that every record has the same dimension as `expected` (or as the
/// first record when the table is empty).
pub(crate) fn check_dimensions(records: &[DocumentRecord], expected: Option<usize>) -> Result<()> {
    let expected = match expected.or_else(|| records.first().map(|r| r.vector.len())) {
        Some(d) => d,
        None => return Ok(()),
    };
    if let Some(bad) = records.iter().find(|r| r.vector.len() != expected) {
        return Err(crate::error::RagError::Store(format!(
            "vector dimension mismatch for {}: expected {}, got {}",
            bad.id,
            expected,
            bad.vector.len()
        ))
        .into());
    }
    Ok(())
}
