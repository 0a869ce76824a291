//! In-memory [`DocumentStore`] for tests and embedding in other programs.
//!
//! Records live in a `Vec` behind `std::sync::RwLock`. `None` means the table
//! has never been created. Vector search is brute-force cosine distance.

use std::collections::HashSet;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::models::DocumentRecord;

use super::{check_dimensions, DocumentStore, ScoredRecord};

#[derive(Default)]
pub struct InMemoryDocumentStore {
    records: RwLock<Option<Vec<DocumentRecord>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_file(record: &DocumentRecord, file_id: Option<i64>) -> bool {
    file_id.map_or(true, |id| record.file_id == id)
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn has_table(&self) -> Result<bool> {
        Ok(self.records.read().unwrap().is_some())
    }

    async fn insert(&self, records: &[DocumentRecord]) -> Result<()> {
        let mut guard = self.records.write().unwrap();
        let existing_dims = guard
            .as_ref()
            .and_then(|rows| rows.first())
            .map(|r| r.vector.len());
        check_dimensions(records, existing_dims)?;

        let table = guard.get_or_insert_with(Vec::new);
        let incoming: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        table.retain(|r| !incoming.contains(r.id.as_str()));
        table.extend(records.iter().cloned());
        Ok(())
    }

    async fn replace_file(&self, file_id: i64, records: &[DocumentRecord]) -> Result<u64> {
        let mut guard = self.records.write().unwrap();
        let remaining_dims = guard
            .as_ref()
            .and_then(|rows| rows.iter().find(|r| r.file_id != file_id))
            .map(|r| r.vector.len());
        check_dimensions(records, remaining_dims)?;

        if records.is_empty() && guard.is_none() {
            return Ok(0);
        }
        let table = guard.get_or_insert_with(Vec::new);
        let before = table.len();
        table.retain(|r| r.file_id != file_id);
        let removed = (before - table.len()) as u64;
        table.extend(records.iter().cloned());
        Ok(removed)
    }

    async fn delete_by_file(&self, file_id: i64) -> Result<u64> {
        let mut guard = self.records.write().unwrap();
        let Some(table) = guard.as_mut() else {
            return Ok(0);
        };
        let before = table.len();
        table.retain(|r| r.file_id != file_id);
        Ok((before - table.len()) as u64)
    }

    async fn count_rows(&self) -> Result<u64> {
        let guard = self.records.read().unwrap();
        Ok(guard.as_ref().map_or(0, |t| t.len() as u64))
    }

    async fn vector_query(
        &self,
        query_vec: &[f32],
        limit: usize,
        file_id: Option<i64>,
    ) -> Result<Vec<ScoredRecord>> {
        let guard = self.records.read().unwrap();
        let Some(table) = guard.as_ref() else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<ScoredRecord> = table
            .iter()
            .filter(|r| matches_file(r, file_id))
            .map(|r| ScoredRecord {
                distance: cosine_distance(query_vec, &r.vector),
                record: r.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn scan(&self, limit: usize, file_id: Option<i64>) -> Result<Vec<DocumentRecord>> {
        let guard = self.records.read().unwrap();
        Ok(guard
            .as_ref()
            .map(|table| {
                table
                    .iter()
                    .filter(|r| matches_file(r, file_id))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn record(file_id: i64, row_index: i64, vector: Vec<f32>) -> DocumentRecord {
        DocumentRecord {
            id: DocumentRecord::record_id(file_id, row_index),
            file_id,
            row_index,
            text: format!("row {}", row_index),
            vector,
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn test_no_table_until_first_insert() {
        let store = InMemoryDocumentStore::new();
        assert!(!store.has_table().await.unwrap());
        assert_eq!(store.delete_by_file(1).await.unwrap(), 0);
        assert!(store.scan(10, None).await.unwrap().is_empty());

        store.insert(&[record(1, 0, vec![1.0, 0.0])]).await.unwrap();
        assert!(store.has_table().await.unwrap());
        assert_eq!(store.count_rows().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_vector_query_orders_by_distance_and_filters() {
        let store = InMemoryDocumentStore::new();
        store
            .insert(&[
                record(1, 0, vec![0.0, 1.0]),
                record(1, 1, vec![1.0, 0.1]),
                record(2, 0, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.vector_query(&[1.0, 0.0], 10, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.record.id.as_str()).collect();
        assert_eq!(ids, vec!["2_0", "1_1", "1_0"]);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));

        let filtered = store.vector_query(&[1.0, 0.0], 10, Some(1)).await.unwrap();
        assert!(filtered.iter().all(|h| h.record.file_id == 1));
        assert_eq!(filtered.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_by_file_counts_removed() {
        let store = InMemoryDocumentStore::new();
        store
            .insert(&[
                record(1, 0, vec![1.0]),
                record(1, 1, vec![1.0]),
                record(2, 0, vec![1.0]),
            ])
            .await
            .unwrap();
        assert_eq!(store.delete_by_file(1).await.unwrap(), 2);
        assert_eq!(store.count_rows().await.unwrap(), 1);
        assert!(store.scan(10, Some(1)).await.unwrap().is_empty());
        assert!(store.vector_query(&[1.0], 10, Some(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_dimension_mismatch() {
        let store = InMemoryDocumentStore::new();
        store.insert(&[record(1, 0, vec![1.0, 0.0])]).await.unwrap();
        assert!(store.insert(&[record(2, 0, vec![1.0])]).await.is_err());
        assert!(store
            .insert(&[record(3, 0, vec![1.0, 0.0]), record(3, 1, vec![1.0])])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_insert_upserts_by_id() {
        let store = InMemoryDocumentStore::new();
        store
            .insert(&[record(1, 0, vec![1.0]), record(1, 1, vec![1.0])])
            .await
            .unwrap();
        let mut changed = record(1, 1, vec![2.0]);
        changed.text = "changed".into();
        store.insert(&[changed, record(1, 2, vec![1.0])]).await.unwrap();

        let rows = store.scan(10, None).await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1_0", "1_1", "1_2"]);
        assert_eq!(rows[1].text, "changed");
    }

    #[tokio::test]
    async fn test_failed_replace_keeps_previous_records() {
        let store = InMemoryDocumentStore::new();
        store
            .insert(&[
                record(1, 0, vec![1.0, 0.0]),
                record(1, 1, vec![1.0, 0.0]),
                record(2, 0, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        assert!(store.replace_file(1, &[record(1, 0, vec![1.0])]).await.is_err());
        assert_eq!(store.scan(10, Some(1)).await.unwrap().len(), 2);

        let removed = store
            .replace_file(1, &[record(1, 0, vec![0.5, 0.5])])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count_rows().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_scan_respects_limit() {
        let store = InMemoryDocumentStore::new();
        let rows: Vec<DocumentRecord> = (0..5).map(|i| record(1, i, vec![1.0])).collect();
        store.insert(&rows).await.unwrap();
        let scanned = store.scan(3, None).await.unwrap();
        assert_eq!(scanned.len(), 3);
        assert_eq!(scanned[0].id, "1_0");
    }
}
