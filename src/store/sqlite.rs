//! SQLite-backed [`DocumentStore`].
//!
//! The connection pool is created lazily on first use and then shared by
//! every request for the life of the process. Vectors are stored as
//! little-endian `f32` BLOBs and searched by brute-force cosine distance.
//!
//! The `documents` table is only created by the first insert (or by an
//! explicit [`SqliteDocumentStore::create_table`]), so "nothing has been
//! embedded yet" is observable through [`DocumentStore::has_table`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::OnceCell;

use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::models::DocumentRecord;

use super::{check_dimensions, DocumentStore, ScoredRecord};

pub struct SqliteDocumentStore {
    path: PathBuf,
    pool: OnceCell<SqlitePool>,
}

async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open vector store at {}", db_path.display()))?;

    tracing::debug!(path = %db_path.display(), "vector store connected");
    Ok(pool)
}

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        file_id INTEGER NOT NULL,
        row_index INTEGER NOT NULL,
        text TEXT NOT NULL,
        vector BLOB NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        UNIQUE(file_id, row_index)
    )
"#;

impl SqliteDocumentStore {
    /// Create a handle. No connection is opened until the first operation.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool: OnceCell::new(),
        }
    }

    async fn pool(&self) -> Result<&SqlitePool> {
        self.pool.get_or_try_init(|| connect(&self.path)).await
    }

    /// Create the `documents` table and its index if missing.
    pub async fn create_table(&self) -> Result<()> {
        let pool = self.pool().await?;
        sqlx::query(CREATE_TABLE).execute(pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_file_id ON documents(file_id)")
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }

    async fn table_dims(&self, tx: &mut Transaction<'_, Sqlite>) -> Result<Option<usize>> {
        let len: Option<i64> = sqlx::query_scalar("SELECT length(vector) FROM documents LIMIT 1")
            .fetch_optional(&mut **tx)
            .await?;
        Ok(len.map(|bytes| bytes as usize / 4))
    }
}

async fn write_records(
    tx: &mut Transaction<'_, Sqlite>,
    records: &[DocumentRecord],
) -> Result<()> {
    for record in records {
        let metadata_json = serde_json::to_string(&record.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO documents (id, file_id, row_index, text, vector, metadata)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                vector = excluded.vector,
                metadata = excluded.metadata
            "#,
        )
        .bind(&record.id)
        .bind(record.file_id)
        .bind(record.row_index)
        .bind(&record.text)
        .bind(vec_to_blob(&record.vector))
        .bind(metadata_json)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn row_to_record(row: &SqliteRow) -> Result<DocumentRecord> {
    let blob: Vec<u8> = row.get("vector");
    let metadata_json: String = row.get("metadata");
    let id: String = row.get("id");
    let metadata = serde_json::from_str(&metadata_json)
        .with_context(|| format!("Invalid metadata JSON for record {}", id))?;

    Ok(DocumentRecord {
        id,
        file_id: row.get("file_id"),
        row_index: row.get("row_index"),
        text: row.get("text"),
        vector: blob_to_vec(&blob),
        metadata,
    })
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn has_table(&self) -> Result<bool> {
        let pool = self.pool().await?;
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='documents'",
        )
        .fetch_one(pool)
        .await?;
        Ok(exists)
    }

    async fn insert(&self, records: &[DocumentRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.create_table().await?;

        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        let dims = self.table_dims(&mut tx).await?;
        check_dimensions(records, dims)?;
        write_records(&mut tx, records).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn replace_file(&self, file_id: i64, records: &[DocumentRecord]) -> Result<u64> {
        if records.is_empty() && !self.has_table().await? {
            return Ok(0);
        }
        self.create_table().await?;

        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        let removed = sqlx::query("DELETE FROM documents WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let dims = self.table_dims(&mut tx).await?;
        check_dimensions(records, dims)?;
        write_records(&mut tx, records).await?;

        // Dropping `tx` on any error above rolls the delete back.
        tx.commit().await?;
        Ok(removed)
    }

    async fn delete_by_file(&self, file_id: i64) -> Result<u64> {
        if !self.has_table().await? {
            return Ok(0);
        }
        let pool = self.pool().await?;
        let result = sqlx::query("DELETE FROM documents WHERE file_id = ?")
            .bind(file_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_rows(&self) -> Result<u64> {
        if !self.has_table().await? {
            return Ok(0);
        }
        let pool = self.pool().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(pool)
            .await?;
        Ok(count as u64)
    }

    async fn vector_query(
        &self,
        query_vec: &[f32],
        limit: usize,
        file_id: Option<i64>,
    ) -> Result<Vec<ScoredRecord>> {
        if !self.has_table().await? {
            return Ok(Vec::new());
        }
        let pool = self.pool().await?;

        let rows = match file_id {
            Some(id) => {
                sqlx::query("SELECT * FROM documents WHERE file_id = ? ORDER BY rowid")
                    .bind(id)
                    .fetch_all(pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM documents ORDER BY rowid")
                    .fetch_all(pool)
                    .await?
            }
        };

        let mut scored = rows
            .iter()
            .map(|row| {
                let record = row_to_record(row)?;
                Ok(ScoredRecord {
                    distance: cosine_distance(query_vec, &record.vector),
                    record,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn scan(&self, limit: usize, file_id: Option<i64>) -> Result<Vec<DocumentRecord>> {
        if !self.has_table().await? {
            return Ok(Vec::new());
        }
        let pool = self.pool().await?;

        let rows = match file_id {
            Some(id) => {
                sqlx::query("SELECT * FROM documents WHERE file_id = ? ORDER BY rowid LIMIT ?")
                    .bind(id)
                    .bind(limit as i64)
                    .fetch_all(pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM documents ORDER BY rowid LIMIT ?")
                    .bind(limit as i64)
                    .fetch_all(pool)
                    .await?
            }
        };

        rows.iter().map(row_to_record).collect()
    }
}
