//! Bulk embedding of uploaded tables and deletion by file.
//!
//! The upload subsystem hands over a [`TabularUpload`]; this module decides
//! which columns are text and which are numeric, builds one embedding text
//! per row from the text columns, embeds the texts in batches, and replaces
//! the file's records in the [`DocumentStore`] (delete, then insert).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::embedding::EmbeddingProvider;
use crate::error::{error_code, find_rag_error, RagError};
use crate::models::{DocumentRecord, Metadata, MetadataValue, Row};
use crate::store::DocumentStore;

/// Values sampled per column when classifying.
const CLASSIFY_SAMPLE: usize = 100;
/// Share of numeric sample values above which a column counts as numeric.
const NUMERIC_RATIO: f64 = 0.8;

/// A parsed upload as supplied by the upload subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabularUpload {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    pub file_id: i64,
    pub original_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnClassification {
    pub text_columns: Vec<String>,
    pub number_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedded_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EmbedResult {
    fn failure(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            embedded_count: None,
            text_columns: None,
            number_columns: None,
            error: Some(error.into()),
        }
    }

    /// Convert a failed embed into the public envelope.
    pub fn from_error(err: &anyhow::Error) -> Self {
        match find_rag_error(err) {
            Some(RagError::NoTextColumns {
                text_columns,
                number_columns,
            }) => Self {
                text_columns: Some(text_columns.clone()),
                number_columns: Some(number_columns.clone()),
                ..Self::failure(err.to_string(), "NO_TEXT_COLUMNS")
            },
            Some(rag @ (RagError::NoData | RagError::FileNotFound(_))) => {
                Self::failure(rag.to_string(), rag.code())
            }
            _ => Self::failure("Gagal melakukan embedding", format!("{:#}", err)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_count: Option<u64>,
}

/// Read an upload record from a JSON file.
pub fn load_upload(path: &Path) -> Result<TabularUpload> {
    if !path.exists() {
        return Err(RagError::FileNotFound(path.display().to_string()).into());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read upload: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse upload: {}", path.display()))
}

/// Whether a column is numeric, judged from its first non-empty sample values.
pub fn is_numeric_column<'a>(values: impl Iterator<Item = Option<&'a MetadataValue>>) -> bool {
    let sample: Vec<&MetadataValue> = values
        .take(CLASSIFY_SAMPLE)
        .flatten()
        .filter(|v| !v.is_blank())
        .collect();

    if sample.is_empty() {
        return false;
    }

    let numeric = sample.iter().filter(|v| v.looks_numeric()).count();
    numeric as f64 / sample.len() as f64 > NUMERIC_RATIO
}

pub fn classify_columns(headers: &[String], rows: &[Row]) -> ColumnClassification {
    let mut classification = ColumnClassification::default();
    for header in headers {
        if is_numeric_column(rows.iter().map(|row| row.get(header))) {
            classification.number_columns.push(header.clone());
        } else {
            classification.text_columns.push(header.clone());
        }
    }
    classification
}

/// `"col: value"` for every non-empty text column, joined by `". "`.
pub fn embedding_text(row: &Row, text_columns: &[String]) -> String {
    text_columns
        .iter()
        .filter_map(|col| {
            row.get(col)
                .filter(|v| !v.is_blank())
                .map(|v| format!("{}: {}", col, v))
        })
        .collect::<Vec<_>>()
        .join(". ")
}

fn record_metadata(upload: &TabularUpload, row_index: usize, row: &Row) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("file_id", upload.file_id);
    metadata.insert("file_name", upload.original_name.as_str());
    metadata.insert("row_index", row_index as i64);
    for header in &upload.headers {
        let value = row.get(header).cloned().unwrap_or(MetadataValue::Null);
        metadata.insert(header.as_str(), value);
    }
    metadata
}

/// Embed every row of `upload` and replace the file's records.
///
/// Returns the column classification on success. Typed failures:
/// [`RagError::NoData`] and [`RagError::NoTextColumns`].
pub async fn embed_rows(
    store: &dyn DocumentStore,
    embedder: &dyn EmbeddingProvider,
    upload: &TabularUpload,
    batch_size: usize,
) -> Result<(usize, ColumnClassification)> {
    if upload.rows.is_empty() {
        return Err(RagError::NoData.into());
    }

    let classification = classify_columns(&upload.headers, &upload.rows);
    if classification.text_columns.is_empty() {
        return Err(RagError::NoTextColumns {
            text_columns: Vec::new(),
            number_columns: classification.number_columns,
        }
        .into());
    }

    info!(
        file = %upload.original_name,
        text_columns = ?classification.text_columns,
        number_columns = ?classification.number_columns,
        "classified columns"
    );

    let texts: Vec<String> = upload
        .rows
        .iter()
        .map(|row| embedding_text(row, &classification.text_columns))
        .collect();

    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let embedded = embedder
            .embed_batch(batch)
            .await
            .context("Failed to embed rows")?;
        if embedded.len() != batch.len() {
            anyhow::bail!(
                "embedding provider returned {} vectors for {} texts",
                embedded.len(),
                batch.len()
            );
        }
        if let Some(bad) = embedded.iter().find(|v| v.len() != embedder.dims()) {
            anyhow::bail!(
                "{} returned a {}-dimensional vector, expected {}",
                embedder.model_name(),
                bad.len(),
                embedder.dims()
            );
        }
        vectors.extend(embedded);
    }
    info!(count = vectors.len(), model = embedder.model_name(), "generated embeddings");

    let records: Vec<DocumentRecord> = upload
        .rows
        .iter()
        .zip(texts)
        .zip(vectors)
        .enumerate()
        .map(|(index, ((row, text), vector))| DocumentRecord {
            id: DocumentRecord::record_id(upload.file_id, index as i64),
            file_id: upload.file_id,
            row_index: index as i64,
            text,
            vector,
            metadata: record_metadata(upload, index, row),
        })
        .collect();

    let replaced = store.replace_file(upload.file_id, &records).await?;
    if replaced > 0 {
        info!(file_id = upload.file_id, replaced, "replaced previous records");
    }

    Ok((records.len(), classification))
}

/// Envelope-returning wrapper around [`embed_rows`]. Never fails.
pub async fn embed_upload(
    store: &dyn DocumentStore,
    embedder: &dyn EmbeddingProvider,
    upload: &TabularUpload,
    batch_size: usize,
) -> EmbedResult {
    match embed_rows(store, embedder, upload, batch_size).await {
        Ok((count, classification)) => EmbedResult {
            success: true,
            message: format!("Berhasil embed {} baris data", count),
            embedded_count: Some(count),
            text_columns: Some(classification.text_columns),
            number_columns: Some(classification.number_columns),
            error: None,
        },
        Err(e) => {
            warn!(file_id = upload.file_id, error = %format!("{:#}", e), "embed failed");
            EmbedResult::from_error(&e)
        }
    }
}

/// Remove every record of `file_id`. Never fails.
pub async fn delete_file_embeddings(store: &dyn DocumentStore, file_id: i64) -> DeleteResult {
    match store.delete_by_file(file_id).await {
        Ok(0) => DeleteResult {
            success: true,
            message: "Tidak ada data embedding".to_string(),
            deleted_count: Some(0),
        },
        Ok(count) => {
            info!(file_id, count, "deleted embeddings");
            DeleteResult {
                success: true,
                message: format!("Berhasil menghapus {} embeddings", count),
                deleted_count: Some(count),
            }
        }
        Err(e) => {
            warn!(file_id, error = %e, "delete failed");
            DeleteResult {
                success: false,
                message: error_code(&e),
                deleted_count: None,
            }
        }
    }
}
