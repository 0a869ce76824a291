//! Hybrid retrieval: vector branch, fuzzy branch, score fusion.
//!
//! # Fusion
//!
//! Both branches over-fetch a window of `2 × limit` candidates. A candidate
//! at 0-based rank `i` in its branch earns a positional bonus
//!
//! ```text
//! bonus(i) = position_weight × (1 − i / (2 × limit))
//! ```
//!
//! and a branch contribution of
//!
//! ```text
//! vector: (1 − cosine_distance) × vector_weight + bonus(i)
//! fuzzy:  (1 − fuzzy_score)     × fuzzy_weight  + bonus(i)
//! ```
//!
//! A document found by both branches gets the sum of both contributions plus
//! `co_occurrence_bonus` and is tagged `hybrid`. Results are sorted by fused
//! score descending (ties keep first-appearance order: vector rank, then
//! fuzzy rank), truncated to `limit`, and reported on the distance scale
//! `score = 1 − fused`.

pub mod fuzzy;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{error_code, RagError};
use crate::models::{DocumentRecord, SearchResult, SearchSource};
use crate::store::{DocumentStore, ScoredRecord};

use fuzzy::FuzzyOptions;

/// Largest `limit` the CLI and HTTP surfaces accept.
pub const MAX_SEARCH_LIMIT: usize = 100;

/// Field weights of the fuzzy branch: record text, searchable string, name.
const TEXT_FIELD_WEIGHT: f64 = 0.4;
const SEARCHABLE_FIELD_WEIGHT: f64 = 0.4;
const NAME_FIELD_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct SearchParams {
    pub scan_limit: usize,
    pub vector_weight: f64,
    pub fuzzy_weight: f64,
    pub position_weight: f64,
    pub co_occurrence_bonus: f64,
    pub name_field: String,
    pub fuzzy: FuzzyOptions,
}

impl SearchParams {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            scan_limit: config.scan_limit,
            vector_weight: config.vector_weight,
            fuzzy_weight: config.fuzzy_weight,
            position_weight: config.position_weight,
            co_occurrence_bonus: config.co_occurrence_bonus,
            name_field: config.name_field.clone(),
            fuzzy: FuzzyOptions {
                threshold: config.fuzzy_threshold,
                distance: config.fuzzy_distance,
                min_match_chars: config.min_match_chars,
            },
        }
    }
}

impl Default for SearchParams {
    fn default() -> Self {
        Self::from_config(&RetrievalConfig::default())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Hybrid,
    Vector,
}

/// Check a caller-supplied limit: `0` is rejected, anything above
/// [`MAX_SEARCH_LIMIT`] is capped.
pub fn checked_limit(limit: usize) -> Result<usize> {
    if limit == 0 {
        bail!("limit must be between 1 and {}", MAX_SEARCH_LIMIT);
    }
    Ok(limit.min(MAX_SEARCH_LIMIT))
}

impl FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hybrid" => Ok(SearchMode::Hybrid),
            "vector" => Ok(SearchMode::Vector),
            _ => bail!("Unknown search mode: {}. Use hybrid or vector.", s),
        }
    }
}

/// Envelope for the standalone search operations.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub success: bool,
    pub results: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchOutcome {
    pub fn from_result(result: Result<Vec<SearchResult>>) -> Self {
        match result {
            Ok(results) => Self {
                success: true,
                results,
                error: None,
            },
            Err(e) => Self {
                success: false,
                results: Vec::new(),
                error: Some(error_code(&e)),
            },
        }
    }
}

/// The string the fuzzy branch matches against: record text followed by
/// every text-typed metadata value.
pub fn searchable_text(record: &DocumentRecord) -> String {
    std::iter::once(record.text.as_str())
        .chain(record.metadata.text_values())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rank `pool` by fuzzy match quality against `query`, best first, keeping at
/// most `window` matches. The returned `distance` is the fuzzy score.
pub fn fuzzy_rank(
    query: &str,
    pool: Vec<DocumentRecord>,
    window: usize,
    params: &SearchParams,
) -> Vec<ScoredRecord> {
    let mut hits: Vec<ScoredRecord> = pool
        .into_iter()
        .filter_map(|record| {
            let searchable = searchable_text(&record);
            let name = record
                .metadata
                .get(&params.name_field)
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let fields = [
                (record.text.as_str(), TEXT_FIELD_WEIGHT),
                (searchable.as_str(), SEARCHABLE_FIELD_WEIGHT),
                (name, NAME_FIELD_WEIGHT),
            ];
            let score = fuzzy::weighted_score(query, &fields, &params.fuzzy)?;
            Some(ScoredRecord {
                record,
                distance: score,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(window);
    hits
}

struct Fused {
    record: DocumentRecord,
    score: f64,
    source: SearchSource,
}

/// Merge the two branches. Pure; see the module docs for the formula.
pub fn fuse(
    vector_hits: Vec<ScoredRecord>,
    fuzzy_hits: Vec<ScoredRecord>,
    limit: usize,
    params: &SearchParams,
) -> Vec<SearchResult> {
    if limit == 0 {
        return Vec::new();
    }
    let window = limit.saturating_mul(2) as f64;
    let bonus = |rank: usize| params.position_weight * (1.0 - rank as f64 / window);

    let mut merged: Vec<Fused> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();

    for (rank, hit) in vector_hits.into_iter().enumerate() {
        if by_id.contains_key(&hit.record.id) {
            continue;
        }
        by_id.insert(hit.record.id.clone(), merged.len());
        merged.push(Fused {
            score: (1.0 - hit.distance) * params.vector_weight + bonus(rank),
            record: hit.record,
            source: SearchSource::Vector,
        });
    }

    let mut boosted = 0usize;
    for (rank, hit) in fuzzy_hits.into_iter().enumerate() {
        let contribution = (1.0 - hit.distance) * params.fuzzy_weight + bonus(rank);
        match by_id.get(&hit.record.id) {
            Some(&slot) => {
                let entry = &mut merged[slot];
                if entry.source == SearchSource::Vector {
                    entry.score += contribution + params.co_occurrence_bonus;
                    entry.source = SearchSource::Hybrid;
                    boosted += 1;
                }
            }
            None => {
                by_id.insert(hit.record.id.clone(), merged.len());
                merged.push(Fused {
                    score: contribution,
                    record: hit.record,
                    source: SearchSource::Fuzzy,
                });
            }
        }
    }
    if boosted > 0 {
        debug!(boosted, "co-occurrence boosts applied");
    }

    // Stable: equal scores keep first-appearance order.
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    merged.truncate(limit);

    merged
        .into_iter()
        .map(|f| SearchResult {
            id: f.record.id,
            text: f.record.text,
            score: 1.0 - f.score,
            metadata: f.record.metadata,
            source: f.source,
        })
        .collect()
}

async fn ensure_indexed(store: &dyn DocumentStore) -> Result<()> {
    if !store.has_table().await? {
        return Err(RagError::NoEmbeddedData.into());
    }
    Ok(())
}

/// Vector and fuzzy retrieval fused into at most `limit` results.
///
/// Fails with [`RagError::NoEmbeddedData`] if nothing was ever indexed.
pub async fn hybrid_search(
    store: &dyn DocumentStore,
    embedder: &dyn EmbeddingProvider,
    query: &str,
    limit: usize,
    file_id: Option<i64>,
    params: &SearchParams,
) -> Result<Vec<SearchResult>> {
    ensure_indexed(store).await?;
    if limit == 0 {
        return Ok(Vec::new());
    }
    info!(query, limit, ?file_id, "hybrid search");

    let query_vec = embedder
        .embed(query)
        .await
        .context("Failed to embed search query")?;
    let window = limit.saturating_mul(2);

    let vector_hits = store.vector_query(&query_vec, window, file_id).await?;
    let pool = store.scan(params.scan_limit, file_id).await?;
    let pool_size = pool.len();
    let fuzzy_hits = fuzzy_rank(query, pool, window, params);

    info!(
        vector = vector_hits.len(),
        fuzzy = fuzzy_hits.len(),
        scanned = pool_size,
        "branch hits"
    );

    Ok(fuse(vector_hits, fuzzy_hits, limit, params))
}

/// Pure semantic search. `score` is the cosine distance.
pub async fn vector_search(
    store: &dyn DocumentStore,
    embedder: &dyn EmbeddingProvider,
    query: &str,
    limit: usize,
    file_id: Option<i64>,
) -> Result<Vec<SearchResult>> {
    ensure_indexed(store).await?;
    if limit == 0 {
        return Ok(Vec::new());
    }
    let query_vec = embedder
        .embed(query)
        .await
        .context("Failed to embed search query")?;
    let hits = store.vector_query(&query_vec, limit, file_id).await?;
    Ok(hits
        .into_iter()
        .map(|hit| SearchResult {
            id: hit.record.id,
            text: hit.record.text,
            score: hit.distance,
            metadata: hit.record.metadata,
            source: SearchSource::Vector,
        })
        .collect())
}

/// Run a search in the given mode and wrap it in an envelope.
pub async fn search(
    store: &dyn DocumentStore,
    embedder: &dyn EmbeddingProvider,
    query: &str,
    limit: usize,
    file_id: Option<i64>,
    mode: SearchMode,
    params: &SearchParams,
) -> SearchOutcome {
    let result = match mode {
        SearchMode::Hybrid => hybrid_search(store, embedder, query, limit, file_id, params).await,
        SearchMode::Vector => vector_search(store, embedder, query, limit, file_id).await,
    };
    if let Err(e) = &result {
        warn!(error = %format!("{:#}", e), "search failed");
    }
    SearchOutcome::from_result(result)
}

/// Whether any record has been indexed.
pub async fn has_embedded_data(store: &dyn DocumentStore) -> bool {
    let check = async {
        if !store.has_table().await? {
            return Ok::<_, anyhow::Error>(false);
        }
        Ok(store.count_rows().await? > 0)
    };
    match check.await {
        Ok(present) => present,
        Err(e) => {
            warn!(error = %e, "could not check embedded data");
            false
        }
    }
}
