//! Query intent extraction.
//!
//! Every chat message is classified into a [`QueryIntent`] plus optional
//! entity, attribute, operator, value and limit. Extraction runs cheapest
//! first:
//!
//! 1. [`rules::detect`] tries a fixed, ordered set of regex rules.
//! 2. A rule result with confidence ≥ [`FAST_PATH_CONFIDENCE`] is returned
//!    without any model call.
//! 3. Otherwise the generative model is asked for a strict JSON extraction
//!    ([`llm::extract_with_model`]).
//!
//! [`IntentExtractor::extract`] never fails: any model or parse error yields
//! [`ExtractedQuery::fallback`].

pub mod llm;
pub mod rules;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::GenerationConfig;
use crate::generation::{ChatModel, ChatOptions};

pub use rules::{clean_entity, is_general_chat};

/// Rule results at or above this confidence skip the model call.
pub const FAST_PATH_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    SuperlativeQuery,
    ComparisonQuery,
    AggregationQuery,
    BudgetQuery,
    FilterQuery,
    SimpleSearch,
    GeneralChat,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::SuperlativeQuery => "superlative_query",
            QueryIntent::ComparisonQuery => "comparison_query",
            QueryIntent::AggregationQuery => "aggregation_query",
            QueryIntent::BudgetQuery => "budget_query",
            QueryIntent::FilterQuery => "filter_query",
            QueryIntent::SimpleSearch => "simple_search",
            QueryIntent::GeneralChat => "general_chat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let intent = match s.trim() {
            "superlative_query" => QueryIntent::SuperlativeQuery,
            "comparison_query" => QueryIntent::ComparisonQuery,
            "aggregation_query" => QueryIntent::AggregationQuery,
            "budget_query" => QueryIntent::BudgetQuery,
            "filter_query" => QueryIntent::FilterQuery,
            "simple_search" => QueryIntent::SimpleSearch,
            "general_chat" => QueryIntent::GeneralChat,
            _ => return None,
        };
        Some(intent)
    }
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sorting (`MIN`/`MAX`), comparison (`LTE`..`EQ`) and aggregation
/// (`SUM`/`AVG`/`COUNT`, plus `MIN`/`MAX`) operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    Min,
    Max,
    Lte,
    Gte,
    Lt,
    Gt,
    Eq,
    Sum,
    Avg,
    Count,
}

impl Operator {
    pub fn parse(s: &str) -> Option<Self> {
        let op = match s.trim().to_ascii_uppercase().as_str() {
            "MIN" => Operator::Min,
            "MAX" => Operator::Max,
            "LTE" => Operator::Lte,
            "GTE" => Operator::Gte,
            "LT" => Operator::Lt,
            "GT" => Operator::Gt,
            "EQ" => Operator::Eq,
            "SUM" => Operator::Sum,
            "AVG" => Operator::Avg,
            "COUNT" => Operator::Count,
            _ => return None,
        };
        Some(op)
    }

    /// Apply a comparison operator. `None` for sorting and aggregation
    /// operators.
    pub fn compare(&self, lhs: f64, rhs: f64) -> Option<bool> {
        match self {
            Operator::Lte => Some(lhs <= rhs),
            Operator::Gte => Some(lhs >= rhs),
            Operator::Lt => Some(lhs < rhs),
            Operator::Gt => Some(lhs > rhs),
            Operator::Eq => Some(lhs == rhs),
            _ => None,
        }
    }
}

/// The structured reading of one user message. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedQuery {
    pub intent: QueryIntent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    pub confidence: f64,
    pub raw_query: String,
}

impl ExtractedQuery {
    pub fn new(intent: QueryIntent, confidence: f64, raw_query: &str) -> Self {
        Self {
            intent,
            entity: None,
            attribute: None,
            operator: None,
            value: None,
            limit: None,
            confidence,
            raw_query: raw_query.to_string(),
        }
    }

    /// The safe default used whenever extraction fails.
    pub fn fallback(raw_query: &str) -> Self {
        Self::new(QueryIntent::SimpleSearch, 0.5, raw_query)
    }

    /// Text to retrieve with: the entity when present, else the raw query.
    pub fn search_text(&self) -> &str {
        self.entity
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or(&self.raw_query)
    }
}

/// Rule pass plus model fallback.
pub struct IntentExtractor {
    chat: Arc<dyn ChatModel>,
    options: ChatOptions,
}

impl IntentExtractor {
    pub fn new(chat: Arc<dyn ChatModel>, config: &GenerationConfig) -> Self {
        Self {
            chat,
            options: ChatOptions {
                model: config.intent_model.clone(),
                temperature: Some(config.intent_temperature),
            },
        }
    }

    pub async fn extract(&self, query: &str) -> ExtractedQuery {
        if let Some(rule) = rules::detect(query) {
            if rule.confidence >= FAST_PATH_CONFIDENCE {
                info!(
                    intent = %rule.intent,
                    entity = rule.entity.as_deref().unwrap_or("none"),
                    "intent from rules"
                );
                return rule;
            }
            debug!(intent = %rule.intent, confidence = rule.confidence, "rule result below fast path");
        }

        match llm::extract_with_model(self.chat.as_ref(), &self.options, query).await {
            Ok(extracted) => {
                info!(
                    intent = %extracted.intent,
                    entity = extracted.entity.as_deref().unwrap_or("none"),
                    "intent from model"
                );
                extracted
            }
            Err(e) => {
                warn!(error = %e, "intent extraction failed, using default");
                ExtractedQuery::fallback(query)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ChatMessage;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        reply: Option<String>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(reply: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_string),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        async fn chat(&self, _messages: &[ChatMessage], _options: &ChatOptions) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Some(r) => Ok(r.clone()),
                None => anyhow::bail!("connection refused"),
            }
        }
    }

    fn extractor(model: Arc<Scripted>) -> IntentExtractor {
        IntentExtractor::new(model, &GenerationConfig::default())
    }

    #[tokio::test]
    async fn test_fast_path_skips_model() {
        let model = Scripted::new(None);
        let q = extractor(model.clone()).extract("5 laptop termahal").await;
        assert_eq!(q.intent, QueryIntent::SuperlativeQuery);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_low_confidence_rule_asks_model() {
        let model = Scripted::new(Some(r#"{"intent":"simple_search","entity":"beras premium"}"#));
        let q = extractor(model.clone()).extract("cari beras premium").await;
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(q.entity.as_deref(), Some("beras premium"));
        assert_eq!(q.confidence, 0.9);
    }

    #[tokio::test]
    async fn test_model_failure_falls_back() {
        let q = extractor(Scripted::new(None))
            .extract("bandingkan dua merek itu")
            .await;
        assert_eq!(q, ExtractedQuery::fallback("bandingkan dua merek itu"));
    }

    #[tokio::test]
    async fn test_garbage_reply_falls_back() {
        let q = extractor(Scripted::new(Some("maaf, saya tidak mengerti")))
            .extract("bandingkan dua merek itu")
            .await;
        assert_eq!(q.intent, QueryIntent::SimpleSearch);
        assert_eq!(q.confidence, 0.5);
    }

    #[test]
    fn test_serialized_shape() {
        let mut q = ExtractedQuery::new(QueryIntent::BudgetQuery, 0.85, "x");
        q.operator = Some(Operator::Lte);
        q.value = Some(7_000_000.0);
        let json = serde_json::to_value(&q).unwrap();
        assert_eq!(json["intent"], "budget_query");
        assert_eq!(json["operator"], "LTE");
        assert_eq!(json["rawQuery"], "x");
        assert!(json.get("entity").is_none());
    }

    #[test]
    fn test_search_text_prefers_entity() {
        let mut q = ExtractedQuery::new(QueryIntent::SimpleSearch, 0.9, "ada laptop?");
        assert_eq!(q.search_text(), "ada laptop?");
        q.entity = Some("laptop".into());
        assert_eq!(q.search_text(), "laptop");
    }

    #[test]
    fn test_compare_only_for_comparisons() {
        assert_eq!(Operator::Lte.compare(5.0, 5.0), Some(true));
        assert_eq!(Operator::Gt.compare(5.0, 5.0), Some(false));
        assert_eq!(Operator::Max.compare(1.0, 2.0), None);
    }
}
