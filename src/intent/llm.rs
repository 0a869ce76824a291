//! Model-backed intent extraction.
//!
//! The model is prompted with a fixed few-shot instruction and asked for a
//! bare JSON object. Replies are tolerated with markdown fences, reasoning
//! blocks or chatter around the object: the first balanced `{...}` span is
//! parsed. Failures are returned as [`ExtractionError`] so the caller falls
//! back explicitly.

use serde::Deserialize;
use thiserror::Error;

use super::{ExtractedQuery, Operator, QueryIntent};
use crate::generation::{ChatMessage, ChatModel, ChatOptions};

/// Confidence assigned to every successful model extraction.
pub const MODEL_CONFIDENCE: f64 = 0.9;

pub const EXTRACTION_PROMPT: &str = r#"Kamu adalah pengklasifikasi intent untuk chatbot toko. Baca pertanyaan pengguna lalu ekstrak informasinya.

INTENT YANG TERSEDIA:
- superlative_query: memakai "ter-" atau "paling" (termurah, termahal, terbanyak, tersedikit)
- budget_query: ada batas harga (bajet 5juta, maksimal 10jt, kurang dari 3juta, di bawah 7juta, di atas 1juta)
- aggregation_query: perhitungan (total, rata-rata, jumlah, berapa banyak)
- comparison_query: membandingkan dua item atau lebih
- simple_search: mencari produk atau informasi biasa
- general_chat: sapaan, basa-basi, ucapan terima kasih

ATURAN:
1. "entity" hanya berisi nama produk atau kategori, bukan seluruh kalimat.
   "apakah ada laptop?" menjadi entity "laptop".
2. "attribute" adalah nama kolom: "harga", "stok", atau kolom lain.
3. "operator": MIN atau MAX untuk superlative_query, LTE atau GTE untuk budget_query, SUM, AVG atau COUNT untuk aggregation_query.
4. "value" adalah angka penuh (7000000 untuk 7juta, 500000 untuk 500ribu).
5. "limit" adalah jumlah item yang diminta (5 untuk budget_query, 1 untuk superlative_query bila tidak disebut).

CONTOH:
- "mie instant termurah" -> {"intent":"superlative_query","entity":"mie instant","attribute":"harga","operator":"MIN","limit":1}
- "5 laptop termahal" -> {"intent":"superlative_query","entity":"laptop","attribute":"harga","operator":"MAX","limit":5}
- "laptop dengan bajet 7juta" -> {"intent":"budget_query","entity":"laptop","attribute":"harga","operator":"LTE","value":7000000,"limit":5}
- "HP di atas 5juta" -> {"intent":"budget_query","entity":"HP","attribute":"harga","operator":"GTE","value":5000000,"limit":5}
- "berapa total stok" -> {"intent":"aggregation_query","attribute":"stok","operator":"SUM"}
- "cari beras premium" -> {"intent":"simple_search","entity":"beras premium"}
- "halo" -> {"intent":"general_chat"}

Pertanyaan: "{query}"

Jawab HANYA dengan satu objek JSON yang valid, tanpa penjelasan dan tanpa markdown."#;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("intent model call failed: {0}")]
    Model(String),

    #[error("no JSON object in model reply")]
    NoJson,

    #[error("invalid JSON in model reply: {0}")]
    Json(#[from] serde_json::Error),
}

/// Loosely-typed model reply. Unknown intents and operators degrade instead
/// of failing the parse.
#[derive(Debug, Default, Deserialize)]
struct RawExtraction {
    intent: Option<String>,
    entity: Option<String>,
    attribute: Option<String>,
    operator: Option<String>,
    value: Option<f64>,
    limit: Option<f64>,
}

pub fn build_prompt(query: &str) -> String {
    EXTRACTION_PROMPT.replace("{query}", query)
}

pub async fn extract_with_model(
    chat: &dyn ChatModel,
    options: &ChatOptions,
    query: &str,
) -> Result<ExtractedQuery, ExtractionError> {
    let messages = [ChatMessage::user(build_prompt(query))];
    let reply = chat
        .chat(&messages, options)
        .await
        .map_err(|e| ExtractionError::Model(format!("{:#}", e)))?;
    tracing::debug!(reply = %reply.trim(), "intent model reply");
    parse_extraction(&reply, query)
}

/// Parse a model reply into an [`ExtractedQuery`].
pub fn parse_extraction(reply: &str, query: &str) -> Result<ExtractedQuery, ExtractionError> {
    let cleaned = strip_decorations(reply);
    let json = first_json_object(&cleaned).ok_or(ExtractionError::NoJson)?;
    let raw: RawExtraction = serde_json::from_str(json)?;

    let intent = raw
        .intent
        .as_deref()
        .and_then(QueryIntent::parse)
        .unwrap_or(QueryIntent::SimpleSearch);

    let default_limit = if intent == QueryIntent::BudgetQuery { 5 } else { 1 };
    let limit = raw
        .limit
        .filter(|l| l.is_finite() && *l >= 1.0)
        .map(|l| l as usize)
        .unwrap_or(default_limit);

    Ok(ExtractedQuery {
        intent,
        entity: non_empty(raw.entity),
        attribute: non_empty(raw.attribute),
        operator: raw.operator.as_deref().and_then(Operator::parse),
        value: raw.value.filter(|v| v.is_finite() && *v != 0.0),
        limit: Some(limit),
        confidence: MODEL_CONFIDENCE,
        raw_query: query.to_string(),
    })
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Remove `<think>` blocks and markdown fence lines.
fn strip_decorations(reply: &str) -> String {
    let mut text = reply.to_string();
    while let Some(start) = text.find("<think>") {
        match text[start..].find("</think>") {
            Some(rel_end) => text.replace_range(start..start + rel_end + "</think>".len(), ""),
            None => {
                text.truncate(start);
                break;
            }
        }
    }
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// First balanced `{...}` span, ignoring braces inside JSON strings.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_plain_json() {
        let q = parse_extraction(
            r#"{"intent":"budget_query","entity":"laptop","attribute":"harga","operator":"LTE","value":7000000}"#,
            "laptop dengan bajet 7juta",
        )
        .unwrap();
        assert_eq!(q.intent, QueryIntent::BudgetQuery);
        assert_eq!(q.operator, Some(Operator::Lte));
        assert_eq!(q.value, Some(7_000_000.0));
        assert_eq!(q.limit, Some(5));
        assert_eq!(q.confidence, MODEL_CONFIDENCE);
    }

    #[test]
    fn test_strips_fences_and_chatter() {
        let reply = "Berikut hasilnya:\n```json\n{\"intent\":\"superlative_query\",\"entity\":\"laptop\",\"operator\":\"MAX\",\"limit\":5}\n```\nSemoga membantu {ok}";
        let q = parse_extraction(reply, "5 laptop termahal").unwrap();
        assert_eq!(q.intent, QueryIntent::SuperlativeQuery);
        assert_eq!(q.limit, Some(5));
    }

    #[test]
    fn test_skips_think_block() {
        let reply = "<think>user wants {something}</think>{\"intent\":\"general_chat\"}";
        let q = parse_extraction(reply, "halo").unwrap();
        assert_eq!(q.intent, QueryIntent::GeneralChat);
        assert_eq!(q.limit, Some(1));
    }

    #[test]
    fn test_braces_inside_strings() {
        assert_eq!(
            first_json_object(r#"x {"entity":"a}b","n":{"m":1}} y"#),
            Some(r#"{"entity":"a}b","n":{"m":1}}"#)
        );
        assert_eq!(first_json_object("{ unterminated"), None);
    }

    #[test]
    fn test_defaults_for_missing_and_unknown_fields() {
        let q = parse_extraction(r#"{"intent":"nonsense","entity":"","operator":"??"}"#, "q").unwrap();
        assert_eq!(q.intent, QueryIntent::SimpleSearch);
        assert_eq!(q.entity, None);
        assert_eq!(q.operator, None);
        assert_eq!(q.limit, Some(1));
    }

    #[test]
    fn test_errors_are_typed() {
        assert!(matches!(
            parse_extraction("tidak tahu", "q"),
            Err(ExtractionError::NoJson)
        ));
        assert!(matches!(
            parse_extraction("{intent: budget}", "q"),
            Err(ExtractionError::Json(_))
        ));
    }

    #[test]
    fn test_prompt_embeds_query() {
        let prompt = build_prompt("ada laptop?");
        assert!(prompt.contains("Pertanyaan: \"ada laptop?\""));
        assert!(!prompt.contains("{query}"));
    }
}
