//! Rule-based intent detection.
//!
//! Rules are evaluated in a fixed order and the first match wins:
//! general chat, superlative, aggregation, budget/range, generic search.
//! All patterns are compiled once.

use regex::Regex;
use std::sync::LazyLock;

use super::{ExtractedQuery, Operator, QueryIntent};

static GENERAL_CHAT: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^(halo|hai|hello|hi|hey)[\s!.,?]*$",
        r"(?i)^selamat (pagi|siang|sore|malam)[\s!.,?]*$",
        r"(?i)^(apa kabar|terima kasih|makasih|thanks)[\s!.,?]*$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

struct SuperlativeRule {
    pattern: Regex,
    attribute: &'static str,
    operator: Operator,
}

static SUPERLATIVE_RULES: LazyLock<Vec<SuperlativeRule>> = LazyLock::new(|| {
    [
        (r"(?i)\b(termurah|paling\s+murah)\b", "harga", Operator::Min),
        (r"(?i)\b(termahal|paling\s+mahal)\b", "harga", Operator::Max),
        (r"(?i)\b(terbanyak|paling\s+banyak)\b", "stok", Operator::Max),
        (r"(?i)\b(tersedikit|paling\s+sedikit)\b", "stok", Operator::Min),
        (r"(?i)\b(terendah|paling\s+rendah)\b", "harga", Operator::Min),
        (r"(?i)\b(tertinggi|paling\s+tinggi)\b", "harga", Operator::Max),
    ]
    .into_iter()
    .map(|(p, attribute, operator)| SuperlativeRule {
        pattern: Regex::new(p).unwrap(),
        attribute,
        operator,
    })
    .collect()
});

static LEADING_COUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*(\d+)\b").unwrap());

static AGGREGATION_RULES: LazyLock<Vec<(Regex, Operator)>> = LazyLock::new(|| {
    [
        (r"(?i)\b(total|seluruh)\b", Operator::Sum),
        (r"(?i)\b(rata-rata|rata2|rerata)\b", Operator::Avg),
        (r"(?i)\b(berapa\s+banyak|hitung)\b", Operator::Count),
    ]
    .into_iter()
    .map(|(p, op)| (Regex::new(p).unwrap(), op))
    .collect()
});

static PRICE_WORDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(harga|biaya|nilai|rupiah|rp)\b").unwrap());

/// Directional keyword, optional currency marker, number, optional unit.
static BUDGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(bajet|budget|maksimal|maks|max|di\s*bawah|kurang\s+dari|tidak\s+lebih\s+dari|sampai|hingga|minimal|min|di\s*atas|lebih\s+dari|mulai\s+dari)\s*(?:rp\.?\s*)?(\d{1,3}(?:[.,]\d{3})+|\d+(?:[.,]\d+)?)\s*(jt|juta|rb|ribu|k)?\b",
    )
    .unwrap()
});

const LTE_KEYWORDS: &[&str] = &[
    "bajet",
    "budget",
    "maksimal",
    "maks",
    "max",
    "di bawah",
    "dibawah",
    "kurang dari",
    "tidak lebih dari",
    "sampai",
    "hingga",
];

static THOUSANDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}(?:[.,]\d{3})+$").unwrap());

static SEARCH_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(produk|barang|cari|carikan|mencari|tampilkan|tunjukkan|lihat|daftar|list|jual|tersedia)\b",
    )
    .unwrap()
});

/// Determiners, question words, search verbs, budget and unit vocabulary,
/// currency markers.
const STOP_WORDS: &[&str] = &[
    "yang", "dan", "atau", "dengan", "untuk", "dari", "pada", "dalam", "ada", "adakah", "apakah",
    "apa", "mana", "yg", "saya", "aku", "kami", "mau", "ingin", "butuh", "perlu", "tolong",
    "mohon", "dong", "deh", "sih", "nya", "ini", "itu", "the", "cari", "carikan", "mencari",
    "tampilkan", "tunjukkan", "lihat", "lihatkan", "daftar", "list", "berikan", "kasih", "beri",
    "jual", "tersedia", "punya", "produk", "barang", "berapa", "harga", "bajet", "budget",
    "maksimal", "maks", "max", "minimal", "min", "bawah", "dibawah", "atas", "diatas", "kurang",
    "lebih", "tidak", "sampai", "hingga", "mulai", "juta", "ribu", "rupiah", "total", "seluruh",
    "jumlah", "hitung", "banyak", "rata", "rerata", "paling", "semua",
];

/// Whether a message is small talk that needs no retrieval.
pub fn is_general_chat(query: &str) -> bool {
    let trimmed = query.trim();
    GENERAL_CHAT.iter().any(|p| p.is_match(trimmed))
}

/// Reduce free text to its content words.
///
/// Lower-cases, turns punctuation into spaces, and drops stop words, tokens of
/// two characters or fewer, and purely numeric tokens. Applying it to its own
/// output returns the same string.
pub fn clean_entity(text: &str) -> Option<String> {
    let normalized: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let tokens: Vec<&str> = normalized
        .split_whitespace()
        .filter(|t| t.chars().count() > 2)
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !STOP_WORDS.contains(t))
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

fn without_span(query: &str, start: usize, end: usize) -> String {
    format!("{} {}", &query[..start], &query[end..])
}

/// Entity of `text` with the attribute word itself removed.
fn entity_without_attribute(text: &str, attribute: &str) -> Option<String> {
    clean_entity(text)
        .map(|e| {
            e.split(' ')
                .filter(|t| *t != attribute)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|e| !e.is_empty())
}

/// Parse a budget amount: `7.000.000`, `7,5`, `7` with an optional unit.
pub fn parse_amount(number: &str, unit: Option<&str>) -> Option<f64> {
    let plain = if THOUSANDS.is_match(number) {
        number.replace(['.', ','], "")
    } else {
        number.replace(',', ".")
    };
    let base: f64 = plain.parse().ok()?;
    let multiplier = match unit.map(|u| u.to_lowercase()).as_deref() {
        Some("jt") | Some("juta") => 1_000_000.0,
        Some("rb") | Some("ribu") | Some("k") => 1_000.0,
        _ => 1.0,
    };
    Some((base * multiplier).round())
}

fn direction(keyword: &str) -> Operator {
    let normalized = keyword
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if LTE_KEYWORDS.contains(&normalized.as_str()) {
        Operator::Lte
    } else {
        Operator::Gte
    }
}

fn detect_superlative(query: &str) -> Option<ExtractedQuery> {
    let (rule, span) = SUPERLATIVE_RULES
        .iter()
        .find_map(|rule| rule.pattern.find(query).map(|m| (rule, m.range())))?;

    let limit = LEADING_COUNT
        .captures(query)
        .and_then(|c| c[1].parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(1);

    let mut extracted = ExtractedQuery::new(QueryIntent::SuperlativeQuery, 0.85, query);
    extracted.entity = entity_without_attribute(
        &without_span(query, span.start, span.end),
        rule.attribute,
    );
    extracted.attribute = Some(rule.attribute.to_string());
    extracted.operator = Some(rule.operator);
    extracted.limit = Some(limit);
    Some(extracted)
}

fn detect_aggregation(query: &str) -> Option<ExtractedQuery> {
    let (span, operator) = AGGREGATION_RULES
        .iter()
        .find_map(|(p, op)| p.find(query).map(|m| (m.range(), *op)))?;

    let attribute = if PRICE_WORDS.is_match(query) {
        "harga"
    } else {
        "stok"
    };

    let mut extracted = ExtractedQuery::new(QueryIntent::AggregationQuery, 0.8, query);
    extracted.entity =
        entity_without_attribute(&without_span(query, span.start, span.end), attribute);
    extracted.attribute = Some(attribute.to_string());
    extracted.operator = Some(operator);
    Some(extracted)
}

fn detect_budget(query: &str) -> Option<ExtractedQuery> {
    let caps = BUDGET.captures(query)?;
    let whole = caps.get(0)?;
    let value = parse_amount(&caps[2], caps.get(3).map(|m| m.as_str()))?;

    let mut extracted = ExtractedQuery::new(QueryIntent::BudgetQuery, 0.85, query);
    extracted.entity = clean_entity(&without_span(query, whole.start(), whole.end()));
    extracted.attribute = Some("harga".to_string());
    extracted.operator = Some(direction(&caps[1]));
    extracted.value = Some(value);
    extracted.limit = Some(5);
    Some(extracted)
}

/// Run the rule pass. `None` when no rule fires.
pub fn detect(query: &str) -> Option<ExtractedQuery> {
    let trimmed = query.trim();

    if is_general_chat(trimmed) {
        return Some(ExtractedQuery::new(QueryIntent::GeneralChat, 0.9, query));
    }
    if let Some(found) = detect_superlative(trimmed) {
        return Some(ExtractedQuery {
            raw_query: query.to_string(),
            ..found
        });
    }
    if let Some(found) = detect_aggregation(trimmed) {
        return Some(ExtractedQuery {
            raw_query: query.to_string(),
            ..found
        });
    }
    if let Some(found) = detect_budget(trimmed) {
        return Some(ExtractedQuery {
            raw_query: query.to_string(),
            ..found
        });
    }
    if SEARCH_KEYWORDS.is_match(trimmed) {
        let mut extracted = ExtractedQuery::new(QueryIntent::SimpleSearch, 0.6, query);
        extracted.entity = clean_entity(trimmed);
        return Some(extracted);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_general_chat_patterns() {
        for q in ["halo", "Hai!", "  selamat pagi  ", "terima kasih.", "thanks?"] {
            assert!(is_general_chat(q), "{q}");
        }
        for q in ["halo, ada laptop?", "selamat datang", "apa kabar laptop"] {
            assert!(!is_general_chat(q), "{q}");
        }
        let d = detect("Halo").unwrap();
        assert_eq!(d.intent, QueryIntent::GeneralChat);
        assert_eq!(d.confidence, 0.9);
    }

    #[test]
    fn test_superlative_with_leading_count() {
        let d = detect("5 laptop termahal").unwrap();
        assert_eq!(d.intent, QueryIntent::SuperlativeQuery);
        assert_eq!(d.entity.as_deref(), Some("laptop"));
        assert_eq!(d.attribute.as_deref(), Some("harga"));
        assert_eq!(d.operator, Some(Operator::Max));
        assert_eq!(d.limit, Some(5));
        assert_eq!(d.confidence, 0.85);
    }

    #[test]
    fn test_superlative_defaults() {
        let d = detect("mie instant paling murah").unwrap();
        assert_eq!(d.operator, Some(Operator::Min));
        assert_eq!(d.entity.as_deref(), Some("mie instant"));
        assert_eq!(d.limit, Some(1));

        let d = detect("barang dengan stok terbanyak").unwrap();
        assert_eq!(d.attribute.as_deref(), Some("stok"));
        assert_eq!(d.operator, Some(Operator::Max));
        assert_eq!(d.entity, None);

        let d = detect("sabun stok terbanyak").unwrap();
        assert_eq!(d.entity.as_deref(), Some("sabun"));
    }

    #[test]
    fn test_aggregation() {
        let d = detect("berapa total stok").unwrap();
        assert_eq!(d.intent, QueryIntent::AggregationQuery);
        assert_eq!(d.operator, Some(Operator::Sum));
        assert_eq!(d.attribute.as_deref(), Some("stok"));
        assert_eq!(d.entity, None);

        let d = detect("rata-rata harga laptop").unwrap();
        assert_eq!(d.operator, Some(Operator::Avg));
        assert_eq!(d.attribute.as_deref(), Some("harga"));
        assert_eq!(d.entity.as_deref(), Some("laptop"));
        assert_eq!(d.confidence, 0.8);
    }

    #[test]
    fn test_budget_with_unit() {
        let d = detect("laptop dengan bajet 7juta").unwrap();
        assert_eq!(d.intent, QueryIntent::BudgetQuery);
        assert_eq!(d.entity.as_deref(), Some("laptop"));
        assert_eq!(d.attribute.as_deref(), Some("harga"));
        assert_eq!(d.operator, Some(Operator::Lte));
        assert_eq!(d.value, Some(7_000_000.0));
        assert_eq!(d.limit, Some(5));
    }

    #[test]
    fn test_budget_directions_and_units() {
        let cases = [
            ("apakah ada laptop di bawah 7 jt?", Operator::Lte, 7_000_000.0),
            ("HP di atas 5juta", Operator::Gte, 5_000_000.0),
            ("mouse maksimal Rp 150rb", Operator::Lte, 150_000.0),
            ("keyboard kurang dari 500k", Operator::Lte, 500_000.0),
            ("monitor lebih dari 2.500.000", Operator::Gte, 2_500_000.0),
            ("printer mulai dari 1,5 juta", Operator::Gte, 1_500_000.0),
            ("kursi tidak lebih dari 800 ribu", Operator::Lte, 800_000.0),
        ];
        for (q, op, value) in cases {
            let d = detect(q).unwrap();
            assert_eq!(d.intent, QueryIntent::BudgetQuery, "{q}");
            assert_eq!(d.operator, Some(op), "{q}");
            assert_eq!(d.value, Some(value), "{q}");
        }
    }

    #[test]
    fn test_amount_parsing() {
        assert_eq!(parse_amount("7", Some("juta")), Some(7_000_000.0));
        assert_eq!(parse_amount("7", Some("JT")), Some(7_000_000.0));
        assert_eq!(parse_amount("1.5", Some("jt")), Some(1_500_000.0));
        assert_eq!(parse_amount("7.000.000", None), Some(7_000_000.0));
        assert_eq!(parse_amount("250", Some("k")), Some(250_000.0));
    }

    #[test]
    fn test_generic_search_is_low_confidence() {
        let d = detect("cari beras premium").unwrap();
        assert_eq!(d.intent, QueryIntent::SimpleSearch);
        assert_eq!(d.entity.as_deref(), Some("beras premium"));
        assert_eq!(d.confidence, 0.6);
        assert!(detect("bandingkan asus dan lenovo").is_none());
    }

    #[test]
    fn test_clean_entity() {
        assert_eq!(clean_entity("Apakah ada Laptop Gaming?").as_deref(), Some("laptop gaming"));
        assert_eq!(clean_entity("ada yang 123 di"), None);
        for input in ["Tolong carikan SEPATU lari, ukuran 42!", "mie instant", "ini itu"] {
            let once = clean_entity(input);
            let twice = once.as_deref().and_then(clean_entity);
            assert_eq!(once, twice, "{input}");
        }
    }
}
