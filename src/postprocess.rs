//! Intent-aware sorting and filtering of retrieved rows.
//!
//! | Intent | Needs | Action | Default limit |
//! |--------|-------|--------|---------------|
//! | `superlative_query` | attribute, operator | stable sort by attribute (`MIN` asc, `MAX` desc) | 1 |
//! | `budget_query` | attribute, operator, value | filter by comparison, keep relevance order | 5 |
//! | anything else | | pass through | 5 |
//!
//! Attribute values are read with [`Metadata::number_or_zero`], so missing or
//! non-numeric cells count as `0`.
//!
//! [`Metadata::number_or_zero`]: crate::models::Metadata::number_or_zero

use std::cmp::Ordering;
use tracing::info;

use crate::intent::{ExtractedQuery, Operator, QueryIntent};
use crate::models::SourceDocument;

const DEFAULT_SUPERLATIVE_LIMIT: usize = 1;
const DEFAULT_LIMIT: usize = 5;

pub fn apply(intent: &ExtractedQuery, mut candidates: Vec<SourceDocument>) -> Vec<SourceDocument> {
    let before = candidates.len();

    match (
        intent.intent,
        intent.attribute.as_deref(),
        intent.operator,
        intent.value,
    ) {
        (QueryIntent::SuperlativeQuery, Some(attribute), Some(op @ (Operator::Min | Operator::Max)), _) => {
            candidates.sort_by(|a, b| {
                let x = a.metadata.number_or_zero(attribute);
                let y = b.metadata.number_or_zero(attribute);
                let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
                if op == Operator::Max {
                    ord.reverse()
                } else {
                    ord
                }
            });
            candidates.truncate(intent.limit.unwrap_or(DEFAULT_SUPERLATIVE_LIMIT));
            info!(attribute, ?op, before, after = candidates.len(), "sorted superlative");
        }
        (QueryIntent::BudgetQuery, Some(attribute), Some(op), Some(value)) => {
            candidates.retain(|doc| {
                op.compare(doc.metadata.number_or_zero(attribute), value)
                    .unwrap_or(true)
            });
            candidates.truncate(intent.limit.unwrap_or(DEFAULT_LIMIT));
            info!(attribute, ?op, value, before, after = candidates.len(), "filtered budget");
        }
        _ => {
            candidates.truncate(intent.limit.unwrap_or(DEFAULT_LIMIT));
        }
    }

    candidates
}
