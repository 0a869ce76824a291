//! Approximate substring matching for the lexical branch.
//!
//! A pattern is aligned against every window of a text with optimal string
//! alignment distance (insertions, deletions, substitutions and adjacent
//! transpositions). The match score is
//!
//! ```text
//! score = errors / pattern_len + start / distance
//! ```
//!
//! so `0.0` is an exact match at the start of the text and larger is worse.
//! Matches scoring above the threshold are rejected. Several weighted fields
//! are combined into one record score as `Π score_f ^ (w_f / Σw)` over the
//! fields that matched. Patterns are cut to their first
//! [`MAX_PATTERN_CHARS`] characters, which bounds the work per field.

/// Matching parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuzzyOptions {
    /// Maximum accepted score, in `[0, 1]`.
    pub threshold: f64,
    /// Characters of offset that cost a full score point.
    pub distance: usize,
    /// Patterns shorter than this never match.
    pub min_match_chars: usize,
}

impl Default for FuzzyOptions {
    fn default() -> Self {
        Self {
            threshold: 0.4,
            distance: 100,
            min_match_chars: 2,
        }
    }
}

/// Longest pattern that is matched; longer patterns are cut to this prefix.
pub const MAX_PATTERN_CHARS: usize = 32;

/// Best `(errors, start)` alignment of `pattern` against any substring of
/// `text` ending at each text position. Keeps three rows of the table.
fn best_alignments(pattern: &[char], text: &[char]) -> Vec<(usize, usize)> {
    let n = text.len();

    // Row i holds, per text position j, the errors aligning pattern[..i] to a
    // substring ending at text[j-1] and where that substring begins.
    let mut before_prev: Vec<(usize, usize)> = Vec::new();
    let mut prev: Vec<(usize, usize)> = (0..=n).map(|j| (0, j)).collect();

    for i in 1..=pattern.len() {
        let mut row = vec![(0usize, 0usize); n + 1];
        row[0] = (i, 0);

        for j in 1..=n {
            let cost = usize::from(pattern[i - 1] != text[j - 1]);

            let mut best = (prev[j - 1].0 + cost, prev[j - 1].1);
            let deletion = (prev[j].0 + 1, prev[j].1);
            let insertion = (row[j - 1].0 + 1, row[j - 1].1);
            for candidate in [deletion, insertion] {
                if candidate.0 < best.0 {
                    best = candidate;
                }
            }
            if i > 1
                && j > 1
                && pattern[i - 1] == text[j - 2]
                && pattern[i - 2] == text[j - 1]
                && before_prev[j - 2].0 + 1 < best.0
            {
                best = (before_prev[j - 2].0 + 1, before_prev[j - 2].1);
            }

            row[j] = best;
        }

        before_prev = std::mem::replace(&mut prev, row);
    }

    prev
}

/// Score `pattern` against `text`. `None` when nothing scores within the
/// threshold. Only the first [`MAX_PATTERN_CHARS`] characters of the pattern
/// are matched.
pub fn match_score(pattern: &str, text: &str, options: &FuzzyOptions) -> Option<f64> {
    let pattern: Vec<char> = pattern
        .trim()
        .to_lowercase()
        .chars()
        .take(MAX_PATTERN_CHARS)
        .collect();
    if pattern.is_empty() || pattern.len() < options.min_match_chars {
        return None;
    }
    let text: Vec<char> = text.to_lowercase().chars().collect();
    if text.is_empty() {
        return None;
    }

    let m = pattern.len() as f64;
    let best = best_alignments(&pattern, &text)
        .into_iter()
        .map(|(errors, start)| {
            let accuracy = errors as f64 / m;
            if options.distance == 0 {
                if start == 0 {
                    accuracy
                } else {
                    1.0
                }
            } else {
                accuracy + start as f64 / options.distance as f64
            }
        })
        .fold(f64::INFINITY, f64::min);

    (best <= options.threshold).then_some(best.min(1.0))
}

/// Combine weighted fields into one score. Fields that do not match are
/// ignored; `None` when no field matches.
pub fn weighted_score(pattern: &str, fields: &[(&str, f64)], options: &FuzzyOptions) -> Option<f64> {
    let total_weight: f64 = fields.iter().map(|(_, w)| w).sum();
    if total_weight <= 0.0 {
        return None;
    }

    let mut combined = 1.0;
    let mut matched = false;
    for (text, weight) in fields {
        if let Some(score) = match_score(pattern, text, options) {
            let base = if score == 0.0 { f64::EPSILON } else { score };
            combined *= base.powf(weight / total_weight);
            matched = true;
        }
    }
    matched.then_some(combined)
}
