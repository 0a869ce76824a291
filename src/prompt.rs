//! Context rendering and system prompt selection.
//!
//! Retrieved rows are rendered one per line as `[Data N] key: value, ...`
//! (bookkeeping keys omitted) and substituted into one of three grounding
//! templates chosen by intent. Requests that skip retrieval use
//! [`NORMAL_SYSTEM_PROMPT`].

use crate::intent::{ExtractedQuery, Operator, QueryIntent};
use crate::models::{SourceDocument, BOOKKEEPING_KEYS};

pub const RAG_SYSTEM_PROMPT: &str = "Kamu adalah asisten AI yang menjawab pertanyaan berdasarkan DATA yang diberikan.

ATURAN:
1. Jawab HANYA dari data pada konteks di bawah.
2. Jika tidak ada data yang relevan, katakan \"Maaf, saya tidak menemukan data yang relevan untuk pertanyaan ini.\"
3. JANGAN mengarang informasi yang tidak ada di data.
4. Untuk perhitungan atau perbandingan, pakai HANYA data yang tersedia.
5. Jawab dalam bahasa Indonesia yang sopan, jelas, dan ringkas.
6. Jika beberapa data relevan, sebutkan semuanya.

DATA YANG TERSEDIA:
{context}

Jawab pertanyaan pengguna dengan akurat berdasarkan data di atas.";

pub const SUPERLATIVE_SYSTEM_PROMPT: &str = "Kamu adalah asisten AI yang menjawab pertanyaan berdasarkan DATA yang diberikan.

INSTRUKSI KHUSUS:
- Pengguna menanyakan item dengan {attribute} {operator}.
- Data sudah diurutkan, item pertama adalah yang paling sesuai.
- Sebutkan item pertama sebagai jawaban utama.
- Sebutkan juga alternatif lain jika ada.

DATA YANG TERSEDIA (sudah diurutkan):
{context}

Jawab dengan menyebutkan item yang memenuhi kriteria \"{attribute} {operator}\".";

pub const BUDGET_SYSTEM_PROMPT: &str = "Kamu adalah asisten AI yang menjawab pertanyaan berdasarkan DATA yang diberikan.

INSTRUKSI KHUSUS:
- Pengguna mencari produk dengan harga {operator} {value}.
- Data sudah difilter sesuai budget tersebut.
- Tampilkan semua pilihan yang masuk budget.
- Sebutkan nama produk beserta harganya.
- Urutkan dari yang paling relevan.

DATA YANG TERSEDIA (sudah difilter sesuai budget):
{context}

Jawab dengan menyebutkan produk yang sesuai budget pengguna.";

pub const NORMAL_SYSTEM_PROMPT: &str =
    "Kamu adalah asisten AI yang ramah dan membantu. Jawab dalam bahasa Indonesia yang sopan dan jelas.";

/// `[Data 1] nama_produk: Laptop A, harga: 7000000` per document.
pub fn format_context(documents: &[SourceDocument]) -> String {
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let fields = doc
                .metadata
                .iter()
                .filter(|(key, _)| !BOOKKEEPING_KEYS.contains(key))
                .map(|(key, value)| format!("{}: {}", key, value))
                .collect::<Vec<_>>()
                .join(", ");
            format!("[Data {}] {}", i + 1, fields)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Human form of a budget: `7000000` → `"7 juta"`, `150000` → `"150 ribu"`.
pub fn format_budget_value(value: f64) -> String {
    if value >= 1_000_000.0 {
        format!("{} juta", (value / 1_000_000.0).round())
    } else if value >= 1_000.0 {
        format!("{} ribu", (value / 1_000.0).round())
    } else {
        crate::models::MetadataValue::Number(value).to_string()
    }
}

/// Pick and fill the system prompt for a grounded answer.
///
/// `{context}` is filled last so row values are never treated as placeholders.
pub fn build_system_prompt(intent: &ExtractedQuery, context: &str) -> String {
    match (intent.intent, intent.attribute.as_deref(), intent.operator, intent.value) {
        (QueryIntent::SuperlativeQuery, Some(attribute), Some(op), _) => {
            let direction = if op == Operator::Min {
                "terendah"
            } else {
                "tertinggi"
            };
            SUPERLATIVE_SYSTEM_PROMPT
                .replace("{operator}", direction)
                .replace("{attribute}", attribute)
                .replace("{context}", context)
        }
        (QueryIntent::BudgetQuery, _, op, Some(value)) if value != 0.0 => {
            let direction = if op == Some(Operator::Lte) {
                "maksimal"
            } else {
                "minimal"
            };
            BUDGET_SYSTEM_PROMPT
                .replace("{operator}", direction)
                .replace("{value}", &format_budget_value(value))
                .replace("{context}", context)
        }
        _ => RAG_SYSTEM_PROMPT.replace("{context}", context),
    }
}

/// Render the context block and the matching system prompt.
pub fn assemble(intent: &ExtractedQuery, documents: &[SourceDocument]) -> (String, String) {
    let context = format_context(documents);
    let system_prompt = build_system_prompt(intent, &context);
    (context, system_prompt)
}
