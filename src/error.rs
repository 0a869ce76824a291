use thiserror::Error;

/// Failures that callers are expected to branch on.
///
/// Each variant carries a stable machine-readable [`code`](RagError::code)
/// that ends up in the `error` field of the public response envelopes.
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Belum ada data yang di-embed")]
    NoEmbeddedData,

    #[error("File tidak ditemukan: {0}")]
    FileNotFound(String),

    #[error("File tidak memiliki data")]
    NoData,

    #[error("Tidak ada kolom teks yang bisa di-embed")]
    NoTextColumns {
        text_columns: Vec<String>,
        number_columns: Vec<String>,
    },

    #[error("Model service unreachable: {0}")]
    Upstream(String),

    #[error("Vector store error: {0}")]
    Store(String),
}

impl RagError {
    pub fn code(&self) -> &'static str {
        match self {
            RagError::NoEmbeddedData => "NO_EMBEDDED_DATA",
            RagError::FileNotFound(_) => "FILE_NOT_FOUND",
            RagError::NoData => "NO_DATA",
            RagError::NoTextColumns { .. } => "NO_TEXT_COLUMNS",
            RagError::Upstream(_) => "UPSTREAM_UNAVAILABLE",
            RagError::Store(_) => "STORE_ERROR",
        }
    }
}

/// Find the first [`RagError`] in an `anyhow` error chain.
pub fn find_rag_error(err: &anyhow::Error) -> Option<&RagError> {
    err.chain().find_map(|cause| cause.downcast_ref::<RagError>())
}

/// Machine code for any error: the typed code if one is in the chain,
/// otherwise the error's display text.
pub fn error_code(err: &anyhow::Error) -> String {
    match find_rag_error(err) {
        Some(rag) => rag.code().to_string(),
        None => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_code_survives_context() {
        let err: anyhow::Result<()> = Err(RagError::NoEmbeddedData.into());
        let err = err.context("hybrid search").unwrap_err();
        assert_eq!(error_code(&err), "NO_EMBEDDED_DATA");
    }

    #[test]
    fn test_untyped_error_uses_message() {
        let err = anyhow::anyhow!("boom");
        assert!(find_rag_error(&err).is_none());
        assert_eq!(error_code(&err), "boom");
    }
}
