//! Per-message orchestration.
//!
//! ```text
//! general_chat_shortcut ─────────────────────────────────────────────┐
//! intent_extraction → retrieval → post_processing → prompt_assembly → generation → done
//! ```
//!
//! The shortcut runs when the caller disables retrieval or the message is
//! small talk: one generation call with [`NORMAL_SYSTEM_PROMPT`], no search.
//! On the full path, a retrieval failure or an empty result falls back to the
//! same minimal prompt with `isRAGUsed = false`. [`RagPipeline::chat`] always
//! returns a [`RagResponse`]; only a failed generation call makes it
//! unsuccessful.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{find_rag_error, RagError};
use crate::generation::{ChatMessage, ChatModel, ChatOptions};
use crate::intent::{is_general_chat, ExtractedQuery, IntentExtractor, QueryIntent};
use crate::models::SourceDocument;
use crate::postprocess;
use crate::prompt::{self, NORMAL_SYSTEM_PROMPT};
use crate::search::{self, SearchParams};
use crate::store::DocumentStore;

pub const GENERIC_FAILURE_MESSAGE: &str = "Maaf, terjadi kesalahan saat memproses pertanyaan.";
pub const UPSTREAM_FAILURE_MESSAGE: &str =
    "Tidak dapat terhubung ke Ollama. Pastikan Ollama sedang berjalan.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    GeneralChatShortcut,
    IntentExtraction,
    Retrieval,
    PostProcessing,
    PromptAssembly,
    Generation,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::GeneralChatShortcut => "general_chat_shortcut",
            Stage::IntentExtraction => "intent_extraction",
            Stage::Retrieval => "retrieval",
            Stage::PostProcessing => "post_processing",
            Stage::PromptAssembly => "prompt_assembly",
            Stage::Generation => "generation",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default = "default_true", alias = "use_rag")]
    pub use_rag: bool,
    #[serde(default, alias = "file_id")]
    pub file_id: Option<i64>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            use_rag: true,
            file_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RagResponse {
    pub success: bool,
    pub message: String,
    pub sources: Vec<SourceDocument>,
    #[serde(rename = "isRAGUsed")]
    pub is_rag_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<ExtractedQuery>,
    /// Seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RagResponse {
    fn failure(err: &anyhow::Error) -> Self {
        let message = match find_rag_error(err) {
            Some(RagError::Upstream(_)) => UPSTREAM_FAILURE_MESSAGE,
            _ => GENERIC_FAILURE_MESSAGE,
        };
        Self {
            success: false,
            message: message.to_string(),
            sources: Vec::new(),
            is_rag_used: false,
            intent: None,
            response_time: None,
            error: Some(format!("{:#}", err)),
        }
    }
}

/// Evidence gathered for one message.
struct Grounding {
    sources: Vec<SourceDocument>,
    system_prompt: String,
    is_rag_used: bool,
}

/// Long-lived handles shared by every request.
pub struct RagPipeline {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chat: Arc<dyn ChatModel>,
    extractor: IntentExtractor,
    params: SearchParams,
    answer_options: ChatOptions,
    superlative_fetch: usize,
    budget_fetch: usize,
    default_fetch: usize,
}

impl RagPipeline {
    pub fn new(
        config: &Config,
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            extractor: IntentExtractor::new(chat.clone(), &config.generation),
            params: SearchParams::from_config(&config.retrieval),
            answer_options: ChatOptions {
                model: config.generation.chat_model.clone(),
                temperature: None,
            },
            superlative_fetch: config.retrieval.superlative_fetch,
            budget_fetch: config.retrieval.budget_fetch,
            default_fetch: config.retrieval.default_fetch,
            store,
            embedder,
            chat,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn extractor(&self) -> &IntentExtractor {
        &self.extractor
    }

    pub fn search_params(&self) -> &SearchParams {
        &self.params
    }

    /// Over-fetch size for an intent.
    pub fn fetch_size(&self, intent: QueryIntent) -> usize {
        match intent {
            QueryIntent::BudgetQuery => self.budget_fetch,
            QueryIntent::SuperlativeQuery => self.superlative_fetch,
            _ => self.default_fetch,
        }
    }

    /// Answer one message. Never fails.
    pub async fn chat(&self, request: &ChatRequest) -> RagResponse {
        let started = Instant::now();

        let outcome = if !request.use_rag || is_general_chat(&request.message) {
            debug!(stage = %Stage::GeneralChatShortcut, "skipping retrieval");
            self.generate(NORMAL_SYSTEM_PROMPT, &request.message)
                .await
                .map(|answer| (answer, Vec::new(), false, None))
        } else {
            self.answer_with_retrieval(request).await
        };

        match outcome {
            Ok((message, sources, is_rag_used, intent)) => {
                let elapsed = started.elapsed().as_secs_f64();
                info!(
                    stage = %Stage::Done,
                    sources = sources.len(),
                    is_rag_used,
                    seconds = elapsed,
                    "answered"
                );
                RagResponse {
                    success: true,
                    message,
                    sources,
                    is_rag_used,
                    intent,
                    response_time: Some(elapsed),
                    error: None,
                }
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "chat failed");
                RagResponse::failure(&e)
            }
        }
    }

    async fn answer_with_retrieval(
        &self,
        request: &ChatRequest,
    ) -> Result<(String, Vec<SourceDocument>, bool, Option<ExtractedQuery>)> {
        debug!(stage = %Stage::IntentExtraction, "extracting intent");
        let intent = self.extractor.extract(&request.message).await;
        if let Some(value) = intent.value {
            info!(value, "budget value");
        }

        let grounding = self.ground(&intent, request.file_id).await;
        let answer = self
            .generate(&grounding.system_prompt, &request.message)
            .await?;
        Ok((answer, grounding.sources, grounding.is_rag_used, Some(intent)))
    }

    async fn ground(&self, intent: &ExtractedQuery, file_id: Option<i64>) -> Grounding {
        let query = intent.search_text();
        let limit = self.fetch_size(intent.intent);
        debug!(stage = %Stage::Retrieval, query, limit, "retrieving");

        let results = match search::hybrid_search(
            self.store.as_ref(),
            self.embedder.as_ref(),
            query,
            limit,
            file_id,
            &self.params,
        )
        .await
        {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "retrieval failed, answering without data");
                Vec::new()
            }
        };

        if results.is_empty() {
            return Grounding {
                sources: Vec::new(),
                system_prompt: NORMAL_SYSTEM_PROMPT.to_string(),
                is_rag_used: false,
            };
        }

        debug!(stage = %Stage::PostProcessing, candidates = results.len(), "post-processing");
        let candidates: Vec<SourceDocument> = results.into_iter().map(SourceDocument::from).collect();
        let sources = postprocess::apply(intent, candidates);

        debug!(stage = %Stage::PromptAssembly, sources = sources.len(), "assembling prompt");
        let (_, system_prompt) = prompt::assemble(intent, &sources);

        Grounding {
            sources,
            system_prompt,
            is_rag_used: true,
        }
    }

    async fn generate(&self, system_prompt: &str, message: &str) -> Result<String> {
        debug!(stage = %Stage::Generation, model = %self.answer_options.model, "generating");
        let messages = [ChatMessage::system(system_prompt), ChatMessage::user(message)];
        self.chat
            .chat(&messages, &self.answer_options)
            .await
            .context("Generation failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_defaults() {
        let req: ChatRequest = serde_json::from_str(r#"{"message":"halo"}"#).unwrap();
        assert!(req.use_rag);
        assert_eq!(req.file_id, None);

        let req: ChatRequest =
            serde_json::from_str(r#"{"message":"x","useRag":false,"fileId":4}"#).unwrap();
        assert!(!req.use_rag);
        assert_eq!(req.file_id, Some(4));
    }

    #[test]
    fn test_failure_messages() {
        let upstream: anyhow::Error = RagError::Upstream("refused".into()).into();
        let upstream = upstream.context("Generation failed");
        let response = RagResponse::failure(&upstream);
        assert!(!response.success);
        assert_eq!(response.message, UPSTREAM_FAILURE_MESSAGE);
        assert!(!response.is_rag_used);

        let other = RagResponse::failure(&anyhow::anyhow!("model returned 500"));
        assert_eq!(other.message, GENERIC_FAILURE_MESSAGE);
        assert_eq!(other.error.as_deref(), Some("model returned 500"));
    }

    #[test]
    fn test_response_field_names() {
        let response = RagResponse {
            success: true,
            message: "ok".into(),
            sources: Vec::new(),
            is_rag_used: true,
            intent: None,
            response_time: Some(0.25),
            error: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["isRAGUsed"], true);
        assert_eq!(json["responseTime"], 0.25);
        assert!(json.get("intent").is_none());
    }
}
