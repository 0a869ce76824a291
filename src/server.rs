//! HTTP server.
//!
//! Exposes the pipeline as a small JSON API for the chat UI and the upload
//! subsystem.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `GET`    | `/status` | Whether any data has been embedded |
//! | `POST`   | `/chat` | Answer a message (`RagResponse`) |
//! | `POST`   | `/search` | Hybrid or vector search (`SearchOutcome`) |
//! | `POST`   | `/intent` | Intent extraction only (`ExtractedQuery`) |
//! | `POST`   | `/files/embed` | Embed a parsed upload (`EmbedResult`) |
//! | `DELETE` | `/files/{file_id}/embeddings` | Remove a file's records (`DeleteResult`) |
//!
//! # Error Contract
//!
//! Request and lookup errors use
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! `/search` accepts `limit` in `1..=100`; larger values are capped.
//!
//! Error codes: `bad_request` (400), `no_embedded_data` (404), `internal` (500).
//! `/chat` and `/files/embed` always answer with their own envelope; a failed
//! embed is reported with status 400 (input problems) or 500.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::ingest::{self, DeleteResult, EmbedResult, TabularUpload};
use crate::intent::ExtractedQuery;
use crate::rag::{ChatRequest, RagPipeline, RagResponse};
use crate::search::{self, SearchMode, SearchOutcome};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RagPipeline>,
    pub batch_size: usize,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/chat", post(handle_chat))
        .route("/search", post(handle_search))
        .route("/intent", post(handle_intent))
        .route("/files/embed", post(handle_embed))
        .route("/files/{file_id}/embeddings", delete(handle_delete))
        .layer(cors)
        .with_state(state)
}

/// Bind to `[server] bind` and serve until the process is terminated.
pub async fn run_server(config: &Config, pipeline: Arc<RagPipeline>) -> anyhow::Result<()> {
    let state = AppState {
        pipeline,
        batch_size: config.embedding.batch_size,
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");
    println!("Server listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health, GET /status ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    has_embedded_data: bool,
}

async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let has_embedded_data = search::has_embedded_data(state.pipeline.store().as_ref()).await;
    Json(StatusResponse { has_embedded_data })
}

// ============ POST /chat ============

async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<RagResponse>, AppError> {
    if request.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    Ok(Json(state.pipeline.chat(&request).await))
}

// ============ POST /search ============

fn default_limit() -> usize {
    5
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    file_id: Option<i64>,
    #[serde(default)]
    mode: SearchMode,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchOutcome>, AppError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let limit = search::checked_limit(request.limit).map_err(|e| bad_request(e.to_string()))?;
    let pipeline = &state.pipeline;
    let outcome = search::search(
        pipeline.store().as_ref(),
        pipeline.embedder().as_ref(),
        &request.query,
        limit,
        request.file_id,
        request.mode,
        pipeline.search_params(),
    )
    .await;

    match outcome.error.as_deref() {
        None => Ok(Json(outcome)),
        Some("NO_EMBEDDED_DATA") => Err(AppError {
            status: StatusCode::NOT_FOUND,
            code: "no_embedded_data".to_string(),
            message: "Belum ada data yang di-embed".to_string(),
        }),
        Some(other) => Err(internal(other)),
    }
}

// ============ POST /intent ============

#[derive(Deserialize)]
struct IntentRequest {
    query: String,
}

async fn handle_intent(
    State(state): State<AppState>,
    Json(request): Json<IntentRequest>,
) -> Result<Json<ExtractedQuery>, AppError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    Ok(Json(state.pipeline.extractor().extract(&request.query).await))
}

// ============ POST /files/embed, DELETE /files/{file_id}/embeddings ============

async fn handle_embed(
    State(state): State<AppState>,
    Json(upload): Json<TabularUpload>,
) -> (StatusCode, Json<EmbedResult>) {
    let pipeline = &state.pipeline;
    let result = ingest::embed_upload(
        pipeline.store().as_ref(),
        pipeline.embedder().as_ref(),
        &upload,
        state.batch_size,
    )
    .await;

    let status = match result.error.as_deref() {
        None => StatusCode::OK,
        Some("NO_DATA") | Some("NO_TEXT_COLUMNS") => StatusCode::BAD_REQUEST,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(result))
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(file_id): Path<i64>,
) -> Result<Json<DeleteResult>, AppError> {
    let result = ingest::delete_file_embeddings(state.pipeline.store().as_ref(), file_id).await;
    if result.success {
        Ok(Json(result))
    } else {
        Err(internal(result.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingProvider;
    use crate::generation::{ChatMessage, ChatModel, ChatOptions};
    use crate::store::InMemoryDocumentStore;
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct LetterEmbedder;

    #[async_trait]
    impl EmbeddingProvider for LetterEmbedder {
        fn model_name(&self) -> &str {
            "letters"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let l = t.to_lowercase();
                    vec![l.matches('a').count() as f32, l.matches('o').count() as f32, 1.0]
                })
                .collect())
        }
    }

    struct EchoChat;

    #[async_trait]
    impl ChatModel for EchoChat {
        async fn chat(&self, messages: &[ChatMessage], _options: &ChatOptions) -> Result<String> {
            Ok(format!("jawaban: {}", messages.last().map(|m| m.content.as_str()).unwrap_or("")))
        }
    }

    fn app() -> Router {
        let pipeline = RagPipeline::new(
            &Config::minimal(),
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(LetterEmbedder),
            Arc::new(EchoChat),
        );
        router(AppState {
            pipeline: Arc::new(pipeline),
            batch_size: 16,
        })
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn upload() -> serde_json::Value {
        serde_json::json!({
            "headers": ["nama_produk", "harga"],
            "rows": [
                {"nama_produk": "Laptop Asus", "harga": 7000000},
                {"nama_produk": "Mouse Logitech", "harga": 150000}
            ],
            "fileId": 5,
            "originalName": "produk.csv"
        })
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_search_before_embedding_is_404() {
        let response = app()
            .oneshot(json_request("POST", "/search", serde_json::json!({"query": "laptop"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "no_embedded_data");
    }

    #[tokio::test]
    async fn test_embed_search_delete_flow() {
        let app = app();

        let response = app
            .clone()
            .oneshot(json_request("POST", "/files/embed", upload()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["embeddedCount"], 2);
        assert_eq!(body["numberColumns"][0], "harga");

        let response = app
            .clone()
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["hasEmbeddedData"], true);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/search",
                serde_json::json!({"query": "laptop", "limit": 1, "fileId": 5}),
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["results"][0]["id"], "5_0");

        let response = app
            .oneshot(
                Request::delete("/files/5/embeddings")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["deletedCount"], 2);
    }

    #[tokio::test]
    async fn test_search_limit_bounds() {
        let app = app();
        app.clone()
            .oneshot(json_request("POST", "/files/embed", upload()))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/search",
                serde_json::json!({"query": "laptop", "limit": 0}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "bad_request");

        let response = app
            .oneshot(json_request(
                "POST",
                "/search",
                serde_json::json!({"query": "laptop", "limit": u64::MAX}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_embed_without_text_columns_is_400() {
        let response = app()
            .oneshot(json_request(
                "POST",
                "/files/embed",
                serde_json::json!({
                    "headers": ["harga"],
                    "rows": [{"harga": 1}],
                    "fileId": 1,
                    "originalName": "angka.csv"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "NO_TEXT_COLUMNS");
        assert_eq!(body["numberColumns"][0], "harga");
    }

    #[tokio::test]
    async fn test_chat_general_shortcut() {
        let response = app()
            .oneshot(json_request("POST", "/chat", serde_json::json!({"message": "halo"})))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["isRAGUsed"], false);
        assert_eq!(body["message"], "jawaban: halo");
    }

    #[tokio::test]
    async fn test_empty_message_is_bad_request() {
        let response = app()
            .oneshot(json_request("POST", "/chat", serde_json::json!({"message": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_intent_endpoint() {
        let response = app()
            .oneshot(json_request(
                "POST",
                "/intent",
                serde_json::json!({"query": "laptop dengan bajet 7juta"}),
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["intent"], "budget_query");
        assert_eq!(body["value"], 7000000.0);
    }
}
