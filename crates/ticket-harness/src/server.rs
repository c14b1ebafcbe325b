//! JSON HTTP server.
//!
//! Exposes retrieval and answer generation to other tools over HTTP.
//!
//! # Endpoints
//!
//! | Method | Path | Body | Returns |
//! |--------|------|------|---------|
//! | `GET`  | `/health` | | status and version |
//! | `POST` | `/tools/search` | `{"query", "limit"?, "explain"?}` | fused results |
//! | `POST` | `/tools/context` | `{"query", "max_chunks"?}` | context block |
//! | `POST` | `/tools/ask` | `{"question", "max_chunks"?}` | generated answer |
//!
//! # Errors
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `generation_disabled` | 400 |
//! | `source_unavailable` | 503 |
//! | `embedding_unavailable` | 503 |
//! | `generation_failed` | 502 |
//!
//! CORS allows any origin, method and header.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use ticket_harness_core::search::SearchParams;
use ticket_harness_core::RetrievalError;

use crate::config::Config;
use crate::generate::{create_generator, Generator, UNAVAILABLE_MESSAGE};
use crate::search::Retriever;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    retriever: Arc<Retriever>,
    generator: Option<Arc<Generator>>,
}

impl AppState {
    pub fn new(config: Config, retriever: Retriever, generator: Option<Generator>) -> Self {
        Self {
            config: Arc::new(config),
            retriever: Arc::new(retriever),
            generator: generator.map(Arc::new),
        }
    }

    fn params(&self) -> SearchParams {
        self.config.retrieval.search_params()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tools/search", post(handle_search))
        .route("/tools/context", post(handle_context))
        .route("/tools/ask", post(handle_ask))
        .layer(cors)
        .with_state(state)
}

/// `tkt serve`: bind `[server].bind` and serve until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let retriever = Retriever::open(config).await?;
    let generator = create_generator(&config.generation)?;
    let state = AppState::new(config.clone(), retriever, generator);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
    println!("Listening on http://{}", bind_addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Errors ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }
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

impl From<RetrievalError> for AppError {
    fn from(err: RetrievalError) -> Self {
        match &err {
            RetrievalError::SourceUnavailable(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "source_unavailable",
                err.to_string(),
            ),
            RetrievalError::Embedding(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "embedding_unavailable",
                err.to_string(),
            ),
            RetrievalError::InvalidParams(_) => Self::bad_request(err.to_string()),
        }
    }
}

fn require_text(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::bad_request(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn positive(field: &str, value: Option<usize>) -> Result<Option<usize>, AppError> {
    match value {
        Some(0) => Err(AppError::bad_request(format!("{} must be >= 1", field))),
        other => Ok(other),
    }
}

// ============ Handlers ============

async fn handle_health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub explain: bool,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<Value>, AppError> {
    require_text("query", &req.query)?;
    let mut params = state.params();
    if let Some(limit) = positive("limit", req.limit)? {
        params.final_limit = limit;
    }

    let ranked = state.retriever.search(&req.query, &params).await?;
    let mut body = json!({
        "results": ranked.results,
        "lexical_only": ranked.lexical_only,
    });
    if req.explain {
        body["explain"] = json!(ranked.explain());
    }
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct ContextRequest {
    pub query: String,
    #[serde(default)]
    pub max_chunks: Option<usize>,
}

async fn handle_context(
    State(state): State<AppState>,
    Json(req): Json<ContextRequest>,
) -> Result<Json<Value>, AppError> {
    require_text("query", &req.query)?;
    let mut params = state.params();
    if let Some(max_chunks) = positive("max_chunks", req.max_chunks)? {
        params.max_chunks = max_chunks;
    }

    let (ranked, context) = state.retriever.context(&req.query, &params).await?;
    let sources: Vec<&str> = ranked
        .results
        .iter()
        .map(|r| r.fragment_id.as_str())
        .collect();
    Ok(Json(json!({
        "context": context,
        "sources": sources,
    })))
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub max_chunks: Option<usize>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<Value>, AppError> {
    require_text("question", &req.question)?;
    let generator = state.generator.clone().ok_or_else(|| {
        AppError::new(
            StatusCode::BAD_REQUEST,
            "generation_disabled",
            "answer generation is disabled; set [generation] provider in config",
        )
    })?;
    let mut params = state.params();
    if let Some(max_chunks) = positive("max_chunks", req.max_chunks)? {
        params.max_chunks = max_chunks;
    }

    let (_, context) = state.retriever.context(&req.question, &params).await?;
    let answer = generator
        .answer(&context, &req.question)
        .await
        .map_err(|e| {
            warn!(model = generator.model(), error = %e, "answer generation failed");
            AppError::new(StatusCode::BAD_GATEWAY, "generation_failed", UNAVAILABLE_MESSAGE)
        })?;

    Ok(Json(json!({
        "answer": answer,
        "context": context,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::ingest::{Ingestor, TicketRecord};
    use crate::migrate::apply_schema;
    use crate::sqlite_store::SqliteFragmentStore;

    async fn state_with_tickets(dir: &tempfile::TempDir) -> AppState {
        let db_path = dir.path().join("tickets.sqlite");
        let config = parse_config(&format!("[db]\npath = {:?}\n", db_path)).unwrap();
        let pool = crate::db::connect(&config).await.unwrap();
        apply_schema(&pool).await.unwrap();
        let store = SqliteFragmentStore::new(pool);

        let mut t1 = TicketRecord::default();
        t1.set("issue_key", "INC-1".into());
        t1.set("title", "VPN disconnects every hour".into());
        t1.set("resolution", "Renewed the VPN certificate".into());
        let mut t2 = TicketRecord::default();
        t2.set("issue_key", "INC-2".into());
        t2.set("title", "Printer jams on tray two".into());
        let mut t3 = TicketRecord::default();
        t3.set("issue_key", "INC-3".into());
        t3.set("title", "Mailbox quota exceeded".into());

        Ingestor::new(&store, None)
            .ingest_tickets(&[t1, t2, t3], "test")
            .await
            .unwrap();

        AppState::new(config, Retriever::new(store, None), None)
    }

    #[tokio::test]
    async fn search_returns_ranked_fragments() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_tickets(&dir).await;
        let req = SearchRequest {
            query: "vpn disconnects".into(),
            limit: None,
            explain: true,
        };
        let Json(body) = handle_search(State(state), Json(req)).await.unwrap();
        assert_eq!(body["results"][0]["document_key"], "INC-1");
        assert_eq!(body["lexical_only"], true);
        assert!(body["explain"].is_array());
    }

    #[tokio::test]
    async fn empty_query_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_tickets(&dir).await;
        let req = ContextRequest {
            query: "  ".into(),
            max_chunks: None,
        };
        let err = handle_context(State(state), Json(req)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "bad_request");
    }

    #[tokio::test]
    async fn context_lists_its_sources() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_tickets(&dir).await;
        let req = ContextRequest {
            query: "vpn certificate".into(),
            max_chunks: Some(1),
        };
        let Json(body) = handle_context(State(state), Json(req)).await.unwrap();
        let context = body["context"].as_str().unwrap();
        assert!(context.starts_with("Ticket: INC-1\nSection: resolution"));
        assert!(body["sources"].as_array().unwrap().len() >= 1);
    }

    #[tokio::test]
    async fn ask_without_generator_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_tickets(&dir).await;
        let req = AskRequest {
            question: "How do I fix the VPN?".into(),
            max_chunks: None,
        };
        let err = handle_ask(State(state), Json(req)).await.unwrap_err();
        assert_eq!(err.code, "generation_disabled");
    }

    #[test]
    fn retrieval_errors_map_to_service_unavailable() {
        let err: AppError =
            RetrievalError::source_unavailable(anyhow::anyhow!("database is locked")).into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code, "source_unavailable");

        let err: AppError = RetrievalError::embedding(anyhow::anyhow!("timeout")).into();
        assert_eq!(err.code, "embedding_unavailable");
    }
}
