//! HTTP surface
//!
//! Thin axum dispatcher over the pipeline; all routes live under
//! `/api/v1/timeline`. Failures map to a stable machine-readable kind plus
//! a human message and never leak stack traces.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::chain;
use crate::error::TimelineError;
use crate::pipeline::Pipeline;
use crate::storage::{chunks, messages};

/// Shared application state
pub type AppState = Arc<Pipeline>;

/// Build the API router
pub fn router(pipeline: AppState) -> Router {
    Router::new()
        .nest("/api/v1/timeline", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(pipeline)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/chat", post(chat))
        .route("/chat/simple", post(chat_simple))
        .route("/conversation/:session_id", get(conversation))
        .route("/session/:session_id", get(session_messages))
        .route("/messages", get(all_messages))
        .route("/chain/validate/:session_id", get(chain_validate))
        .route("/chain/repair/:session_id", post(chain_repair))
        .route("/search/similar", post(search_similar))
        .route("/search/similar/global", post(search_similar_global))
        .route("/search/threshold/:session_id", post(search_threshold))
        .route("/chunks/message/:id", get(chunks_by_message))
        .route("/chunks/session/:id", get(chunks_by_session))
        .route("/vector/statistics", get(vector_statistics))
        .route("/vector/process", post(vector_process))
        .route("/vector/reprocess/:session_id", post(vector_reprocess))
        .route("/phase6/context/:session_id", get(window_context))
        .route("/phase6/history/:session_id", delete(window_clear))
        .route("/health", get(health))
}

/// Error wrapper carrying the HTTP mapping
pub struct ApiError(TimelineError);

impl From<TimelineError> for ApiError {
    fn from(e: TimelineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            "BAD_INPUT" | "DUPLICATE" | "PROMPT_OVERFLOW" => StatusCode::BAD_REQUEST,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(kind, error = %self.0, "request failed");
        }
        let body = json!({
            "error": {
                "kind": kind,
                "message": self.0.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct ChatParams {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "includePrompt", default)]
    include_prompt: bool,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
}

async fn chat(
    State(pipeline): State<AppState>,
    Query(params): Query<ChatParams>,
    Json(body): Json<ChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = pipeline
        .handle_user_turn(&params.session_id, &body.message, params.include_prompt)
        .await?;
    Ok(Json(outcome))
}

async fn chat_simple(
    State(pipeline): State<AppState>,
    Query(params): Query<ChatParams>,
    Json(body): Json<ChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = pipeline
        .simple_chat(&params.session_id, &body.message)
        .await?;
    Ok(Json(outcome))
}

async fn conversation(
    State(pipeline): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let ordered = pipeline
        .storage()
        .with_connection(|conn| chain::traverse(conn, &session_id))?;
    Ok(Json(ordered))
}

async fn session_messages(
    State(pipeline): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let ordered = pipeline
        .storage()
        .with_connection(|conn| messages::list_by_session_chrono(conn, &session_id))?;
    Ok(Json(ordered))
}

async fn all_messages(State(pipeline): State<AppState>) -> ApiResult<impl IntoResponse> {
    let all = pipeline
        .storage()
        .with_connection(|conn| messages::list_all(conn))?;
    Ok(Json(all))
}

async fn chain_validate(
    State(pipeline): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let report = pipeline
        .storage()
        .with_connection(|conn| chain::validate(conn, &session_id))?;
    Ok(Json(report))
}

async fn chain_repair(
    State(pipeline): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let outcome = pipeline
        .storage()
        .with_connection(|conn| chain::repair(conn, &session_id))?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct SessionParam {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ThresholdRequest {
    query: String,
    threshold: f32,
}

const DEFAULT_SEARCH_LIMIT: usize = 10;

async fn search_similar(
    State(pipeline): State<AppState>,
    Query(params): Query<SessionParam>,
    Json(body): Json<SearchRequest>,
) -> ApiResult<impl IntoResponse> {
    let hits = pipeline
        .search_similar(
            Some(&params.session_id),
            &body.query,
            body.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
        )
        .await?;
    Ok(Json(hits))
}

async fn search_similar_global(
    State(pipeline): State<AppState>,
    Json(body): Json<SearchRequest>,
) -> ApiResult<impl IntoResponse> {
    let hits = pipeline
        .search_similar(None, &body.query, body.limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
        .await?;
    Ok(Json(hits))
}

async fn search_threshold(
    State(pipeline): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<ThresholdRequest>,
) -> ApiResult<impl IntoResponse> {
    let hits = pipeline
        .search_threshold(&session_id, &body.query, body.threshold)
        .await?;
    Ok(Json(hits))
}

async fn chunks_by_message(
    State(pipeline): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let rows = pipeline
        .storage()
        .with_connection(|conn| chunks::get_by_message(conn, &id))?;
    Ok(Json(rows))
}

async fn chunks_by_session(
    State(pipeline): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let rows = pipeline
        .storage()
        .with_connection(|conn| chunks::list_by_session(conn, &id))?;
    Ok(Json(rows))
}

async fn vector_statistics(State(pipeline): State<AppState>) -> ApiResult<impl IntoResponse> {
    let stats = pipeline
        .storage()
        .with_connection(|conn| chunks::statistics(conn))?;
    Ok(Json(stats))
}

async fn vector_process(State(pipeline): State<AppState>) -> ApiResult<impl IntoResponse> {
    let queued = pipeline.process_unindexed().await?;
    Ok(Json(json!({ "queued": queued })))
}

async fn vector_reprocess(
    State(pipeline): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let report = pipeline.reprocess_session(&session_id).await?;
    Ok(Json(report))
}

async fn window_context(
    State(pipeline): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let context = pipeline.window().context(&session_id).await;
    Ok(Json(context))
}

async fn window_clear(
    State(pipeline): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    pipeline.window().clear(&session_id);
    Ok(Json(json!({ "cleared": session_id })))
}

async fn health(State(pipeline): State<AppState>) -> impl IntoResponse {
    let (embedder, completer) = pipeline.backends();
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "features": {
            "embedding_backend": embedder,
            "completion_backend": completer,
            "retrieval_strategy": pipeline.config().context.strategy,
            "prompt_format": pipeline.config().prompt.format,
        }
    }))
}
