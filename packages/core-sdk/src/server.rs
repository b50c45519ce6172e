use std::{sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::{
    db,
    drafting::{self, DraftField},
    error::AiError,
    json_extract,
    llm::{backend_order, AiClient, ChatOptions},
    models::{ChatMessage, Facts},
    sanitize,
};

const DEFAULT_DRAFT_LIMIT: usize = 20;

/**
 * \brief Shared handler state: one client built from the resolved config.
 */
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<AiClient>,
    /** \brief Persist drafts produced through the API. */
    pub store_drafts: bool,
}

/**
 * \brief Start the HTTP API.
 * \param addr listen address, e.g. "127.0.0.1:8088"
 */
pub async fn run(addr: &str, client: AiClient) -> Result<()> {
    let app = router(AppState {
        client: Arc::new(client),
        store_drafts: true,
    });
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/ai/chat", post(chat))
        .route("/api/ai/sanitize", post(sanitize_text))
        .route("/api/ai/parse-json", post(parse_json))
        .route("/api/ai/draft/{field}", post(draft_field))
        .route("/api/drafts", get(list_drafts))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/**
 * \brief Error body `{ "error": ... }` with a status derived from the cause.
 */
#[derive(Debug)]
pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

impl From<AiError> for ApiError {
    fn from(e: AiError) -> Self {
        let status = match &e {
            AiError::AllBackendsFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AiError::Json(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::BAD_GATEWAY,
        };
        ApiError(status, e.to_string())
    }
}

fn internal_err<E: std::fmt::Display>(e: E) -> ApiError {
    tracing::error!(error = %e, "request failed");
    ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[derive(Serialize, Debug)]
struct HealthResponse {
    backend_order: Vec<&'static str>,
    preference: String,
    remote_configured: bool,
    local_reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    local_error: Option<String>,
}

/**
 * \brief Report the backend order and whether the local server answers its probe.
 */
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let config = state.client.config();
    let probe = state.client.probe_local().await;
    Json(HealthResponse {
        backend_order: backend_order(config).into_iter().map(|k| k.name()).collect(),
        preference: config.preference.to_string(),
        remote_configured: config.has_remote_credential(),
        local_reachable: probe.is_ok(),
        local_error: probe.err().map(|e| e.to_string()),
    })
}

#[derive(Deserialize, Debug)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
    #[serde(default)]
    system: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<crate::llm::ChatReply>, ApiError> {
    let options = ChatOptions {
        system: req.system,
        model: req.model,
        temperature: req.temperature,
        timeout: req.timeout_secs.map(Duration::from_secs),
    };
    let reply = state.client.chat_detailed(&req.messages, &options).await?;
    Ok(Json(reply))
}

#[derive(Deserialize, Debug)]
struct SanitizeRequest {
    text: String,
    #[serde(default)]
    facts: Facts,
}

#[derive(Serialize, Debug)]
struct SanitizeResponse {
    text: String,
    redacted: bool,
    sources_removed: usize,
    numbers_removed: usize,
}

async fn sanitize_text(Json(req): Json<SanitizeRequest>) -> Json<SanitizeResponse> {
    let report = sanitize::sanitize_with_report(&req.text, &req.facts);
    Json(SanitizeResponse {
        redacted: report.redacted(),
        text: report.text,
        sources_removed: report.sources_removed,
        numbers_removed: report.numbers_removed,
    })
}

#[derive(Deserialize, Debug)]
struct ParseJsonRequest {
    text: String,
}

async fn parse_json(Json(req): Json<ParseJsonRequest>) -> Result<Json<Value>, ApiError> {
    Ok(Json(json_extract::parse_model_json(&req.text)?))
}

#[derive(Deserialize, Debug)]
struct DraftRequest {
    facts: Facts,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
}

#[derive(Serialize, Debug)]
struct DraftResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    #[serde(flatten)]
    draft: drafting::Draft,
}

/**
 * \brief Draft one report field and record it in draft history.
 */
async fn draft_field(
    State(state): State<AppState>,
    Path(field): Path<String>,
    Json(req): Json<DraftRequest>,
) -> Result<Json<DraftResponse>, ApiError> {
    let field: DraftField = field.parse()?;
    let options = ChatOptions {
        model: req.model,
        temperature: req.temperature,
        ..Default::default()
    };
    let draft = drafting::draft(&state.client, field, &req.facts, &options).await?;

    let id = if state.store_drafts {
        let conn = db::open_default_db().map_err(internal_err)?;
        db::migrate(&conn).map_err(internal_err)?;
        Some(db::insert_draft(&conn, &draft, &req.facts).map_err(internal_err)?)
    } else {
        None
    };
    Ok(Json(DraftResponse { id, draft }))
}

#[derive(Deserialize, Debug)]
struct DraftListQuery {
    field: Option<String>,
    limit: Option<usize>,
}

async fn list_drafts(
    Query(q): Query<DraftListQuery>,
) -> Result<Json<Vec<db::StoredDraft>>, ApiError> {
    let field = match q.field.as_deref() {
        Some(f) => Some(f.parse::<DraftField>()?),
        None => None,
    };
    let conn = db::open_default_db().map_err(internal_err)?;
    db::migrate(&conn).map_err(internal_err)?;
    let drafts = db::list_drafts(&conn, field, q.limit.unwrap_or(DEFAULT_DRAFT_LIMIT))
        .map_err(internal_err)?;
    Ok(Json(drafts))
}
