use anyhow::Result;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use transcript_analyzer_pipeline::{
    parser, GatewayClient, GatewayConfig, Orchestrator, SqliteStore,
};
use transcript_analyzer_schemas::{AnalysisKind, ConversationId, ALL_EVENT_TYPES};

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Transcript Analyzer Service v0.1.0");

    let db_path = std::env::var("DB_PATH").unwrap_or_else(|_| "transcripts.db".to_string());

    // Create directory if it doesn't exist
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let store = SqliteStore::new(&db_path)?;
    info!("Conversation store at: {}", db_path);

    let model = GatewayClient::new(GatewayConfig::from_env())?;

    let orchestrator = Arc::new(Orchestrator::new(Box::new(store), Arc::new(model)));
    if let Err(e) = orchestrator.reload().await {
        error!("Initial load failed, starting with an empty cache: {}", e);
    }

    let state = AppState { orchestrator };

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/conversations", get(list_conversations).post(submit_conversation))
        .route("/conversations/:id", delete(delete_conversation))
        .route("/conversations/:id/analyses/:kind", get(get_analysis).post(rerun_analysis))
        .route("/memory/events", get(aggregated_events))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:21870".to_string());
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "transcript-analyzer",
        "status": "healthy",
        "version": "0.1.0"
    }))
}

async fn list_conversations(State(state): State<AppState>) -> impl IntoResponse {
    let conversations = state.orchestrator.conversations().await;
    Json(serde_json::json!({ "conversations": conversations }))
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    transcript: String,
    name: String,
    conversation_date: String,
}

async fn submit_conversation(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if request.transcript.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "transcript must not be empty".to_string()));
    }
    if request.name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "name must not be empty".to_string()));
    }
    if NaiveDate::parse_from_str(&request.conversation_date, "%Y-%m-%d").is_err() {
        return Err((
            StatusCode::BAD_REQUEST,
            "conversation_date must be a YYYY-MM-DD date".to_string(),
        ));
    }

    let outcome = state
        .orchestrator
        .submit(&request.transcript, &request.name, &request.conversation_date)
        .await
        .map_err(|e| {
            error!("Failed to submit transcript: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    Ok(Json(outcome))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let id = ConversationId(id);
    state.orchestrator.delete(&id).await.map_err(|e| {
        error!("Failed to delete conversation {}: {}", id, e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok(Json(serde_json::json!({ "deleted": id.0 })))
}

/// Lazily parse one stored analysis for display. Parse failures are a view
/// concern: the response carries the raw text, never a server error.
async fn get_analysis(
    State(state): State<AppState>,
    Path((id, kind)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let kind = AnalysisKind::parse(&kind)
        .ok_or((StatusCode::BAD_REQUEST, format!("unknown analysis kind: {kind}")))?;

    let id = ConversationId(id);
    let conversation = state
        .orchestrator
        .conversation(&id)
        .await
        .ok_or((StatusCode::NOT_FOUND, "conversation not found".to_string()))?;

    let raw = conversation.analysis_text(kind);
    let body = match kind {
        AnalysisKind::Memory => match parser::parse_memory(raw) {
            Ok(events) => serde_json::json!({ "kind": "memory", "events": events }),
            Err(e) => serde_json::json!({ "kind": "memory", "error": e.reason, "raw": e.raw }),
        },
        AnalysisKind::Language => match parser::parse_language(raw) {
            Ok(analysis) => serde_json::json!({ "kind": "language", "analysis": analysis }),
            Err(e) => serde_json::json!({ "kind": "language", "error": e.reason, "raw": e.raw }),
        },
    };

    Ok(Json(body))
}

async fn rerun_analysis(
    State(state): State<AppState>,
    Path((id, kind)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let kind = AnalysisKind::parse(&kind)
        .ok_or((StatusCode::BAD_REQUEST, format!("unknown analysis kind: {kind}")))?;

    let id = ConversationId(id);
    let analysis_state = state
        .orchestrator
        .rerun(&id, kind)
        .await
        .ok_or((StatusCode::NOT_FOUND, "conversation not found".to_string()))?;

    Ok(Json(serde_json::json!({
        "id": id.0,
        "kind": kind.as_str(),
        "state": analysis_state
    })))
}

#[derive(Debug, Default, Deserialize)]
struct AggregateQuery {
    r#type: Option<String>,
}

async fn aggregated_events(
    State(state): State<AppState>,
    query: Option<Query<AggregateQuery>>,
) -> impl IntoResponse {
    let params = query.map(|q| q.0).unwrap_or_default();
    let selected = params.r#type.unwrap_or_else(|| ALL_EVENT_TYPES.to_string());

    let view = state.orchestrator.aggregate(&selected).await;
    Json(view)
}
