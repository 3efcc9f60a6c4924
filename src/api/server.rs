use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::session::{
    apply_edit_handler, auto_enhance_handler, begin_area_handler, begin_crop_handler,
    cancel_area_handler, cancel_crop_handler, complete_crop_handler, get_session_handler,
    reset_handler, set_area_handler, set_instruction_handler, set_replacement_handler,
    toggle_element_handler, upload_image_handler,
};
use crate::config::{EditorConfig, DEFAULT_MAX_BODY_BYTES};
use crate::imaging::StdImageCodec;
use crate::pipeline::gemini::GeminiEditService;
use crate::pipeline::orchestrator::EditOrchestrator;
use crate::session::editor::EditorSession;
use crate::session::store::{PersistenceError, SqliteSessionStore};

#[derive(Clone)]
pub struct AppState {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub started_unix_ms: u128,
    pub editor: Arc<EditorSession>,
}

impl AppState {
    pub fn new(editor: Arc<EditorSession>) -> Self {
        Self {
            service_name: "thumbnail-editor-core",
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            editor,
        }
    }
}

/// Wires the Gemini service, the image codec and the SQLite snapshot store.
pub fn build_editor_session(config: &EditorConfig) -> Result<EditorSession, PersistenceError> {
    let store = SqliteSessionStore::new(config.db_path.as_path())
        .with_max_bytes(config.snapshot_max_bytes);
    store.initialize()?;
    if config.gemini.api_key.is_none() {
        warn!("no Gemini API key configured; AI requests will fail until GEMINI_API_KEY is set");
    }
    let orchestrator = EditOrchestrator::new(
        Arc::new(GeminiEditService::new(config.gemini.clone())),
        Arc::new(StdImageCodec),
    )
    .with_keying_timeout(config.keying_timeout);
    Ok(EditorSession::new(orchestrator, Arc::new(store)))
}

pub fn build_router_with_session(editor: Arc<EditorSession>) -> Router {
    build_router_with_body_limit(editor, DEFAULT_MAX_BODY_BYTES)
}

/// Same routes with request bodies capped at `max_body_bytes`. Larger
/// bodies are refused with 413 before any handler runs.
pub fn build_router_with_body_limit(editor: Arc<EditorSession>, max_body_bytes: usize) -> Router {
    let state = AppState::new(editor);
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/session", get(get_session_handler))
        .route("/api/session/upload", post(upload_image_handler))
        .route("/api/session/crop/begin", post(begin_crop_handler))
        .route("/api/session/crop/cancel", post(cancel_crop_handler))
        .route("/api/session/crop/complete", post(complete_crop_handler))
        .route("/api/session/area/begin", post(begin_area_handler))
        .route("/api/session/area/cancel", post(cancel_area_handler))
        .route("/api/session/area", put(set_area_handler))
        .route("/api/session/elements/toggle", post(toggle_element_handler))
        .route("/api/session/instruction", put(set_instruction_handler))
        .route("/api/session/replacement", put(set_replacement_handler))
        .route("/api/session/edit", post(apply_edit_handler))
        .route("/api/session/enhance", post(auto_enhance_handler))
        .route("/api/session/reset", post(reset_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, config: EditorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let editor = Arc::new(build_editor_session(&config)?);
    if let Err(error) = editor.restore().await {
        warn!(error = %error, "could not restore the previous session");
    }
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = build_router_with_body_limit(editor, config.max_body_bytes);
    info!(
        bind = %addr,
        db = %config.db_path.display(),
        max_body_bytes = config.max_body_bytes,
        "starting thumbnail-editor-core HTTP surface"
    );
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let view = state.editor.view();
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "status": "ok",
            "service": state.service_name,
            "version": state.service_version,
            "started_unix_ms": state.started_unix_ms,
            "session_phase": view.phase,
        })),
    )
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}
