use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rusqlite::Connection;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::api::{self, ApiError, CharacterUpdate, SpellQuery, StatusUpdate};
use crate::db::{self, CharacterProfile, SpellView};

#[derive(Clone)]
struct AppState {
    db_path: Arc<PathBuf>,
}

impl AppState {
    /// Runs `f` on the blocking pool with a fresh connection, closed when `f` returns.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, ApiError> + Send + 'static,
    {
        let db_path = Arc::clone(&self.db_path);
        tokio::task::spawn_blocking(move || -> Result<T, ApiError> {
            let conn = db::open(&db_path)?;
            f(&conn)
        })
        .await
        .map_err(|e| ApiError::Task(e.to_string()))?
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::LevelOutOfRange(_) | ApiError::MissingField(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownSpell(_) => StatusCode::NOT_FOUND,
            ApiError::Storage(_) | ApiError::Task(_) => {
                error!("Storage error: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.code() }))).into_response()
    }
}

pub fn router(db_path: PathBuf) -> Router {
    let state = AppState {
        db_path: Arc::new(db_path),
    };
    Router::new()
        .route("/api/character", get(get_character).post(post_character))
        .route("/api/status", post(post_status))
        .route("/api/spells", get(get_spells))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, db_path: PathBuf) -> anyhow::Result<()> {
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(db_path)).await?;
    Ok(())
}

/// Malformed or missing JSON bodies read as `null`, so every field is absent.
fn json_body(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap_or(Value::Null)
}

async fn get_character(State(state): State<AppState>) -> Result<Json<CharacterProfile>, ApiError> {
    Ok(Json(state.with_conn(api::get_character).await?))
}

async fn post_character(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CharacterProfile>, ApiError> {
    let update = CharacterUpdate::from_json(&json_body(&body));
    let profile = state
        .with_conn(move |conn| api::save_character(conn, update))
        .await?;
    Ok(Json(profile))
}

async fn post_status(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let update = StatusUpdate::from_json(&json_body(&body));
    state
        .with_conn(move |conn| api::save_status(conn, update))
        .await?;
    Ok(Json(json!({ "ok": true })))
}

async fn get_spells(
    State(state): State<AppState>,
    Query(query): Query<SpellQuery>,
) -> Result<Json<Vec<SpellView>>, ApiError> {
    let spells = state
        .with_conn(move |conn| api::list_spells(conn, query))
        .await?;
    Ok(Json(spells))
}

// ── Tests ──
