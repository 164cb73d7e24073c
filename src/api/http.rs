use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;
use tokio::sync::broadcast::Sender as BroadcastSender;
use tracing::{debug, info};

use crate::store::UpsertOutcome;
use crate::AppState;

const LAMPORT_HEADER: &str = "lamport-clock";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/weather.json", get(get_weather).put(put_weather))
        .layer(Extension(state))
}

pub async fn run(state: Arc<AppState>, shutdown: BroadcastSender<()>) -> anyhow::Result<()> {
    let addr = state.config.listen_addr;
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on http://{addr}");

    let mut shutdown_sub = shutdown.subscribe();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_sub.recv().await;
        })
        .await?;
    Ok(())
}

/// Malformed requests get a synchronous client error, never a silent drop.
#[derive(Debug)]
pub enum ApiError {
    BadRequest { message: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError::BadRequest { message } = self;
        debug!("rejected request: {message}");
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": message })),
        )
            .into_response()
    }
}

fn lamport_header(headers: &HeaderMap) -> Result<u64, ApiError> {
    headers
        .get(LAMPORT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or(ApiError::BadRequest {
            message: "missing or invalid Lamport-Clock header".to_string(),
        })
}

async fn put_weather(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let incoming_clock = lamport_header(&headers)?;

    let payload: Value = serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest {
        message: format!("body is not valid JSON: {e}"),
    })?;

    let station_id = payload
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or(ApiError::BadRequest {
            message: "body is missing a station id".to_string(),
        })?
        .to_string();

    let (outcome, clock) = state.store.upsert(&station_id, payload, incoming_clock);

    let status = match outcome {
        UpsertOutcome::Created => StatusCode::CREATED,
        UpsertOutcome::Updated | UpsertOutcome::Stale => StatusCode::OK,
    };

    if outcome != UpsertOutcome::Stale {
        // Wake the durability worker; a full channel means a checkpoint is
        // already pending, which covers this update too.
        let _ = state.checkpoint_tx.try_send(());
    }

    debug!(station = %station_id, ?outcome, clock, "put handled");

    Ok((
        status,
        [(LAMPORT_HEADER, clock.to_string())],
        Json(serde_json::json!({
            "status": status.as_u16(),
            "lamport_clock": clock,
        })),
    )
        .into_response())
}

async fn get_weather(Extension(state): Extension<Arc<AppState>>) -> Response {
    let clock = state.clock.advance();
    let snapshot = state.store.read_all();

    // Readers get each station's payload verbatim, keyed by id.
    let body: serde_json::Map<String, Value> = snapshot
        .into_iter()
        .map(|(station_id, record)| (station_id, record.payload))
        .collect();

    (
        StatusCode::OK,
        [(LAMPORT_HEADER, clock.to_string())],
        Json(Value::Object(body)),
    )
        .into_response()
}
