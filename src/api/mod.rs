//! HTTP API handlers

use crate::bus::SharedBus;
use crate::flow::{FlowError, OptionsInput, UserInput};
use crate::hub::{Hub, HubError};
use crate::media_player::MediaPlayerError;
use crate::mqtt::MqttBridge;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub mqtt: Arc<MqttBridge>,
    pub bus: SharedBus,
    pub started: Instant,
}

impl AppState {
    pub fn new(hub: Arc<Hub>, mqtt: Arc<MqttBridge>) -> Self {
        Self {
            bus: hub.bus().clone(),
            hub,
            mqtt,
            started: Instant::now(),
        }
    }
}

/// API routes, without middleware
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/status", get(status_handler))
        // Config entries
        .route("/entries", get(entries_handler))
        .route("/entries/{entry_id}", axum::routing::delete(remove_entry_handler))
        .route("/entries/{entry_id}/options", post(options_handler))
        // Config flows
        .route("/flows", get(flows_handler).post(start_flow_handler))
        .route(
            "/flows/{flow_id}",
            post(configure_flow_handler).delete(abort_flow_handler),
        )
        // Media players
        .route("/players", get(players_handler))
        .route("/players/{entry_id}", get(player_handler))
        .route("/players/{entry_id}/control", post(control_handler))
        .route("/players/{entry_id}/browse", get(browse_handler))
        .route("/players/{entry_id}/play_media", post(play_media_handler))
        // Event stream (SSE)
        .route("/events", get(events_handler))
        .with_state(state)
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn hub_error_response(e: HubError) -> Response {
    let status = match &e {
        HubError::UnknownEntry(_) | HubError::NotLoaded(_) | HubError::Browse(_) => {
            StatusCode::NOT_FOUND
        }
        HubError::Flow(FlowError::UnknownFlow(_)) => StatusCode::NOT_FOUND,
        HubError::Flow(FlowError::InvalidInput { .. }) => StatusCode::BAD_REQUEST,
        HubError::MediaPlayer(MediaPlayerError::NotFound(_) | MediaPlayerError::Browse(_)) => {
            StatusCode::NOT_FOUND
        }
        HubError::MediaPlayer(
            MediaPlayerError::Unsupported(_) | MediaPlayerError::InvalidCommand(_),
        ) => StatusCode::BAD_REQUEST,
        HubError::MediaPlayer(MediaPlayerError::Client(_)) => StatusCode::BAD_GATEWAY,
    };
    error_response(status, e)
}

/// Parse an optional JSON body; an empty body is `None`
fn optional_json<T: DeserializeOwned>(body: &Bytes) -> Result<Option<T>, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))
}

/// General status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub git_sha: &'static str,
    pub uptime_secs: u64,
    pub entries: usize,
    pub players: usize,
    pub flows_in_progress: usize,
    pub mqtt_connected: bool,
    pub bus_subscribers: usize,
}

/// GET /status - Service health check
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        service: "dreambox-bridge",
        version: env!("DBB_VERSION"),
        git_sha: env!("DBB_GIT_SHA"),
        uptime_secs: state.started.elapsed().as_secs(),
        entries: state.hub.entries().await.len(),
        players: state.hub.players().await.len(),
        flows_in_progress: state.hub.flows_in_progress().await.len(),
        mqtt_connected: state.mqtt.get_status().await.connected,
        bus_subscribers: state.bus.subscriber_count(),
    })
}

// =============================================================================
// Entry handlers
// =============================================================================

/// GET /entries - Config entries with their setup state
pub async fn entries_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hub.entries().await)
}

/// DELETE /entries/{entry_id} - Unload and delete an entry
pub async fn remove_entry_handler(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
) -> impl IntoResponse {
    match state.hub.remove_entry(&entry_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => hub_error_response(e),
    }
}

/// POST /entries/{entry_id}/options - Options flow; empty body shows the form
pub async fn options_handler(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let input = match optional_json::<OptionsInput>(&body) {
        Ok(input) => input,
        Err(response) => return response,
    };
    match state.hub.update_options(&entry_id, input).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => hub_error_response(e),
    }
}

// =============================================================================
// Flow handlers
// =============================================================================

/// GET /flows - Flows in progress
pub async fn flows_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hub.flows_in_progress().await)
}

/// POST /flows - Start a user flow; empty body shows the form
pub async fn start_flow_handler(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let input = match optional_json::<UserInput>(&body) {
        Ok(input) => input,
        Err(response) => return response,
    };
    let result = state.hub.start_user_flow(input).await;
    (StatusCode::OK, Json(result)).into_response()
}

/// POST /flows/{flow_id} - Submit input for the pending step
pub async fn configure_flow_handler(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
    Json(input): Json<Value>,
) -> impl IntoResponse {
    match state.hub.configure_flow(&flow_id, input).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => hub_error_response(e),
    }
}

/// DELETE /flows/{flow_id} - Drop a flow
pub async fn abort_flow_handler(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
) -> impl IntoResponse {
    if state.hub.abort_flow(&flow_id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, format!("Flow not found: {}", flow_id))
    }
}

// =============================================================================
// Player handlers
// =============================================================================

/// GET /players - All loaded media players
pub async fn players_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hub.players().await)
}

/// GET /players/{entry_id} - One media player
pub async fn player_handler(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
) -> impl IntoResponse {
    match state.hub.describe_player(&entry_id).await {
        Ok(player) => (StatusCode::OK, Json(player)).into_response(),
        Err(e) => hub_error_response(e),
    }
}

/// Control request body
#[derive(Deserialize)]
pub struct ControlRequest {
    pub action: String,
    #[serde(default)]
    pub value: Option<Value>,
}

/// POST /players/{entry_id}/control - Service call
pub async fn control_handler(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
    Json(req): Json<ControlRequest>,
) -> impl IntoResponse {
    match state
        .hub
        .control(&entry_id, &req.action, req.value.as_ref())
        .await
    {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => hub_error_response(e),
    }
}

#[derive(Deserialize)]
pub struct BrowseQuery {
    pub content_type: Option<String>,
    pub content_id: Option<String>,
}

/// GET /players/{entry_id}/browse - Browse bouquets and channels
pub async fn browse_handler(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
    Query(query): Query<BrowseQuery>,
) -> impl IntoResponse {
    match state
        .hub
        .browse(
            &entry_id,
            query.content_type.as_deref(),
            query.content_id.as_deref(),
        )
        .await
    {
        Ok(node) => (StatusCode::OK, Json(node)).into_response(),
        Err(e) => hub_error_response(e),
    }
}

#[derive(Deserialize)]
pub struct PlayMediaRequest {
    pub media_type: String,
    pub media_id: String,
}

/// POST /players/{entry_id}/play_media - Tune a channel of the browsed bouquet
pub async fn play_media_handler(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
    Json(req): Json<PlayMediaRequest>,
) -> impl IntoResponse {
    match state
        .hub
        .play_media(&entry_id, &req.media_type, &req.media_id)
        .await
    {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => hub_error_response(e),
    }
}

// =============================================================================
// SSE Events
// =============================================================================

/// GET /events - Server-Sent Events stream
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.bus.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| {
        match result {
            Ok(event) => {
                // Serialize event to JSON
                match serde_json::to_string(&event) {
                    Ok(json) => Some(Ok(Event::default().data(json))),
                    Err(_) => None,
                }
            }
            Err(_) => None, // Skip lagged messages
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
