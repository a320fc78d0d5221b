use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{ws::WebSocket, Path, State, WebSocketUpgrade},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use bridge::{BridgeConfig, BridgeHandle, PositionStore, SerialLink};
use choreo::{ChoreoEngine, ChoreoError, PlayOutcome};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{Axis, Keyframe, PositionVector},
    error::{ApiError, BridgeError, ErrorCode},
    protocol::{SessionEvent, SessionRequest},
};
use tokio::sync::broadcast;
use tracing::{info, warn};

mod config;

use config::load_settings;

#[derive(Clone)]
struct AppState {
    bridge: BridgeHandle,
    engine: ChoreoEngine,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let store = Arc::new(PositionStore::new());
    let transport = Arc::new(SerialLink::new(&settings.serial_path, settings.baud_rate));
    let (bridge, _bridge_task) = bridge::spawn(
        transport,
        store,
        BridgeConfig {
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
        },
    );
    let engine = ChoreoEngine::new(
        bridge.clone(),
        Duration::from_millis(settings.tick_period_ms),
    );

    let state = AppState { bridge, engine };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, serial = %settings.serial_path, baud = settings.baud_rate, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_handler))
        .route("/api/command", post(submit_command))
        .route("/api/positions", get(get_positions))
        .route("/api/axes/:axis/reverse", post(set_reverse))
        .route(
            "/api/choreography",
            get(list_choreography).delete(clear_choreography),
        )
        .route("/api/choreography/record", post(record_keyframe))
        .route("/api/choreography/:index", delete(delete_keyframe))
        .route("/api/choreography/:index/seek", post(seek_keyframe))
        .route("/api/choreography/play", post(play_choreography))
        .route("/api/choreography/stop", post(stop_choreography))
        .route("/api/choreography/speed", post(set_playback_speed))
        .route("/api/choreography/export", get(export_choreography))
        .route("/api/choreography/import", post(import_choreography))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct CommandBody {
    command: String,
}

/// Synchronous command submission for non-interactive callers; sessions use
/// the WebSocket instead.
async fn submit_command(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CommandBody>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    let command = body.command.trim().to_string();
    if command.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(ErrorCode::Validation, "command cannot be empty")),
        ));
    }

    match state.bridge.submit(command).await {
        Ok(()) => Ok(Json(serde_json::json!({ "success": true }))),
        Err(error @ BridgeError::LinkUnavailable) => {
            Err((StatusCode::SERVICE_UNAVAILABLE, Json(error.into())))
        }
        Err(error) => Err((StatusCode::INTERNAL_SERVER_ERROR, Json(error.into()))),
    }
}

#[derive(Debug, Serialize)]
struct PositionsResponse {
    physical: PositionVector,
    display: PositionVector,
    reverse_flags: [bool; 4],
    connected: bool,
}

async fn get_positions(State(state): State<Arc<AppState>>) -> Json<PositionsResponse> {
    let store = state.bridge.store();
    Json(PositionsResponse {
        physical: store.get(),
        display: store.display_values(),
        reverse_flags: store.reverse_flags(),
        connected: state.bridge.connection_state().is_connected(),
    })
}

#[derive(Debug, Deserialize)]
struct ReverseBody {
    enabled: bool,
}

async fn set_reverse(
    State(state): State<Arc<AppState>>,
    Path(axis): Path<String>,
    Json(body): Json<ReverseBody>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    let mut letters = axis.chars();
    let axis = match (letters.next().and_then(Axis::from_letter), letters.next()) {
        (Some(axis), None) => axis,
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ApiError::new(
                    ErrorCode::Validation,
                    "axis must be one of X, Y, Z, A",
                )),
            ))
        }
    };

    state.bridge.store().set_reverse(axis.ordinal(), body.enabled);
    info!(axis = %axis.letter(), enabled = body.enabled, "reverse flag changed");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct ChoreographyResponse {
    keyframes: Vec<Keyframe>,
    playing: bool,
    speed: f64,
}

async fn list_choreography(State(state): State<Arc<AppState>>) -> Json<ChoreographyResponse> {
    Json(ChoreographyResponse {
        keyframes: state.engine.keyframes(),
        playing: state.engine.is_playing(),
        speed: state.engine.speed(),
    })
}

async fn record_keyframe(State(state): State<Arc<AppState>>) -> Json<Keyframe> {
    Json(state.engine.record())
}

async fn delete_keyframe(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    state.engine.delete_at(index).map_err(not_found)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_choreography(State(state): State<Arc<AppState>>) -> StatusCode {
    state.engine.clear();
    StatusCode::NO_CONTENT
}

async fn seek_keyframe(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<Json<Keyframe>, (StatusCode, Json<ApiError>)> {
    let keyframe = state.engine.seek(index).map_err(not_found)?;
    Ok(Json(keyframe))
}

async fn play_choreography(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    match state.engine.play() {
        PlayOutcome::Started => Ok(Json(serde_json::json!({ "playing": true }))),
        PlayOutcome::Stopped => Ok(Json(serde_json::json!({ "playing": false }))),
        PlayOutcome::Empty => Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(ErrorCode::Validation, "no keyframes to play")),
        )),
    }
}

async fn stop_choreography(State(state): State<Arc<AppState>>) -> StatusCode {
    state.engine.stop();
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct SpeedBody {
    speed: f64,
}

async fn set_playback_speed(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SpeedBody>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    state.engine.set_speed(body.speed).map_err(|error| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(ErrorCode::Validation, error.to_string())),
        )
    })?;
    Ok(StatusCode::NO_CONTENT)
}

async fn export_choreography(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiError>)> {
    let bytes = state.engine.save().map_err(|error: ChoreoError| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new(ErrorCode::Internal, error.to_string())),
        )
    })?;
    Ok(([(header::CONTENT_TYPE, "application/json")], bytes))
}

async fn import_choreography(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    match state.engine.load(&body) {
        Ok(count) => Ok(Json(serde_json::json!({ "keyframes": count }))),
        Err(error) => Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(ErrorCode::Validation, error.to_string())),
        )),
    }
}

fn not_found(error: ChoreoError) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::new(ErrorCode::NotFound, error.to_string())),
    )
}

fn initial_status(bridge: &BridgeHandle) -> SessionEvent {
    SessionEvent::Status {
        connected: bridge.connection_state().is_connected(),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_session(state, socket))
}

async fn ws_session(state: Arc<AppState>, socket: WebSocket) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();

    // Subscribe before reading the state so a transition between the two
    // is never lost; a duplicate status message is harmless.
    let mut events = state.bridge.subscribe();
    let Ok(status) = serde_json::to_string(&initial_status(&state.bridge)) else {
        return;
    };
    if sender.send(Message::Text(status)).await.is_err() {
        return;
    }
    info!("session connected");

    let send_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(_) => continue,
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "session fell behind on telemetry");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        handle_session_text(&state, &text);
    }

    info!("session disconnected");
    send_task.abort();
}

/// Returns whether the message parsed; either way the session stays open.
fn handle_session_text(state: &AppState, text: &str) -> bool {
    match serde_json::from_str::<SessionRequest>(text) {
        Ok(SessionRequest::Command { command }) => {
            state.bridge.submit_nowait(command);
            true
        }
        Err(error) => {
            warn!(%error, "dropping malformed session message");
            false
        }
    }
}
