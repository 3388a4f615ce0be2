use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::events::Notification;
use crate::model::UserSettings;
use crate::orchestrator::CompletionOrchestrator;
use crate::progression::{Action, AppState};
use crate::runtime::EngineRuntime;
use crate::store::CollectionKey;
use crate::sync::PlayerData;

#[derive(Clone)]
pub struct ServerState {
    pub player: Arc<tokio::sync::Mutex<PlayerData>>,
    pub orchestrator: Arc<CompletionOrchestrator>,
    pub auth: BackendAuthConfig,
    pub ws_events: broadcast::Sender<ApiEventEnvelope>,
}

#[derive(Debug, Clone)]
pub struct BackendAuthConfig {
    mode: AuthMode,
    token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthMode {
    Required,
    Disabled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiEventEnvelope {
    pub event_type: String,
    pub emitted_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct CompleteMissionRequest {
    epic_mission_id: String,
    daily_mission_id: String,
    sub_task_name: String,
    amount: f64,
    feedback_text: Option<String>,
}

#[derive(Debug, Serialize)]
struct AcceptedResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct RenameGoalRequest {
    new_name: String,
}

pub async fn serve_backend(
    runtime: EngineRuntime,
    event_rx: flume::Receiver<Notification>,
) -> Result<()> {
    let bind_addr = std::env::var("QUESTLINE_BACKEND_BIND")
        .unwrap_or_else(|_| runtime.config.bind_addr.clone())
        .parse::<SocketAddr>()
        .context("Invalid QUESTLINE_BACKEND_BIND (expected host:port)")?;

    let auth = load_auth_config()?;
    let (ws_events, _) = broadcast::channel(512);

    let state = Arc::new(ServerState {
        player: runtime.player.clone(),
        orchestrator: runtime.orchestrator.clone(),
        auth,
        ws_events: ws_events.clone(),
    });

    spawn_event_bridge(event_rx, ws_events);
    runtime.initialize().await?;
    runtime.spawn_idle_tip_loop();

    let protected = Router::new()
        .route("/health", get(health))
        .route("/state", get(get_state))
        .route("/missions/complete", post(complete_mission))
        .route("/settings", put(update_settings))
        .route("/goals/:id/rename", post(rename_goal))
        .route("/goals/:id", delete(delete_goal))
        .route("/backup/export", get(export_backup))
        .route("/backup/import", post(import_backup))
        .route("/reset", post(reset_account))
        .route("/ws/events", get(ws_events_route))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let app = Router::new().nest("/v1", protected);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind backend server to {}", bind_addr))?;
    tracing::info!("Questline backend listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .await
        .context("Backend server failed")?;
    Ok(())
}

fn spawn_event_bridge(
    event_rx: flume::Receiver<Notification>,
    ws_events: broadcast::Sender<ApiEventEnvelope>,
) {
    tokio::spawn(async move {
        while let Ok(notification) = event_rx.recv_async().await {
            let envelope = map_notification(notification);
            let _ = ws_events.send(envelope);
        }
    });
}

fn map_notification(notification: Notification) -> ApiEventEnvelope {
    ApiEventEnvelope {
        event_type: notification.event.event_type().to_string(),
        emitted_at: notification.emitted_at,
        payload: serde_json::to_value(&notification).unwrap_or_else(|_| serde_json::json!({})),
    }
}

fn load_auth_config() -> Result<BackendAuthConfig> {
    let mode = parse_auth_mode(std::env::var("QUESTLINE_BACKEND_AUTH_MODE").ok())?;
    let token = std::env::var("QUESTLINE_BACKEND_TOKEN")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    if mode == AuthMode::Required && token.is_none() {
        return Err(anyhow!(
            "QUESTLINE_BACKEND_TOKEN is required when auth mode is 'required'"
        ));
    }
    if mode == AuthMode::Disabled {
        tracing::warn!("Backend auth mode is disabled; all API routes are unauthenticated");
    }

    Ok(BackendAuthConfig { mode, token })
}

fn parse_auth_mode(raw: Option<String>) -> Result<AuthMode> {
    let normalized = raw
        .unwrap_or_else(|| "required".to_string())
        .trim()
        .to_ascii_lowercase();
    match normalized.as_str() {
        "" | "required" | "on" | "enabled" | "true" => Ok(AuthMode::Required),
        "disabled" | "off" | "false" => Ok(AuthMode::Disabled),
        other => Err(anyhow!(
            "Invalid QUESTLINE_BACKEND_AUTH_MODE '{}'. Expected 'required' or 'disabled'",
            other
        )),
    }
}

async fn auth_middleware(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    authorize(&headers, &state.auth)?;
    Ok(next.run(request).await)
}

fn authorize(headers: &HeaderMap, auth: &BackendAuthConfig) -> Result<(), StatusCode> {
    if auth.mode == AuthMode::Disabled {
        return Ok(());
    }
    let Some(token) = auth.token.as_deref() else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    let Some(raw_header) = headers.get(header::AUTHORIZATION) else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let Ok(auth_value) = raw_header.to_str() else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let expected = format!("Bearer {}", token);
    if auth_value.trim() != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn get_state(State(state): State<Arc<ServerState>>) -> Json<AppState> {
    let player = state.player.lock().await;
    Json(player.snapshot())
}

/// Contribute sub-task progress; the orchestrator decides whether this
/// finishes the mission and cascades. Always 202: completion failures are
/// surfaced over the event channel, never as an HTTP error.
async fn complete_mission(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<CompleteMissionRequest>,
) -> Json<AcceptedResponse> {
    let mut player = state.player.lock().await;
    state
        .orchestrator
        .complete_mission(
            &mut player,
            &body.epic_mission_id,
            &body.daily_mission_id,
            &body.sub_task_name,
            body.amount,
            body.feedback_text,
        )
        .await;
    Json(AcceptedResponse { status: "accepted" })
}

async fn update_settings(
    State(state): State<Arc<ServerState>>,
    Json(settings): Json<UserSettings>,
) -> Json<AcceptedResponse> {
    let mut player = state.player.lock().await;
    let mut profile = player.state().profile.clone();
    profile.user_settings = settings;
    player.dispatch(Action::SetProfile { profile });
    player.persist(CollectionKey::Profile);
    Json(AcceptedResponse { status: "accepted" })
}

async fn rename_goal(
    State(state): State<Arc<ServerState>>,
    Path(goal_id): Path<String>,
    Json(body): Json<RenameGoalRequest>,
) -> Json<AcceptedResponse> {
    let mut player = state.player.lock().await;
    player.rename_goal(&goal_id, &body.new_name);
    Json(AcceptedResponse { status: "accepted" })
}

async fn delete_goal(
    State(state): State<Arc<ServerState>>,
    Path(goal_id): Path<String>,
) -> Json<AcceptedResponse> {
    let mut player = state.player.lock().await;
    player.delete_goal(&goal_id);
    Json(AcceptedResponse { status: "accepted" })
}

async fn export_backup(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let player = state.player.lock().await;
    let raw = player.export().map_err(internal_error)?;
    let value = serde_json::from_str(&raw)
        .map_err(|e| internal_error(anyhow::Error::from(e)))?;
    Ok(Json(value))
}

/// Import errors come back to the caller so the invoking surface can keep
/// its confirmation open (validation happens before anything destructive).
async fn import_backup(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<AcceptedResponse>, (StatusCode, String)> {
    let mut player = state.player.lock().await;
    player
        .import(&body.to_string())
        .await
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, format!("{e:#}")))?;
    Ok(Json(AcceptedResponse { status: "imported" }))
}

async fn reset_account(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<AcceptedResponse>, (StatusCode, String)> {
    let mut player = state.player.lock().await;
    player.reset().await.map_err(internal_error)?;
    Ok(Json(AcceptedResponse { status: "reset" }))
}

async fn ws_events_route(
    State(state): State<Arc<ServerState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_events_socket(state, socket))
}

async fn handle_events_socket(state: Arc<ServerState>, mut socket: WebSocket) {
    let mut rx = state.ws_events.subscribe();

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        let payload = match serde_json::to_string(&event) {
                            Ok(serialized) => serialized,
                            Err(error) => {
                                tracing::warn!("Failed to serialize websocket event: {}", error);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

fn internal_error(error: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn authorize_accepts_matching_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer token-123"),
        );
        assert!(authorize(
            &headers,
            &BackendAuthConfig {
                mode: AuthMode::Required,
                token: Some("token-123".to_string()),
            }
        )
        .is_ok());
    }

    #[test]
    fn authorize_rejects_missing_or_invalid_token() {
        let headers = HeaderMap::new();
        assert!(authorize(
            &headers,
            &BackendAuthConfig {
                mode: AuthMode::Required,
                token: Some("token-123".to_string()),
            }
        )
        .is_err());

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer wrong"),
        );
        assert!(authorize(
            &headers,
            &BackendAuthConfig {
                mode: AuthMode::Required,
                token: Some("token-123".to_string()),
            }
        )
        .is_err());
    }

    #[test]
    fn authorize_allows_when_auth_mode_disabled() {
        let headers = HeaderMap::new();
        assert!(authorize(
            &headers,
            &BackendAuthConfig {
                mode: AuthMode::Disabled,
                token: None,
            }
        )
        .is_ok());
    }

    #[test]
    fn parse_auth_mode_defaults_to_required() {
        assert!(matches!(parse_auth_mode(None).unwrap(), AuthMode::Required));
        assert!(matches!(
            parse_auth_mode(Some("disabled".to_string())).unwrap(),
            AuthMode::Disabled
        ));
        assert!(parse_auth_mode(Some("nope".to_string())).is_err());
    }

    #[test]
    fn map_notification_carries_event_type_and_payload() {
        let (tx, rx) = flume::unbounded();
        let notifier = crate::events::Notifier::new(tx);
        notifier.emit(
            crate::events::EngineEvent::LevelUp { new_level: 3 },
            &UserSettings::default(),
        );
        let envelope = map_notification(rx.try_recv().unwrap());
        assert_eq!(envelope.event_type, "level_up");
        assert_eq!(envelope.payload["new_level"], 3);
        assert!(envelope.emitted_at <= Utc::now());
    }
}
