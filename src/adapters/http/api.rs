//! Query API: HTTP endpoints over the event store plus a websocket
//! stream of live events.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::domain::models::{Event, EventKind};
use crate::services::event_store::{EventQuery, EventStore};

/// Configuration for the query API server.
#[derive(Debug, Clone)]
pub struct QueryApiConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for QueryApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            enable_cors: true,
        }
    }
}

/// Shared state for the query API.
pub struct ApiState {
    pub store: Arc<dyn EventStore>,
    pub events: broadcast::Sender<Event>,
}

/// HTTP + websocket server reading from the event store and the live
/// event broadcast.
pub struct QueryApiServer {
    state: Arc<ApiState>,
    config: QueryApiConfig,
}

impl QueryApiServer {
    pub fn new(
        store: Arc<dyn EventStore>,
        events: broadcast::Sender<Event>,
        config: QueryApiConfig,
    ) -> Self {
        Self {
            state: Arc::new(ApiState { store, events }),
            config,
        }
    }

    /// Build the router with all endpoints. Public so tests can drive
    /// it in-process.
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/", get(service_descriptor))
            .route("/health", get(health))
            .route("/events", get(get_events))
            .route("/projects", get(list_projects))
            .route("/projects/{project}/stats", get(get_project_stats))
            .route("/projects/{project}/events", delete(clear_project_events))
            .route("/agents/{agent_id}/timeline", get(get_agent_timeline))
            .route("/ws", get(ws_events))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        router
    }

    pub async fn serve(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let router = self.router();

        tracing::info!("query API listening on {}", addr);
        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;
        Ok(())
    }

    pub async fn serve_with_shutdown<F>(
        self,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let router = self.router();

        tracing::info!("query API listening on {}", addr);
        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn store_error(error: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: error.to_string(),
            code: "STORE_ERROR".to_string(),
        }),
    )
}

#[derive(Debug, Deserialize)]
struct EventsParams {
    kind: Option<String>,
    project: Option<String>,
    agent_id: Option<String>,
    limit: Option<u32>,
    offset: Option<u32>,
}

async fn service_descriptor() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "hivemind query API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "events": "/events",
            "projects": "/projects",
            "project_stats": "/projects/{project}/stats",
            "agent_timeline": "/agents/{agent_id}/timeline",
            "websocket": "/ws",
        },
    }))
}

async fn health(State(state): State<Arc<ApiState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let total_events = state.store.count().await.map_err(store_error)?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "total_events": total_events,
        "ws_subscribers": state.events.receiver_count(),
    })))
}

async fn get_events(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<EventsParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let kind = match params.kind.as_deref() {
        Some(raw) => Some(EventKind::from_str(raw).ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: format!("Invalid kind: {raw}"),
                    code: "INVALID_KIND".to_string(),
                }),
            )
        })?),
        None => None,
    };

    let mut query = EventQuery::new()
        .limit(params.limit.unwrap_or(100))
        .offset(params.offset.unwrap_or(0));
    if let Some(kind) = kind {
        query = query.kind(kind);
    }
    if let Some(project) = params.project {
        query = query.project(project);
    }
    if let Some(agent_id) = params.agent_id {
        query = query.agent_id(agent_id);
    }

    let limit = query.limit;
    let offset = query.offset;
    let events = state.store.query(query).await.map_err(store_error)?;

    Ok(Json(serde_json::json!({
        "events": events,
        "count": events.len(),
        "limit": limit,
        "offset": offset,
    })))
}

async fn get_project_stats(
    State(state): State<Arc<ApiState>>,
    Path(project): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state
        .store
        .project_stats(&project)
        .await
        .map_err(store_error)?;
    Ok(Json(serde_json::json!(stats)))
}

async fn get_agent_timeline(
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let events = state
        .store
        .agent_timeline(&agent_id)
        .await
        .map_err(store_error)?;
    Ok(Json(serde_json::json!({
        "agent_id": agent_id,
        "events": events,
        "count": events.len(),
    })))
}

async fn list_projects(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let projects = state.store.list_projects().await.map_err(store_error)?;
    Ok(Json(serde_json::json!({
        "projects": projects,
        "count": projects.len(),
    })))
}

async fn clear_project_events(
    State(state): State<Arc<ApiState>>,
    Path(project): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state
        .store
        .clear_project(&project)
        .await
        .map_err(store_error)?;
    Ok(Json(serde_json::json!({
        "message": format!("Cleared all events for project: {project}"),
        "project": project,
        "removed": removed,
    })))
}

async fn ws_events(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Stream every emitted event to the client as JSON. A send error
/// marks the connection dropped.
async fn handle_ws(mut socket: WebSocket, state: Arc<ApiState>) {
    let greeting = serde_json::json!({
        "type": "connected",
        "timestamp": Utc::now().to_rfc3339(),
        "message": "Connected to hivemind event stream",
    });
    if socket
        .send(Message::Text(greeting.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    let mut receiver = state.events.subscribe();

    loop {
        tokio::select! {
            event = receiver.recv() => {
                match event {
                    Ok(event) => {
                        let json = serde_json::to_string(&event).unwrap_or_default();
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            debug!("websocket send failed, dropping connection");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        let notice = format!("{{\"type\":\"lagged\",\"missed_events\":{missed}}}");
                        if socket.send(Message::Text(notice.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
