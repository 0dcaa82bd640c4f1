//! HTTP surface for starting, stopping and watching crawls.

use crate::crawler::CrawlerService;
use crate::error::{CrawlError, StoreError};
use crate::live::{Frame, LiveTimings, serve_connection};
use crate::models::Project;
use crate::pubsub::crawl_topic;
use crate::store::ProjectStore;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        Path, State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header::ORIGIN},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::{SinkExt, StreamExt, future};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

/// Header carrying the authenticated user's id
pub const USER_HEADER: &str = "x-user-id";

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub crawler: Arc<CrawlerService>,
    pub projects: Arc<dyn ProjectStore>,
    /// Expected websocket Origin, any origin is accepted when unset
    pub public_url: Option<String>,
    pub timings: LiveTimings,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/projects/:pid/crawl", post(start_crawl))
        .route("/projects/:pid/crawl/stop", post(stop_crawl))
        .route("/projects/:pid/crawl/ws", get(crawl_ws))
        .with_state(state)
}

/// Start the web server.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting server at http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<CrawlError> for ApiError {
    fn from(err: CrawlError) -> Self {
        let status = match &err {
            CrawlError::ProjectNotFound(_) | CrawlError::Store(StoreError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            CrawlError::InvalidUrl(_) | CrawlError::MissingCredentials(_) => StatusCode::BAD_REQUEST,
            CrawlError::AlreadyRunning(_) => StatusCode::CONFLICT,
            CrawlError::Store(_) | CrawlError::Client(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %err, "Request failed");
        }

        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

/// Optional body of a crawl start request for sites behind BasicAuth.
/// Credentials apply to this crawl only and are never stored.
#[derive(Deserialize)]
struct CrawlCredentials {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct CrawlStarted {
    crawl_id: i64,
    project_id: i64,
}

#[derive(Debug, Serialize)]
struct CrawlStopped {
    project_id: i64,
    stopped: bool,
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn user_id(headers: &HeaderMap) -> Result<i64, ApiError> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing or invalid user id"))
}

async fn find_project(state: &AppState, headers: &HeaderMap, project_id: i64) -> Result<Project, ApiError> {
    let user_id = user_id(headers)?;

    state
        .projects
        .find_project(project_id, user_id)
        .await
        .map_err(|e| match e {
            StoreError::NotFound(_) => CrawlError::ProjectNotFound(project_id),
            other => CrawlError::Store(other),
        })
        .map_err(ApiError::from)
}

async fn start_crawl(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let mut project = find_project(&state, &headers, project_id).await?;

    if !body.is_empty() {
        let credentials: CrawlCredentials = serde_json::from_slice(&body).map_err(|e| {
            ApiError::new(StatusCode::BAD_REQUEST, format!("invalid credentials: {}", e))
        })?;
        project.basic_auth = true;
        project.auth_user = Some(credentials.username);
        project.auth_pass = Some(credentials.password);
    }

    let running = state.crawler.start(&project).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CrawlStarted {
            crawl_id: running.crawl_id,
            project_id: running.project_id,
        }),
    ))
}

async fn stop_crawl(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let project = find_project(&state, &headers, project_id).await?;
    let stopped = state.crawler.stop(project.id);

    Ok(Json(CrawlStopped {
        project_id: project.id,
        stopped,
    }))
}

async fn crawl_ws(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    if let Some(expected) = &state.public_url {
        let origin = headers.get(ORIGIN).and_then(|value| value.to_str().ok());
        if origin != Some(expected.trim_end_matches('/')) {
            return Err(ApiError::new(StatusCode::FORBIDDEN, "origin not allowed"));
        }
    }

    let project = find_project(&state, &headers, project_id).await?;

    Ok(ws.on_upgrade(move |socket| watch_crawl(socket, state, project.id)))
}

async fn watch_crawl(socket: WebSocket, state: AppState, project_id: i64) {
    let broker = state.crawler.broker().clone();
    let subscription = broker.subscribe(&crawl_topic(project_id));

    let (sink, stream) = socket.split();
    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(into_ws(frame))));
    let stream = stream.map(|message| message.map(from_ws));

    let end = serve_connection(&broker, sink, stream, subscription, state.timings).await;
    tracing::debug!(project = project_id, reason = ?end, "Websocket closed");
}

fn into_ws(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text),
        Frame::Binary(data) => WsMessage::Binary(data),
        Frame::Ping => WsMessage::Ping(Vec::new()),
        Frame::Pong => WsMessage::Pong(Vec::new()),
        Frame::Close => WsMessage::Close(None),
    }
}

fn from_ws(message: WsMessage) -> Frame {
    match message {
        WsMessage::Text(text) => Frame::Text(text),
        WsMessage::Binary(data) => Frame::Binary(data),
        WsMessage::Ping(_) => Frame::Ping,
        WsMessage::Pong(_) => Frame::Pong,
        WsMessage::Close(_) => Frame::Close,
    }
}
