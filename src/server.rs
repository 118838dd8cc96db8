//! HTTP layer: routing, response headers and the pull-driven body stream

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::codec::EncoderFactory;
use crate::config::Config;
use crate::frame::{CameraFeed, Mosaic, PictureSize, StreamView};
use crate::stream::{
    Pull, SessionContext, SessionSource, SessionTicket, StreamControl, StreamInfo,
    StreamRegistry, StreamSession,
};

/// Web server state
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    feeds: Arc<BTreeMap<u32, Arc<CameraFeed>>>,
    mosaic: Arc<Mosaic>,
    registry: Arc<StreamRegistry>,
    factory: EncoderFactory,
    clock: Arc<dyn Clock>,
    control: Arc<StreamControl>,
    headers: Arc<HeaderMap>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        feeds: Vec<Arc<CameraFeed>>,
        factory: EncoderFactory,
        control: Arc<StreamControl>,
    ) -> Self {
        let mosaic = Arc::new(Mosaic::new(feeds.clone(), config.mosaic.columns));
        let feeds = feeds.into_iter().map(|feed| (feed.id(), feed)).collect();
        let registry = StreamRegistry::new(config.server.max_clients);
        let headers = Arc::new(extra_headers(&config));

        Self {
            config,
            feeds: Arc::new(feeds),
            mosaic,
            registry,
            factory,
            clock: Arc::new(SystemClock),
            control,
            headers,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    pub fn control(&self) -> &Arc<StreamControl> {
        &self.control
    }
}

/// Parses the configured extra response headers, skipping invalid entries
fn extra_headers(config: &Config) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.server.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Ignoring invalid response header"),
        }
    }
    headers
}

/// Builds the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/streams", get(streams_handler))
        .route("/api/cameras", get(cameras_handler))
        .route("/:camera/mpegts", get(default_view_handler))
        .route("/:camera/mpegts/:view", get(view_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds the configured address and serves until `shutdown` resolves
pub async fn run_server(
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.server.bind, state.config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Starting MPEG-TS server on http://{}", listener.local_addr()?);

    serve(listener, state, shutdown).await
}

/// Serves on an already bound listener
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Server stopped");
    Ok(())
}

/// Request failures mapped to HTTP statuses
#[derive(Debug)]
enum ApiError {
    NotFound(String),
    Busy,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            Self::Busy => (
                StatusCode::SERVICE_UNAVAILABLE,
                "too many concurrent streams",
            )
                .into_response(),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct StreamsResponse {
    active: usize,
    max_clients: usize,
    streams: Vec<StreamInfo>,
}

async fn streams_handler(State(state): State<AppState>) -> Json<StreamsResponse> {
    Json(StreamsResponse {
        active: state.registry.active(),
        max_clients: state.registry.max_clients(),
        streams: state.registry.snapshot(),
    })
}

#[derive(Serialize)]
struct CameraResponse {
    id: u32,
    name: String,
    size: PictureSize,
    motion_active: bool,
    frames_published: u64,
    stopped: bool,
}

async fn cameras_handler(State(state): State<AppState>) -> Json<Vec<CameraResponse>> {
    Json(
        state
            .feeds
            .values()
            .map(|feed| CameraResponse {
                id: feed.id(),
                name: feed.name().to_string(),
                size: feed.size(),
                motion_active: feed.motion_active(),
                frames_published: feed.frames_published(),
                stopped: feed.is_stopped(),
            })
            .collect(),
    )
}

async fn default_view_handler(
    State(state): State<AppState>,
    Path(camera): Path<String>,
) -> Result<Response, ApiError> {
    open_stream(state, &camera, StreamView::Full.as_str()).await
}

async fn view_handler(
    State(state): State<AppState>,
    Path((camera, view)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    open_stream(state, &camera, &view).await
}

/// Resolves the camera and view of a request to a session source
fn resolve(
    state: &AppState,
    camera: &str,
    view: &str,
) -> Result<(u32, SessionSource, StreamView), ApiError> {
    let not_found = || ApiError::NotFound(format!("no stream '{view}' for camera '{camera}'"));

    let id: u32 = camera.parse().map_err(|_| not_found())?;
    let view = StreamView::from_path(view).ok_or_else(not_found)?;

    if id == 0 {
        // The mosaic only offers the main view
        if view != StreamView::Full {
            return Err(not_found());
        }
        return Ok((
            0,
            SessionSource::Mosaic(Arc::clone(&state.mosaic)),
            StreamView::Mosaic,
        ));
    }

    let feed = state.feeds.get(&id).ok_or_else(not_found)?;
    Ok((id, SessionSource::Camera(Arc::clone(feed)), view))
}

async fn open_stream(state: AppState, camera: &str, view: &str) -> Result<Response, ApiError> {
    let (camera, source, view) = resolve(&state, camera, view)?;
    let ticket = state.registry.acquire(camera, view).ok_or(ApiError::Busy)?;

    let ctx = SessionContext::new(ticket.id())
        .with_clock(Arc::clone(&state.clock))
        .with_control(Arc::clone(&state.control))
        .with_stats(ticket.stats());
    let config = Arc::clone(&state.config);
    let factory = Arc::clone(&state.factory);

    let session = tokio::task::spawn_blocking(move || {
        StreamSession::open(ctx, source, view, &config.stream, &factory)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("session open task failed: {e}")))?
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let body = BodyState {
        session,
        buf: vec![0u8; state.config.server.chunk_size],
        _ticket: ticket,
    };
    let stream = futures_util::stream::unfold(Some(body), next_chunk);

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        HeaderName::from_static("content-transfer-encoding"),
        HeaderValue::from_static("BINARY"),
    );
    for (name, value) in state.headers.iter() {
        headers.insert(name.clone(), value.clone());
    }

    Ok(response)
}

/// Everything a response body owns; dropping it closes the session and
/// releases the registry slot
struct BodyState {
    session: StreamSession,
    buf: Vec<u8>,
    _ticket: SessionTicket,
}

impl BodyState {
    fn pull(&mut self) -> Result<Pull, crate::stream::StreamError> {
        self.session.pull(&mut self.buf)
    }
}

type Chunk = Result<Bytes, io::Error>;

/// Pulls the session until it yields bytes, finishes or fails
///
/// Frame cycles run on the blocking pool. Pacing waits sleep on the runtime.
async fn next_chunk(state: Option<BodyState>) -> Option<(Chunk, Option<BodyState>)> {
    let mut state = state?;
    loop {
        let joined = tokio::task::spawn_blocking(move || {
            let result = state.pull();
            (state, result)
        })
        .await;

        let (returned, result) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "Pull task failed");
                return Some((Err(io::Error::new(io::ErrorKind::Other, e)), None));
            }
        };
        state = returned;

        match result {
            Ok(Pull::Data(n)) => {
                let chunk = Bytes::copy_from_slice(&state.buf[..n]);
                return Some((Ok(chunk), Some(state)));
            }
            Ok(Pull::Pending) => tokio::task::yield_now().await,
            Ok(Pull::Wait(wait)) => tokio::time::sleep(wait).await,
            Ok(Pull::Finished) => {
                debug!(session_id = state.session.id(), "Stream finished");
                return None;
            }
            Err(e) => {
                return Some((Err(io::Error::new(io::ErrorKind::Other, e)), None));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;

    fn state(headers: &[(&str, &str)]) -> AppState {
        let mut config = Config::from_str("[[camera]]\nid = 1\n").unwrap();
        config.mosaic.columns = 1;
        for (name, value) in headers {
            config
                .server
                .headers
                .insert(name.to_string(), value.to_string());
        }
        let feeds = config
            .cameras
            .iter()
            .map(|c| Arc::new(CameraFeed::new(c)))
            .collect();
        AppState::new(
            Arc::new(config),
            feeds,
            crate::codec::default_factory(),
            StreamControl::new(),
        )
    }

    #[test]
    fn test_resolve_camera_views() {
        let state = state(&[]);

        let (id, source, view) = resolve(&state, "1", "substream").unwrap();
        assert_eq!(id, 1);
        assert_eq!(view, StreamView::Reduced);
        assert_eq!(source.camera_id(), 1);

        let (id, _, view) = resolve(&state, "0", "stream").unwrap();
        assert_eq!(id, 0);
        assert_eq!(view, StreamView::Mosaic);
    }

    #[test]
    fn test_resolve_rejects_unknown() {
        let state = state(&[]);
        assert!(matches!(resolve(&state, "9", "stream"), Err(ApiError::NotFound(_))));
        assert!(matches!(resolve(&state, "1", "bogus"), Err(ApiError::NotFound(_))));
        assert!(matches!(resolve(&state, "abc", "stream"), Err(ApiError::NotFound(_))));
        assert!(matches!(resolve(&state, "0", "motion"), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn test_extra_headers_skip_invalid() {
        let state = state(&[("Cache-Control", "no-cache"), ("bad header", "x")]);
        assert_eq!(state.headers.len(), 1);
        assert_eq!(state.headers[header::CACHE_CONTROL], "no-cache");
    }

    #[test]
    fn test_mosaic_spans_cameras() {
        let state = state(&[]);
        let camera = CameraConfig::with_id(1);
        assert_eq!(state.mosaic.dimensions().width, camera.width);
    }
}
