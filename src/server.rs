//! HTTP API server: axum router and request handlers.
//!
//! The server runs on the tokio async runtime while patterns run on plain
//! `std::thread`s inside the engine. Controller calls can block (stopping a
//! pattern waits up to the stop timeout), so handlers run them on tokio's
//! blocking pool with `spawn_blocking`.
//!
//! ## Rust concepts
//! - `async fn` and `.await` for non-blocking I/O
//! - axum extractors: `State`, `Json`, `Path`
//! - `Arc<Mutex<T>>` for sharing the controller across handlers
//! - `#[serde(flatten)]` to mix a tagged enum with extra fields in one body
//! - `tower-http` middleware for CORS and request tracing

use crate::channel::WriteOutcome;
use crate::controller::{Controller, ControllerStatus};
use crate::engine::{EngineState, StartReport, StopStatus, TaskOutcome};
use crate::error::{Diagnostic, DriverError};
use crate::pattern::{ModeParams, Pattern, PatternRequest};
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

// ── App State ────────────────────────────────────────────────────────

/// Shared application state, passed to every handler via axum's `State` extractor.
///
/// Rust concept: CLONE for Arc
/// axum clones the state for each request, so everything inside must be
/// cheap to clone. Cloning the `Arc` just bumps a counter; every handler
/// still talks to the same controller.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Mutex<Controller>>,
}

impl AppState {
    pub fn new(controller: Controller) -> Self {
        Self {
            controller: Arc::new(Mutex::new(controller)),
        }
    }
}

type ApiError = (StatusCode, String);

// ── OpenAPI Documentation ────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    paths(
        get_status,
        post_mode,
        post_pattern,
        post_stop,
        post_all_on,
        post_all_off,
        post_channel,
        post_brightness,
    ),
    components(schemas(
        ControllerStatus,
        EngineState,
        crate::channel::Channel,
        crate::channel::Level,
        Pattern,
        ModeParams,
        ModeRequest,
        PatternBody,
        SwitchRequest,
        BrightnessRequest,
        StartResponse,
        StopResponse,
    )),
    tags(
        (name = "patterns", description = "Pattern control endpoints"),
        (name = "channels", description = "Direct channel control endpoints"),
        (name = "system", description = "System status endpoints"),
    ),
    info(
        title = "LED Pattern API",
        version = env!("CARGO_PKG_VERSION"),
        description = "HTTP API for driving GPIO LEDs with timed patterns"
    )
)]
pub struct ApiDoc;

// ── Request/Response types ───────────────────────────────────────────

#[derive(Deserialize, utoipa::ToSchema)]
pub struct ModeRequest {
    /// Mode number: 0 off, 1 on, 2 blink, 3 chase, 4 knight rider, 5 binary counter, 6 random blink
    #[schema(example = 3, minimum = 0, maximum = 6)]
    mode: u8,
    #[serde(flatten)]
    params: ModeParams,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct PatternBody {
    /// Pattern to run, selected by `kind`
    #[serde(flatten)]
    pattern: Pattern,
    /// Seconds between ticks. Defaults depend on the pattern.
    #[schema(example = 0.1)]
    interval: Option<f64>,
    /// Seconds to run. Omit to run until stopped. For `fade` this is the full ramp time.
    duration: Option<f64>,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct SwitchRequest {
    /// Turn the channel on (PWM channels go to 100%) or off
    on: bool,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct BrightnessRequest {
    /// Duty cycle, clamped to 0-100
    #[schema(example = 50.0, minimum = 0, maximum = 100)]
    value: f32,
}

/// How the previously running pattern ended.
#[derive(Serialize, utoipa::ToSchema)]
pub struct StopResponse {
    /// `not_running`, `stopped` or `abandoned`
    status: String,
    /// Outcome of the stopped task, when it was joined
    outcome: Option<String>,
}

impl From<&StopStatus> for StopResponse {
    fn from(status: &StopStatus) -> Self {
        let (status, outcome) = match status {
            StopStatus::NotRunning => ("not_running", None),
            StopStatus::Abandoned => ("abandoned", None),
            StopStatus::Stopped(outcome) => ("stopped", Some(describe(outcome))),
        };
        Self {
            status: status.to_string(),
            outcome,
        }
    }
}

fn describe(outcome: &TaskOutcome) -> String {
    match outcome {
        TaskOutcome::Completed => "completed".to_string(),
        TaskOutcome::Expired => "expired".to_string(),
        TaskOutcome::Cancelled => "cancelled".to_string(),
        TaskOutcome::Failed(e) => format!("failed: {e}"),
        TaskOutcome::Panicked => "panicked".to_string(),
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct StartResponse {
    /// Id of the new pattern task
    task: u64,
    /// Name of the pattern now running
    pattern: String,
    /// What happened to the pattern that was running before
    previous: StopResponse,
}

impl From<StartReport> for StartResponse {
    fn from(report: StartReport) -> Self {
        Self {
            task: report.task,
            pattern: report.pattern.to_string(),
            previous: StopResponse::from(&report.previous),
        }
    }
}

// ── Router ───────────────────────────────────────────────────────────

/// Build the axum router with all API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(
            SwaggerUi::new("/docs")
                .url("/api-docs/openapi.json", ApiDoc::openapi())
                .config(
                    utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
                        .validator_url("none"),
                ),
        )
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/mode", post(post_mode))
        .route("/api/v1/pattern", post(post_pattern))
        .route("/api/v1/stop", post(post_stop))
        .route("/api/v1/all-on", post(post_all_on))
        .route("/api/v1/all-off", post(post_all_off))
        .route("/api/v1/channels/{index}", post(post_channel))
        .route("/api/v1/channels/{index}/brightness", post(post_brightness))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Run `f` against the controller on the blocking thread pool.
async fn with_controller<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&mut Controller) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let controller = state.controller.clone();
    tokio::task::spawn_blocking(move || {
        let mut controller = controller.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut controller)
    })
    .await
    .map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Controller task failed: {e}"),
        )
    })?
}

fn rejected(diagnostic: Diagnostic) -> ApiError {
    (StatusCode::UNPROCESSABLE_ENTITY, diagnostic.to_string())
}

fn driver_failed(error: DriverError) -> ApiError {
    tracing::error!("Driver failure: {}", error);
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

fn write_result(outcome: Result<WriteOutcome, DriverError>) -> Result<StatusCode, ApiError> {
    match outcome.map_err(driver_failed)? {
        WriteOutcome::Applied | WriteOutcome::Unchanged => Ok(StatusCode::OK),
        WriteOutcome::Ignored(diagnostic) => Err(rejected(diagnostic)),
    }
}

// ── Handlers ─────────────────────────────────────────────────────────

/// GET /api/v1/status: engine state and every channel level
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "system",
    responses(
        (status = 200, description = "Current controller status", body = ControllerStatus)
    )
)]
async fn get_status(State(state): State<AppState>) -> Result<Json<ControllerStatus>, ApiError> {
    let status = with_controller(&state, |c| Ok(c.status())).await?;
    Ok(Json(status))
}

/// POST /api/v1/mode: start a numbered mode
#[utoipa::path(
    post,
    path = "/api/v1/mode",
    tag = "patterns",
    request_body = ModeRequest,
    responses(
        (status = 200, description = "Mode started", body = StartResponse),
        (status = 422, description = "Invalid mode or parameters")
    )
)]
async fn post_mode(
    State(state): State<AppState>,
    Json(req): Json<ModeRequest>,
) -> Result<Json<StartResponse>, ApiError> {
    let report = with_controller(&state, move |c| {
        c.start_mode(req.mode, &req.params).map_err(rejected)
    })
    .await?;
    Ok(Json(report.into()))
}

/// POST /api/v1/pattern: start any pattern, including fade, display and rainbow
#[utoipa::path(
    post,
    path = "/api/v1/pattern",
    tag = "patterns",
    request_body = PatternBody,
    responses(
        (status = 200, description = "Pattern started", body = StartResponse),
        (status = 422, description = "Pattern cannot run on these channels")
    )
)]
async fn post_pattern(
    State(state): State<AppState>,
    Json(req): Json<PatternBody>,
) -> Result<Json<StartResponse>, ApiError> {
    let request = PatternRequest::new(req.pattern)
        .with_secs(req.interval, req.duration)
        .map_err(rejected)?;
    let report = with_controller(&state, move |c| c.start(request).map_err(rejected)).await?;
    Ok(Json(report.into()))
}

/// POST /api/v1/stop: stop the running pattern and turn everything off
#[utoipa::path(
    post,
    path = "/api/v1/stop",
    tag = "patterns",
    responses(
        (status = 200, description = "Pattern stopped", body = StopResponse),
    )
)]
async fn post_stop(State(state): State<AppState>) -> Result<Json<StopResponse>, ApiError> {
    let status = with_controller(&state, |c| c.stop().map_err(driver_failed)).await?;
    Ok(Json(StopResponse::from(&status)))
}

/// POST /api/v1/all-on: turn every channel on
#[utoipa::path(
    post,
    path = "/api/v1/all-on",
    tag = "channels",
    responses(
        (status = 200, description = "All channels on"),
    )
)]
async fn post_all_on(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    with_controller(&state, |c| c.all_on().map_err(driver_failed)).await?;
    Ok(StatusCode::OK)
}

/// POST /api/v1/all-off: turn every channel off
#[utoipa::path(
    post,
    path = "/api/v1/all-off",
    tag = "channels",
    responses(
        (status = 200, description = "All channels off"),
    )
)]
async fn post_all_off(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    with_controller(&state, |c| c.all_off().map_err(driver_failed)).await?;
    Ok(StatusCode::OK)
}

/// POST /api/v1/channels/{index}: switch one channel on or off
#[utoipa::path(
    post,
    path = "/api/v1/channels/{index}",
    tag = "channels",
    params(("index" = usize, Path, description = "Channel index")),
    request_body = SwitchRequest,
    responses(
        (status = 200, description = "Channel updated"),
        (status = 422, description = "No such channel")
    )
)]
async fn post_channel(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Json(req): Json<SwitchRequest>,
) -> Result<StatusCode, ApiError> {
    with_controller(&state, move |c| write_result(c.set_channel(index, req.on))).await
}

/// POST /api/v1/channels/{index}/brightness: set a PWM channel's duty cycle
#[utoipa::path(
    post,
    path = "/api/v1/channels/{index}/brightness",
    tag = "channels",
    params(("index" = usize, Path, description = "Channel index")),
    request_body = BrightnessRequest,
    responses(
        (status = 200, description = "Brightness updated"),
        (status = 422, description = "No such channel, or the channel is not PWM-capable")
    )
)]
async fn post_brightness(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Json(req): Json<BrightnessRequest>,
) -> Result<StatusCode, ApiError> {
    with_controller(&state, move |c| write_result(c.set_brightness(index, req.value))).await
}

// ── Tests ────────────────────────────────────────────────────────────
