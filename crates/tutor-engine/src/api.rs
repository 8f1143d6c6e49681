//! HTTP API for tutoring sessions.
//!
//! Every `/api` endpoint requires the caller identity set by the upstream
//! gateway in the `x-user-id` header. Request bodies are validated before
//! anything else happens, then the request is counted against the quota of
//! its operation, keyed by the caller identity.
//!
//! # Endpoints
//!
//! - `POST /api/sessions` - Start a session
//! - `GET /api/sessions/:id` - Fetch a session
//! - `POST /api/sessions/turn` - Submit a learner turn
//! - `POST /api/sessions/:id/complete` - Complete a session
//! - `POST /api/sessions/analyze` - Re-analyze every learner turn
//! - `POST /api/sessions/review` - Generate the session review
//! - `POST /api/overview` - Get or generate a source overview
//! - `DELETE /api/overview/:source_id` - Drop a cached overview
//! - `GET /health` - Liveness and generator readiness
//! - `GET /` - Service information
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tutor_engine::{
//!     create_router, AppState, ChatCompletionsGenerator, Config, GenerationClient,
//!     InMemorySessionStore, JsonSourceCatalog, TutorEngine,
//! };
//!
//! # async fn example() -> tutor_engine::Result<()> {
//! let config = Config::default();
//! let generator = ChatCompletionsGenerator::from_config(&config.generator)?;
//! let engine = TutorEngine::new(
//!     Arc::new(InMemorySessionStore::new()),
//!     Arc::new(JsonSourceCatalog::load(&config.sources_path)?),
//!     GenerationClient::new(Arc::new(generator), config.generator.timeout()),
//!     &config,
//! );
//!
//! let router = create_router(AppState::new(config, engine));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, ConnectInfo, FromRequestParts, Path, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, warn};
use tutor_review::{CorrectionInput, MarkdownGenerator};

use crate::config::Config;
use crate::dialog::StartParams;
use crate::engine::{Overview, TurnResult, TutorEngine};
use crate::error::{Result, TutorError};
use crate::rate_limit::RateLimiter;
use crate::review::ReviewParams;
use crate::session::{Language, LearnerError, Level, SessionId, SessionState, TutorSession};

/// Header carrying the authenticated caller identity.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Maximum number of corrections accepted in a review request.
pub const MAX_REVIEW_ERRORS: usize = 500;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for starting a session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    /// Source to practice.
    pub source_id: String,
    /// Learner level.
    pub level: Level,
    /// Role the learner plays; omit for a guided dialog.
    #[serde(default)]
    pub selected_role: Option<String>,
    /// Target language; defaults to the source's.
    #[serde(default)]
    pub language: Option<Language>,
}

impl StartSessionRequest {
    /// Checks the request before any side effect.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::Validation` on a blank source id or role.
    pub fn validate(&self) -> Result<()> {
        require_non_blank("sourceId", &self.source_id)?;
        if let Some(role) = &self.selected_role {
            require_non_blank("selectedRole", role)?;
        }
        Ok(())
    }
}

/// Response body for a started session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    /// New session id.
    pub session_id: SessionId,
    /// The AI's opening line (turn 0).
    pub first_utterance: String,
    /// Session state.
    pub state: SessionState,
    /// Learner level.
    pub level: Level,
    /// Target language.
    pub language: Language,
    /// Role played by the learner, in roleplay sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_role: Option<String>,
    /// Role played by the AI, in roleplay sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opposite_role: Option<String>,
}

impl From<&TutorSession> for StartSessionResponse {
    fn from(session: &TutorSession) -> Self {
        Self {
            session_id: session.id,
            first_utterance: session
                .turns
                .first()
                .map(|t| t.text.clone())
                .unwrap_or_default(),
            state: session.state,
            level: session.level,
            language: session.language,
            selected_role: session.mode.learner_role().map(str::to_string),
            opposite_role: session.mode.ai_role().map(str::to_string),
        }
    }
}

/// Request body for a learner turn.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    /// Session id.
    pub session_id: String,
    /// What the learner said.
    pub learner_utterance: String,
    /// Language to analyze the utterance in; defaults to the session's.
    #[serde(default)]
    pub language: Option<Language>,
}

impl TurnRequest {
    /// Checks the request and returns the parsed session id.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::Validation` on a malformed id, or a blank or
    /// overlong utterance.
    pub fn validate(&self, max_chars: usize) -> Result<SessionId> {
        let id = parse_session_id(&self.session_id)?;
        require_non_blank("learnerUtterance", &self.learner_utterance)?;
        let chars = self.learner_utterance.chars().count();
        if chars > max_chars {
            return Err(TutorError::validation(format!(
                "learnerUtterance is {chars} characters, the limit is {max_chars}"
            )));
        }
        Ok(id)
    }
}

/// Request body naming a session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    /// Session id.
    pub session_id: String,
}

/// Response body for a standalone analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    /// The session.
    pub session_id: SessionId,
    /// Errors found across all learner turns.
    pub errors: Vec<LearnerError>,
}

/// Output format of a review.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewFormat {
    /// Structured JSON.
    #[default]
    Json,
    /// Learner-facing Markdown document.
    Markdown,
}

/// Request body for a review.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    /// Session id.
    pub session_id: String,
    /// Level to review against; defaults to the session's.
    #[serde(default)]
    pub level: Option<Level>,
    /// Language of the review; defaults to the session's.
    #[serde(default)]
    pub language: Option<Language>,
    /// Corrections to review; defaults to the session's stored errors.
    #[serde(default)]
    pub errors: Vec<CorrectionInput>,
    /// Output format.
    #[serde(default)]
    pub format: ReviewFormat,
}

impl ReviewRequest {
    /// Checks the request and returns the parsed session id.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::Validation` on a malformed id, too many
    /// corrections, or a correction with blank text.
    pub fn validate(&self) -> Result<SessionId> {
        let id = parse_session_id(&self.session_id)?;
        if self.errors.len() > MAX_REVIEW_ERRORS {
            return Err(TutorError::validation(format!(
                "at most {MAX_REVIEW_ERRORS} errors can be reviewed at once"
            )));
        }
        for error in &self.errors {
            require_non_blank("errors[].errorText", &error.error_text)?;
            require_non_blank("errors[].correction", &error.correction)?;
        }
        Ok(id)
    }
}

/// Request body for an overview.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewRequest {
    /// Source to summarize.
    pub source_id: String,
}

/// Response body for an overview invalidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateResponse {
    /// The source.
    pub source_id: String,
    /// Whether a cached overview was dropped.
    pub invalidated: bool,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable description of the error.
    pub error: String,
    /// Stable snake_case error code.
    pub code: String,
}

fn require_non_blank(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TutorError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn parse_session_id(value: &str) -> Result<SessionId> {
    require_non_blank("sessionId", value)?;
    value.parse()
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,
    /// Session engine.
    pub engine: Arc<TutorEngine>,
    /// Process-wide rate limiter.
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Creates the state with a rate limiter sized from the configuration.
    #[must_use]
    pub fn new(config: Config, engine: TutorEngine) -> Self {
        let limiter = RateLimiter::new(config.rate_limits.window());
        Self {
            config,
            engine: Arc::new(engine),
            limiter: Arc::new(limiter),
        }
    }
}

/// Quota bucket an operation is counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quota {
    /// Start, complete, analyze and review.
    Lifecycle,
    /// Turns and session reads.
    Turn,
    /// Overview reads and invalidation.
    Overview,
}

impl Quota {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Lifecycle => "lifecycle",
            Self::Turn => "turn",
            Self::Overview => "overview",
        }
    }
}

/// Identity a request is counted against: the caller, or the network origin
/// when the request carries no caller identity.
fn quota_identity(caller: &Caller, origin: &NetworkOrigin) -> String {
    let caller = caller.0.trim();
    if caller.is_empty() {
        format!("origin:{}", origin.0)
    } else {
        format!("caller:{caller}")
    }
}

impl AppState {
    fn check_quota(&self, quota: Quota, caller: &Caller, origin: &NetworkOrigin) -> Result<()> {
        let limits = &self.config.rate_limits;
        let limit = match quota {
            Quota::Lifecycle => limits.lifecycle,
            Quota::Turn => limits.turn,
            Quota::Overview => limits.overview,
        };
        let identifier = format!("{}:{}", quota.as_str(), quota_identity(caller, origin));
        self.limiter.check(limit, &identifier)
    }
}

// ============================================================================
// Extractors
// ============================================================================

/// Authenticated caller identity from the `x-user-id` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = TutorError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.to_string()))
            .ok_or(TutorError::Unauthorized)
    }
}

/// Network origin of the request, used to key rate limits.
///
/// Taken from the first `x-forwarded-for` entry, then `x-real-ip`, then the
/// socket peer address; `unknown` when none is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkOrigin(pub String);

impl NetworkOrigin {
    fn from_headers(headers: &HeaderMap) -> Option<String> {
        let header_value = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        header_value("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
            .filter(|v| !v.is_empty())
            .or_else(|| header_value("x-real-ip").map(|v| v.trim().to_string()))
            .filter(|v| !v.is_empty())
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for NetworkOrigin {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let origin = Self::from_headers(&parts.headers)
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Self(origin))
    }
}

// ============================================================================
// Error Responses
// ============================================================================

impl From<JsonRejection> for TutorError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl TutorError {
    /// HTTP status the error maps to.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::SessionNotFound { .. } | Self::SourceNotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvalidSessionType { .. } | Self::SessionConflict { .. } => StatusCode::CONFLICT,
            Self::InvalidStructure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::GenerationFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::ConfigParseError { .. }
            | Self::ConfigValidationError { .. }
            | Self::CatalogLoadError { .. }
            | Self::Io(_)
            | Self::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TutorError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self, "Internal error while handling request");
            "Internal server error".to_string()
        } else {
            debug!(error = %self, code = self.code(), "Request rejected");
            self.to_string()
        };

        let body = Json(ErrorResponse {
            error: message,
            code: self.code().to_string(),
        });

        let mut response = (status, body).into_response();
        if let Self::RateLimitExceeded { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all endpoints.
///
/// The router carries request tracing and a permissive CORS policy for the
/// browser front end.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/sessions", post(handle_start))
        .route("/sessions/turn", post(handle_turn))
        .route("/sessions/analyze", post(handle_analyze))
        .route("/sessions/review", post(handle_review))
        .route("/sessions/:id", get(handle_get_session))
        .route("/sessions/:id/complete", post(handle_complete))
        .route("/overview", post(handle_overview))
        .route("/overview/:source_id", delete(handle_invalidate_overview));

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `POST /api/sessions`.
async fn handle_start(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    origin: NetworkOrigin,
    payload: std::result::Result<Json<StartSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StartSessionResponse>)> {
    let Json(request) = payload?;
    request.validate()?;
    state.check_quota(Quota::Lifecycle, &caller, &origin)?;

    debug!(caller = %caller.0, source_id = %request.source_id, "Starting session");

    let session = state
        .engine
        .start(StartParams {
            source_id: request.source_id.trim().to_string(),
            level: request.level,
            selected_role: request.selected_role,
            language: request.language,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(StartSessionResponse::from(&session))))
}

/// Handler for `GET /api/sessions/:id`.
async fn handle_get_session(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    origin: NetworkOrigin,
    Path(id): Path<String>,
) -> Result<Json<TutorSession>> {
    let id = parse_session_id(&id)?;
    state.check_quota(Quota::Turn, &caller, &origin)?;

    Ok(Json(state.engine.session(id).await?))
}

/// Handler for `POST /api/sessions/turn`.
async fn handle_turn(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    origin: NetworkOrigin,
    payload: std::result::Result<Json<TurnRequest>, JsonRejection>,
) -> Result<Json<TurnResult>> {
    let Json(request) = payload?;
    let id = request.validate(state.config.max_utterance_chars)?;
    state.check_quota(Quota::Turn, &caller, &origin)?;

    let result = state
        .engine
        .turn(id, request.learner_utterance.trim(), request.language)
        .await?;
    Ok(Json(result))
}

/// Handler for `POST /api/sessions/:id/complete`.
async fn handle_complete(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    origin: NetworkOrigin,
    Path(id): Path<String>,
) -> Result<Json<TutorSession>> {
    let id = parse_session_id(&id)?;
    state.check_quota(Quota::Lifecycle, &caller, &origin)?;

    Ok(Json(state.engine.complete(id).await?))
}

/// Handler for `POST /api/sessions/analyze`.
async fn handle_analyze(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    origin: NetworkOrigin,
    payload: std::result::Result<Json<SessionRequest>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>> {
    let Json(request) = payload?;
    let id = parse_session_id(&request.session_id)?;
    state.check_quota(Quota::Lifecycle, &caller, &origin)?;

    let errors = state.engine.analyze(id).await?;
    Ok(Json(AnalyzeResponse {
        session_id: id,
        errors,
    }))
}

/// Handler for `POST /api/sessions/review`.
///
/// Returns the review as JSON, or as a Markdown document when `format` is
/// `markdown`.
async fn handle_review(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    origin: NetworkOrigin,
    payload: std::result::Result<Json<ReviewRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(request) = payload?;
    let id = request.validate()?;
    state.check_quota(Quota::Lifecycle, &caller, &origin)?;

    let review = state
        .engine
        .review(
            id,
            ReviewParams {
                level: request.level,
                language: request.language,
                errors: request.errors,
            },
        )
        .await?;

    Ok(match request.format {
        ReviewFormat::Json => Json(review).into_response(),
        ReviewFormat::Markdown => (
            [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            MarkdownGenerator::new(&review).generate(),
        )
            .into_response(),
    })
}

/// Handler for `POST /api/overview`.
async fn handle_overview(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    origin: NetworkOrigin,
    payload: std::result::Result<Json<OverviewRequest>, JsonRejection>,
) -> Result<Json<Overview>> {
    let Json(request) = payload?;
    require_non_blank("sourceId", &request.source_id)?;
    state.check_quota(Quota::Overview, &caller, &origin)?;

    Ok(Json(state.engine.overview(request.source_id.trim()).await?))
}

/// Handler for `DELETE /api/overview/:source_id`.
async fn handle_invalidate_overview(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    origin: NetworkOrigin,
    Path(source_id): Path<String>,
) -> Result<Json<InvalidateResponse>> {
    state.check_quota(Quota::Overview, &caller, &origin)?;

    let invalidated = state.engine.invalidate_overview(&source_id);
    Ok(Json(InvalidateResponse {
        source_id,
        invalidated,
    }))
}

/// Handler for `GET /health`.
async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let ready = state.engine.generator_ready();
    let status = if ready { "ok" } else { "degraded" };
    Json(serde_json::json!({
        "status": status,
        "generator": {
            "backend": state.engine.generator_backend(),
            "ready": ready,
        },
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Handler for `GET /`.
async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "lingo-tutor",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "startSession": "POST /api/sessions",
            "getSession": "GET /api/sessions/:id",
            "turn": "POST /api/sessions/turn",
            "complete": "POST /api/sessions/:id/complete",
            "analyze": "POST /api/sessions/analyze",
            "review": "POST /api/sessions/review",
            "overview": "POST /api/overview",
            "invalidateOverview": "DELETE /api/overview/:source_id",
            "health": "GET /health",
        },
    }))
}

// ============================================================================
// Tests
// ============================================================================
