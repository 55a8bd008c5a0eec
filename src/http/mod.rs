use std::future::Future;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::{FromRequestParts, State};
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::state::{AppState, REQUEST_TIMEOUT};

mod auth;
mod faucet;
mod rewards;

pub fn router(state: AppState) -> Router {
    // Browser wallets call the API directly.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, AUTHORIZATION, CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_live))
        .route("/health/ready", get(health_ready))
        .merge(auth::router())
        .merge(faucet::router())
        .merge(rewards::router())
        .layer(cors)
        .with_state(state)
}

async fn health_live(State(state): State<AppState>) -> Result<Json<HealthResponse>, HttpError> {
    let uptime = state.start_time.elapsed().as_secs();
    let response = HealthResponse {
        status: "live",
        uptime_seconds: uptime,
    };
    Ok(Json(response))
}

async fn health_ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>, HttpError> {
    state.database.ping().await.map_err(|err| {
        warn!("Readiness probe failed: {err}");
        HttpError::from(ServiceError::ServiceUnavailable)
    })?;

    let rpc_timeout_ms = u64::try_from(state.rpc_timeout.as_millis()).unwrap_or(u64::MAX);
    let response = ReadyResponse {
        status: "ready",
        rpc_timeout_ms,
        request_timeout_ms: REQUEST_TIMEOUT.as_millis() as u64,
    };
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    status: &'static str,
    rpc_timeout_ms: u64,
    request_timeout_ms: u64,
}

/// Runs a core operation under the request timeout.
pub(crate) async fn bounded<T>(operation: impl Future<Output = ServiceResult<T>>) -> ServiceResult<T> {
    tokio::time::timeout(REQUEST_TIMEOUT, operation)
        .await
        .unwrap_or_else(|_| {
            warn!("Request exceeded {}s", REQUEST_TIMEOUT.as_secs());
            Err(ServiceError::ServiceUnavailable)
        })
}

/// Bearer-authenticated caller, resolved from a session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub i64);

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = HttpError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(ServiceError::InvalidCredential)?;
        let user_id = state.auth.credentials().verify(token)?;
        Ok(Self(user_id))
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    code: &'static str,
    message: String,
    detail: Option<String>,
}

impl HttpError {
    pub fn new(status: StatusCode, code: &'static str, message: String) -> Self {
        assert!(status != StatusCode::OK, "Error status cannot be 200");
        assert!(!message.is_empty(), "Error message cannot be empty");
        Self {
            status,
            code,
            message,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl From<ServiceError> for HttpError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::ValidationFailed(_)
            | ServiceError::AlreadyGranted
            | ServiceError::BalanceNonZero
            | ServiceError::LimitReached => StatusCode::BAD_REQUEST,
            ServiceError::ChallengeNotFound
            | ServiceError::ChallengeExpired
            | ServiceError::WrongSignature
            | ServiceError::InvalidCredential => StatusCode::UNAUTHORIZED,
            ServiceError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let error = Self::new(status, err.code(), err.to_string());
        match err {
            ServiceError::ValidationFailed(detail) => error.with_detail(detail),
            _ => error,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        info!("HTTP error {}: {}", self.status.as_u16(), self.message);
        let body = Json(ErrorBody {
            code: self.code,
            message: self.message,
            detail: self.detail,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}
