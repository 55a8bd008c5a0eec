//! Wallet sign-in endpoints.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::ethereum::is_valid_address;
use crate::state::AppState;

use super::{HttpError, bounded};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/message", post(request_message))
        .route("/auth", post(authenticate))
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub address: String,
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: i64,
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserView,
}

async fn request_message(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, HttpError> {
    validate_address(&request.address)?;
    let message = bounded(state.auth.issue_challenge(&request.address)).await?;
    Ok(Json(MessageResponse { message }))
}

async fn authenticate(
    State(state): State<AppState>,
    Json(request): Json<AuthRequest>,
) -> Result<Json<AuthResponse>, HttpError> {
    validate_address(&request.address)?;
    if request.signature.trim().is_empty() {
        return Err(ServiceError::ValidationFailed("signature must not be empty".into()).into());
    }

    let outcome = bounded(
        state
            .auth
            .authenticate(&request.address, &request.signature),
    )
    .await?;
    Ok(Json(AuthResponse {
        token: outcome.access_token.token,
        expires_at: outcome.access_token.expires_at,
        user: UserView {
            id: outcome.user.id,
            address: outcome.user.address,
        },
    }))
}

pub(super) fn validate_address(address: &str) -> Result<(), HttpError> {
    if !is_valid_address(address.trim()) {
        return Err(ServiceError::ValidationFailed(format!(
            "address must be 0x followed by 40 hex digits, got {address:?}"
        ))
        .into());
    }
    Ok(())
}
