use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::error::ServiceError;
use crate::state::{AppState, REQUEST_TIMEOUT};

use super::{AuthenticatedUser, HttpError};

pub fn router() -> Router<AppState> {
    Router::new().route("/faucet", post(request_faucet))
}

#[derive(Debug, Serialize)]
pub struct FaucetResponse {
    pub user_id: i64,
    pub tx_id: String,
    pub created_at: Option<DateTime<Utc>>,
}

async fn request_faucet(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<FaucetResponse>, HttpError> {
    // The faucet sizes its chain submission from this deadline.
    let deadline = Instant::now() + REQUEST_TIMEOUT;
    let grant = tokio::time::timeout_at(deadline, state.faucet.faucet(user_id, deadline))
        .await
        .unwrap_or(Err(ServiceError::ServiceUnavailable))?;

    Ok(Json(FaucetResponse {
        user_id: grant.user_id,
        tx_id: grant.tx_id,
        created_at: DateTime::from_timestamp_millis(grant.created_at),
    }))
}
