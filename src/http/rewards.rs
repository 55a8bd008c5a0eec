use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entities::reward_grant;
use crate::state::AppState;

use super::{AuthenticatedUser, HttpError, bounded};

pub fn router() -> Router<AppState> {
    Router::new().route("/rewards", post(apply_reward).get(list_rewards))
}

#[derive(Debug, Serialize)]
pub struct RewardView {
    pub id: i64,
    pub created_at: Option<DateTime<Utc>>,
    /// Mint transaction, once the grant has been batched
    pub tx_id: Option<String>,
}

impl From<reward_grant::Model> for RewardView {
    fn from(grant: reward_grant::Model) -> Self {
        Self {
            id: grant.id,
            created_at: DateTime::from_timestamp_millis(grant.created_at),
            tx_id: grant.tx_id,
        }
    }
}

async fn apply_reward(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<RewardView>, HttpError> {
    let grant = bounded(state.rewards.apply(user_id)).await?;
    Ok(Json(grant.into()))
}

async fn list_rewards(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<Vec<RewardView>>, HttpError> {
    let grants = bounded(state.rewards.list(user_id)).await?;
    Ok(Json(grants.into_iter().map(RewardView::from).collect()))
}
