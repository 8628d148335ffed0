pub mod repo;

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use crate::{auth::AuthUser, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub level: i32,
    pub points: i64,
    pub total_points: i64,
    pub avatar_url: Option<String>,
    pub created_at: OffsetDateTime,
}

const AVATAR_URL_TTL_SECS: u64 = 30 * 60;

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<MeResponse>, (StatusCode, String)> {
    let user = repo::find_by_id(&state.db, user_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or((StatusCode::NOT_FOUND, "User not found".to_string()))?;

    let avatar_url = match &user.avatar_key {
        Some(key) => Some(
            state
                .storage
                .presign_get(key, AVATAR_URL_TTL_SECS)
                .await
                .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?,
        ),
        None => None,
    };

    Ok(Json(MeResponse {
        id: user.id,
        email: user.email,
        display_name: user.display_name,
        level: user.level,
        points: user.points,
        total_points: user.total_points,
        avatar_url,
        created_at: user.created_at,
    }))
}
