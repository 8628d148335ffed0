use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, instrument};

use crate::{
    auth::{AdminUser, AuthUser},
    state::AppState,
};

use super::badges::{self, AwardedBadge};
use super::dto::{EvaluateBadgesRequest, GrantRequest, LeaderboardParams, Pagination};
use super::repo::{self, BadgeRow, LeaderboardRow, LedgerEntry};
use super::services::{self, CheckInResult, GrantOptions, GrantOutcome, PointsSummary};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/points/grant", post(grant_points))
        .route("/points/leaderboard", get(leaderboard))
        .route("/admin/points/audit/:user_id", get(audit_ledger))
        .route("/me/check-in", post(check_in))
        .route("/me/points", get(my_points))
        .route("/me/points/history", get(my_history))
        .route("/me/badges", get(my_badges))
        .route("/me/badges/evaluate", post(evaluate_badges))
}

/// POST /points/grant: trusted trigger for content actions and manual
/// adjustments. Gating rejections come back as 200s with `success: false`.
#[instrument(skip(state, body))]
pub async fn grant_points(
    State(state): State<AppState>,
    AdminUser(_admin_id): AdminUser,
    Json(body): Json<GrantRequest>,
) -> Result<Json<GrantOutcome>, (StatusCode, String)> {
    let outcome = services::grant(
        &state.db,
        body.user_id,
        &body.action,
        GrantOptions {
            points: body.points,
            description: body.description,
            related_type: body.related_type,
            related_id: body.related_id,
        },
    )
    .await
    .map_err(|e| {
        error!(error = %e, user_id = %body.user_id, action = %body.action, "grant failed");
        (StatusCode::BAD_REQUEST, e.to_string())
    })?;

    Ok(Json(outcome))
}

/// POST /me/check-in: daily attendance.
#[instrument(skip(state))]
pub async fn check_in(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<CheckInResult>, (StatusCode, String)> {
    let result = services::check_in(&state, user_id).await.map_err(|e| {
        error!(error = %e, %user_id, "check-in failed");
        internal(e)
    })?;

    // Streak badges are evaluated by the caller of the grant, per the
    // composition rules; failures here must not undo the check-in.
    if let Err(e) =
        badges::evaluate_badges(&state, user_id, "login_streak", result.consecutive_logins as i64)
            .await
    {
        error!(error = %e, %user_id, "streak badge evaluation failed");
    }

    Ok(Json(result))
}

/// GET /me/points: balance, level, rank and streak in one call.
#[instrument(skip(state))]
pub async fn my_points(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PointsSummary>, (StatusCode, String)> {
    let summary = services::summary(&state.db, user_id)
        .await
        .map_err(internal)?;
    Ok(Json(summary))
}

/// GET /me/points/history: ledger page, newest first.
#[instrument(skip(state))]
pub async fn my_history(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<LedgerEntry>>, (StatusCode, String)> {
    let entries = repo::ledger_page(&state.db, user_id, p.limit, p.offset)
        .await
        .map_err(internal)?;
    Ok(Json(entries))
}

/// GET /points/leaderboard
#[instrument(skip(state))]
pub async fn leaderboard(
    State(state): State<AppState>,
    Query(p): Query<LeaderboardParams>,
) -> Result<Json<Vec<LeaderboardRow>>, (StatusCode, String)> {
    let rows = repo::leaderboard(&state.db, p.limit.clamp(1, 100))
        .await
        .map_err(internal)?;
    Ok(Json(rows))
}

/// GET /me/badges
#[instrument(skip(state))]
pub async fn my_badges(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<BadgeRow>>, (StatusCode, String)> {
    let rows = repo::badges_of_user(&state.db, user_id)
        .await
        .map_err(internal)?;
    Ok(Json(rows))
}

/// POST /me/badges/evaluate: progress value is looked up server-side.
#[instrument(skip(state, body))]
pub async fn evaluate_badges(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<EvaluateBadgesRequest>,
) -> Result<Json<Vec<AwardedBadge>>, (StatusCode, String)> {
    let value = badges::condition_value(&state, user_id, &body.condition_type)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let awarded = badges::evaluate_badges(&state, user_id, &body.condition_type, value)
        .await
        .map_err(internal)?;

    Ok(Json(awarded))
}

/// GET /admin/points/audit/:user_id: replay the ledger and compare against
/// the stored lifetime total. The two must always agree.
#[instrument(skip(state))]
pub async fn audit_ledger(
    State(state): State<AppState>,
    AdminUser(_admin_id): AdminUser,
    axum::extract::Path(user_id): axum::extract::Path<uuid::Uuid>,
) -> Result<Json<LedgerAudit>, (StatusCode, String)> {
    let user = repo::get_user_points(&state.db, user_id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "User not found".to_string()))?;
    let ledger_sum = repo::sum_ledger(&state.db, user_id).await.map_err(internal)?;

    Ok(Json(LedgerAudit {
        user_id,
        total_points: user.total_points,
        ledger_sum,
        consistent: user.total_points == ledger_sum,
    }))
}

#[derive(Debug, serde::Serialize)]
pub struct LedgerAudit {
    pub user_id: uuid::Uuid,
    pub total_points: i64,
    pub ledger_sum: i64,
    pub consistent: bool,
}

fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
