use anyhow::Context;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::repo;
use super::services::{grant, GrantOptions};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct AwardedBadge {
    pub code: String,
    pub name: String,
    pub reward_points: i64,
}

/// Award every active badge of `condition_type` the user now qualifies for
/// and has not earned yet. Badge rewards go through the public [`grant`]
/// contract so the idempotency rules live in one place.
pub async fn evaluate_badges(
    st: &AppState,
    user_id: Uuid,
    condition_type: &str,
    value: i64,
) -> anyhow::Result<Vec<AwardedBadge>> {
    let eligible = repo::eligible_badges(&st.db, user_id, condition_type, value).await?;

    let mut awarded = Vec::new();
    for badge in eligible {
        // A concurrent evaluation may have gotten there first; the insert
        // is conflict-tolerant and skipping keeps the reward single-shot.
        if !repo::award_badge(&st.db, user_id, badge.id).await? {
            warn!(%user_id, code = %badge.code, "badge already awarded, skipping reward");
            continue;
        }

        if badge.reward_points > 0 {
            grant(
                &st.db,
                user_id,
                "badge",
                GrantOptions {
                    points: Some(badge.reward_points),
                    description: Some(format!("badge earned: {}", badge.name)),
                    related_type: Some("badge".into()),
                    related_id: Some(badge.id),
                },
            )
            .await?;
        }

        info!(%user_id, code = %badge.code, "badge awarded");
        awarded.push(AwardedBadge {
            code: badge.code,
            name: badge.name,
            reward_points: badge.reward_points,
        });
    }

    Ok(awarded)
}

/// Server-side value lookup for a badge condition, so clients cannot claim
/// arbitrary progress numbers.
pub async fn condition_value(
    st: &AppState,
    user_id: Uuid,
    condition_type: &str,
) -> anyhow::Result<i64> {
    match condition_type {
        "login_streak" => {
            let user = repo::get_user_points(&st.db, user_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("user not found: {}", user_id))?;
            Ok(user.consecutive_logins as i64)
        }
        "posts" | "comments" | "likes_received" => {
            stat_counter(&st.db, user_id, condition_type).await
        }
        other => anyhow::bail!("unknown badge condition type: {}", other),
    }
}

async fn stat_counter(db: &sqlx::PgPool, user_id: Uuid, key: &str) -> anyhow::Result<i64> {
    let value: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT (stats ->> $2)::BIGINT FROM users WHERE id = $1
        "#,
    )
    .bind(user_id)
    .bind(key)
    .fetch_optional(db)
    .await
    .context("read stat counter")?
    .flatten();
    Ok(value.unwrap_or(0))
}
