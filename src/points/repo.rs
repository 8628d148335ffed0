use anyhow::Context;
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// Points-relevant slice of the user row.
#[derive(Debug, Clone, FromRow)]
pub struct UserPoints {
    pub id: Uuid,
    pub state: String,
    pub points: i64,
    pub total_points: i64,
    pub level: i32,
    pub consecutive_logins: i32,
    pub last_login_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub entry_type: String,
    pub points: i64,
    pub description: String,
    pub related_type: Option<String>,
    pub related_id: Option<Uuid>,
    pub balance_after: i64,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BadgeRow {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub condition_type: String,
    pub condition_count: i32,
    pub reward_points: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LeaderboardRow {
    pub id: Uuid,
    pub display_name: String,
    pub total_points: i64,
    pub level: i32,
}

/// Load and row-lock the user for the duration of a grant transaction.
/// Serializes concurrent grants to the same user.
pub async fn lock_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> anyhow::Result<Option<UserPoints>> {
    let row = sqlx::query_as::<_, UserPoints>(
        r#"
        SELECT id, state, points, total_points, level, consecutive_logins, last_login_at
        FROM users
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await
    .context("lock user row")?;
    Ok(row)
}

pub async fn get_user_points(db: &PgPool, user_id: Uuid) -> anyhow::Result<Option<UserPoints>> {
    let row = sqlx::query_as::<_, UserPoints>(
        r#"
        SELECT id, state, points, total_points, level, consecutive_logins, last_login_at
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(db)
    .await
    .context("load user points")?;
    Ok(row)
}

pub async fn exists_entry_since(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    entry_type: &str,
    since: OffsetDateTime,
) -> anyhow::Result<bool> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM point_ledger
            WHERE user_id = $1 AND type = $2 AND created_at >= $3
        )
        "#,
    )
    .bind(user_id)
    .bind(entry_type)
    .bind(since)
    .fetch_one(&mut **tx)
    .await
    .context("check ledger entry since")?;
    Ok(exists)
}

pub async fn exists_entry_ever(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    entry_type: &str,
) -> anyhow::Result<bool> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM point_ledger WHERE user_id = $1 AND type = $2
        )
        "#,
    )
    .bind(user_id)
    .bind(entry_type)
    .fetch_one(&mut **tx)
    .await
    .context("check ledger entry ever")?;
    Ok(exists)
}

pub async fn count_entries_since(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    entry_type: &str,
    since: OffsetDateTime,
) -> anyhow::Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM point_ledger
        WHERE user_id = $1 AND type = $2 AND created_at >= $3
        "#,
    )
    .bind(user_id)
    .bind(entry_type)
    .bind(since)
    .fetch_one(&mut **tx)
    .await
    .context("count ledger entries since")?;
    Ok(count)
}

/// Append one ledger entry. `day_key` is set for daily-gated grants so the
/// partial unique index can reject a concurrent duplicate at insert time.
#[allow(clippy::too_many_arguments)]
pub async fn insert_entry(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    entry_type: &str,
    points: i64,
    description: &str,
    related_type: Option<&str>,
    related_id: Option<Uuid>,
    balance_after: i64,
    day_key: Option<Date>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO point_ledger
            (user_id, type, points, description, related_type, related_id, balance_after, day_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(user_id)
    .bind(entry_type)
    .bind(points)
    .bind(description)
    .bind(related_type)
    .bind(related_id)
    .bind(balance_after)
    .bind(day_key)
    .execute(&mut **tx)
    .await
    .context("insert ledger entry")?;
    Ok(())
}

/// Relative balance update; never read-modify-write from application code.
pub async fn apply_points_delta(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    delta: i64,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE users
        SET points = points + $2, total_points = total_points + $2
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .bind(delta)
    .execute(&mut **tx)
    .await
    .context("apply points delta")?;
    Ok(())
}

pub async fn set_level(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    level: i32,
) -> anyhow::Result<()> {
    sqlx::query("UPDATE users SET level = $2 WHERE id = $1")
        .bind(user_id)
        .bind(level)
        .execute(&mut **tx)
        .await
        .context("set level")?;
    Ok(())
}

pub async fn update_login_streak(
    db: &PgPool,
    user_id: Uuid,
    streak: i32,
    login_at: OffsetDateTime,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE users SET consecutive_logins = $2, last_login_at = $3 WHERE id = $1
        "#,
    )
    .bind(user_id)
    .bind(streak)
    .bind(login_at)
    .execute(db)
    .await
    .context("update login streak")?;
    Ok(())
}

/// "People ahead of me" rank among active users.
pub async fn rank_of(db: &PgPool, total_points: i64) -> anyhow::Result<i64> {
    let ahead: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM users WHERE total_points > $1 AND state = 'active'
        "#,
    )
    .bind(total_points)
    .fetch_one(db)
    .await
    .context("rank query")?;
    Ok(ahead + 1)
}

pub async fn leaderboard(db: &PgPool, limit: i64) -> anyhow::Result<Vec<LeaderboardRow>> {
    let rows = sqlx::query_as::<_, LeaderboardRow>(
        r#"
        SELECT id, display_name, total_points, level
        FROM users
        WHERE state = 'active'
        ORDER BY total_points DESC, created_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(db)
    .await
    .context("leaderboard query")?;
    Ok(rows)
}

pub async fn ledger_page(
    db: &PgPool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> anyhow::Result<Vec<LedgerEntry>> {
    let rows = sqlx::query_as::<_, LedgerEntry>(
        r#"
        SELECT id, user_id, type, points, description, related_type, related_id,
               balance_after, created_at
        FROM point_ledger
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await
    .context("ledger page")?;
    Ok(rows)
}

/// Replay of the full ledger; equals `users.total_points` by invariant.
pub async fn sum_ledger(db: &PgPool, user_id: Uuid) -> anyhow::Result<i64> {
    let sum: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(points), 0) FROM point_ledger WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_one(db)
    .await
    .context("sum ledger")?;
    Ok(sum)
}

/// Active badges of the given condition type the user has not earned yet
/// and whose threshold the value satisfies.
pub async fn eligible_badges(
    db: &PgPool,
    user_id: Uuid,
    condition_type: &str,
    value: i64,
) -> anyhow::Result<Vec<BadgeRow>> {
    let rows = sqlx::query_as::<_, BadgeRow>(
        r#"
        SELECT b.id, b.code, b.name, b.condition_type, b.condition_count,
               b.reward_points, b.is_active
        FROM badges b
        WHERE b.is_active
          AND b.condition_type = $2
          AND b.condition_count <= $3
          AND NOT EXISTS (
              SELECT 1 FROM user_badges ub
              WHERE ub.user_id = $1 AND ub.badge_id = b.id
          )
        ORDER BY b.condition_count ASC
        "#,
    )
    .bind(user_id)
    .bind(condition_type)
    .bind(value)
    .fetch_all(db)
    .await
    .context("eligible badges")?;
    Ok(rows)
}

/// Returns false when the badge was already owned (concurrent award).
pub async fn award_badge(db: &PgPool, user_id: Uuid, badge_id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO user_badges (user_id, badge_id)
        VALUES ($1, $2)
        ON CONFLICT (user_id, badge_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(badge_id)
    .execute(db)
    .await
    .context("award badge")?;
    Ok(result.rows_affected() > 0)
}

pub async fn badges_of_user(db: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<BadgeRow>> {
    let rows = sqlx::query_as::<_, BadgeRow>(
        r#"
        SELECT b.id, b.code, b.name, b.condition_type, b.condition_count,
               b.reward_points, b.is_active
        FROM badges b
        JOIN user_badges ub ON ub.badge_id = b.id
        WHERE ub.user_id = $1
        ORDER BY ub.awarded_at ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await
    .context("badges of user")?;
    Ok(rows)
}
