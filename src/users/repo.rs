use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub state: String,
    pub points: i64,
    pub total_points: i64,
    pub level: i32,
    pub consecutive_logins: i32,
    pub avatar_key: Option<String>,
    pub admin: bool,
    pub created_at: OffsetDateTime,
}

pub async fn find_by_id(db: &PgPool, user_id: Uuid) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT id, email, display_name, state, points, total_points, level,
               consecutive_logins, avatar_key, admin, created_at
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(db)
    .await
    .context("find user by id")?;
    Ok(user)
}

/// Point the user at a new avatar object, returning the key it replaced.
pub async fn swap_avatar_key(
    db: &PgPool,
    user_id: Uuid,
    new_key: &str,
) -> anyhow::Result<Option<String>> {
    let mut tx = db.begin().await.context("begin tx")?;

    let previous: Option<String> =
        sqlx::query_scalar("SELECT avatar_key FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .context("read current avatar key")?
            .flatten();

    sqlx::query("UPDATE users SET avatar_key = $2 WHERE id = $1")
        .bind(user_id)
        .bind(new_key)
        .execute(&mut *tx)
        .await
        .context("update avatar key")?;

    tx.commit().await.context("commit tx")?;
    Ok(previous)
}
