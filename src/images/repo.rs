use anyhow::Context;
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

/// Audit row for one stored general-upload object.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UploadRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub folder: String,
    pub s3_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: OffsetDateTime,
}

/// Insert a new upload record within a transaction.
pub async fn insert_upload_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    user_id: Uuid,
    folder: &str,
    s3_key: &str,
    content_type: &str,
    size_bytes: i64,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO uploads (id, user_id, folder, s3_key, content_type, size_bytes)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(folder)
    .bind(s3_key)
    .bind(content_type)
    .bind(size_bytes)
    .execute(&mut **tx)
    .await
    .context("insert upload record")?;

    Ok(())
}

/// Newest-first page of upload records for one folder.
pub async fn list_by_folder(
    db: &PgPool,
    folder: &str,
    limit: i64,
    offset: i64,
) -> anyhow::Result<Vec<UploadRecord>> {
    let rows = sqlx::query_as::<_, UploadRecord>(
        r#"
        SELECT id, user_id, folder, s3_key, content_type, size_bytes, created_at
        FROM uploads
        WHERE folder = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(folder)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await
    .context("list uploads by folder")?;

    Ok(rows)
}
