use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{error, instrument};

use crate::{
    auth::{AdminUser, AuthUser},
    state::AppState,
};

use super::dto::{
    AvatarResponse, BatchUploadResponse, CharacterUploadResponse, CopyObjectRequest, FailedFile,
    Pagination, StorageListParams, StorageListResponse, StorageObject, UploadListItem,
    UploadedFile, VariantResponse,
};
use super::repo;
use super::services::{self, UploadItem};

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/characters/:category/:pose", post(upload_character))
        .route("/admin/uploads/:folder", get(list_uploads))
        .route("/admin/storage", get(list_storage))
        .route("/admin/storage/copy", post(copy_storage_object))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/uploads/:folder", post(upload_batch))
        .route("/me/avatar", put(upload_avatar))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

/// POST /admin/characters/:category/:pose (multipart, field `file`)
/// All four resolution variants must store or the request fails.
#[instrument(skip(state, mp))]
pub async fn upload_character(
    State(state): State<AppState>,
    AdminUser(_admin_id): AdminUser,
    Path((category, pose)): Path<(String, String)>,
    mp: Multipart,
) -> Result<Json<CharacterUploadResponse>, (StatusCode, String)> {
    let file = read_single_file(mp, "file").await?;
    if !services::is_allowed_mime(&file.content_type) {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("unsupported content type: {}", file.content_type),
        ));
    }

    let report = services::upload_character_set(&state, &category, &pose, file.body)
        .await
        .map_err(|e| {
            error!(error = %e, %category, %pose, "character upload failed");
            (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        })?;

    Ok(Json(CharacterUploadResponse {
        category,
        pose,
        quality_warning: report.quality_warning,
        variants: report
            .variants
            .into_iter()
            .map(|v| VariantResponse {
                suffix: v.suffix.to_string(),
                target_size: v.target_size,
                undersized: v.undersized,
                key: v.key,
                width: v.width,
                height: v.height,
                size_bytes: v.size_bytes,
            })
            .collect(),
    }))
}

/// POST /uploads/:folder (multipart, field `files` repeated)
/// Per-file success/failure report; partial success is a 200.
#[instrument(skip(state, mp))]
pub async fn upload_batch(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(folder): Path<String>,
    mut mp: Multipart,
) -> Result<Json<BatchUploadResponse>, (StatusCode, String)> {
    let mut files: Vec<UploadItem> = Vec::new();
    while let Ok(Some(field)) = mp.next_field().await {
        let name = field.name().map(|s| s.to_string());
        if name.as_deref() == Some("files") || name.as_deref() == Some("files[]") {
            let file_name = field
                .file_name()
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("file-{}", files.len()));
            let content_type = field
                .content_type()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "application/octet-stream".into());
            let body = field.bytes().await.map_err(internal)?;
            files.push(UploadItem {
                name: file_name,
                body,
                content_type,
            });
        }
    }
    if files.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "files[] is required".into()));
    }

    let outcome = services::upload_general_batch(&state, user_id, &folder, files)
        .await
        .map_err(|e| {
            error!(error = %e, %user_id, %folder, "batch upload failed");
            (StatusCode::BAD_REQUEST, e.to_string())
        })?;

    Ok(Json(BatchUploadResponse {
        uploaded: outcome
            .uploaded
            .into_iter()
            .map(|o| UploadedFile {
                name: o.name,
                key: o.key,
                content_type: o.content_type,
                size_bytes: o.size_bytes,
                width: o.width,
                height: o.height,
            })
            .collect(),
        failed: outcome
            .failed
            .into_iter()
            .map(|f| FailedFile {
                name: f.name,
                error: f.error,
            })
            .collect(),
    }))
}

/// PUT /me/avatar (multipart, field `file`)
/// Processing failure fails the request; there is no fallback for avatars.
#[instrument(skip(state, mp))]
pub async fn upload_avatar(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mp: Multipart,
) -> Result<Json<AvatarResponse>, (StatusCode, String)> {
    let file = read_single_file(mp, "file").await?;

    let stored = services::upload_profile_image(&state, user_id, file)
        .await
        .map_err(|e| {
            error!(error = %e, %user_id, "avatar upload failed");
            (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        })?;

    Ok(Json(AvatarResponse {
        key: stored.key,
        width: stored.width,
        height: stored.height,
        size_bytes: stored.size_bytes,
    }))
}

const UPLOAD_URL_TTL_SECS: u64 = 30 * 60;

/// GET /admin/uploads/:folder: audit listing for the dashboard, with
/// presigned view URLs.
#[instrument(skip(state))]
pub async fn list_uploads(
    State(state): State<AppState>,
    AdminUser(_admin_id): AdminUser,
    Path(folder): Path<String>,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<UploadListItem>>, (StatusCode, String)> {
    let rows = repo::list_by_folder(&state.db, &folder, p.limit, p.offset)
        .await
        .map_err(internal)?;

    let keys: Vec<String> = rows.iter().map(|r| r.s3_key.clone()).collect();
    let urls = services::presign_many(&state, keys, UPLOAD_URL_TTL_SECS)
        .await
        .map_err(internal)?;

    Ok(Json(
        rows.into_iter()
            .zip(urls)
            .map(|(record, url)| UploadListItem { record, url })
            .collect(),
    ))
}

/// GET /admin/storage?prefix=...&max_keys=...&token=...: raw object
/// listing for dashboard maintenance (orphan hunting after failed sets).
#[instrument(skip(state))]
pub async fn list_storage(
    State(state): State<AppState>,
    AdminUser(_admin_id): AdminUser,
    Query(p): Query<StorageListParams>,
) -> Result<Json<StorageListResponse>, (StatusCode, String)> {
    let page = state
        .storage
        .list_objects(&p.prefix, p.max_keys.clamp(1, 1000), p.token)
        .await
        .map_err(internal)?;

    Ok(Json(StorageListResponse {
        objects: page
            .objects
            .into_iter()
            .map(|o| StorageObject {
                key: o.key,
                size_bytes: o.size_bytes,
            })
            .collect(),
        continuation_token: page.continuation_token,
    }))
}

/// POST /admin/storage/copy: duplicate an object under a new key, e.g.
/// when promoting a staged character set.
#[instrument(skip(state))]
pub async fn copy_storage_object(
    State(state): State<AppState>,
    AdminUser(_admin_id): AdminUser,
    Json(body): Json<CopyObjectRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .storage
        .copy_object(&body.source_key, &body.dest_key)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn read_single_file(
    mut mp: Multipart,
    field_name: &str,
) -> Result<UploadItem, (StatusCode, String)> {
    while let Ok(Some(field)) = mp.next_field().await {
        if field.name() == Some(field_name) {
            let file_name = field
                .file_name()
                .map(|s| s.to_string())
                .unwrap_or_else(|| field_name.to_string());
            let content_type = field
                .content_type()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "application/octet-stream".into());
            let body = field.bytes().await.map_err(internal)?;
            return Ok(UploadItem {
                name: file_name,
                body,
                content_type,
            });
        }
    }
    Err((
        StatusCode::BAD_REQUEST,
        format!("{} is required", field_name),
    ))
}

fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
