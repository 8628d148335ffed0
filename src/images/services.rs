use anyhow::Context;
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;
use uuid::Uuid;

use super::processor::{self, CharacterSet, ImageError, ProcessedImage};
use super::repo;
use crate::state::AppState;

/// Character art categories with a storage namespace.
pub const CHARACTER_CATEGORIES: [&str; 3] = ["mascot", "zodiac", "stickers"];

/// Folders accepted for general uploads.
pub const UPLOAD_FOLDERS: [&str; 4] = ["posts", "banners", "guides", "events"];

/// MIME types accepted by every upload path.
pub const ALLOWED_MIME_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "image/webp"];

pub struct UploadItem {
    pub name: String,
    pub body: Bytes,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub name: String,
    pub key: String,
    pub content_type: String,
    pub size_bytes: usize,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct FailedObject {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub uploaded: Vec<StoredObject>,
    pub failed: Vec<FailedObject>,
}

#[derive(Debug)]
pub struct CharacterVariantReport {
    pub suffix: &'static str,
    pub target_size: u32,
    pub undersized: bool,
    pub key: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: usize,
}

#[derive(Debug)]
pub struct CharacterUploadReport {
    pub variants: Vec<CharacterVariantReport>,
    pub quality_warning: bool,
}

pub fn is_valid_pose_slug(slug: &str) -> bool {
    lazy_static! {
        static ref SLUG_RE: Regex = Regex::new(r"^[a-z0-9-]+$").unwrap();
    }
    SLUG_RE.is_match(slug)
}

pub fn is_allowed_mime(mime: &str) -> bool {
    ALLOWED_MIME_TYPES.contains(&mime)
}

fn character_key(category: &str, pose: &str, suffix: &str) -> String {
    format!("{}/{}/{}{}.webp", category, pose, pose, suffix)
}

/// Process a character source image into its four resolution variants and
/// upload all of them. Any upload failure fails the whole set; variants
/// already stored are best-effort deleted so no partial set is left behind.
pub async fn upload_character_set(
    st: &AppState,
    category: &str,
    pose: &str,
    data: Bytes,
) -> anyhow::Result<CharacterUploadReport> {
    anyhow::ensure!(
        CHARACTER_CATEGORIES.contains(&category),
        "unknown character category: {}",
        category
    );
    anyhow::ensure!(is_valid_pose_slug(pose), "invalid pose identifier: {}", pose);

    let set: CharacterSet = tokio::task::spawn_blocking(move || processor::character_set(&data))
        .await
        .context("character processing task panicked")??;

    let mut uploaded_keys: Vec<String> = Vec::new();
    let mut variants = Vec::with_capacity(set.variants.len());
    for v in set.variants {
        let key = character_key(category, pose, v.suffix);
        let put = st
            .storage
            .put_object(&key, v.image.data.clone(), &v.image.content_type)
            .await
            .with_context(|| format!("put_object {}", key));

        if let Err(e) = put {
            for k in &uploaded_keys {
                if let Err(del_err) = st.storage.delete_object(k).await {
                    warn!(key = %k, error = %del_err, "failed to clean up partial character upload");
                }
            }
            return Err(e);
        }

        uploaded_keys.push(key.clone());
        variants.push(CharacterVariantReport {
            suffix: v.suffix,
            target_size: v.target_size,
            undersized: v.undersized,
            key,
            width: v.image.width,
            height: v.image.height,
            size_bytes: v.image.data.len(),
        });
    }

    Ok(CharacterUploadReport {
        variants,
        quality_warning: set.quality_warning,
    })
}

/// Compress-and-store one general upload. Processing failures fall back to
/// the original buffer so a malformed-but-accepted file still uploads.
async fn store_general_item(
    st: &AppState,
    user_id: Uuid,
    folder: &str,
    item: &UploadItem,
) -> anyhow::Result<StoredObject> {
    anyhow::ensure!(
        is_allowed_mime(&item.content_type),
        "unsupported content type: {}",
        item.content_type
    );

    let body = item.body.clone();
    let declared = item.content_type.clone();
    let processed = tokio::task::spawn_blocking(move || processor::compress_general(&body, &declared))
        .await
        .context("compression task panicked")?;

    let (data, content_type, ext, width, height) = match processed {
        Ok(ProcessedImage {
            data,
            width,
            height,
            content_type,
            ext,
        }) => (data, content_type, ext, Some(width), Some(height)),
        Err(e) => {
            warn!(name = %item.name, error = %e, "image processing failed, storing original");
            (
                item.body.clone(),
                item.content_type.clone(),
                processor::ext_for_mime(&item.content_type).to_string(),
                None,
                None,
            )
        }
    };

    let key = format!("{}/{}/{}.{}", folder, user_id, Uuid::new_v4(), ext);
    st.storage
        .put_object(&key, data.clone(), &content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;

    Ok(StoredObject {
        name: item.name.clone(),
        key,
        content_type,
        size_bytes: data.len(),
        width,
        height,
    })
}

/// Upload a batch of general images. Partial success is success: each file
/// lands in either `uploaded` or `failed`.
pub async fn process_and_upload_batch(
    st: &AppState,
    user_id: Uuid,
    folder: &str,
    items: Vec<UploadItem>,
) -> anyhow::Result<BatchOutcome> {
    anyhow::ensure!(!items.is_empty(), "no files provided");
    anyhow::ensure!(
        UPLOAD_FOLDERS.contains(&folder),
        "unknown upload folder: {}",
        folder
    );

    let mut outcome = BatchOutcome::default();
    for item in &items {
        match store_general_item(st, user_id, folder, item).await {
            Ok(stored) => outcome.uploaded.push(stored),
            Err(e) => outcome.failed.push(FailedObject {
                name: item.name.clone(),
                error: e.to_string(),
            }),
        }
    }
    Ok(outcome)
}

/// Batch upload plus the audit rows the admin dashboard lists.
pub async fn upload_general_batch(
    st: &AppState,
    user_id: Uuid,
    folder: &str,
    items: Vec<UploadItem>,
) -> anyhow::Result<BatchOutcome> {
    let outcome = process_and_upload_batch(st, user_id, folder, items).await?;

    if !outcome.uploaded.is_empty() {
        let mut tx = st.db.begin().await.context("begin tx")?;
        for obj in &outcome.uploaded {
            repo::insert_upload_tx(
                &mut tx,
                Uuid::new_v4(),
                user_id,
                folder,
                &obj.key,
                &obj.content_type,
                obj.size_bytes as i64,
            )
            .await?;
        }
        tx.commit().await.context("commit tx")?;
    }

    Ok(outcome)
}

/// Process and store a profile picture. Unlike the general path, processing
/// failures propagate: a broken avatar is worse than a failed upload.
pub async fn process_and_upload_avatar(
    st: &AppState,
    user_id: Uuid,
    item: UploadItem,
) -> anyhow::Result<StoredObject> {
    anyhow::ensure!(
        is_allowed_mime(&item.content_type),
        "unsupported content type: {}",
        item.content_type
    );

    let body = item.body.clone();
    let processed: Result<ProcessedImage, ImageError> =
        tokio::task::spawn_blocking(move || processor::compress_profile(&body))
            .await
            .context("avatar processing task panicked")?;
    let processed = processed.context("avatar processing failed")?;

    let key = format!("avatars/{}/{}.{}", user_id, Uuid::new_v4(), processed.ext);
    st.storage
        .put_object(&key, processed.data.clone(), &processed.content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;

    Ok(StoredObject {
        name: item.name,
        key,
        content_type: processed.content_type,
        size_bytes: processed.data.len(),
        width: Some(processed.width),
        height: Some(processed.height),
    })
}

/// Swap the user's avatar: store the new object, point the user row at it,
/// then drop the replaced object (best-effort).
pub async fn upload_profile_image(
    st: &AppState,
    user_id: Uuid,
    item: UploadItem,
) -> anyhow::Result<StoredObject> {
    let stored = process_and_upload_avatar(st, user_id, item).await?;

    let previous = crate::users::repo::swap_avatar_key(&st.db, user_id, &stored.key)
        .await
        .context("update avatar key")?;

    if let Some(old_key) = previous {
        if old_key != stored.key {
            if let Err(e) = st.storage.delete_object(&old_key).await {
                warn!(key = %old_key, error = %e, "failed to delete replaced avatar");
            }
        }
    }

    Ok(stored)
}

pub async fn presign_many(
    st: &AppState,
    keys: Vec<String>,
    expires_seconds: u64,
) -> anyhow::Result<Vec<String>> {
    let mut out = Vec::with_capacity(keys.len());
    for k in keys {
        out.push(st.storage.presign_get(&k, expires_seconds).await?);
    }
    Ok(out)
}

#[cfg(test)]
mod services_tests {
    use super::*;
    use crate::state::AppState;
    use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_item(name: &str, w: u32, h: u32) -> UploadItem {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([10, 60, 30, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .expect("encode test png");
        UploadItem {
            name: name.into(),
            body: Bytes::from(buf),
            content_type: "image/png".into(),
        }
    }

    #[test]
    fn pose_slug_validation() {
        assert!(is_valid_pose_slug("waving"));
        assert!(is_valid_pose_slug("pose-07"));
        assert!(!is_valid_pose_slug("Waving"));
        assert!(!is_valid_pose_slug("pose_07"));
        assert!(!is_valid_pose_slug("pose 7"));
        assert!(!is_valid_pose_slug(""));
        assert!(!is_valid_pose_slug("../escape"));
    }

    #[test]
    fn mime_allow_list() {
        assert!(is_allowed_mime("image/jpeg"));
        assert!(is_allowed_mime("image/gif"));
        assert!(!is_allowed_mime("image/heic"));
        assert!(!is_allowed_mime("application/pdf"));
    }

    #[tokio::test]
    async fn character_upload_stores_all_four_variants() {
        let (state, storage) = AppState::fake_with_storage();
        let item = png_item("mascot.png", 2400, 1200);

        let report = upload_character_set(&state, "mascot", "waving", item.body)
            .await
            .expect("upload");

        assert_eq!(report.variants.len(), 4);
        assert!(!report.quality_warning);
        assert_eq!(
            storage.put_keys(),
            vec![
                "mascot/waving/waving.webp",
                "mascot/waving/waving-lg.webp",
                "mascot/waving/waving-md.webp",
                "mascot/waving/waving-sm.webp",
            ]
        );
    }

    #[tokio::test]
    async fn character_upload_rejects_bad_category_and_pose() {
        let (state, storage) = AppState::fake_with_storage();
        let item = png_item("mascot.png", 100, 100);

        assert!(
            upload_character_set(&state, "characters", "waving", item.body.clone())
                .await
                .is_err()
        );
        assert!(upload_character_set(&state, "mascot", "Bad Pose", item.body)
            .await
            .is_err());
        assert!(storage.put_keys().is_empty());
    }

    #[tokio::test]
    async fn partial_character_upload_is_rolled_back() {
        let (state, storage) = AppState::fake_with_storage();
        storage.fail_puts_matching("-md");
        let item = png_item("mascot.png", 2400, 1200);

        let err = upload_character_set(&state, "mascot", "waving", item.body)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("put_object"));

        let deletes = storage.deletes.lock().unwrap().clone();
        assert_eq!(
            deletes,
            vec!["mascot/waving/waving.webp", "mascot/waving/waving-lg.webp"]
        );
    }

    #[tokio::test]
    async fn batch_upload_reports_per_file_outcomes() {
        let (state, storage) = AppState::fake_with_storage();
        let good = png_item("ok.png", 400, 300);
        let bad_mime = UploadItem {
            name: "doc.pdf".into(),
            body: Bytes::from_static(b"%PDF-"),
            content_type: "application/pdf".into(),
        };

        let outcome = process_and_upload_batch(
            &state,
            Uuid::new_v4(),
            "posts",
            vec![good, bad_mime],
        )
        .await
        .expect("batch");

        assert_eq!(outcome.uploaded.len(), 1);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].name, "doc.pdf");
        assert_eq!(storage.puts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn undecodable_file_falls_back_to_original_bytes() {
        let (state, storage) = AppState::fake_with_storage();
        let broken = UploadItem {
            name: "broken.png".into(),
            body: Bytes::from_static(b"definitely not a png"),
            content_type: "image/png".into(),
        };

        let outcome =
            process_and_upload_batch(&state, Uuid::new_v4(), "posts", vec![broken])
                .await
                .expect("batch");

        assert_eq!(outcome.uploaded.len(), 1);
        let stored = &outcome.uploaded[0];
        assert_eq!(stored.content_type, "image/png");
        assert_eq!(stored.width, None);

        let puts = storage.puts.lock().unwrap();
        assert_eq!(puts[0].body.as_ref(), b"definitely not a png");
    }

    #[tokio::test]
    async fn batch_upload_rejects_unknown_folder() {
        let (state, _) = AppState::fake_with_storage();
        let err = process_and_upload_batch(
            &state,
            Uuid::new_v4(),
            "secrets",
            vec![png_item("a.png", 10, 10)],
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("unknown upload folder"));
    }

    #[tokio::test]
    async fn avatar_processing_failure_propagates() {
        let (state, storage) = AppState::fake_with_storage();
        let broken = UploadItem {
            name: "broken.png".into(),
            body: Bytes::from_static(b"nope"),
            content_type: "image/png".into(),
        };

        assert!(process_and_upload_avatar(&state, Uuid::new_v4(), broken)
            .await
            .is_err());
        assert!(storage.put_keys().is_empty());
    }

    #[tokio::test]
    async fn avatar_happy_path_stores_square_webp() {
        let (state, storage) = AppState::fake_with_storage();
        let user_id = Uuid::new_v4();

        let stored = process_and_upload_avatar(&state, user_id, png_item("me.png", 800, 600))
            .await
            .expect("avatar");

        assert_eq!(stored.width, Some(400));
        assert_eq!(stored.height, Some(400));
        assert!(stored.key.starts_with(&format!("avatars/{}/", user_id)));
        assert!(stored.key.ends_with(".webp"));
        assert_eq!(storage.puts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn presign_many_returns_urls_in_order() {
        let state = AppState::fake();
        let urls = presign_many(&state, vec!["a/b/c.webp".into(), "x/y.png".into()], 600)
            .await
            .expect("presign");
        assert_eq!(urls.len(), 2);
        assert!(urls[0].contains("a/b/c.webp"));
        assert!(urls[1].contains("x/y.png"));
    }
}
