use serde::{Deserialize, Serialize};

use super::repo::UploadRecord;

#[derive(Debug, Serialize)]
pub struct UploadListItem {
    #[serde(flatten)]
    pub record: UploadRecord,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct VariantResponse {
    pub suffix: String,
    pub target_size: u32,
    pub undersized: bool,
    pub key: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: usize,
}

#[derive(Debug, Serialize)]
pub struct CharacterUploadResponse {
    pub category: String,
    pub pose: String,
    pub quality_warning: bool,
    pub variants: Vec<VariantResponse>,
}

#[derive(Debug, Serialize)]
pub struct UploadedFile {
    pub name: String,
    pub key: String,
    pub content_type: String,
    pub size_bytes: usize,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct FailedFile {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct BatchUploadResponse {
    pub uploaded: Vec<UploadedFile>,
    pub failed: Vec<FailedFile>,
}

#[derive(Debug, Serialize)]
pub struct AvatarResponse {
    pub key: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub size_bytes: usize,
}

#[derive(Debug, Deserialize)]
pub struct StorageListParams {
    pub prefix: String,
    #[serde(default = "default_max_keys")]
    pub max_keys: i32,
    #[serde(default)]
    pub token: Option<String>,
}

fn default_max_keys() -> i32 {
    100
}

#[derive(Debug, Serialize)]
pub struct StorageObject {
    pub key: String,
    pub size_bytes: i64,
}

#[derive(Debug, Serialize)]
pub struct StorageListResponse {
    pub objects: Vec<StorageObject>,
    pub continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CopyObjectRequest {
    pub source_key: String,
    pub dest_key: String,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}
