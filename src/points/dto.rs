use serde::Deserialize;
use uuid::Uuid;

/// Body for the trusted grant trigger.
#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub user_id: Uuid,
    pub action: String,
    pub points: Option<i64>,
    pub description: Option<String>,
    pub related_type: Option<String>,
    pub related_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateBadgesRequest {
    pub condition_type: String,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}
