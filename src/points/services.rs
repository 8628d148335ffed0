use anyhow::Context;
use serde::Serialize;
use sqlx::PgPool;
use time::{Date, OffsetDateTime, Time};
use tracing::{debug, info};
use uuid::Uuid;

use super::repo;
use super::rules::{self, Gating};
use crate::state::AppState;

/// Why a grant was refused without being an error. Callers distinguish
/// these idempotent no-ops from real failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    AlreadyReceived,
    LimitReached,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelUp {
    pub new_level: i32,
    pub level_title: &'static str,
    pub bonus_points: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrantOutcome {
    pub success: bool,
    pub reason: Option<RejectReason>,
    pub action: String,
    pub points: i64,
    pub balance: i64,
    pub total_points: i64,
    pub level: i32,
    pub level_up: Option<LevelUp>,
}

#[derive(Debug, Default, Clone)]
pub struct GrantOptions {
    pub points: Option<i64>,
    pub description: Option<String>,
    pub related_type: Option<String>,
    pub related_id: Option<Uuid>,
}

/// Grant points for one action, idempotently.
///
/// The whole grant runs in a single transaction opened with a row lock on
/// the user, so the gating probes, the ledger append and the balance update
/// cannot race a concurrent grant for the same user. Gating rejections
/// roll back untouched and come back as structured outcomes, not errors.
pub async fn grant(
    db: &PgPool,
    user_id: Uuid,
    action: &str,
    options: GrantOptions,
) -> anyhow::Result<GrantOutcome> {
    let rule = rules::action_rule(action)
        .ok_or_else(|| anyhow::anyhow!("unknown action type: {}", action))?;

    let now = OffsetDateTime::now_utc();
    let mut tx = db.begin().await.context("begin grant tx")?;

    let user = repo::lock_user(&mut tx, user_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("user not found: {}", user_id))?;

    let rejection = match rule.gating {
        Gating::Unlimited => None,
        Gating::Daily => repo::exists_entry_since(&mut tx, user_id, action, day_start(now))
            .await?
            .then_some(RejectReason::AlreadyReceived),
        Gating::Once => repo::exists_entry_ever(&mut tx, user_id, action)
            .await?
            .then_some(RejectReason::AlreadyReceived),
        Gating::DailyLimit(limit) => {
            let today = repo::count_entries_since(&mut tx, user_id, action, day_start(now)).await?;
            (today >= limit).then_some(RejectReason::LimitReached)
        }
    };

    if let Some(reason) = rejection {
        tx.rollback().await.context("rollback grant tx")?;
        debug!(%user_id, action, ?reason, "grant rejected");
        return Ok(GrantOutcome {
            success: false,
            reason: Some(reason),
            action: action.to_string(),
            points: 0,
            balance: user.points,
            total_points: user.total_points,
            level: user.level,
            level_up: None,
        });
    }

    let amount = options.points.unwrap_or(rule.points);
    let description = options
        .description
        .unwrap_or_else(|| rule.description.to_string());
    let day_key = matches!(rule.gating, Gating::Daily).then(|| now.date());

    let mut balance = user.points + amount;
    let mut total_points = user.total_points + amount;

    repo::insert_entry(
        &mut tx,
        user_id,
        action,
        amount,
        &description,
        options.related_type.as_deref(),
        options.related_id,
        balance,
        day_key,
    )
    .await?;
    repo::apply_points_delta(&mut tx, user_id, amount).await?;

    // Level-up is a dependent side effect of the same logical grant: one
    // bonus entry per grant that raises the level, and the bonus itself
    // does not re-trigger evaluation.
    let mut level = user.level;
    let mut level_up = None;
    let reached = rules::level_for(total_points);
    if reached > user.level {
        let bonus_rule = rules::action_rule("level_up")
            .ok_or_else(|| anyhow::anyhow!("level_up action rule missing"))?;
        let bonus = bonus_rule.points;

        repo::set_level(&mut tx, user_id, reached).await?;
        balance += bonus;
        total_points += bonus;
        repo::insert_entry(
            &mut tx,
            user_id,
            "level_up",
            bonus,
            bonus_rule.description,
            None,
            None,
            balance,
            None,
        )
        .await?;
        repo::apply_points_delta(&mut tx, user_id, bonus).await?;

        level = reached;
        level_up = Some(LevelUp {
            new_level: reached,
            level_title: rules::level_title(reached),
            bonus_points: bonus,
        });
        info!(%user_id, new_level = reached, "level up");
    }

    tx.commit().await.context("commit grant tx")?;

    info!(%user_id, action, amount, balance, "points granted");
    Ok(GrantOutcome {
        success: true,
        reason: None,
        action: action.to_string(),
        points: amount,
        balance,
        total_points,
        level,
        level_up,
    })
}

#[derive(Debug, Serialize)]
pub struct CheckInResult {
    pub grant: GrantOutcome,
    pub consecutive_logins: i32,
}

/// Streak transition for a check-in on `today`. Calendar days, not a
/// rolling 24h window.
pub fn next_streak(last_login_day: Option<Date>, today: Date, current: i32) -> i32 {
    match last_login_day {
        Some(day) if day == today => current,
        Some(day) if day.next_day() == Some(today) => current + 1,
        _ => 1,
    }
}

/// Daily attendance: a `login` grant plus streak bookkeeping. The streak
/// updates even when the grant is rejected as already received; the two
/// concerns are independent.
pub async fn check_in(st: &AppState, user_id: Uuid) -> anyhow::Result<CheckInResult> {
    let now = OffsetDateTime::now_utc();
    let user = repo::get_user_points(&st.db, user_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("user not found: {}", user_id))?;

    let streak = next_streak(
        user.last_login_at.map(|t| t.date()),
        now.date(),
        user.consecutive_logins,
    );
    repo::update_login_streak(&st.db, user_id, streak, now).await?;

    let grant = grant(&st.db, user_id, "login", GrantOptions::default()).await?;

    Ok(CheckInResult {
        grant,
        consecutive_logins: streak,
    })
}

#[derive(Debug, Serialize)]
pub struct PointsSummary {
    pub balance: i64,
    pub total_points: i64,
    pub level: i32,
    pub level_title: &'static str,
    pub rank: i64,
    pub consecutive_logins: i32,
}

pub async fn summary(db: &PgPool, user_id: Uuid) -> anyhow::Result<PointsSummary> {
    let user = repo::get_user_points(db, user_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("user not found: {}", user_id))?;
    let rank = repo::rank_of(db, user.total_points).await?;

    Ok(PointsSummary {
        balance: user.points,
        total_points: user.total_points,
        level: user.level,
        level_title: rules::level_title(user.level),
        rank,
        consecutive_logins: user.consecutive_logins,
    })
}

fn day_start(now: OffsetDateTime) -> OffsetDateTime {
    now.replace_time(Time::MIDNIGHT)
}

#[cfg(test)]
mod services_tests {
    use super::*;
    use time::macros::{date, datetime};

    #[test]
    fn streak_increments_on_consecutive_days() {
        assert_eq!(next_streak(Some(date!(2025 - 03 - 14)), date!(2025 - 03 - 15), 4), 5);
    }

    #[test]
    fn streak_unchanged_when_already_checked_in_today() {
        assert_eq!(next_streak(Some(date!(2025 - 03 - 15)), date!(2025 - 03 - 15), 4), 4);
    }

    #[test]
    fn streak_resets_after_a_gap() {
        assert_eq!(next_streak(Some(date!(2025 - 03 - 10)), date!(2025 - 03 - 15), 9), 1);
        assert_eq!(next_streak(None, date!(2025 - 03 - 15), 0), 1);
    }

    #[test]
    fn streak_handles_month_boundaries() {
        assert_eq!(next_streak(Some(date!(2025 - 02 - 28)), date!(2025 - 03 - 01), 2), 3);
        assert_eq!(next_streak(Some(date!(2025 - 12 - 31)), date!(2026 - 01 - 01), 6), 7);
    }

    #[test]
    fn day_start_is_utc_midnight() {
        let now = datetime!(2025-03-15 17:42:03 UTC);
        assert_eq!(day_start(now), datetime!(2025-03-15 0:00 UTC));
    }

    #[test]
    fn reject_reasons_serialize_as_machine_tags() {
        assert_eq!(
            serde_json::to_string(&RejectReason::AlreadyReceived).unwrap(),
            "\"already_received\""
        );
        assert_eq!(
            serde_json::to_string(&RejectReason::LimitReached).unwrap(),
            "\"limit_reached\""
        );
    }

    #[test]
    fn rejected_outcome_shape() {
        let outcome = GrantOutcome {
            success: false,
            reason: Some(RejectReason::AlreadyReceived),
            action: "login".into(),
            points: 0,
            balance: 120,
            total_points: 340,
            level: 2,
            level_up: None,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["reason"], "already_received");
        assert_eq!(json["points"], 0);
    }
}
