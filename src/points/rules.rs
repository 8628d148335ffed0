//! Static point-grant and leveling configuration. These tables are the
//! single source of truth; the service layer never hardcodes amounts.

/// How often an action may be credited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gating {
    /// No restriction.
    Unlimited,
    /// At most once per calendar day (UTC).
    Daily,
    /// At most once, ever.
    Once,
    /// At most `n` times per calendar day (UTC).
    DailyLimit(i64),
}

#[derive(Debug, Clone, Copy)]
pub struct ActionRule {
    pub action: &'static str,
    pub points: i64,
    pub gating: Gating,
    pub description: &'static str,
}

pub const ACTION_RULES: [ActionRule; 9] = [
    ActionRule {
        action: "signup",
        points: 100,
        gating: Gating::Once,
        description: "signup bonus",
    },
    ActionRule {
        action: "login",
        points: 10,
        gating: Gating::Daily,
        description: "daily check-in",
    },
    ActionRule {
        action: "profile_complete",
        points: 50,
        gating: Gating::Once,
        description: "profile completed",
    },
    ActionRule {
        action: "post_create",
        points: 20,
        gating: Gating::DailyLimit(5),
        description: "post published",
    },
    ActionRule {
        action: "comment_create",
        points: 5,
        gating: Gating::DailyLimit(10),
        description: "comment written",
    },
    ActionRule {
        action: "post_like_received",
        points: 2,
        gating: Gating::DailyLimit(50),
        description: "post liked",
    },
    ActionRule {
        action: "badge",
        points: 0,
        gating: Gating::Unlimited,
        description: "badge reward",
    },
    ActionRule {
        action: "level_up",
        points: 50,
        gating: Gating::Unlimited,
        description: "level-up bonus",
    },
    ActionRule {
        action: "admin_adjust",
        points: 0,
        gating: Gating::Unlimited,
        description: "manual adjustment",
    },
];

#[derive(Debug, Clone, Copy)]
pub struct LevelStep {
    pub level: i32,
    pub required_points: i64,
    pub title: &'static str,
}

/// Ordered by strictly increasing `required_points`.
pub const LEVELS: [LevelStep; 7] = [
    LevelStep {
        level: 1,
        required_points: 0,
        title: "Newcomer",
    },
    LevelStep {
        level: 2,
        required_points: 100,
        title: "Wanderer",
    },
    LevelStep {
        level: 3,
        required_points: 500,
        title: "Regular",
    },
    LevelStep {
        level: 4,
        required_points: 1500,
        title: "Contributor",
    },
    LevelStep {
        level: 5,
        required_points: 3000,
        title: "Veteran",
    },
    LevelStep {
        level: 6,
        required_points: 6000,
        title: "Expert",
    },
    LevelStep {
        level: 7,
        required_points: 10000,
        title: "Legend",
    },
];

pub fn action_rule(action: &str) -> Option<&'static ActionRule> {
    ACTION_RULES.iter().find(|r| r.action == action)
}

/// Highest level whose threshold the given lifetime total has reached.
pub fn level_for(total_points: i64) -> i32 {
    LEVELS
        .iter()
        .rev()
        .find(|s| s.required_points <= total_points)
        .map(|s| s.level)
        .unwrap_or(1)
}

pub fn level_title(level: i32) -> &'static str {
    LEVELS
        .iter()
        .find(|s| s.level == level)
        .map(|s| s.title)
        .unwrap_or("Newcomer")
}

#[cfg(test)]
mod rules_tests {
    use super::*;

    #[test]
    fn thresholds_strictly_increase() {
        for pair in LEVELS.windows(2) {
            assert!(pair[0].required_points < pair[1].required_points);
            assert!(pair[0].level < pair[1].level);
        }
    }

    #[test]
    fn level_lookup_matches_table() {
        assert_eq!(level_for(0), 1);
        assert_eq!(level_for(99), 1);
        assert_eq!(level_for(100), 2);
        assert_eq!(level_for(499), 2);
        assert_eq!(level_for(500), 3);
        assert_eq!(level_for(9_999), 6);
        assert_eq!(level_for(10_000), 7);
        assert_eq!(level_for(1_000_000), 7);
    }

    #[test]
    fn negative_totals_stay_at_level_one() {
        assert_eq!(level_for(-50), 1);
    }

    #[test]
    fn known_actions_resolve() {
        let login = action_rule("login").expect("login rule");
        assert_eq!(login.points, 10);
        assert_eq!(login.gating, Gating::Daily);

        let signup = action_rule("signup").expect("signup rule");
        assert_eq!(signup.gating, Gating::Once);

        assert!(action_rule("no_such_action").is_none());
    }

    #[test]
    fn titles_resolve_for_every_level() {
        for step in LEVELS {
            assert_eq!(level_title(step.level), step.title);
        }
        assert_eq!(level_title(99), "Newcomer");
    }
}
