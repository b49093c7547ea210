// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Achievement badges derived from progression and synced module records.

use chrono::{FixedOffset, Timelike};
use serde::Serialize;
use serde_json::Value;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::models::UserProgression;
use crate::time_utils::parse_utc_rfc3339;

const EARLY_BIRD_HOUR: u32 = 8;
const MOMENTUM_STREAK: u32 = 7;
const GYM_RAT_WORKOUTS: usize = 10;
const PENNY_PINCHER_EXPENSES: usize = 5;
const SCHOLAR_LEVEL: u32 = 5;
const TASK_MASTER_TASKS: usize = 50;

/// Badge identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum BadgeId {
    EarlyBird,
    #[serde(rename = "streak_master_1")]
    Momentum,
    GymRat,
    #[serde(rename = "saver")]
    PennyPincher,
    Scholar,
    #[serde(rename = "completionist")]
    TaskMaster,
}

/// Display metadata for a badge.
#[derive(Debug, Clone, Copy, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Badge {
    pub id: BadgeId,
    pub name: &'static str,
    pub description: &'static str,
}

pub const BADGES: [Badge; 6] = [
    Badge {
        id: BadgeId::EarlyBird,
        name: "Early Bird",
        description: "Completed a task before 8 AM",
    },
    Badge {
        id: BadgeId::Momentum,
        name: "Momentum",
        description: "Reach a 7-day streak",
    },
    Badge {
        id: BadgeId::GymRat,
        name: "Gym Rat",
        description: "Complete 10 workouts",
    },
    Badge {
        id: BadgeId::PennyPincher,
        name: "Penny Pincher",
        description: "Log 5 expenses",
    },
    Badge {
        id: BadgeId::Scholar,
        name: "Scholar",
        description: "Reach Level 5",
    },
    Badge {
        id: BadgeId::TaskMaster,
        name: "Task Master",
        description: "Complete 50 tasks",
    },
];

/// Counts pulled from the synced module collections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityCounts {
    pub completed_tasks: usize,
    /// Completed tasks whose `completedAt` is before 08:00 local time
    pub early_tasks: usize,
    pub workouts: usize,
    pub expenses: usize,
}

impl ActivityCounts {
    /// Derive counts from raw `tasks`, `training_history` and `finance` records.
    pub fn from_records(
        tasks: &[Value],
        workouts: &[Value],
        transactions: &[Value],
        offset: FixedOffset,
    ) -> Self {
        let completed: Vec<&Value> = tasks
            .iter()
            .filter(|task| task.get("completed").and_then(Value::as_bool) == Some(true))
            .collect();

        let early_tasks = completed
            .iter()
            .filter_map(|task| task.get("completedAt").and_then(Value::as_str))
            .filter_map(parse_utc_rfc3339)
            .filter(|at| at.with_timezone(&offset).hour() < EARLY_BIRD_HOUR)
            .count();

        let expenses = transactions.iter().filter(|t| is_expense(t)).count();

        Self {
            completed_tasks: completed.len(),
            early_tasks,
            workouts: workouts.len(),
            expenses,
        }
    }
}

// Older clients tag expenses with `type`; newer ones only store a negative amount.
fn is_expense(transaction: &Value) -> bool {
    transaction.get("type").and_then(Value::as_str) == Some("expense")
        || transaction
            .get("amount")
            .and_then(Value::as_f64)
            .is_some_and(|amount| amount < 0.0)
}

/// Badges earned, in catalogue order.
pub fn earned_badges(progression: &UserProgression, counts: &ActivityCounts) -> Vec<Badge> {
    BADGES
        .iter()
        .copied()
        .filter(|badge| match badge.id {
            BadgeId::EarlyBird => counts.early_tasks > 0,
            BadgeId::Momentum => progression.streak >= MOMENTUM_STREAK,
            BadgeId::GymRat => counts.workouts >= GYM_RAT_WORKOUTS,
            BadgeId::PennyPincher => counts.expenses >= PENNY_PINCHER_EXPENSES,
            BadgeId::Scholar => progression.level >= SCHOLAR_LEVEL,
            BadgeId::TaskMaster => counts.completed_tasks >= TASK_MASTER_TASKS,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_new_user_has_no_badges() {
        let progression = UserProgression::new("uid");
        assert!(earned_badges(&progression, &ActivityCounts::default()).is_empty());
    }

    #[test]
    fn test_progression_badges() {
        let mut progression = UserProgression::new("uid");
        progression.streak = 7;
        progression.level = 5;

        let ids: Vec<BadgeId> = earned_badges(&progression, &ActivityCounts::default())
            .iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, vec![BadgeId::Momentum, BadgeId::Scholar]);
    }

    #[test]
    fn test_counts_from_records() {
        let tasks = vec![
            json!({"title": "a", "completed": true, "completedAt": "2024-01-15T07:59:00Z"}),
            json!({"title": "b", "completed": true, "completedAt": "2024-01-15T09:00:00Z"}),
            json!({"title": "c", "completed": false, "completedAt": "2024-01-15T06:00:00Z"}),
            json!({"title": "d", "completed": true}),
        ];
        let workouts = vec![json!({"routine": "push"}), json!({"routine": "pull"})];
        let transactions = vec![
            json!({"title": "Groceries", "amount": -45.5}),
            json!({"title": "Salary", "amount": 3200}),
            json!({"title": "Rent", "type": "expense", "amount": 900}),
        ];

        let counts = ActivityCounts::from_records(&tasks, &workouts, &transactions, utc());

        assert_eq!(
            counts,
            ActivityCounts {
                completed_tasks: 3,
                early_tasks: 1,
                workouts: 2,
                expenses: 2,
            }
        );
    }

    #[test]
    fn test_early_bird_respects_local_offset() {
        // 06:30 UTC is 08:30 at +02:00
        let tasks = vec![json!({"completed": true, "completedAt": "2024-01-15T06:30:00Z"})];
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();

        assert_eq!(ActivityCounts::from_records(&tasks, &[], &[], utc()).early_tasks, 1);
        assert_eq!(ActivityCounts::from_records(&tasks, &[], &[], plus_two).early_tasks, 0);
    }

    #[test]
    fn test_badge_ids_serialize_with_stable_names() {
        assert_eq!(
            serde_json::to_value(BadgeId::Momentum).unwrap(),
            json!("streak_master_1")
        );
        assert_eq!(
            serde_json::to_value(BadgeId::EarlyBird).unwrap(),
            json!("early_bird")
        );
    }
}
