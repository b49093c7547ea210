// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Daily login streak evaluation and the corrupted-state guard.
//!
//! Days are compared by local calendar date identity, never by elapsed
//! hours. Twenty hours across midnight is a new day, and a login late on
//! day N followed by one early on day N+2 breaks the streak even though
//! less than 48 hours passed.

use chrono::{DateTime, Datelike, FixedOffset, Utc, Weekday};
use rand::Rng;

use crate::config::ProgressionRules;
use crate::time_utils::local_date;

const DAY_REWARD_STEP: u64 = 10;
const WEEK_LEN: u32 = 7;
/// Streak length before today's login that completes a 7-day run.
const SUNDAY_BONUS_MIN_STREAK: u32 = 6;
const SUNDAY_BONUS_BASE: u64 = 100;
const SUNDAY_BONUS_SPREAD: u64 = 500;

/// True when stored progression values cannot be legitimate.
pub fn should_reset(streak: u32, xp: u64, rules: &ProgressionRules) -> bool {
    streak > rules.streak_ceiling || xp > rules.xp_ceiling
}

/// Outcome of one streak evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakDecision {
    /// Nothing to evaluate yet, or already evaluated today.
    NoOp,
    /// Consecutive day.
    Increment {
        new_streak: u32,
        /// `day_reward + bonus`
        xp_award: u64,
        day_reward: u64,
        bonus: u64,
        new_last_login: DateTime<Utc>,
    },
    /// Gap of two or more days, or a last login dated after today.
    Reset {
        new_streak: u32,
        new_last_login: DateTime<Utc>,
    },
}

/// Weekly-cycling base reward: 10, 20, … 70, then back to 10.
pub fn day_reward(old_streak: u32) -> u64 {
    DAY_REWARD_STEP * u64::from(old_streak % WEEK_LEN + 1)
}

/// Decide what today's login does to the streak.
pub fn evaluate<R: Rng + ?Sized>(
    last_login: Option<DateTime<Utc>>,
    streak: u32,
    now: DateTime<Utc>,
    offset: FixedOffset,
    rng: &mut R,
) -> StreakDecision {
    let Some(last_login) = last_login else {
        return StreakDecision::NoOp;
    };

    let today = local_date(now, offset);
    let last_day = local_date(last_login, offset);

    if last_day == today {
        return StreakDecision::NoOp;
    }

    if today.pred_opt() == Some(last_day) {
        let day_reward = day_reward(streak);
        let bonus = if today.weekday() == Weekday::Sun && streak >= SUNDAY_BONUS_MIN_STREAK {
            SUNDAY_BONUS_BASE + rng.gen_range(0..SUNDAY_BONUS_SPREAD)
        } else {
            0
        };

        return StreakDecision::Increment {
            new_streak: streak.saturating_add(1),
            xp_award: day_reward + bonus,
            day_reward,
            bonus,
            new_last_login: now,
        };
    }

    StreakDecision::Reset {
        new_streak: 1,
        new_last_login: now,
    }
}
