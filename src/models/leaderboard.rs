// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Leaderboard ranking rows.

use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::models::UserProgression;

/// One ranked leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct LeaderboardEntry {
    /// 1-based rank
    pub rank: u32,
    pub user_id: String,
    pub username: Option<String>,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub xp: u64,
    pub level: u32,
    pub streak: u32,
}

/// Order records by XP descending, ties by user ID, and keep the first `limit`.
pub fn rank(mut records: Vec<UserProgression>, limit: usize) -> Vec<LeaderboardEntry> {
    records.sort_by(|a, b| b.xp.cmp(&a.xp).then_with(|| a.user_id.cmp(&b.user_id)));

    records
        .into_iter()
        .take(limit)
        .zip(1u32..)
        .map(|(record, rank)| LeaderboardEntry {
            rank,
            user_id: record.user_id,
            username: record.username,
            xp: record.xp,
            level: record.level,
            streak: record.streak,
        })
        .collect()
}
