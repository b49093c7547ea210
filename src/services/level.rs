// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Piecewise XP → level curve.
//!
//! | levels  | XP per level | band starts at |
//! |---------|--------------|----------------|
//! | 1–50    | 100          | 0              |
//! | 51–100  | 300          | 5 000          |
//! | 101–150 | 1 000        | 20 000         |
//! | 151+    | 5 000        | 70 000         |
//!
//! Each band is selected by a strict `xp < threshold` check, so an exact
//! threshold value belongs to the next band.

use serde::Serialize;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

const BAND1_END: u64 = 5_000;
const BAND2_END: u64 = BAND1_END + 50 * 300;
const BAND3_END: u64 = BAND2_END + 50 * 1_000;

/// Level for a cumulative XP total.
pub fn level_for_xp(xp: u64) -> u32 {
    let level = if xp < BAND1_END {
        xp / 100 + 1
    } else if xp < BAND2_END {
        50 + (xp - BAND1_END) / 300
    } else if xp < BAND3_END {
        100 + (xp - BAND2_END) / 1_000
    } else {
        150 + (xp - BAND3_END) / 5_000
    };
    u32::try_from(level).unwrap_or(u32::MAX)
}

/// Smallest XP total at which `level_for_xp` reaches `level`.
pub fn xp_floor_for_level(level: u32) -> u64 {
    let level = u64::from(level.max(1));
    match level {
        1..=50 => (level - 1) * 100,
        // Band 2 starts at level 50 again (5 000 XP), so 51 needs one more step
        51..=99 => BAND1_END + (level - 50) * 300,
        100..=149 => BAND2_END + (level - 100) * 1_000,
        _ => BAND3_END + (level - 150) * 5_000,
    }
}

/// Where a player sits inside the current level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct LevelProgress {
    pub level: u32,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub level_floor_xp: u64,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub next_level_xp: u64,
}

pub fn level_progress(xp: u64) -> LevelProgress {
    let level = level_for_xp(xp);
    LevelProgress {
        level,
        level_floor_xp: xp_floor_for_level(level),
        next_level_xp: xp_floor_for_level(level.saturating_add(1)),
    }
}
