// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod badge;
pub mod leaderboard;
pub mod progression;

pub use badge::{ActivityCounts, Badge, BadgeId};
pub use leaderboard::LeaderboardEntry;
pub use progression::{ProgressionDelta, ProgressionDocument, RecordError, UserProgression};
