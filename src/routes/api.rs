// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Progression API for authenticated users.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::db::collections;
use crate::error::Result;
use crate::middleware::AuthUser;
use crate::models::badge::earned_badges;
use crate::models::{ActivityCounts, Badge, LeaderboardEntry, UserProgression};
use crate::services::level::{level_progress, LevelProgress};
use crate::services::progression::PassOutcome;
use crate::AppState;

/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/session", post(check_in))
        .route("/api/me/progression", get(get_progression))
        .route("/api/me/xp", post(award_xp))
        .route("/api/me/username", put(claim_username))
        .route("/api/me/badges", get(get_badges))
        .route("/api/leaderboard", get(get_leaderboard))
}

// ─── Progression ─────────────────────────────────────────────

/// Progression record plus where it sits inside the current level.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionResponse {
    #[serde(flatten)]
    pub progression: UserProgression,
    pub level_progress: LevelProgress,
}

impl From<UserProgression> for ProgressionResponse {
    fn from(progression: UserProgression) -> Self {
        let level_progress = level_progress(progression.xp);
        Self {
            progression,
            level_progress,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInResponse {
    pub outcome: PassOutcome,
    /// Reflects this check-in's write; not re-read from the store.
    pub provisional: bool,
    pub progression: ProgressionResponse,
}

/// Login-driven check-in: creates the record on first login and runs one
/// evaluation pass.
async fn check_in(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<CheckInResponse>> {
    let check_in = state
        .engine
        .check_in(&user.user_id, user.display_name.clone())
        .await?;

    Ok(Json(CheckInResponse {
        outcome: check_in.outcome,
        provisional: !matches!(check_in.outcome, PassOutcome::NoOp),
        progression: check_in.progression.into(),
    }))
}

async fn get_progression(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ProgressionResponse>> {
    let progression = state.engine.current(&user.user_id).await?;
    Ok(Json(progression.into()))
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct AwardXpRequest {
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub amount: u64,
}

/// Award XP from a collaborator module (workout logged, task completed).
async fn award_xp(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<AwardXpRequest>,
) -> Result<Json<ProgressionResponse>> {
    let progression = state
        .engine
        .award_xp(&user.user_id, request.amount)
        .await
        .inspect_err(|e| {
            tracing::warn!(
                user_id = %user.user_id,
                amount = request.amount,
                error = %e,
                "XP award failed"
            );
        })?;

    Ok(Json(progression.into()))
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UsernameRequest {
    pub username: String,
}

async fn claim_username(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<UsernameRequest>,
) -> Result<Json<ProgressionResponse>> {
    let progression = state
        .engine
        .claim_username(&user.user_id, &request.username)
        .await?;
    Ok(Json(progression.into()))
}

// ─── Badges ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct BadgesResponse {
    pub badges: Vec<Badge>,
}

async fn get_badges(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<BadgesResponse>> {
    let owner = Some(user.user_id.as_str());
    let progression = state.engine.current(&user.user_id).await?;

    let (tasks, workouts, transactions) = tokio::try_join!(
        state.collections.list(owner, collections::TASKS),
        state.collections.list(owner, collections::TRAINING_HISTORY),
        state.collections.list(owner, collections::FINANCE),
    )?;

    let fields = |records: Vec<crate::db::SyncedRecord>| {
        records.into_iter().map(|r| r.fields).collect::<Vec<_>>()
    };
    let counts = ActivityCounts::from_records(
        &fields(tasks),
        &fields(workouts),
        &fields(transactions),
        state.config.rules.day_offset,
    );

    Ok(Json(BadgesResponse {
        badges: earned_badges(&progression, &counts),
    }))
}

// ─── Leaderboard ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<u32>,
}

async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>> {
    Ok(Json(state.engine.leaderboard(query.limit).await?))
}
