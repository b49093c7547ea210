// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Progression engine: one evaluation pass per snapshot, XP awards, and
//! the read paths (current record, leaderboard, badges, username claim).
//!
//! Failures are returned to the caller as `AppError` and never roll back
//! the last confirmed state. Callers that act on behalf of a UI log them
//! and keep going.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use validator::{Validate, ValidationError};

use crate::config::ProgressionRules;
use crate::db::ProgressionStore;
use crate::error::{AppError, Result};
use crate::models::leaderboard::rank;
use crate::models::{LeaderboardEntry, ProgressionDelta, UserProgression};
use crate::services::level::level_for_xp;
use crate::services::streak::{self, StreakDecision};
use crate::time_utils::Clock;

pub const DEFAULT_LEADERBOARD_LIMIT: u32 = 10;
pub const MAX_LEADERBOARD_LIMIT: u32 = 100;

/// What an evaluation pass decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PassOutcome {
    CorruptionReset,
    FirstLogin,
    Increment { xp_award: u64, bonus: u64 },
    StreakReset,
    LevelHeal,
    NoOp,
}

impl PassOutcome {
    /// Outcomes that consume the identity's single streak write for the day.
    pub fn is_daily_write(&self) -> bool {
        matches!(
            self,
            Self::CorruptionReset | Self::FirstLogin | Self::Increment { .. } | Self::StreakReset
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassPlan {
    pub outcome: PassOutcome,
    pub delta: ProgressionDelta,
}

/// Result of a login-driven check-in.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckIn {
    pub outcome: PassOutcome,
    /// Snapshot with the pass applied locally; confirmed by the next read.
    pub progression: UserProgression,
}

#[derive(Debug, Validate)]
struct UsernameClaim {
    #[validate(length(min = 3, max = 32), custom(function = "validate_username_chars"))]
    username: String,
}

fn validate_username_chars(username: &str) -> std::result::Result<(), ValidationError> {
    if username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        Ok(())
    } else {
        Err(ValidationError::new("username_chars"))
    }
}

/// Provisional view after awarding `amount` on top of `observed`, plus the
/// level write to issue if the award crosses a level boundary.
pub fn provisional_award(observed: &UserProgression, amount: u64) -> (UserProgression, Option<u32>) {
    let mut view = observed.clone();
    view.xp = view.xp.saturating_add(amount);

    let derived = level_for_xp(view.xp);
    let level_up = (derived > observed.level).then_some(derived);
    if let Some(level) = level_up {
        view.level = level;
    }
    (view, level_up)
}

pub struct ProgressionEngine {
    store: Arc<dyn ProgressionStore>,
    clock: Arc<dyn Clock>,
    rules: ProgressionRules,
    rng: Mutex<StdRng>,
}

impl ProgressionEngine {
    pub fn new(
        store: Arc<dyn ProgressionStore>,
        clock: Arc<dyn Clock>,
        rules: ProgressionRules,
    ) -> Self {
        Self {
            store,
            clock,
            rules,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replace the bonus RNG, for reproducible tests.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn store(&self) -> &Arc<dyn ProgressionStore> {
        &self.store
    }

    pub fn rules(&self) -> &ProgressionRules {
        &self.rules
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Decide the single write an evaluation pass makes for `snapshot`.
    ///
    /// The corruption guard runs first and short-circuits everything else.
    /// Apart from that reset, `level` is only ever raised. Daily writes are
    /// guarded on the snapshot's `lastLogin`, so a second pass planned from
    /// the same snapshot cannot land twice.
    pub fn plan_pass(&self, snapshot: &UserProgression, now: DateTime<Utc>) -> PassPlan {
        let plan = self.plan_unguarded(snapshot, now);
        if plan.outcome.is_daily_write() {
            PassPlan {
                outcome: plan.outcome,
                delta: plan.delta.planned_against(snapshot.last_login),
            }
        } else {
            plan
        }
    }

    fn plan_unguarded(&self, snapshot: &UserProgression, now: DateTime<Utc>) -> PassPlan {
        if streak::should_reset(snapshot.streak, snapshot.xp, &self.rules) {
            return PassPlan {
                outcome: PassOutcome::CorruptionReset,
                delta: ProgressionDelta {
                    xp_set: Some(0),
                    streak_set: Some(1),
                    level_set: Some(1),
                    last_login_set: Some(now),
                    ..ProgressionDelta::default()
                },
            };
        }

        let Some(last_login) = snapshot.last_login else {
            return PassPlan {
                outcome: PassOutcome::FirstLogin,
                delta: heal_level(
                    snapshot,
                    ProgressionDelta {
                        streak_set: Some(1),
                        last_login_set: Some(now),
                        ..ProgressionDelta::default()
                    },
                ),
            };
        };

        let decision = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            streak::evaluate(
                Some(last_login),
                snapshot.streak,
                now,
                self.rules.day_offset,
                &mut *rng,
            )
        };

        match decision {
            StreakDecision::Increment {
                new_streak,
                xp_award,
                bonus,
                new_last_login,
                ..
            } => {
                let new_level = level_for_xp(snapshot.xp.saturating_add(xp_award));
                PassPlan {
                    outcome: PassOutcome::Increment { xp_award, bonus },
                    delta: ProgressionDelta {
                        xp_increment: Some(xp_award),
                        streak_set: Some(new_streak),
                        level_set: (new_level > snapshot.level).then_some(new_level),
                        last_login_set: Some(new_last_login),
                        ..ProgressionDelta::default()
                    },
                }
            }
            StreakDecision::Reset {
                new_streak,
                new_last_login,
            } => PassPlan {
                outcome: PassOutcome::StreakReset,
                delta: heal_level(
                    snapshot,
                    ProgressionDelta {
                        streak_set: Some(new_streak),
                        last_login_set: Some(new_last_login),
                        ..ProgressionDelta::default()
                    },
                ),
            },
            StreakDecision::NoOp => {
                let delta = heal_level(snapshot, ProgressionDelta::default());
                let outcome = if delta.is_empty() {
                    PassOutcome::NoOp
                } else {
                    PassOutcome::LevelHeal
                };
                PassPlan { outcome, delta }
            }
        }
    }

    /// Read the record, creating it with defaults on first authentication.
    pub async fn load_or_create(
        &self,
        user_id: &str,
        display_name: Option<String>,
    ) -> Result<UserProgression> {
        if let Some(existing) = self.store.get_progression(user_id).await? {
            return Ok(existing);
        }

        let fresh = UserProgression::new(user_id).with_display_name(display_name);
        self.store.create_progression(&fresh).await?;

        // A concurrent create may have won; prefer whatever the store holds.
        Ok(self.store.get_progression(user_id).await?.unwrap_or(fresh))
    }

    /// Login-driven check-in: load or create the record and run one pass.
    ///
    /// If another check-in for the same identity commits first, this one
    /// reports `NoOp` with the record as that check-in left it.
    pub async fn check_in(&self, user_id: &str, display_name: Option<String>) -> Result<CheckIn> {
        let now = self.clock.now();
        let mut progression = self.load_or_create(user_id, display_name).await?;
        let plan = self.plan_pass(&progression, now);

        if !plan.delta.is_empty() {
            match self.store.apply_delta(user_id, &plan.delta).await {
                Ok(()) => progression.apply(&plan.delta),
                Err(AppError::Conflict(_)) => {
                    tracing::info!(
                        user_id,
                        outcome = ?plan.outcome,
                        "Check-in already applied by a concurrent session"
                    );
                    return Ok(CheckIn {
                        outcome: PassOutcome::NoOp,
                        progression: self.current(user_id).await?,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            user_id,
            outcome = ?plan.outcome,
            streak = progression.streak,
            xp = progression.xp,
            "Check-in evaluated"
        );

        Ok(CheckIn {
            outcome: plan.outcome,
            progression,
        })
    }

    /// Award XP against the stored record.
    pub async fn award_xp(&self, user_id: &str, amount: u64) -> Result<UserProgression> {
        let observed = self.current(user_id).await?;
        self.award_xp_from(&observed, amount).await
    }

    /// Award XP relative to an already observed view.
    ///
    /// The increment is applied server-side; the returned view is
    /// provisional until the next confirmed snapshot.
    pub async fn award_xp_from(
        &self,
        observed: &UserProgression,
        amount: u64,
    ) -> Result<UserProgression> {
        if amount == 0 {
            return Err(AppError::BadRequest("XP amount must be positive".to_string()));
        }

        let user_id = observed.user_id.as_str();
        let (provisional, level_up) = provisional_award(observed, amount);

        self.store
            .apply_delta(user_id, &ProgressionDelta::xp_increment(amount))
            .await?;

        if let Some(level) = level_up {
            self.store
                .apply_delta(user_id, &ProgressionDelta::level_set(level))
                .await?;
            tracing::info!(user_id, level, "Level up");
        }

        tracing::debug!(user_id, amount, xp = provisional.xp, "XP awarded");
        Ok(provisional)
    }

    pub async fn current(&self, user_id: &str) -> Result<UserProgression> {
        self.store
            .get_progression(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Progression for {}", user_id)))
    }

    /// Top-N by XP. `None` means the default size; larger requests are capped.
    pub async fn leaderboard(&self, limit: Option<u32>) -> Result<Vec<LeaderboardEntry>> {
        let limit = limit
            .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
            .clamp(1, MAX_LEADERBOARD_LIMIT);
        let records = self.store.top_by_xp(limit).await?;

        // Backends may not honor the user ID tiebreak; re-rank locally.
        Ok(rank(records, limit as usize))
    }

    /// Claim a unique handle and complete onboarding.
    pub async fn claim_username(&self, user_id: &str, raw: &str) -> Result<UserProgression> {
        let claim = UsernameClaim {
            username: raw.trim().to_string(),
        };
        claim
            .validate()
            .map_err(|e| AppError::BadRequest(format!("Invalid username: {}", e)))?;

        if let Some(holder) = self.store.find_by_username(&claim.username).await? {
            if holder.user_id != user_id {
                return Err(AppError::Conflict(format!(
                    "Username {} is already taken",
                    claim.username
                )));
            }
        }

        self.store.set_username(user_id, &claim.username).await?;

        let mut progression = self.current(user_id).await?;
        progression.username = Some(claim.username);
        progression.is_onboarded = true;
        Ok(progression)
    }
}

/// Raise `level` to match `xp` if the stored value lags behind.
fn heal_level(snapshot: &UserProgression, mut delta: ProgressionDelta) -> ProgressionDelta {
    let derived = level_for_xp(snapshot.xp);
    if derived > snapshot.level {
        delta.level_set = Some(derived);
    }
    delta
}
