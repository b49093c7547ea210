// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User progression record (XP, level, streak) and its storage shapes.
//!
//! Documents arrive from the store as loosely-typed payloads. They are
//! decoded into [`ProgressionDocument`] (every field optional) and only
//! become a [`UserProgression`] after validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::time_utils::{format_utc_rfc3339, parse_utc_rfc3339};

/// Validated progression state for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserProgression {
    /// Identity the record belongs to (also the document ID)
    pub user_id: String,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub xp: u64,
    pub level: u32,
    pub streak: u32,
    /// Last evaluation that changed state
    #[cfg_attr(feature = "binding-generation", ts(type = "string | null"))]
    pub last_login: Option<DateTime<Utc>>,
    /// Unique leaderboard handle, set during onboarding
    pub username: Option<String>,
    pub is_onboarded: bool,
    /// Phone number or email captured at sign-up
    pub display_name: Option<String>,
}

impl UserProgression {
    /// Defaults for a freshly authenticated identity with no record.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            xp: 0,
            level: 1,
            streak: 0,
            last_login: None,
            username: None,
            is_onboarded: false,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, display_name: Option<String>) -> Self {
        self.display_name = display_name;
        self
    }

    /// Defaults that replace a quarantined payload, keeping whatever
    /// onboarding state it still carries.
    pub fn replacing(mut self, quarantined: &ProgressionDocument) -> Self {
        if quarantined.username.is_some() {
            self.username = quarantined.username.clone();
        }
        if let Some(onboarded) = quarantined.is_onboarded {
            self.is_onboarded = onboarded;
        }
        if quarantined.display_name.is_some() {
            self.display_name = quarantined.display_name.clone();
        }
        self
    }

    /// Apply a delta to a local copy, mirroring what the store does.
    pub fn apply(&mut self, delta: &ProgressionDelta) {
        if let Some(xp) = delta.xp_set {
            self.xp = xp;
        }
        if let Some(increment) = delta.xp_increment {
            self.xp = self.xp.saturating_add(increment);
        }
        if let Some(streak) = delta.streak_set {
            self.streak = streak;
        }
        if let Some(level) = delta.level_set {
            self.level = level;
        }
        if let Some(last_login) = delta.last_login_set {
            self.last_login = Some(last_login);
        }
    }
}

/// Raw progression document as persisted.
///
/// Every field is optional so that malformed payloads can be decoded and
/// rejected explicitly instead of failing deep inside the store client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionDocument {
    /// Document ID, populated by Firestore on reads
    #[serde(alias = "_firestore_id", default, skip_serializing)]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streak: Option<i64>,
    /// RFC3339 timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_onboarded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl From<&UserProgression> for ProgressionDocument {
    fn from(progression: &UserProgression) -> Self {
        Self {
            id: Some(progression.user_id.clone()),
            xp: Some(clamp_i64(progression.xp)),
            level: Some(i64::from(progression.level)),
            streak: Some(i64::from(progression.streak)),
            last_login: progression.last_login.map(format_utc_rfc3339),
            username: progression.username.clone(),
            is_onboarded: Some(progression.is_onboarded),
            display_name: progression.display_name.clone(),
        }
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Reasons a stored payload is quarantined.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },

    #[error("field `lastLogin` is not an RFC3339 timestamp: {0:?}")]
    BadTimestamp(String),
}

impl ProgressionDocument {
    /// Validate this payload into a typed record owned by `user_id`.
    pub fn into_progression(self, user_id: &str) -> Result<UserProgression, RecordError> {
        let xp = self.xp.ok_or(RecordError::MissingField("xp"))?;
        let level = self.level.ok_or(RecordError::MissingField("level"))?;
        let streak = self.streak.ok_or(RecordError::MissingField("streak"))?;

        let xp = u64::try_from(xp).map_err(|_| RecordError::OutOfRange {
            field: "xp",
            value: xp,
        })?;
        let level = u32::try_from(level)
            .ok()
            .filter(|level| *level >= 1)
            .ok_or(RecordError::OutOfRange {
                field: "level",
                value: level,
            })?;
        let streak = u32::try_from(streak).map_err(|_| RecordError::OutOfRange {
            field: "streak",
            value: streak,
        })?;

        let last_login = match self.last_login {
            Some(raw) => Some(parse_utc_rfc3339(&raw).ok_or(RecordError::BadTimestamp(raw))?),
            None => None,
        };

        Ok(UserProgression {
            user_id: user_id.to_string(),
            xp,
            level,
            streak,
            last_login,
            username: self.username,
            is_onboarded: self.is_onboarded.unwrap_or(false),
            display_name: self.display_name,
        })
    }
}

/// A single write against a progression record.
///
/// `xp_increment` is applied server-side relative to the value at commit
/// time. Every other field is an absolute overwrite and can be clobbered by
/// a concurrent overwrite of the same field; that loss is not detected.
///
/// Streak writes carry `expected_last_login`: the store rejects the write
/// with a conflict unless the committed `lastLogin` still matches the
/// snapshot the write was planned against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressionDelta {
    pub xp_increment: Option<u64>,
    /// Absolute XP, only used by the corruption reset
    pub xp_set: Option<u64>,
    pub streak_set: Option<u32>,
    pub level_set: Option<u32>,
    pub last_login_set: Option<DateTime<Utc>>,
    /// `Some(None)` expects a record that has never logged in.
    pub expected_last_login: Option<Option<DateTime<Utc>>>,
}

impl ProgressionDelta {
    pub fn xp_increment(amount: u64) -> Self {
        Self {
            xp_increment: Some(amount),
            ..Self::default()
        }
    }

    pub fn level_set(level: u32) -> Self {
        Self {
            level_set: Some(level),
            ..Self::default()
        }
    }

    /// Guard this write on the `lastLogin` it was planned against.
    pub fn planned_against(mut self, last_login: Option<DateTime<Utc>>) -> Self {
        self.expected_last_login = Some(last_login);
        self
    }

    /// True if the delta writes nothing. The guard alone is not a write.
    pub fn is_empty(&self) -> bool {
        self.xp_increment.is_none()
            && self.xp_set.is_none()
            && self.streak_set.is_none()
            && self.level_set.is_none()
            && self.last_login_set.is_none()
    }

    /// Whether the stored `lastLogin` payload satisfies the guard.
    ///
    /// Timestamps are compared at storage precision.
    pub fn guard_holds(&self, stored_last_login: Option<&str>) -> bool {
        let Some(expected) = self.expected_last_login else {
            return true;
        };
        let stored = stored_last_login
            .and_then(parse_utc_rfc3339)
            .map(format_utc_rfc3339);
        stored == expected.map(format_utc_rfc3339)
    }

    /// Names of the absolute fields this delta overwrites (document field names).
    pub fn overwritten_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.xp_set.is_some() {
            fields.push("xp");
        }
        if self.streak_set.is_some() {
            fields.push("streak");
        }
        if self.level_set.is_some() {
            fields.push("level");
        }
        if self.last_login_set.is_some() {
            fields.push("lastLogin");
        }
        fields
    }

    /// Partial document carrying the absolute overwrites.
    pub fn overwrite_document(&self) -> ProgressionDocument {
        ProgressionDocument {
            xp: self.xp_set.map(clamp_i64),
            level: self.level_set.map(i64::from),
            streak: self.streak_set.map(i64::from),
            last_login: self.last_login_set.map(format_utc_rfc3339),
            ..ProgressionDocument::default()
        }
    }
}
