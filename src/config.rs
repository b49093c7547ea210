// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.

use chrono::{FixedOffset, Offset, Utc};
use std::env;
use std::time::Duration;

/// Streak above this many days is treated as corrupted (~10 years).
pub const DEFAULT_STREAK_CEILING: u32 = 3650;
/// XP above this value is treated as corrupted.
///
/// Band 4 of the level curve is open-ended, so a legitimate long-term user
/// can eventually cross this ceiling and be reset.
pub const DEFAULT_XP_CEILING: u64 = 100_000;
const DEFAULT_AUTH_READY_TIMEOUT_MS: u64 = 3000;

/// Tunables for progression evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressionRules {
    /// CorruptionGuard streak ceiling (exclusive)
    pub streak_ceiling: u32,
    /// CorruptionGuard XP ceiling (exclusive)
    pub xp_ceiling: u64,
    /// Offset used to derive local calendar dates
    pub day_offset: FixedOffset,
}

impl Default for ProgressionRules {
    fn default() -> Self {
        Self {
            streak_ceiling: DEFAULT_STREAK_CEILING,
            xp_ceiling: DEFAULT_XP_CEILING,
            day_offset: utc_offset(),
        }
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Frontend URL for CORS
    pub frontend_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    /// JWT signing key for session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    /// Progression tunables
    pub rules: ProgressionRules,
    /// How long a session waits for the first identity answer
    pub auth_ready_timeout: Duration,
    /// Use the in-process store instead of Firestore
    pub use_memory_store: bool,
}

impl Config {
    /// Default config for testing only.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            rules: ProgressionRules::default(),
            auth_ready_timeout: Duration::from_millis(DEFAULT_AUTH_READY_TIMEOUT_MS),
            use_memory_store: true,
        }
    }

    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let day_offset = match env::var("DAY_BOUNDARY_UTC_OFFSET") {
            Ok(raw) => raw
                .trim()
                .parse::<FixedOffset>()
                .map_err(|_| ConfigError::Invalid("DAY_BOUNDARY_UTC_OFFSET", raw))?,
            Err(_) => utc_offset(),
        };

        Ok(Self {
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
            rules: ProgressionRules {
                streak_ceiling: parse_or("STREAK_CORRUPTION_CEILING", DEFAULT_STREAK_CEILING)?,
                xp_ceiling: parse_or("XP_CORRUPTION_CEILING", DEFAULT_XP_CEILING)?,
                day_offset,
            },
            auth_ready_timeout: Duration::from_millis(parse_or(
                "AUTH_READY_TIMEOUT_MS",
                DEFAULT_AUTH_READY_TIMEOUT_MS,
            )?),
            use_memory_store: env::var("USE_MEMORY_STORE").is_ok(),
        })
    }
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, raw)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        env::set_var("JWT_SIGNING_KEY", "test_jwt_key_32_bytes_minimum!!");
        env::set_var("DAY_BOUNDARY_UTC_OFFSET", "+02:00");
        env::set_var("XP_CORRUPTION_CEILING", "250000");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.jwt_signing_key, b"test_jwt_key_32_bytes_minimum!!");
        assert_eq!(config.rules.day_offset.local_minus_utc(), 2 * 3600);
        assert_eq!(config.rules.xp_ceiling, 250_000);
        assert_eq!(config.rules.streak_ceiling, DEFAULT_STREAK_CEILING);

        env::remove_var("DAY_BOUNDARY_UTC_OFFSET");
        env::remove_var("XP_CORRUPTION_CEILING");
    }

    #[test]
    fn test_default_rules_match_documented_ceilings() {
        let rules = ProgressionRules::default();
        assert_eq!(rules.streak_ceiling, 3650);
        assert_eq!(rules.xp_ceiling, 100_000);
        assert_eq!(rules.day_offset.local_minus_utc(), 0);
    }
}
