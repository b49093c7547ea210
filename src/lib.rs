// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! LifeOS progression backend
//!
//! XP, levels and daily login streaks for the LifeOS personal dashboard,
//! plus the per-user synced collections its modules store records in.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use std::sync::Arc;

use config::Config;
use db::{CollectionStore, ProgressionStore};
use services::{MemoryCache, ProgressionEngine, SyncedCollections};
use time_utils::Clock;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub engine: Arc<ProgressionEngine>,
    pub collections: SyncedCollections,
}

impl AppState {
    pub fn new(
        config: Config,
        progression_store: Arc<dyn ProgressionStore>,
        collection_store: Arc<dyn CollectionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let engine = ProgressionEngine::new(progression_store, clock, config.rules);
        // Requests always carry an owner, so the local cache only backs
        // library consumers running signed out.
        let collections = SyncedCollections::new(collection_store, Arc::new(MemoryCache::new()));

        Self {
            config,
            engine: Arc::new(engine),
            collections,
        }
    }
}
