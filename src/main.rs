// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! LifeOS progression API server.

use lifeos_progression::{
    config::Config,
    db::{FirestoreDb, MemoryStore},
    time_utils::SystemClock,
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    let config = Config::from_env()?;
    tracing::info!(
        port = config.port,
        day_offset = %config.rules.day_offset,
        streak_ceiling = config.rules.streak_ceiling,
        xp_ceiling = config.rules.xp_ceiling,
        auth_ready_timeout_ms = config.auth_ready_timeout.as_millis() as u64,
        "Starting LifeOS progression API"
    );

    let state = if config.use_memory_store {
        tracing::warn!("Using in-process store; data is lost on restart");
        let store = MemoryStore::new();
        AppState::new(
            config.clone(),
            Arc::new(store.clone()),
            Arc::new(store),
            Arc::new(SystemClock),
        )
    } else {
        let db = FirestoreDb::new(&config.gcp_project_id).await?;
        AppState::new(
            config.clone(),
            Arc::new(db.clone()),
            Arc::new(db),
            Arc::new(SystemClock),
        )
    };

    let app = lifeos_progression::routes::create_router(Arc::new(state));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lifeos_progression=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
