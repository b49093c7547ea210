// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! CRUD over the per-user module collections.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch},
    Extension, Json, Router,
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::db::SyncedRecord;
use crate::error::Result;
use crate::middleware::AuthUser;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/collections/{name}",
            get(list_records).post(add_record),
        )
        .route(
            "/api/collections/{name}/{id}",
            patch(update_record).delete(remove_record),
        )
}

#[derive(Debug, Serialize)]
pub struct CreatedRecord {
    pub id: String,
}

async fn list_records(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(name): Path<String>,
) -> Result<Json<Vec<SyncedRecord>>> {
    let records = state
        .collections
        .list(Some(&user.user_id), &name)
        .await?;
    Ok(Json(records))
}

async fn add_record(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(name): Path<String>,
    Json(fields): Json<Value>,
) -> Result<(StatusCode, Json<CreatedRecord>)> {
    let id = state
        .collections
        .add(Some(&user.user_id), &name, fields)
        .await?;
    tracing::debug!(user_id = %user.user_id, collection = %name, id = %id, "Record added");
    Ok((StatusCode::CREATED, Json(CreatedRecord { id })))
}

async fn update_record(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((name, id)): Path<(String, String)>,
    Json(fields): Json<Map<String, Value>>,
) -> Result<StatusCode> {
    state
        .collections
        .update(Some(&user.user_id), &name, &id, fields)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_record(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((name, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    state
        .collections
        .remove(Some(&user.user_id), &name, &id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
