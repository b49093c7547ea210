// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer: store traits plus Firestore and in-process backends.

pub mod firestore;
pub mod memory;

pub use self::firestore::FirestoreDb;
pub use memory::MemoryStore;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};

use crate::error::AppError;
use crate::models::{ProgressionDelta, ProgressionDocument, UserProgression};

/// Collection names as constants.
pub mod collections {
    /// Progression documents (keyed by user ID)
    pub const USERS: &str = "users";

    /// Per-user module collections stored under `users/{uid}/`.
    pub const TASKS: &str = "tasks";
    pub const NOTES: &str = "notes";
    pub const ROUTINES: &str = "routines";
    pub const TRAINING_HISTORY: &str = "training_history";
    pub const FINANCE: &str = "finance";
    pub const GOALS: &str = "goals";
    pub const REFLECTION: &str = "reflection";

    pub const MODULE_COLLECTIONS: [&str; 7] = [
        TASKS,
        NOTES,
        ROUTINES,
        TRAINING_HISTORY,
        FINANCE,
        GOALS,
        REFLECTION,
    ];

    pub fn is_module_collection(name: &str) -> bool {
        MODULE_COLLECTIONS.contains(&name)
    }
}

const RECORD_ID_LEN: usize = 20;

/// One pushed state of a subscribed document or collection.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent<T> {
    Snapshot(T),
    /// The live stream reported a failure; the last good state stays valid.
    Error(String),
}

/// Snapshot of a progression record; `None` means the record does not exist.
pub type ProgressionEvent = SyncEvent<Option<UserProgression>>;

/// Full record set of a synced collection.
pub type CollectionEvent = SyncEvent<Vec<SyncedRecord>>;

/// A record in a per-user synced collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncedRecord {
    pub id: String,
    pub fields: Value,
}

/// Live stream of snapshots.
///
/// Dropping the subscription detaches it: no further events are delivered
/// and the backend listener is shut down.
pub struct Subscription<T> {
    events: mpsc::UnboundedReceiver<SyncEvent<T>>,
    _shutdown: Option<oneshot::Sender<()>>,
}

impl<T> Subscription<T> {
    pub fn new(events: mpsc::UnboundedReceiver<SyncEvent<T>>) -> Self {
        Self {
            events,
            _shutdown: None,
        }
    }

    /// Subscription whose backend is stopped when `shutdown` fires or drops.
    pub fn with_shutdown(
        events: mpsc::UnboundedReceiver<SyncEvent<T>>,
        shutdown: oneshot::Sender<()>,
    ) -> Self {
        Self {
            events,
            _shutdown: Some(shutdown),
        }
    }

    /// Next pushed event, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<SyncEvent<T>> {
        self.events.recv().await
    }
}

/// Authoritative store of per-user progression records.
#[async_trait]
pub trait ProgressionStore: Send + Sync {
    /// Current record; malformed payloads read as `None`.
    async fn get_progression(&self, user_id: &str) -> Result<Option<UserProgression>, AppError>;

    /// Live snapshots of one record, starting with its current state.
    async fn subscribe_progression(
        &self,
        user_id: &str,
    ) -> Result<Subscription<Option<UserProgression>>, AppError>;

    /// Create the record for a first-time identity.
    ///
    /// A valid existing record is left untouched. A malformed one is
    /// replaced by `progression`, keeping its onboarding fields.
    async fn create_progression(&self, progression: &UserProgression) -> Result<(), AppError>;

    /// Apply one delta atomically. Fails with `NotFound` if the record is
    /// missing and with `Conflict` if the delta's `lastLogin` guard fails.
    async fn apply_delta(&self, user_id: &str, delta: &ProgressionDelta) -> Result<(), AppError>;

    /// Records ordered by XP descending, ties by user ID.
    async fn top_by_xp(&self, limit: u32) -> Result<Vec<UserProgression>, AppError>;

    async fn find_by_username(&self, username: &str)
        -> Result<Option<UserProgression>, AppError>;

    /// Set the handle and mark onboarding complete.
    async fn set_username(&self, user_id: &str, username: &str) -> Result<(), AppError>;
}

/// Generic per-user synced collection (tasks, notes, training history, ...).
#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn list_records(
        &self,
        owner_id: &str,
        collection: &str,
    ) -> Result<Vec<SyncedRecord>, AppError>;

    /// Live full-set snapshots, starting with the current set.
    async fn subscribe_records(
        &self,
        owner_id: &str,
        collection: &str,
    ) -> Result<Subscription<Vec<SyncedRecord>>, AppError>;

    async fn add_record(
        &self,
        owner_id: &str,
        collection: &str,
        fields: Value,
    ) -> Result<String, AppError>;

    async fn update_record(
        &self,
        owner_id: &str,
        collection: &str,
        record_id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), AppError>;

    async fn remove_record(
        &self,
        owner_id: &str,
        collection: &str,
        record_id: &str,
    ) -> Result<(), AppError>;
}

/// Validate a raw payload, quarantining it as a missing record if malformed.
pub(crate) fn validate_document(
    user_id: &str,
    document: ProgressionDocument,
) -> Option<UserProgression> {
    match document.into_progression(user_id) {
        Ok(progression) => Some(progression),
        Err(err) => {
            tracing::warn!(user_id, error = %err, "Quarantining malformed progression record");
            None
        }
    }
}

/// Random document ID in the same alphabet Firestore uses for auto IDs.
pub(crate) fn new_record_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RECORD_ID_LEN)
        .map(char::from)
        .collect()
}

/// Records must be JSON objects; anything else is a caller error.
pub(crate) fn require_object(fields: &Value) -> Result<(), AppError> {
    if fields.is_object() {
        Ok(())
    } else {
        Err(AppError::BadRequest(
            "Record fields must be a JSON object".to_string(),
        ))
    }
}
