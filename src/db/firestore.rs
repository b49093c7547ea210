// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Progression records (`users/{uid}`)
//! - Per-user module collections (`users/{uid}/{collection}/{id}`)
//!
//! XP increments use a server-side field transform so that concurrent
//! awards never overwrite each other.

use std::future::Future;

use async_trait::async_trait;
use firestore::errors::FirestoreError;
use firestore::{
    FirestoreConsistencySelector, FirestoreListenEvent, FirestoreListenerTarget,
    FirestoreMemListenStateStorage, FirestoreQueryDirection, FirestoreTransaction,
    FirestoreWritePrecondition,
};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};

use crate::db::{
    collections, new_record_id, require_object, validate_document, CollectionStore,
    ProgressionStore, Subscription, SyncEvent, SyncedRecord,
};
use crate::error::AppError;
use crate::models::{ProgressionDelta, ProgressionDocument, UserProgression};

const PROGRESSION_TARGET_ID: u32 = 17;
const COLLECTION_TARGET_ID: u32 = 23;

/// Fields Firestore injects into deserialized documents.
const FIRESTORE_META_PREFIX: &str = "_firestore";

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

fn db_error(err: impl std::fmt::Display) -> AppError {
    AppError::Database(err.to_string())
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    // ─── Module Collection Helpers ───────────────────────────────

    fn owner_path(
        &self,
        owner_id: &str,
    ) -> Result<firestore::ParentPathBuilder, AppError> {
        self.get_client()?
            .parent_path(collections::USERS, owner_id)
            .map_err(db_error)
    }

    async fn fetch_records(
        &self,
        owner_id: &str,
        collection: &str,
    ) -> Result<Vec<SyncedRecord>, AppError> {
        let parent = self.owner_path(owner_id)?;
        let docs: Vec<Value> = self
            .get_client()?
            .fluent()
            .select()
            .from(collection)
            .parent(&parent)
            .obj()
            .query()
            .await
            .map_err(db_error)?;

        Ok(docs.into_iter().filter_map(into_synced_record).collect())
    }

    // ─── Progression Helpers ─────────────────────────────────────

    /// Read a progression payload as seen by `transaction`.
    async fn read_in_transaction(
        &self,
        transaction: &FirestoreTransaction<'_>,
        user_id: &str,
    ) -> Result<Option<ProgressionDocument>, AppError> {
        let reader = self.get_client()?.clone_with_consistency_selector(
            FirestoreConsistencySelector::Transaction(transaction.transaction_id().clone()),
        );

        reader
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(user_id)
            .await
            .map_err(db_error)
    }

    /// Overwrite an existing record with `progression` if, and only if,
    /// the stored payload does not validate.
    async fn replace_if_quarantined(&self, progression: &UserProgression) -> Result<(), AppError> {
        let client = self.get_client()?;
        let user_id = progression.user_id.as_str();

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let existing = match self.read_in_transaction(&transaction, user_id).await {
            Ok(existing) => existing,
            Err(e) => {
                rollback(transaction, user_id).await;
                return Err(e);
            }
        };

        let quarantined = match existing {
            Some(doc) if doc.clone().into_progression(user_id).is_err() => doc,
            _ => {
                // Another session created it first; its snapshot will arrive.
                tracing::debug!(user_id, "Progression record already exists, skipping create");
                rollback(transaction, user_id).await;
                return Ok(());
            }
        };

        let replacement = ProgressionDocument::from(&progression.clone().replacing(&quarantined));
        client
            .fluent()
            .update()
            .in_col(collections::USERS)
            .precondition(FirestoreWritePrecondition::Exists(true))
            .document_id(user_id)
            .object(&replacement)
            .add_to_transaction(&mut transaction)
            .map_err(db_error)?;

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Replace commit failed: {}", e)))?;

        tracing::warn!(user_id, "Replaced malformed progression record with defaults");
        Ok(())
    }
}

async fn rollback(transaction: FirestoreTransaction<'_>, user_id: &str) {
    if let Err(err) = transaction.rollback().await {
        tracing::warn!(user_id, error = %err, "Transaction rollback failed");
    }
}

/// Walk XP-ordered pages of `limit` documents until `limit` valid records
/// are collected. Quarantined payloads are skipped, not counted.
async fn collect_top<F, Fut>(
    limit: u32,
    mut fetch_page: F,
) -> Result<Vec<UserProgression>, AppError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<ProgressionDocument>, AppError>>,
{
    let wanted = limit as usize;
    let mut top = Vec::with_capacity(wanted);
    let mut offset = 0u32;

    while top.len() < wanted {
        let page = fetch_page(offset).await?;
        let fetched = u32::try_from(page.len()).unwrap_or(u32::MAX);
        top.extend(page.into_iter().filter_map(|doc| {
            let user_id = doc.id.clone()?;
            validate_document(&user_id, doc)
        }));

        if fetched < limit {
            break;
        }
        offset = offset.saturating_add(fetched);
    }

    top.truncate(wanted);
    Ok(top)
}

/// Split the injected document ID out of a deserialized record.
fn into_synced_record(doc: Value) -> Option<SyncedRecord> {
    let Value::Object(mut fields) = doc else {
        return None;
    };
    let id = match fields.remove("_firestore_id") {
        Some(Value::String(id)) => id,
        _ => return None,
    };
    fields.retain(|key, _| !key.starts_with(FIRESTORE_META_PREFIX));

    Some(SyncedRecord {
        id,
        fields: Value::Object(fields),
    })
}

// ─── Progression Records ─────────────────────────────────────────

#[async_trait]
impl ProgressionStore for FirestoreDb {
    async fn get_progression(&self, user_id: &str) -> Result<Option<UserProgression>, AppError> {
        let doc: Option<ProgressionDocument> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(user_id)
            .await
            .map_err(db_error)?;

        Ok(doc.and_then(|doc| validate_document(user_id, doc)))
    }

    async fn subscribe_progression(
        &self,
        user_id: &str,
    ) -> Result<Subscription<Option<UserProgression>>, AppError> {
        let client = self.get_client()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        // The listener stays silent for a document that does not exist yet,
        // so seed the stream with a point read.
        let _ = tx.send(SyncEvent::Snapshot(self.get_progression(user_id).await?));

        let mut listener = client
            .create_listener(FirestoreMemListenStateStorage::new())
            .await
            .map_err(db_error)?;

        client
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .batch_listen([user_id.to_string()])
            .add_target(FirestoreListenerTarget::new(PROGRESSION_TARGET_ID), &mut listener)
            .map_err(db_error)?;

        let owner = user_id.to_string();
        listener
            .start(move |event| {
                let tx = tx.clone();
                let owner = owner.clone();
                async move {
                    match event {
                        FirestoreListenEvent::DocumentChange(ref change) => {
                            if let Some(doc) = &change.document {
                                let snapshot =
                                    match firestore::FirestoreDb::deserialize_doc_to::<
                                        ProgressionDocument,
                                    >(doc)
                                    {
                                        Ok(raw) => validate_document(&owner, raw),
                                        Err(err) => {
                                            tracing::warn!(
                                                user_id = %owner,
                                                error = %err,
                                                "Undecodable progression snapshot"
                                            );
                                            None
                                        }
                                    };
                                let _ = tx.send(SyncEvent::Snapshot(snapshot));
                            }
                        }
                        FirestoreListenEvent::DocumentDelete(_)
                        | FirestoreListenEvent::DocumentRemove(_) => {
                            let _ = tx.send(SyncEvent::Snapshot(None));
                        }
                        _ => {}
                    }
                    Ok(())
                }
            })
            .await
            .map_err(db_error)?;

        let owner = user_id.to_string();
        tokio::spawn(async move {
            // Fires on explicit shutdown or when the subscription is dropped
            let _ = shutdown_rx.await;
            if let Err(err) = listener.shutdown().await {
                tracing::warn!(user_id = %owner, error = %err, "Listener shutdown failed");
            }
            tracing::debug!(user_id = %owner, "Progression listener stopped");
        });

        Ok(Subscription::with_shutdown(rx, shutdown_tx))
    }

    async fn create_progression(&self, progression: &UserProgression) -> Result<(), AppError> {
        let doc = ProgressionDocument::from(progression);

        let result: Result<(), _> = self
            .get_client()?
            .fluent()
            .insert()
            .into(collections::USERS)
            .document_id(&progression.user_id)
            .object(&doc)
            .execute()
            .await;

        match result {
            Ok(()) => {
                tracing::info!(user_id = %progression.user_id, "Created progression record");
                Ok(())
            }
            Err(FirestoreError::DataConflictError(_)) => {
                self.replace_if_quarantined(progression).await
            }
            Err(e) => Err(db_error(e)),
        }
    }

    /// Apply a delta as a single write.
    ///
    /// Absolute fields go through an update mask; `xp_increment` is a
    /// server-side transform evaluated against the committed value. A
    /// guarded delta first reads `lastLogin` inside the same transaction.
    async fn apply_delta(&self, user_id: &str, delta: &ProgressionDelta) -> Result<(), AppError> {
        if delta.is_empty() {
            return Ok(());
        }

        let client = self.get_client()?;
        let fields = delta.overwritten_fields();
        let overwrite = delta.overwrite_document();
        let increment = delta.xp_increment.map(clamp_i64);

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        if delta.expected_last_login.is_some() {
            let current = match self.read_in_transaction(&transaction, user_id).await {
                Ok(current) => current,
                Err(e) => {
                    rollback(transaction, user_id).await;
                    return Err(e);
                }
            };
            let failure = match current {
                None => Some(AppError::NotFound(format!("Progression for {}", user_id))),
                Some(doc) if !delta.guard_holds(doc.last_login.as_deref()) => {
                    Some(AppError::Conflict(format!(
                        "Progression for {} changed since it was evaluated",
                        user_id
                    )))
                }
                Some(_) => None,
            };
            if let Some(failure) = failure {
                rollback(transaction, user_id).await;
                return Err(failure);
            }
        }

        let update = client
            .fluent()
            .update()
            .fields(fields.iter().copied())
            .in_col(collections::USERS)
            .precondition(FirestoreWritePrecondition::Exists(true))
            .document_id(user_id)
            .transforms(|t| t.fields(increment.map(|amount| t.field("xp").increment(amount))));

        if fields.is_empty() {
            update
                .only_transform()
                .add_to_transaction(&mut transaction)
                .map_err(db_error)?;
        } else {
            update
                .object(&overwrite)
                .add_to_transaction(&mut transaction)
                .map_err(db_error)?;
        }

        transaction.commit().await.map_err(|e| match e {
            FirestoreError::DataNotFoundError(_) => {
                AppError::NotFound(format!("Progression for {}", user_id))
            }
            e => AppError::Database(format!("Delta commit failed: {}", e)),
        })?;

        tracing::debug!(
            user_id,
            xp_increment = ?delta.xp_increment,
            fields = ?fields,
            "Applied progression delta"
        );
        Ok(())
    }

    async fn top_by_xp(&self, limit: u32) -> Result<Vec<UserProgression>, AppError> {
        let client = self.get_client()?;

        collect_top(limit, |offset| async move {
            client
                .fluent()
                .select()
                .from(collections::USERS)
                .order_by([
                    ("xp", FirestoreQueryDirection::Descending),
                    ("__name__", FirestoreQueryDirection::Ascending),
                ])
                .offset(offset)
                .limit(limit)
                .obj::<ProgressionDocument>()
                .query()
                .await
                .map_err(db_error)
        })
        .await
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserProgression>, AppError> {
        let docs: Vec<ProgressionDocument> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::USERS)
            .filter(|q| q.for_all([q.field("username").eq(username)]))
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(db_error)?;

        Ok(docs.into_iter().find_map(|doc| {
            let user_id = doc.id.clone()?;
            validate_document(&user_id, doc)
        }))
    }

    async fn set_username(&self, user_id: &str, username: &str) -> Result<(), AppError> {
        let patch = ProgressionDocument {
            username: Some(username.to_string()),
            is_onboarded: Some(true),
            ..ProgressionDocument::default()
        };

        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .fields(["username", "isOnboarded"])
            .in_col(collections::USERS)
            .precondition(FirestoreWritePrecondition::Exists(true))
            .document_id(user_id)
            .object(&patch)
            .execute()
            .await
            .map_err(|e| match e {
                FirestoreError::DataNotFoundError(_) => {
                    AppError::NotFound(format!("Progression for {}", user_id))
                }
                e => db_error(e),
            })?;

        tracing::info!(user_id, username = %username, "Username claimed");
        Ok(())
    }
}

// ─── Module Collections ──────────────────────────────────────────

#[async_trait]
impl CollectionStore for FirestoreDb {
    async fn list_records(
        &self,
        owner_id: &str,
        collection: &str,
    ) -> Result<Vec<SyncedRecord>, AppError> {
        self.fetch_records(owner_id, collection).await
    }

    /// Every change re-reads the full set, matching the "full current set
    /// on each change" contract rather than forwarding per-document diffs.
    async fn subscribe_records(
        &self,
        owner_id: &str,
        collection: &str,
    ) -> Result<Subscription<Vec<SyncedRecord>>, AppError> {
        let client = self.get_client()?;
        let parent = self.owner_path(owner_id)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let _ = tx.send(SyncEvent::Snapshot(
            self.fetch_records(owner_id, collection).await?,
        ));

        let mut listener = client
            .create_listener(FirestoreMemListenStateStorage::new())
            .await
            .map_err(db_error)?;

        client
            .fluent()
            .select()
            .from(collection)
            .parent(&parent)
            .listen()
            .add_target(FirestoreListenerTarget::new(COLLECTION_TARGET_ID), &mut listener)
            .map_err(db_error)?;

        let db = self.clone();
        let owner = owner_id.to_string();
        let name = collection.to_string();
        listener
            .start(move |event| {
                let tx = tx.clone();
                let db = db.clone();
                let owner = owner.clone();
                let name = name.clone();
                async move {
                    if matches!(
                        event,
                        FirestoreListenEvent::DocumentChange(_)
                            | FirestoreListenEvent::DocumentDelete(_)
                            | FirestoreListenEvent::DocumentRemove(_)
                    ) {
                        let next = match db.fetch_records(&owner, &name).await {
                            Ok(records) => SyncEvent::Snapshot(records),
                            Err(err) => SyncEvent::Error(err.to_string()),
                        };
                        let _ = tx.send(next);
                    }
                    Ok(())
                }
            })
            .await
            .map_err(db_error)?;

        tokio::spawn(async move {
            let _ = shutdown_rx.await;
            if let Err(err) = listener.shutdown().await {
                tracing::warn!(error = %err, "Collection listener shutdown failed");
            }
        });

        Ok(Subscription::with_shutdown(rx, shutdown_tx))
    }

    async fn add_record(
        &self,
        owner_id: &str,
        collection: &str,
        fields: Value,
    ) -> Result<String, AppError> {
        require_object(&fields)?;
        let parent = self.owner_path(owner_id)?;
        let record_id = new_record_id();

        let _: () = self
            .get_client()?
            .fluent()
            .insert()
            .into(collection)
            .document_id(&record_id)
            .parent(&parent)
            .object(&fields)
            .execute()
            .await
            .map_err(db_error)?;

        Ok(record_id)
    }

    async fn update_record(
        &self,
        owner_id: &str,
        collection: &str,
        record_id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), AppError> {
        let parent = self.owner_path(owner_id)?;
        let mask: Vec<String> = fields.keys().cloned().collect();
        let patch = Value::Object(fields);

        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .fields(mask)
            .in_col(collection)
            .precondition(FirestoreWritePrecondition::Exists(true))
            .document_id(record_id)
            .parent(&parent)
            .object(&patch)
            .execute()
            .await
            .map_err(|e| match e {
                FirestoreError::DataNotFoundError(_) => {
                    AppError::NotFound(format!("Record {} in {}", record_id, collection))
                }
                e => db_error(e),
            })?;

        Ok(())
    }

    async fn remove_record(
        &self,
        owner_id: &str,
        collection: &str,
        record_id: &str,
    ) -> Result<(), AppError> {
        let parent = self.owner_path(owner_id)?;

        self.get_client()?
            .fluent()
            .delete()
            .from(collection)
            .document_id(record_id)
            .parent(&parent)
            .execute()
            .await
            .map_err(db_error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_into_synced_record_strips_metadata() {
        let record = into_synced_record(json!({
            "_firestore_id": "abc123",
            "_firestore_created": "2024-01-15T10:00:00Z",
            "title": "Stretch",
        }))
        .unwrap();

        assert_eq!(record.id, "abc123");
        assert_eq!(record.fields, json!({"title": "Stretch"}));
    }

    #[test]
    fn test_into_synced_record_requires_id() {
        assert_eq!(into_synced_record(json!({"title": "orphan"})), None);
        assert_eq!(into_synced_record(json!([1, 2])), None);
    }

    fn ranked_documents() -> Vec<ProgressionDocument> {
        [("a", 900), ("broken", 800), ("b", 700), ("c", 600), ("d", 500)]
            .into_iter()
            .map(|(id, xp)| ProgressionDocument {
                id: Some(id.to_string()),
                xp: Some(xp),
                level: Some(if id == "broken" { 0 } else { 1 }),
                streak: Some(1),
                ..ProgressionDocument::default()
            })
            .collect()
    }

    async fn top_from(docs: &[ProgressionDocument], limit: u32) -> Vec<String> {
        collect_top(limit, |offset| {
            let page: Vec<ProgressionDocument> = docs
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect();
            async move { Ok(page) }
        })
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.user_id)
        .collect()
    }

    #[tokio::test]
    async fn test_quarantined_documents_do_not_shrink_top_n() {
        let docs = ranked_documents();
        assert_eq!(top_from(&docs, 3).await, vec!["a", "b", "c"]);
        assert_eq!(top_from(&docs, 1).await, vec!["a"]);
    }

    #[tokio::test]
    async fn test_short_collection_ends_paging() {
        let docs = ranked_documents();
        assert_eq!(top_from(&docs, 10).await, vec!["a", "b", "c", "d"]);
        assert!(top_from(&docs, 0).await.is_empty());
    }

    #[tokio::test]
    async fn test_offline_client_reports_database_error() {
        let db = FirestoreDb::new_mock();
        let err = db.get_progression("uid").await.unwrap_err();
        assert!(err.is_transient());
    }
}
