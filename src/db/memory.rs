// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process store with the same semantics as the Firestore backend.
//!
//! Used for local development without credentials and throughout the test
//! suite. Every write to a record happens under that record's map entry
//! lock, and watchers are notified before the lock is released, so
//! increments never lose updates and snapshots arrive in commit order.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::db::{
    new_record_id, require_object, validate_document, CollectionEvent, CollectionStore,
    ProgressionEvent, ProgressionStore, Subscription, SyncEvent, SyncedRecord,
};
use crate::error::AppError;
use crate::models::{ProgressionDelta, ProgressionDocument, UserProgression};
use crate::time_utils::format_utc_rfc3339;

type CollectionKey = (String, String);

#[derive(Default)]
struct Inner {
    users: DashMap<String, ProgressionDocument>,
    user_watchers: DashMap<String, Vec<mpsc::UnboundedSender<ProgressionEvent>>>,
    records: DashMap<CollectionKey, BTreeMap<String, Value>>,
    record_watchers: DashMap<CollectionKey, Vec<mpsc::UnboundedSender<CollectionEvent>>>,
    fail_writes: AtomicBool,
    writes: AtomicU64,
}

/// In-process progression and collection store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a database error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful progression writes so far.
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Store a raw payload as-is, bypassing validation (and notify watchers).
    pub fn put_raw_document(&self, user_id: &str, document: ProgressionDocument) {
        let mut entry = self
            .inner
            .users
            .entry(user_id.to_string())
            .or_default();
        *entry.value_mut() = document;
        self.notify_user(user_id, entry.value());
    }

    /// Raw payload currently stored for a user.
    pub fn raw_document(&self, user_id: &str) -> Option<ProgressionDocument> {
        self.inner.users.get(user_id).map(|doc| doc.value().clone())
    }

    /// Number of live progression subscriptions for a user.
    pub fn watcher_count(&self, user_id: &str) -> usize {
        self.inner
            .user_watchers
            .get_mut(user_id)
            .map(|mut watchers| {
                watchers.retain(|tx| !tx.is_closed());
                watchers.len()
            })
            .unwrap_or(0)
    }

    fn check_writable(&self) -> Result<(), AppError> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Database("injected write failure".to_string()));
        }
        Ok(())
    }

    // Callers hold the user's entry lock.
    fn notify_user(&self, user_id: &str, document: &ProgressionDocument) {
        let snapshot = validate_document(user_id, document.clone());
        if let Some(mut watchers) = self.inner.user_watchers.get_mut(user_id) {
            watchers.retain(|tx| tx.send(SyncEvent::Snapshot(snapshot.clone())).is_ok());
        }
    }

    fn notify_records(&self, key: &CollectionKey, records: &BTreeMap<String, Value>) {
        let snapshot = to_records(records);
        if let Some(mut watchers) = self.inner.record_watchers.get_mut(key) {
            watchers.retain(|tx| tx.send(SyncEvent::Snapshot(snapshot.clone())).is_ok());
        }
    }

    fn valid_users(&self) -> Vec<UserProgression> {
        self.inner
            .users
            .iter()
            .filter_map(|entry| validate_document(entry.key(), entry.value().clone()))
            .collect()
    }
}

fn to_records(records: &BTreeMap<String, Value>) -> Vec<SyncedRecord> {
    records
        .iter()
        .map(|(id, fields)| SyncedRecord {
            id: id.clone(),
            fields: fields.clone(),
        })
        .collect()
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl ProgressionStore for MemoryStore {
    async fn get_progression(&self, user_id: &str) -> Result<Option<UserProgression>, AppError> {
        Ok(self
            .raw_document(user_id)
            .and_then(|doc| validate_document(user_id, doc)))
    }

    async fn subscribe_progression(
        &self,
        user_id: &str,
    ) -> Result<Subscription<Option<UserProgression>>, AppError> {
        let (tx, rx) = mpsc::unbounded_channel();

        // Hold the entry so no write lands between the initial snapshot and registration.
        let entry = self.inner.users.entry(user_id.to_string());
        let current = match &entry {
            Entry::Occupied(occupied) => validate_document(user_id, occupied.get().clone()),
            Entry::Vacant(_) => None,
        };
        let _ = tx.send(SyncEvent::Snapshot(current));
        self.inner
            .user_watchers
            .entry(user_id.to_string())
            .or_default()
            .push(tx);
        drop(entry);

        Ok(Subscription::new(rx))
    }

    async fn create_progression(&self, progression: &UserProgression) -> Result<(), AppError> {
        self.check_writable()?;

        match self.inner.users.entry(progression.user_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let quarantined = occupied.get().clone();
                if quarantined.into_progression(&progression.user_id).is_ok() {
                    tracing::debug!(
                        user_id = %progression.user_id,
                        "Progression record already exists, skipping create"
                    );
                    return Ok(());
                }

                let replacement = progression.clone().replacing(occupied.get());
                occupied.insert(ProgressionDocument::from(&replacement));
                self.inner.writes.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    user_id = %progression.user_id,
                    "Replaced malformed progression record with defaults"
                );
                self.notify_user(&progression.user_id, occupied.get());
            }
            Entry::Vacant(vacant) => {
                let entry = vacant.insert(ProgressionDocument::from(progression));
                self.inner.writes.fetch_add(1, Ordering::SeqCst);
                self.notify_user(&progression.user_id, entry.value());
            }
        }
        Ok(())
    }

    async fn apply_delta(&self, user_id: &str, delta: &ProgressionDelta) -> Result<(), AppError> {
        self.check_writable()?;

        let mut entry = self
            .inner
            .users
            .get_mut(user_id)
            .ok_or_else(|| AppError::NotFound(format!("Progression for {}", user_id)))?;
        let doc = entry.value_mut();

        if !delta.guard_holds(doc.last_login.as_deref()) {
            return Err(AppError::Conflict(format!(
                "Progression for {} changed since it was evaluated",
                user_id
            )));
        }

        if let Some(xp) = delta.xp_set {
            doc.xp = Some(clamp_i64(xp));
        }
        if let Some(amount) = delta.xp_increment {
            doc.xp = Some(doc.xp.unwrap_or(0).saturating_add(clamp_i64(amount)));
        }
        if let Some(streak) = delta.streak_set {
            doc.streak = Some(i64::from(streak));
        }
        if let Some(level) = delta.level_set {
            doc.level = Some(i64::from(level));
        }
        if let Some(last_login) = delta.last_login_set {
            doc.last_login = Some(format_utc_rfc3339(last_login));
        }

        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        self.notify_user(user_id, entry.value());
        Ok(())
    }

    async fn top_by_xp(&self, limit: u32) -> Result<Vec<UserProgression>, AppError> {
        let mut users = self.valid_users();
        users.sort_by(|a, b| b.xp.cmp(&a.xp).then_with(|| a.user_id.cmp(&b.user_id)));
        users.truncate(limit as usize);
        Ok(users)
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserProgression>, AppError> {
        Ok(self
            .valid_users()
            .into_iter()
            .find(|user| user.username.as_deref() == Some(username)))
    }

    async fn set_username(&self, user_id: &str, username: &str) -> Result<(), AppError> {
        self.check_writable()?;

        let mut entry = self
            .inner
            .users
            .get_mut(user_id)
            .ok_or_else(|| AppError::NotFound(format!("Progression for {}", user_id)))?;
        let doc = entry.value_mut();
        doc.username = Some(username.to_string());
        doc.is_onboarded = Some(true);

        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        self.notify_user(user_id, entry.value());
        Ok(())
    }
}

#[async_trait]
impl CollectionStore for MemoryStore {
    async fn list_records(
        &self,
        owner_id: &str,
        collection: &str,
    ) -> Result<Vec<SyncedRecord>, AppError> {
        let key = (owner_id.to_string(), collection.to_string());
        Ok(self
            .inner
            .records
            .get(&key)
            .map(|records| to_records(records.value()))
            .unwrap_or_default())
    }

    async fn subscribe_records(
        &self,
        owner_id: &str,
        collection: &str,
    ) -> Result<Subscription<Vec<SyncedRecord>>, AppError> {
        let key = (owner_id.to_string(), collection.to_string());
        let (tx, rx) = mpsc::unbounded_channel();

        let entry = self.inner.records.entry(key.clone()).or_default();
        let _ = tx.send(SyncEvent::Snapshot(to_records(entry.value())));
        self.inner.record_watchers.entry(key).or_default().push(tx);
        drop(entry);

        Ok(Subscription::new(rx))
    }

    async fn add_record(
        &self,
        owner_id: &str,
        collection: &str,
        fields: Value,
    ) -> Result<String, AppError> {
        self.check_writable()?;
        require_object(&fields)?;

        let key = (owner_id.to_string(), collection.to_string());
        let record_id = new_record_id();

        let mut entry = self.inner.records.entry(key.clone()).or_default();
        entry.value_mut().insert(record_id.clone(), fields);
        self.notify_records(&key, entry.value());

        Ok(record_id)
    }

    async fn update_record(
        &self,
        owner_id: &str,
        collection: &str,
        record_id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), AppError> {
        self.check_writable()?;

        let key = (owner_id.to_string(), collection.to_string());
        let mut entry = self.inner.records.entry(key.clone()).or_default();
        let record = entry
            .value_mut()
            .get_mut(record_id)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| AppError::NotFound(format!("Record {} in {}", record_id, collection)))?;
        record.extend(fields);
        self.notify_records(&key, entry.value());

        Ok(())
    }

    async fn remove_record(
        &self,
        owner_id: &str,
        collection: &str,
        record_id: &str,
    ) -> Result<(), AppError> {
        self.check_writable()?;

        let key = (owner_id.to_string(), collection.to_string());
        let mut entry = self.inner.records.entry(key.clone()).or_default();
        if entry.value_mut().remove(record_id).is_some() {
            self.notify_records(&key, entry.value());
        }

        Ok(())
    }
}
