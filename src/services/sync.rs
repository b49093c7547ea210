// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-user synced collections with a local fallback.
//!
//! With an owner the remote `CollectionStore` is used. Without one every
//! operation reads and writes a local cache under `lifeos_{collection}`
//! and no remote call is made.

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::{stream, StreamExt, TryStreamExt};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::db::{
    collections, new_record_id, require_object, CollectionStore, Subscription, SyncEvent,
    SyncedRecord,
};
use crate::error::{AppError, Result};

const CACHE_NAMESPACE: &str = "lifeos_";
const SEED_CONCURRENCY: usize = 8;

/// Key/value cache holding collections while no identity is bound.
pub trait LocalCache: Send + Sync {
    fn load(&self, key: &str) -> Vec<SyncedRecord>;
    fn save(&self, key: &str, records: Vec<SyncedRecord>);
}

/// Process-local cache.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Vec<SyncedRecord>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalCache for MemoryCache {
    fn load(&self, key: &str) -> Vec<SyncedRecord> {
        self.entries
            .get(key)
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    fn save(&self, key: &str, records: Vec<SyncedRecord>) {
        self.entries.insert(key.to_string(), records);
    }
}

pub fn cache_key(collection: &str) -> String {
    format!("{}{}", CACHE_NAMESPACE, collection)
}

fn check_collection(collection: &str) -> Result<()> {
    if collections::is_module_collection(collection) {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("Unknown collection: {}", collection)))
    }
}

pub struct SyncedCollections {
    remote: Arc<dyn CollectionStore>,
    cache: Arc<dyn LocalCache>,
    local_watchers: DashMap<String, Vec<mpsc::UnboundedSender<SyncEvent<Vec<SyncedRecord>>>>>,
}

impl SyncedCollections {
    pub fn new(remote: Arc<dyn CollectionStore>, cache: Arc<dyn LocalCache>) -> Self {
        Self {
            remote,
            cache,
            local_watchers: DashMap::new(),
        }
    }

    pub async fn list(&self, owner: Option<&str>, collection: &str) -> Result<Vec<SyncedRecord>> {
        check_collection(collection)?;
        match owner {
            Some(owner) => self.remote.list_records(owner, collection).await,
            None => Ok(self.cache.load(&cache_key(collection))),
        }
    }

    /// Live full-set snapshots.
    ///
    /// Opening a remote collection whose set is empty first uploads any
    /// records held locally.
    pub async fn subscribe(
        &self,
        owner: Option<&str>,
        collection: &str,
    ) -> Result<Subscription<Vec<SyncedRecord>>> {
        check_collection(collection)?;
        let Some(owner) = owner else {
            return Ok(self.subscribe_local(collection));
        };

        if let Err(e) = self.seed_from_local(owner, collection).await {
            tracing::warn!(owner, collection, error = %e, "Seeding from local cache failed");
        }
        self.remote.subscribe_records(owner, collection).await
    }

    /// Upload cached records when the remote set is empty. Returns the
    /// number of records uploaded.
    pub async fn seed_from_local(&self, owner: &str, collection: &str) -> Result<usize> {
        check_collection(collection)?;
        let local = self.cache.load(&cache_key(collection));
        if local.is_empty() || !self.remote.list_records(owner, collection).await?.is_empty() {
            return Ok(0);
        }

        let uploaded: Vec<String> = stream::iter(local)
            .map(|record| self.remote.add_record(owner, collection, record.fields))
            .buffer_unordered(SEED_CONCURRENCY)
            .try_collect()
            .await?;

        tracing::info!(
            owner,
            collection,
            count = uploaded.len(),
            "Seeded remote collection from local cache"
        );
        Ok(uploaded.len())
    }

    pub async fn add(&self, owner: Option<&str>, collection: &str, fields: Value) -> Result<String> {
        check_collection(collection)?;
        if let Some(owner) = owner {
            return self.remote.add_record(owner, collection, fields).await;
        }

        require_object(&fields)?;
        let id = new_record_id();
        self.modify_local(collection, |records| {
            records.push(SyncedRecord {
                id: id.clone(),
                fields,
            });
            Ok(())
        })?;
        Ok(id)
    }

    pub async fn update(
        &self,
        owner: Option<&str>,
        collection: &str,
        record_id: &str,
        fields: Map<String, Value>,
    ) -> Result<()> {
        check_collection(collection)?;
        if let Some(owner) = owner {
            return self
                .remote
                .update_record(owner, collection, record_id, fields)
                .await;
        }

        self.modify_local(collection, |records| {
            let record = records
                .iter_mut()
                .find(|record| record.id == record_id)
                .ok_or_else(|| {
                    AppError::NotFound(format!("Record {} in {}", record_id, collection))
                })?;
            if let Value::Object(existing) = &mut record.fields {
                existing.extend(fields);
            }
            Ok(())
        })
    }

    pub async fn remove(&self, owner: Option<&str>, collection: &str, record_id: &str) -> Result<()> {
        check_collection(collection)?;
        if let Some(owner) = owner {
            return self.remote.remove_record(owner, collection, record_id).await;
        }

        self.modify_local(collection, |records| {
            records.retain(|record| record.id != record_id);
            Ok(())
        })
    }

    fn subscribe_local(&self, collection: &str) -> Subscription<Vec<SyncedRecord>> {
        let key = cache_key(collection);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(SyncEvent::Snapshot(self.cache.load(&key)));
        self.local_watchers.entry(key).or_default().push(tx);
        Subscription::new(rx)
    }

    fn modify_local<F>(&self, collection: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<SyncedRecord>) -> Result<()>,
    {
        let key = cache_key(collection);
        // Held across load/save so local writers do not interleave.
        let mut watchers = self.local_watchers.entry(key.clone()).or_default();

        let mut records = self.cache.load(&key);
        change(&mut records)?;
        self.cache.save(&key, records.clone());

        watchers.retain(|tx| tx.send(SyncEvent::Snapshot(records.clone())).is_ok());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use serde_json::json;

    fn synced() -> (SyncedCollections, MemoryStore, Arc<MemoryCache>) {
        let store = MemoryStore::new();
        let cache = Arc::new(MemoryCache::new());
        let synced = SyncedCollections::new(Arc::new(store.clone()), cache.clone());
        (synced, store, cache)
    }

    #[tokio::test]
    async fn test_offline_uses_namespaced_cache() {
        let (synced, store, cache) = synced();

        let id = synced
            .add(None, "notes", json!({"title": "Groceries"}))
            .await
            .unwrap();

        let cached = cache.load("lifeos_notes");
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id, id);
        assert_eq!(store.write_count(), 0);

        let mut patch = Map::new();
        patch.insert("pinned".to_string(), json!(true));
        synced.update(None, "notes", &id, patch).await.unwrap();
        let listed = synced.list(None, "notes").await.unwrap();
        assert_eq!(listed[0].fields, json!({"title": "Groceries", "pinned": true}));

        synced.remove(None, "notes", &id).await.unwrap();
        assert!(synced.list(None, "notes").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_subscription_sees_local_writes() {
        let (synced, _, _) = synced();
        let mut sub = synced.subscribe(None, "goals").await.unwrap();
        assert_eq!(sub.next().await, Some(SyncEvent::Snapshot(vec![])));

        synced
            .add(None, "goals", json!({"title": "Run 10k"}))
            .await
            .unwrap();
        match sub.next().await {
            Some(SyncEvent::Snapshot(records)) => assert_eq!(records.len(), 1),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remote_open_seeds_from_local_once() {
        let (synced, store, _) = synced();
        synced
            .add(None, "tasks", json!({"title": "Stretch"}))
            .await
            .unwrap();

        let mut sub = synced.subscribe(Some("u1"), "tasks").await.unwrap();
        match sub.next().await {
            Some(SyncEvent::Snapshot(records)) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].fields, json!({"title": "Stretch"}));
            }
            other => panic!("unexpected event {:?}", other),
        }

        // Remote is no longer empty, so nothing is uploaded twice
        assert_eq!(synced.seed_from_local("u1", "tasks").await.unwrap(), 0);
        assert_eq!(store.list_records("u1", "tasks").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_collection_is_rejected() {
        let (synced, _, _) = synced();
        assert!(matches!(
            synced.list(Some("u1"), "users").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            synced.add(None, "secrets", json!({})).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_update_missing_record() {
        let (synced, _, _) = synced();
        assert!(matches!(
            synced.update(None, "notes", "nope", Map::new()).await,
            Err(AppError::NotFound(_))
        ));
    }
}
