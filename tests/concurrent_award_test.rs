// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Concurrent XP awards must never lose an increment, and concurrent
//! check-ins must never award the same day twice.
//!
//! Each award is applied as a store-side increment, so two writers starting
//! from the same observed XP both land. Check-in writes are guarded on the
//! `lastLogin` they were planned against, so only one of them lands.

use std::sync::Arc;

use lifeos_progression::config::ProgressionRules;
use lifeos_progression::db::{MemoryStore, ProgressionStore};
use lifeos_progression::models::UserProgression;
use lifeos_progression::services::{PassOutcome, ProgressionEngine};

mod common;
use common::{test_db, unique_user_id, utc, TestClock};

const NUM_CONCURRENT_AWARDS: u64 = 16;

fn engine(store: Arc<dyn ProgressionStore>) -> Arc<ProgressionEngine> {
    Arc::new(ProgressionEngine::new(
        store,
        TestClock::new(utc(2024, 1, 16, 9, 0)),
        ProgressionRules::default(),
    ))
}

async fn award_concurrently(engine: Arc<ProgressionEngine>, user_id: &str) -> u64 {
    let observed = engine.current(user_id).await.expect("record exists");

    let mut handles = vec![];
    for i in 1..=NUM_CONCURRENT_AWARDS {
        let engine = engine.clone();
        // Every writer starts from the same stale view
        let observed = observed.clone();
        handles.push(tokio::spawn(async move {
            engine.award_xp_from(&observed, i * 10).await
        }));
    }

    for handle in handles {
        handle
            .await
            .expect("Task join failed")
            .expect("Award failed");
    }

    (1..=NUM_CONCURRENT_AWARDS).map(|i| i * 10).sum()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_awards_from_same_start() {
    let store = MemoryStore::new();
    store
        .create_progression(&UserProgression {
            xp: 500,
            level: 6,
            ..UserProgression::new("racer")
        })
        .await
        .unwrap();
    let engine = engine(Arc::new(store.clone()));
    let observed = engine.current("racer").await.unwrap();

    let (a, b) = tokio::join!(
        engine.award_xp_from(&observed, 40),
        engine.award_xp_from(&observed, 250),
    );
    a.unwrap();
    b.unwrap();

    let stored = store.get_progression("racer").await.unwrap().unwrap();
    assert_eq!(stored.xp, 500 + 40 + 250);
    assert_eq!(stored.level, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_awards_memory() {
    let store = MemoryStore::new();
    store
        .create_progression(&UserProgression::new("racer"))
        .await
        .unwrap();

    let expected = award_concurrently(engine(Arc::new(store.clone())), "racer").await;

    let stored = store.get_progression("racer").await.unwrap().unwrap();
    assert_eq!(stored.xp, expected, "XP increment lost under concurrency");
}

async fn check_in_concurrently(engine: Arc<ProgressionEngine>, user_id: &str) -> usize {
    let mut handles = vec![];
    for _ in 0..NUM_CONCURRENT_AWARDS {
        let engine = engine.clone();
        let user_id = user_id.to_string();
        handles.push(tokio::spawn(async move { engine.check_in(&user_id, None).await }));
    }

    let mut increments = 0;
    for handle in handles {
        let check_in = handle
            .await
            .expect("Task join failed")
            .expect("Check-in failed");
        if matches!(check_in.outcome, PassOutcome::Increment { .. }) {
            increments += 1;
        }
    }
    increments
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_check_ins_award_once_memory() {
    let store = MemoryStore::new();
    store
        .create_progression(&UserProgression {
            xp: 100,
            level: 2,
            streak: 3,
            last_login: Some(utc(2024, 1, 15, 20, 0)),
            ..UserProgression::new("racer")
        })
        .await
        .unwrap();

    let increments = check_in_concurrently(engine(Arc::new(store.clone())), "racer").await;
    assert_eq!(increments, 1);

    let stored = store.get_progression("racer").await.unwrap().unwrap();
    assert_eq!((stored.xp, stored.streak), (140, 4), "check-in awarded more than once");
    assert_eq!(stored.last_login, Some(utc(2024, 1, 16, 9, 0)));
}

#[tokio::test]
async fn test_many_concurrent_awards_firestore() {
    require_emulator!();

    let db = test_db().await;
    let user_id = unique_user_id("race");
    db.create_progression(&UserProgression::new(user_id.clone()))
        .await
        .expect("Failed to create progression");

    let expected = award_concurrently(engine(Arc::new(db.clone())), &user_id).await;

    let stored = db
        .get_progression(&user_id)
        .await
        .expect("Failed to read progression")
        .expect("Progression document not found");
    assert_eq!(stored.xp, expected, "XP increment lost under concurrency");
}
