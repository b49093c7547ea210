// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session binder: ties one signed-in identity to a live progression
//! subscription and runs an evaluation pass on every snapshot.
//!
//! The binder is a single task fed by an identity source, a command
//! channel, the completion of its own writes, the live subscription and
//! the auth-ready deadline. State is published through a `watch` channel.
//!
//! Every bind bumps a generation counter. Writes carry the generation they
//! were issued under and their results are discarded if the identity has
//! changed since. Unbinding drops the subscription before anything else
//! happens, so no callback for a departed identity runs afterwards.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::db::{ProgressionEvent, Subscription, SyncEvent};
use crate::error::AppError;
use crate::models::UserProgression;
use crate::services::progression::{provisional_award, PassOutcome, ProgressionEngine};
use crate::time_utils::local_date;

/// Change reported by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    SignedIn {
        user_id: String,
        display_name: Option<String>,
    },
    SignedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No identity.
    Unbound,
    /// Identity known, waiting for the first snapshot.
    Binding,
    /// Live subscription active and at least one snapshot seen.
    Bound,
}

/// Whether the initial "who is signed in" question has been answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthReadiness {
    Pending,
    /// No answer before the deadline; running as signed out.
    TimedOut,
    Resolved,
}

/// Published session state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub phase: SessionPhase,
    pub user_id: Option<String>,
    pub auth: AuthReadiness,
    /// Last snapshot delivered by the store.
    pub confirmed: Option<UserProgression>,
    /// Local estimate ahead of the store; dropped on the next snapshot.
    pub provisional: Option<UserProgression>,
    pub last_error: Option<String>,
}

impl SessionView {
    fn unbound(auth: AuthReadiness) -> Self {
        Self {
            phase: SessionPhase::Unbound,
            user_id: None,
            auth,
            confirmed: None,
            provisional: None,
            last_error: None,
        }
    }

    /// Best current estimate for display.
    pub fn progression(&self) -> Option<&UserProgression> {
        self.provisional.as_ref().or(self.confirmed.as_ref())
    }
}

#[derive(Debug)]
enum Command {
    AwardXp(u64),
    Unbind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    /// Record creation followed by the first-login pass.
    Create,
    Pass(PassOutcome),
    Award,
}

#[derive(Debug)]
struct WriteOutcome {
    generation: u64,
    kind: WriteKind,
    result: Result<(), AppError>,
}

enum Event {
    Identity(Option<IdentityEvent>),
    Command(Option<Command>),
    Written(WriteOutcome),
    Snapshot(Option<ProgressionEvent>),
    AuthDeadline,
}

/// Caller side of a running binder.
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<SessionView>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Fire-and-forget XP award for the bound identity.
    pub fn award_xp(&self, amount: u64) {
        let _ = self.commands.send(Command::AwardXp(amount));
    }

    pub fn unbind(&self) {
        let _ = self.commands.send(Command::Unbind);
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Wait until the published view satisfies `predicate`.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&SessionView) -> bool,
    ) -> Option<SessionView> {
        self.view.wait_for(predicate).await.ok().map(|v| v.clone())
    }

    /// Resolves once, when auth is either answered or timed out.
    pub async fn auth_ready(&mut self) -> Option<AuthReadiness> {
        self.wait_for(|v| v.auth != AuthReadiness::Pending)
            .await
            .map(|v| v.auth)
    }

    /// Stop the binder, tearing down any live subscription.
    pub async fn shutdown(self) {
        drop(self.commands);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Session binder task failed");
        }
    }
}

pub struct SessionBinder {
    engine: Arc<ProgressionEngine>,
    identity: mpsc::UnboundedReceiver<IdentityEvent>,
    identity_open: bool,
    commands: mpsc::UnboundedReceiver<Command>,
    outcomes_tx: mpsc::UnboundedSender<WriteOutcome>,
    outcomes: mpsc::UnboundedReceiver<WriteOutcome>,
    published: watch::Sender<SessionView>,
    view: SessionView,
    generation: u64,
    subscription: Option<Subscription<Option<UserProgression>>>,
    display_name: Option<String>,
    auth_deadline: Option<Instant>,
    /// Local day on which this binding issued its streak write.
    daily_write: Option<NaiveDate>,
    creating: bool,
    level_heal_in_flight: Option<u32>,
    /// Awards received before a confirmed record existed.
    pending_awards: Vec<u64>,
}

impl SessionBinder {
    /// Start a binder task reading identity changes from `identity`.
    pub fn spawn(
        engine: Arc<ProgressionEngine>,
        identity: mpsc::UnboundedReceiver<IdentityEvent>,
        auth_timeout: Duration,
    ) -> SessionHandle {
        let (binder, commands, view) = Self::new(engine, identity, auth_timeout);
        let task = tokio::spawn(binder.run());
        SessionHandle {
            commands,
            view,
            task,
        }
    }

    fn new(
        engine: Arc<ProgressionEngine>,
        identity: mpsc::UnboundedReceiver<IdentityEvent>,
        auth_timeout: Duration,
    ) -> (
        Self,
        mpsc::UnboundedSender<Command>,
        watch::Receiver<SessionView>,
    ) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes) = mpsc::unbounded_channel();
        let view = SessionView::unbound(AuthReadiness::Pending);
        let (published, view_rx) = watch::channel(view.clone());

        let binder = Self {
            engine,
            identity,
            identity_open: true,
            commands,
            outcomes_tx,
            outcomes,
            published,
            view,
            generation: 0,
            subscription: None,
            display_name: None,
            auth_deadline: Some(Instant::now() + auth_timeout),
            daily_write: None,
            creating: false,
            level_heal_in_flight: None,
            pending_awards: Vec::new(),
        };
        (binder, commands_tx, view_rx)
    }

    async fn run(mut self) {
        loop {
            let deadline = self.auth_deadline;
            let event = tokio::select! {
                identity = self.identity.recv(), if self.identity_open => Event::Identity(identity),
                command = self.commands.recv() => Event::Command(command),
                Some(outcome) = self.outcomes.recv() => Event::Written(outcome),
                snapshot = next_snapshot(self.subscription.as_mut()) => Event::Snapshot(snapshot),
                _ = sleep_until(deadline) => Event::AuthDeadline,
            };

            match event {
                Event::Identity(Some(identity)) => self.handle_identity(identity).await,
                Event::Identity(None) => {
                    tracing::debug!("Identity source closed");
                    self.identity_open = false;
                }
                Event::Command(Some(Command::AwardXp(amount))) => self.handle_award(amount),
                Event::Command(Some(Command::Unbind)) => self.unbind("explicit unbind"),
                Event::Command(None) => break,
                Event::Written(outcome) => self.handle_outcome(outcome),
                Event::Snapshot(Some(SyncEvent::Snapshot(snapshot))) => {
                    self.handle_snapshot(snapshot)
                }
                Event::Snapshot(Some(SyncEvent::Error(message))) => {
                    tracing::warn!(
                        user_id = ?self.view.user_id,
                        error = %message,
                        "Progression subscription error"
                    );
                    self.view.last_error = Some(message);
                }
                Event::Snapshot(None) => {
                    tracing::warn!(user_id = ?self.view.user_id, "Progression subscription ended");
                    self.subscription = None;
                }
                Event::AuthDeadline => {
                    tracing::info!("Auth readiness timed out, continuing signed out");
                    self.auth_deadline = None;
                    self.view.auth = AuthReadiness::TimedOut;
                }
            }

            self.publish();
        }

        self.unbind("binder shutting down");
        self.publish();
    }

    fn publish(&self) {
        self.published.send_replace(self.view.clone());
    }

    async fn handle_identity(&mut self, identity: IdentityEvent) {
        self.auth_deadline = None;
        self.view.auth = AuthReadiness::Resolved;

        match identity {
            IdentityEvent::SignedOut => self.unbind("signed out"),
            IdentityEvent::SignedIn {
                user_id,
                display_name,
            } => {
                if self.view.user_id.as_deref() == Some(user_id.as_str()) {
                    tracing::debug!(user_id = %user_id, "Already bound to identity");
                    return;
                }
                self.unbind("identity changed");
                self.bind(user_id, display_name).await;
            }
        }
    }

    async fn bind(&mut self, user_id: String, display_name: Option<String>) {
        self.view.phase = SessionPhase::Binding;
        self.view.user_id = Some(user_id.clone());
        self.display_name = display_name;

        match self.engine.store().subscribe_progression(&user_id).await {
            Ok(subscription) => {
                tracing::info!(user_id = %user_id, generation = self.generation, "Binding session");
                self.subscription = Some(subscription);
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to subscribe to progression");
                self.view.last_error = Some(e.to_string());
            }
        }
    }

    /// Drop the subscription and forget the identity. In-flight writes
    /// finish but their results no longer match the generation.
    fn unbind(&mut self, reason: &str) {
        self.subscription = None;
        if let Some(user_id) = self.view.user_id.take() {
            tracing::info!(user_id = %user_id, reason, "Unbinding session");
        }
        self.generation += 1;
        self.view = SessionView::unbound(self.view.auth);
        self.display_name = None;
        self.daily_write = None;
        self.creating = false;
        self.level_heal_in_flight = None;
        self.pending_awards.clear();
    }

    fn handle_snapshot(&mut self, snapshot: Option<UserProgression>) {
        let Some(user_id) = self.view.user_id.clone() else {
            return;
        };

        let Some(progression) = snapshot else {
            self.handle_missing_record(user_id);
            return;
        };

        self.view.phase = SessionPhase::Bound;
        self.view.confirmed = Some(progression.clone());
        self.view.provisional = None;
        if self.level_heal_in_flight.is_some_and(|level| progression.level >= level) {
            self.level_heal_in_flight = None;
        }

        self.evaluate(user_id, progression);
        self.flush_pending_awards();
    }

    fn evaluate(&mut self, user_id: String, progression: UserProgression) {
        let now = self.engine.now();
        let plan = self.engine.plan_pass(&progression, now);
        if plan.delta.is_empty() {
            return;
        }

        if plan.outcome.is_daily_write() {
            let today = local_date(now, self.engine.rules().day_offset);
            if self.daily_write == Some(today) {
                tracing::debug!(
                    user_id = %user_id,
                    outcome = ?plan.outcome,
                    "Streak write already issued today, skipping"
                );
                return;
            }
            self.daily_write = Some(today);
        } else if let Some(level) = plan.delta.level_set {
            if self.level_heal_in_flight == Some(level) {
                return;
            }
            self.level_heal_in_flight = Some(level);
        }

        tracing::info!(user_id = %user_id, outcome = ?plan.outcome, "Applying evaluation pass");

        let mut provisional = progression;
        provisional.apply(&plan.delta);
        self.view.provisional = Some(provisional);

        let engine = self.engine.clone();
        let delta = plan.delta;
        self.spawn_write(WriteKind::Pass(plan.outcome), async move {
            engine.store().apply_delta(&user_id, &delta).await
        });
    }

    /// First authentication for this identity: create the record and use
    /// the defaults as the bound state right away.
    fn handle_missing_record(&mut self, user_id: String) {
        if self.creating {
            return;
        }
        self.creating = true;

        let fresh = UserProgression::new(user_id.clone()).with_display_name(self.display_name.clone());
        let now = self.engine.now();
        let plan = self.engine.plan_pass(&fresh, now);
        self.daily_write = Some(local_date(now, self.engine.rules().day_offset));

        let mut provisional = fresh.clone();
        provisional.apply(&plan.delta);
        self.view.phase = SessionPhase::Bound;
        self.view.confirmed = Some(fresh.clone());
        self.view.provisional = Some(provisional);

        tracing::info!(user_id = %user_id, "No progression record, creating");

        let engine = self.engine.clone();
        self.spawn_write(WriteKind::Create, async move {
            engine.store().create_progression(&fresh).await?;
            engine.store().apply_delta(&user_id, &plan.delta).await
        });
    }

    fn handle_award(&mut self, amount: u64) {
        let Some(user_id) = self.view.user_id.clone() else {
            tracing::warn!(amount, "XP award while signed out, dropping");
            return;
        };

        if amount == 0 {
            tracing::warn!(user_id = %user_id, "Ignoring zero XP award");
            return;
        }

        let observed = match self.view.progression() {
            Some(observed) if !self.creating && self.view.phase == SessionPhase::Bound => {
                observed.clone()
            }
            _ => {
                tracing::debug!(
                    user_id = %user_id,
                    amount,
                    "Queueing XP award until the record is confirmed"
                );
                self.pending_awards.push(amount);
                return;
            }
        };

        let (provisional, _) = provisional_award(&observed, amount);
        self.view.provisional = Some(provisional);

        let engine = self.engine.clone();
        self.spawn_write(WriteKind::Award, async move {
            engine.award_xp_from(&observed, amount).await.map(|_| ())
        });
    }

    fn handle_outcome(&mut self, outcome: WriteOutcome) {
        if outcome.generation != self.generation {
            tracing::debug!(
                kind = ?outcome.kind,
                generation = outcome.generation,
                current = self.generation,
                "Discarding write result for a previous binding"
            );
            return;
        }

        let e = match outcome.result {
            Ok(()) => {
                if outcome.kind == WriteKind::Create {
                    self.creating = false;
                    self.flush_pending_awards();
                }
                return;
            }
            // A concurrent session already wrote this pass; its snapshot follows.
            Err(AppError::Conflict(message)) => {
                tracing::debug!(
                    user_id = ?self.view.user_id,
                    kind = ?outcome.kind,
                    reason = %message,
                    "Evaluation pass superseded"
                );
                self.view.provisional = None;
                if outcome.kind == WriteKind::Create {
                    self.creating = false;
                    self.flush_pending_awards();
                }
                return;
            }
            Err(e) => e,
        };

        tracing::warn!(
            user_id = ?self.view.user_id,
            kind = ?outcome.kind,
            error = %e,
            "Progression write failed"
        );
        self.view.last_error = Some(e.to_string());
        // Keep showing the last confirmed state.
        self.view.provisional = None;

        match outcome.kind {
            WriteKind::Create => {
                self.creating = false;
                self.daily_write = None;
            }
            WriteKind::Pass(pass) if pass.is_daily_write() => self.daily_write = None,
            WriteKind::Pass(_) => self.level_heal_in_flight = None,
            WriteKind::Award => {}
        }
    }

    fn flush_pending_awards(&mut self) {
        if self.creating || self.view.confirmed.is_none() {
            return;
        }
        for amount in std::mem::take(&mut self.pending_awards) {
            self.handle_award(amount);
        }
    }

    fn spawn_write<F>(&self, kind: WriteKind, write: F)
    where
        F: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let generation = self.generation;
        let outcomes = self.outcomes_tx.clone();
        tokio::spawn(async move {
            let result = write.await;
            let _ = outcomes.send(WriteOutcome {
                generation,
                kind,
                result,
            });
        });
    }
}

async fn next_snapshot(
    subscription: Option<&mut Subscription<Option<UserProgression>>>,
) -> Option<ProgressionEvent> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProgressionRules;
    use crate::db::{MemoryStore, ProgressionStore};
    use crate::models::{ProgressionDelta, ProgressionDocument};
    use crate::time_utils::Clock;
    use chrono::{DateTime, TimeZone, Utc};

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 16, 9, 0, 0).unwrap()
    }

    fn binder(store: &MemoryStore) -> (SessionBinder, mpsc::UnboundedSender<IdentityEvent>) {
        let engine = ProgressionEngine::new(
            Arc::new(store.clone()),
            Arc::new(FixedClock(now())),
            ProgressionRules::default(),
        );
        let (identity_tx, identity_rx) = mpsc::unbounded_channel();
        let (binder, _, _) =
            SessionBinder::new(Arc::new(engine), identity_rx, Duration::from_secs(3));
        (binder, identity_tx)
    }

    fn yesterday_record(user_id: &str) -> UserProgression {
        UserProgression {
            xp: 100,
            level: 2,
            streak: 3,
            last_login: Some(Utc.with_ymd_and_hms(2024, 1, 15, 20, 0, 0).unwrap()),
            ..UserProgression::new(user_id)
        }
    }

    async fn drain_one(binder: &mut SessionBinder) {
        let outcome = binder.outcomes.recv().await.unwrap();
        binder.handle_outcome(outcome);
    }

    async fn deliver_next(binder: &mut SessionBinder) -> Option<UserProgression> {
        let Some(SyncEvent::Snapshot(snapshot)) = next_snapshot(binder.subscription.as_mut()).await
        else {
            panic!("expected a snapshot");
        };
        binder.handle_snapshot(snapshot.clone());
        snapshot
    }

    #[tokio::test]
    async fn test_one_streak_write_per_day() {
        let store = MemoryStore::new();
        store.create_progression(&yesterday_record("u1")).await.unwrap();
        let (mut binder, _identity) = binder(&store);
        binder.bind("u1".to_string(), None).await;

        // The same pre-write snapshot delivered twice must not double-award
        binder.handle_snapshot(Some(yesterday_record("u1")));
        binder.handle_snapshot(Some(yesterday_record("u1")));
        drain_one(&mut binder).await;

        let stored = store.get_progression("u1").await.unwrap().unwrap();
        assert_eq!(stored.streak, 4);
        assert_eq!(stored.xp, 140);
        assert!(binder.outcomes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_streak_write_can_be_retried() {
        let store = MemoryStore::new();
        store.create_progression(&yesterday_record("u1")).await.unwrap();
        let (mut binder, _identity) = binder(&store);
        binder.bind("u1".to_string(), None).await;

        store.set_fail_writes(true);
        binder.handle_snapshot(Some(yesterday_record("u1")));
        drain_one(&mut binder).await;
        assert!(binder.view.last_error.is_some());
        assert_eq!(binder.view.provisional, None);
        assert_eq!(binder.daily_write, None);

        store.set_fail_writes(false);
        binder.handle_snapshot(Some(yesterday_record("u1")));
        drain_one(&mut binder).await;
        assert_eq!(store.get_progression("u1").await.unwrap().unwrap().streak, 4);
    }

    #[tokio::test]
    async fn test_stale_write_result_is_discarded() {
        let store = MemoryStore::new();
        store.create_progression(&yesterday_record("u1")).await.unwrap();
        let (mut binder, _identity) = binder(&store);
        binder.bind("u1".to_string(), None).await;

        store.set_fail_writes(true);
        binder.handle_snapshot(Some(yesterday_record("u1")));
        let outcome = binder.outcomes.recv().await.unwrap();

        // Identity switches before the failure is observed
        binder.unbind("identity changed");
        binder.bind("u2".to_string(), None).await;
        binder.handle_outcome(outcome);

        assert_eq!(binder.view.user_id.as_deref(), Some("u2"));
        assert_eq!(binder.view.last_error, None);
    }

    #[tokio::test]
    async fn test_unbind_drops_subscription() {
        let store = MemoryStore::new();
        let (mut binder, _identity) = binder(&store);
        binder.bind("u1".to_string(), None).await;
        assert_eq!(store.watcher_count("u1"), 1);

        binder.unbind("signed out");
        assert!(binder.subscription.is_none());
        assert_eq!(binder.view.phase, SessionPhase::Unbound);
        assert_eq!(store.watcher_count("u1"), 0);
    }

    #[tokio::test]
    async fn test_missing_record_binds_immediately() {
        let store = MemoryStore::new();
        let (mut binder, _identity) = binder(&store);
        binder
            .bind("u1".to_string(), Some("Ada".to_string()))
            .await;

        binder.handle_snapshot(None);
        assert_eq!(binder.view.phase, SessionPhase::Bound);
        assert_eq!(binder.view.progression().map(|p| p.streak), Some(1));

        // A second "missing" snapshot before the create lands is ignored
        binder.handle_snapshot(None);
        drain_one(&mut binder).await;

        let stored = store.get_progression("u1").await.unwrap().unwrap();
        assert_eq!(stored.streak, 1);
        assert_eq!(stored.last_login, Some(now()));
        assert_eq!(stored.display_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_snapshot_queued_for_previous_identity_is_dropped() {
        let store = MemoryStore::new();
        store.create_progression(&yesterday_record("u1")).await.unwrap();
        store.create_progression(&yesterday_record("u2")).await.unwrap();
        let (mut binder, _identity) = binder(&store);
        binder.bind("u1".to_string(), None).await;

        // u1's initial snapshot and a later change sit undelivered
        store
            .apply_delta("u1", &ProgressionDelta::xp_increment(5))
            .await
            .unwrap();
        let writes = store.write_count();

        binder.unbind("identity changed");
        binder.bind("u2".to_string(), None).await;

        let first = deliver_next(&mut binder).await;
        assert_eq!(first.map(|p| p.user_id), Some("u2".to_string()));
        drain_one(&mut binder).await;

        let u1 = store.get_progression("u1").await.unwrap().unwrap();
        assert_eq!((u1.xp, u1.streak), (105, 3));
        assert_eq!(store.get_progression("u2").await.unwrap().unwrap().streak, 4);
        assert_eq!(store.write_count(), writes + 1);
        assert!(binder.outcomes.try_recv().is_err());
        assert_eq!(store.watcher_count("u1"), 0);
    }

    #[tokio::test]
    async fn test_award_while_binding_is_queued() {
        let store = MemoryStore::new();
        store.create_progression(&yesterday_record("u1")).await.unwrap();
        let (mut binder, _identity) = binder(&store);

        // Nobody signed in
        binder.handle_award(10);
        assert!(binder.pending_awards.is_empty());

        binder.bind("u1".to_string(), None).await;
        binder.handle_award(25);
        assert_eq!(binder.pending_awards, vec![25]);
        assert!(binder.outcomes.try_recv().is_err());

        deliver_next(&mut binder).await;
        assert!(binder.pending_awards.is_empty());
        assert_eq!(binder.view.progression().map(|p| p.xp), Some(165));
        drain_one(&mut binder).await;
        drain_one(&mut binder).await;

        let stored = store.get_progression("u1").await.unwrap().unwrap();
        assert_eq!((stored.xp, stored.streak), (165, 4));
    }

    #[tokio::test]
    async fn test_malformed_record_is_replaced_on_bind() {
        let store = MemoryStore::new();
        store.put_raw_document(
            "u1",
            ProgressionDocument {
                level: Some(3),
                streak: Some(2),
                username: Some("runner".to_string()),
                is_onboarded: Some(true),
                ..ProgressionDocument::default()
            },
        );
        let (mut binder, _identity) = binder(&store);
        binder.bind("u1".to_string(), None).await;

        assert_eq!(deliver_next(&mut binder).await, None);
        assert!(binder.creating);
        drain_one(&mut binder).await;
        assert!(!binder.creating);

        let stored = store.get_progression("u1").await.unwrap().unwrap();
        assert_eq!((stored.xp, stored.level, stored.streak), (0, 1, 1));
        assert_eq!(stored.username.as_deref(), Some("runner"));
        assert!(stored.is_onboarded);

        // The replacement's snapshots confirm without another streak write
        deliver_next(&mut binder).await;
        deliver_next(&mut binder).await;
        assert_eq!(binder.view.confirmed.as_ref().map(|p| p.streak), Some(1));
        assert!(binder.outcomes.try_recv().is_err());
    }
}
