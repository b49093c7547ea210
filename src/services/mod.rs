// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod level;
pub mod progression;
pub mod session;
pub mod streak;
pub mod sync;

pub use progression::{CheckIn, PassOutcome, PassPlan, ProgressionEngine};
pub use session::{
    AuthReadiness, IdentityEvent, SessionBinder, SessionHandle, SessionPhase, SessionView,
};
pub use sync::{LocalCache, MemoryCache, SyncedCollections};
