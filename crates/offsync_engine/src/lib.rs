//! # offsync Engine
//!
//! Sync state machine and conflict resolution engine for offline-first
//! record caches.
//!
//! This crate provides:
//! - The per-record transition table ([`transition`])
//! - [`ChangeTracker`] for local create/update/delete
//! - [`ConflictResolver`] for deterministic policy-driven resolution
//! - [`SyncSession`] for push → pull → reconcile passes
//! - [`ConflictSurface`] for manual resolution and state queries
//! - Transport abstraction with mock and HTTP implementations
//! - Connectivity-driven automatic sync ([`AutoSync`])
//!
//! ## Architecture
//!
//! A pass runs `Idle → Collecting → Pushing → Pulling → Reconciling → Idle`:
//! 1. Collect dirty, deleted and conflicted records in store order
//! 2. Push each one, committing the in-flight state before the request
//! 3. Pull server changes since the persisted cursor
//! 4. Resolve every conflict the pass produced under the session policy
//!
//! ## Key Invariants
//!
//! - Durability precedes network action
//! - A record is in at most one push at a time
//! - Conflicted records never leave that state without the resolver
//! - Passes never interleave; records in flight after a crash or
//!   cancellation are demoted back to their pending state

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod http;
mod ledger;
mod metrics;
mod monitor;
mod resolver;
mod session;
mod surface;
mod tracker;
pub mod transition;
mod transport;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpError, HttpResponse, HttpTransport};
pub use metrics::{CounterMetrics, MetricEvent, MetricsSnapshot, NoopMetrics, SyncMetrics};
pub use monitor::{AutoSync, Connectivity, NetworkMonitor, PassEvent};
pub use resolver::{ConflictResolver, Decision, LocalIntent, LocalSide};
pub use session::{
    PassReport, Resolution, ResolvedConflict, SessionPhase, SyncSession, SyncStats, CURSOR_KEY,
};
pub use surface::{ConflictKind, ConflictSurface, ConflictView, StateSummary};
pub use tracker::ChangeTracker;
pub use transport::{MockTransport, SyncTransport};
