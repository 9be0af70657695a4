//! Sync pass orchestration.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::ledger::{step, step_kept, Ledger, Write};
use crate::metrics::{MetricEvent, NoopMetrics, SyncMetrics};
use crate::resolver::{ConflictResolver, Decision};
use crate::surface::ConflictSurface;
use crate::tracker::{apply_edit, ChangeTracker};
use crate::transition::Event;
use crate::transport::SyncTransport;
use offsync_protocol::{
    ConflictPolicy, Cursor, PullRequest, PushKind, PushOutcome, PushRequest, RecordId,
    RemoteChange, Revision, StateTag, TransportFailure,
};
use offsync_storage::{PendingEdit, RecordStore, ServerSnapshot, StorageError, StoredRecord};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Metadata key holding the pull cursor.
pub const CURSOR_KEY: &str = "sync.cursor";

/// Where a session is within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No pass is running.
    Idle,
    /// Building the worklist.
    Collecting,
    /// Pushing local changes.
    Pushing,
    /// Pulling server changes.
    Pulling,
    /// Resolving conflicts.
    Reconciling,
}

impl SessionPhase {
    /// Returns true while a pass runs.
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionPhase::Idle)
    }
}

/// Statistics across the passes of one session.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that completed.
    pub passes_completed: u64,
    /// Passes that stopped on an error.
    pub passes_failed: u64,
    /// Records the server acknowledged.
    pub records_pushed: u64,
    /// Server changes applied.
    pub changes_pulled: u64,
    /// Conflicts settled by policy.
    pub conflicts_resolved: u64,
    /// Last completed pass.
    pub last_pass_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// How a conflict ended within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The local side was pushed over the server's.
    KeptLocal,
    /// The server version was adopted.
    KeptServer,
    /// Both sides agreed the record is gone.
    Destroyed,
    /// Left conflicted for the application or the next pass.
    Deferred,
}

/// A conflict handled during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConflict {
    /// Record.
    pub id: RecordId,
    /// Outcome.
    pub resolution: Resolution,
}

/// Result of one pass.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    /// Policy the pass ran under.
    pub policy: ConflictPolicy,
    /// Pushes the server acknowledged.
    pub pushed: u64,
    /// Server changes applied locally.
    pub pulled: u64,
    /// Records that left the store.
    pub destroyed: u64,
    /// Records demoted from in-flight at the end of the pass.
    pub recovered: u64,
    /// Conflicts the resolver handled.
    pub resolved: Vec<ResolvedConflict>,
    /// Records still conflicted after the pass.
    pub pending_conflicts: Vec<RecordId>,
    /// Pushes that failed transiently; retried next pass.
    pub transient: Vec<(RecordId, TransportFailure)>,
    /// Pushes the server refused.
    pub rejected: Vec<(RecordId, TransportFailure)>,
    /// Pushes whose worker panicked.
    pub panicked: Vec<(RecordId, String)>,
    /// Why pulling stopped early, if it did.
    pub pull_failure: Option<TransportFailure>,
    /// The pass was cancelled.
    pub cancelled: bool,
    /// Wall-clock time of the pass.
    pub duration: Duration,
}

impl PassReport {
    fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Returns true if every record and the pull went through.
    pub fn is_clean(&self) -> bool {
        self.transient.is_empty()
            && self.rejected.is_empty()
            && self.panicked.is_empty()
            && self.pull_failure.is_none()
            && !self.cancelled
    }

    /// Returns the record-level failures of the pass as errors.
    pub fn errors(&self) -> Vec<SyncError> {
        let mut errors: Vec<SyncError> = self
            .transient
            .iter()
            .map(|(_, failure)| SyncError::transient(failure))
            .collect();
        errors.extend(self.rejected.iter().map(|(id, failure)| SyncError::Rejected {
            id: id.clone(),
            failure: failure.clone(),
        }));
        errors.extend(
            self.panicked
                .iter()
                .map(|(id, message)| SyncError::WorkerPanicked {
                    id: id.clone(),
                    message: message.clone(),
                }),
        );
        errors.extend(self.pull_failure.as_ref().map(SyncError::transient));
        if self.cancelled {
            errors.push(SyncError::Cancelled);
        }
        errors
    }
}

/// What a single push did to its record.
#[derive(Debug)]
enum Pushed {
    /// The record was no longer pushable.
    Skipped,
    /// The server acknowledged the update.
    Accepted,
    /// The server acknowledged the delete; the record is gone.
    Destroyed,
    /// The server conflicted; the record holds the server snapshot.
    Conflicted,
    /// A newer local edit superseded the outcome and awaits the next pass.
    Requeued,
    /// The push failed and the record was reverted.
    Failed(TransportFailure),
}

/// How a push settled, after mapping `NotFound`.
enum Settled {
    Accepted(Option<Revision>),
    Conflict(ServerSnapshot),
    Failed(TransportFailure),
}

/// What a pulled change did.
enum Applied {
    Changed,
    Conflict,
    Ignored,
}

/// Conflicts found during a pass, in discovery order.
#[derive(Default)]
struct ConflictQueue {
    order: Vec<RecordId>,
    seen: HashSet<RecordId>,
}

impl ConflictQueue {
    fn insert(&mut self, id: RecordId) {
        if self.seen.insert(id.clone()) {
            self.order.push(id);
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Drives push → pull → reconcile passes over one record store.
///
/// At most one pass runs at a time. Local edits may continue concurrently
/// through [`SyncSession::tracker`]; they share the session's commit lock.
pub struct SyncSession<S: RecordStore, T: SyncTransport> {
    config: SyncConfig,
    ledger: Arc<Ledger<S>>,
    transport: Arc<T>,
    policy: Arc<RwLock<ConflictPolicy>>,
    phase: RwLock<SessionPhase>,
    pass: Mutex<()>,
    cancelled: AtomicBool,
    metrics: Arc<dyn SyncMetrics>,
    stats: RwLock<SyncStats>,
}

impl<S: RecordStore, T: SyncTransport> SyncSession<S, T> {
    /// Opens a session and demotes any records a previous process left in
    /// flight.
    pub fn open(config: SyncConfig, store: Arc<S>, transport: Arc<T>) -> SyncResult<Self> {
        Self::open_with_metrics(config, store, transport, Arc::new(NoopMetrics))
    }

    /// Opens a session reporting to `metrics`.
    pub fn open_with_metrics(
        config: SyncConfig,
        store: Arc<S>,
        transport: Arc<T>,
        metrics: Arc<dyn SyncMetrics>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let session = Self {
            policy: Arc::new(RwLock::new(config.policy)),
            config,
            ledger: Arc::new(Ledger::new(store)),
            transport,
            phase: RwLock::new(SessionPhase::Idle),
            pass: Mutex::new(()),
            cancelled: AtomicBool::new(false),
            metrics,
            stats: RwLock::new(SyncStats::default()),
        };
        let recovered = session.ledger.recover()?;
        if recovered > 0 {
            info!(
                collection = %session.config.collection,
                recovered, "recovered records left in flight"
            );
            session.metrics.record(MetricEvent::Recovered { count: recovered });
        }
        Ok(session)
    }

    /// Returns a tracker sharing this session's commit lock and policy.
    pub fn tracker(&self) -> ChangeTracker<S> {
        ChangeTracker::from_parts(Arc::clone(&self.ledger), Arc::clone(&self.policy))
    }

    /// Returns the conflict surface over this session's store.
    pub fn surface(&self) -> ConflictSurface<S> {
        ConflictSurface::from_ledger(Arc::clone(&self.ledger))
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the current phase.
    pub fn phase(&self) -> SessionPhase {
        *self.phase.read()
    }

    /// Returns the session statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the conflict policy the next pass will use.
    pub fn policy(&self) -> ConflictPolicy {
        *self.policy.read()
    }

    /// Changes the conflict policy. Refused while a pass runs.
    pub fn set_policy(&self, policy: ConflictPolicy) -> SyncResult<()> {
        let Some(_pass) = self.pass.try_lock() else {
            return Err(SyncError::PolicyLocked);
        };
        *self.policy.write() = policy;
        info!(collection = %self.config.collection, %policy, "conflict policy changed");
        Ok(())
    }

    /// Asks the running pass to stop after the current record or batch.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: SessionPhase) {
        *self.phase.write() = phase;
    }

    /// Demotes records left in flight. Refused while a pass runs.
    pub fn recover(&self) -> SyncResult<u64> {
        let Some(_pass) = self.pass.try_lock() else {
            return Err(SyncError::PassInProgress);
        };
        let recovered = self.ledger.recover()?;
        self.metrics.record(MetricEvent::Recovered { count: recovered });
        Ok(recovered)
    }

    /// Runs one pass, failing with [`SyncError::PassInProgress`] if another
    /// pass is running.
    pub fn sync(&self) -> SyncResult<PassReport> {
        let Some(_pass) = self.pass.try_lock() else {
            return Err(SyncError::PassInProgress);
        };
        self.run_pass()
    }

    /// Runs one pass, waiting for any running pass to finish first.
    pub fn sync_serialized(&self) -> SyncResult<PassReport> {
        let _pass = self.pass.lock();
        self.run_pass()
    }

    fn run_pass(&self) -> SyncResult<PassReport> {
        let start = Instant::now();
        self.cancelled.store(false, Ordering::SeqCst);

        // The policy is fixed for the whole pass.
        let policy = *self.policy.read();
        let mut report = PassReport::new(policy);
        info!(collection = %self.config.collection, %policy, "sync pass started");
        self.metrics.record(MetricEvent::PassStarted);

        let driven = self.drive(policy, &mut report);

        // Anything still in flight goes back to pending.
        let recovered = self.ledger.recover();
        self.set_phase(SessionPhase::Idle);

        let result = driven.and(recovered).and_then(|count| {
            report.recovered = count;
            report.pending_conflicts = self.ledger.store().scan(&|state| state.is_conflicted())?;
            Ok(())
        });
        report.duration = start.elapsed();

        match result {
            Ok(()) => {
                {
                    let mut stats = self.stats.write();
                    stats.passes_completed += 1;
                    stats.records_pushed += report.pushed;
                    stats.changes_pulled += report.pulled;
                    stats.conflicts_resolved += report
                        .resolved
                        .iter()
                        .filter(|r| r.resolution != Resolution::Deferred)
                        .count() as u64;
                    stats.last_pass_time = Some(Instant::now());
                    stats.last_error = None;
                }
                if report.recovered > 0 {
                    self.metrics.record(MetricEvent::Recovered {
                        count: report.recovered,
                    });
                }
                self.metrics.record(MetricEvent::PassCompleted {
                    duration: report.duration,
                });
                info!(
                    collection = %self.config.collection,
                    pushed = report.pushed,
                    pulled = report.pulled,
                    conflicts = report.pending_conflicts.len(),
                    failures = report.transient.len() + report.rejected.len(),
                    cancelled = report.cancelled,
                    "sync pass finished"
                );
                Ok(report)
            }
            Err(e) => {
                error!(collection = %self.config.collection, error = %e, "sync pass failed");
                let mut stats = self.stats.write();
                stats.passes_failed += 1;
                stats.last_error = Some(e.to_string());
                self.metrics.record(MetricEvent::PassFailed);
                Err(e)
            }
        }
    }

    fn drive(&self, policy: ConflictPolicy, report: &mut PassReport) -> SyncResult<()> {
        // Collect phase
        self.set_phase(SessionPhase::Collecting);
        let (worklist, mut conflicts) = self.collect(policy)?;
        debug!(
            records = worklist.len(),
            conflicts = conflicts.len(),
            "worklist collected"
        );

        // Push phase
        self.set_phase(SessionPhase::Pushing);
        self.push_all(&worklist, report, &mut conflicts)?;
        if self.is_cancelled() {
            report.cancelled = true;
            return Ok(());
        }

        // Pull phase
        self.set_phase(SessionPhase::Pulling);
        self.pull_all(report, &mut conflicts)?;
        if report.cancelled {
            return Ok(());
        }

        // Reconcile phase
        self.set_phase(SessionPhase::Reconciling);
        self.reconcile_all(policy, conflicts, report)
    }

    fn collect(&self, policy: ConflictPolicy) -> SyncResult<(Vec<RecordId>, ConflictQueue)> {
        let mut worklist = Vec::new();
        let mut conflicts = ConflictQueue::default();
        for id in self.ledger.store().scan(&|state| state.is_dirty_or_delete())? {
            let Some(record) = self.ledger.get(&id)? else {
                continue;
            };
            if record.is_quarantined() {
                debug!(record = %id, "skipping quarantined record");
                continue;
            }
            if !record.state.is_conflicted() {
                worklist.push(id);
            } else if policy.auto_resolves() {
                conflicts.insert(id);
            }
        }
        Ok((worklist, conflicts))
    }

    /// Pushes the worklist on a bounded pool. Outcomes come back over a
    /// channel and are folded into the report on this thread.
    fn push_all(
        &self,
        worklist: &[RecordId],
        report: &mut PassReport,
        conflicts: &mut ConflictQueue,
    ) -> SyncResult<()> {
        if worklist.is_empty() {
            return Ok(());
        }
        let workers = self.config.push_workers.clamp(1, worklist.len());
        let next = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<(RecordId, SyncResult<Pushed>)>();
        let mut fatal = None;

        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let (next, stop) = (&next, &stop);
                scope.spawn(move || {
                    while !stop.load(Ordering::SeqCst) && !self.is_cancelled() {
                        let Some(id) = worklist.get(next.fetch_add(1, Ordering::SeqCst)) else {
                            break;
                        };
                        let result = panic::catch_unwind(AssertUnwindSafe(|| self.push_one(id)))
                            .unwrap_or_else(|payload| {
                                Err(SyncError::WorkerPanicked {
                                    id: id.clone(),
                                    message: panic_message(payload.as_ref()),
                                })
                            });
                        if tx.send((id.clone(), result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            for (id, result) in rx {
                if let Err(e) = self.fold_push(&id, result, report, conflicts) {
                    stop.store(true, Ordering::SeqCst);
                    fatal.get_or_insert(e);
                }
            }
        });

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Records one push outcome. Returns an error only for pass-fatal
    /// failures.
    fn fold_push(
        &self,
        id: &RecordId,
        result: SyncResult<Pushed>,
        report: &mut PassReport,
        conflicts: &mut ConflictQueue,
    ) -> SyncResult<()> {
        match result {
            Ok(Pushed::Skipped) => {}
            Ok(Pushed::Accepted) => {
                report.pushed += 1;
                self.metrics.record(MetricEvent::PushAccepted);
            }
            Ok(Pushed::Destroyed) => {
                report.pushed += 1;
                report.destroyed += 1;
                self.metrics.record(MetricEvent::PushAccepted);
            }
            Ok(Pushed::Conflicted) | Err(SyncError::VersionConflict { .. }) => {
                self.metrics.record(MetricEvent::ConflictDetected);
                conflicts.insert(id.clone());
            }
            Ok(Pushed::Requeued) => {
                debug!(record = %id, "newer local edit queued for next pass");
            }
            Ok(Pushed::Failed(failure)) => {
                self.metrics.record(MetricEvent::PushFailed);
                if failure.is_transient() {
                    report.transient.push((id.clone(), failure));
                } else {
                    report.rejected.push((id.clone(), failure));
                }
            }
            Err(SyncError::WorkerPanicked { id, message }) => {
                error!(record = %id, %message, "push worker panicked");
                self.metrics.record(MetricEvent::PushFailed);
                report.panicked.push((id, message));
            }
            Err(e) => return Err(self.quarantine_invalid(id, e)),
        }
        Ok(())
    }

    /// Excludes the record behind an invalid transition from automatic
    /// processing. Every other error is handed back untouched.
    fn quarantine_invalid(&self, id: &RecordId, e: SyncError) -> SyncError {
        if !matches!(e, SyncError::InvalidStateTransition { .. }) {
            return e;
        }
        error!(record = %id, error = %e, "invalid state transition, stopping pass");
        if let Err(quarantine) = self.ledger.quarantine(id, &e.to_string()) {
            error!(record = %id, error = %quarantine, "failed to quarantine record");
            return quarantine;
        }
        self.metrics.record(MetricEvent::Quarantined);
        e
    }

    /// Commits the in-flight state, pushes, and commits the outcome.
    fn push_one(&self, id: &RecordId) -> SyncResult<Pushed> {
        let request = self.ledger.mutate(id, |current| {
            let Some(record) = current else {
                return Ok((Write::Keep, None));
            };
            let pushable = record.state.is_dirty() || record.state == StateTag::Deleted;
            if !pushable || record.is_quarantined() {
                return Ok((Write::Keep, None));
            }

            let full = record.state == StateTag::DirtyFull;
            let kind = if record.state == StateTag::Deleted {
                PushKind::Delete
            } else if full || record.revision.is_none() {
                PushKind::Put
            } else {
                PushKind::Patch
            };
            let mut record = step_kept(id, record, Event::PushStarted)?;
            record.push_full = full;
            let request = PushRequest {
                id: id.clone(),
                kind,
                body: match kind {
                    PushKind::Delete => None,
                    _ => record.body.clone(),
                },
                base_revision: record.revision.clone(),
            };
            Ok((Write::Put(record), Some(request)))
        })?;

        let Some(request) = request else {
            return Ok(Pushed::Skipped);
        };
        debug!(record = %id, kind = ?request.kind, "pushing record");
        let outcome = self.transport.push(&request);

        let settled = match outcome {
            PushOutcome::Accepted(revision) => Settled::Accepted(Some(revision)),
            PushOutcome::VersionConflict {
                server_body,
                server_revision,
            } => Settled::Conflict(ServerSnapshot {
                body: server_body,
                revision: server_revision,
            }),
            // Deleting what the server no longer has is a success.
            PushOutcome::Failure(TransportFailure::NotFound) if request.kind == PushKind::Delete => {
                Settled::Accepted(None)
            }
            PushOutcome::Failure(TransportFailure::NotFound) => Settled::Conflict(ServerSnapshot {
                body: None,
                revision: None,
            }),
            PushOutcome::Failure(failure) => Settled::Failed(failure),
        };
        let pushed = self.settle(id, settled)?;
        debug!(record = %id, outcome = ?pushed, "push settled");
        match pushed {
            Pushed::Conflicted => Err(SyncError::VersionConflict { id: id.clone() }),
            pushed => Ok(pushed),
        }
    }

    fn settle(&self, id: &RecordId, settled: Settled) -> SyncResult<Pushed> {
        self.ledger.mutate(id, |current| {
            let mut record = current.ok_or_else(|| SyncError::InvalidStateTransition {
                id: id.clone(),
                from: StateTag::NoState,
                event: Event::PushAccepted.to_string(),
            })?;
            let full = std::mem::take(&mut record.push_full);
            let pending = record.pending.take();

            let (next, pushed) = match settled {
                Settled::Accepted(revision) => {
                    let next = step(id, record, Event::PushAccepted)?.map(|mut record| {
                        record.revision = revision;
                        record.server = None;
                        record
                    });
                    let pushed = if next.is_some() {
                        Pushed::Accepted
                    } else {
                        Pushed::Destroyed
                    };
                    (next, pushed)
                }
                // The queued edit is newer than both sides; push it next pass.
                Settled::Conflict(_) if pending.is_some() => {
                    (step(id, record, Event::PushFailed { full })?, Pushed::Requeued)
                }
                Settled::Conflict(server) => {
                    let mut record = step_kept(id, record, Event::PushConflicted { full })?;
                    record.server = Some(server);
                    (Some(record), Pushed::Conflicted)
                }
                Settled::Failed(failure) => {
                    (step(id, record, Event::PushFailed { full })?, Pushed::Failed(failure))
                }
            };

            let next = match (next, pending) {
                (next, None) => next,
                (Some(record), Some(edit)) => apply_edit(id, record, edit)?,
                (None, Some(PendingEdit::Update { body, .. })) => {
                    Some(StoredRecord::new(body, StateTag::DirtyFull))
                }
                (None, Some(PendingEdit::Delete)) => None,
            };
            Ok((Write::from_record(next), pushed))
        })
    }

    fn load_cursor(&self) -> SyncResult<Option<Cursor>> {
        let Some(bytes) = self.ledger.store().get_meta(CURSOR_KEY)? else {
            return Ok(None);
        };
        let token = String::from_utf8(bytes)
            .map_err(|e| StorageError::Corrupted(format!("pull cursor is not UTF-8: {e}")))?;
        Ok((!token.is_empty()).then(|| Cursor::new(token)))
    }

    fn store_cursor(&self, cursor: &Cursor) -> SyncResult<()> {
        self.ledger
            .store()
            .put_meta(CURSOR_KEY, cursor.as_str().as_bytes())?;
        Ok(())
    }

    fn pull_all(&self, report: &mut PassReport, conflicts: &mut ConflictQueue) -> SyncResult<()> {
        loop {
            if self.is_cancelled() {
                report.cancelled = true;
                return Ok(());
            }

            let request = PullRequest {
                cursor: self.load_cursor()?,
                limit: self.config.pull_batch_size,
            };
            let response = match self.transport.pull(&request) {
                Ok(response) => response,
                Err(failure) => {
                    warn!(error = %failure, "pull failed, will retry next pass");
                    report.pull_failure = Some(failure);
                    return Ok(());
                }
            };

            let mut applied = 0;
            for change in &response.changes {
                let applied_change = self
                    .apply_remote(change)
                    .map_err(|e| self.quarantine_invalid(&change.id, e))?;
                match applied_change {
                    Applied::Changed => applied += 1,
                    Applied::Conflict => {
                        applied += 1;
                        self.metrics.record(MetricEvent::ConflictDetected);
                        conflicts.insert(change.id.clone());
                    }
                    Applied::Ignored => {}
                }
            }
            report.pulled += applied;
            self.metrics.record(MetricEvent::Pulled { count: applied });
            self.store_cursor(&response.cursor)?;
            debug!(
                changes = response.changes.len(),
                cursor = %response.cursor,
                has_more = response.has_more,
                "pulled batch"
            );

            if !response.has_more {
                return Ok(());
            }
        }
    }

    fn apply_remote(&self, change: &RemoteChange) -> SyncResult<Applied> {
        let id = &change.id;
        self.ledger.mutate(id, |current| {
            let Some(record) = current else {
                return Ok(match &change.body {
                    Some(body) => (
                        Write::Put(StoredRecord::synced(body.clone(), change.revision.clone())),
                        Applied::Changed,
                    ),
                    None => (Write::Keep, Applied::Ignored),
                });
            };
            if record.is_quarantined() {
                warn!(record = %id, "ignoring server change for quarantined record");
                return Ok((Write::Keep, Applied::Ignored));
            }
            // Our own acknowledged write coming back.
            if record.revision.as_ref() == Some(&change.revision) {
                return Ok((Write::Keep, Applied::Ignored));
            }
            if record.state.is_clean() {
                let next = step(
                    id,
                    record,
                    Event::RemoteApplied {
                        deleted: change.is_deleted(),
                    },
                )?
                .map(|mut record| {
                    record.body = change.body.clone();
                    record.revision = Some(change.revision.clone());
                    record
                });
                return Ok((Write::from_record(next), Applied::Changed));
            }
            if record.state.is_syncing() {
                return Ok((Write::Keep, Applied::Ignored));
            }

            let mut record = step_kept(id, record, Event::ServerDiverged)?;
            record.server = Some(ServerSnapshot {
                body: change.body.clone(),
                revision: Some(change.revision.clone()),
            });
            debug!(record = %id, state = ?record.state, "server diverged from local edit");
            Ok((Write::Put(record), Applied::Conflict))
        })
    }

    fn reconcile_all(
        &self,
        policy: ConflictPolicy,
        conflicts: ConflictQueue,
        report: &mut PassReport,
    ) -> SyncResult<()> {
        for id in conflicts.order {
            if self.is_cancelled() {
                report.cancelled = true;
                return Ok(());
            }
            let resolved = self
                .reconcile_one(&id, policy, report)
                .map_err(|e| self.quarantine_invalid(&id, e))?;
            let Some(resolution) = resolved else {
                continue;
            };
            self.metrics.record(match resolution {
                Resolution::Deferred => MetricEvent::ConflictDeferred,
                _ => MetricEvent::ConflictResolved,
            });
            report.resolved.push(ResolvedConflict { id, resolution });
        }
        Ok(())
    }

    fn reconcile_one(
        &self,
        id: &RecordId,
        policy: ConflictPolicy,
        report: &mut PassReport,
    ) -> SyncResult<Option<Resolution>> {
        let decision = self.ledger.mutate(id, |current| {
            let Some(record) = current else {
                return Ok((Write::Keep, None));
            };
            if !record.state.is_conflicted() || record.is_quarantined() {
                return Ok((Write::Keep, None));
            }
            let invalid = || SyncError::InvalidStateTransition {
                id: id.clone(),
                from: record.state,
                event: "resolve".into(),
            };
            let server = record.server.clone().ok_or_else(invalid)?;
            let decision =
                ConflictResolver::resolve_record(&record, &server, policy).ok_or_else(invalid)?;
            let next = decision.commit(id, record, &server)?;
            Ok((Write::from_record(next), Some(decision)))
        })?;

        let Some(decision) = decision else {
            return Ok(None);
        };
        debug!(record = %id, %policy, ?decision, "conflict decided");

        let resolution = match decision {
            Decision::Defer { .. } => Resolution::Deferred,
            Decision::AcceptServer { .. } => Resolution::KeptServer,
            Decision::Destroy => {
                report.destroyed += 1;
                Resolution::Destroyed
            }
            // One re-push per pass; a repeat conflict waits for the next.
            Decision::OverwriteServer { .. } => match self.push_one(id) {
                Ok(Pushed::Accepted) => {
                    report.pushed += 1;
                    Resolution::KeptLocal
                }
                Ok(Pushed::Destroyed) => {
                    report.pushed += 1;
                    report.destroyed += 1;
                    Resolution::KeptLocal
                }
                Ok(Pushed::Failed(failure)) => {
                    if failure.is_transient() {
                        report.transient.push((id.clone(), failure));
                    } else {
                        report.rejected.push((id.clone(), failure));
                    }
                    Resolution::KeptLocal
                }
                Ok(Pushed::Skipped | Pushed::Requeued) => Resolution::KeptLocal,
                Ok(Pushed::Conflicted) | Err(SyncError::VersionConflict { .. }) => {
                    Resolution::Deferred
                }
                Err(e) => return Err(e),
            },
        };
        Ok(Some(resolution))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
