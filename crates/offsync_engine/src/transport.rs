//! Transport layer abstraction for sync operations.

use offsync_protocol::{
    Cursor, PullRequest, PullResponse, PushOutcome, PushRequest, RecordId, Revision,
    TransportFailure,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A sync transport handles network communication with the sync server.
///
/// Push outcomes are data, not errors: a version conflict or a failed
/// request is reported in the [`PushOutcome`] and the session decides what
/// happens to the record. Implementations must be `Send + Sync` because
/// pushes fan out across worker threads.
pub trait SyncTransport: Send + Sync {
    /// Pushes one record.
    fn push(&self, request: &PushRequest) -> PushOutcome;

    /// Pulls server changes since a cursor.
    fn pull(&self, request: &PullRequest) -> Result<PullResponse, TransportFailure>;
}

type PushHook = Box<dyn Fn(&PushRequest) + Send + Sync>;

/// A scripted transport for testing.
///
/// Push outcomes are queued per record; records without a script are
/// accepted with an increasing numeric revision. Pull responses are served
/// in order, then an empty page is returned.
#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    next_revision: AtomicU64,
    push_script: Mutex<HashMap<RecordId, VecDeque<PushOutcome>>>,
    pull_script: Mutex<VecDeque<Result<PullResponse, TransportFailure>>>,
    pushed: Mutex<Vec<PushRequest>>,
    pulls: Mutex<Vec<PullRequest>>,
    on_push: Mutex<Option<PushHook>>,
}

impl MockTransport {
    /// Creates a new connected mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            next_revision: AtomicU64::new(1),
            ..Self::default()
        }
    }

    /// Queues the outcome of the next push of `id`.
    pub fn script_push(&self, id: impl Into<RecordId>, outcome: PushOutcome) {
        self.push_script
            .lock()
            .entry(id.into())
            .or_default()
            .push_back(outcome);
    }

    /// Queues the next pull response.
    pub fn script_pull(&self, response: PullResponse) {
        self.pull_script.lock().push_back(Ok(response));
    }

    /// Queues a failing pull.
    pub fn script_pull_failure(&self, failure: TransportFailure) {
        self.pull_script.lock().push_back(Err(failure));
    }

    /// Sets the connected state. A disconnected mock fails every request.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Runs `hook` at the start of every push, before the outcome is chosen.
    pub fn on_push(&self, hook: impl Fn(&PushRequest) + Send + Sync + 'static) {
        *self.on_push.lock() = Some(Box::new(hook));
    }

    /// Returns every push received so far, in arrival order.
    pub fn pushed(&self) -> Vec<PushRequest> {
        self.pushed.lock().clone()
    }

    /// Returns every pull request received so far.
    pub fn pulls(&self) -> Vec<PullRequest> {
        self.pulls.lock().clone()
    }
}

impl SyncTransport for MockTransport {
    fn push(&self, request: &PushRequest) -> PushOutcome {
        if let Some(hook) = self.on_push.lock().as_ref() {
            hook(request);
        }
        self.pushed.lock().push(request.clone());
        if !self.connected.load(Ordering::SeqCst) {
            return PushOutcome::Failure(TransportFailure::Disconnected);
        }
        let scripted = self
            .push_script
            .lock()
            .get_mut(&request.id)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| {
            let revision = self.next_revision.fetch_add(1, Ordering::SeqCst);
            PushOutcome::Accepted(Revision::from(revision))
        })
    }

    fn pull(&self, request: &PullRequest) -> Result<PullResponse, TransportFailure> {
        self.pulls.lock().push(request.clone());
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportFailure::Disconnected);
        }
        self.pull_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(PullResponse::new(Vec::new(), Cursor::new(""), false)))
    }
}
