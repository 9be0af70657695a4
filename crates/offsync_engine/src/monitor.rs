//! Connectivity-driven automatic sync.
//!
//! [`NetworkMonitor`] publishes connectivity on a watch channel. [`AutoSync`]
//! subscribes and runs a pass on every transition to online, reporting each
//! outcome as a [`PassEvent`].

use crate::session::{PassReport, SyncSession};
use crate::transport::SyncTransport;
use offsync_storage::RecordStore;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Network reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// The server may be reachable.
    Online,
    /// No network.
    Offline,
}

/// Publishes connectivity changes.
///
/// The platform layer calls [`NetworkMonitor::set`]; repeated reports of the
/// same state do not wake subscribers.
#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<Connectivity>,
}

impl NetworkMonitor {
    /// Creates a monitor in the given state.
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Reports the current connectivity.
    pub fn set(&self, connectivity: Connectivity) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == connectivity {
                false
            } else {
                *current = connectivity;
                true
            }
        });
        if changed {
            debug!(?connectivity, "connectivity changed");
        }
    }

    /// Returns the last reported connectivity.
    pub fn current(&self) -> Connectivity {
        *self.tx.borrow()
    }

    /// Subscribes to connectivity changes.
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

/// Outcome of an automatically triggered pass.
#[derive(Debug)]
pub enum PassEvent {
    /// The pass ran to completion.
    Completed(PassReport),
    /// The pass failed or panicked.
    Failed(String),
}

/// Background task running a pass whenever connectivity comes back.
///
/// The task ends when the monitor is dropped or [`AutoSync::stop`] is called.
pub struct AutoSync {
    handle: JoinHandle<()>,
    events: mpsc::UnboundedReceiver<PassEvent>,
}

impl AutoSync {
    /// Spawns the task on the current tokio runtime.
    ///
    /// If the monitor is online already, a first pass starts immediately.
    pub fn spawn<S, T>(session: Arc<SyncSession<S, T>>, monitor: &NetworkMonitor) -> Self
    where
        S: RecordStore + 'static,
        T: SyncTransport + 'static,
    {
        let mut rx = monitor.subscribe();
        let (tx, events) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            let mut online = *rx.borrow_and_update() == Connectivity::Online;
            if online {
                run_pass(&session, &tx).await;
            }
            while rx.changed().await.is_ok() {
                let now_online = *rx.borrow_and_update() == Connectivity::Online;
                let came_online = now_online && !online;
                online = now_online;
                if came_online && !run_pass(&session, &tx).await {
                    break;
                }
            }
            debug!("auto sync stopped");
        });

        Self { handle, events }
    }

    /// Waits for the next pass outcome. Returns `None` once the task ended
    /// and every event was received.
    pub async fn next_event(&mut self) -> Option<PassEvent> {
        self.events.recv().await
    }

    /// Stops the task. A pass already running finishes in the background.
    pub fn stop(self) {
        self.handle.abort();
    }
}

/// Runs one serialized pass on the blocking pool. Returns false once nobody
/// listens for events.
async fn run_pass<S, T>(session: &Arc<SyncSession<S, T>>, tx: &mpsc::UnboundedSender<PassEvent>) -> bool
where
    S: RecordStore + 'static,
    T: SyncTransport + 'static,
{
    let session = Arc::clone(session);
    let event = match tokio::task::spawn_blocking(move || session.sync_serialized()).await {
        Ok(Ok(report)) => PassEvent::Completed(report),
        Ok(Err(e)) => PassEvent::Failed(e.to_string()),
        Err(join) => {
            warn!(error = %join, "sync pass task failed");
            PassEvent::Failed(format!("sync pass task failed: {join}"))
        }
    };
    tx.send(event).is_ok()
}
