//! Configuration for sync sessions.

use crate::error::{SyncError, SyncResult};
use offsync_protocol::ConflictPolicy;
use std::time::Duration;

/// Configuration for a sync session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Collection this session reconciles (used in logs).
    pub collection: String,
    /// Conflict policy applied by every pass.
    pub policy: ConflictPolicy,
    /// Number of concurrent push workers.
    ///
    /// With one worker, pushes follow store order exactly; more workers
    /// start pushes in store order but may complete them out of order.
    pub push_workers: usize,
    /// Maximum number of changes per pull request.
    pub pull_batch_size: u32,
    /// Timeout for a single push or pull request, handed to transports.
    pub push_timeout: Duration,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            policy: ConflictPolicy::Manual,
            push_workers: 1,
            pull_batch_size: 100,
            push_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the conflict policy.
    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the number of push workers.
    pub fn with_push_workers(mut self, workers: usize) -> Self {
        self.push_workers = workers;
        self
    }

    /// Sets the pull batch size.
    pub fn with_pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size;
        self
    }

    /// Sets the push timeout.
    pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }

    /// Checks that the configuration can drive a pass.
    pub fn validate(&self) -> SyncResult<()> {
        if self.push_workers == 0 {
            return Err(SyncError::Config("push_workers must be at least 1".into()));
        }
        if self.pull_batch_size == 0 {
            return Err(SyncError::Config("pull_batch_size must be at least 1".into()));
        }
        if self.push_timeout.is_zero() {
            return Err(SyncError::Config("push_timeout must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("notes")
            .with_policy(ConflictPolicy::ServerWins)
            .with_push_workers(4)
            .with_pull_batch_size(25)
            .with_push_timeout(Duration::from_secs(5));

        assert_eq!(config.collection, "notes");
        assert_eq!(config.policy, ConflictPolicy::ServerWins);
        assert_eq!(config.push_workers, 4);
        assert_eq!(config.pull_batch_size, 25);
        assert_eq!(config.push_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn defaults_are_manual_and_ordered() {
        let config = SyncConfig::default();
        assert_eq!(config.policy, ConflictPolicy::Manual);
        assert_eq!(config.push_workers, 1);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        assert!(matches!(
            SyncConfig::default().with_push_workers(0).validate(),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            SyncConfig::default().with_pull_batch_size(0).validate(),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            SyncConfig::default()
                .with_push_timeout(Duration::ZERO)
                .validate(),
            Err(SyncError::Config(_))
        ));
    }
}
