//! Error taxonomy.
//!
//! `EngineError` is what callers of the manager see; the outer engine maps
//! these to protocol responses. `StoreError` is the task-store port's own
//! taxonomy; `ConditionFailed` is the fencing signal and is always fatal to
//! the observing manager instance.

use thiserror::Error;

use super::ids::{DomainId, RangeId};

/// Errors surfaced by the durable task store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The caller's lease token is stale: another instance owns the range.
    #[error("lease condition failed: held {held}, store has {current}")]
    ConditionFailed { held: RangeId, current: RangeId },

    /// Transient infrastructure failure; retried with backoff by the loops.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Fencing errors must never be retried on this instance.
    pub fn is_fencing(&self) -> bool {
        matches!(self, StoreError::ConditionFailed { .. })
    }
}

/// Errors surfaced by the domain/cluster resolver.
#[derive(Debug, Error)]
#[error("domain resolution failed: {0}")]
pub struct ResolverError(pub String);

/// Caller-facing errors of the task-list manager.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The manager or its writer no longer accepts work. Not retriable on
    /// this instance; the outer engine must recreate the manager.
    #[error("task list manager is shut down")]
    Shutdown,

    /// The task's domain is not active in this cluster; the caller must
    /// redirect the write to the active cluster.
    #[error("domain {domain} is standby here, active in cluster {active_cluster}")]
    StandbyDomain {
        domain: DomainId,
        active_cluster: String,
    },

    /// A forwarded task found no waiting poller. Forwarded tasks stay owned
    /// by their source partition, so nothing is persisted here.
    #[error("forwarded task was not sync-matched and cannot be persisted locally")]
    RemoteSyncMatchFailed,

    /// Poll finished with nothing to deliver. Expected, not a fault.
    #[error("no tasks available")]
    NoTasks,

    /// The ID-block lease was taken by another instance.
    #[error("task list lease lost to another writer")]
    LeaseFenced,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Resolver(#[from] ResolverError),
}
