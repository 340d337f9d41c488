//! TaskStore port - the durable, high-latency backing store.
//!
//! The store is the source of truth for persisted tasks and for lease
//! ownership. Lease-guarded writes must surface `StoreError::ConditionFailed`
//! when the caller's range ID is stale; the manager treats that as fencing
//! and stops.

use async_trait::async_trait;

use crate::domain::{RangeId, StoreError, TaskId, TaskIdBlock, TaskInfo, TaskListId};

/// Result of a lease renewal: the new fencing token, the ID block it grants
/// and the ack level persisted by the previous owner (restart-resume seed).
#[derive(Debug, Clone, Copy)]
pub struct TaskListLease {
    pub range_id: RangeId,
    pub block: TaskIdBlock,
    pub ack_level: TaskId,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Take (or extend) the exclusive lease over the next ID block.
    /// Each call advances the range ID, fencing out previous holders.
    async fn renew_lease(&self, id: &TaskListId) -> Result<TaskListLease, StoreError>;

    /// Persist tasks under the given lease. Fails with `ConditionFailed`
    /// when `range_id` is no longer current.
    async fn create_tasks(
        &self,
        id: &TaskListId,
        range_id: RangeId,
        tasks: &[TaskInfo],
    ) -> Result<(), StoreError>;

    /// Read tasks with IDs in `(from, to]`, ascending, at most `batch_size`.
    async fn get_tasks(
        &self,
        id: &TaskListId,
        from: TaskId,
        to: TaskId,
        batch_size: usize,
    ) -> Result<Vec<TaskInfo>, StoreError>;

    /// Delete a task once a poller has finished it.
    async fn complete_task(&self, id: &TaskListId, task_id: TaskId) -> Result<(), StoreError>;
}
