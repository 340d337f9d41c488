//! In-memory port implementations, for development and tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    DomainId, RangeId, ResolverError, StoreError, TaskId, TaskIdBlock, TaskInfo, TaskListId,
};
use crate::ports::{DomainActivity, DomainResolver, TaskListLease, TaskStore};

#[derive(Debug, Default)]
struct ListState {
    range_id: i64,
    ack_level: i64,
    tasks: BTreeMap<i64, TaskInfo>,
}

/// In-memory task store. Lease semantics mirror the durable store: every
/// renewal bumps the range ID, and writes under an older range ID fail
/// with `ConditionFailed`.
pub struct InMemoryTaskStore {
    range_size: i64,
    state: Mutex<HashMap<TaskListId, ListState>>,
}

impl InMemoryTaskStore {
    pub fn new(range_size: i64) -> Self {
        Self {
            range_size,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub async fn task_count(&self, id: &TaskListId) -> usize {
        let state = self.state.lock().await;
        state.get(id).map_or(0, |list| list.tasks.len())
    }

    /// Seed the persisted ack level, as a previous owner would have left it.
    pub async fn set_ack_level(&self, id: &TaskListId, ack_level: TaskId) {
        let mut state = self.state.lock().await;
        state.entry(id.clone()).or_default().ack_level = ack_level.value();
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn renew_lease(&self, id: &TaskListId) -> Result<TaskListLease, StoreError> {
        let mut state = self.state.lock().await;
        let list = state.entry(id.clone()).or_default();
        list.range_id += 1;
        let start = (list.range_id - 1) * self.range_size + 1;
        let end = list.range_id * self.range_size;
        Ok(TaskListLease {
            range_id: RangeId::new(list.range_id),
            block: TaskIdBlock::new(TaskId::new(start), TaskId::new(end)),
            ack_level: TaskId::new(list.ack_level),
        })
    }

    async fn create_tasks(
        &self,
        id: &TaskListId,
        range_id: RangeId,
        tasks: &[TaskInfo],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let list = state.entry(id.clone()).or_default();
        if range_id.value() != list.range_id {
            return Err(StoreError::ConditionFailed {
                held: range_id,
                current: RangeId::new(list.range_id),
            });
        }
        for task in tasks {
            list.tasks.insert(task.task_id.value(), task.clone());
        }
        Ok(())
    }

    async fn get_tasks(
        &self,
        id: &TaskListId,
        from: TaskId,
        to: TaskId,
        batch_size: usize,
    ) -> Result<Vec<TaskInfo>, StoreError> {
        let state = self.state.lock().await;
        let Some(list) = state.get(id) else {
            return Ok(Vec::new());
        };
        Ok(list
            .tasks
            .range(from.value() + 1..=to.value())
            .take(batch_size)
            .map(|(_, task)| task.clone())
            .collect())
    }

    async fn complete_task(&self, id: &TaskListId, task_id: TaskId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(list) = state.get_mut(id) {
            list.tasks.remove(&task_id.value());
        }
        Ok(())
    }
}

/// Resolver returning one fixed replication state for every domain.
pub struct StaticDomainResolver {
    activity: DomainActivity,
}

impl StaticDomainResolver {
    /// Every domain is active in the local cluster.
    pub fn active(cluster: impl Into<String>) -> Self {
        Self {
            activity: DomainActivity {
                is_active: true,
                active_cluster: cluster.into(),
            },
        }
    }

    /// Every domain is standby; writes belong to `active_cluster`.
    pub fn standby(active_cluster: impl Into<String>) -> Self {
        Self {
            activity: DomainActivity {
                is_active: false,
                active_cluster: active_cluster.into(),
            },
        }
    }
}

#[async_trait]
impl DomainResolver for StaticDomainResolver {
    async fn resolve(&self, _domain: DomainId) -> Result<DomainActivity, ResolverError> {
        Ok(self.activity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskListKind, TaskParams, WorkflowExecution};

    fn tasklist() -> TaskListId {
        TaskListId::new(DomainId::generate(), "mem", TaskListKind::Activity)
    }

    fn task(id: i64) -> TaskInfo {
        TaskInfo::from_params(
            TaskId::new(id),
            TaskParams::new(DomainId::generate(), WorkflowExecution::new("wf", "run"), 1),
        )
    }

    #[tokio::test]
    async fn lease_blocks_are_contiguous() {
        let store = InMemoryTaskStore::new(10);
        let id = tasklist();

        let first = store.renew_lease(&id).await.unwrap();
        assert_eq!(first.range_id, RangeId::new(1));
        assert_eq!(first.block, TaskIdBlock::new(TaskId::new(1), TaskId::new(10)));

        let second = store.renew_lease(&id).await.unwrap();
        assert_eq!(second.range_id, RangeId::new(2));
        assert_eq!(
            second.block,
            TaskIdBlock::new(TaskId::new(11), TaskId::new(20))
        );
    }

    #[tokio::test]
    async fn stale_range_id_is_condition_failed() {
        let store = InMemoryTaskStore::new(10);
        let id = tasklist();
        let lease = store.renew_lease(&id).await.unwrap();
        store.renew_lease(&id).await.unwrap(); // another owner

        let err = store
            .create_tasks(&id, lease.range_id, &[task(1)])
            .await
            .unwrap_err();
        assert!(err.is_fencing());
        assert_eq!(store.task_count(&id).await, 0);
    }

    #[tokio::test]
    async fn get_tasks_scans_exclusive_from_inclusive_to() {
        let store = InMemoryTaskStore::new(100);
        let id = tasklist();
        let lease = store.renew_lease(&id).await.unwrap();
        store
            .create_tasks(&id, lease.range_id, &[task(1), task(2), task(3)])
            .await
            .unwrap();

        let batch = store
            .get_tasks(&id, TaskId::new(1), TaskId::new(3), 100)
            .await
            .unwrap();
        let ids: Vec<i64> = batch.iter().map(|t| t.task_id.value()).collect();
        assert_eq!(ids, vec![2, 3]);

        let capped = store
            .get_tasks(&id, TaskId::new(0), TaskId::new(3), 2)
            .await
            .unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn complete_task_deletes() {
        let store = InMemoryTaskStore::new(100);
        let id = tasklist();
        let lease = store.renew_lease(&id).await.unwrap();
        store
            .create_tasks(&id, lease.range_id, &[task(1)])
            .await
            .unwrap();

        store.complete_task(&id, TaskId::new(1)).await.unwrap();
        assert_eq!(store.task_count(&id).await, 0);
    }
}
