//! Task-list manager: lifecycle owner and composition root.
//!
//! One manager instance exists per (domain, name, kind) key, created on
//! demand by the outer engine. `start` renews the ID-block lease, seeds the
//! watermarks from persisted state and spawns the writer, fetch, dispatch
//! and liveness loops. `stop` is idempotent and irreversible: a stopped
//! manager must be recreated, never restarted in place.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::ack::AckManager;
use crate::config::TaskListConfig;
use crate::domain::{
    AddTaskRequest, DescribeResponse, EngineError, PollRequest, SYNC_MATCH_TASK_ID, TaskId,
    TaskInfo, TaskListId, TaskListStatus,
};
use crate::liveness::Liveness;
use crate::matcher::TaskMatcher;
use crate::poller_history::PollerHistory;
use crate::ports::{DomainResolver, TaskStore};
use crate::reader::TaskReader;
use crate::writer::TaskWriter;

pub struct TaskListManager {
    id: TaskListId,
    config: Arc<TaskListConfig>,
    store: Arc<dyn TaskStore>,
    resolver: Arc<dyn DomainResolver>,
    ack: Arc<AckManager>,
    matcher: Arc<TaskMatcher>,
    pollers: Arc<PollerHistory>,
    reader: Arc<TaskReader>,
    writer: Arc<TaskWriter>,
    liveness: Mutex<Option<Liveness>>,
    stopped: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    fatal_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl TaskListManager {
    pub fn new(
        id: TaskListId,
        config: TaskListConfig,
        store: Arc<dyn TaskStore>,
        resolver: Arc<dyn DomainResolver>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (fatal_tx, fatal_rx) = mpsc::channel(1);
        let max_read_level = Arc::new(AtomicI64::new(0));

        let ack = Arc::new(AckManager::new());
        let matcher = Arc::new(TaskMatcher::new(config.dispatch_rps));
        let pollers = Arc::new(PollerHistory::new(config.poller_ttl, config.dispatch_rps));
        let writer = Arc::new(TaskWriter::new(
            id.clone(),
            Arc::clone(&config),
            Arc::clone(&store),
            Arc::clone(&max_read_level),
            fatal_tx,
        ));
        let reader = Arc::new(TaskReader::new(
            id.clone(),
            Arc::clone(&config),
            Arc::clone(&store),
            Arc::clone(&matcher),
            Arc::clone(&ack),
            max_read_level,
            shutdown_rx,
        ));

        Arc::new(Self {
            id,
            config,
            store,
            resolver,
            ack,
            matcher,
            pollers,
            reader,
            writer,
            liveness: Mutex::new(None),
            stopped: AtomicBool::new(false),
            shutdown_tx,
            fatal_rx: Mutex::new(Some(fatal_rx)),
        })
    }

    /// Renew the lease, seed watermarks and spawn the background loops.
    pub async fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        let lease = self.renew_lease_with_retry().await?;
        self.ack.set_ack_level(lease.ack_level);
        self.writer.initialize(&lease);
        info!(
            tasklist = %self.id,
            range_id = %lease.range_id,
            ack_level = %lease.ack_level,
            "starting task list manager",
        );

        let writer = Arc::clone(&self.writer);
        tokio::spawn(async move { writer.run().await });
        let reader = Arc::clone(&self.reader);
        tokio::spawn(async move { reader.get_tasks_pump().await });
        let reader = Arc::clone(&self.reader);
        tokio::spawn(async move { reader.dispatch_buffered_tasks().await });

        // Fencing escalation: the writer observed a stale lease.
        if let Some(mut fatal_rx) = self.fatal_rx.lock().expect("fatal rx poisoned").take() {
            let weak = Arc::downgrade(self);
            tokio::spawn(async move {
                if fatal_rx.recv().await.is_some()
                    && let Some(manager) = weak.upgrade()
                {
                    warn!(tasklist = %manager.id, "lease fenced, stopping manager");
                    manager.stop();
                }
            });
        }

        let reader = Arc::clone(&self.reader);
        let pollers = Arc::clone(&self.pollers);
        let weak = Arc::downgrade(self);
        let liveness = Liveness::spawn(
            self.config.idle_check_interval,
            move || {
                !reader.is_task_added_recently(reader.last_add_time())
                    && !pollers.has_pollers()
                    && reader.buffer_is_empty()
            },
            move || {
                if let Some(manager) = weak.upgrade() {
                    info!(tasklist = %manager.id, "idle task list, self-terminating");
                    manager.stop();
                }
            },
        );
        *self.liveness.lock().expect("liveness slot poisoned") = Some(liveness);
        Ok(())
    }

    /// Idempotent. Signals every background loop; none requires a blocked
    /// caller to complete first.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(tasklist = %self.id, "stopping task list manager");
        if let Some(liveness) = self.liveness.lock().expect("liveness slot poisoned").take() {
            // The loop exits on the signal; nothing to await in a sync stop.
            let _ = liveness.stop();
        }
        self.writer.stop();
        self.reader.cancel_dispatch();
        let _ = self.shutdown_tx.send(true);
    }

    /// Liveness probe for the outer engine's eviction bookkeeping.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn id(&self) -> &TaskListId {
        &self.id
    }

    /// Add a task. Returns `true` when the task was handed directly to a
    /// waiting poller (sync match) and nothing was persisted.
    ///
    /// Ordering contract: the sync match is attempted before the writer's
    /// shutdown state is consulted, so a hand-off can still succeed on a
    /// manager whose persistence path is already closed.
    pub async fn add_task(&self, req: AddTaskRequest) -> Result<bool, EngineError> {
        if self.is_stopped() {
            return Err(EngineError::Shutdown);
        }

        let activity = self.resolver.resolve(req.params.domain).await?;
        if activity.is_active {
            let candidate = TaskInfo::from_params(SYNC_MATCH_TASK_ID, req.params.clone());
            if self.matcher.sync_match(candidate).is_ok() {
                return Ok(true);
            }
        } else if req.forwarded_from.is_none() {
            // Standby domain: the caller must redirect to the active cluster.
            return Err(EngineError::StandbyDomain {
                domain: req.params.domain,
                active_cluster: activity.active_cluster,
            });
        }

        if req.forwarded_from.is_some() {
            // Forwarded tasks stay owned by their source partition.
            return Err(EngineError::RemoteSyncMatchFailed);
        }

        self.writer.append(req.params).await?;
        self.reader.task_added();
        Ok(false)
    }

    /// Long-poll for the next task. The poller is recorded in history even
    /// when the call times out.
    pub async fn get_task(
        &self,
        timeout: Duration,
        req: PollRequest,
    ) -> Result<TaskInfo, EngineError> {
        if let Some(identity) = &req.identity {
            self.pollers.update_poller_info(identity, req.rate_per_second);
        }
        if let Some(rate) = req.rate_per_second {
            self.matcher.update_ratelimit(rate);
        }
        if self.is_stopped() {
            return Err(EngineError::NoTasks);
        }
        let mut shutdown = self.shutdown_tx.subscribe();
        self.matcher.poll(timeout, &mut shutdown).await
    }

    /// Mark a delivered task finished: delete it from the store and advance
    /// the ack watermark.
    pub async fn complete_task(&self, task_id: TaskId) -> Result<(), EngineError> {
        self.store.complete_task(&self.id, task_id).await?;
        self.ack.ack_item(task_id);
        Ok(())
    }

    /// In-memory snapshot; never touches the store.
    pub fn describe_task_list(&self, include_status: bool) -> DescribeResponse {
        let status = include_status.then(|| TaskListStatus {
            ack_level: self.ack.ack_level(),
            read_level: self.ack.read_level(),
            backlog_count_hint: self.ack.backlog_count(),
            rate_per_second: self.matcher.rate(),
            task_id_block: self.writer.id_block(),
        });
        DescribeResponse {
            pollers: self.pollers.get_all_poller_info(),
            status,
        }
    }

    async fn renew_lease_with_retry(&self) -> Result<crate::ports::TaskListLease, EngineError> {
        let mut attempts = 0;
        loop {
            match self.store.renew_lease(&self.id).await {
                Ok(lease) => return Ok(lease),
                Err(err) if err.is_fencing() => return Err(EngineError::LeaseFenced),
                Err(err) => {
                    attempts += 1;
                    if attempts >= self.config.retry.max_attempts {
                        return Err(err.into());
                    }
                    warn!(tasklist = %self.id, %err, attempts, "lease renewal failed, backing off");
                    tokio::time::sleep(self.config.retry.next_delay(attempts)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_TASK_DISPATCH_RPS;
    use crate::domain::{DomainId, TaskListKind, TaskParams, WorkflowExecution};
    use crate::impls::{InMemoryTaskStore, StaticDomainResolver};

    const LOCAL_CLUSTER: &str = "cluster-a";
    const REMOTE_CLUSTER: &str = "cluster-b";

    fn quiet_config() -> TaskListConfig {
        // Long idle windows so nothing self-terminates mid-test.
        TaskListConfig {
            idle_check_interval: Duration::from_secs(3600),
            max_idle_time: Duration::from_secs(3600),
            ..TaskListConfig::default()
        }
    }

    struct Harness {
        manager: Arc<TaskListManager>,
        store: Arc<InMemoryTaskStore>,
        tasklist: TaskListId,
    }

    async fn started(config: TaskListConfig, resolver: StaticDomainResolver) -> Harness {
        let tasklist = TaskListId::new(DomainId::generate(), "tl", TaskListKind::Activity);
        let store = Arc::new(InMemoryTaskStore::new(config.range_size));
        let manager = TaskListManager::new(
            tasklist.clone(),
            config,
            Arc::clone(&store) as Arc<dyn TaskStore>,
            Arc::new(resolver),
        );
        manager.start().await.unwrap();
        Harness {
            manager,
            store,
            tasklist,
        }
    }

    fn add_request() -> AddTaskRequest {
        AddTaskRequest::new(TaskParams::new(
            DomainId::generate(),
            WorkflowExecution::new("some random workflow", "some random run"),
            2,
        ))
    }

    fn poll(identity: &str) -> PollRequest {
        PollRequest {
            identity: Some(identity.to_string()),
            rate_per_second: None,
        }
    }

    #[tokio::test]
    async fn describe_task_list_reports_watermarks_and_pollers() {
        let h = started(quiet_config(), StaticDomainResolver::active(LOCAL_CLUSTER)).await;
        let task_count = 3i64;
        for i in 1..=task_count {
            h.manager.ack.read_item(TaskId::new(i));
        }

        let resp = h.manager.describe_task_list(false);
        assert!(resp.pollers.is_empty());
        assert!(resp.status.is_none());

        let status = h.manager.describe_task_list(true).status.unwrap();
        assert_eq!(status.ack_level, TaskId::new(0));
        assert_eq!(status.read_level, TaskId::new(task_count));
        assert_eq!(status.backlog_count_hint, task_count);
        assert!(status.rate_per_second > DEFAULT_TASK_DISPATCH_RPS - 1.0);
        assert!(status.rate_per_second < DEFAULT_TASK_DISPATCH_RPS + 1.0);
        assert_eq!(status.task_id_block.start, TaskId::new(1));
        assert_eq!(
            status.task_id_block.end,
            TaskId::new(h.manager.config.range_size)
        );

        // One poller shows up and everything gets acked.
        h.manager.pollers.update_poller_info("test-poll", None);
        for i in 1..=task_count {
            h.manager.ack.ack_item(TaskId::new(i));
        }

        let resp = h.manager.describe_task_list(true);
        assert_eq!(resp.pollers.len(), 1);
        assert_eq!(resp.pollers[0].identity, "test-poll");
        assert!(resp.pollers[0].rate_per_second > DEFAULT_TASK_DISPATCH_RPS - 1.0);

        // Explicit rate override takes precedence over the estimate.
        h.manager.pollers.update_poller_info("test-poll", Some(5.0));
        let resp = h.manager.describe_task_list(true);
        assert!(resp.pollers[0].rate_per_second > 4.0 && resp.pollers[0].rate_per_second < 6.0);

        let status = resp.status.unwrap();
        assert_eq!(status.ack_level, TaskId::new(task_count));
        assert_eq!(status.backlog_count_hint, 0);
    }

    #[tokio::test]
    async fn idle_task_list_self_terminates() {
        let config = TaskListConfig {
            idle_check_interval: Duration::from_millis(10),
            max_idle_time: Duration::from_millis(10),
            ..TaskListConfig::default()
        };
        let h = started(config, StaticDomainResolver::active(LOCAL_CLUSTER)).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.manager.is_stopped());
    }

    #[tokio::test]
    async fn recent_poller_defers_idle_shutdown() {
        let config = TaskListConfig {
            idle_check_interval: Duration::from_millis(10),
            max_idle_time: Duration::from_millis(10),
            ..TaskListConfig::default()
        };
        let h = started(config, StaticDomainResolver::active(LOCAL_CLUSTER)).await;

        let _ = h
            .manager
            .get_task(Duration::from_millis(1), poll("idle-poller"))
            .await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!h.manager.is_stopped());

        h.manager.stop();
        assert!(h.manager.is_stopped());
    }

    #[tokio::test]
    async fn recent_add_defers_idle_shutdown() {
        let config = TaskListConfig {
            idle_check_interval: Duration::from_millis(10),
            max_idle_time: Duration::from_millis(500),
            ..TaskListConfig::default()
        };
        let h = started(config, StaticDomainResolver::active(LOCAL_CLUSTER)).await;

        let sync_matched = h.manager.add_task(add_request()).await.unwrap();
        assert!(!sync_matched);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!h.manager.is_stopped());

        h.manager.stop();
        assert!(h.manager.is_stopped());
    }

    #[tokio::test]
    async fn standby_domain_add_is_rejected_without_persistence() {
        let h = started(quiet_config(), StaticDomainResolver::standby(REMOTE_CLUSTER)).await;
        h.manager.writer.stop(); // prove no write is even attempted

        let err = h.manager.add_task(add_request()).await.unwrap_err();
        match err {
            EngineError::StandbyDomain { active_cluster, .. } => {
                assert_eq!(active_cluster, REMOTE_CLUSTER);
            }
            other => panic!("expected StandbyDomain, got {other:?}"),
        }
        assert_eq!(h.store.task_count(&h.tasklist).await, 0);

        // Forwarded tasks are attempted but must not be persisted locally.
        let err = h
            .manager
            .add_task(add_request().forwarded_from("from child partition"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RemoteSyncMatchFailed));
        assert_eq!(h.store.task_count(&h.tasklist).await, 0);
    }

    #[tokio::test]
    async fn stopped_writer_fails_add_unless_sync_matched() {
        let h = started(quiet_config(), StaticDomainResolver::active(LOCAL_CLUSTER)).await;
        h.manager.writer.stop();

        // No poller waiting: the persistence path is closed.
        let err = h.manager.add_task(add_request()).await.unwrap_err();
        assert!(matches!(err, EngineError::Shutdown));
        assert_eq!(h.store.task_count(&h.tasklist).await, 0);

        // A waiting poller is reached before the writer check.
        let manager = Arc::clone(&h.manager);
        let poller = tokio::spawn(async move {
            manager
                .get_task(Duration::from_secs(2), poll("sync-poller"))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sync_matched = h.manager.add_task(add_request()).await.unwrap();
        assert!(sync_matched);
        let task = poller.await.unwrap().unwrap();
        assert_eq!(task.task_id, SYNC_MATCH_TASK_ID);
        assert_eq!(h.store.task_count(&h.tasklist).await, 0);
    }

    #[tokio::test]
    async fn persisted_task_reaches_poller_and_completes() {
        let h = started(quiet_config(), StaticDomainResolver::active(LOCAL_CLUSTER)).await;

        let sync_matched = h.manager.add_task(add_request()).await.unwrap();
        assert!(!sync_matched, "no poller was waiting");
        assert_eq!(h.store.task_count(&h.tasklist).await, 1);

        let task = h
            .manager
            .get_task(Duration::from_secs(2), poll("worker-1"))
            .await
            .unwrap();
        assert_eq!(task.task_id, TaskId::new(1));

        h.manager.complete_task(task.task_id).await.unwrap();
        assert_eq!(h.store.task_count(&h.tasklist).await, 0);

        let status = h.manager.describe_task_list(true).status.unwrap();
        assert_eq!(status.ack_level, TaskId::new(1));
        assert_eq!(status.backlog_count_hint, 0);
    }

    #[tokio::test]
    async fn restart_resumes_from_persisted_ack_level() {
        let tasklist = TaskListId::new(DomainId::generate(), "tl", TaskListKind::Decision);
        let config = quiet_config();
        let store = Arc::new(InMemoryTaskStore::new(config.range_size));
        store.set_ack_level(&tasklist, TaskId::new(42)).await;

        let manager = TaskListManager::new(
            tasklist,
            config,
            Arc::clone(&store) as Arc<dyn TaskStore>,
            Arc::new(StaticDomainResolver::active(LOCAL_CLUSTER)),
        );
        manager.start().await.unwrap();

        let status = manager.describe_task_list(true).status.unwrap();
        assert_eq!(status.ack_level, TaskId::new(42));
        assert_eq!(status.read_level, TaskId::new(42));
        manager.stop();
    }

    #[tokio::test]
    async fn lease_fencing_stops_the_manager() {
        let h = started(quiet_config(), StaticDomainResolver::active(LOCAL_CLUSTER)).await;

        // Another instance takes over the range.
        h.store.renew_lease(&h.tasklist).await.unwrap();

        let err = h.manager.add_task(add_request()).await.unwrap_err();
        assert!(matches!(err, EngineError::LeaseFenced));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.manager.is_stopped());
    }

    #[tokio::test]
    async fn operations_on_stopped_manager() {
        let h = started(quiet_config(), StaticDomainResolver::active(LOCAL_CLUSTER)).await;
        h.manager.stop();
        h.manager.stop(); // idempotent

        let err = h.manager.add_task(add_request()).await.unwrap_err();
        assert!(matches!(err, EngineError::Shutdown));

        let err = h
            .manager
            .get_task(Duration::from_secs(5), poll("late-poller"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoTasks));
    }

    #[tokio::test]
    async fn stop_unblocks_waiting_pollers() {
        let h = started(quiet_config(), StaticDomainResolver::active(LOCAL_CLUSTER)).await;

        let manager = Arc::clone(&h.manager);
        let poller = tokio::spawn(async move {
            manager
                .get_task(Duration::from_secs(30), poll("blocked-poller"))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        h.manager.stop();
        let err = tokio::time::timeout(Duration::from_secs(1), poller)
            .await
            .expect("poll did not unblock on stop")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, EngineError::NoTasks));
    }
}
