//! Persistence path: a single writer loop owning the ID-block lease.
//!
//! Producers that miss a sync match enqueue an append request; the writer
//! loop assigns the next task ID from the leased block, renews the lease
//! when a block is exhausted and persists through the store. A stale-lease
//! observation (`StoreError::ConditionFailed`) poisons the whole manager:
//! the writer reports the fencing upward and stops instead of retrying.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::TaskListConfig;
use crate::domain::{EngineError, RangeId, TaskId, TaskIdBlock, TaskInfo, TaskListId, TaskParams};
use crate::ports::{TaskListLease, TaskStore};

struct AppendRequest {
    params: TaskParams,
    resp: oneshot::Sender<Result<TaskId, EngineError>>,
}

pub struct TaskWriter {
    tasklist: TaskListId,
    config: Arc<TaskListConfig>,
    store: Arc<dyn TaskStore>,
    append_tx: mpsc::Sender<AppendRequest>,
    append_rx: Mutex<Option<mpsc::Receiver<AppendRequest>>>,
    stopped: AtomicBool,
    stop_tx: watch::Sender<bool>,
    range_id: AtomicI64,
    next_task_id: AtomicI64,
    block: Mutex<TaskIdBlock>,
    /// Highest allocated task ID; the reader never scans past it.
    max_read_level: Arc<AtomicI64>,
    /// Fencing escalation to the manager.
    fatal_tx: mpsc::Sender<()>,
}

impl TaskWriter {
    pub fn new(
        tasklist: TaskListId,
        config: Arc<TaskListConfig>,
        store: Arc<dyn TaskStore>,
        max_read_level: Arc<AtomicI64>,
        fatal_tx: mpsc::Sender<()>,
    ) -> Self {
        let (append_tx, append_rx) = mpsc::channel(config.task_buffer_size.max(1));
        let (stop_tx, _) = watch::channel(false);
        Self {
            tasklist,
            config,
            store,
            append_tx,
            append_rx: Mutex::new(Some(append_rx)),
            stopped: AtomicBool::new(false),
            stop_tx,
            range_id: AtomicI64::new(0),
            next_task_id: AtomicI64::new(1),
            block: Mutex::new(TaskIdBlock::new(TaskId::new(1), TaskId::new(0))),
            max_read_level,
            fatal_tx,
        }
    }

    /// Seed lease state before the loop starts.
    pub fn initialize(&self, lease: &TaskListLease) {
        self.range_id.store(lease.range_id.value(), Ordering::Release);
        self.next_task_id
            .store(lease.block.start.value(), Ordering::Release);
        *self.block.lock().expect("writer block poisoned") = lease.block;
        self.max_read_level
            .store(lease.block.start.value() - 1, Ordering::Release);
    }

    /// Submit a task for persistence and wait for its assigned ID.
    /// Backpressure: suspends while the writer's queue is full.
    pub async fn append(&self, params: TaskParams) -> Result<TaskId, EngineError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(EngineError::Shutdown);
        }
        let (resp, rx) = oneshot::channel();
        self.append_tx
            .send(AppendRequest { params, resp })
            .await
            .map_err(|_| EngineError::Shutdown)?;
        rx.await.map_err(|_| EngineError::Shutdown)?
    }

    /// Stop accepting appends and let the loop drain. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(tasklist = %self.tasklist, "stopping task writer");
        let _ = self.stop_tx.send(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Current leased ID block (for describe).
    pub fn id_block(&self) -> TaskIdBlock {
        *self.block.lock().expect("writer block poisoned")
    }

    /// Writer loop. Exits on stop or fencing; pending requests are drained
    /// with `Shutdown` so no caller is left hanging.
    pub async fn run(&self) {
        let Some(mut rx) = self.append_rx.lock().expect("writer rx poisoned").take() else {
            warn!(tasklist = %self.tasklist, "task writer loop started twice");
            return;
        };
        let mut stop_rx = self.stop_tx.subscribe();

        loop {
            let req = tokio::select! {
                req = rx.recv() => match req {
                    Some(req) => req,
                    None => break,
                },
                _ = stop_rx.changed() => break,
            };

            let result = self.persist(req.params).await;
            let fenced = matches!(result, Err(EngineError::LeaseFenced));
            let _ = req.resp.send(result);
            if fenced {
                let _ = self.fatal_tx.try_send(());
                self.stopped.store(true, Ordering::Release);
                break;
            }
        }

        rx.close();
        while let Ok(req) = rx.try_recv() {
            let _ = req.resp.send(Err(EngineError::Shutdown));
        }
        debug!(tasklist = %self.tasklist, "task writer drained");
    }

    async fn persist(&self, params: TaskParams) -> Result<TaskId, EngineError> {
        let id = self.allocate_task_id().await?;
        let task = TaskInfo::from_params(id, params);
        let range_id = RangeId::new(self.range_id.load(Ordering::Acquire));

        let mut attempts = 0;
        loop {
            match self
                .store
                .create_tasks(&self.tasklist, range_id, std::slice::from_ref(&task))
                .await
            {
                Ok(()) => {
                    self.max_read_level.store(id.value(), Ordering::Release);
                    return Ok(id);
                }
                Err(err) if err.is_fencing() => {
                    warn!(tasklist = %self.tasklist, %err, "lease fenced during create");
                    return Err(EngineError::LeaseFenced);
                }
                Err(err) => {
                    attempts += 1;
                    if attempts >= self.config.retry.max_attempts {
                        return Err(err.into());
                    }
                    warn!(tasklist = %self.tasklist, %err, attempts, "create failed, backing off");
                    tokio::time::sleep(self.config.retry.next_delay(attempts)).await;
                }
            }
        }
    }

    async fn allocate_task_id(&self) -> Result<TaskId, EngineError> {
        let next = self.next_task_id.load(Ordering::Acquire);
        let end = self.id_block().end;
        if next > end.value() {
            self.renew_lease().await?;
            return Box::pin(self.allocate_task_id()).await;
        }
        self.next_task_id.store(next + 1, Ordering::Release);
        Ok(TaskId::new(next))
    }

    async fn renew_lease(&self) -> Result<(), EngineError> {
        let mut attempts = 0;
        loop {
            match self.store.renew_lease(&self.tasklist).await {
                Ok(lease) => {
                    debug!(
                        tasklist = %self.tasklist,
                        range_id = %lease.range_id,
                        block_start = lease.block.start.value(),
                        block_end = lease.block.end.value(),
                        "renewed task ID block lease",
                    );
                    self.range_id.store(lease.range_id.value(), Ordering::Release);
                    self.next_task_id
                        .store(lease.block.start.value(), Ordering::Release);
                    *self.block.lock().expect("writer block poisoned") = lease.block;
                    return Ok(());
                }
                Err(err) if err.is_fencing() => {
                    warn!(tasklist = %self.tasklist, %err, "lease fenced during renewal");
                    return Err(EngineError::LeaseFenced);
                }
                Err(err) => {
                    attempts += 1;
                    if attempts >= self.config.retry.max_attempts {
                        return Err(err.into());
                    }
                    warn!(tasklist = %self.tasklist, %err, attempts, "lease renewal failed, backing off");
                    tokio::time::sleep(self.config.retry.next_delay(attempts)).await;
                }
            }
        }
    }
}
