//! Storage scan and buffered dispatch.
//!
//! One fetch loop scans the store from the read watermark in ID order and
//! pushes live tasks into a bounded buffer (blocking when full); one
//! dispatch loop drains the buffer through the matcher's rate limiter.
//! Expired tasks still advance the read level but are never buffered, so
//! the watermark cannot stall on garbage.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{Notify, mpsc, watch};
use tracing::{debug, warn};

use crate::ack::AckManager;
use crate::config::TaskListConfig;
use crate::domain::{StoreError, TaskId, TaskInfo, TaskListId};
use crate::matcher::{OfferError, TaskMatcher};
use crate::ports::TaskStore;

pub struct TaskReader {
    tasklist: TaskListId,
    config: Arc<TaskListConfig>,
    store: Arc<dyn TaskStore>,
    matcher: Arc<TaskMatcher>,
    ack: Arc<AckManager>,
    /// Single producer (fetch loop); `None` once the buffer is closed.
    buffer_tx: Mutex<Option<mpsc::Sender<TaskInfo>>>,
    /// Single consumer; taken by the dispatch loop on startup.
    buffer_rx: Mutex<Option<mpsc::Receiver<TaskInfo>>>,
    /// Pinged when a task was persisted, waking the fetch loop early.
    new_task_notify: Notify,
    /// Manager-level shutdown.
    shutdown_rx: watch::Receiver<bool>,
    /// Reader-level dispatch cancellation.
    dispatch_cancel_tx: watch::Sender<bool>,
    /// Highest allocated task ID, owned by the writer.
    max_read_level: Arc<AtomicI64>,
    /// Microseconds since epoch of the last accepted task; 0 = never.
    last_added_micros: AtomicI64,
}

impl TaskReader {
    pub fn new(
        tasklist: TaskListId,
        config: Arc<TaskListConfig>,
        store: Arc<dyn TaskStore>,
        matcher: Arc<TaskMatcher>,
        ack: Arc<AckManager>,
        max_read_level: Arc<AtomicI64>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let (buffer_tx, buffer_rx) = mpsc::channel(config.task_buffer_size.max(1));
        let (dispatch_cancel_tx, _) = watch::channel(false);
        Self {
            tasklist,
            config,
            store,
            matcher,
            ack,
            buffer_tx: Mutex::new(Some(buffer_tx)),
            buffer_rx: Mutex::new(Some(buffer_rx)),
            new_task_notify: Notify::new(),
            shutdown_rx,
            dispatch_cancel_tx,
            max_read_level,
            last_added_micros: AtomicI64::new(0),
        }
    }

    /// Record a freshly persisted task and wake the fetch loop.
    pub fn task_added(&self) {
        self.last_added_micros
            .store(Utc::now().timestamp_micros(), Ordering::Release);
        self.new_task_notify.notify_one();
    }

    pub fn last_add_time(&self) -> Option<DateTime<Utc>> {
        match self.last_added_micros.load(Ordering::Acquire) {
            0 => None,
            micros => Utc.timestamp_micros(micros).single(),
        }
    }

    /// True when a task was added within the configured idle window.
    /// An unset timestamp means "never", which is not recent.
    pub fn is_task_added_recently(&self, last_add: Option<DateTime<Utc>>) -> bool {
        let Some(last_add) = last_add else {
            return false;
        };
        let max_idle = chrono::Duration::from_std(self.config.max_idle_time)
            .unwrap_or_else(|_| chrono::Duration::max_value());
        Utc::now().signed_duration_since(last_add) <= max_idle
    }

    pub fn buffer_is_empty(&self) -> bool {
        match self.buffer_tx.lock().expect("buffer tx poisoned").as_ref() {
            Some(tx) => tx.capacity() == tx.max_capacity(),
            None => true,
        }
    }

    /// Cancel the dispatch loop (and any in-flight offer).
    pub fn cancel_dispatch(&self) {
        let _ = self.dispatch_cancel_tx.send(true);
    }

    /// Close the task buffer; the dispatch loop drains and exits.
    pub fn close_buffer(&self) {
        self.buffer_tx.lock().expect("buffer tx poisoned").take();
    }

    /// Dispatch loop: pull one buffered task at a time, acquire a dispatch
    /// token, then hand the task to the matcher. Runs until the buffer is
    /// closed, the manager shuts down or dispatch is cancelled; spawned by
    /// the manager so the join handle doubles as the completion waiter.
    pub async fn dispatch_buffered_tasks(&self) {
        let Some(mut rx) = self.buffer_rx.lock().expect("buffer rx poisoned").take() else {
            warn!(tasklist = %self.tasklist, "dispatch loop started twice");
            return;
        };
        let mut shutdown = self.shutdown_rx.clone();
        let mut cancel = self.dispatch_cancel_tx.subscribe();

        loop {
            let task = tokio::select! {
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => break, // buffer closed
                },
                _ = shutdown.changed() => break,
                _ = cancel.changed() => break,
            };

            tokio::select! {
                _ = self.matcher.ratelimit() => {}
                _ = shutdown.changed() => break,
                _ = cancel.changed() => break,
            }

            match self.matcher.offer_wait(task, &mut cancel).await {
                Ok(()) => {}
                Err(OfferError::Cancelled(task)) => {
                    // Task stays persisted; a successor instance re-reads it.
                    debug!(tasklist = %self.tasklist, task_id = %task.task_id, "dispatch cancelled");
                    break;
                }
            }
        }
        debug!(tasklist = %self.tasklist, "dispatch loop exited");
    }

    /// Fetch loop: scan the store from the read watermark up to the highest
    /// allocated ID, in batches, forever. Transient read failures back off
    /// and retry; they are never fatal.
    pub async fn get_tasks_pump(&self) {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            if *shutdown.borrow() {
                break;
            }

            let from = self.ack.read_level();
            let to = TaskId::new(self.max_read_level.load(Ordering::Acquire));
            if to <= from {
                if !self.wait_for_new_tasks(&mut shutdown).await {
                    break;
                }
                continue;
            }

            match self.get_tasks_with_retry(from, to).await {
                Ok(batch) if batch.is_empty() => {
                    if !self.wait_for_new_tasks(&mut shutdown).await {
                        break;
                    }
                }
                Ok(batch) => {
                    if !self.add_tasks_to_buffer(batch).await {
                        break;
                    }
                }
                Err(err) => {
                    warn!(tasklist = %self.tasklist, %err, "task scan failed, will retry");
                    if !self.wait_for_new_tasks(&mut shutdown).await {
                        break;
                    }
                }
            }
        }
        debug!(tasklist = %self.tasklist, "fetch loop exited");
    }

    /// Push a scanned batch into the buffer. Every task advances the read
    /// watermark; expired tasks are dropped instead of buffered. Returns
    /// false when the reader is shutting down.
    pub async fn add_tasks_to_buffer(&self, tasks: Vec<TaskInfo>) -> bool {
        let now = Utc::now();
        let mut shutdown = self.shutdown_rx.clone();
        for task in tasks {
            if task.is_expired(now) {
                debug!(tasklist = %self.tasklist, task_id = %task.task_id, "dropping expired task");
                self.ack.set_read_level(task.task_id);
                continue;
            }
            self.ack.read_item(task.task_id);

            let tx = self
                .buffer_tx
                .lock()
                .expect("buffer tx poisoned")
                .clone();
            let Some(tx) = tx else {
                return false;
            };
            tokio::select! {
                sent = tx.send(task) => {
                    if sent.is_err() {
                        return false;
                    }
                }
                _ = shutdown.changed() => return false,
            }
        }
        true
    }

    async fn wait_for_new_tasks(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = self.new_task_notify.notified() => true,
            _ = tokio::time::sleep(self.config.empty_poll_interval) => true,
            _ = shutdown.changed() => false,
        }
    }

    async fn get_tasks_with_retry(
        &self,
        from: TaskId,
        to: TaskId,
    ) -> Result<Vec<TaskInfo>, StoreError> {
        let mut attempts = 0;
        loop {
            match self
                .store
                .get_tasks(&self.tasklist, from, to, self.config.get_tasks_batch_size)
                .await
            {
                Ok(batch) => return Ok(batch),
                Err(err) => {
                    attempts += 1;
                    if attempts >= self.config.retry.max_attempts {
                        return Err(err);
                    }
                    warn!(tasklist = %self.tasklist, %err, attempts, "get_tasks failed, backing off");
                    tokio::time::sleep(self.config.retry.next_delay(attempts)).await;
                }
            }
        }
    }
}
