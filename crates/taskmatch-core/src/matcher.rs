//! Task/poller rendezvous.
//!
//! Two delivery paths share one rate limiter: a zero-latency synchronous
//! hand-off from `add_task` to an already-blocked poller, and the buffered
//! dispatch path driven by the reader. A task offered when no poller is
//! waiting is handed back to the caller, never dropped, and the rate-limit
//! token charged for the attempt is credited back.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::{Notify, oneshot, watch};
use tracing::debug;

use crate::domain::{EngineError, TaskInfo};
use crate::limiter::RateLimiter;

/// Why a buffered offer did not deliver.
#[derive(Debug)]
pub enum OfferError {
    /// Dispatch was cancelled; the task is returned to the caller and the
    /// rate-limit token has been credited back.
    Cancelled(TaskInfo),
}

#[derive(Debug)]
pub struct TaskMatcher {
    limiter: RateLimiter,
    /// Pollers blocked in `poll`, oldest first. A dropped receiver (poll
    /// timeout) invalidates its sender, so delivery skips it.
    waiters: Mutex<VecDeque<oneshot::Sender<TaskInfo>>>,
    /// Pinged whenever a poller arrives, waking blocked offers.
    poller_waiting: Notify,
}

impl TaskMatcher {
    pub fn new(dispatch_rps: f64) -> Self {
        Self {
            limiter: RateLimiter::new(dispatch_rps),
            waiters: Mutex::new(VecDeque::new()),
            poller_waiting: Notify::new(),
        }
    }

    /// Current dispatch rate, tasks per second.
    pub fn rate(&self) -> f64 {
        self.limiter.rate()
    }

    /// Swap the dispatch rate (poller-advertised budget).
    pub fn update_ratelimit(&self, rate_per_second: f64) {
        if rate_per_second != self.limiter.rate() {
            debug!(rate_per_second, "updating dispatch rate limit");
            self.limiter.update_rate(rate_per_second);
        }
    }

    /// Acquire one dispatch token, waiting for refill. The dispatch loop
    /// races this against its cancellation signal.
    pub async fn ratelimit(&self) {
        self.limiter.acquire().await;
    }

    /// Attempt a zero-latency hand-off to an already-waiting poller.
    ///
    /// Non-blocking: fails when no dispatch token is immediately available
    /// or no poller is waiting; the task is handed back either way and no
    /// token is leaked.
    pub fn sync_match(&self, task: TaskInfo) -> Result<(), TaskInfo> {
        if !self.limiter.try_acquire() {
            return Err(task);
        }
        match self.try_deliver(task) {
            Ok(()) => Ok(()),
            Err(task) => {
                self.limiter.give_back();
                Err(task)
            }
        }
    }

    /// Deliver a buffered task, waiting for a poller to show up. The caller
    /// must already hold a dispatch token (via `ratelimit`); on cancellation
    /// the token is credited back and the task returned.
    pub async fn offer_wait(
        &self,
        mut task: TaskInfo,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), OfferError> {
        loop {
            // Arm the notification before attempting delivery so a poller
            // arriving in between is not missed.
            let waiting = self.poller_waiting.notified();
            task = match self.try_deliver(task) {
                Ok(()) => return Ok(()),
                Err(task) => task,
            };
            tokio::select! {
                _ = waiting => {}
                _ = cancel.changed() => {
                    self.limiter.give_back();
                    return Err(OfferError::Cancelled(task));
                }
            }
        }
    }

    /// Block until a task is handed over, the timeout elapses or the
    /// manager shuts down. Timeouts and shutdown both map to `NoTasks`.
    pub async fn poll(
        &self,
        timeout: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<TaskInfo, EngineError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.waiters.lock().expect("matcher waiters poisoned");
            // Timed-out pollers leave dead senders behind; prune them here so
            // an idle-but-polled task list does not accumulate them forever.
            waiters.retain(|waiter| !waiter.is_closed());
            waiters.push_back(tx);
        }
        self.poller_waiting.notify_one();

        tokio::select! {
            task = rx => task.map_err(|_| EngineError::NoTasks),
            _ = tokio::time::sleep(timeout) => Err(EngineError::NoTasks),
            _ = shutdown.changed() => Err(EngineError::NoTasks),
        }
        // Dropping `rx` on the timeout/shutdown arms closes the channel, so
        // a later delivery attempt skips this waiter.
    }

    /// Hand the task to the first still-listening waiter.
    fn try_deliver(&self, mut task: TaskInfo) -> Result<(), TaskInfo> {
        let mut waiters = self.waiters.lock().expect("matcher waiters poisoned");
        while let Some(waiter) = waiters.pop_front() {
            task = match waiter.send(task) {
                Ok(()) => return Ok(()),
                Err(task) => task, // waiter gave up, try the next one
            };
        }
        Err(task)
    }
}
