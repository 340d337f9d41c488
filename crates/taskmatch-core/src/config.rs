//! Per-task-list tunables.
//!
//! The manager holds an `Arc<TaskListConfig>` and re-reads values at use
//! sites; only the dispatch rate is mutable at runtime, through
//! `TaskMatcher::update_ratelimit`.

use std::time::Duration;

use rand::Rng;

/// Default dispatch rate when no poller has advertised a budget.
pub const DEFAULT_TASK_DISPATCH_RPS: f64 = 100_000.0;

#[derive(Debug, Clone)]
pub struct TaskListConfig {
    /// Size of each leased ID block.
    pub range_size: i64,

    /// Max tasks fetched from the store per scan.
    pub get_tasks_batch_size: usize,

    /// Capacity of the in-memory task buffer. The fetch loop blocks when
    /// the buffer is full.
    pub task_buffer_size: usize,

    /// Initial dispatch rate, tasks per second.
    pub dispatch_rps: f64,

    /// How often the liveness monitor checks for idleness.
    pub idle_check_interval: Duration,

    /// A task list with no task added within this window, no pollers and an
    /// empty buffer self-terminates.
    pub max_idle_time: Duration,

    /// Poller records not refreshed within this window are evicted.
    pub poller_ttl: Duration,

    /// Fetch-loop sleep when the store has no new tasks.
    pub empty_poll_interval: Duration,

    /// Backoff for transient store failures.
    pub retry: RetryPolicy,
}

impl Default for TaskListConfig {
    fn default() -> Self {
        Self {
            range_size: 100_000,
            get_tasks_batch_size: 1_000,
            task_buffer_size: 1_000,
            dispatch_rps: DEFAULT_TASK_DISPATCH_RPS,
            idle_check_interval: Duration::from_secs(300),
            max_idle_time: Duration::from_secs(300),
            poller_ttl: Duration::from_secs(300),
            empty_poll_interval: Duration::from_millis(250),
            retry: RetryPolicy::default(),
        }
    }
}

/// Jittered exponential backoff for transient store errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Attempts before a caller-facing operation gives up. Background loops
    /// retry indefinitely and only use the delay schedule.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(50),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next retry, `attempts` being the number of failures
    /// so far (1-indexed). Jittered by ±20% to avoid thundering herds.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(16);
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exp as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        Duration::from_secs_f64(capped * jitter)
    }
}
