//! Introspection snapshots returned by `describe_task_list`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;

/// Bounds of the currently leased ID block, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIdBlock {
    pub start: TaskId,
    pub end: TaskId,
}

impl TaskIdBlock {
    pub fn new(start: TaskId, end: TaskId) -> Self {
        Self { start, end }
    }
}

/// Point-in-time watermark and throughput view of a task list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListStatus {
    pub ack_level: TaskId,
    pub read_level: TaskId,
    /// Number of tasks read but not yet acknowledged. Approximate above the
    /// ack level since acks may be sparse.
    pub backlog_count_hint: i64,
    /// Current dispatch rate limit, tasks per second.
    pub rate_per_second: f64,
    pub task_id_block: TaskIdBlock,
}

/// One recently-seen poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerInfo {
    pub identity: String,
    pub last_access_time: DateTime<Utc>,
    pub rate_per_second: f64,
}

/// Response of `describe_task_list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeResponse {
    pub pollers: Vec<PollerInfo>,
    /// Present only when task-list status was requested.
    pub status: Option<TaskListStatus>,
}
