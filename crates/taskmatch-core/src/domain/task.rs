//! Task payloads and poll/add request shapes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DomainId, TaskId};

/// Identity of the workflow execution a task belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub workflow_id: String,
    pub run_id: String,
}

impl WorkflowExecution {
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

/// Task fields known before an ID is assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskParams {
    pub domain: DomainId,
    pub execution: WorkflowExecution,
    pub schedule_id: i64,
    pub created_at: DateTime<Utc>,
    /// After this instant the task is garbage: the reader counts it toward
    /// the read watermark but never buffers or dispatches it.
    pub expiry: Option<DateTime<Utc>>,
}

impl TaskParams {
    pub fn new(domain: DomainId, execution: WorkflowExecution, schedule_id: i64) -> Self {
        Self {
            domain,
            execution,
            schedule_id,
            created_at: Utc::now(),
            expiry: None,
        }
    }

    /// Derive the expiry from a schedule-to-start timeout.
    pub fn with_schedule_to_start_timeout(mut self, timeout: Duration) -> Self {
        self.expiry = Some(self.created_at + timeout);
        self
    }
}

/// A persisted (or sync-matched) task as handed to a poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub domain: DomainId,
    pub execution: WorkflowExecution,
    pub schedule_id: i64,
    pub created_at: DateTime<Utc>,
    pub expiry: Option<DateTime<Utc>>,
}

impl TaskInfo {
    pub fn from_params(task_id: TaskId, params: TaskParams) -> Self {
        Self {
            task_id,
            domain: params.domain,
            execution: params.execution,
            schedule_id: params.schedule_id,
            created_at: params.created_at,
            expiry: params.expiry,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiry, Some(expiry) if expiry <= now)
    }
}

/// Parameters of a producer-side `add_task` call.
#[derive(Debug, Clone)]
pub struct AddTaskRequest {
    pub params: TaskParams,
    /// Set when this task was forwarded from a child partition. Forwarded
    /// tasks are sync-match only; they are never persisted locally.
    pub forwarded_from: Option<String>,
}

impl AddTaskRequest {
    pub fn new(params: TaskParams) -> Self {
        Self {
            params,
            forwarded_from: None,
        }
    }

    pub fn forwarded_from(mut self, source: impl Into<String>) -> Self {
        self.forwarded_from = Some(source.into());
        self
    }
}

/// Metadata of a long-poll request.
#[derive(Debug, Clone, Default)]
pub struct PollRequest {
    pub identity: Option<String>,
    /// Poller-advertised dispatch budget; when present it also overrides the
    /// recorded demand-rate estimate for this poller.
    pub rate_per_second: Option<f64>,
}
