//! Domain identifiers (strongly-typed IDs).
//!
//! Task IDs and range IDs are monotonic `i64` sequence numbers scoped to a
//! task list; they share one generic newtype so the two cannot be mixed up.
//! Domain IDs are ULIDs, generated by the cluster membership layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for sequence-number ID types.
pub trait SeqMarker: Send + Sync + 'static {
    /// Prefix used by `Display` (e.g. "task-", "range-").
    fn prefix() -> &'static str;
}

/// Generic monotonic sequence ID.
///
/// `T` is a zero-sized marker; `TaskId` and `RangeId` are distinct types at
/// compile time but both are a plain `i64` underneath.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeqId<T: SeqMarker> {
    value: i64,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: SeqMarker> SeqId<T> {
    pub const fn new(value: i64) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }

    pub const fn value(&self) -> i64 {
        self.value
    }
}

impl<T: SeqMarker> From<i64> for SeqId<T> {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl<T: SeqMarker> fmt::Display for SeqId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.value)
    }
}

/// Marker for task sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskSeq {}

impl SeqMarker for TaskSeq {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Marker for lease range numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RangeSeq {}

impl SeqMarker for RangeSeq {
    fn prefix() -> &'static str {
        "range-"
    }
}

/// Identifier of a persisted task. Monotonic within a task list, never reused.
pub type TaskId = SeqId<TaskSeq>;

/// Fencing token for the ID-block lease. Monotonic; observing a larger value
/// in the store means another manager instance has taken over.
pub type RangeId = SeqId<RangeSeq>;

/// Sentinel task ID carried by tasks handed over via sync match.
/// Such tasks are never persisted and never enter the ack manager.
pub const SYNC_MATCH_TASK_ID: TaskId = TaskId::new(-1);

/// Identifier of a domain (tenancy unit with its own active cluster).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainId(Ulid);

impl DomainId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "domain-{}", self.0)
    }
}

/// Kind of work flowing through a task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskListKind {
    Decision,
    Activity,
}

impl fmt::Display for TaskListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskListKind::Decision => f.write_str("decision"),
            TaskListKind::Activity => f.write_str("activity"),
        }
    }
}

/// Immutable key of a task-list manager instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskListId {
    pub domain: DomainId,
    pub name: String,
    pub kind: TaskListKind,
}

impl TaskListId {
    pub fn new(domain: DomainId, name: impl Into<String>, kind: TaskListKind) -> Self {
        Self {
            domain,
            name: name.into(),
            kind,
        }
    }
}

impl fmt::Display for TaskListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.domain, self.name, self.kind)
    }
}
