//! Domain model (IDs, tasks, errors, status snapshots).

pub mod errors;
pub mod ids;
pub mod status;
pub mod task;

pub use errors::{EngineError, ResolverError, StoreError};
pub use ids::{
    DomainId, RangeId, SYNC_MATCH_TASK_ID, SeqId, SeqMarker, TaskId, TaskListId, TaskListKind,
};
pub use status::{DescribeResponse, PollerInfo, TaskIdBlock, TaskListStatus};
pub use task::{AddTaskRequest, PollRequest, TaskInfo, TaskParams, WorkflowExecution};
