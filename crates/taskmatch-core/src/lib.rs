//! taskmatch-core
//!
//! Per-task-list runtime for a task matching engine.
//!
//! # Module layout
//! - **domain**: domain model (ids, task, status, errors)
//! - **ports**: abstraction layer (TaskStore, DomainResolver)
//! - **impls**: implementations (InMemoryTaskStore for development and tests)
//! - **manager**: TaskListManager, the per-list composition root
//! - **writer** / **reader**: persistence append path and buffered dispatch path
//! - **matcher**: poller rendezvous and dispatch rate limiting
//! - **ack**: read/ack watermark tracking
//! - **poller_history**: recently-seen poller bookkeeping
//! - **liveness**: idle self-termination monitor

pub mod ack;
pub mod config;
pub mod domain;
pub mod impls;
pub mod limiter;
pub mod liveness;
pub mod manager;
pub mod matcher;
pub mod poller_history;
pub mod ports;
pub mod reader;
pub mod writer;

pub use config::TaskListConfig;
pub use domain::{
    AddTaskRequest, DescribeResponse, EngineError, PollRequest, TaskId, TaskInfo, TaskListId,
    TaskListKind,
};
pub use manager::TaskListManager;
