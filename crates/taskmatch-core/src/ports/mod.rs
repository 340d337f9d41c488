//! Ports - interfaces to external collaborators.
//!
//! The core never talks to infrastructure directly; the outer engine injects
//! implementations of these traits at construction time, which is also how
//! tests substitute deterministic doubles.

pub mod domain_resolver;
pub mod task_store;

pub use self::domain_resolver::{DomainActivity, DomainResolver};
pub use self::task_store::{TaskListLease, TaskStore};
