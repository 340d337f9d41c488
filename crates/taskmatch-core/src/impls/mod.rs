//! Port implementations bundled with the core (in-memory, for development
//! and deterministic tests). Durable adapters live in their own crates.

pub mod memory;

pub use self::memory::{InMemoryTaskStore, StaticDomainResolver};
