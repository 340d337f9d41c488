//! DomainResolver port - per-call active/standby resolution.
//!
//! Consulted on every `add_task` and never cached by the core, so a live
//! failover is reflected on the very next write.

use async_trait::async_trait;

use crate::domain::{DomainId, ResolverError};

/// Replication snapshot of a domain at one instant.
#[derive(Debug, Clone)]
pub struct DomainActivity {
    /// True when the local cluster is the domain's active cluster.
    pub is_active: bool,
    /// Name of the cluster that currently owns writes for this domain.
    pub active_cluster: String,
}

#[async_trait]
pub trait DomainResolver: Send + Sync {
    async fn resolve(&self, domain: DomainId) -> Result<DomainActivity, ResolverError>;
}
