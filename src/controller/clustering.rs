//! Handoff to the clustering manager
//!
//! The clustering manager tracks MySQL topology over SQL/RPC and assigns
//! primary/replica roles to pods. The reconciler treats it as an opaque
//! receiver: `update` after every successful reconcile, `stop` when a
//! cluster disappears or is finalised. Its errors never fail a reconcile.

use std::fmt;

use kube::ResourceExt;

use crate::crd::MySQLCluster;

/// The `(namespace, name)` pair identifying a MySQLCluster.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClusterKey {
    pub namespace: String,
    pub name: String,
}

impl ClusterKey {
    pub fn from_cluster(cluster: &MySQLCluster) -> Self {
        Self {
            namespace: cluster.namespace().unwrap_or_default(),
            name: cluster.name_any(),
        }
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Interface to the clustering manager.
pub trait ClusterManager: Send + Sync {
    /// The cluster was reconciled; pick up the new topology.
    fn update(&self, key: &ClusterKey);

    /// The cluster is gone or being finalised; stop tracking it.
    fn stop(&self, key: &ClusterKey);
}

/// Manager used when clustering runs out of process.
#[derive(Clone, Copy, Debug, Default)]
pub struct NopClusterManager;

impl ClusterManager for NopClusterManager {
    fn update(&self, key: &ClusterKey) {
        tracing::debug!("clustering update for {}", key);
    }

    fn stop(&self, key: &ClusterKey) {
        tracing::debug!("clustering stop for {}", key);
    }
}
