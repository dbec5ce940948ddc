//! Shared fixtures for unit tests

use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use kube::core::ObjectMeta;

use moco_operator::crd::{MySQLCluster, MySQLClusterStatus, ReconcileInfo};

pub const MYSQLD_IMAGE: &str = "ghcr.io/cybozu-go/moco/mysql:8.4.4";

/// A minimal valid cluster: a mysqld container and nothing else.
pub fn test_cluster(name: &str, namespace: &str, replicas: i32) -> MySQLCluster {
    let mut cluster = MySQLCluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some("test-uid-12345".to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: Default::default(),
        status: None,
    };
    cluster.spec.replicas = replicas;
    cluster.spec.pod_template = PodTemplateSpec {
        metadata: None,
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "mysqld".to_string(),
                image: Some(MYSQLD_IMAGE.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }),
    };
    cluster
}

/// Pin the cluster's status to its current generation at reconciler
/// version 1, as it looks after a successful reconcile.
pub fn pin_generation(cluster: &mut MySQLCluster) {
    cluster.status = Some(MySQLClusterStatus {
        reconcile_info: ReconcileInfo {
            generation: cluster.metadata.generation.unwrap_or(0),
            reconcile_version: 1,
        },
        ..Default::default()
    });
}
