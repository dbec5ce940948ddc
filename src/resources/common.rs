//! Common utilities for Kubernetes resource generation
//!
//! Deterministic child names, the shared label set, and owner references
//! used by every resource builder.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;

use crate::crd::MySQLCluster;

/// API version for the MySQLCluster CRD
pub const API_VERSION: &str = "moco.cybozu.com/v1beta2";

/// Kind for the MySQLCluster CRD
pub const KIND: &str = "MySQLCluster";

/// Field manager name for server-side apply
pub const FIELD_MANAGER: &str = "moco-controller";

/// Finalizer placed on every MySQLCluster
pub const FINALIZER: &str = "moco.cybozu.com/mysqlcluster";

pub const APP_NAME_KEY: &str = "app.kubernetes.io/name";
pub const APP_INSTANCE_KEY: &str = "app.kubernetes.io/instance";
pub const APP_CREATED_BY_KEY: &str = "app.kubernetes.io/created-by";
pub const APP_INSTANCE_NAMESPACE_KEY: &str = "app.kubernetes.io/instance-namespace";

pub const APP_NAME: &str = "mysql";
pub const APP_CREATED_BY: &str = "moco";

/// Pod role label, written exclusively by the clustering manager.
/// The reconciler only ever reads it into Service selectors.
pub const ROLE_KEY: &str = "moco.cybozu.com/role";
pub const ROLE_PRIMARY: &str = "primary";
pub const ROLE_REPLICA: &str = "replica";

pub const MYSQLD_CONTAINER_NAME: &str = "mysqld";
pub const AGENT_CONTAINER_NAME: &str = "agent";
pub const SLOW_LOG_CONTAINER_NAME: &str = "slow-log";
pub const EXPORTER_CONTAINER_NAME: &str = "mysqld-exporter";
pub const INIT_CONTAINER_NAME: &str = "moco-init";
pub const CONF_GEN_CONTAINER_NAME: &str = "moco-conf-gen";

pub const MYSQL_PORT: i32 = 3306;
pub const MYSQLX_PORT: i32 = 33060;
pub const MYSQL_ADMIN_PORT: i32 = 33062;
pub const AGENT_PORT: i32 = 9080;
pub const EXPORTER_PORT: i32 = 9104;

pub const MYSQL_PORT_NAME: &str = "mysql";
pub const MYSQLX_PORT_NAME: &str = "mysqlx";
pub const MYSQL_ADMIN_PORT_NAME: &str = "mysql-admin";

pub const MYSQL_DATA_VOLUME_NAME: &str = "mysql-data";
pub const TMP_VOLUME_NAME: &str = "tmp";
pub const RUN_VOLUME_NAME: &str = "run";
pub const VAR_LOG_VOLUME_NAME: &str = "var-log";
pub const MYSQL_CONF_VOLUME_NAME: &str = "mysql-conf";
pub const MYSQL_CONF_TEMPLATE_VOLUME_NAME: &str = "mysql-conf-template";
pub const MY_CNF_SECRET_VOLUME_NAME: &str = "my-cnf-secret";
pub const GRPC_CERT_VOLUME_NAME: &str = "grpc-cert";
pub const SLOW_LOG_CONFIG_VOLUME_NAME: &str = "slow-query-log-agent-config";

/// Volume names the operator adds to every pod; user pod templates and PVC
/// templates must not collide with these.
pub const RESERVED_VOLUME_NAMES: &[&str] = &[
    TMP_VOLUME_NAME,
    RUN_VOLUME_NAME,
    VAR_LOG_VOLUME_NAME,
    MYSQL_CONF_VOLUME_NAME,
    MYSQL_CONF_TEMPLATE_VOLUME_NAME,
    MY_CNF_SECRET_VOLUME_NAME,
    GRPC_CERT_VOLUME_NAME,
    SLOW_LOG_CONFIG_VOLUME_NAME,
];

pub const MYSQL_DATA_PATH: &str = "/var/lib/mysql";
pub const MYSQL_CONF_PATH: &str = "/etc/mysql";
pub const MYSQL_CONF_TEMPLATE_PATH: &str = "/etc/mysql-conf-template";
pub const MY_CNF_SECRET_PATH: &str = "/etc/mysql-credentials";
pub const GRPC_CERT_PATH: &str = "/grpc-cert";
pub const RUN_PATH: &str = "/run";
pub const VAR_LOG_PATH: &str = "/var/log/mysql";
pub const TMP_PATH: &str = "/tmp";
pub const FLUENT_BIT_CONFIG_PATH: &str = "/fluent-bit/etc";

pub const MY_CNF_NAME: &str = "my.cnf";

pub const DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS: i64 = 300;

/// `moco-<name>`, the base of every user-namespace child name.
pub fn prefixed_name(cluster: &MySQLCluster) -> String {
    format!("moco-{}", cluster.name_any())
}

/// Name of the master credential Secret in the operator's own namespace.
pub fn controller_secret_name(cluster: &MySQLCluster) -> String {
    format!("{}.{}", cluster.namespace().unwrap_or_default(), cluster.name_any())
}

/// Name of the user-facing credential Secret.
pub fn user_secret_name(cluster: &MySQLCluster) -> String {
    prefixed_name(cluster)
}

/// Name of the my.cnf-formatted credential Secret.
pub fn my_cnf_secret_name(cluster: &MySQLCluster) -> String {
    format!("moco-my-cnf-{}", cluster.name_any())
}

/// Name of the gRPC certificate Secret projected into the cluster namespace.
pub fn grpc_secret_name(cluster: &MySQLCluster) -> String {
    format!("{}-grpc", prefixed_name(cluster))
}

/// Prefix of content-addressed my.cnf ConfigMap names, including the
/// trailing dot. The active ConfigMap is `<prefix><fnv32aHex>`; every other
/// ConfigMap with this prefix is stale.
pub fn my_cnf_config_map_prefix(cluster: &MySQLCluster) -> String {
    format!("{}.", prefixed_name(cluster))
}

/// Name of the slow query log agent ConfigMap.
pub fn slow_log_agent_config_map_name(cluster: &MySQLCluster) -> String {
    format!("moco-slow-log-agent-config-{}", cluster.name_any())
}

pub fn headless_service_name(cluster: &MySQLCluster) -> String {
    prefixed_name(cluster)
}

pub fn primary_service_name(cluster: &MySQLCluster) -> String {
    format!("{}-primary", prefixed_name(cluster))
}

pub fn replica_service_name(cluster: &MySQLCluster) -> String {
    format!("{}-replica", prefixed_name(cluster))
}

pub fn stateful_set_name(cluster: &MySQLCluster) -> String {
    prefixed_name(cluster)
}

pub fn service_account_name(cluster: &MySQLCluster) -> String {
    prefixed_name(cluster)
}

pub fn pdb_name(cluster: &MySQLCluster) -> String {
    prefixed_name(cluster)
}

/// Name of the backup CronJob and its Role/RoleBinding.
pub fn backup_job_name(cluster: &MySQLCluster) -> String {
    format!("moco-backup-{}", cluster.name_any())
}

/// Name of the restore Job and its Role/RoleBinding.
pub fn restore_job_name(cluster: &MySQLCluster) -> String {
    format!("moco-restore-{}", cluster.name_any())
}

/// Name of the agent certificate issued in the operator namespace.
/// Its issued Secret carries the same name.
pub fn certificate_name(cluster: &MySQLCluster) -> String {
    format!(
        "moco-agent-{}.{}",
        cluster.namespace().unwrap_or_default(),
        cluster.name_any()
    )
}

/// Parse a certificate name back into a cluster key.
/// Returns `(namespace, name)` when the name matches the issued pattern.
pub fn parse_certificate_name(name: &str) -> Option<(String, String)> {
    let rest = name.strip_prefix("moco-agent-")?;
    let (ns, name) = rest.split_once('.')?;
    if ns.is_empty() || name.is_empty() {
        return None;
    }
    Some((ns.to_string(), name.to_string()))
}

/// Generate an owner reference for a MySQLCluster
///
/// All children in the cluster's own namespace carry this so Kubernetes
/// garbage-collects them when the cluster is deleted.
pub fn owner_reference(cluster: &MySQLCluster) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: cluster.name_any(),
        uid: cluster.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Owner reference pointing at a restore Job, so that its Role and
/// RoleBinding disappear with the Job.
pub fn job_owner_reference(job: &Job) -> OwnerReference {
    OwnerReference {
        api_version: "batch/v1".to_string(),
        kind: "Job".to_string(),
        name: job.name_any(),
        uid: job.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Standard labels for resources in the cluster's namespace.
pub fn cluster_labels(cluster: &MySQLCluster) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_NAME_KEY.to_string(), APP_NAME.to_string()),
        (APP_INSTANCE_KEY.to_string(), cluster.name_any()),
        (APP_CREATED_BY_KEY.to_string(), APP_CREATED_BY.to_string()),
    ])
}

/// Labels for objects placed in the operator namespace; the extra namespace
/// label disambiguates equally-named clusters from different namespaces.
pub fn controller_labels(cluster: &MySQLCluster) -> BTreeMap<String, String> {
    let mut labels = cluster_labels(cluster);
    labels.insert(
        APP_INSTANCE_NAMESPACE_KEY.to_string(),
        cluster.namespace().unwrap_or_default(),
    );
    labels
}

/// Selector for the primary Service.
pub fn primary_selector(cluster: &MySQLCluster) -> BTreeMap<String, String> {
    let mut selector = cluster_labels(cluster);
    selector.insert(ROLE_KEY.to_string(), ROLE_PRIMARY.to_string());
    selector
}

/// Selector for the replica Service.
pub fn replica_selector(cluster: &MySQLCluster) -> BTreeMap<String, String> {
    let mut selector = cluster_labels(cluster);
    selector.insert(ROLE_KEY.to_string(), ROLE_REPLICA.to_string());
    selector
}

/// Merge the operator's labels into whatever the user placed on the object.
pub fn merge_labels(meta: &mut ObjectMeta, labels: BTreeMap<String, String>) {
    meta.labels.get_or_insert_with(BTreeMap::new).extend(labels);
}
