use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PodTemplateSpec, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::backup_policy::JobConfig;
use crate::crd::{conditions_schema, datetime_schema, k8s_object_list_schema, k8s_object_schema};

/// MySQLCluster is the Schema for the mysqlclusters API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "moco.cybozu.com",
    version = "v1beta2",
    kind = "MySQLCluster",
    plural = "mysqlclusters",
    shortname = "mysql",
    namespaced,
    status = "MySQLClusterStatus",
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MySQLClusterSpec {
    /// Number of mysqld instances. Must be a positive odd number.
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Pod template for mysqld instances.
    /// Must contain a container named `mysqld`.
    #[schemars(schema_with = "k8s_object_schema")]
    pub pod_template: PodTemplateSpec,

    /// PersistentVolumeClaim templates for the StatefulSet.
    /// A `mysql-data` claim of 1Gi is supplied when not given here.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "k8s_object_list_schema")]
    pub volume_claim_templates: Vec<PersistentVolumeClaim>,

    /// Customization of the Service routing to the current primary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_service_template: Option<ServiceTemplate>,

    /// Customization of the Service routing to replicas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_service_template: Option<ServiceTemplate>,

    /// Name of a ConfigMap in the same namespace holding my.cnf overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mysql_config_map_name: Option<String>,

    /// Name of a BackupPolicy in the same namespace enabling scheduled backups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_policy_name: Option<String>,

    /// Restores the cluster from an existing backup when set.
    /// This field is immutable once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore: Option<RestoreSpec>,

    /// mysqld_exporter collector flags; the exporter sidecar runs iff non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collectors: Vec<String>,

    /// Disables the slow query log sidecar container.
    #[serde(default)]
    pub disable_slow_query_log_container: bool,

    /// Base of server_id values assigned to mysqld instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id_base: Option<i32>,
}

fn default_replicas() -> i32 {
    1
}

/// Customization of a role-routed Service.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,

    /// Service spec merged under the operator's mandatory ports and selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "k8s_object_schema")]
    pub spec: Option<ServiceSpec>,
}

/// Source and point-in-time of a restore operation.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
    /// Name of the MySQLCluster the backup was taken from.
    pub source_name: String,

    /// Namespace of the source MySQLCluster.
    pub source_namespace: String,

    /// Point-in-time to restore to.
    #[schemars(schema_with = "datetime_schema")]
    pub restore_point: Time,

    /// Job settings for the restore Job.
    pub job_config: JobConfig,
}

/// Status of the MySQLCluster
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MySQLClusterStatus {
    /// Conditions maintained by the clustering manager.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "conditions_schema")]
    pub conditions: Vec<Condition>,

    /// Generation and reconciler version of the last successful reconcile.
    #[serde(default)]
    pub reconcile_info: ReconcileInfo,

    /// Set when a restore Job has finished. The restore is never re-run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "datetime_schema")]
    pub restored_time: Option<Time>,
}

/// Pins the reconciler version used for a given spec generation so that
/// operator upgrades do not roll running mysqld pods.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileInfo {
    #[serde(default)]
    pub generation: i64,

    #[serde(default)]
    pub reconcile_version: i32,
}

impl MySQLCluster {
    /// Whether the last successful reconcile observed the current generation.
    /// While pinned, the pod template must stay byte-stable across reconciles.
    pub fn generation_pinned(&self) -> bool {
        let observed = self
            .status
            .as_ref()
            .map(|s| s.reconcile_info.generation)
            .unwrap_or(0);
        observed != 0 && self.metadata.generation == Some(observed)
    }
}
