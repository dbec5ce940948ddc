use k8s_openapi::api::core::v1::{EnvFromSource, Volume};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::{k8s_object_list_schema, k8s_object_schema};

/// BackupPolicy is a set of parameters for scheduled backups.
///
/// It is referenced by MySQLClusters through `spec.backupPolicyName` and is
/// a read-only input to the reconciler; one policy may be shared by several
/// clusters in the same namespace.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "moco.cybozu.com",
    version = "v1beta2",
    kind = "BackupPolicy",
    plural = "backuppolicies",
    namespaced,
    printcolumn = r#"{"name":"Schedule", "type":"string", "jsonPath":".spec.schedule"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupPolicySpec {
    /// Backup schedule in cron format.
    pub schedule: String,

    /// How to treat concurrent executions of a backup Job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_policy: Option<String>,

    /// Deadline in seconds for starting a Job past its scheduled time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_deadline_seconds: Option<i64>,

    /// Number of successful finished Jobs to retain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful_jobs_history_limit: Option<i32>,

    /// Number of failed finished Jobs to retain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_jobs_history_limit: Option<i32>,

    /// Duration in seconds that a backup Job may be active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,

    /// Number of retries before marking a backup Job failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_limit: Option<i32>,

    /// Settings for the Pods run by the backup Job.
    pub job_config: JobConfig,
}

/// Settings for backup and restore Job pods.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    /// ServiceAccount the Job pods run as.
    pub service_account_name: String,

    /// Number of threads used for backup or restore; also the CPU request.
    #[serde(default = "default_threads")]
    pub threads: i32,

    /// Memory request for the Job pod, e.g. "4Gi".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    /// Extra environment sources, typically bucket credentials.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "k8s_object_list_schema")]
    pub env_from: Vec<EnvFromSource>,

    /// Volume backing the working directory of the Job.
    /// The volume's name is ignored; the operator mounts it as `work`.
    #[schemars(schema_with = "k8s_object_schema")]
    pub work_volume: Volume,

    /// Object storage bucket to store or read backups.
    pub bucket_config: BucketConfig,
}

fn default_threads() -> i32 {
    4
}

/// Object storage bucket parameters.
///
/// Empty fields are omitted from the generated container arguments so the
/// backup tool's own defaults apply.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BucketConfig {
    pub bucket_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint_url: String,

    #[serde(default)]
    pub use_path_style: bool,
}
