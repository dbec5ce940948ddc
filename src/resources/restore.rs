//! Restore Job generation
//!
//! A one-shot Job restoring the cluster's data from a backup of another
//! cluster. Restore is fire-once: the clustering agent records
//! `status.restoredTime` when the Job finishes, and the reconciler never
//! touches the Job again after that.
//!
//! The Job's Role and RoleBinding are owned by the Job itself, so finishing
//! the restore and deleting the Job cleans them up through the garbage
//! collector.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{MySQLCluster, RestoreSpec};
use crate::resources::backup::{backup_policy_rules, bucket_args, job_pod_spec};
use crate::resources::common::{
    cluster_labels, job_owner_reference, owner_reference, restore_job_name,
};

/// Timestamp layout the backup tool expects for the restore point.
const RESTORE_POINT_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Generate the one-shot restore Job.
pub fn build_restore_job(
    cluster: &MySQLCluster,
    restore: &RestoreSpec,
    backup_image: &str,
    no_job_resource: bool,
) -> Job {
    let mut args = vec![
        "restore".to_string(),
        format!("--threads={}", restore.job_config.threads),
    ];
    args.extend(bucket_args(&restore.job_config.bucket_config));
    args.push(restore.source_namespace.clone());
    args.push(restore.source_name.clone());
    args.push(cluster.namespace().unwrap_or_default());
    args.push(cluster.name_any());
    args.push(
        restore
            .restore_point
            .0
            .format(RESTORE_POINT_FORMAT)
            .to_string(),
    );

    let mut pod_spec = job_pod_spec(cluster, &restore.job_config, args, no_job_resource);
    pod_spec.containers[0].image = Some(backup_image.to_string());

    Job {
        metadata: ObjectMeta {
            name: Some(restore_job_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(cluster_labels(cluster)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(cluster_labels(cluster)),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Role for the restore Job's ServiceAccount, owned by the Job.
pub fn build_restore_role(cluster: &MySQLCluster, job: &Job) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(restore_job_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(cluster_labels(cluster)),
            owner_references: Some(vec![job_owner_reference(job)]),
            ..Default::default()
        },
        rules: Some(backup_policy_rules()),
    }
}

/// RoleBinding for the restore Job's ServiceAccount, owned by the Job.
pub fn build_restore_role_binding(
    cluster: &MySQLCluster,
    restore: &RestoreSpec,
    job: &Job,
) -> RoleBinding {
    let name = restore_job_name(cluster);
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: cluster.namespace(),
            labels: Some(cluster_labels(cluster)),
            owner_references: Some(vec![job_owner_reference(job)]),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name,
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: restore.job_config.service_account_name.clone(),
            namespace: cluster.namespace(),
            ..Default::default()
        }]),
    }
}
