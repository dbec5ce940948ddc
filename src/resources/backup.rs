//! Backup CronJob generation
//!
//! A referenced BackupPolicy is projected into a CronJob running the backup
//! tool, plus a Role/RoleBinding granting the policy's ServiceAccount the
//! access the tool needs: updating the cluster status with the backup
//! result, listing pods to find the dump source, and recording Events.
//!
//! When the policy reference is removed from the cluster spec, all three
//! objects are deleted.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, ResourceRequirements,
    SecretKeySelector, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{BackupPolicy, BucketConfig, JobConfig, MySQLCluster};
use crate::resources::common::{
    backup_job_name, cluster_labels, owner_reference, user_secret_name,
};
use crate::resources::secret::BACKUP_PASSWORD_KEY;

pub const BACKUP_CONTAINER_NAME: &str = "backup";
pub const WORK_VOLUME_NAME: &str = "work";
pub const WORK_PATH: &str = "/work";

/// Assemble bucket arguments; empty fields are omitted so the tool's own
/// defaults apply. The bucket name always comes last.
pub fn bucket_args(bucket: &BucketConfig) -> Vec<String> {
    let mut args = Vec::new();
    if !bucket.region.is_empty() {
        args.push(format!("--region={}", bucket.region));
    }
    if !bucket.endpoint_url.is_empty() {
        args.push(format!("--endpoint={}", bucket.endpoint_url));
    }
    if bucket.use_path_style {
        args.push("--use-path-style".to_string());
    }
    args.push(bucket.bucket_name.clone());
    args
}

/// Pod spec shared by backup and restore Jobs.
pub fn job_pod_spec(
    cluster: &MySQLCluster,
    job_config: &JobConfig,
    args: Vec<String>,
    no_job_resource: bool,
) -> PodSpec {
    let resources = if no_job_resource {
        None
    } else {
        let mut requests = BTreeMap::from([(
            "cpu".to_string(),
            Quantity(job_config.threads.to_string()),
        )]);
        if let Some(memory) = &job_config.memory {
            requests.insert("memory".to_string(), Quantity(memory.clone()));
        }
        Some(ResourceRequirements {
            requests: Some(requests),
            ..Default::default()
        })
    };

    PodSpec {
        restart_policy: Some("Never".to_string()),
        service_account_name: Some(job_config.service_account_name.clone()),
        containers: vec![Container {
            name: BACKUP_CONTAINER_NAME.to_string(),
            args: Some(args),
            env: Some(vec![EnvVar {
                name: "MYSQL_PASSWORD".to_string(),
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: user_secret_name(cluster),
                        key: BACKUP_PASSWORD_KEY.to_string(),
                        optional: Some(false),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            env_from: if job_config.env_from.is_empty() {
                None
            } else {
                Some(job_config.env_from.clone())
            },
            volume_mounts: Some(vec![VolumeMount {
                name: WORK_VOLUME_NAME.to_string(),
                mount_path: WORK_PATH.to_string(),
                ..Default::default()
            }]),
            resources,
            ..Default::default()
        }],
        volumes: Some(vec![Volume {
            name: WORK_VOLUME_NAME.to_string(),
            ..job_config.work_volume.clone()
        }]),
        ..Default::default()
    }
}

/// Generate the backup CronJob for a cluster and its policy.
pub fn build_backup_cron_job(
    cluster: &MySQLCluster,
    policy: &BackupPolicy,
    backup_image: &str,
    no_job_resource: bool,
) -> CronJob {
    let mut args = vec![
        "backup".to_string(),
        format!("--threads={}", policy.spec.job_config.threads),
    ];
    args.extend(bucket_args(&policy.spec.job_config.bucket_config));
    args.push(cluster.namespace().unwrap_or_default());
    args.push(cluster.name_any());

    let mut pod_spec = job_pod_spec(cluster, &policy.spec.job_config, args, no_job_resource);
    pod_spec.containers[0].image = Some(backup_image.to_string());

    CronJob {
        metadata: ObjectMeta {
            name: Some(backup_job_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(cluster_labels(cluster)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(CronJobSpec {
            schedule: policy.spec.schedule.clone(),
            concurrency_policy: policy.spec.concurrency_policy.clone(),
            starting_deadline_seconds: policy.spec.starting_deadline_seconds,
            successful_jobs_history_limit: policy.spec.successful_jobs_history_limit,
            failed_jobs_history_limit: policy.spec.failed_jobs_history_limit,
            job_template: JobTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(cluster_labels(cluster)),
                    ..Default::default()
                }),
                spec: Some(JobSpec {
                    backoff_limit: policy.spec.backoff_limit,
                    active_deadline_seconds: policy.spec.active_deadline_seconds,
                    template: PodTemplateSpec {
                        metadata: Some(ObjectMeta {
                            labels: Some(cluster_labels(cluster)),
                            ..Default::default()
                        }),
                        spec: Some(pod_spec),
                    },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Role granting what the backup tool needs against the cluster.
pub fn build_backup_role(cluster: &MySQLCluster) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(backup_job_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(cluster_labels(cluster)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        rules: Some(backup_policy_rules()),
    }
}

/// RoleBinding from the backup Role to the policy's ServiceAccount.
pub fn build_backup_role_binding(cluster: &MySQLCluster, policy: &BackupPolicy) -> RoleBinding {
    let name = backup_job_name(cluster);
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: cluster.namespace(),
            labels: Some(cluster_labels(cluster)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name,
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: policy.spec.job_config.service_account_name.clone(),
            namespace: cluster.namespace(),
            ..Default::default()
        }]),
    }
}

/// Rules shared by the backup and restore Roles.
pub fn backup_policy_rules() -> Vec<PolicyRule> {
    vec![
        PolicyRule {
            api_groups: Some(vec!["moco.cybozu.com".to_string()]),
            resources: Some(vec![
                "mysqlclusters".to_string(),
                "mysqlclusters/status".to_string(),
            ]),
            verbs: vec!["get".to_string(), "update".to_string()],
            ..Default::default()
        },
        PolicyRule {
            api_groups: Some(vec!["".to_string()]),
            resources: Some(vec!["pods".to_string()]),
            verbs: vec!["list".to_string(), "watch".to_string()],
            ..Default::default()
        },
        PolicyRule {
            api_groups: Some(vec!["".to_string()]),
            resources: Some(vec!["events".to_string()]),
            verbs: vec![
                "create".to_string(),
                "update".to_string(),
                "patch".to_string(),
            ],
            ..Default::default()
        },
    ]
}
