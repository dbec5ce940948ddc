//! Unit tests for backup CronJob and restore Job generation

use chrono::{TimeZone, Utc};
use k8s_openapi::api::core::v1::{EmptyDirVolumeSource, Volume};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::ObjectMeta;
use kube::ResourceExt;

use moco_operator::crd::{
    BackupPolicy, BackupPolicySpec, BucketConfig, JobConfig, RestoreSpec,
};
use moco_operator::resources::{backup, restore};

use crate::common::test_cluster;

fn test_job_config(bucket: BucketConfig) -> JobConfig {
    JobConfig {
        service_account_name: "backup-owner".to_string(),
        threads: 2,
        memory: Some("4Gi".to_string()),
        env_from: vec![],
        work_volume: Volume {
            name: "ignored".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        bucket_config: bucket,
    }
}

fn test_policy(bucket: BucketConfig) -> BackupPolicy {
    BackupPolicy {
        metadata: ObjectMeta {
            name: Some("bp".to_string()),
            namespace: Some("ns".to_string()),
            uid: Some("bp-uid".to_string()),
            ..Default::default()
        },
        spec: BackupPolicySpec {
            schedule: "@daily".to_string(),
            concurrency_policy: Some("Forbid".to_string()),
            starting_deadline_seconds: Some(60),
            successful_jobs_history_limit: Some(3),
            failed_jobs_history_limit: Some(1),
            active_deadline_seconds: Some(3600),
            backoff_limit: Some(2),
            job_config: test_job_config(bucket),
        },
    }
}

fn full_bucket() -> BucketConfig {
    BucketConfig {
        bucket_name: "moco-backups".to_string(),
        region: "us-east-1".to_string(),
        endpoint_url: "https://minio.example.com".to_string(),
        use_path_style: true,
    }
}

mod bucket_args_tests {
    use super::*;

    #[test]
    fn test_all_fields() {
        let args = backup::bucket_args(&full_bucket());
        assert_eq!(
            args,
            vec![
                "--region=us-east-1".to_string(),
                "--endpoint=https://minio.example.com".to_string(),
                "--use-path-style".to_string(),
                "moco-backups".to_string(),
            ]
        );
    }

    #[test]
    fn test_empty_fields_are_omitted() {
        let bucket = BucketConfig {
            bucket_name: "moco-backups".to_string(),
            ..Default::default()
        };
        assert_eq!(backup::bucket_args(&bucket), vec!["moco-backups".to_string()]);
    }
}

mod backup_tests {
    use super::*;

    #[test]
    fn test_cron_job_from_policy() {
        let cluster = test_cluster("c", "ns", 3);
        let policy = test_policy(full_bucket());
        let cron = backup::build_backup_cron_job(&cluster, &policy, "backup-image:1", false);

        assert_eq!(cron.name_any(), "moco-backup-c");
        let spec = cron.spec.as_ref().unwrap();
        assert_eq!(spec.schedule, "@daily");
        assert_eq!(spec.concurrency_policy.as_deref(), Some("Forbid"));
        assert_eq!(spec.starting_deadline_seconds, Some(60));
        assert_eq!(spec.successful_jobs_history_limit, Some(3));
        assert_eq!(spec.failed_jobs_history_limit, Some(1));

        let job_spec = spec.job_template.spec.as_ref().unwrap();
        assert_eq!(job_spec.backoff_limit, Some(2));
        assert_eq!(job_spec.active_deadline_seconds, Some(3600));
    }

    #[test]
    fn test_backup_container() {
        let cluster = test_cluster("c", "ns", 3);
        let policy = test_policy(full_bucket());
        let cron = backup::build_backup_cron_job(&cluster, &policy, "backup-image:1", false);

        let pod = cron
            .spec
            .unwrap()
            .job_template
            .spec
            .unwrap()
            .template
            .spec
            .unwrap();
        assert_eq!(
            pod.service_account_name.as_deref(),
            Some("backup-owner")
        );
        let container = &pod.containers[0];
        assert_eq!(container.name, "backup");
        assert_eq!(container.image.as_deref(), Some("backup-image:1"));
        assert_eq!(
            container.args.as_ref().unwrap(),
            &vec![
                "backup".to_string(),
                "--threads=2".to_string(),
                "--region=us-east-1".to_string(),
                "--endpoint=https://minio.example.com".to_string(),
                "--use-path-style".to_string(),
                "moco-backups".to_string(),
                "ns".to_string(),
                "c".to_string(),
            ]
        );

        let requests = container
            .resources
            .as_ref()
            .unwrap()
            .requests
            .as_ref()
            .unwrap();
        assert_eq!(requests.get("cpu"), Some(&Quantity("2".to_string())));
        assert_eq!(requests.get("memory"), Some(&Quantity("4Gi".to_string())));

        let env = container.env.as_ref().unwrap();
        let password = env.iter().find(|e| e.name == "MYSQL_PASSWORD").unwrap();
        let key_ref = password
            .value_from
            .as_ref()
            .unwrap()
            .secret_key_ref
            .as_ref()
            .unwrap();
        assert_eq!(key_ref.name, "moco-c");
        assert_eq!(key_ref.key, "BACKUP_PASSWORD");
    }

    #[test]
    fn test_no_job_resource_skips_requests() {
        let cluster = test_cluster("c", "ns", 3);
        let policy = test_policy(full_bucket());
        let cron = backup::build_backup_cron_job(&cluster, &policy, "backup-image:1", true);
        let pod = cron
            .spec
            .unwrap()
            .job_template
            .spec
            .unwrap()
            .template
            .spec
            .unwrap();
        assert!(pod.containers[0].resources.is_none());
    }

    #[test]
    fn test_work_volume_is_renamed() {
        let cluster = test_cluster("c", "ns", 3);
        let policy = test_policy(full_bucket());
        let cron = backup::build_backup_cron_job(&cluster, &policy, "backup-image:1", false);
        let pod = cron
            .spec
            .unwrap()
            .job_template
            .spec
            .unwrap()
            .template
            .spec
            .unwrap();
        let volumes = pod.volumes.unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, "work");
        assert!(volumes[0].empty_dir.is_some());
    }

    #[test]
    fn test_role_and_binding() {
        let cluster = test_cluster("c", "ns", 3);
        let policy = test_policy(full_bucket());

        let role = backup::build_backup_role(&cluster);
        assert_eq!(role.name_any(), "moco-backup-c");
        let rules = role.rules.unwrap();
        assert!(rules.iter().any(|r| {
            r.resources
                .as_ref()
                .is_some_and(|res| res.contains(&"mysqlclusters/status".to_string()))
                && r.verbs.contains(&"update".to_string())
        }));
        assert!(rules.iter().any(|r| {
            r.resources
                .as_ref()
                .is_some_and(|res| res.contains(&"pods".to_string()))
                && r.verbs.contains(&"list".to_string())
        }));
        assert!(rules.iter().any(|r| {
            r.resources
                .as_ref()
                .is_some_and(|res| res.contains(&"events".to_string()))
                && r.verbs.contains(&"create".to_string())
        }));

        let binding = backup::build_backup_role_binding(&cluster, &policy);
        assert_eq!(binding.role_ref.name, "moco-backup-c");
        assert_eq!(binding.subjects.unwrap()[0].name, "backup-owner");
    }
}

mod restore_tests {
    use super::*;

    fn test_restore_spec() -> RestoreSpec {
        RestoreSpec {
            source_name: "src".to_string(),
            source_namespace: "src-ns".to_string(),
            restore_point: Time(Utc.with_ymd_and_hms(2021, 5, 1, 12, 34, 56).unwrap()),
            job_config: test_job_config(full_bucket()),
        }
    }

    #[test]
    fn test_restore_job_shape() {
        let cluster = test_cluster("c", "ns", 3);
        let job = restore::build_restore_job(&cluster, &test_restore_spec(), "backup-image:1", false);

        assert_eq!(job.name_any(), "moco-restore-c");
        let spec = job.spec.as_ref().unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
    }

    #[test]
    fn test_restore_args_end_with_formatted_point() {
        let cluster = test_cluster("c", "ns", 3);
        let job = restore::build_restore_job(&cluster, &test_restore_spec(), "backup-image:1", false);
        let args = job.spec.unwrap().template.spec.unwrap().containers[0]
            .args
            .clone()
            .unwrap();
        assert_eq!(
            args,
            vec![
                "restore".to_string(),
                "--threads=2".to_string(),
                "--region=us-east-1".to_string(),
                "--endpoint=https://minio.example.com".to_string(),
                "--use-path-style".to_string(),
                "moco-backups".to_string(),
                "src-ns".to_string(),
                "src".to_string(),
                "ns".to_string(),
                "c".to_string(),
                "20210501-123456".to_string(),
            ]
        );
    }

    #[test]
    fn test_restore_rbac_owned_by_job() {
        let cluster = test_cluster("c", "ns", 3);
        let restore_spec = test_restore_spec();
        let mut job =
            restore::build_restore_job(&cluster, &restore_spec, "backup-image:1", false);
        job.metadata.uid = Some("job-uid".to_string());

        let role = restore::build_restore_role(&cluster, &job);
        let owners = role.metadata.owner_references.unwrap();
        assert_eq!(owners[0].kind, "Job");
        assert_eq!(owners[0].uid, "job-uid");

        let binding = restore::build_restore_role_binding(&cluster, &restore_spec, &job);
        let owners = binding.metadata.owner_references.unwrap();
        assert_eq!(owners[0].kind, "Job");
        assert_eq!(binding.subjects.unwrap()[0].name, "backup-owner");
    }
}
