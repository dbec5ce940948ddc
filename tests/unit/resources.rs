//! Unit tests for resource generators
//!
//! Tests for StatefulSet, ServiceAccount, Service, and PDB generation.

use k8s_openapi::api::core::v1::{Container, PersistentVolumeClaim};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use moco_operator::controller::OperatorImages;
use moco_operator::resources::{pdb, service, statefulset};

use crate::common::{pin_generation, test_cluster, MYSQLD_IMAGE};

mod statefulset_tests {
    use super::*;

    #[test]
    fn test_basic_shape() {
        let cluster = test_cluster("c", "ns", 3);
        let sts = statefulset::build_stateful_set(
            &cluster,
            "moco-c.0000abcd",
            None,
            &OperatorImages::default(),
        )
        .unwrap();

        assert_eq!(sts.name_any(), "moco-c");
        let spec = sts.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(3));
        assert_eq!(spec.pod_management_policy.as_deref(), Some("Parallel"));
        assert_eq!(spec.service_name, "moco-c");
        assert_eq!(
            spec.selector.match_labels.as_ref().unwrap().get("app.kubernetes.io/instance"),
            Some(&"c".to_string())
        );
    }

    #[test]
    fn test_mysqld_container_is_augmented() {
        let cluster = test_cluster("c", "ns", 3);
        let sts = statefulset::build_stateful_set(
            &cluster,
            "moco-c.0000abcd",
            None,
            &OperatorImages::default(),
        )
        .unwrap();

        let pod = sts.spec.unwrap().template.spec.unwrap();
        let mysqld = &pod.containers[0];
        assert_eq!(mysqld.name, "mysqld");
        assert_eq!(mysqld.image.as_deref(), Some(MYSQLD_IMAGE));
        assert_eq!(
            mysqld.args.as_ref().unwrap(),
            &vec!["--defaults-file=/etc/mysql/my.cnf".to_string()]
        );

        let ports: Vec<i32> = mysqld
            .ports
            .as_ref()
            .unwrap()
            .iter()
            .map(|p| p.container_port)
            .collect();
        assert_eq!(ports, vec![3306, 33060, 33062]);
    }

    #[test]
    fn test_container_order() {
        let mut cluster = test_cluster("c", "ns", 3);
        cluster.spec.collectors = vec!["engine_innodb_status".to_string()];
        cluster
            .spec
            .pod_template
            .spec
            .as_mut()
            .unwrap()
            .containers
            .push(Container {
                name: "user-sidecar".to_string(),
                ..Default::default()
            });

        let sts = statefulset::build_stateful_set(
            &cluster,
            "moco-c.0000abcd",
            None,
            &OperatorImages::default(),
        )
        .unwrap();

        let names: Vec<String> = sts
            .spec
            .unwrap()
            .template
            .spec
            .unwrap()
            .containers
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(
            names,
            vec!["mysqld", "agent", "slow-log", "mysqld-exporter", "user-sidecar"]
        );
    }

    #[test]
    fn test_exporter_only_with_collectors() {
        let cluster = test_cluster("c", "ns", 3);
        let sts = statefulset::build_stateful_set(
            &cluster,
            "moco-c.0000abcd",
            None,
            &OperatorImages::default(),
        )
        .unwrap();
        let pod = sts.spec.unwrap().template.spec.unwrap();
        assert!(!pod.containers.iter().any(|c| c.name == "mysqld-exporter"));
    }

    #[test]
    fn test_exporter_collect_flags() {
        let mut cluster = test_cluster("c", "ns", 3);
        cluster.spec.collectors =
            vec!["engine_innodb_status".to_string(), "info_schema.innodb_metrics".to_string()];

        let sts = statefulset::build_stateful_set(
            &cluster,
            "moco-c.0000abcd",
            None,
            &OperatorImages::default(),
        )
        .unwrap();
        let pod = sts.spec.unwrap().template.spec.unwrap();
        let exporter = pod
            .containers
            .iter()
            .find(|c| c.name == "mysqld-exporter")
            .unwrap();
        assert_eq!(
            exporter.args.as_ref().unwrap(),
            &vec![
                "--collect.engine_innodb_status".to_string(),
                "--collect.info_schema.innodb_metrics".to_string(),
            ]
        );
    }

    #[test]
    fn test_slow_log_disabled() {
        let mut cluster = test_cluster("c", "ns", 3);
        cluster.spec.disable_slow_query_log_container = true;

        let sts = statefulset::build_stateful_set(
            &cluster,
            "moco-c.0000abcd",
            None,
            &OperatorImages::default(),
        )
        .unwrap();
        let pod = sts.spec.unwrap().template.spec.unwrap();
        assert!(!pod.containers.iter().any(|c| c.name == "slow-log"));
        assert!(!pod
            .volumes
            .unwrap()
            .iter()
            .any(|v| v.name == "slow-query-log-agent-config"));
    }

    #[test]
    fn test_operator_volumes_present() {
        let cluster = test_cluster("c", "ns", 3);
        let sts = statefulset::build_stateful_set(
            &cluster,
            "moco-c.0000abcd",
            None,
            &OperatorImages::default(),
        )
        .unwrap();
        let volumes = sts.spec.unwrap().template.spec.unwrap().volumes.unwrap();
        let names: Vec<&str> = volumes.iter().map(|v| v.name.as_str()).collect();
        for expected in [
            "tmp",
            "run",
            "var-log",
            "mysql-conf",
            "mysql-conf-template",
            "my-cnf-secret",
            "grpc-cert",
            "slow-query-log-agent-config",
        ] {
            assert!(names.contains(&expected), "missing volume {}", expected);
        }

        let template_volume = volumes
            .iter()
            .find(|v| v.name == "mysql-conf-template")
            .unwrap();
        assert_eq!(
            template_volume.config_map.as_ref().unwrap().name,
            "moco-c.0000abcd"
        );
    }

    #[test]
    fn test_termination_grace_period_defaulted() {
        let cluster = test_cluster("c", "ns", 3);
        let sts = statefulset::build_stateful_set(
            &cluster,
            "moco-c.0000abcd",
            None,
            &OperatorImages::default(),
        )
        .unwrap();
        assert_eq!(
            sts.spec
                .unwrap()
                .template
                .spec
                .unwrap()
                .termination_grace_period_seconds,
            Some(300)
        );

        let mut cluster = test_cluster("c", "ns", 3);
        cluster
            .spec
            .pod_template
            .spec
            .as_mut()
            .unwrap()
            .termination_grace_period_seconds = Some(30);
        let sts = statefulset::build_stateful_set(
            &cluster,
            "moco-c.0000abcd",
            None,
            &OperatorImages::default(),
        )
        .unwrap();
        assert_eq!(
            sts.spec
                .unwrap()
                .template
                .spec
                .unwrap()
                .termination_grace_period_seconds,
            Some(30)
        );
    }

    #[test]
    fn test_service_account_forced() {
        let mut cluster = test_cluster("c", "ns", 3);
        cluster
            .spec
            .pod_template
            .spec
            .as_mut()
            .unwrap()
            .service_account_name = Some("user-sa".to_string());

        let sts = statefulset::build_stateful_set(
            &cluster,
            "moco-c.0000abcd",
            None,
            &OperatorImages::default(),
        )
        .unwrap();
        assert_eq!(
            sts.spec
                .unwrap()
                .template
                .spec
                .unwrap()
                .service_account_name
                .as_deref(),
            Some("moco-c")
        );
    }

    #[test]
    fn test_missing_mysqld_container_fails() {
        let mut cluster = test_cluster("c", "ns", 3);
        cluster.spec.pod_template.spec.as_mut().unwrap().containers[0].name = "db".to_string();
        let result = statefulset::build_stateful_set(
            &cluster,
            "moco-c.0000abcd",
            None,
            &OperatorImages::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_reserved_volume_claim_name_fails() {
        let mut cluster = test_cluster("c", "ns", 3);
        cluster.spec.volume_claim_templates = vec![PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("grpc-cert".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }];
        let result = statefulset::build_stateful_set(
            &cluster,
            "moco-c.0000abcd",
            None,
            &OperatorImages::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_default_data_claim_added() {
        let cluster = test_cluster("c", "ns", 3);
        let sts = statefulset::build_stateful_set(
            &cluster,
            "moco-c.0000abcd",
            None,
            &OperatorImages::default(),
        )
        .unwrap();
        let claims = sts.spec.unwrap().volume_claim_templates.unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].metadata.name.as_deref(), Some("mysql-data"));
    }

    #[test]
    fn test_user_data_claim_passes_through() {
        let mut cluster = test_cluster("c", "ns", 3);
        cluster.spec.volume_claim_templates = vec![PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("mysql-data".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }];
        let sts = statefulset::build_stateful_set(
            &cluster,
            "moco-c.0000abcd",
            None,
            &OperatorImages::default(),
        )
        .unwrap();
        let claims = sts.spec.unwrap().volume_claim_templates.unwrap();
        assert_eq!(claims.len(), 1);
        // Ownership is stamped onto the user's template.
        assert!(claims[0].metadata.owner_references.is_some());
    }

    #[test]
    fn test_pod_template_is_byte_stable() {
        let mut cluster = test_cluster("c", "ns", 3);
        pin_generation(&mut cluster);

        let images = OperatorImages::default();
        let first =
            statefulset::build_stateful_set(&cluster, "moco-c.0000abcd", None, &images).unwrap();
        let second = statefulset::build_stateful_set(
            &cluster,
            "moco-c.0000abcd",
            Some(&first),
            &images,
        )
        .unwrap();

        let first_template = serde_json::to_string(&first.spec.as_ref().unwrap().template).unwrap();
        let second_template =
            serde_json::to_string(&second.spec.as_ref().unwrap().template).unwrap();
        assert_eq!(first_template, second_template);
    }

    #[test]
    fn test_slow_log_image_reused_while_generation_pinned() {
        let mut cluster = test_cluster("c", "ns", 3);
        pin_generation(&mut cluster);

        // The running StatefulSet carries an older sidecar image.
        let old_images = OperatorImages {
            fluent_bit_image: "ghcr.io/cybozu/fluent-bit:3.0.0.0".to_string(),
            ..OperatorImages::default()
        };
        let live =
            statefulset::build_stateful_set(&cluster, "moco-c.0000abcd", None, &old_images)
                .unwrap();

        // A newer operator ships a newer default, but the generation has not
        // advanced, so the live image must be kept.
        let new_images = OperatorImages::default();
        let rebuilt = statefulset::build_stateful_set(
            &cluster,
            "moco-c.0000abcd",
            Some(&live),
            &new_images,
        )
        .unwrap();
        let pod = rebuilt.spec.unwrap().template.spec.unwrap();
        let slow_log = pod.containers.iter().find(|c| c.name == "slow-log").unwrap();
        assert_eq!(
            slow_log.image.as_deref(),
            Some("ghcr.io/cybozu/fluent-bit:3.0.0.0")
        );
    }

    #[test]
    fn test_slow_log_image_updated_when_generation_advances() {
        let mut cluster = test_cluster("c", "ns", 3);
        pin_generation(&mut cluster);

        let old_images = OperatorImages {
            fluent_bit_image: "ghcr.io/cybozu/fluent-bit:3.0.0.0".to_string(),
            ..OperatorImages::default()
        };
        let live =
            statefulset::build_stateful_set(&cluster, "moco-c.0000abcd", None, &old_images)
                .unwrap();

        // A spec edit bumps the generation past the observed one.
        cluster.metadata.generation = Some(2);

        let new_images = OperatorImages::default();
        let rebuilt = statefulset::build_stateful_set(
            &cluster,
            "moco-c.0000abcd",
            Some(&live),
            &new_images,
        )
        .unwrap();
        let pod = rebuilt.spec.unwrap().template.spec.unwrap();
        let slow_log = pod.containers.iter().find(|c| c.name == "slow-log").unwrap();
        assert_eq!(slow_log.image.as_deref(), Some(new_images.fluent_bit_image.as_str()));
    }

    #[test]
    fn test_service_account() {
        let sa = statefulset::build_service_account(&test_cluster("c", "ns", 3));
        assert_eq!(sa.metadata.name.as_deref(), Some("moco-c"));
        assert!(sa.metadata.owner_references.is_some());
    }
}

mod service_tests {
    use super::*;

    #[test]
    fn test_three_services() {
        let cluster = test_cluster("c", "ns", 3);
        let headless = service::build_headless_service(&cluster);
        let primary = service::build_primary_service(&cluster, None);
        let replica = service::build_replica_service(&cluster, None);

        assert_eq!(headless.name_any(), "moco-c");
        assert_eq!(primary.name_any(), "moco-c-primary");
        assert_eq!(replica.name_any(), "moco-c-replica");
    }
}

mod pdb_tests {
    use super::*;

    #[test]
    fn test_pdb_thresholds() {
        assert!(pdb::build_pdb(&test_cluster("c", "ns", 1)).is_none());
        let three = pdb::build_pdb(&test_cluster("c", "ns", 3)).unwrap();
        assert_eq!(
            three.spec.unwrap().max_unavailable,
            Some(IntOrString::Int(1))
        );
        let five = pdb::build_pdb(&test_cluster("c", "ns", 5)).unwrap();
        assert_eq!(
            five.spec.unwrap().max_unavailable,
            Some(IntOrString::Int(2))
        );
    }
}
