//! Property-based tests for resource generation
//!
//! These tests use proptest to generate random configurations and verify:
//! 1. Valid specs always generate valid resources without panicking
//! 2. my.cnf generation is deterministic and honors the layer order
//! 3. The content-addressed name law holds for arbitrary configurations
//! 4. Credential projection round-trips through the master Secret

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use kube::core::ObjectMeta;
use kube::ResourceExt;
use proptest::prelude::*;

use moco_operator::controller::OperatorImages;
use moco_operator::crd::{BucketConfig, MySQLCluster};
use moco_operator::mysql::config::{fnv32a, generate_mycnf};
use moco_operator::resources::configmap::build_mycnf_config_map;
use moco_operator::resources::secret::{build_master_secret, MySQLCredentials};
use moco_operator::resources::{backup, statefulset};

fn cluster(name: &str, replicas: i32, collectors: Vec<String>) -> MySQLCluster {
    let mut cluster = MySQLCluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("ns".to_string()),
            uid: Some("uid".to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: Default::default(),
        status: None,
    };
    cluster.spec.replicas = replicas;
    cluster.spec.collectors = collectors;
    cluster.spec.pod_template = PodTemplateSpec {
        metadata: None,
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "mysqld".to_string(),
                image: Some("mysql:8.4".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }),
    };
    cluster
}

/// Valid odd replica counts
fn valid_replicas() -> impl Strategy<Value = i32> {
    (0..=7i32).prop_map(|n| n * 2 + 1)
}

fn collector_names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z_]{3,20}", 0..4)
}

fn mycnf_overrides() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-z_]{3,24}", "[a-zA-Z0-9_/.]{1,16}", 0..8)
}

fn hex_password() -> impl Strategy<Value = String> {
    "[0-9a-f]{32}"
}

fn bucket_config() -> impl Strategy<Value = BucketConfig> {
    (
        "[a-z0-9-]{3,20}",
        prop::option::of("[a-z0-9-]{2,12}"),
        prop::option::of("[a-z0-9:/.]{4,24}"),
        any::<bool>(),
    )
        .prop_map(|(bucket_name, region, endpoint_url, use_path_style)| BucketConfig {
            bucket_name,
            region: region.unwrap_or_default(),
            endpoint_url: endpoint_url.unwrap_or_default(),
            use_path_style,
        })
}

proptest! {
    #[test]
    fn statefulset_generation_never_panics(
        replicas in valid_replicas(),
        collectors in collector_names(),
    ) {
        let cluster = cluster("c", replicas, collectors.clone());
        let sts = statefulset::build_stateful_set(
            &cluster,
            "moco-c.0000abcd",
            None,
            &OperatorImages::default(),
        ).unwrap();

        let spec = sts.spec.unwrap();
        prop_assert_eq!(spec.replicas, Some(replicas));
        let containers = spec.template.spec.unwrap().containers;
        prop_assert_eq!(containers[0].name.as_str(), "mysqld");
        prop_assert_eq!(containers[1].name.as_str(), "agent");
        let has_exporter = containers.iter().any(|c| c.name == "mysqld-exporter");
        prop_assert_eq!(has_exporter, !collectors.is_empty());
    }

    #[test]
    fn mycnf_is_deterministic_and_layered(overrides in mycnf_overrides()) {
        let first = generate_mycnf(Some(1 << 30), Some(&overrides));
        let second = generate_mycnf(Some(1 << 30), Some(&overrides));
        prop_assert_eq!(&first, &second);

        // Operator constants always win over user overrides.
        prop_assert!(first.contains("datadir = /var/lib/mysql"));
        prop_assert!(first.contains("port = 3306"));
    }

    #[test]
    fn config_map_name_law(overrides in mycnf_overrides()) {
        let cluster = cluster("c", 3, vec![]);
        let mycnf = generate_mycnf(None, Some(&overrides));
        let cm = build_mycnf_config_map(&cluster, &mycnf);
        let name = cm.name_any();
        let digest = name.strip_prefix("moco-c.").unwrap();
        let content = cm.data.unwrap().get("my.cnf").unwrap().clone();
        prop_assert_eq!(
            u32::from_str_radix(digest, 16).unwrap(),
            fnv32a(content.as_bytes())
        );
    }

    #[test]
    fn credentials_round_trip(
        admin in hex_password(),
        agent in hex_password(),
        replication in hex_password(),
        clone_donor in hex_password(),
        exporter in hex_password(),
        backup_password in hex_password(),
        readonly in hex_password(),
        writable in hex_password(),
    ) {
        let credentials = MySQLCredentials {
            admin,
            agent,
            replication,
            clone_donor,
            exporter,
            backup: backup_password,
            readonly,
            writable,
        };
        let master = build_master_secret(&cluster("c", 3, vec![]), &credentials, "moco-system");
        let parsed = MySQLCredentials::from_secret(&master).unwrap();
        prop_assert_eq!(parsed, credentials);
    }

    #[test]
    fn bucket_args_shape(bucket in bucket_config()) {
        let args = backup::bucket_args(&bucket);
        // The bucket name is always last.
        prop_assert_eq!(args.last().unwrap(), &bucket.bucket_name);
        prop_assert_eq!(
            args.iter().any(|a| a == "--use-path-style"),
            bucket.use_path_style
        );
        prop_assert_eq!(
            args.iter().any(|a| a.starts_with("--region=")),
            !bucket.region.is_empty()
        );
        prop_assert_eq!(
            args.iter().any(|a| a.starts_with("--endpoint=")),
            !bucket.endpoint_url.is_empty()
        );
    }
}
