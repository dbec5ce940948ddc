//! Unit tests for my.cnf generation and content addressing

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;

use moco_operator::mysql::config::{fnv32a, generate_mycnf, mysqld_memory_bytes};
use moco_operator::resources::configmap::{build_mycnf_config_map, is_stale_mycnf};

use crate::common::test_cluster;

fn set_mysqld_memory(cluster: &mut moco_operator::crd::MySQLCluster, requests: Option<&str>, limits: Option<&str>) {
    let resources = ResourceRequirements {
        requests: requests.map(|q| {
            BTreeMap::from([("memory".to_string(), Quantity(q.to_string()))])
        }),
        limits: limits.map(|q| BTreeMap::from([("memory".to_string(), Quantity(q.to_string()))])),
        ..Default::default()
    };
    cluster.spec.pod_template.spec.as_mut().unwrap().containers[0].resources = Some(resources);
}

#[test]
fn test_requests_preferred_over_limits() {
    let mut cluster = test_cluster("c", "ns", 3);
    set_mysqld_memory(&mut cluster, Some("256Mi"), Some("1Gi"));
    assert_eq!(mysqld_memory_bytes(&cluster), Some(256 << 20));

    let mut cluster = test_cluster("c", "ns", 3);
    set_mysqld_memory(&mut cluster, None, Some("1Gi"));
    assert_eq!(mysqld_memory_bytes(&cluster), Some(1 << 30));

    let cluster = test_cluster("c", "ns", 3);
    assert_eq!(mysqld_memory_bytes(&cluster), None);
}

#[test]
fn test_buffer_pool_scenario() {
    // 256Mi of memory tunes the buffer pool to ~70%, rounded down to MiB.
    let mut cluster = test_cluster("c", "ns", 3);
    set_mysqld_memory(&mut cluster, Some("256Mi"), None);
    let mycnf = generate_mycnf(mysqld_memory_bytes(&cluster), None);
    assert!(mycnf.contains("innodb_buffer_pool_size = 179M"));

    // Below the mysqld default there is no directive at all.
    let mut cluster = test_cluster("c", "ns", 3);
    set_mysqld_memory(&mut cluster, Some("64Mi"), None);
    let mycnf = generate_mycnf(mysqld_memory_bytes(&cluster), None);
    assert!(!mycnf.contains("innodb_buffer_pool_size"));
}

#[test]
fn test_generate_hash_name_law() {
    // Generate -> hash -> name: the active ConfigMap name always matches
    // the digest of its own content.
    let cluster = test_cluster("c", "ns", 3);
    for user in [
        None,
        Some(BTreeMap::from([(
            "max_connections".to_string(),
            "5000".to_string(),
        )])),
    ] {
        let mycnf = generate_mycnf(None, user.as_ref());
        let cm = build_mycnf_config_map(&cluster, &mycnf);
        let name = cm.name_any();
        let digest = name.strip_prefix("moco-c.").unwrap();
        let stored = cm.data.unwrap().get("my.cnf").unwrap().clone();
        assert_eq!(
            u32::from_str_radix(digest, 16).unwrap(),
            fnv32a(stored.as_bytes())
        );
    }
}

#[test]
fn test_override_changes_digest() {
    let cluster = test_cluster("c", "ns", 3);
    let plain = build_mycnf_config_map(&cluster, &generate_mycnf(None, None));
    let user = BTreeMap::from([("max_connections".to_string(), "5000".to_string())]);
    let tuned = build_mycnf_config_map(&cluster, &generate_mycnf(None, Some(&user)));

    let plain_name = plain.name_any();
    let tuned_name = tuned.name_any();
    assert_ne!(plain_name, tuned_name);
    // The superseded name is recognised as stale, the active one is not.
    assert!(is_stale_mycnf(&plain_name, "moco-c.", &tuned_name));
    assert!(!is_stale_mycnf(&tuned_name, "moco-c.", &tuned_name));
}
