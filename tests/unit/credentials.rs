//! Unit tests for credential projection

use kube::ResourceExt;

use moco_operator::resources::secret::{
    build_master_secret, build_my_cnf_secret, build_user_secret, MySQLCredentials,
};

use crate::common::test_cluster;

#[test]
fn test_master_secret_shape() {
    let cluster = test_cluster("c", "ns", 3);
    let credentials = MySQLCredentials::generate();
    let master = build_master_secret(&cluster, &credentials, "moco-system");

    assert_eq!(master.name_any(), "ns.c");
    assert_eq!(master.metadata.namespace.as_deref(), Some("moco-system"));
    // Cross-namespace: no owner reference, disambiguating namespace label.
    assert!(master.metadata.owner_references.is_none());
    assert_eq!(
        master
            .metadata
            .labels
            .as_ref()
            .unwrap()
            .get("app.kubernetes.io/instance-namespace"),
        Some(&"ns".to_string())
    );
}

#[test]
fn test_derivatives_are_owned() {
    let cluster = test_cluster("c", "ns", 3);
    let credentials = MySQLCredentials::generate();

    let user = build_user_secret(&cluster, &credentials);
    assert_eq!(user.name_any(), "moco-c");
    assert!(user.metadata.owner_references.is_some());

    let my_cnf = build_my_cnf_secret(&cluster, &credentials);
    assert_eq!(my_cnf.name_any(), "moco-my-cnf-c");
    assert!(my_cnf.metadata.owner_references.is_some());
}

#[test]
fn test_round_trip_law() {
    // bundle -> master secret -> re-derive: the derivative secrets' data
    // equals the direct projection of the in-memory bundle.
    let cluster = test_cluster("c", "ns", 3);
    let credentials = MySQLCredentials::generate();

    let master = build_master_secret(&cluster, &credentials, "moco-system");
    let parsed = MySQLCredentials::from_secret(&master).unwrap();
    assert_eq!(parsed, credentials);

    let direct_user = build_user_secret(&cluster, &credentials);
    let derived_user = build_user_secret(&cluster, &parsed);
    assert_eq!(direct_user.data, derived_user.data);

    let direct_my_cnf = build_my_cnf_secret(&cluster, &credentials);
    let derived_my_cnf = build_my_cnf_secret(&cluster, &parsed);
    assert_eq!(direct_my_cnf.data, derived_my_cnf.data);
}

#[test]
fn test_user_and_master_carry_identical_passwords() {
    let cluster = test_cluster("c", "ns", 3);
    let credentials = MySQLCredentials::generate();
    let master = build_master_secret(&cluster, &credentials, "moco-system");
    let user = build_user_secret(&cluster, &credentials);
    assert_eq!(master.data, user.data);
}
