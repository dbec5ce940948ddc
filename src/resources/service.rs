//! Service generation
//!
//! Three Services are reconciled per cluster: a headless Service backing
//! stable pod DNS for the StatefulSet, and primary/replica Services whose
//! selectors include the role label maintained by the clustering manager.
//!
//! User ServiceTemplates are merged in first; the operator then forces the
//! mysql and mysqlx ports and the selector. NodePort values allocated by
//! the API server are read back from the live object so re-applies do not
//! reallocate them.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{MySQLCluster, ServiceTemplate};
use crate::resources::common::{
    cluster_labels, headless_service_name, owner_reference, primary_selector,
    primary_service_name, replica_selector, replica_service_name, MYSQLX_PORT, MYSQLX_PORT_NAME,
    MYSQL_PORT, MYSQL_PORT_NAME,
};

/// Generate the headless Service used by the StatefulSet for pod DNS.
///
/// Not-ready addresses are published so that pods can resolve each other
/// while mysqld is still initialising.
pub fn build_headless_service(cluster: &MySQLCluster) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(headless_service_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(cluster_labels(cluster)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(cluster_labels(cluster)),
            ports: Some(mysql_ports(None)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the Service routing to the current primary.
pub fn build_primary_service(cluster: &MySQLCluster, live: Option<&Service>) -> Service {
    build_role_service(
        cluster,
        primary_service_name(cluster),
        primary_selector(cluster),
        cluster.spec.primary_service_template.as_ref(),
        live,
    )
}

/// Generate the Service routing to replicas.
pub fn build_replica_service(cluster: &MySQLCluster, live: Option<&Service>) -> Service {
    build_role_service(
        cluster,
        replica_service_name(cluster),
        replica_selector(cluster),
        cluster.spec.replica_service_template.as_ref(),
        live,
    )
}

fn build_role_service(
    cluster: &MySQLCluster,
    name: String,
    selector: BTreeMap<String, String>,
    template: Option<&ServiceTemplate>,
    live: Option<&Service>,
) -> Service {
    let mut labels = cluster_labels(cluster);
    let mut annotations = BTreeMap::new();
    let mut spec = ServiceSpec::default();

    // User template first; mandatory fields are forced afterwards.
    if let Some(template) = template {
        if let Some(user_labels) = &template.labels {
            labels.extend(user_labels.clone());
        }
        if let Some(user_annotations) = &template.annotations {
            annotations.extend(user_annotations.clone());
        }
        if let Some(user_spec) = &template.spec {
            spec = user_spec.clone();
        }
    }

    spec.selector = Some(selector);
    spec.ports = Some(mysql_ports(live));

    Service {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: cluster.namespace(),
            labels: Some(labels),
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(annotations)
            },
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    }
}

/// The mandatory mysql/mysqlx ports, targeted by container port name.
/// NodePorts already allocated on the live Service are carried over.
fn mysql_ports(live: Option<&Service>) -> Vec<ServicePort> {
    vec![
        ServicePort {
            name: Some(MYSQL_PORT_NAME.to_string()),
            port: MYSQL_PORT,
            protocol: Some("TCP".to_string()),
            target_port: Some(IntOrString::String(MYSQL_PORT_NAME.to_string())),
            node_port: live_node_port(live, MYSQL_PORT_NAME),
            ..Default::default()
        },
        ServicePort {
            name: Some(MYSQLX_PORT_NAME.to_string()),
            port: MYSQLX_PORT,
            protocol: Some("TCP".to_string()),
            target_port: Some(IntOrString::String(MYSQLX_PORT_NAME.to_string())),
            node_port: live_node_port(live, MYSQLX_PORT_NAME),
            ..Default::default()
        },
    ]
}

fn live_node_port(live: Option<&Service>, port_name: &str) -> Option<i32> {
    live?
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .iter()
        .find(|p| p.name.as_deref() == Some(port_name))?
        .node_port
}
