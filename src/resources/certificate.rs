//! Agent certificate request and gRPC Secret projection
//!
//! A cert-manager Certificate is requested in the operator's own namespace
//! for each cluster; cert-manager stores the issued certificate in a Secret
//! of the same name there. The reconciler copies that Secret into the
//! cluster namespace so the agent sidecar can mount it.
//!
//! Neither the Certificate nor its issued Secret can carry an owner
//! reference to the cluster (owner references do not cross namespaces), so
//! both are deleted explicitly by the finalizer.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::core::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{Certificate, CertificateSpec, IssuerRef, MySQLCluster};
use crate::resources::common::{
    certificate_name, cluster_labels, controller_labels, grpc_secret_name, headless_service_name,
    owner_reference,
};

/// Issuer shared by all agent certificates, deployed with the operator.
const ISSUER_NAME: &str = "moco-agent-ca";

const TLS_CERT_KEY: &str = "tls.crt";
const TLS_KEY_KEY: &str = "tls.key";
const CA_CERT_KEY: &str = "ca.crt";

/// Generate the Certificate requesting an agent TLS pair from cert-manager.
pub fn build_agent_certificate(cluster: &MySQLCluster, operator_namespace: &str) -> Certificate {
    let name = certificate_name(cluster);
    let headless = headless_service_name(cluster);
    let ns = cluster.namespace().unwrap_or_default();

    Certificate {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(operator_namespace.to_string()),
            labels: Some(controller_labels(cluster)),
            ..Default::default()
        },
        spec: CertificateSpec {
            secret_name: name,
            issuer_ref: IssuerRef {
                name: ISSUER_NAME.to_string(),
                kind: "Issuer".to_string(),
                group: "cert-manager.io".to_string(),
            },
            dns_names: vec![
                format!("{}.{}.svc", headless, ns),
                format!("{}.{}.svc.cluster.local", headless, ns),
                format!("*.{}.{}.svc", headless, ns),
                format!("*.{}.{}.svc.cluster.local", headless, ns),
            ],
            usages: vec!["server auth".to_string(), "client auth".to_string()],
        },
    }
}

/// Project the issued certificate Secret into the cluster namespace.
pub fn build_grpc_secret(cluster: &MySQLCluster, issued: &Secret) -> Secret {
    let mut data = BTreeMap::new();
    if let Some(issued_data) = &issued.data {
        for key in [TLS_CERT_KEY, TLS_KEY_KEY, CA_CERT_KEY] {
            if let Some(value) = issued_data.get(key) {
                data.insert(key.to_string(), ByteString(value.0.clone()));
            }
        }
    }

    Secret {
        metadata: ObjectMeta {
            name: Some(grpc_secret_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(cluster_labels(cluster)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(data),
        ..Default::default()
    }
}
