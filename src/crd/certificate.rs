//! cert-manager Certificate resource
//!
//! A typed view over the fields of cert-manager's Certificate CRD that the
//! operator reads and writes. cert-manager provisions a TLS certificate and
//! stores it in a Secret named `spec.secretName`.
//!
//! Reference: https://cert-manager.io/docs/concepts/certificate/

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Certificate spec for cert-manager
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Certificate",
    plural = "certificates",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    /// Name of the Secret cert-manager stores the issued certificate in.
    pub secret_name: String,

    /// Reference to the issuer (Issuer or ClusterIssuer).
    pub issuer_ref: IssuerRef,

    /// DNS names to include in the certificate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_names: Vec<String>,

    /// Usages for the certificate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub usages: Vec<String>,
}

/// Reference to a cert-manager issuer
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuerRef {
    pub name: String,
    pub kind: String,
    pub group: String,
}
