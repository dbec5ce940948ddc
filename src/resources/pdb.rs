//! PodDisruptionBudget generation
//!
//! Clusters with three or more instances get a budget allowing up to half
//! of them (integer division) to be disrupted at once. Smaller clusters get
//! none: evicting the only instance, or one of two, is an availability
//! decision the operator leaves to the administrator.

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;
use kube::ResourceExt;

use crate::crd::MySQLCluster;
use crate::resources::common::{cluster_labels, owner_reference, pdb_name};

/// Generate the PodDisruptionBudget for a cluster.
///
/// Returns None when `replicas < 3`; the caller deletes any existing budget
/// in that case.
pub fn build_pdb(cluster: &MySQLCluster) -> Option<PodDisruptionBudget> {
    let replicas = cluster.spec.replicas;
    if replicas < 3 {
        return None;
    }

    Some(PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(pdb_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(cluster_labels(cluster)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(replicas / 2)),
            selector: Some(LabelSelector {
                match_labels: Some(cluster_labels(cluster)),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}
