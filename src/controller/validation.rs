//! Validation of MySQLCluster specs
//!
//! Invalid specs fail the reconcile before any child object is written, so
//! a bad edit never leaves a cluster with partial children.

use crate::controller::error::{Error, Result};
use crate::crd::MySQLCluster;
use crate::resources::common::{MYSQLD_CONTAINER_NAME, RESERVED_VOLUME_NAMES};

/// Validate the cluster spec
pub fn validate_cluster(cluster: &MySQLCluster) -> Result<()> {
    validate_replicas(cluster)?;
    validate_mysqld_container(cluster)?;
    validate_volume_claim_templates(cluster)?;
    Ok(())
}

/// Replica count must be a positive odd number so the clustering manager
/// can always form a majority.
fn validate_replicas(cluster: &MySQLCluster) -> Result<()> {
    let replicas = cluster.spec.replicas;
    if replicas < 1 || replicas % 2 == 0 {
        return Err(Error::Validation(format!(
            "replicas must be a positive odd number, got {}",
            replicas
        )));
    }
    Ok(())
}

fn validate_mysqld_container(cluster: &MySQLCluster) -> Result<()> {
    let has_mysqld = cluster
        .spec
        .pod_template
        .spec
        .as_ref()
        .is_some_and(|spec| {
            spec.containers
                .iter()
                .any(|c| c.name == MYSQLD_CONTAINER_NAME)
        });
    if !has_mysqld {
        return Err(Error::Validation(format!(
            "podTemplate must contain a container named {}",
            MYSQLD_CONTAINER_NAME
        )));
    }
    Ok(())
}

fn validate_volume_claim_templates(cluster: &MySQLCluster) -> Result<()> {
    for template in &cluster.spec.volume_claim_templates {
        let name = template.metadata.name.as_deref().unwrap_or_default();
        if RESERVED_VOLUME_NAMES.contains(&name) {
            return Err(Error::Validation(format!(
                "volumeClaimTemplate name {} is reserved",
                name
            )));
        }
    }
    Ok(())
}
