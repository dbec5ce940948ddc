//! ConfigMap generation
//!
//! The my.cnf ConfigMap is content-addressed: its name embeds the FNV-32a
//! digest of the rendered text, so changing the configuration creates a new
//! object and any StatefulSet still pointing at the old one keeps working
//! until it is re-rolled. Superseded versions are garbage-collected after
//! the new one is applied.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::core::ObjectMeta;
use kube::ResourceExt;

use crate::crd::MySQLCluster;
use crate::mysql::config::mycnf_config_map_name;
use crate::resources::common::{
    cluster_labels, my_cnf_config_map_prefix, owner_reference, slow_log_agent_config_map_name,
    MY_CNF_NAME, VAR_LOG_PATH,
};

/// fluent-bit pipeline tailing the slow query log to stdout.
const FLUENT_BIT_CONFIG_KEY: &str = "fluent-bit.conf";

fn fluent_bit_config() -> String {
    format!(
        r#"[SERVICE]
    Log_Level      error

[INPUT]
    Name           tail
    Path           {}/mysql.slow
    Read_from_Head true

[OUTPUT]
    Name           file
    Match          *
    Path           /dev
    File           stdout
    Format         template
    Template       {{log}}
"#,
        VAR_LOG_PATH
    )
}

/// Build the active my.cnf ConfigMap for the rendered configuration.
pub fn build_mycnf_config_map(cluster: &MySQLCluster, mycnf: &str) -> ConfigMap {
    let prefix = my_cnf_config_map_prefix(cluster);
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(mycnf_config_map_name(&prefix, mycnf)),
            namespace: cluster.namespace(),
            labels: Some(cluster_labels(cluster)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            MY_CNF_NAME.to_string(),
            mycnf.to_string(),
        )])),
        ..Default::default()
    }
}

/// Whether a ConfigMap name denotes a superseded my.cnf version.
pub fn is_stale_mycnf(name: &str, prefix: &str, active: &str) -> bool {
    name.starts_with(prefix) && name != active
}

/// Build the slow query log agent ConfigMap.
pub fn build_slow_log_agent_config_map(cluster: &MySQLCluster) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(slow_log_agent_config_map_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(cluster_labels(cluster)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            FLUENT_BIT_CONFIG_KEY.to_string(),
            fluent_bit_config(),
        )])),
        ..Default::default()
    }
}
