//! StatefulSet generation
//!
//! The pod template is derived by deep-copying the user's template and
//! merging in the operator's contributions: reserved volumes, two init
//! containers, the augmented mysqld container, the agent, and the optional
//! slow query log and metrics exporter sidecars.
//!
//! Every part of the built pod spec is a pure function of the cluster spec,
//! the active my.cnf ConfigMap name, and (for the slow log image only) the
//! live StatefulSet. While the spec generation is unchanged the serialized
//! template must come out byte-identical on every build, or the API server
//! would roll all mysqld pods.

use k8s_openapi::api::apps::v1::{
    RollingUpdateStatefulSetStrategy, StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    ObjectFieldSelector, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec,
    PodTemplateSpec, SecretKeySelector, SecretVolumeSource, ServiceAccount, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;
use std::collections::BTreeMap;

use crate::controller::context::OperatorImages;
use crate::controller::error::{Error, Result};
use crate::crd::MySQLCluster;
use crate::resources::common::{
    self, cluster_labels, grpc_secret_name, headless_service_name, my_cnf_secret_name,
    owner_reference, service_account_name, slow_log_agent_config_map_name, stateful_set_name,
    user_secret_name, AGENT_CONTAINER_NAME, AGENT_PORT, CONF_GEN_CONTAINER_NAME,
    DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS, EXPORTER_CONTAINER_NAME, EXPORTER_PORT,
    FLUENT_BIT_CONFIG_PATH, GRPC_CERT_PATH, GRPC_CERT_VOLUME_NAME, INIT_CONTAINER_NAME,
    MYSQLD_CONTAINER_NAME, MYSQLX_PORT, MYSQLX_PORT_NAME, MYSQL_ADMIN_PORT, MYSQL_ADMIN_PORT_NAME,
    MYSQL_CONF_PATH, MYSQL_CONF_TEMPLATE_PATH, MYSQL_CONF_TEMPLATE_VOLUME_NAME,
    MYSQL_CONF_VOLUME_NAME, MYSQL_DATA_PATH, MYSQL_DATA_VOLUME_NAME, MYSQL_PORT, MYSQL_PORT_NAME,
    MY_CNF_NAME, MY_CNF_SECRET_PATH, MY_CNF_SECRET_VOLUME_NAME, RESERVED_VOLUME_NAMES, RUN_PATH,
    RUN_VOLUME_NAME, SLOW_LOG_CONFIG_VOLUME_NAME, SLOW_LOG_CONTAINER_NAME, TMP_PATH,
    TMP_VOLUME_NAME, VAR_LOG_PATH, VAR_LOG_VOLUME_NAME,
};
use crate::resources::secret::EXPORTER_PASSWORD_KEY;

/// Container names the operator appends; user templates must not use them.
const RESERVED_CONTAINER_NAMES: &[&str] = &[
    AGENT_CONTAINER_NAME,
    SLOW_LOG_CONTAINER_NAME,
    EXPORTER_CONTAINER_NAME,
    INIT_CONTAINER_NAME,
    CONF_GEN_CONTAINER_NAME,
];

/// Generate the ServiceAccount the mysqld pods run as.
pub fn build_service_account(cluster: &MySQLCluster) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(service_account_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(cluster_labels(cluster)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Generate the StatefulSet for a cluster.
///
/// `mycnf_config_map_name` is the name of the active content-addressed
/// ConfigMap; `live` is the currently deployed StatefulSet, if any.
pub fn build_stateful_set(
    cluster: &MySQLCluster,
    mycnf_config_map_name: &str,
    live: Option<&StatefulSet>,
    images: &OperatorImages,
) -> Result<StatefulSet> {
    let template = build_pod_template(cluster, mycnf_config_map_name, live, images)?;

    Ok(StatefulSet {
        metadata: ObjectMeta {
            name: Some(stateful_set_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(cluster_labels(cluster)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(cluster.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(cluster_labels(cluster)),
                ..Default::default()
            },
            service_name: headless_service_name(cluster),
            pod_management_policy: Some("Parallel".to_string()),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateStatefulSetStrategy::default()),
            }),
            template,
            volume_claim_templates: Some(build_volume_claim_templates(cluster)?),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn build_pod_template(
    cluster: &MySQLCluster,
    mycnf_config_map_name: &str,
    live: Option<&StatefulSet>,
    images: &OperatorImages,
) -> Result<PodTemplateSpec> {
    let user = &cluster.spec.pod_template;
    let user_spec = user.spec.clone().unwrap_or_default();

    for container in &user_spec.containers {
        if RESERVED_CONTAINER_NAMES.contains(&container.name.as_str()) {
            return Err(Error::Validation(format!(
                "container name {} is reserved",
                container.name
            )));
        }
    }
    for volume in user_spec.volumes.as_deref().unwrap_or_default() {
        if RESERVED_VOLUME_NAMES.contains(&volume.name.as_str()) {
            return Err(Error::Validation(format!(
                "volume name {} is reserved",
                volume.name
            )));
        }
    }

    let mysqld = user_spec
        .containers
        .iter()
        .find(|c| c.name == MYSQLD_CONTAINER_NAME)
        .ok_or_else(|| {
            Error::Validation(format!(
                "container named {} not found in podTemplate",
                MYSQLD_CONTAINER_NAME
            ))
        })?;
    let mysqld_image = mysqld.image.clone().unwrap_or_default();

    let mut containers = vec![
        build_mysqld_container(mysqld),
        build_agent_container(cluster, images),
    ];
    if !cluster.spec.disable_slow_query_log_container {
        containers.push(build_slow_log_container(cluster, live, images));
    }
    if !cluster.spec.collectors.is_empty() {
        containers.push(build_exporter_container(cluster, images));
    }
    containers.extend(
        user_spec
            .containers
            .iter()
            .filter(|c| c.name != MYSQLD_CONTAINER_NAME)
            .cloned(),
    );

    let mut init_containers = user_spec.init_containers.clone().unwrap_or_default();
    init_containers.push(build_conf_gen_init_container(&mysqld_image));
    init_containers.push(build_entrypoint_init_container(cluster, &mysqld_image));

    let mut volumes = user_spec.volumes.clone().unwrap_or_default();
    volumes.extend(operator_volumes(cluster, mycnf_config_map_name));

    let mut labels = user.metadata.as_ref().and_then(|m| m.labels.clone()).unwrap_or_default();
    labels.extend(cluster_labels(cluster));

    Ok(PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels),
            annotations: user.metadata.as_ref().and_then(|m| m.annotations.clone()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers,
            init_containers: Some(init_containers),
            volumes: Some(volumes),
            service_account_name: Some(service_account_name(cluster)),
            termination_grace_period_seconds: Some(
                user_spec
                    .termination_grace_period_seconds
                    .unwrap_or(DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS),
            ),
            ..user_spec
        }),
    })
}

/// The mysqld container: the user's container with the operator's args,
/// ports, and volume mounts merged in.
fn build_mysqld_container(orig: &Container) -> Container {
    let mut c = orig.clone();
    c.args = Some(vec![format!(
        "--defaults-file={}/{}",
        MYSQL_CONF_PATH, MY_CNF_NAME
    )]);
    c.ports = Some(vec![
        named_port(MYSQL_PORT_NAME, MYSQL_PORT),
        named_port(MYSQLX_PORT_NAME, MYSQLX_PORT),
        named_port(MYSQL_ADMIN_PORT_NAME, MYSQL_ADMIN_PORT),
    ]);
    let mut mounts = c.volume_mounts.unwrap_or_default();
    mounts.extend([
        mount(MYSQL_DATA_VOLUME_NAME, MYSQL_DATA_PATH),
        mount(MYSQL_CONF_VOLUME_NAME, MYSQL_CONF_PATH),
        mount(MY_CNF_SECRET_VOLUME_NAME, MY_CNF_SECRET_PATH),
        mount(RUN_VOLUME_NAME, RUN_PATH),
        mount(VAR_LOG_VOLUME_NAME, VAR_LOG_PATH),
        mount(TMP_VOLUME_NAME, TMP_PATH),
    ]);
    c.volume_mounts = Some(mounts);
    c
}

/// The moco-agent sidecar serving clone and log rotation over gRPC.
fn build_agent_container(cluster: &MySQLCluster, images: &OperatorImages) -> Container {
    Container {
        name: AGENT_CONTAINER_NAME.to_string(),
        image: Some(images.agent_image.clone()),
        ports: Some(vec![named_port("agent", AGENT_PORT)]),
        env: Some(vec![
            field_ref_env("POD_NAME", "metadata.name"),
            field_ref_env("POD_NAMESPACE", "metadata.namespace"),
            EnvVar {
                name: "CLUSTER_NAME".to_string(),
                value: Some(cluster.name_any()),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![
            mount(MYSQL_CONF_VOLUME_NAME, MYSQL_CONF_PATH),
            mount(MY_CNF_SECRET_VOLUME_NAME, MY_CNF_SECRET_PATH),
            mount(GRPC_CERT_VOLUME_NAME, GRPC_CERT_PATH),
            mount(RUN_VOLUME_NAME, RUN_PATH),
            mount(VAR_LOG_VOLUME_NAME, VAR_LOG_PATH),
            mount(TMP_VOLUME_NAME, TMP_PATH),
        ]),
        ..Default::default()
    }
}

/// The fluent-bit sidecar tailing the slow query log.
fn build_slow_log_container(
    cluster: &MySQLCluster,
    live: Option<&StatefulSet>,
    images: &OperatorImages,
) -> Container {
    Container {
        name: SLOW_LOG_CONTAINER_NAME.to_string(),
        image: Some(slow_log_image(cluster, live, images)),
        volume_mounts: Some(vec![
            mount(VAR_LOG_VOLUME_NAME, VAR_LOG_PATH),
            mount(SLOW_LOG_CONFIG_VOLUME_NAME, FLUENT_BIT_CONFIG_PATH),
        ]),
        ..Default::default()
    }
}

/// The slow log sidecar image.
///
/// While the spec generation is pinned, the image already running in the
/// live StatefulSet is reused so that an operator upgrade shipping a newer
/// default tag does not roll mysqld pods. The default applies again at the
/// next spec edit.
fn slow_log_image(
    cluster: &MySQLCluster,
    live: Option<&StatefulSet>,
    images: &OperatorImages,
) -> String {
    if cluster.generation_pinned() {
        let live_image = live
            .and_then(|sts| sts.spec.as_ref())
            .and_then(|spec| spec.template.spec.as_ref())
            .and_then(|pod| {
                pod.containers
                    .iter()
                    .find(|c| c.name == SLOW_LOG_CONTAINER_NAME)
            })
            .and_then(|c| c.image.clone());
        if let Some(image) = live_image {
            return image;
        }
    }
    images.fluent_bit_image.clone()
}

/// The mysqld_exporter sidecar, emitted iff collectors are configured.
fn build_exporter_container(cluster: &MySQLCluster, images: &OperatorImages) -> Container {
    let args = cluster
        .spec
        .collectors
        .iter()
        .map(|c| format!("--collect.{}", c))
        .collect();
    Container {
        name: EXPORTER_CONTAINER_NAME.to_string(),
        image: Some(images.exporter_image.clone()),
        args: Some(args),
        ports: Some(vec![named_port("metrics", EXPORTER_PORT)]),
        env: Some(vec![EnvVar {
            name: "MYSQLD_EXPORTER_PASSWORD".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: user_secret_name(cluster),
                    key: EXPORTER_PASSWORD_KEY.to_string(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![
            mount(RUN_VOLUME_NAME, RUN_PATH),
            mount(TMP_VOLUME_NAME, TMP_PATH),
        ]),
        ..Default::default()
    }
}

/// Init container rendering the per-pod my.cnf from the mounted template.
fn build_conf_gen_init_container(mysqld_image: &str) -> Container {
    Container {
        name: CONF_GEN_CONTAINER_NAME.to_string(),
        image: Some(mysqld_image.to_string()),
        command: Some(vec![
            "/moco-conf-gen".to_string(),
            format!("--source={}/{}", MYSQL_CONF_TEMPLATE_PATH, MY_CNF_NAME),
            format!("--dest={}/{}", MYSQL_CONF_PATH, MY_CNF_NAME),
        ]),
        env: Some(vec![
            field_ref_env("POD_NAME", "metadata.name"),
            field_ref_env("POD_NAMESPACE", "metadata.namespace"),
            field_ref_env("POD_IP", "status.podIP"),
            field_ref_env("NODE_NAME", "spec.nodeName"),
        ]),
        volume_mounts: Some(vec![
            mount(MYSQL_CONF_VOLUME_NAME, MYSQL_CONF_PATH),
            mount(MYSQL_CONF_TEMPLATE_VOLUME_NAME, MYSQL_CONF_TEMPLATE_PATH),
        ]),
        ..Default::default()
    }
}

/// Init container initialising the MySQL data directory.
fn build_entrypoint_init_container(cluster: &MySQLCluster, mysqld_image: &str) -> Container {
    let mut env = vec![
        field_ref_env("POD_NAME", "metadata.name"),
        field_ref_env("POD_IP", "status.podIP"),
    ];
    if let Some(base) = cluster.spec.server_id_base {
        env.push(EnvVar {
            name: "SERVER_ID_BASE".to_string(),
            value: Some(base.to_string()),
            ..Default::default()
        });
    }
    Container {
        name: INIT_CONTAINER_NAME.to_string(),
        image: Some(mysqld_image.to_string()),
        command: Some(vec!["/moco-init".to_string()]),
        env: Some(env),
        volume_mounts: Some(vec![
            mount(MYSQL_DATA_VOLUME_NAME, MYSQL_DATA_PATH),
            mount(MYSQL_CONF_VOLUME_NAME, MYSQL_CONF_PATH),
            mount(RUN_VOLUME_NAME, RUN_PATH),
            mount(VAR_LOG_VOLUME_NAME, VAR_LOG_PATH),
            mount(TMP_VOLUME_NAME, TMP_PATH),
        ]),
        ..Default::default()
    }
}

/// Volumes the operator always adds to the pod.
fn operator_volumes(cluster: &MySQLCluster, mycnf_config_map_name: &str) -> Vec<Volume> {
    let mut volumes = vec![
        empty_dir_volume(TMP_VOLUME_NAME),
        empty_dir_volume(RUN_VOLUME_NAME),
        empty_dir_volume(VAR_LOG_VOLUME_NAME),
        empty_dir_volume(MYSQL_CONF_VOLUME_NAME),
        Volume {
            name: MYSQL_CONF_TEMPLATE_VOLUME_NAME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: mycnf_config_map_name.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: MY_CNF_SECRET_VOLUME_NAME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(my_cnf_secret_name(cluster)),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: GRPC_CERT_VOLUME_NAME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(grpc_secret_name(cluster)),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];
    if !cluster.spec.disable_slow_query_log_container {
        volumes.push(Volume {
            name: SLOW_LOG_CONFIG_VOLUME_NAME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: slow_log_agent_config_map_name(cluster),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    volumes
}

/// User claim templates, plus a default data claim when none is given.
/// Names colliding with operator-reserved volumes fail validation.
fn build_volume_claim_templates(cluster: &MySQLCluster) -> Result<Vec<PersistentVolumeClaim>> {
    let mut templates = Vec::with_capacity(cluster.spec.volume_claim_templates.len() + 1);
    let mut has_data_claim = false;

    for template in &cluster.spec.volume_claim_templates {
        let name = template.metadata.name.clone().unwrap_or_default();
        if RESERVED_VOLUME_NAMES.contains(&name.as_str()) {
            return Err(Error::Validation(format!(
                "volumeClaimTemplate name {} is reserved",
                name
            )));
        }
        has_data_claim = has_data_claim || name == MYSQL_DATA_VOLUME_NAME;

        let mut claim = template.clone();
        common::merge_labels(&mut claim.metadata, cluster_labels(cluster));
        claim.metadata.owner_references = Some(vec![owner_reference(cluster)]);
        templates.push(claim);
    }

    if !has_data_claim {
        templates.push(PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(MYSQL_DATA_VOLUME_NAME.to_string()),
                labels: Some(cluster_labels(cluster)),
                owner_references: Some(vec![owner_reference(cluster)]),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity("1Gi".to_string()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    Ok(templates)
}

/// emptyDir with every field unset, so the server echoes it back unchanged
/// and equality comparison against the live object holds.
fn empty_dir_volume(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn named_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn field_ref_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
