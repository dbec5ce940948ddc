pub mod controller;
pub mod crd;
pub mod health;
pub mod mysql;
pub mod resources;

pub use controller::{error_policy, reconcile, Context, Error, Result};
pub use crd::{BackupPolicy, MySQLCluster};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};

use crate::crd::Certificate;
use crate::resources::common::parse_certificate_name;

/// Reconciliations run concurrently up to this limit; work for any single
/// cluster key is serialised by the runtime.
pub const MAX_CONCURRENT_RECONCILES: u16 = 8;

/// Run the operator controller
///
/// This is the main controller loop that watches MySQLCluster resources
/// and reconciles them. It can be called from main.rs or spawned as a
/// background task during integration tests.
pub async fn run_controller(ctx: Arc<Context>) {
    tracing::info!("Starting controller for MySQLCluster resources");

    let client: Client = ctx.client.clone();

    // Set up APIs for the controller
    let clusters: Api<MySQLCluster> = Api::all(client.clone());
    let statefulsets: Api<StatefulSet> = Api::all(client.clone());
    let services: Api<Service> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client.clone());
    let configmaps: Api<ConfigMap> = Api::all(client.clone());
    let service_accounts: Api<ServiceAccount> = Api::all(client.clone());
    let pdbs: Api<PodDisruptionBudget> = Api::all(client.clone());
    let cron_jobs: Api<CronJob> = Api::all(client.clone());
    let jobs: Api<Job> = Api::all(client.clone());
    let roles: Api<Role> = Api::all(client.clone());
    let role_bindings: Api<RoleBinding> = Api::all(client.clone());

    // Indirect inputs: issued certificates live in the operator namespace,
    // user ConfigMaps and BackupPolicies next to their clusters.
    let certificates: Api<Certificate> =
        Api::namespaced(client.clone(), &ctx.operator_namespace);
    let user_configmaps: Api<ConfigMap> = Api::all(client.clone());
    let backup_policies: Api<BackupPolicy> = Api::all(client.clone());

    let watcher_config = WatcherConfig::default().any_semantic();

    let controller = Controller::new(clusters, watcher_config.clone())
        .with_config(ControllerConfig::default().concurrency(MAX_CONCURRENT_RECONCILES));
    let store = controller.store();

    let operator_namespace = ctx.operator_namespace.clone();
    let configmap_store = store.clone();
    let policy_store = store;

    controller
        .owns(statefulsets, watcher_config.clone())
        .owns(services, watcher_config.clone())
        .owns(secrets, watcher_config.clone())
        .owns(configmaps, watcher_config.clone())
        .owns(service_accounts, watcher_config.clone())
        .owns(pdbs, watcher_config.clone())
        .owns(cron_jobs, watcher_config.clone())
        .owns(jobs, watcher_config.clone())
        .owns(roles, watcher_config.clone())
        .owns(role_bindings, watcher_config.clone())
        .watches(certificates, watcher_config.clone(), move |cert: Certificate| {
            // The issued certificate name encodes the cluster key.
            if cert.namespace().as_deref() != Some(operator_namespace.as_str()) {
                return None;
            }
            let (ns, name) = parse_certificate_name(&cert.name_any())?;
            Some(ObjectRef::new(&name).within(&ns))
        })
        .watches(user_configmaps, watcher_config.clone(), move |cm: ConfigMap| {
            let cm_namespace = cm.namespace().unwrap_or_default();
            let cm_name = cm.name_any();
            configmap_store
                .state()
                .into_iter()
                .filter(|cluster| {
                    cluster.namespace().as_deref() == Some(cm_namespace.as_str())
                        && cluster.spec.mysql_config_map_name.as_deref()
                            == Some(cm_name.as_str())
                })
                .map(|cluster| ObjectRef::from_obj(&*cluster))
                .collect::<Vec<_>>()
        })
        .watches(backup_policies, watcher_config, move |policy: BackupPolicy| {
            let policy_namespace = policy.namespace().unwrap_or_default();
            let policy_name = policy.name_any();
            policy_store
                .state()
                .into_iter()
                .filter(|cluster| {
                    cluster.namespace().as_deref() == Some(policy_namespace.as_str())
                        && cluster.spec.backup_policy_name.as_deref()
                            == Some(policy_name.as_str())
                })
                .map(|cluster| ObjectRef::from_obj(&*cluster))
                .collect::<Vec<_>>()
        })
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    tracing::error!("Reconciliation error: {:?}", e);
                }
            }
        })
        .await;

    // This should never complete in normal operation
    tracing::error!("Controller stream ended unexpectedly");
}
