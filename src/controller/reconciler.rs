//! Reconciliation logic for MySQLCluster resources
//!
//! The dispatcher selects a reconciler version, runs the fixed sequence of
//! steps, and records the observed generation in the status subresource on
//! success. The version recorded there keeps being used until the spec
//! generation advances, so upgrading the operator never rolls mysqld pods
//! of untouched clusters.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use tracing::{debug, error, info, instrument};

use crate::controller::apply::{apply_ssa, delete_ignore_not_found, update_or_create};
use crate::controller::clustering::ClusterKey;
use crate::controller::context::Context;
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::validation::validate_cluster;
use crate::crd::{BackupPolicy, Certificate, MySQLCluster};
use crate::mysql::config::{generate_mycnf, mysqld_memory_bytes};
use crate::resources::common::{self, FINALIZER};
use crate::resources::secret::MySQLCredentials;
use crate::resources::{backup, certificate, configmap, pdb, restore, secret, service, statefulset};

/// The newest reconciler version. Breaking changes to the generated pod
/// template get a new version beside this one; existing clusters keep the
/// version recorded in their status until the next spec edit.
pub const CURRENT_RECONCILE_VERSION: i32 = 1;

/// Default requeue interval after a successful reconcile.
const REQUEUE_INTERVAL: Duration = Duration::from_secs(600);

/// Pick the reconciler version for this pass.
pub fn select_reconciler_version(cluster: &MySQLCluster) -> i32 {
    if cluster.generation_pinned() {
        let pinned = cluster
            .status
            .as_ref()
            .map(|s| s.reconcile_info.reconcile_version)
            .unwrap_or(0);
        if pinned > 0 {
            return pinned;
        }
    }
    CURRENT_RECONCILE_VERSION
}

/// Main reconciliation function
#[instrument(skip(cluster, ctx), fields(name = %cluster.name_any(), namespace = cluster.namespace().unwrap_or_default()))]
pub async fn reconcile(cluster: Arc<MySQLCluster>, ctx: Arc<Context>) -> Result<Action> {
    let ns = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    let start = Instant::now();

    if cluster.metadata.deletion_timestamp.is_some() {
        return finalize(&cluster, &ctx, &ns).await;
    }

    if !has_finalizer(&cluster) {
        add_finalizer(&cluster, &ctx, &ns).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    if let Err(e) = validate_cluster(&cluster) {
        ctx.publish_warning_event(&cluster, "InvalidSpec", "Reconcile", Some(e.to_string()))
            .await;
        ctx.record_error(&ns, &name);
        return Err(e);
    }

    let version = select_reconciler_version(&cluster);
    debug!("reconciling with version {}", version);

    let result = match version {
        1 => reconcile_v1(&cluster, &ctx, &ns).await,
        v => Err(Error::InvalidConfig(format!(
            "unknown reconciler version {}",
            v
        ))),
    };

    match result {
        Ok(()) => {
            if !cluster.generation_pinned() {
                record_reconcile_info(&cluster, &ctx, &ns, version).await?;
            }
            ctx.manager.update(&ClusterKey::from_cluster(&cluster));
            ctx.record_reconcile(&ns, &name, start.elapsed().as_secs_f64());
            info!("Reconciliation completed successfully");
            Ok(Action::requeue(REQUEUE_INTERVAL))
        }
        Err(e) => {
            error!("Reconciliation failed: {}", e);
            ctx.publish_warning_event(&cluster, "ReconcileFailed", "Reconcile", Some(e.to_string()))
                .await;
            ctx.record_error(&ns, &name);
            Err(e)
        }
    }
}

/// Error policy for the controller with exponential backoff
pub fn error_policy(cluster: Arc<MySQLCluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    let backoff = BackoffConfig::default();
    let delay = backoff.delay_for_error(error, 0);
    tracing::warn!(
        "requeuing {} in {:?} after error: {}",
        cluster.name_any(),
        delay,
        error
    );
    Action::requeue(delay)
}

/// The declarative v1 reconciler. Steps run in a fixed order and stop on
/// the first error; each step's effects are visible to the next through the
/// API server.
async fn reconcile_v1(cluster: &MySQLCluster, ctx: &Context, ns: &str) -> Result<()> {
    reconcile_credentials(cluster, ctx, ns).await?;
    reconcile_certificate(cluster, ctx).await?;
    reconcile_grpc_secret(cluster, ctx, ns).await?;
    let mycnf_name = reconcile_mycnf_config_map(cluster, ctx, ns).await?;
    reconcile_slow_log_config_map(cluster, ctx, ns).await?;
    reconcile_service_account(cluster, ctx, ns).await?;
    reconcile_services(cluster, ctx, ns).await?;
    reconcile_stateful_set(cluster, ctx, ns, &mycnf_name).await?;
    reconcile_pdb(cluster, ctx, ns).await?;
    reconcile_backup(cluster, ctx, ns).await?;
    reconcile_restore(cluster, ctx, ns).await?;
    Ok(())
}

/// Ensure the master Secret and its two projections.
///
/// The master is created once and read back afterwards; its contents never
/// rotate here. The projections are rewritten only when they diverge.
async fn reconcile_credentials(cluster: &MySQLCluster, ctx: &Context, ns: &str) -> Result<()> {
    let master_api: Api<Secret> = Api::namespaced(ctx.client.clone(), &ctx.operator_namespace);
    let master_name = common::controller_secret_name(cluster);

    let credentials = match master_api.get_opt(&master_name).await? {
        Some(master) => MySQLCredentials::from_secret(&master)?,
        None => {
            let credentials = MySQLCredentials::generate();
            let master =
                secret::build_master_secret(cluster, &credentials, &ctx.operator_namespace);
            master_api.create(&PostParams::default(), &master).await?;
            info!("created master secret {}", master_name);
            credentials
        }
    };

    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), ns);
    update_or_create(&secrets, &secret::build_user_secret(cluster, &credentials)).await?;
    update_or_create(&secrets, &secret::build_my_cnf_secret(cluster, &credentials)).await?;
    Ok(())
}

/// Request the agent certificate from cert-manager.
async fn reconcile_certificate(cluster: &MySQLCluster, ctx: &Context) -> Result<()> {
    let api: Api<Certificate> = Api::namespaced(ctx.client.clone(), &ctx.operator_namespace);
    let cert = certificate::build_agent_certificate(cluster, &ctx.operator_namespace);
    update_or_create(&api, &cert).await?;
    Ok(())
}

/// Copy the issued certificate Secret into the cluster namespace.
async fn reconcile_grpc_secret(cluster: &MySQLCluster, ctx: &Context, ns: &str) -> Result<()> {
    let issued_api: Api<Secret> = Api::namespaced(ctx.client.clone(), &ctx.operator_namespace);
    let cert_name = common::certificate_name(cluster);
    let issued = issued_api.get_opt(&cert_name).await?.ok_or_else(|| {
        Error::MissingPrerequisite(format!("certificate secret {} is not issued yet", cert_name))
    })?;

    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), ns);
    update_or_create(&secrets, &certificate::build_grpc_secret(cluster, &issued)).await?;
    Ok(())
}

/// Render my.cnf, apply the content-addressed ConfigMap, and collect every
/// superseded version. Returns the active ConfigMap name.
async fn reconcile_mycnf_config_map(
    cluster: &MySQLCluster,
    ctx: &Context,
    ns: &str,
) -> Result<String> {
    let api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), ns);

    let user_data = match &cluster.spec.mysql_config_map_name {
        Some(name) => {
            let cm = api.get_opt(name).await?.ok_or_else(|| {
                Error::MissingPrerequisite(format!("user ConfigMap {}/{}", ns, name))
            })?;
            cm.data
        }
        None => None,
    };

    let mycnf = generate_mycnf(mysqld_memory_bytes(cluster), user_data.as_ref());
    let config_map = configmap::build_mycnf_config_map(cluster, &mycnf);
    let active = config_map.name_any();
    update_or_create(&api, &config_map).await?;

    let prefix = common::my_cnf_config_map_prefix(cluster);
    let stale: Vec<String> = api
        .list(&ListParams::default())
        .await?
        .items
        .into_iter()
        .map(|cm| cm.name_any())
        .filter(|name| configmap::is_stale_mycnf(name, &prefix, &active))
        .collect();
    for name in stale {
        delete_ignore_not_found(&api, &name).await?;
        info!("deleted stale my.cnf ConfigMap {}", name);
    }

    Ok(active)
}

async fn reconcile_slow_log_config_map(
    cluster: &MySQLCluster,
    ctx: &Context,
    ns: &str,
) -> Result<()> {
    let api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), ns);
    if cluster.spec.disable_slow_query_log_container {
        delete_ignore_not_found(&api, &common::slow_log_agent_config_map_name(cluster)).await?;
    } else {
        update_or_create(&api, &configmap::build_slow_log_agent_config_map(cluster)).await?;
    }
    Ok(())
}

async fn reconcile_service_account(cluster: &MySQLCluster, ctx: &Context, ns: &str) -> Result<()> {
    let api: Api<ServiceAccount> = Api::namespaced(ctx.client.clone(), ns);
    update_or_create(&api, &statefulset::build_service_account(cluster)).await?;
    Ok(())
}

/// Reconcile the headless, primary and replica Services with server-side
/// apply. The live objects are read first so that allocated NodePorts
/// survive and unchanged Services are not written.
async fn reconcile_services(cluster: &MySQLCluster, ctx: &Context, ns: &str) -> Result<()> {
    let api: Api<Service> = Api::namespaced(ctx.client.clone(), ns);

    let live = api.get_opt(&common::headless_service_name(cluster)).await?;
    apply_ssa(&api, &service::build_headless_service(cluster), live.as_ref()).await?;

    let live = api.get_opt(&common::primary_service_name(cluster)).await?;
    let desired = service::build_primary_service(cluster, live.as_ref());
    apply_ssa(&api, &desired, live.as_ref()).await?;

    let live = api.get_opt(&common::replica_service_name(cluster)).await?;
    let desired = service::build_replica_service(cluster, live.as_ref());
    apply_ssa(&api, &desired, live.as_ref()).await?;

    Ok(())
}

async fn reconcile_stateful_set(
    cluster: &MySQLCluster,
    ctx: &Context,
    ns: &str,
    mycnf_name: &str,
) -> Result<()> {
    let api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), ns);
    let live = api.get_opt(&common::stateful_set_name(cluster)).await?;
    let desired = statefulset::build_stateful_set(cluster, mycnf_name, live.as_ref(), &ctx.images)?;
    apply_ssa(&api, &desired, live.as_ref()).await?;
    Ok(())
}

async fn reconcile_pdb(cluster: &MySQLCluster, ctx: &Context, ns: &str) -> Result<()> {
    let api: Api<PodDisruptionBudget> = Api::namespaced(ctx.client.clone(), ns);
    match pdb::build_pdb(cluster) {
        Some(budget) => {
            update_or_create(&api, &budget).await?;
        }
        None => {
            delete_ignore_not_found(&api, &common::pdb_name(cluster)).await?;
        }
    }
    Ok(())
}

/// Project the referenced BackupPolicy into a CronJob and its RBAC, or tear
/// the three objects down when the reference is removed.
async fn reconcile_backup(cluster: &MySQLCluster, ctx: &Context, ns: &str) -> Result<()> {
    let cron_jobs: Api<CronJob> = Api::namespaced(ctx.client.clone(), ns);
    let roles: Api<Role> = Api::namespaced(ctx.client.clone(), ns);
    let role_bindings: Api<RoleBinding> = Api::namespaced(ctx.client.clone(), ns);
    let job_name = common::backup_job_name(cluster);

    let Some(policy_name) = &cluster.spec.backup_policy_name else {
        delete_ignore_not_found(&cron_jobs, &job_name).await?;
        delete_ignore_not_found(&roles, &job_name).await?;
        delete_ignore_not_found(&role_bindings, &job_name).await?;
        return Ok(());
    };

    let policies: Api<BackupPolicy> = Api::namespaced(ctx.client.clone(), ns);
    let policy = policies.get_opt(policy_name).await?.ok_or_else(|| {
        Error::MissingPrerequisite(format!("BackupPolicy {}/{}", ns, policy_name))
    })?;

    let cron_job = backup::build_backup_cron_job(
        cluster,
        &policy,
        &ctx.images.backup_image,
        ctx.no_job_resource,
    );
    update_or_create(&cron_jobs, &cron_job).await?;
    update_or_create(&roles, &backup::build_backup_role(cluster)).await?;
    update_or_create(
        &role_bindings,
        &backup::build_backup_role_binding(cluster, &policy),
    )
    .await?;
    Ok(())
}

/// Create the one-shot restore Job and its Job-owned RBAC.
///
/// Once `status.restoredTime` is set the restore is over; nothing is
/// touched again, even if the Job has been deleted since.
async fn reconcile_restore(cluster: &MySQLCluster, ctx: &Context, ns: &str) -> Result<()> {
    let Some(restore_spec) = &cluster.spec.restore else {
        return Ok(());
    };
    if cluster
        .status
        .as_ref()
        .and_then(|s| s.restored_time.as_ref())
        .is_some()
    {
        return Ok(());
    }

    let jobs: Api<Job> = Api::namespaced(ctx.client.clone(), ns);
    let job_name = common::restore_job_name(cluster);
    let job = match jobs.get_opt(&job_name).await? {
        Some(job) => job,
        None => {
            let desired = restore::build_restore_job(
                cluster,
                restore_spec,
                &ctx.images.backup_image,
                ctx.no_job_resource,
            );
            let created = jobs.create(&PostParams::default(), &desired).await?;
            info!("created restore Job {}", job_name);
            created
        }
    };

    let roles: Api<Role> = Api::namespaced(ctx.client.clone(), ns);
    update_or_create(&roles, &restore::build_restore_role(cluster, &job)).await?;
    let role_bindings: Api<RoleBinding> = Api::namespaced(ctx.client.clone(), ns);
    update_or_create(
        &role_bindings,
        &restore::build_restore_role_binding(cluster, restore_spec, &job),
    )
    .await?;
    Ok(())
}

/// Record the observed generation and the reconciler version that produced
/// it through the status subresource.
async fn record_reconcile_info(
    cluster: &MySQLCluster,
    ctx: &Context,
    ns: &str,
    version: i32,
) -> Result<()> {
    let api: Api<MySQLCluster> = Api::namespaced(ctx.client.clone(), ns);
    let patch = serde_json::json!({
        "status": {
            "reconcileInfo": {
                "generation": cluster.metadata.generation.unwrap_or(0),
                "reconcileVersion": version,
            }
        }
    });
    api.patch_status(
        &cluster.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

fn has_finalizer(cluster: &MySQLCluster) -> bool {
    cluster
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|s| s == FINALIZER))
}

async fn add_finalizer(cluster: &MySQLCluster, ctx: &Context, ns: &str) -> Result<()> {
    let api: Api<MySQLCluster> = Api::namespaced(ctx.client.clone(), ns);
    let mut finalizers = cluster.metadata.finalizers.clone().unwrap_or_default();
    finalizers.push(FINALIZER.to_string());

    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers,
        }
    });
    api.patch(
        &cluster.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    info!("added finalizer to {}", cluster.name_any());
    Ok(())
}

/// Finalise a deleted cluster.
///
/// Children in the cluster namespace disappear through the owner-reference
/// cascade; only the cross-namespace artefacts need explicit deletion.
async fn finalize(cluster: &MySQLCluster, ctx: &Context, ns: &str) -> Result<Action> {
    if !has_finalizer(cluster) {
        return Ok(Action::await_change());
    }

    let name = cluster.name_any();
    info!("start finalizing MySQLCluster {}", name);

    ctx.manager.stop(&ClusterKey::from_cluster(cluster));

    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &ctx.operator_namespace);
    delete_ignore_not_found(&secrets, &common::controller_secret_name(cluster)).await?;

    let certificates: Api<Certificate> =
        Api::namespaced(ctx.client.clone(), &ctx.operator_namespace);
    delete_ignore_not_found(&certificates, &common::certificate_name(cluster)).await?;

    let remaining: Vec<String> = cluster
        .metadata
        .finalizers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f != FINALIZER)
        .collect();
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": remaining,
        }
    });
    let api: Api<MySQLCluster> = Api::namespaced(ctx.client.clone(), ns);
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    info!("removed finalizer from {}", name);
    Ok(Action::await_change())
}
