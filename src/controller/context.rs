//! Shared context for the MySQLCluster controller

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::controller::clustering::ClusterManager;
use crate::crd::MySQLCluster;
use crate::health::HealthState;
use crate::resources::common::FIELD_MANAGER;

/// Sidecar and job images the operator injects into pods.
///
/// Defaults may be overridden from the environment so that air-gapped
/// deployments can point at a mirror registry.
#[derive(Clone, Debug)]
pub struct OperatorImages {
    pub agent_image: String,
    pub fluent_bit_image: String,
    pub exporter_image: String,
    pub backup_image: String,
}

impl Default for OperatorImages {
    fn default() -> Self {
        Self {
            agent_image: "ghcr.io/cybozu-go/moco-agent:0.12.1".to_string(),
            fluent_bit_image: "ghcr.io/cybozu/fluent-bit:3.1.9.1".to_string(),
            exporter_image: "ghcr.io/cybozu/mysqld_exporter:0.15.1.1".to_string(),
            backup_image: "ghcr.io/cybozu-go/moco-backup:0.25.2".to_string(),
        }
    }
}

impl OperatorImages {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            agent_image: std::env::var("AGENT_IMAGE").unwrap_or(defaults.agent_image),
            fluent_bit_image: std::env::var("FLUENT_BIT_IMAGE").unwrap_or(defaults.fluent_bit_image),
            exporter_image: std::env::var("EXPORTER_IMAGE").unwrap_or(defaults.exporter_image),
            backup_image: std::env::var("BACKUP_IMAGE").unwrap_or(defaults.backup_image),
        }
    }
}

/// Shared state threaded through every reconciliation.
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Namespace the operator itself runs in, read once at start-up.
    pub operator_namespace: String,
    /// Images injected into generated pods.
    pub images: OperatorImages,
    /// Skip resource requests on backup/restore Job pods (test environments).
    pub no_job_resource: bool,
    /// Clustering manager receiving update/stop notifications.
    pub manager: Arc<dyn ClusterManager>,
    /// Event reporter identity
    reporter: Reporter,
    /// Health state for metrics (optional for tests)
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    pub fn new(
        client: Client,
        operator_namespace: String,
        images: OperatorImages,
        manager: Arc<dyn ClusterManager>,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            client,
            operator_namespace,
            images,
            no_job_resource: std::env::var("TEST_NO_JOB_RESOURCE").is_ok(),
            manager,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
        }
    }

    /// Record a successful reconciliation in metrics
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        if let Some(ref state) = self.health_state {
            state
                .metrics
                .record_reconcile(namespace, name, duration_secs);
        }
    }

    /// Record a failed reconciliation in metrics
    pub fn record_error(&self, namespace: &str, name: &str) {
        if let Some(ref state) = self.health_state {
            state.metrics.record_error(namespace, name);
        }
    }

    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    /// Publish a normal event for a cluster
    pub async fn publish_normal_event(
        &self,
        cluster: &MySQLCluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = cluster.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!("Failed to publish event: {}", e);
        }
    }

    /// Publish a warning event for a cluster
    pub async fn publish_warning_event(
        &self,
        cluster: &MySQLCluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = cluster.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: EventType::Warning,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!("Failed to publish warning event: {}", e);
        }
    }
}
