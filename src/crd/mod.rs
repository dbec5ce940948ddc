pub mod backup_policy;
pub mod certificate;
pub mod mysql_cluster;

pub use backup_policy::{BackupPolicy, BackupPolicySpec, BucketConfig, JobConfig};
pub use certificate::{Certificate, CertificateSpec, IssuerRef};
pub use mysql_cluster::{
    MySQLCluster, MySQLClusterSpec, MySQLClusterStatus, ReconcileInfo, RestoreSpec,
    ServiceTemplate,
};

/// Schema for embedded Kubernetes object types (PodTemplateSpec and friends).
///
/// k8s-openapi types do not implement JsonSchema, so the CRD schema admits
/// them as opaque objects and leaves validation to the API server.
pub fn k8s_object_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true,
    }))
    .unwrap()
}

/// Schema for lists of embedded Kubernetes objects.
pub fn k8s_object_list_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "array",
        "items": {
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true,
        },
    }))
    .unwrap()
}

/// Schema for metav1.Time fields.
pub fn datetime_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "string",
        "format": "date-time",
    }))
    .unwrap()
}

/// Schema for metav1.Condition lists, keyed by condition type.
pub fn conditions_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "array",
        "x-kubernetes-list-type": "map",
        "x-kubernetes-list-map-keys": ["type"],
        "items": {
            "type": "object",
            "properties": {
                "lastTransitionTime": { "format": "date-time", "type": "string" },
                "message": { "type": "string" },
                "observedGeneration": { "type": "integer", "format": "int64", "default": 0 },
                "reason": { "type": "string" },
                "status": { "type": "string" },
                "type": { "type": "string" }
            },
            "required": [
                "lastTransitionTime",
                "message",
                "reason",
                "status",
                "type"
            ],
        },
    }))
    .unwrap()
}
