//! Credential Secrets
//!
//! A single master Secret in the operator namespace is authoritative for a
//! cluster's passwords. Two derivative Secrets are projected into the
//! cluster namespace from it: one exposing each password under its own key,
//! and one holding my.cnf-formatted client sections for use with
//! `mysql --defaults-extra-file`.
//!
//! The master is created once and never rotated by the reconciler; rotation
//! is an operator action outside this controller.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::core::ObjectMeta;
use kube::ResourceExt;
use rand::Rng;

use crate::controller::error::{Error, Result};
use crate::crd::MySQLCluster;
use crate::resources::common::{
    cluster_labels, controller_labels, controller_secret_name, my_cnf_secret_name,
    owner_reference, user_secret_name,
};

pub const ADMIN_PASSWORD_KEY: &str = "ADMIN_PASSWORD";
pub const AGENT_PASSWORD_KEY: &str = "AGENT_PASSWORD";
pub const REPLICATION_PASSWORD_KEY: &str = "REPLICATION_PASSWORD";
pub const CLONE_DONOR_PASSWORD_KEY: &str = "CLONE_DONOR_PASSWORD";
pub const EXPORTER_PASSWORD_KEY: &str = "EXPORTER_PASSWORD";
pub const BACKUP_PASSWORD_KEY: &str = "BACKUP_PASSWORD";
pub const READONLY_PASSWORD_KEY: &str = "READONLY_PASSWORD";
pub const WRITABLE_PASSWORD_KEY: &str = "WRITABLE_PASSWORD";

pub const ADMIN_USER: &str = "moco-admin";
pub const READONLY_USER: &str = "moco-readonly";
pub const WRITABLE_USER: &str = "moco-writable";

pub const ADMIN_MY_CNF_KEY: &str = "admin-my.cnf";
pub const READONLY_MY_CNF_KEY: &str = "readonly-my.cnf";
pub const WRITABLE_MY_CNF_KEY: &str = "writable-my.cnf";

/// 16 random bytes rendered as 32 hex characters.
const PASSWORD_BYTES: usize = 16;

/// Generate a password from a cryptographically strong RNG.
fn generate_password() -> String {
    const CHARSET: &[u8] = b"0123456789abcdef";
    let mut rng = rand::rng();
    (0..PASSWORD_BYTES * 2)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

/// The full set of passwords for one cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MySQLCredentials {
    pub admin: String,
    pub agent: String,
    pub replication: String,
    pub clone_donor: String,
    pub exporter: String,
    pub backup: String,
    pub readonly: String,
    pub writable: String,
}

impl MySQLCredentials {
    /// Generate a fresh credential bundle.
    pub fn generate() -> Self {
        Self {
            admin: generate_password(),
            agent: generate_password(),
            replication: generate_password(),
            clone_donor: generate_password(),
            exporter: generate_password(),
            backup: generate_password(),
            readonly: generate_password(),
            writable: generate_password(),
        }
    }

    /// Parse the bundle back out of the master Secret.
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        let data = secret
            .data
            .as_ref()
            .ok_or(Error::MissingObjectKey("secret data"))?;
        let get = |key: &'static str| -> Result<String> {
            let bytes = data.get(key).ok_or(Error::MissingObjectKey(key))?;
            String::from_utf8(bytes.0.clone())
                .map_err(|_| Error::InvalidConfig(format!("secret key {} is not UTF-8", key)))
        };
        Ok(Self {
            admin: get(ADMIN_PASSWORD_KEY)?,
            agent: get(AGENT_PASSWORD_KEY)?,
            replication: get(REPLICATION_PASSWORD_KEY)?,
            clone_donor: get(CLONE_DONOR_PASSWORD_KEY)?,
            exporter: get(EXPORTER_PASSWORD_KEY)?,
            backup: get(BACKUP_PASSWORD_KEY)?,
            readonly: get(READONLY_PASSWORD_KEY)?,
            writable: get(WRITABLE_PASSWORD_KEY)?,
        })
    }

    /// Data of the master Secret and of the user-facing Secret.
    /// Both carry one key per password.
    pub fn password_data(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (ADMIN_PASSWORD_KEY.to_string(), self.admin.clone()),
            (AGENT_PASSWORD_KEY.to_string(), self.agent.clone()),
            (REPLICATION_PASSWORD_KEY.to_string(), self.replication.clone()),
            (CLONE_DONOR_PASSWORD_KEY.to_string(), self.clone_donor.clone()),
            (EXPORTER_PASSWORD_KEY.to_string(), self.exporter.clone()),
            (BACKUP_PASSWORD_KEY.to_string(), self.backup.clone()),
            (READONLY_PASSWORD_KEY.to_string(), self.readonly.clone()),
            (WRITABLE_PASSWORD_KEY.to_string(), self.writable.clone()),
        ])
    }

    /// Data of the my.cnf-formatted credential Secret.
    pub fn my_cnf_data(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                ADMIN_MY_CNF_KEY.to_string(),
                client_section(ADMIN_USER, &self.admin),
            ),
            (
                READONLY_MY_CNF_KEY.to_string(),
                client_section(READONLY_USER, &self.readonly),
            ),
            (
                WRITABLE_MY_CNF_KEY.to_string(),
                client_section(WRITABLE_USER, &self.writable),
            ),
        ])
    }
}

fn client_section(user: &str, password: &str) -> String {
    format!("[client]\nuser = {}\npassword = {}\n", user, password)
}

fn to_byte_data(data: BTreeMap<String, String>) -> BTreeMap<String, ByteString> {
    data.into_iter()
        .map(|(k, v)| (k, ByteString(v.into_bytes())))
        .collect()
}

/// Build the master Secret for the operator namespace.
///
/// It carries the cross-namespace label set and no owner reference: owner
/// references do not work across namespaces, so the finalizer deletes it.
pub fn build_master_secret(
    cluster: &MySQLCluster,
    credentials: &MySQLCredentials,
    operator_namespace: &str,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(controller_secret_name(cluster)),
            namespace: Some(operator_namespace.to_string()),
            labels: Some(controller_labels(cluster)),
            ..Default::default()
        },
        data: Some(to_byte_data(credentials.password_data())),
        ..Default::default()
    }
}

/// Build the user-facing Secret in the cluster namespace.
pub fn build_user_secret(cluster: &MySQLCluster, credentials: &MySQLCredentials) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(user_secret_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(cluster_labels(cluster)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        data: Some(to_byte_data(credentials.password_data())),
        ..Default::default()
    }
}

/// Build the my.cnf-formatted credential Secret in the cluster namespace.
pub fn build_my_cnf_secret(cluster: &MySQLCluster, credentials: &MySQLCredentials) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(my_cnf_secret_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(cluster_labels(cluster)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        data: Some(to_byte_data(credentials.my_cnf_data())),
        ..Default::default()
    }
}
