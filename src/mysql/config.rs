//! Effective my.cnf generation
//!
//! The rendered configuration merges four layers, later layers winning:
//! baseline defaults, tuning derived from the mysqld container's memory,
//! the user override ConfigMap, and fixed settings the operator imposes.
//!
//! The rendered text is content-addressed with FNV-32a; the hex digest
//! becomes part of the ConfigMap name so an update creates a new object
//! instead of mutating the one running pods still mount.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Container;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::crd::MySQLCluster;
use crate::resources::common::{MYSQLD_CONTAINER_NAME, MYSQL_DATA_PATH, TMP_PATH};

/// Baseline mysqld settings. Users may override any of these.
const DEFAULT_MYCNF: &[(&str, &str)] = &[
    ("tmpdir", TMP_PATH),
    ("innodb_tmpdir", TMP_PATH),
    ("character_set_server", "utf8mb4"),
    ("collation_server", "utf8mb4_unicode_ci"),
    ("default_time_zone", "+0:00"),
    ("disabled_storage_engines", "MyISAM"),
    ("skip_name_resolve", "ON"),
    ("enforce_gtid_consistency", "ON"),
    ("gtid_mode", "ON"),
    ("relay_log_recovery", "OFF"),
    ("max_connections", "151"),
    ("max_connect_errors", "10"),
    ("slow_query_log", "ON"),
    ("long_query_time", "2"),
    ("innodb_flush_method", "O_DIRECT"),
    ("innodb_lock_wait_timeout", "60"),
    ("innodb_print_all_deadlocks", "ON"),
    ("print_identified_with_as_hex", "ON"),
];

/// Settings the operator imposes; user overrides for these are discarded.
const CONSTANT_MYCNF: &[(&str, &str)] = &[
    ("datadir", MYSQL_DATA_PATH),
    ("socket", "/run/mysqld.sock"),
    ("pid_file", "/run/mysqld.pid"),
    ("secure_file_priv", "NULL"),
    ("log_error", "/var/log/mysql/mysql.err"),
    ("slow_query_log_file", "/var/log/mysql/mysql.slow"),
    ("port", "3306"),
    ("mysqlx_port", "33060"),
    ("admin_port", "33062"),
    ("admin_address", "localhost"),
    ("skip_slave_start", "ON"),
];

/// mysqld reports 128MiB as the built-in innodb_buffer_pool_size default;
/// tuning below that would shrink the pool.
const INNODB_BUFFER_POOL_DEFAULT_BYTES: i64 = 128 << 20;

/// Accumulates my.cnf entries for the `[mysqld]` section.
#[derive(Debug, Default)]
pub struct MycnfGenerator {
    entries: BTreeMap<String, String>,
}

impl MycnfGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge entries, overwriting earlier values for the same key.
    /// Keys are normalized the way mysqld itself treats option names.
    pub fn merge<K, V>(&mut self, entries: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in entries {
            self.entries
                .insert(normalize_key(&key.into()), value.into());
        }
    }

    /// Render the `[mysqld]` section with keys in sorted order.
    pub fn generate(&self) -> String {
        use std::fmt::Write;

        let mut out = String::from("[mysqld]\n");
        for (key, value) in &self.entries {
            let _ = writeln!(out, "{} = {}", key, value);
        }
        out
    }
}

/// mysqld accepts dashes and underscores interchangeably in option names.
fn normalize_key(key: &str) -> String {
    key.trim().replace('-', "_")
}

/// Render the effective my.cnf for a cluster.
///
/// `memory_bytes` is the mysqld container's memory budget; `user` is the
/// data of the override ConfigMap when `spec.mysqlConfigMapName` is set.
pub fn generate_mycnf(
    memory_bytes: Option<i64>,
    user: Option<&BTreeMap<String, String>>,
) -> String {
    let mut generator = MycnfGenerator::new();
    generator.merge(DEFAULT_MYCNF.iter().copied());

    if let Some(mem) = memory_bytes {
        if mem > INNODB_BUFFER_POOL_DEFAULT_BYTES {
            let pool = mem / 10 * 7;
            generator.merge([("innodb_buffer_pool_size", format!("{}M", pool >> 20))]);
        }
    }

    if let Some(user) = user {
        generator.merge(user.iter());
    }

    generator.merge(CONSTANT_MYCNF.iter().copied());
    generator.generate()
}

/// Memory budget of the mysqld container: requests.memory wins over
/// limits.memory; None when neither is set or the value does not parse.
pub fn mysqld_memory_bytes(cluster: &MySQLCluster) -> Option<i64> {
    let mysqld: &Container = cluster
        .spec
        .pod_template
        .spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == MYSQLD_CONTAINER_NAME)?;
    let resources = mysqld.resources.as_ref()?;
    let quantity = resources
        .requests
        .as_ref()
        .and_then(|r| r.get("memory"))
        .or_else(|| resources.limits.as_ref().and_then(|l| l.get("memory")))?;
    parse_memory_quantity(quantity)
}

/// Parse a Kubernetes memory Quantity into bytes.
pub fn parse_memory_quantity(quantity: &Quantity) -> Option<i64> {
    let s = quantity.0.trim();
    if s.is_empty() {
        return None;
    }

    const SUFFIXES: &[(&str, i64)] = &[
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("Pi", 1 << 50),
        ("Ei", 1 << 60),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
        ("P", 1_000_000_000_000_000),
        ("E", 1_000_000_000_000_000_000),
    ];

    for (suffix, multiplier) in SUFFIXES {
        if let Some(number) = s.strip_suffix(suffix) {
            let value: f64 = number.parse().ok()?;
            return Some((value * *multiplier as f64) as i64);
        }
    }
    s.parse::<f64>().ok().map(|v| v as i64)
}

/// 32-bit FNV-1a over the rendered configuration.
pub fn fnv32a(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 16_777_619;
    data.iter()
        .fold(OFFSET_BASIS, |hash, byte| (hash ^ u32::from(*byte)).wrapping_mul(PRIME))
}

/// Content-addressed ConfigMap name: `<prefix><fnv32aHex>`.
/// `prefix` must include the trailing dot.
pub fn mycnf_config_map_name(prefix: &str, content: &str) -> String {
    format!("{}{:08x}", prefix, fnv32a(content.as_bytes()))
}
