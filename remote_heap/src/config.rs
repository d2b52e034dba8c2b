use crate::error::{HeapError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const ENV_HOST: &str = "MEMMGR_HOST";
const ENV_PORT: &str = "MEMMGR_PORT";
const ENV_MEMSIZE_MB: &str = "MEMMGR_MEMSIZE_MB";
const ENV_DUMP_FOLDER: &str = "MEMMGR_DUMP_FOLDER";
const ENV_DUMP_FORMAT: &str = "MEMMGR_DUMP_FORMAT";
const ENV_GC_INTERVAL_MS: &str = "MEMMGR_GC_INTERVAL_MS";
const ENV_MAX_READ_LEN: &str = "MEMMGR_MAX_READ_LEN";
const ENV_REFCOUNT_POLICY: &str = "MEMMGR_REFCOUNT_POLICY";

pub const DEFAULT_PORT: u16 = 50051;
pub const DEFAULT_ARENA_SIZE_MB: usize = 100;
pub const DEFAULT_GC_INTERVAL_MS: u64 = 1000;
/// Largest value returned by a single `Get`.
pub const DEFAULT_MAX_READ_LEN: usize = 1024 * 1024;

const BYTES_PER_MB: usize = 1024 * 1024;

/// What a decrement does when the counter is already at or below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefCountPolicy {
    /// Keep decrementing; counts may go negative.
    #[default]
    Unbounded,
    /// Never go below zero; the decrement still succeeds.
    ClampAtZero,
    /// Fail the decrement with `RefCountUnderflow`.
    RejectBelowZero,
}

impl RefCountPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "unbounded" | "none" => Some(Self::Unbounded),
            "clamp" | "clamp_at_zero" => Some(Self::ClampAtZero),
            "reject" | "reject_below_zero" => Some(Self::RejectBelowZero),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpFormat {
    #[default]
    Text,
    Json,
}

impl DumpFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DumpFormat::Text => "txt",
            DumpFormat::Json => "json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_host: String,
    pub port: u16,
    pub arena_size_mb: usize,
    /// `None` disables dump files.
    pub dump_folder: Option<PathBuf>,
    pub dump_format: DumpFormat,
    pub gc_interval_ms: u64,
    pub max_read_len: usize,
    pub ref_count_policy: RefCountPolicy,
    /// Exact arena size in bytes; overrides `arena_size_mb` when set.
    pub arena_size_bytes: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            arena_size_mb: DEFAULT_ARENA_SIZE_MB,
            dump_folder: Some(PathBuf::from("./dumps")),
            dump_format: DumpFormat::Text,
            gc_interval_ms: DEFAULT_GC_INTERVAL_MS,
            max_read_len: DEFAULT_MAX_READ_LEN,
            ref_count_policy: RefCountPolicy::Unbounded,
            arena_size_bytes: None,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by any parsable `MEMMGR_*` environment variable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| HeapError::InternalError(format!("Invalid server config: {}", e)))
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST).filter(|h| !h.trim().is_empty()) {
            self.bind_host = host.trim().to_string();
        }
        if let Some(port) = lookup(ENV_PORT).and_then(|v| v.trim().parse::<u16>().ok()) {
            self.port = port;
        }
        if let Some(mb) = lookup(ENV_MEMSIZE_MB).and_then(|v| v.trim().parse::<usize>().ok()) {
            self.arena_size_mb = mb;
        }
        if let Some(folder) = lookup(ENV_DUMP_FOLDER) {
            let folder = folder.trim();
            self.dump_folder = if folder.is_empty() {
                None
            } else {
                Some(PathBuf::from(folder))
            };
        }
        if let Some(format) = lookup(ENV_DUMP_FORMAT).and_then(|v| DumpFormat::parse(&v)) {
            self.dump_format = format;
        }
        if let Some(ms) = lookup(ENV_GC_INTERVAL_MS).and_then(|v| v.trim().parse::<u64>().ok()) {
            self.gc_interval_ms = ms;
        }
        if let Some(len) = lookup(ENV_MAX_READ_LEN).and_then(|v| v.trim().parse::<usize>().ok()) {
            self.max_read_len = len;
        }
        if let Some(policy) = lookup(ENV_REFCOUNT_POLICY).and_then(|v| RefCountPolicy::parse(&v)) {
            self.ref_count_policy = policy;
        }
    }

    pub fn arena_capacity(&self) -> usize {
        self.arena_size_bytes
            .unwrap_or_else(|| self.arena_size_mb.saturating_mul(BYTES_PER_MB))
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms.max(1))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub address: String,
    /// Read/write timeout per call; `None` blocks indefinitely.
    pub io_timeout_ms: Option<u64>,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            io_timeout_ms: None,
        }
    }

    pub fn for_port(port: u16) -> Self {
        Self::new(format!("127.0.0.1:{}", port))
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::for_port(DEFAULT_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup_from(map: HashMap<&'static str, &'static str>) -> impl Fn(&str) -> Option<String> {
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 50051);
        assert_eq!(config.arena_size_mb, 100);
        assert_eq!(config.arena_capacity(), 100 * 1024 * 1024);
        assert_eq!(config.dump_folder, Some(PathBuf::from("./dumps")));
        assert_eq!(config.gc_interval(), Duration::from_secs(1));
        assert_eq!(config.max_read_len, 1024 * 1024);
        assert_eq!(config.ref_count_policy, RefCountPolicy::Unbounded);
        assert_eq!(config.bind_address(), "0.0.0.0:50051");
    }

    #[test]
    fn test_overrides_applied() {
        let mut config = ServerConfig::default();
        let mut env = HashMap::new();
        env.insert(ENV_PORT, "6000");
        env.insert(ENV_MEMSIZE_MB, "2");
        env.insert(ENV_GC_INTERVAL_MS, "250");
        env.insert(ENV_REFCOUNT_POLICY, "clamp");
        env.insert(ENV_DUMP_FORMAT, "json");
        config.apply_overrides(lookup_from(env));

        assert_eq!(config.port, 6000);
        assert_eq!(config.arena_capacity(), 2 * 1024 * 1024);
        assert_eq!(config.gc_interval(), Duration::from_millis(250));
        assert_eq!(config.ref_count_policy, RefCountPolicy::ClampAtZero);
        assert_eq!(config.dump_format, DumpFormat::Json);
    }

    #[test]
    fn test_unparsable_overrides_ignored() {
        let mut config = ServerConfig::default();
        let mut env = HashMap::new();
        env.insert(ENV_PORT, "not-a-port");
        env.insert(ENV_REFCOUNT_POLICY, "sometimes");
        config.apply_overrides(lookup_from(env));

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.ref_count_policy, RefCountPolicy::Unbounded);
    }

    #[test]
    fn test_empty_dump_folder_disables_dumps() {
        let mut config = ServerConfig::default();
        let mut env = HashMap::new();
        env.insert(ENV_DUMP_FOLDER, "  ");
        config.apply_overrides(lookup_from(env));
        assert_eq!(config.dump_folder, None);
    }

    #[test]
    #[serial]
    fn test_from_env_reads_process_environment() {
        std::env::set_var(ENV_PORT, "7007");
        std::env::set_var(ENV_MAX_READ_LEN, "64");
        let config = ServerConfig::from_env();
        std::env::remove_var(ENV_PORT);
        std::env::remove_var(ENV_MAX_READ_LEN);

        assert_eq!(config.port, 7007);
        assert_eq!(config.max_read_len, 64);
    }

    #[test]
    fn test_from_json_partial_document() {
        let config = ServerConfig::from_json(
            r#"{"port": 9000, "arena_size_bytes": 1024, "ref_count_policy": "reject_below_zero"}"#,
        )
        .expect("valid config");
        assert_eq!(config.port, 9000);
        assert_eq!(config.arena_capacity(), 1024);
        assert_eq!(config.ref_count_policy, RefCountPolicy::RejectBelowZero);
        assert_eq!(config.gc_interval_ms, DEFAULT_GC_INTERVAL_MS);
    }

    #[test]
    fn test_from_json_invalid() {
        let result = ServerConfig::from_json("{ not json");
        assert!(matches!(result, Err(HeapError::InternalError(_))));
    }

    #[test]
    fn test_refcount_policy_parse() {
        assert_eq!(RefCountPolicy::parse("Unbounded"), Some(RefCountPolicy::Unbounded));
        assert_eq!(
            RefCountPolicy::parse(" reject "),
            Some(RefCountPolicy::RejectBelowZero)
        );
        assert_eq!(RefCountPolicy::parse("maybe"), None);
    }

    #[test]
    fn test_client_config_for_port() {
        let config = ClientConfig::for_port(50051);
        assert_eq!(config.address, "127.0.0.1:50051");
        assert_eq!(config.io_timeout(), None);
        assert_eq!(ClientConfig::default(), config);
    }
}
