use serde_json::{Map, Value, json};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use crate::config::{AppConfig, ConfigFile};

/// Builder for config files written to a temporary directory
pub struct TestConfigBuilder {
    root: Map<String, Value>,
    pools: Vec<Value>,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    /// Memory store, no delays, scheduler off.
    pub fn new() -> Self {
        let mut root = Map::new();
        root.insert("port".into(), json!(0));
        root.insert("host".into(), json!("127.0.0.1"));
        root.insert(
            "store".into(),
            json!({
                "kind": "memory",
                "batch_delay_ms": 0,
                "chunk_delay_ms": 0,
                "purge_delay_ms": 0,
                "read_backoff_ms": 0,
            }),
        );
        root.insert("collector".into(), json!({ "schedule_on_start": false }));
        Self { root, pools: Vec::new() }
    }

    pub fn with_pool(mut self, chain: &str, exchange: &str, pool_address: &str) -> Self {
        self.pools.push(json!({
            "chain": chain,
            "exchange": exchange,
            "network": chain,
            "poolAddress": pool_address,
        }));
        self
    }

    /// Replaces or adds a top-level section.
    pub fn with_section(mut self, key: &str, value: Value) -> Self {
        self.root.insert(key.to_string(), value);
        self
    }

    pub fn to_json(&self) -> Value {
        let mut root = self.root.clone();
        if !self.pools.is_empty() {
            root.insert("pools".into(), Value::Array(self.pools.clone()));
        }
        Value::Object(root)
    }

    pub fn file(&self) -> ConfigFile {
        serde_json::from_value(self.to_json()).expect("test config deserializes")
    }

    pub fn build(&self) -> anyhow::Result<AppConfig> {
        AppConfig::from_file(self.file(), None)
    }

    /// Writes `config.json`; keep the `TempDir` alive while the path is used.
    pub fn write(&self) -> (TempDir, PathBuf) {
        let dir = TempDir::new().expect("create temp config dir");
        let path = dir.path().join("config.json");
        fs::write(&path, self.to_json().to_string()).expect("write test config");
        (dir, path)
    }
}
