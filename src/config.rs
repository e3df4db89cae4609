use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::modules::liquidity::collector::Collector;
use crate::modules::liquidity::config::{CollectorSettings, StoreSettings, UpstreamSettings};
use crate::modules::liquidity::schemas::PoolConfig;
use crate::modules::liquidity::sources::defs::PoolSource;
use crate::modules::liquidity::sources::metrix::MetrixClient;
use crate::modules::liquidity::storage::SnapshotStorage;
use crate::runtime::memory_store::MemoryStore;
use crate::runtime::rpc_store::RpcStore;
use crate::runtime::store::AnnotatedStore;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Environment variable holding the store's bearer token.
pub const STORE_TOKEN_ENV: &str = "POOLSCOPE_STORE_TOKEN";

fn default_port() -> u16 {
    3001
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_store_timeout_secs() -> u64 {
    30
}

fn normalize_optional_string(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Rpc,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub kind: StoreKind,
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(flatten)]
    pub settings: StoreSettings,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            rpc_url: None,
            auth_token: None,
            timeout_secs: default_store_timeout_secs(),
            settings: StoreSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub upstream: UpstreamSettings,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub collector: CollectorSettings,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Rpc { url: String, auth_token: String, timeout: Duration },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub upstream: UpstreamSettings,
    pub backend: StoreBackend,
    pub store: StoreSettings,
    pub collector: CollectorSettings,
    pub pools: Vec<PoolConfig>,
}

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// Path to JSON config file.
    #[arg(long, default_value = "./config.json")]
    pub config_path: String,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP API and the hourly collector (default).
    Serve,
    /// Run one collection cycle for every configured pool and exit.
    Collect,
    /// Delete every stored record of a pool.
    Purge {
        #[arg(long)]
        pool: String,
    },
    /// Extend the lifetime of a pool's newest snapshot.
    Extend {
        #[arg(long)]
        pool: String,
        #[arg(long)]
        blocks: u64,
    },
}

pub fn load_config_file(path: &str) -> Result<ConfigFile> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read config file: {path}"))?;
    serde_json::from_str(&raw).context("failed to parse config JSON")
}

impl AppConfig {
    pub fn backend_kind(&self) -> StoreKind {
        match self.backend {
            StoreBackend::Memory => StoreKind::Memory,
            StoreBackend::Rpc { .. } => StoreKind::Rpc,
        }
    }

    /// Reads the file at `path`; the store token may come from [`STORE_TOKEN_ENV`].
    pub fn load(path: &str) -> Result<Self> {
        let file = load_config_file(path)?;
        Self::from_file(file, std::env::var(STORE_TOKEN_ENV).ok())
    }

    /// `env_token` takes precedence over `store.auth_token` from the file.
    pub fn from_file(file: ConfigFile, env_token: Option<String>) -> Result<Self> {
        let host: IpAddr = file
            .host
            .trim()
            .parse()
            .with_context(|| format!("invalid host: {}", file.host))?;
        let bind = SocketAddr::new(host, file.port);

        file.upstream.validate()?;
        file.store.settings.validate()?;
        file.collector.validate()?;

        let backend = match file.store.kind {
            StoreKind::Memory => StoreBackend::Memory,
            StoreKind::Rpc => {
                let url = normalize_optional_string(file.store.rpc_url)
                    .context("store.rpc_url must be provided for the rpc store")?;
                let auth_token = normalize_optional_string(env_token)
                    .or_else(|| normalize_optional_string(file.store.auth_token))
                    .with_context(|| {
                        format!("store auth token missing: set {STORE_TOKEN_ENV} or store.auth_token")
                    })?;
                if file.store.timeout_secs == 0 {
                    anyhow::bail!("store.timeout_secs must be greater than 0");
                }
                StoreBackend::Rpc {
                    url,
                    auth_token,
                    timeout: Duration::from_secs(file.store.timeout_secs),
                }
            }
        };

        let mut collector = file.collector;
        if collector.fetch_timeout_secs.is_none() {
            collector.fetch_timeout_secs = Some(file.upstream.timeout_secs);
        }

        let pools = if file.pools.is_empty() { PoolConfig::default_pools() } else { file.pools };
        for (i, pool) in pools.iter().enumerate() {
            if pool.pool_address.trim().is_empty() {
                anyhow::bail!("pools[{i}].poolAddress must be set");
            }
            if pools[..i].iter().any(|p| p.same_pool(&pool.pool_address)) {
                anyhow::bail!("pools[{i}] duplicates pool {}", pool.pool_address);
            }
        }

        Ok(Self {
            bind,
            upstream: file.upstream,
            backend,
            store: file.store.settings,
            collector,
            pools,
        })
    }
}

pub fn init_config_from(cfg: AppConfig) -> Result<()> {
    CONFIG.set(cfg).map_err(|_| anyhow::anyhow!("config already initialized"))
}

pub fn init_config() -> Result<CliArgs> {
    let args = CliArgs::parse();
    let cfg = AppConfig::load(&args.config_path)?;
    init_config_from(cfg)?;
    Ok(args)
}

pub fn get_config() -> &'static AppConfig {
    CONFIG.get().expect("init_config() must be called once at startup")
}

/* ---------- wiring ---------- */

pub fn build_store(cfg: &AppConfig) -> Result<Arc<dyn AnnotatedStore>> {
    Ok(match &cfg.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Rpc { url, auth_token, timeout } => {
            Arc::new(RpcStore::new(url.clone(), auth_token, *timeout)?)
        }
    })
}

pub fn build_source(cfg: &AppConfig) -> Result<Arc<dyn PoolSource>> {
    let client =
        MetrixClient::new(cfg.upstream.base_url.clone(), cfg.upstream.api_key, cfg.upstream.timeout())?;
    Ok(Arc::new(client))
}

pub fn build_collector(cfg: &AppConfig) -> Result<Arc<Collector>> {
    let storage = Arc::new(SnapshotStorage::new(build_store(cfg)?, cfg.store.clone()));
    Ok(Arc::new(Collector::new(
        build_source(cfg)?,
        storage,
        cfg.collector.clone(),
        cfg.pools.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file(v: serde_json::Value) -> ConfigFile {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn memory_config_takes_defaults() {
        let cfg = AppConfig::from_file(file(json!({ "store": { "kind": "memory" } })), None).unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:3001".parse().unwrap());
        assert_eq!(cfg.backend, StoreBackend::Memory);
        assert_eq!(cfg.pools, PoolConfig::default_pools());
        assert_eq!(cfg.collector.fetch_timeout_secs, Some(20));
        assert_eq!(cfg.store, StoreSettings::default());
    }

    #[test]
    fn rpc_store_needs_a_token() {
        let raw = json!({ "store": { "kind": "rpc", "rpc_url": "http://localhost:8545" } });
        let err = AppConfig::from_file(file(raw.clone()), None).unwrap_err();
        assert!(err.to_string().contains(STORE_TOKEN_ENV));

        let cfg = AppConfig::from_file(file(raw), Some("secret".into())).unwrap();
        match cfg.backend {
            StoreBackend::Rpc { auth_token, timeout, .. } => {
                assert_eq!(auth_token, "secret");
                assert_eq!(timeout, Duration::from_secs(30));
            }
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[test]
    fn flattened_store_settings_are_read() {
        let cfg = AppConfig::from_file(
            file(json!({ "store": { "kind": "memory", "batch_size": 40, "small_chunk_size": 4 } })),
            None,
        )
        .unwrap();
        assert_eq!(cfg.store.batch_size, 40);
        assert_eq!(cfg.store.small_chunk_size, 4);
    }

    #[test]
    fn duplicate_pools_are_rejected() {
        let raw = json!({
            "store": { "kind": "memory" },
            "pools": [
                { "chain": "base", "exchange": "uniswap", "network": "base", "poolAddress": "0xAB" },
                { "chain": "base", "exchange": "uniswap", "network": "base", "poolAddress": "0xab" },
            ],
        });
        assert!(AppConfig::from_file(file(raw), None).is_err());
    }

    #[test]
    fn bad_host_is_rejected() {
        let raw = json!({ "host": "not a host", "store": { "kind": "memory" } });
        assert!(AppConfig::from_file(file(raw), None).is_err());
    }
}
