use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use super::consts::{
    DEFAULT_BATCH_SIZE, DEFAULT_BTL_BLOCKS, DEFAULT_COLLECT_INTERVAL_SECS, DEFAULT_SMALL_CHUNK_SIZE,
    DEFAULT_WINDOW_RADIUS, LATEST_LOOKBACK_LIMIT,
};
use super::sources::metrix::DEFAULT_BASE_URL;

fn default_btl_blocks() -> u64 {
    DEFAULT_BTL_BLOCKS
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_small_chunk_size() -> usize {
    DEFAULT_SMALL_CHUNK_SIZE
}

fn default_batch_delay_ms() -> u64 {
    100
}

fn default_chunk_delay_ms() -> u64 {
    200
}

fn default_purge_delay_ms() -> u64 {
    50
}

fn default_read_retries() -> u32 {
    3
}

fn default_read_backoff_ms() -> u64 {
    200
}

fn default_latest_window() -> usize {
    LATEST_LOOKBACK_LIMIT
}

fn default_window_radius() -> usize {
    DEFAULT_WINDOW_RADIUS
}

fn default_interval_secs() -> u64 {
    DEFAULT_COLLECT_INTERVAL_SECS
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_api_key() -> u32 {
    1
}

fn default_timeout_secs() -> u64 {
    20
}

/// Write chunking, throttling and read retry behaviour of the snapshot storage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_btl_blocks")]
    pub btl_blocks: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_small_chunk_size")]
    pub small_chunk_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,
    #[serde(default = "default_purge_delay_ms")]
    pub purge_delay_ms: u64,
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,
    #[serde(default = "default_read_backoff_ms")]
    pub read_backoff_ms: u64,
    /// Records scanned to find the newest snapshot timestamp.
    #[serde(default = "default_latest_window")]
    pub latest_window: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            btl_blocks: default_btl_blocks(),
            batch_size: default_batch_size(),
            small_chunk_size: default_small_chunk_size(),
            batch_delay_ms: default_batch_delay_ms(),
            chunk_delay_ms: default_chunk_delay_ms(),
            purge_delay_ms: default_purge_delay_ms(),
            read_retries: default_read_retries(),
            read_backoff_ms: default_read_backoff_ms(),
            latest_window: default_latest_window(),
        }
    }
}

impl StoreSettings {
    /// Same limits, no sleeping. Used by tests and one-shot CLI runs against memory.
    pub fn without_delays(mut self) -> Self {
        self.batch_delay_ms = 0;
        self.chunk_delay_ms = 0;
        self.purge_delay_ms = 0;
        self.read_backoff_ms = 0;
        self
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn purge_delay(&self) -> Duration {
        Duration::from_millis(self.purge_delay_ms)
    }

    pub fn read_backoff(&self) -> Duration {
        Duration::from_millis(self.read_backoff_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("store.batch_size must be greater than 0");
        }
        if self.small_chunk_size == 0 {
            anyhow::bail!("store.small_chunk_size must be greater than 0");
        }
        if self.small_chunk_size > self.batch_size {
            anyhow::bail!("store.small_chunk_size must not exceed store.batch_size");
        }
        if self.btl_blocks == 0 {
            anyhow::bail!("store.btl_blocks must be greater than 0");
        }
        if self.latest_window == 0 {
            anyhow::bail!("store.latest_window must be greater than 0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CollectorSettings {
    #[serde(default = "default_window_radius")]
    pub window_radius: usize,
    #[serde(default = "default_interval_secs")]
    pub schedule_interval_secs: u64,
    #[serde(default = "default_true")]
    pub schedule_on_start: bool,
    #[serde(default)]
    pub run_immediately: bool,
    /// Upper bound on one pool fetch; filled from the upstream timeout when absent.
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            window_radius: default_window_radius(),
            schedule_interval_secs: default_interval_secs(),
            schedule_on_start: true,
            run_immediately: false,
            fetch_timeout_secs: None,
        }
    }
}

impl CollectorSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.unwrap_or_else(default_timeout_secs))
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_radius == 0 {
            anyhow::bail!("collector.window_radius must be greater than 0");
        }
        if self.schedule_interval_secs == 0 {
            anyhow::bail!("collector.schedule_interval_secs must be greater than 0");
        }
        if self.fetch_timeout_secs == Some(0) {
            anyhow::bail!("collector.fetch_timeout_secs must be greater than 0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpstreamSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key")]
    pub api_key: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: default_api_key(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl UpstreamSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            anyhow::bail!("upstream.base_url must be set");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("upstream.timeout_secs must be greater than 0");
        }
        Ok(())
    }
}
