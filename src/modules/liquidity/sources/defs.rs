use futures::future::BoxFuture;
use std::time::Duration;

use crate::modules::liquidity::schemas::{PoolConfig, RawPoolData};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned HTTP {status}")]
    Status { status: u16 },
    #[error("upstream call {index} failed: {message}")]
    Upstream { index: usize, message: String },
    #[error("upstream schema mismatch: {0}")]
    Schema(String),
    #[error("upstream fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid upstream url: {0}")]
    Url(String),
}

/// Where raw pool data comes from.
pub trait PoolSource: Send + Sync {
    fn fetch_pool<'a>(&'a self, pool: &'a PoolConfig) -> BoxFuture<'a, Result<RawPoolData, FetchError>>;
}
