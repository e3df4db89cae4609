use anyhow::Context;
use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::time::Duration;

use super::defs::{FetchError, PoolSource};
use crate::modules::liquidity::consts::DEFAULT_TOKEN_DECIMALS;
use crate::modules::liquidity::schemas::{
    PoolConfig, PoolSummary, RawPoolData, TickDistribution,
};

pub const DEFAULT_BASE_URL: &str = "https://app.metrix.finance/api/trpc";

const SIMULATE_POOL: &str = "exchanges.getSimulatePool";
const POOL_TICKS: &str = "exchanges.getPoolTicks";

/// One procedure call inside a batched request.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchCall {
    pub method: String,
    pub body: Value,
}

impl BatchCall {
    pub fn new(method: impl Into<String>, body: Value) -> Self {
        Self { method: method.into(), body }
    }
}

/// `{base}/{m0},{m1}?batch=1&input={"0":{"json":b0},"1":{"json":b1}}`
pub fn build_batch_url(base_url: &str, calls: &[BatchCall]) -> Result<Url, FetchError> {
    let methods: Vec<&str> = calls.iter().map(|c| c.method.as_str()).collect();
    let mut input = Map::new();
    for (i, call) in calls.iter().enumerate() {
        input.insert(i.to_string(), json!({ "json": call.body }));
    }
    let raw = format!("{}/{}", base_url.trim_end_matches('/'), methods.join(","));
    let mut url = Url::parse(&raw).map_err(|e| FetchError::Url(format!("{raw}: {e}")))?;
    url.query_pairs_mut()
        .append_pair("batch", "1")
        .append_pair("input", &Value::Object(input).to_string());
    Ok(url)
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Option<EnvelopeResult>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct EnvelopeResult {
    data: EnvelopeData,
}

#[derive(Deserialize)]
struct EnvelopeData {
    json: Value,
}

fn error_message(err: &Value) -> String {
    err.pointer("/json/message")
        .or_else(|| err.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string())
}

fn take_result<T: DeserializeOwned>(envelopes: &mut [Envelope], index: usize) -> Result<T, FetchError> {
    let env = envelopes
        .get_mut(index)
        .ok_or_else(|| FetchError::Schema(format!("batch response has no entry {index}")))?;
    if let Some(err) = &env.error {
        return Err(FetchError::Upstream { index, message: error_message(err) });
    }
    let result = env
        .result
        .take()
        .ok_or_else(|| FetchError::Schema(format!("entry {index} has neither result nor error")))?;
    serde_json::from_value(result.data.json)
        .map_err(|e| FetchError::Schema(format!("entry {index}: {e}")))
}

/// Decodes the two-call batch: entry 0 is the pool summary, entry 1 the tick distribution.
pub fn decode_batch_response(body: &[u8]) -> Result<RawPoolData, FetchError> {
    let mut envelopes: Vec<Envelope> = serde_json::from_slice(body)
        .map_err(|e| FetchError::Schema(format!("batch response: {e}")))?;
    let summary: PoolSummary = take_result(&mut envelopes, 0)?;
    let distribution: TickDistribution = take_result(&mut envelopes, 1)?;
    Ok(RawPoolData { summary, ticks: distribution.ticks })
}

pub struct MetrixClient {
    base_url: String,
    api_key: u32,
    client: Client,
}

impl MetrixClient {
    pub fn new(base_url: impl Into<String>, api_key: u32, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build upstream http client")?;
        Ok(Self { base_url: base_url.into(), api_key, client })
    }

    pub fn pool_calls(&self, pool: &PoolConfig) -> Vec<BatchCall> {
        vec![
            BatchCall::new(
                SIMULATE_POOL,
                json!({
                    "exchange": pool.exchange,
                    "network": pool.network,
                    "poolAddress": pool.pool_address,
                    "apiKey": self.api_key,
                }),
            ),
            BatchCall::new(
                POOL_TICKS,
                json!({
                    "exchange": pool.exchange,
                    "network": pool.network,
                    "poolAddress": pool.pool_address,
                    "token0Decimals": pool.token0_decimals.unwrap_or(DEFAULT_TOKEN_DECIMALS),
                    "token1Decimals": pool.token1_decimals.unwrap_or(DEFAULT_TOKEN_DECIMALS),
                }),
            ),
        ]
    }

    async fn fetch(&self, pool: &PoolConfig) -> Result<RawPoolData, FetchError> {
        let url = build_batch_url(&self.base_url, &self.pool_calls(pool))?;
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { status: status.as_u16() });
        }
        let body = resp.bytes().await?;
        decode_batch_response(&body)
    }
}

impl PoolSource for MetrixClient {
    fn fetch_pool<'a>(&'a self, pool: &'a PoolConfig) -> BoxFuture<'a, Result<RawPoolData, FetchError>> {
        self.fetch(pool).boxed()
    }
}
