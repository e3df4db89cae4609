use anyhow::{Context, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::runtime::store::{
    AnnotatedStore, Annotations, EntityCreate, EntityExtension, EntityKey, EntityMetadata,
    ExtendReceipt, QueryEntity, StoreError, StoreQuery,
};

mod methods {
    pub const CREATE: &str = "golembase_createEntities";
    pub const QUERY: &str = "golembase_queryEntities";
    pub const METADATA: &str = "golembase_getEntityMetaData";
    pub const EXTEND: &str = "golembase_extendEntities";
    pub const DELETE: &str = "golembase_deleteEntities";
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateWire<'a> {
    data: String,
    btl: u64,
    #[serde(flatten)]
    annotations: &'a Annotations,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateReceiptWire {
    entity_key: EntityKey,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryEntityWire {
    key: EntityKey,
    #[serde(default)]
    value: String,
    #[serde(default)]
    string_annotations: Option<Vec<crate::runtime::store::Annotation<String>>>,
    #[serde(default)]
    numeric_annotations: Option<Vec<crate::runtime::store::Annotation<u64>>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataWire {
    expires_at_block: u64,
    #[serde(default)]
    owner: Option<String>,
    #[serde(flatten)]
    annotations: Annotations,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtendWire<'a> {
    entity_key: &'a EntityKey,
    number_of_blocks: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtendReceiptWire {
    entity_key: EntityKey,
    old_expiration_block: u64,
    new_expiration_block: u64,
}

fn encode_payload(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

fn decode_payload(raw: &str) -> Result<Vec<u8>, StoreError> {
    hex::decode(raw.trim_start_matches("0x"))
        .map_err(|e| StoreError::Decode(format!("invalid payload hex: {e}")))
}

fn looks_too_large(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("413") || m.contains("too large")
}

/// JSON-RPC client for the annotated store gateway.
pub struct RpcStore {
    rpc_url: String,
    client: Client,
    next_id: AtomicU64,
}

impl RpcStore {
    pub fn new(rpc_url: impl Into<String>, auth_token: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {auth_token}"))
            .context("store auth token is not a valid header value")?;
        headers.insert(AUTHORIZATION, bearer);
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("build store http client")?;
        Ok(Self { rpc_url: rpc_url.into(), client, next_id: AtomicU64::new(1) })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        batch_len: usize,
    ) -> Result<T, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = RpcRequest { jsonrpc: "2.0", id, method, params };
        let resp = self.client.post(&self.rpc_url).json(&req).send().await?;
        if resp.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return Err(StoreError::PayloadTooLarge(batch_len));
        }
        let resp: RpcResponse<T> = resp.error_for_status()?.json().await?;
        if let Some(err) = resp.error {
            if looks_too_large(&err.message) {
                return Err(StoreError::PayloadTooLarge(batch_len));
            }
            return Err(StoreError::Rpc { code: err.code, message: err.message });
        }
        resp.result.ok_or_else(|| StoreError::Decode(format!("missing result for {method}")))
    }

    async fn create(&self, entities: Vec<EntityCreate>) -> Result<Vec<EntityKey>, StoreError> {
        let wire: Vec<CreateWire<'_>> = entities
            .iter()
            .map(|e| CreateWire { data: encode_payload(&e.data), btl: e.btl, annotations: &e.annotations })
            .collect();
        let receipts: Vec<CreateReceiptWire> =
            self.call(methods::CREATE, json!([wire]), entities.len()).await?;
        if receipts.len() != entities.len() {
            return Err(StoreError::Decode(format!(
                "created {} entities but got {} receipts",
                entities.len(),
                receipts.len()
            )));
        }
        Ok(receipts.into_iter().map(|r| r.entity_key).collect())
    }

    async fn query(&self, query: StoreQuery) -> Result<Vec<QueryEntity>, StoreError> {
        let rows: Vec<QueryEntityWire> =
            self.call(methods::QUERY, json!([query.to_string()]), 0).await?;
        rows.into_iter()
            .map(|row| {
                let annotations = match (row.string_annotations, row.numeric_annotations) {
                    (None, None) => None,
                    (s, n) => Some(Annotations {
                        string_annotations: s.unwrap_or_default(),
                        numeric_annotations: n.unwrap_or_default(),
                    }),
                };
                Ok(QueryEntity { key: row.key, value: decode_payload(&row.value)?, annotations })
            })
            .collect()
    }

    async fn metadata(&self, key: EntityKey) -> Result<EntityMetadata, StoreError> {
        let meta: MetadataWire = self.call(methods::METADATA, json!([key]), 0).await?;
        Ok(EntityMetadata {
            expires_at_block: meta.expires_at_block,
            owner: meta.owner,
            annotations: meta.annotations,
        })
    }

    async fn extend(&self, extensions: Vec<EntityExtension>) -> Result<Vec<ExtendReceipt>, StoreError> {
        let wire: Vec<ExtendWire<'_>> = extensions
            .iter()
            .map(|x| ExtendWire { entity_key: &x.key, number_of_blocks: x.blocks })
            .collect();
        let receipts: Vec<ExtendReceiptWire> =
            self.call(methods::EXTEND, json!([wire]), extensions.len()).await?;
        Ok(receipts
            .into_iter()
            .map(|r| ExtendReceipt {
                key: r.entity_key,
                old_expiration_block: r.old_expiration_block,
                new_expiration_block: r.new_expiration_block,
            })
            .collect())
    }

    async fn delete(&self, keys: Vec<EntityKey>) -> Result<(), StoreError> {
        let batch_len = keys.len();
        let _: Value = self.call(methods::DELETE, json!([keys]), batch_len).await?;
        Ok(())
    }
}

impl AnnotatedStore for RpcStore {
    fn create_entities(
        &self,
        entities: Vec<EntityCreate>,
    ) -> BoxFuture<'_, Result<Vec<EntityKey>, StoreError>> {
        self.create(entities).boxed()
    }

    fn query_entities(&self, query: StoreQuery) -> BoxFuture<'_, Result<Vec<QueryEntity>, StoreError>> {
        self.query(query).boxed()
    }

    fn get_entity_metadata(&self, key: EntityKey) -> BoxFuture<'_, Result<EntityMetadata, StoreError>> {
        self.metadata(key).boxed()
    }

    fn extend_entities(
        &self,
        extensions: Vec<EntityExtension>,
    ) -> BoxFuture<'_, Result<Vec<ExtendReceipt>, StoreError>> {
        self.extend(extensions).boxed()
    }

    fn delete_entities(&self, keys: Vec<EntityKey>) -> BoxFuture<'_, Result<(), StoreError>> {
        self.delete(keys).boxed()
    }

    fn name(&self) -> &'static str {
        "rpc"
    }
}
