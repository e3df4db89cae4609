use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Opaque key assigned by the store on create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(pub String);

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation<T> {
    pub key: String,
    pub value: T,
}

impl<T> Annotation<T> {
    pub fn new(key: impl Into<String>, value: T) -> Self {
        Self { key: key.into(), value }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotations {
    #[serde(default)]
    pub string_annotations: Vec<Annotation<String>>,
    #[serde(default)]
    pub numeric_annotations: Vec<Annotation<u64>>,
}

impl Annotations {
    pub fn string(&self, key: &str) -> Option<&str> {
        self.string_annotations.iter().find(|a| a.key == key).map(|a| a.value.as_str())
    }

    pub fn numeric(&self, key: &str) -> Option<u64> {
        self.numeric_annotations.iter().find(|a| a.key == key).map(|a| a.value)
    }

    pub fn is_empty(&self) -> bool {
        self.string_annotations.is_empty() && self.numeric_annotations.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityCreate {
    pub data: Vec<u8>,
    /// Lifetime in blocks.
    pub btl: u64,
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryEntity {
    pub key: EntityKey,
    pub value: Vec<u8>,
    /// Some gateways return tags inline; otherwise they come from the metadata call.
    pub annotations: Option<Annotations>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMetadata {
    pub expires_at_block: u64,
    pub owner: Option<String>,
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityExtension {
    pub key: EntityKey,
    pub blocks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendReceipt {
    pub key: EntityKey,
    pub old_expiration_block: u64,
    pub new_expiration_block: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("payload too large for a single request ({0} entities)")]
    PayloadTooLarge(usize),
    #[error("store transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed store response: {0}")]
    Decode(String),
    #[error("entity not found: {0}")]
    NotFound(EntityKey),
}

impl StoreError {
    /// Transient failures worth another read attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transport(_) | StoreError::Rpc { .. })
    }
}

/* ---------- query expressions ---------- */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    StrEq(String, String),
    NumGe(String, u64),
    NumLe(String, u64),
}

impl Predicate {
    fn matches(&self, ann: &Annotations) -> bool {
        match self {
            Predicate::StrEq(k, v) => ann.string(k) == Some(v.as_str()),
            Predicate::NumGe(k, v) => ann.numeric(k).is_some_and(|n| n >= *v),
            Predicate::NumLe(k, v) => ann.numeric(k).is_some_and(|n| n <= *v),
        }
    }
}

/// Conjunction of tag predicates, rendered in the store's query syntax:
/// `type = "pool_snapshot" && timestampUnix >= 1700000000`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreQuery {
    predicates: Vec<Predicate>,
}

impl StoreQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn str_eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.predicates.push(Predicate::StrEq(key.into(), value.into()));
        self
    }

    pub fn num_ge(mut self, key: impl Into<String>, value: u64) -> Self {
        self.predicates.push(Predicate::NumGe(key.into(), value));
        self
    }

    pub fn num_le(mut self, key: impl Into<String>, value: u64) -> Self {
        self.predicates.push(Predicate::NumLe(key.into(), value));
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn matches(&self, ann: &Annotations) -> bool {
        self.predicates.iter().all(|p| p.matches(ann))
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

impl fmt::Display for StoreQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.predicates.iter().enumerate() {
            if i > 0 {
                f.write_str(" && ")?;
            }
            match p {
                Predicate::StrEq(k, v) => {
                    write!(f, "{k} = ")?;
                    write_quoted(f, v)?;
                }
                Predicate::NumGe(k, v) => write!(f, "{k} >= {v}")?,
                Predicate::NumLe(k, v) => write!(f, "{k} <= {v}")?,
            }
        }
        Ok(())
    }
}

/* ---------- store seam ---------- */

/// Append-only store of opaque payloads with string and numeric tags.
/// Records expire after their BTL unless extended.
pub trait AnnotatedStore: Send + Sync {
    fn create_entities(
        &self,
        entities: Vec<EntityCreate>,
    ) -> BoxFuture<'_, Result<Vec<EntityKey>, StoreError>>;

    fn query_entities(&self, query: StoreQuery) -> BoxFuture<'_, Result<Vec<QueryEntity>, StoreError>>;

    fn get_entity_metadata(&self, key: EntityKey) -> BoxFuture<'_, Result<EntityMetadata, StoreError>>;

    fn extend_entities(
        &self,
        extensions: Vec<EntityExtension>,
    ) -> BoxFuture<'_, Result<Vec<ExtendReceipt>, StoreError>>;

    fn delete_entities(&self, keys: Vec<EntityKey>) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Short label for logs.
    fn name(&self) -> &'static str;
}

/// Retries `op` on transient errors, doubling the delay each time.
pub async fn with_backoff<T, F, Fut>(
    label: &str,
    retries: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < retries && e.is_retryable() => {
                let delay = base_delay.saturating_mul(2u32.saturating_pow(attempt));
                tracing::warn!(
                    op = label,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "[store] {e}; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
