use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use crate::runtime::store::{
    AnnotatedStore, Annotations, EntityCreate, EntityExtension, EntityKey, EntityMetadata,
    ExtendReceipt, QueryEntity, StoreError, StoreQuery,
};

pub const MEMORY_OWNER: &str = "0x0000000000000000000000000000000000000000";
/// Most recent create requests kept for [`MemoryStore::create_calls`].
pub const CREATE_LOG_LIMIT: usize = 256;

#[derive(Debug, Clone)]
struct StoredEntity {
    data: Vec<u8>,
    annotations: Annotations,
    expires_at_block: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    entities: BTreeMap<EntityKey, StoredEntity>,
    block: u64,
    next_id: u64,
    create_calls: VecDeque<usize>,
    fail_after_creates: Option<usize>,
}

impl MemoryState {
    fn expire(&mut self) {
        let block = self.block;
        self.entities.retain(|_, e| e.expires_at_block > block);
    }
}

/// Process-local store. Lifetimes count against a logical block number that
/// only moves through [`MemoryStore::advance_blocks`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    max_entities_per_create: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects create requests above `limit` entities as payload-too-large.
    pub fn with_create_limit(limit: usize) -> Self {
        Self { state: Mutex::default(), max_entities_per_create: Some(limit) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn advance_blocks(&self, blocks: u64) {
        let mut st = self.lock();
        st.block = st.block.saturating_add(blocks);
        st.expire();
    }

    pub fn current_block(&self) -> u64 {
        self.lock().block
    }

    pub fn len(&self) -> usize {
        self.lock().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Batch sizes of the last [`CREATE_LOG_LIMIT`] create requests, oldest
    /// first, including rejected ones.
    pub fn create_calls(&self) -> Vec<usize> {
        self.lock().create_calls.iter().copied().collect()
    }

    /// Lets `successes` more create requests through, then fails the next one
    /// with an RPC error.
    pub fn fail_create_after(&self, successes: usize) {
        self.lock().fail_after_creates = Some(successes);
    }

    fn create(&self, entities: Vec<EntityCreate>) -> Result<Vec<EntityKey>, StoreError> {
        let mut st = self.lock();
        if st.create_calls.len() == CREATE_LOG_LIMIT {
            st.create_calls.pop_front();
        }
        st.create_calls.push_back(entities.len());
        if self.max_entities_per_create.is_some_and(|limit| entities.len() > limit) {
            return Err(StoreError::PayloadTooLarge(entities.len()));
        }
        match st.fail_after_creates {
            Some(0) => {
                st.fail_after_creates = None;
                return Err(StoreError::Rpc { code: -32000, message: "injected create failure".into() });
            }
            Some(n) => st.fail_after_creates = Some(n - 1),
            None => {}
        }
        let block = st.block;
        let mut keys = Vec::with_capacity(entities.len());
        for e in entities {
            st.next_id += 1;
            let key = EntityKey(format!("0x{:064x}", st.next_id));
            st.entities.insert(
                key.clone(),
                StoredEntity {
                    data: e.data,
                    annotations: e.annotations,
                    expires_at_block: block.saturating_add(e.btl),
                },
            );
            keys.push(key);
        }
        Ok(keys)
    }

    fn query(&self, query: &StoreQuery) -> Vec<QueryEntity> {
        let mut st = self.lock();
        st.expire();
        st.entities
            .iter()
            .filter(|(_, e)| query.matches(&e.annotations))
            .map(|(k, e)| QueryEntity {
                key: k.clone(),
                value: e.data.clone(),
                annotations: Some(e.annotations.clone()),
            })
            .collect()
    }

    fn metadata(&self, key: &EntityKey) -> Result<EntityMetadata, StoreError> {
        let mut st = self.lock();
        st.expire();
        let e = st.entities.get(key).ok_or_else(|| StoreError::NotFound(key.clone()))?;
        Ok(EntityMetadata {
            expires_at_block: e.expires_at_block,
            owner: Some(MEMORY_OWNER.to_string()),
            annotations: e.annotations.clone(),
        })
    }

    fn extend(&self, extensions: Vec<EntityExtension>) -> Result<Vec<ExtendReceipt>, StoreError> {
        let mut st = self.lock();
        st.expire();
        if let Some(missing) = extensions.iter().find(|x| !st.entities.contains_key(&x.key)) {
            return Err(StoreError::NotFound(missing.key.clone()));
        }
        let mut receipts = Vec::with_capacity(extensions.len());
        for x in extensions {
            if let Some(e) = st.entities.get_mut(&x.key) {
                let old = e.expires_at_block;
                e.expires_at_block = old.saturating_add(x.blocks);
                receipts.push(ExtendReceipt {
                    key: x.key,
                    old_expiration_block: old,
                    new_expiration_block: e.expires_at_block,
                });
            }
        }
        Ok(receipts)
    }

    fn delete(&self, keys: Vec<EntityKey>) -> Result<(), StoreError> {
        let mut st = self.lock();
        if let Some(missing) = keys.iter().find(|k| !st.entities.contains_key(*k)) {
            return Err(StoreError::NotFound(missing.clone()));
        }
        for k in keys {
            st.entities.remove(&k);
        }
        Ok(())
    }
}

impl AnnotatedStore for MemoryStore {
    fn create_entities(
        &self,
        entities: Vec<EntityCreate>,
    ) -> BoxFuture<'_, Result<Vec<EntityKey>, StoreError>> {
        let res = self.create(entities);
        async move { res }.boxed()
    }

    fn query_entities(&self, query: StoreQuery) -> BoxFuture<'_, Result<Vec<QueryEntity>, StoreError>> {
        let res = self.query(&query);
        async move { Ok(res) }.boxed()
    }

    fn get_entity_metadata(&self, key: EntityKey) -> BoxFuture<'_, Result<EntityMetadata, StoreError>> {
        let res = self.metadata(&key);
        async move { res }.boxed()
    }

    fn extend_entities(
        &self,
        extensions: Vec<EntityExtension>,
    ) -> BoxFuture<'_, Result<Vec<ExtendReceipt>, StoreError>> {
        let res = self.extend(extensions);
        async move { res }.boxed()
    }

    fn delete_entities(&self, keys: Vec<EntityKey>) -> BoxFuture<'_, Result<(), StoreError>> {
        let res = self.delete(keys);
        async move { res }.boxed()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
