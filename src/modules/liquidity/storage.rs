use anyhow::Result;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::config::StoreSettings;
use super::consts::{
    DEFAULT_QUERY_LIMIT, METADATA_FETCH_CONCURRENCY, PURGE_BATCH_SIZE, RECORD_TYPE,
    STATS_QUERY_LIMIT, TIME_RANGE_QUERY_LIMIT, tags,
};
use super::schemas::{PoolSnapshot, StoredPoolData};
use super::utils::records::{decode_record, group_by_timestamp, snapshot_entities, sort_newest_first};
use super::utils::stats::{PoolStats, summarize};
use crate::debug_timer_log;
use crate::runtime::store::{
    AnnotatedStore, Annotations, EntityCreate, EntityExtension, EntityKey, EntityMetadata,
    QueryEntity, StoreError, StoreQuery, with_backoff,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRangeParams {
    pub pool_address: String,
    pub start: Option<OffsetDateTime>,
    pub end: Option<OffsetDateTime>,
    pub limit: usize,
}

impl QueryRangeParams {
    pub fn new(pool_address: impl Into<String>) -> Self {
        Self { pool_address: pool_address.into(), start: None, end: None, limit: DEFAULT_QUERY_LIMIT }
    }

    pub fn with_range(mut self, start: Option<OffsetDateTime>, end: Option<OffsetDateTime>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendLatestResult {
    pub timestamp: Option<OffsetDateTime>,
    pub extended: usize,
    pub expires_at_block: Option<u64>,
    /// Account that owns the extended records, when the store reports one.
    pub owner: Option<String>,
}

fn unix_secs(ts: OffsetDateTime) -> u64 {
    u64::try_from(ts.unix_timestamp()).unwrap_or(0)
}

async fn pause(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}

fn push_decoded(out: &mut Vec<StoredPoolData>, key: EntityKey, ann: &Annotations) {
    match decode_record(key.clone(), ann) {
        Ok(r) => out.push(r),
        Err(e) => warn!(key = %key, "[store] skipping undecodable record: {e:#}"),
    }
}

/// Snapshot persistence on top of an [`AnnotatedStore`]: chunked writes on the
/// way in, tag queries and reconstruction on the way out.
pub struct SnapshotStorage {
    store: Arc<dyn AnnotatedStore>,
    settings: StoreSettings,
}

impl SnapshotStorage {
    pub fn new(store: Arc<dyn AnnotatedStore>, settings: StoreSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    /// Addresses are tagged lowercase, so lookups are case-insensitive.
    fn pool_query(pool_address: &str) -> StoreQuery {
        StoreQuery::new()
            .str_eq(tags::TYPE, RECORD_TYPE)
            .str_eq(tags::POOL_ADDRESS, pool_address.to_ascii_lowercase())
    }

    /* ---------- write path ---------- */

    /// Writes every range of `snapshot`. On failure the records already created
    /// are deleted again, so a pool yields the whole snapshot or nothing.
    pub async fn write_snapshot(&self, snapshot: &PoolSnapshot) -> Result<Vec<EntityKey>> {
        debug_timer_log!("write_snapshot");
        let entities = snapshot_entities(snapshot, self.settings.btl_blocks)?;
        let mut written = Vec::with_capacity(entities.len());

        for (i, batch) in entities.chunks(self.settings.batch_size).enumerate() {
            if i > 0 {
                pause(self.settings.batch_delay()).await;
            }
            if let Err(e) = self.create_with_fallback(batch, &mut written).await {
                self.rollback(&written).await;
                return Err(e.into());
            }
        }
        debug!(
            pool = %snapshot.pool_address,
            records = written.len(),
            "[store] snapshot written"
        );
        Ok(written)
    }

    async fn create_with_fallback(
        &self,
        batch: &[EntityCreate],
        written: &mut Vec<EntityKey>,
    ) -> Result<(), StoreError> {
        match self.store.create_entities(batch.to_vec()).await {
            Ok(keys) => {
                written.extend(keys);
                return Ok(());
            }
            Err(StoreError::PayloadTooLarge(n)) => {
                warn!(entities = n, "[store] batch too large, retrying in halves");
            }
            Err(e) => return Err(e),
        }

        let half = batch.len().div_ceil(2);
        for (i, sub) in batch.chunks(half).enumerate() {
            if i > 0 {
                pause(self.settings.chunk_delay()).await;
            }
            match self.store.create_entities(sub.to_vec()).await {
                Ok(keys) => written.extend(keys),
                Err(StoreError::PayloadTooLarge(n)) => {
                    warn!(
                        entities = n,
                        chunk = self.settings.small_chunk_size,
                        "[store] half batch still too large, falling back to small chunks"
                    );
                    for (j, small) in sub.chunks(self.settings.small_chunk_size).enumerate() {
                        if j > 0 {
                            pause(self.settings.chunk_delay()).await;
                        }
                        written.extend(self.store.create_entities(small.to_vec()).await?);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn rollback(&self, written: &[EntityKey]) {
        if written.is_empty() {
            return;
        }
        for chunk in written.chunks(PURGE_BATCH_SIZE) {
            if let Err(e) = self.store.delete_entities(chunk.to_vec()).await {
                warn!(records = chunk.len(), "[store] rollback of partial snapshot failed: {e}");
            }
        }
        info!(records = written.len(), "[store] rolled back partial snapshot");
    }

    /* ---------- read path ---------- */

    async fn query_entities(&self, query: StoreQuery) -> Result<Vec<QueryEntity>, StoreError> {
        debug!(query = %query, "[store] query");
        with_backoff("query", self.settings.read_retries, self.settings.read_backoff(), || {
            self.store.query_entities(query.clone())
        })
        .await
    }

    pub async fn metadata(&self, key: &EntityKey) -> Result<EntityMetadata, StoreError> {
        with_backoff("metadata", self.settings.read_retries, self.settings.read_backoff(), || {
            self.store.get_entity_metadata(key.clone())
        })
        .await
    }

    /// Decodes query hits, reading tags through the metadata call when the
    /// query result did not carry them.
    async fn decode_entities(&self, entities: Vec<QueryEntity>) -> Result<Vec<StoredPoolData>, StoreError> {
        let mut out = Vec::with_capacity(entities.len());
        let mut missing = Vec::new();
        for e in entities {
            match e.annotations {
                Some(ann) if !ann.is_empty() => push_decoded(&mut out, e.key, &ann),
                _ => missing.push(e.key),
            }
        }

        for chunk in missing.chunks(METADATA_FETCH_CONCURRENCY) {
            let metas = join_all(chunk.iter().map(|key| self.metadata(key))).await;
            for (key, meta) in chunk.iter().zip(metas) {
                match meta {
                    Ok(meta) => push_decoded(&mut out, key.clone(), &meta.annotations),
                    Err(StoreError::NotFound(_)) => {
                        debug!(key = %key, "[store] record expired between query and read");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(out)
    }

    /// Records of one pool, newest first, truncated to `limit`.
    pub async fn query_range(&self, params: &QueryRangeParams) -> Result<Vec<StoredPoolData>, StoreError> {
        let mut query = Self::pool_query(&params.pool_address);
        if let Some(start) = params.start {
            query = query.num_ge(tags::TIMESTAMP_UNIX, unix_secs(start));
        }
        if let Some(end) = params.end {
            query = query.num_le(tags::TIMESTAMP_UNIX, unix_secs(end));
        }
        let hits = self.query_entities(query).await?;
        let mut records = self.decode_entities(hits).await?;
        sort_newest_first(&mut records);
        records.truncate(params.limit);
        Ok(records)
    }

    /// Every record of the newest snapshot found among the last `latest_window` records.
    pub async fn latest(&self, pool_address: &str) -> Result<Vec<StoredPoolData>, StoreError> {
        let window = self
            .query_range(&QueryRangeParams::new(pool_address).with_limit(self.settings.latest_window))
            .await?;
        let Some(newest) = window.iter().map(|r| r.timestamp).max() else {
            return Ok(Vec::new());
        };
        let mut records = self
            .query_range(
                &QueryRangeParams::new(pool_address)
                    .with_range(Some(newest), Some(newest))
                    .with_limit(usize::MAX),
            )
            .await?;
        records.retain(|r| r.timestamp == newest);
        records.sort_by_key(|r| r.tick_idx);
        Ok(records)
    }

    pub async fn time_range(
        &self,
        pool_address: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<BTreeMap<OffsetDateTime, Vec<StoredPoolData>>, StoreError> {
        let records = self
            .query_range(
                &QueryRangeParams::new(pool_address)
                    .with_range(Some(start), Some(end))
                    .with_limit(TIME_RANGE_QUERY_LIMIT),
            )
            .await?;
        Ok(group_by_timestamp(records))
    }

    pub async fn stats(
        &self,
        pool_address: &str,
        hours: u32,
        now: OffsetDateTime,
    ) -> Result<Option<PoolStats>, StoreError> {
        // windows reaching past the epoch cover every stored record
        let start = now
            .checked_sub(time::Duration::hours(i64::from(hours)))
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        let records = self
            .query_range(
                &QueryRangeParams::new(pool_address)
                    .with_range(Some(start), Some(now))
                    .with_limit(STATS_QUERY_LIMIT),
            )
            .await?;
        Ok(summarize(&records))
    }

    /* ---------- maintenance ---------- */

    /// Deletes every record of a pool. Returns how many were removed.
    pub async fn purge_pool(&self, pool_address: &str) -> Result<usize, StoreError> {
        let keys: Vec<EntityKey> = self
            .query_entities(Self::pool_query(pool_address))
            .await?
            .into_iter()
            .map(|e| e.key)
            .collect();
        info!(pool = pool_address, records = keys.len(), "[store] purging pool records");

        for (i, chunk) in keys.chunks(PURGE_BATCH_SIZE).enumerate() {
            if i > 0 {
                pause(self.settings.purge_delay()).await;
            }
            self.store.delete_entities(chunk.to_vec()).await?;
            debug!(pool = pool_address, deleted = chunk.len(), "[store] purge batch done");
        }
        Ok(keys.len())
    }

    /// Extends the lifetime of the newest snapshot's records by `blocks`.
    pub async fn extend_latest(
        &self,
        pool_address: &str,
        blocks: u64,
    ) -> Result<ExtendLatestResult, StoreError> {
        let records = self.latest(pool_address).await?;
        let Some(first) = records.first() else {
            return Ok(ExtendLatestResult {
                timestamp: None,
                extended: 0,
                expires_at_block: None,
                owner: None,
            });
        };
        let timestamp = first.timestamp;
        let probe = first.entity_key.clone();

        let mut extended = 0;
        for chunk in records.chunks(self.settings.batch_size) {
            let extensions = chunk
                .iter()
                .map(|r| EntityExtension { key: r.entity_key.clone(), blocks })
                .collect();
            extended += self.store.extend_entities(extensions).await?.len();
        }
        let meta = self.metadata(&probe).await?;
        info!(
            pool = pool_address,
            records = extended,
            expires_at_block = meta.expires_at_block,
            owner = meta.owner.as_deref().unwrap_or("unknown"),
            "[store] extended latest snapshot"
        );
        Ok(ExtendLatestResult {
            timestamp: Some(timestamp),
            extended,
            expires_at_block: Some(meta.expires_at_block),
            owner: meta.owner,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::memory_store::{MEMORY_OWNER, MemoryStore};
    use crate::test_utils::fixtures::snapshot_with_ticks;
    use time::macros::datetime;

    fn storage(store: Arc<MemoryStore>) -> SnapshotStorage {
        SnapshotStorage::new(store, StoreSettings::default().without_delays())
    }

    #[tokio::test]
    async fn oversized_batches_fall_back_to_halves_then_small_chunks() {
        let store = Arc::new(MemoryStore::with_create_limit(30));
        let s = storage(store.clone());
        let snap = snapshot_with_ticks("0xpool", datetime!(2025-09-06 14:00 UTC), 100);

        let keys = s.write_snapshot(&snap).await.unwrap();
        assert_eq!(keys.len(), 100);
        assert_eq!(store.len(), 100);
        // 100 rejected, 50 rejected, five chunks of 10, then the other half the same way
        assert_eq!(store.create_calls(), vec![100, 50, 10, 10, 10, 10, 10, 50, 10, 10, 10, 10, 10]);
    }

    #[tokio::test]
    async fn half_batches_are_enough_when_they_fit() {
        let store = Arc::new(MemoryStore::with_create_limit(60));
        let s = storage(store.clone());
        let snap = snapshot_with_ticks("0xpool", datetime!(2025-09-06 14:00 UTC), 100);
        s.write_snapshot(&snap).await.unwrap();
        assert_eq!(store.create_calls(), vec![100, 50, 50]);
    }

    #[tokio::test]
    async fn failed_write_leaves_nothing_behind() {
        let store = Arc::new(MemoryStore::new());
        let settings = StoreSettings { batch_size: 10, ..StoreSettings::default().without_delays() };
        let s = SnapshotStorage::new(store.clone(), settings);
        let snap = snapshot_with_ticks("0xpool", datetime!(2025-09-06 14:00 UTC), 25);

        store.fail_create_after(2);
        let err = s.write_snapshot(&snap).await.unwrap_err();
        assert!(err.to_string().contains("injected"));
        assert_eq!(store.create_calls(), vec![10, 10, 5]);
        assert!(store.is_empty());

        // the store recovers and the next attempt lands completely
        s.write_snapshot(&snap).await.unwrap();
        assert_eq!(store.len(), 25);
    }

    #[tokio::test]
    async fn latest_returns_the_whole_newest_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let s = storage(store);
        let old = datetime!(2025-09-06 13:00 UTC);
        let new = datetime!(2025-09-06 14:00 UTC);
        s.write_snapshot(&snapshot_with_ticks("0xpool", old, 80)).await.unwrap();
        s.write_snapshot(&snapshot_with_ticks("0xpool", new, 80)).await.unwrap();
        s.write_snapshot(&snapshot_with_ticks("0xother", new, 5)).await.unwrap();

        let settings = s.settings().clone();
        assert!(settings.latest_window < 160);
        let latest = s.latest("0xpool").await.unwrap();
        assert_eq!(latest.len(), 80);
        assert!(latest.iter().all(|r| r.timestamp == new && r.pool_address == "0xpool"));
        assert!(latest.windows(2).all(|w| w[0].tick_idx < w[1].tick_idx));

        assert!(s.latest("0xnone").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn query_range_sorts_then_truncates() {
        let store = Arc::new(MemoryStore::new());
        let s = storage(store);
        let t1 = datetime!(2025-09-06 12:00 UTC);
        let t2 = datetime!(2025-09-06 13:00 UTC);
        let t3 = datetime!(2025-09-06 14:00 UTC);
        for t in [t1, t2, t3] {
            s.write_snapshot(&snapshot_with_ticks("0xpool", t, 4)).await.unwrap();
        }

        let recs = s.query_range(&QueryRangeParams::new("0xpool").with_limit(6)).await.unwrap();
        assert_eq!(recs.len(), 6);
        assert!(recs.iter().all(|r| r.timestamp >= t2));
        assert_eq!(recs[0].timestamp, t3);

        let recs = s
            .query_range(&QueryRangeParams::new("0xpool").with_range(Some(t1), Some(t2)))
            .await
            .unwrap();
        assert_eq!(recs.len(), 8);
        assert!(recs.iter().all(|r| r.timestamp <= t2));

        let groups = s.time_range("0xpool", t1, t3).await.unwrap();
        assert_eq!(groups.keys().copied().collect::<Vec<_>>(), vec![t1, t2, t3]);
    }

    #[tokio::test]
    async fn stats_cover_the_requested_hours() {
        let store = Arc::new(MemoryStore::new());
        let s = storage(store);
        let now = datetime!(2025-09-06 14:30 UTC);
        s.write_snapshot(&snapshot_with_ticks("0xpool", datetime!(2025-09-06 14:00 UTC), 3)).await.unwrap();
        s.write_snapshot(&snapshot_with_ticks("0xpool", datetime!(2025-09-06 12:00 UTC), 3)).await.unwrap();
        s.write_snapshot(&snapshot_with_ticks("0xpool", datetime!(2025-09-04 12:00 UTC), 3)).await.unwrap();

        let stats = s.stats("0xpool", 24, now).await.unwrap().unwrap();
        assert_eq!(stats.snapshots, 2);
        assert_eq!(stats.total_data_points, 6);
        assert_eq!(stats.oldest_snapshot, datetime!(2025-09-06 12:00 UTC));

        assert!(s.stats("0xnone", 24, now).await.unwrap().is_none());

        let all = s.stats("0xpool", u32::MAX, now).await.unwrap().unwrap();
        assert_eq!(all.snapshots, 3);
        assert_eq!(all.total_data_points, 9);
    }

    #[tokio::test]
    async fn purge_and_extend() {
        let store = Arc::new(MemoryStore::new());
        let s = storage(store.clone());
        s.write_snapshot(&snapshot_with_ticks("0xpool", datetime!(2025-09-06 13:00 UTC), 150)).await.unwrap();
        s.write_snapshot(&snapshot_with_ticks("0xpool", datetime!(2025-09-06 14:00 UTC), 5)).await.unwrap();
        s.write_snapshot(&snapshot_with_ticks("0xkeep", datetime!(2025-09-06 14:00 UTC), 5)).await.unwrap();

        let res = s.extend_latest("0xpool", 1_000).await.unwrap();
        assert_eq!(res.extended, 5);
        assert_eq!(res.timestamp, Some(datetime!(2025-09-06 14:00 UTC)));
        assert_eq!(res.expires_at_block, Some(s.settings().btl_blocks + 1_000));
        assert_eq!(res.owner.as_deref(), Some(MEMORY_OWNER));

        assert_eq!(s.purge_pool("0xpool").await.unwrap(), 155);
        assert_eq!(store.len(), 5);
        assert_eq!(s.purge_pool("0xpool").await.unwrap(), 0);

        let none = s.extend_latest("0xpool", 10).await.unwrap();
        assert_eq!(none.extended, 0);
        assert_eq!(none.owner, None);
    }
}
