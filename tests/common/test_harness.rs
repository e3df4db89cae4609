/// In-process poolscope: scripted upstream, memory store, collector and router
/// sharing one state, with the clock pinned to a fixed instant.
use axum::Router;
use poolscope::modules::liquidity::collector::Collector;
use poolscope::modules::liquidity::config::{CollectorSettings, StoreSettings};
use poolscope::modules::liquidity::server::{ApiState, router};
use poolscope::modules::liquidity::storage::SnapshotStorage;
use poolscope::runtime::memory_store::MemoryStore;
use poolscope::test_utils::ScriptedPoolSource;
use poolscope::test_utils::fixtures::test_pool;
use std::sync::Arc;
use time::OffsetDateTime;
use time::macros::datetime;

/// Hour every snapshot taken by the harness lands in.
pub const SNAPSHOT_HOUR: OffsetDateTime = datetime!(2025-09-06 14:00 UTC);

fn fixed_clock() -> OffsetDateTime {
    datetime!(2025-09-06 14:37:12 UTC)
}

#[allow(dead_code)]
pub struct PoolscopeHarness {
    pub store: Arc<MemoryStore>,
    pub source: Arc<ScriptedPoolSource>,
    pub storage: Arc<SnapshotStorage>,
    pub collector: Arc<Collector>,
}

#[allow(dead_code)]
impl PoolscopeHarness {
    pub fn new(pool_addresses: &[&str]) -> Self {
        Self::with_source(ScriptedPoolSource::new(), pool_addresses)
    }

    pub fn with_source(source: ScriptedPoolSource, pool_addresses: &[&str]) -> Self {
        Self::with_settings(source, CollectorSettings::default(), pool_addresses)
    }

    pub fn with_settings(
        source: ScriptedPoolSource,
        settings: CollectorSettings,
        pool_addresses: &[&str],
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(source);
        let storage = Arc::new(SnapshotStorage::new(
            store.clone(),
            StoreSettings::default().without_delays(),
        ));
        let pools = pool_addresses.iter().map(|a| test_pool(a)).collect();
        let collector = Collector::new(
            source.clone(),
            Arc::clone(&storage),
            settings,
            pools,
        )
        .with_clock(fixed_clock);
        Self { store, source, storage, collector: Arc::new(collector) }
    }

    pub fn router(&self) -> Router {
        router(ApiState::new(Arc::clone(&self.collector)))
    }
}
