/// Collection cycles end to end against the memory store: per-pool failure
/// isolation, single-flight, timeouts and the pool set.
mod common;

use common::{PoolscopeHarness, SNAPSHOT_HOUR, raw_ladder, test_pool};
use poolscope::modules::liquidity::collector::CollectOutcome;
use poolscope::modules::liquidity::config::CollectorSettings;
use poolscope::test_utils::ScriptedPoolSource;
use std::sync::Arc;
use std::time::Duration;

const POOL_A: &str = "0xaaaa000000000000000000000000000000000001";
const POOL_B: &str = "0xbbbb000000000000000000000000000000000002";
const POOL_C: &str = "0xcccc000000000000000000000000000000000003";

fn completed(outcome: CollectOutcome) -> poolscope::modules::liquidity::collector::CollectReport {
    match outcome {
        CollectOutcome::Completed(report) => report,
        CollectOutcome::Skipped => panic!("collection was skipped"),
    }
}

#[tokio::test]
async fn one_failing_pool_does_not_block_the_others() {
    let h = PoolscopeHarness::new(&[POOL_A, POOL_B, POOL_C]);
    h.source.respond(POOL_A, raw_ladder(205, 120));
    h.source.fail(POOL_B, "pool not found");
    h.source.respond(POOL_C, raw_ladder(-3_005, 40));

    let report = completed(h.collector.collect_now().await);
    assert_eq!(h.source.fetches(), 3);
    assert_eq!(report.stored.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert!(!report.all_failed());
    assert_eq!(report.failed[0].pool_address, POOL_B);
    assert!(report.failed[0].error.contains("pool not found"));

    let a = report.stored.iter().find(|s| s.pool_address == POOL_A).unwrap();
    assert_eq!(a.records, 100);
    assert_eq!(a.timestamp, SNAPSHOT_HOUR);
    let c = report.stored.iter().find(|s| s.pool_address == POOL_C).unwrap();
    assert_eq!(c.records, 40);
    assert_eq!(h.store.len(), 140);

    let latest = h.storage.latest(POOL_A).await.unwrap();
    assert_eq!(latest.len(), 100);
    assert!(latest.iter().all(|r| r.timestamp == SNAPSHOT_HOUR));
    assert!(latest.windows(2).all(|w| w[0].tick_idx < w[1].tick_idx));
    // window is centred on the range nearest the current tick
    assert_eq!(latest.first().unwrap().tick_idx, 200 - 50 * 10);
    assert_eq!(latest.last().unwrap().tick_idx, 200 + 49 * 10);

    assert!(h.storage.latest(POOL_B).await.unwrap().is_empty());
}

#[tokio::test]
async fn stored_records_keep_the_transformed_values() {
    let h = PoolscopeHarness::new(&[POOL_A]);
    h.source.respond(POOL_A, raw_ladder(205, 8));
    completed(h.collector.collect_now().await);

    let latest = h.storage.latest(POOL_A).await.unwrap();
    assert_eq!(latest.len(), 8);
    for r in &latest {
        assert!(r.price_lower < r.price_upper);
        assert!(r.token0_amount >= 0.0 && r.token1_amount >= 0.0);
        assert!((r.total_amount - (r.token0_amount + r.token1_amount)).abs() <= 1e-9 * r.total_amount);
    }
    // ranges wholly above the current price hold only token0, below only token1
    let above = latest.iter().find(|r| r.tick_idx > 210).unwrap();
    assert_eq!(above.token1_amount, 0.0);
    let below = latest.iter().find(|r| r.tick_idx < 190).unwrap();
    assert_eq!(below.token0_amount, 0.0);
}

#[tokio::test]
async fn overlapping_runs_are_skipped() {
    let (source, gate) = ScriptedPoolSource::new().gated();
    let h = PoolscopeHarness::with_source(source, &[POOL_A]);
    h.source.respond(POOL_A, raw_ladder(205, 20));

    let collector = Arc::clone(&h.collector);
    let first = tokio::spawn(async move { collector.collect_now().await });
    h.source.wait_for_fetch().await;
    assert!(h.collector.is_running());
    assert!(h.collector.status().await.is_running);

    assert_eq!(h.collector.collect_now().await, CollectOutcome::Skipped);
    assert_eq!(h.source.fetches(), 1);

    gate.notify_one();
    let report = completed(first.await.unwrap());
    assert_eq!(report.stored.len(), 1);
    assert!(!h.collector.is_running());
}

#[tokio::test(start_paused = true)]
async fn slow_upstream_times_out() {
    let source = ScriptedPoolSource::new().with_delay(Duration::from_secs(120));
    let h = PoolscopeHarness::with_source(source, &[POOL_A]);
    h.source.respond(POOL_A, raw_ladder(205, 20));

    let report = completed(h.collector.collect_now().await);
    assert!(report.all_failed());
    assert!(report.failed[0].error.contains("timed out"));
    assert!(h.store.is_empty());
    assert!(!h.collector.is_running());
}

#[tokio::test]
async fn pool_set_can_change_between_runs() {
    let h = PoolscopeHarness::new(&[POOL_A]);
    h.source.respond(POOL_A, raw_ladder(205, 10));
    h.source.respond(POOL_B, raw_ladder(205, 10));

    assert!(!h.collector.add_pool(test_pool(&POOL_A.to_uppercase().replace("0X", "0x"))).await);
    assert!(h.collector.add_pool(test_pool(POOL_B)).await);
    assert_eq!(h.collector.status().await.pools, 2);

    completed(h.collector.collect_now().await);
    assert_eq!(h.store.len(), 20);

    assert!(h.collector.remove_pool(POOL_A).await);
    assert!(!h.collector.remove_pool(POOL_A).await);
    let report = completed(h.collector.collect_now().await);
    assert_eq!(report.stored.len(), 1);
    assert_eq!(report.stored[0].pool_address, POOL_B);
}

#[tokio::test]
async fn scheduler_starts_once_and_stops() {
    let h = PoolscopeHarness::new(&[POOL_A]);
    assert!(!h.collector.is_scheduled());
    assert!(h.collector.start_scheduler());
    assert!(!h.collector.start_scheduler());
    assert!(h.collector.is_scheduled());

    assert!(h.collector.stop_scheduler());
    assert!(!h.collector.is_scheduled());
    assert!(!h.collector.stop_scheduler());
    assert_eq!(h.source.fetches(), 0);
}

#[tokio::test]
async fn stopping_the_scheduler_lets_the_running_cycle_finish() {
    let (source, gate) = ScriptedPoolSource::new().gated();
    let settings = CollectorSettings { run_immediately: true, ..CollectorSettings::default() };
    let h = PoolscopeHarness::with_settings(source, settings, &[POOL_A]);
    h.source.respond(POOL_A, raw_ladder(205, 20));

    assert!(h.collector.start_scheduler());
    h.source.wait_for_fetch().await;
    assert!(h.collector.stop_scheduler());
    assert!(!h.collector.is_scheduled());
    assert!(h.collector.is_running());
    assert!(h.store.is_empty());

    gate.notify_one();
    tokio::time::timeout(Duration::from_secs(5), h.collector.shutdown()).await.unwrap();
    assert!(!h.collector.is_running());
    assert!(!h.collector.is_scheduled());
    assert_eq!(h.source.fetches(), 1);
    assert_eq!(h.store.len(), 20);
    assert_eq!(h.storage.latest(POOL_A).await.unwrap().len(), 20);
}

#[tokio::test]
async fn shutdown_without_a_scheduler_returns_at_once() {
    let h = PoolscopeHarness::new(&[POOL_A]);
    tokio::time::timeout(Duration::from_secs(5), h.collector.shutdown()).await.unwrap();
    assert!(!h.collector.is_scheduled());
    assert_eq!(h.source.fetches(), 0);
}

#[tokio::test]
async fn pool_addresses_match_regardless_of_case() {
    const MIXED: &str = "0xd0b53D9277642d899df5c87a3966a349a798f224";
    let lower = MIXED.to_ascii_lowercase();
    let h = PoolscopeHarness::new(&[MIXED]);
    h.source.respond(MIXED, raw_ladder(205, 12));
    completed(h.collector.collect_now().await);

    let latest = h.storage.latest(&lower).await.unwrap();
    assert_eq!(latest.len(), 12);
    assert!(latest.iter().all(|r| r.pool_address == lower));
    assert_eq!(h.storage.latest(MIXED).await.unwrap().len(), 12);
    assert_eq!(h.storage.latest(&MIXED.to_ascii_uppercase().replace("0X", "0x")).await.unwrap().len(), 12);
    assert_eq!(h.storage.purge_pool(&lower).await.unwrap(), 12);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn empty_pool_set_completes_without_failures() {
    let h = PoolscopeHarness::new(&[]);
    let report = completed(h.collector.collect_now().await);
    assert!(report.stored.is_empty());
    assert!(!report.all_failed());
}
