use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use poolscope::config::{Command, build_collector, get_config, init_config};
use poolscope::logging::init_tracing;
use poolscope::modules::liquidity::collector::{CollectOutcome, Collector};
use poolscope::modules::liquidity::server::{ApiState, run};

async fn serve(collector: Arc<Collector>) -> Result<()> {
    let cfg = get_config();
    if cfg.collector.schedule_on_start {
        collector.start_scheduler();
    } else {
        info!("[collector] scheduler disabled at startup");
    }

    let state = ApiState::new(Arc::clone(&collector));
    tokio::select! {
        res = run(cfg.bind, state) => res.context("api server exited"),
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            collector.shutdown().await;
            Ok(())
        }
    }
}

async fn collect_once(collector: &Collector) -> Result<()> {
    match collector.collect_now().await {
        CollectOutcome::Skipped => Ok(()),
        CollectOutcome::Completed(report) => {
            for f in &report.failed {
                warn!(pool = %f.pool_address, "collection failed: {}", f.error);
            }
            if report.all_failed() {
                anyhow::bail!("collection failed for every pool");
            }
            info!(stored = report.stored.len(), "collection finished");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = match init_config() {
        Ok(args) => args,
        Err(e) => {
            init_tracing("info");
            error!("config error: {e:#}");
            return Err(e);
        }
    };
    init_tracing(&args.log_level);

    let cfg = get_config();
    info!(
        bind = %cfg.bind,
        pools = cfg.pools.len(),
        backend = ?cfg.backend_kind(),
        "poolscope starting"
    );
    let collector = build_collector(cfg)?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(collector).await,
        Command::Collect => collect_once(&collector).await,
        Command::Purge { pool } => {
            let removed = collector.storage().purge_pool(&pool).await?;
            info!(pool = %pool, removed, "purge finished");
            Ok(())
        }
        Command::Extend { pool, blocks } => {
            let res = collector.storage().extend_latest(&pool, blocks).await?;
            info!(
                pool = %pool,
                extended = res.extended,
                expires_at_block = ?res.expires_at_block,
                owner = ?res.owner,
                "extend finished"
            );
            Ok(())
        }
    }
}
