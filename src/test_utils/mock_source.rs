use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

use crate::modules::liquidity::schemas::{PoolConfig, RawPoolData};
use crate::modules::liquidity::sources::defs::{FetchError, PoolSource};

/// Mock upstream for testing
/// Serves a scripted response per pool address and counts every fetch.
#[derive(Default)]
pub struct ScriptedPoolSource {
    scripts: Mutex<HashMap<String, Result<RawPoolData, String>>>,
    fetches: AtomicUsize,
    entered: Arc<Notify>,
    gate: Option<Arc<Notify>>,
    delay: Option<Duration>,
}

impl ScriptedPoolSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch waits for one `notify_one` on the returned handle.
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    /// Every fetch sleeps for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Result<RawPoolData, String>>> {
        self.scripts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn respond(&self, pool_address: &str, raw: RawPoolData) {
        self.lock().insert(pool_address.to_ascii_lowercase(), Ok(raw));
    }

    pub fn fail(&self, pool_address: &str, message: &str) {
        self.lock().insert(pool_address.to_ascii_lowercase(), Err(message.to_string()));
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Resolves once a fetch has started.
    pub async fn wait_for_fetch(&self) {
        self.entered.notified().await;
    }
}

impl PoolSource for ScriptedPoolSource {
    fn fetch_pool<'a>(&'a self, pool: &'a PoolConfig) -> BoxFuture<'a, Result<RawPoolData, FetchError>> {
        async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let scripted = self.lock().get(&pool.pool_address.to_ascii_lowercase()).cloned();
            match scripted {
                Some(Ok(raw)) => Ok(raw),
                Some(Err(message)) => Err(FetchError::Upstream { index: 0, message }),
                None => Err(FetchError::Upstream {
                    index: 0,
                    message: format!("no script for {}", pool.pool_address),
                }),
            }
        }
        .boxed()
    }
}
