use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::backend::BackendAdapter;
use crate::config::GatewayConfig;

/// How often the idle checker wakes to hibernate unused backends.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Name → adapter map, built once at startup from the enabled backends and
/// read-only thereafter. Insertion order follows the config file and is the
/// iteration order observed by the meta facade.
pub struct Registry {
    adapters: IndexMap<String, Arc<BackendAdapter>>,
}

impl Registry {
    pub fn from_config(config: &GatewayConfig) -> Self {
        let adapters = config
            .enabled_backends()
            .map(|(name, backend)| {
                (
                    name.clone(),
                    Arc::new(BackendAdapter::new(backend.clone())),
                )
            })
            .collect();
        Self { adapters }
    }

    pub fn get(&self, name: &str) -> Option<Arc<BackendAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<BackendAdapter>)> {
        self.adapters.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.adapters.keys()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// One idle-checker tick: hibernate every running adapter that has been
    /// idle past its configured threshold.
    pub async fn reap_idle(&self) {
        for (name, adapter) in &self.adapters {
            if !adapter.is_running() {
                continue;
            }
            let idle = adapter.last_used().elapsed();
            if idle > adapter.config().idle_timeout() {
                info!(backend = %name, idle_secs = idle.as_secs(), "hibernating idle backend");
                adapter.stop().await;
            }
        }
    }

    /// Background idle-checker loop; runs until `shutdown` is notified.
    pub async fn run_idle_checker(self: Arc<Self>, shutdown: Arc<Notify>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => self.reap_idle().await,
                _ = shutdown.notified() => {
                    debug!("idle checker shutting down");
                    return;
                }
            }
        }
    }

    /// Stop all backends in parallel.
    pub async fn stop_all(&self) {
        let mut join_set = tokio::task::JoinSet::new();
        for adapter in self.adapters.values() {
            let adapter = Arc::clone(adapter);
            join_set.spawn(async move { adapter.stop().await });
        }
        while join_set.join_next().await.is_some() {}
        info!("all backends stopped");
    }
}
