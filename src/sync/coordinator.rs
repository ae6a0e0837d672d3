//! Round-periodic driver over all configured sources.

use crate::config::Config;
use crate::datasource::GraphSource;
use crate::db::Store;
use crate::stats::StatsRegistry;
use crate::sync::scheduler::SourceScheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::info;

pub const PARALLEL_TOTAL: usize = 9999;

pub struct SyncCoordinator {
    config: Arc<Config>,
    store: Arc<Store>,
    stats: Arc<StatsRegistry>,
    client: Arc<dyn GraphSource>,
}

impl SyncCoordinator {
    pub fn new(
        config: Arc<Config>,
        store: Arc<Store>,
        stats: Arc<StatsRegistry>,
        client: Arc<dyn GraphSource>,
    ) -> Self {
        store.init_infra().expect("infra DDL failed");
        Self {
            config,
            store,
            stats,
            client,
        }
    }

    /// Run sync rounds forever: all sources concurrently, then sleep the
    /// configured interval once every source reports done.
    pub async fn run(self) {
        let interval = Duration::from_secs(self.config.sync_interval_seconds);
        loop {
            info!(
                "[sync] round started, {} sources",
                self.config.sources.len()
            );
            let global_slots = Arc::new(Semaphore::new(PARALLEL_TOTAL));

            let mut rounds = JoinSet::new();
            for source in &self.config.sources {
                let scheduler = SourceScheduler::new(
                    source.clone(),
                    self.store.clone(),
                    self.stats.clone(),
                    self.client.clone(),
                    global_slots.clone(),
                );
                rounds.spawn(async move { scheduler.run().await });
            }
            while let Some(result) = rounds.join_next().await {
                result.expect("source scheduler panicked");
            }

            info!(
                "[sync] round complete, next in {}s",
                self.config.sync_interval_seconds
            );
            tokio::time::sleep(interval).await;
        }
    }
}
