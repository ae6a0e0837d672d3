//! Per-source fan-out of entity executors.

use crate::config::SourceConfig;
use crate::datasource::{build_target, GraphSource};
use crate::db::Store;
use crate::entities;
use crate::stats::StatsRegistry;
use crate::sync::executor::EntityExecutor;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::info;

pub const PARALLEL_PER_SOURCE: usize = 9999;

pub struct SourceScheduler {
    source: SourceConfig,
    store: Arc<Store>,
    stats: Arc<StatsRegistry>,
    client: Arc<dyn GraphSource>,
    global_slots: Arc<Semaphore>,
}

impl SourceScheduler {
    /// Prepare one source for a sync round: ensure entity tables exist and
    /// seed the stats registry with current counts and row-size estimates.
    pub fn new(
        source: SourceConfig,
        store: Arc<Store>,
        stats: Arc<StatsRegistry>,
        client: Arc<dyn GraphSource>,
        global_slots: Arc<Semaphore>,
    ) -> Self {
        for binding in &source.entities {
            let entity = entities::find_by_table(&binding.table)
                .unwrap_or_else(|| panic!("unknown entity table {}", binding.table));
            store.init_entity(entity).expect("entity DDL failed");
            let count = store.get_table_count(entity.table);
            stats.init(&source.name, entity.name, count, entity.row_size_estimate());
        }
        Self {
            source,
            store,
            stats,
            client,
            global_slots,
        }
    }

    /// Run every entity executor of this source, bounded by the per-source
    /// cap and the coordinator's global cap.
    pub async fn run(&self) {
        info!(
            "[scheduler] {} start, {} entities",
            self.source.name,
            self.source.entities.len()
        );

        let per_source = Arc::new(Semaphore::new(PARALLEL_PER_SOURCE));
        let target = build_target(&self.source.subgraph_id);

        let mut tasks = JoinSet::new();
        for binding in &self.source.entities {
            let entity = entities::find_by_table(&binding.table)
                .unwrap_or_else(|| panic!("unknown entity table {}", binding.table));
            let executor = EntityExecutor::new(
                self.source.name.clone(),
                target.clone(),
                entity,
                self.store.clone(),
                self.stats.clone(),
                self.client.clone(),
            );
            let global = self.global_slots.clone();
            let local = per_source.clone();
            tasks.spawn(async move {
                let _global_slot = global.acquire_owned().await.expect("slot pool closed");
                let _local_slot = local.acquire_owned().await.expect("slot pool closed");
                executor.run().await;
            });
        }

        while let Some(result) = tasks.join_next().await {
            result.expect("entity executor panicked");
        }
    }
}
