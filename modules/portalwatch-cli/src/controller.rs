use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use portalwatch_common::{Config, VersionedTable};
use portalwatch_crawl::{
    deprecate_streams, deprecate_table, EpisodeLoadStats, EpisodeStreamLoader, IndexStats, MetadataLoadStats,
    MetadataLoader, SiteIndexer,
};
use portalwatch_delta::{build_deltas, DeltaStats};
use portalwatch_fetch::{CredentialResolver, HttpFetcher, PoolConfig};
use portalwatch_store::Store;
use tracing::{info, warn};

use crate::sanity::{self, SanityReport};

const USER_AGENT: &str = "portalwatch-crawler/1.0";

/// The Epoch Controller (§4.10): sequences the stages, opening and
/// committing one store transaction per stage, and runs the §8 sanity pass
/// at the end.
pub struct EpochController {
    store: Store,
    config: Config,
}

/// Summary of one completed epoch, printed by `main` before the process
/// exits (§6: exit code 0 iff `sanity.passed()`).
#[derive(Debug)]
pub struct EpochReport {
    pub t0: DateTime<Utc>,
    pub index: IndexStats,
    pub metadata: MetadataLoadStats,
    pub metadata_deltas_pass1: DeltaStats,
    pub metadata_deltas_pass2: DeltaStats,
    pub metadata_deprecated: u64,
    pub episode_deltas_noop: DeltaStats,
    pub episodes: EpisodeLoadStats,
    pub episode_deltas: DeltaStats,
    pub episodes_deprecated: u64,
    pub streams_deprecated: u64,
    pub sanity: SanityReport,
}

impl fmt::Display for EpochReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "epoch t0={} sites(containers={} videos={} failed={}) \
             metadata(fetched={} failed={} deprecated={}) \
             episodes(fetched={} streams_linked={} failed={} deprecated={}) \
             streams(deprecated={}) deltas(metadata={} episodes={}) {}",
            self.t0,
            self.index.containers,
            self.index.videos,
            self.index.failed.len(),
            self.metadata.fetched,
            self.metadata.failed.len(),
            self.metadata_deprecated,
            self.episodes.episodes_fetched,
            self.episodes.streams_linked,
            self.episodes.failed.len(),
            self.episodes_deprecated,
            self.streams_deprecated,
            self.metadata_deltas_pass1.processed + self.metadata_deltas_pass2.processed,
            self.episode_deltas_noop.processed + self.episode_deltas.processed,
            self.sanity,
        )
    }
}

impl EpochController {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store = Store::connect(&config.db_path).await?;
        Ok(Self { store, config })
    }

    fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.config.workers,
            task_capacity: self.config.queue.task_capacity,
            result_capacity: self.config.queue.result_capacity,
            idle_max: Duration::from_secs(self.config.queue.idle_max_secs),
            drain_timeout: Duration::from_secs(self.config.queue.drain_timeout_secs),
        }
    }

    /// Run one crawl epoch (§4.10 steps 1–8). Never returns early on a
    /// stage failure other than a store/connection error — per-URL and
    /// per-record failures are absorbed into stage stats (§7).
    pub async fn run(&self) -> anyhow::Result<EpochReport> {
        let t0 = self.config.epoch_timestamp();
        info!(t0 = %t0, "crawl epoch starting");

        if self.config.backup {
            match Store::backup(&self.config.db_path) {
                Ok(dest) => info!(dest = %dest, "store backed up"),
                Err(e) => warn!(error = %e, "store backup failed, continuing without one"),
            }
        }

        let pool_config = self.pool_config();
        let fetcher = Arc::new(HttpFetcher::new(USER_AGENT)?);
        let credentials = Arc::new(CredentialResolver::new(
            fetcher.client().clone(),
            self.config.portal_root.clone(),
            self.config.credentials.clone(),
        ));

        // Step 3: C5 — Site Indexer, own transaction, commits internally.
        let indexer = SiteIndexer::new(
            fetcher.clone(),
            credentials.clone(),
            self.config.portal_root.clone(),
            self.config.allowed_prefixes.clone(),
            pool_config,
        );
        let index = indexer.crawl(&self.store, t0).await?;

        // Step 4: Delta Builder over Metadata — idempotent if no candidates
        // yet exist (there shouldn't be any straight after a fresh index).
        let metadata_deltas_pass1 = self.run_delta(VersionedTable::Metadata, t0).await?;

        // Step 5: C6, delta again, deprecate Metadata.
        let metadata_loader = MetadataLoader::new(fetcher.clone(), credentials.clone(), self.config.use_base64, pool_config);
        let metadata = metadata_loader.refresh(&self.store, t0).await?;
        let metadata_deltas_pass2 = self.run_delta(VersionedTable::Metadata, t0).await?;
        let metadata_deprecated = deprecate_table(&self.store, t0, VersionedTable::Metadata).await?;

        // Step 6: Delta Builder over Episodes — no-op, nothing has written
        // Episode candidates yet.
        let episode_deltas_noop = self.run_delta(VersionedTable::Episodes, t0).await?;

        // Step 7: C7, delta, deprecate Episodes then Streams.
        let episode_loader = EpisodeStreamLoader::new(fetcher.clone(), credentials.clone(), self.config.use_base64, pool_config);
        let episodes = episode_loader.refresh(&self.store, t0).await?;
        let episode_deltas = self.run_delta(VersionedTable::Episodes, t0).await?;
        let episodes_deprecated = deprecate_table(&self.store, t0, VersionedTable::Episodes).await?;
        let streams_deprecated = deprecate_streams(&self.store, t0).await?;

        // Step 8: sanity checks — report, never abort (§7, §8).
        let sanity = sanity::run_all(&self.store).await?;

        let report = EpochReport {
            t0,
            index,
            metadata,
            metadata_deltas_pass1,
            metadata_deltas_pass2,
            metadata_deprecated,
            episode_deltas_noop,
            episodes,
            episode_deltas,
            episodes_deprecated,
            streams_deprecated,
            sanity,
        };
        info!(%report, "crawl epoch complete");
        Ok(report)
    }

    async fn run_delta(&self, table: VersionedTable, t0: DateTime<Utc>) -> anyhow::Result<DeltaStats> {
        let mut txn = self.store.begin_epoch(t0).await?;
        let stats = build_deltas(&mut txn, table, self.config.use_base64).await?;
        txn.commit().await?;
        Ok(stats)
    }
}
