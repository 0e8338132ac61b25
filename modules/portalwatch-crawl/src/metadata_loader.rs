use std::sync::Arc;

use chrono::{DateTime, Utc};
use portalwatch_common::VersionedTable;
use portalwatch_fetch::{CredentialResolver, Fetcher, Pool, PoolConfig};
use portalwatch_store::{SiteRow, Store};
use tracing::{info, warn};

const HTML_SUFFIX: &str = ".html";
const SERIES_METADATA_SUFFIX: &str = ".series-metadata.json";

/// Outcome of one Metadata Loader pass (§4.6).
#[derive(Debug, Default, Clone)]
pub struct MetadataLoadStats {
    pub fetched: usize,
    pub failed: Vec<String>,
}

struct FetchResult {
    site: SiteRow,
    outcome: portalwatch_fetch::FetchOutcome,
}

/// `/a/lecture_id.html` -> `/a/lecture_id.series-metadata.json` (§4.6).
fn metadata_url(html_url: &str) -> String {
    match html_url.strip_suffix(HTML_SUFFIX) {
        Some(stripped) => format!("{stripped}{SERIES_METADATA_SUFFIX}"),
        None => format!("{html_url}{SERIES_METADATA_SUFFIX}"),
    }
}

/// Refreshes the Metadata table from every video-leaf Site still linked as
/// of this epoch (§4.6).
pub struct MetadataLoader<F: Fetcher + 'static> {
    fetcher: Arc<F>,
    credentials: Arc<CredentialResolver>,
    use_base64: bool,
    pool_config: PoolConfig,
}

impl<F: Fetcher + 'static> MetadataLoader<F> {
    pub fn new(fetcher: Arc<F>, credentials: Arc<CredentialResolver>, use_base64: bool, pool_config: PoolConfig) -> Self {
        Self { fetcher, credentials, use_base64, pool_config }
    }

    pub async fn refresh(&self, store: &Store, t0: DateTime<Utc>) -> anyhow::Result<MetadataLoadStats> {
        let sites = store.list_video_sites_due(t0).await?;
        let mut stats = MetadataLoadStats::default();
        if sites.is_empty() {
            return Ok(stats);
        }

        let fetcher = self.fetcher.clone();
        let credentials = self.credentials.clone();
        let (pool, mut results) = Pool::<SiteRow>::spawn(self.pool_config, move |site: SiteRow| {
            let fetcher = fetcher.clone();
            let credentials = credentials.clone();
            async move {
                let url = metadata_url(&site.url);
                let cookies = credentials.resolve(&url).await;
                let outcome = fetcher.fetch(&url, Some(&cookies)).await;
                FetchResult { site, outcome }
            }
        });

        // Submission runs on its own task so it can keep feeding the pool
        // concurrently with the draining loop below (§4.2/§5) — submitting
        // every task to completion before draining any results deadlocks
        // once the task queue, the in-flight fetches, and the result queue
        // are all full and workers block sending results nobody is reading.
        let submitter = tokio::spawn(async move {
            for site in sites {
                if pool.submit(site).await.is_err() {
                    break;
                }
            }
            pool.close().await;
        });

        let mut txn = store.begin_epoch(t0).await?;
        while let Some(result) = results.recv().await {
            if !result.outcome.is_success() {
                warn!(url = %result.outcome.url, status = result.outcome.status, "metadata fetch failed");
                stats.failed.push(result.outcome.url);
                continue;
            }
            let Some(body) = result.outcome.body else {
                stats.failed.push(result.outcome.url);
                continue;
            };

            txn.upsert_record(VersionedTable::Metadata, &result.outcome.url, Some(result.site.key), &body, self.use_base64)
                .await?;
            stats.fetched += 1;
        }
        txn.commit().await?;
        submitter.await?;

        info!(fetched = stats.fetched, failed = stats.failed.len(), "metadata loader pass complete");
        Ok(stats)
    }
}
