use std::sync::Arc;

use chrono::{DateTime, Utc};
use portalwatch_common::{decode_from_storage, VersionedTable};
use portalwatch_fetch::{CredentialResolver, Fetcher, Pool, PoolConfig};
use portalwatch_store::Store;
use tracing::warn;

const HTML_SUFFIX: &str = ".html";
const SERIES_METADATA_SUFFIX: &str = ".series-metadata.json";

/// Outcome of one Episode/Stream Loader pass (§4.7).
#[derive(Debug, Default, Clone)]
pub struct EpisodeLoadStats {
    pub episodes_fetched: usize,
    pub streams_linked: usize,
    pub failed: Vec<String>,
}

struct EpisodeTask {
    url: String,
    metadata_key: i64,
}

struct EpisodeFetchResult {
    metadata_key: i64,
    outcome: portalwatch_fetch::FetchOutcome,
}

fn strip_to_series_stem(url: &str) -> &str {
    url.strip_suffix(SERIES_METADATA_SUFFIX)
        .or_else(|| url.strip_suffix(HTML_SUFFIX))
        .unwrap_or(url)
}

/// Extract `episodes[].id` entries from a series-metadata JSON document.
fn episode_ids(doc: &serde_json::Value) -> Vec<String> {
    doc.get("episodes")
        .and_then(|v| v.as_array())
        .map(|episodes| {
            episodes
                .iter()
                .filter_map(|ep| ep.get("id"))
                .filter_map(|id| match id {
                    serde_json::Value::String(s) => Some(s.clone()),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// One `(url, resolution)` pair per `selectedEpisode.media.presentations[*]`
/// entry, skipping entries with no `url` (§4.7 step 3).
fn presentation_streams(doc: &serde_json::Value) -> Vec<(String, String)> {
    let Some(presentations) = doc
        .get("selectedEpisode")
        .and_then(|v| v.get("media"))
        .and_then(|v| v.get("presentations"))
        .and_then(|v| v.as_array())
    else {
        return Vec::new();
    };

    presentations
        .iter()
        .filter_map(|p| {
            let url = p.get("url")?.as_str()?.to_string();
            let width = p.get("width").and_then(|v| v.as_i64()).unwrap_or(-1);
            let height = p.get("height").and_then(|v| v.as_i64()).unwrap_or(-1);
            Some((url, format!("{width} x {height}")))
        })
        .collect()
}

/// Walks non-deprecated Metadata records, fetches each episode's
/// series-metadata document and its presentation streams (§4.7).
pub struct EpisodeStreamLoader<F: Fetcher + 'static> {
    fetcher: Arc<F>,
    credentials: Arc<CredentialResolver>,
    use_base64: bool,
    pool_config: PoolConfig,
}

impl<F: Fetcher + 'static> EpisodeStreamLoader<F> {
    pub fn new(fetcher: Arc<F>, credentials: Arc<CredentialResolver>, use_base64: bool, pool_config: PoolConfig) -> Self {
        Self { fetcher, credentials, use_base64, pool_config }
    }

    pub async fn refresh(&self, store: &Store, t0: DateTime<Utc>) -> anyhow::Result<EpisodeLoadStats> {
        let metadata_records = store.list_metadata_for_episode_loading().await?;
        let mut stats = EpisodeLoadStats::default();

        let mut tasks = Vec::new();
        for record in &metadata_records {
            let decoded = match decode_from_storage(&record.json_text, self.use_base64) {
                Ok(text) => text,
                Err(e) => {
                    warn!(url = %record.url, error = %e, "failed to decode metadata body, skipping episode derivation");
                    continue;
                }
            };
            let Ok(doc) = serde_json::from_str::<serde_json::Value>(&decoded) else {
                continue;
            };
            let stem = strip_to_series_stem(&record.url);
            for id in episode_ids(&doc) {
                tasks.push(EpisodeTask { url: format!("{stem}/{id}{SERIES_METADATA_SUFFIX}"), metadata_key: record.key });
            }
        }

        if tasks.is_empty() {
            return Ok(stats);
        }

        let fetcher = self.fetcher.clone();
        let credentials = self.credentials.clone();
        let (pool, mut results) = Pool::<EpisodeTask>::spawn(self.pool_config, move |task: EpisodeTask| {
            let fetcher = fetcher.clone();
            let credentials = credentials.clone();
            async move {
                let cookies = credentials.resolve(&task.url).await;
                let outcome = fetcher.fetch(&task.url, Some(&cookies)).await;
                EpisodeFetchResult { metadata_key: task.metadata_key, outcome }
            }
        });

        // Submission runs on its own task so it can keep feeding the pool
        // concurrently with the draining loop below (§4.2/§5) — submitting
        // every task to completion before draining any results deadlocks
        // once the task queue, the in-flight fetches, and the result queue
        // are all full and workers block sending results nobody is reading.
        let submitter = tokio::spawn(async move {
            for task in tasks {
                if pool.submit(task).await.is_err() {
                    break;
                }
            }
            pool.close().await;
        });

        let mut txn = store.begin_epoch(t0).await?;
        while let Some(result) = results.recv().await {
            if !result.outcome.is_success() {
                warn!(url = %result.outcome.url, status = result.outcome.status, "episode fetch failed");
                stats.failed.push(result.outcome.url);
                continue;
            }
            let Some(body) = result.outcome.body else {
                stats.failed.push(result.outcome.url);
                continue;
            };

            let episode_outcome = txn
                .upsert_record(VersionedTable::Episodes, &result.outcome.url, None, &body, self.use_base64)
                .await?;
            let episode_key = episode_outcome.key();
            txn.link_metadata_episode(result.metadata_key, episode_key).await?;
            stats.episodes_fetched += 1;

            let Ok(doc) = serde_json::from_str::<serde_json::Value>(&body) else {
                continue;
            };
            for (stream_url, resolution) in presentation_streams(&doc) {
                let stream_outcome = txn.insert_stream(&stream_url, &resolution).await?;
                txn.link_episode_stream(episode_key, stream_outcome.key()).await?;
                stats.streams_linked += 1;
            }
        }
        txn.commit().await?;
        submitter.await?;

        Ok(stats)
    }
}
