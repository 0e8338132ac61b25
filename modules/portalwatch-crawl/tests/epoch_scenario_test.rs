//! End-to-end scenarios S1–S4 (spec §8): a fresh crawl, an unchanged
//! re-crawl, a series metadata change, and an episode disappearing.
//! Exercises the real Site Indexer, Metadata Loader, Episode/Stream Loader,
//! Delta Builder and Deprecator against an in-memory store and an in-process
//! `Fetcher` double — no network involved.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use portalwatch_common::VersionedTable;
use portalwatch_crawl::{deprecate_streams, deprecate_table, EpisodeStreamLoader, MetadataLoader, SiteIndexer};
use portalwatch_delta::build_deltas;
use portalwatch_fetch::{CredentialResolver, FetchOutcome, Fetcher, PoolConfig};
use portalwatch_store::Store;

const PORTAL_ROOT: &str = "https://video.example.ch";
const CONTAINER_URL: &str = "https://video.example.ch/lectures.html";
const VIDEO_URL: &str = "https://video.example.ch/lectures/x.html";
const METADATA_URL: &str = "https://video.example.ch/lectures/x.series-metadata.json";
const EPISODE1_URL: &str = "https://video.example.ch/lectures/x/e1.series-metadata.json";
const EPISODE2_URL: &str = "https://video.example.ch/lectures/x/e2.series-metadata.json";

struct MockFetcher {
    pages: RwLock<HashMap<String, String>>,
}

impl MockFetcher {
    fn new() -> Self {
        Self { pages: RwLock::new(HashMap::new()) }
    }

    fn set(&self, url: &str, body: impl Into<String>) {
        self.pages.write().unwrap().insert(url.to_string(), body.into());
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, _cookies: Option<&str>) -> FetchOutcome {
        match self.pages.read().unwrap().get(url) {
            Some(body) => FetchOutcome { url: url.to_string(), status: 200, body: Some(body.clone()), error: None },
            None => FetchOutcome { url: url.to_string(), status: 404, body: None, error: None },
        }
    }
}

fn t(hour: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(hour)
}

fn pool_config() -> PoolConfig {
    PoolConfig {
        workers: 2,
        task_capacity: 32,
        result_capacity: 32,
        idle_max: Duration::from_secs(1),
        drain_timeout: Duration::from_secs(5),
    }
}

/// A `CredentialResolver` whose global login points at a closed local port,
/// so it fails instantly and deterministically without any real network
/// access (§4.4: a failed login falls back to the (empty) global jar).
fn dead_credential_resolver() -> Arc<CredentialResolver> {
    let client = reqwest::Client::new();
    let credentials = portalwatch_common::config::Credentials {
        global: portalwatch_common::config::LoginCredential { user: "bot".into(), pass: "pw".into() },
        per_path: Vec::new(),
    };
    Arc::new(CredentialResolver::new(client, "http://127.0.0.1:1".to_string(), credentials))
}

fn series_json(episode_ids: &[&str]) -> String {
    let ids: Vec<String> = episode_ids.iter().map(|id| format!(r#"{{"id":"{id}"}}"#)).collect();
    format!(r#"{{"episodes":[{}]}}"#, ids.join(","))
}

fn episode_json(stream_url: &str, width: i64, height: i64) -> String {
    format!(
        r#"{{"selectedEpisode":{{"media":{{"presentations":[{{"url":"{stream_url}","width":{width},"height":{height}}}]}}}}}}"#
    )
}

async fn run_index_and_metadata_stage(
    store: &Store,
    fetcher: &Arc<MockFetcher>,
    credentials: &Arc<CredentialResolver>,
    t0: DateTime<Utc>,
) {
    let indexer = SiteIndexer::new(
        fetcher.clone(),
        credentials.clone(),
        PORTAL_ROOT.to_string(),
        vec!["/lectures".to_string()],
        pool_config(),
    );
    indexer.crawl(store, t0).await.unwrap();

    let mut txn = store.begin_epoch(t0).await.unwrap();
    build_deltas(&mut txn, VersionedTable::Metadata, false).await.unwrap();
    txn.commit().await.unwrap();

    let metadata_loader = MetadataLoader::new(fetcher.clone(), credentials.clone(), false, pool_config());
    metadata_loader.refresh(store, t0).await.unwrap();

    let mut txn = store.begin_epoch(t0).await.unwrap();
    build_deltas(&mut txn, VersionedTable::Metadata, false).await.unwrap();
    txn.commit().await.unwrap();
    deprecate_table(store, t0, VersionedTable::Metadata).await.unwrap();
}

async fn run_episode_stage(store: &Store, fetcher: &Arc<MockFetcher>, credentials: &Arc<CredentialResolver>, t0: DateTime<Utc>) {
    let mut txn = store.begin_epoch(t0).await.unwrap();
    build_deltas(&mut txn, VersionedTable::Episodes, false).await.unwrap();
    txn.commit().await.unwrap();

    let episode_loader = EpisodeStreamLoader::new(fetcher.clone(), credentials.clone(), false, pool_config());
    episode_loader.refresh(store, t0).await.unwrap();

    let mut txn = store.begin_epoch(t0).await.unwrap();
    build_deltas(&mut txn, VersionedTable::Episodes, false).await.unwrap();
    txn.commit().await.unwrap();
    deprecate_table(store, t0, VersionedTable::Episodes).await.unwrap();
    deprecate_streams(store, t0).await.unwrap();
}

async fn count(store: &Store, sql: &str) -> i64 {
    let (n,): (i64,) = sqlx::query_as(sql).fetch_one(store.pool()).await.unwrap();
    n
}

#[tokio::test]
async fn s1_fresh_crawl_one_series_one_episode_one_stream() {
    let store = Store::connect_in_memory().await.unwrap();
    let fetcher = Arc::new(MockFetcher::new());
    let credentials = dead_credential_resolver();

    fetcher.set(PORTAL_ROOT, r#"<html><body><a href="/lectures.html">lectures</a></body></html>"#);
    fetcher.set(
        CONTAINER_URL,
        r#"<html><body><div class="newsListBox"><a href="/lectures/x.html">x</a></div></body></html>"#,
    );
    fetcher.set(VIDEO_URL, r#"<html><body><vp-episode-page></vp-episode-page></body></html>"#);
    fetcher.set(METADATA_URL, series_json(&["e1"]));
    fetcher.set(EPISODE1_URL, episode_json("https://cdn.example/x/e1.mp4", 1920, 1080));

    let t0 = t(0);
    run_index_and_metadata_stage(&store, &fetcher, &credentials, t0).await;
    run_episode_stage(&store, &fetcher, &credentials, t0).await;

    assert_eq!(count(&store, "SELECT COUNT(*) FROM site").await, 3);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM metadata").await, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM metadata WHERE record_type = 0").await, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM metadata WHERE record_type IN (1, 2)").await, 0);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM episodes").await, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM episodes WHERE record_type = 0").await, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM stream").await, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM stream WHERE resolution = '1920 x 1080'").await, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM metadata_episode_assoc").await, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM episode_stream_assoc").await, 1);

    let video = store.find_site(VIDEO_URL, true).await.unwrap().unwrap();
    let container = store.find_site(CONTAINER_URL, false).await.unwrap().unwrap();
    assert_eq!(video.parent_key, Some(container.key));
}

#[tokio::test]
async fn s2_unchanged_recrawl_only_advances_timestamps() {
    let store = Store::connect_in_memory().await.unwrap();
    let fetcher = Arc::new(MockFetcher::new());
    let credentials = dead_credential_resolver();

    fetcher.set(PORTAL_ROOT, r#"<html><body><a href="/lectures.html">lectures</a></body></html>"#);
    fetcher.set(
        CONTAINER_URL,
        r#"<html><body><div class="newsListBox"><a href="/lectures/x.html">x</a></div></body></html>"#,
    );
    fetcher.set(VIDEO_URL, r#"<html><body><vp-episode-page></vp-episode-page></body></html>"#);
    fetcher.set(METADATA_URL, series_json(&["e1"]));
    fetcher.set(EPISODE1_URL, episode_json("https://cdn.example/x/e1.mp4", 1920, 1080));

    let t0 = t(0);
    run_index_and_metadata_stage(&store, &fetcher, &credentials, t0).await;
    run_episode_stage(&store, &fetcher, &credentials, t0).await;

    let t1 = t(24);
    run_index_and_metadata_stage(&store, &fetcher, &credentials, t1).await;
    run_episode_stage(&store, &fetcher, &credentials, t1).await;

    // L2: identical content across epochs yields the same row set, no new
    // diffs or finals.
    assert_eq!(count(&store, "SELECT COUNT(*) FROM site").await, 3);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM metadata").await, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM episodes").await, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM stream").await, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM metadata WHERE record_type != 0").await, 0);

    let metadata = store.find_site(VIDEO_URL, true).await.unwrap().unwrap();
    assert_eq!(metadata.last_seen, t1);
}

#[tokio::test]
async fn s3_series_metadata_change_produces_diff_and_final() {
    let store = Store::connect_in_memory().await.unwrap();
    let fetcher = Arc::new(MockFetcher::new());
    let credentials = dead_credential_resolver();

    fetcher.set(PORTAL_ROOT, r#"<html><body><a href="/lectures.html">lectures</a></body></html>"#);
    fetcher.set(
        CONTAINER_URL,
        r#"<html><body><div class="newsListBox"><a href="/lectures/x.html">x</a></div></body></html>"#,
    );
    fetcher.set(VIDEO_URL, r#"<html><body><vp-episode-page></vp-episode-page></body></html>"#);
    fetcher.set(METADATA_URL, series_json(&["e1"]));
    fetcher.set(EPISODE1_URL, episode_json("https://cdn.example/x/e1.mp4", 1920, 1080));

    let t0 = t(0);
    run_index_and_metadata_stage(&store, &fetcher, &credentials, t0).await;
    run_episode_stage(&store, &fetcher, &credentials, t0).await;

    // Episode list grows to e1,e2 (§8 S3).
    fetcher.set(METADATA_URL, series_json(&["e1", "e2"]));
    fetcher.set(EPISODE2_URL, episode_json("https://cdn.example/x/e2.mp4", 1280, 720));

    let t1 = t(24);
    run_index_and_metadata_stage(&store, &fetcher, &credentials, t1).await;
    run_episode_stage(&store, &fetcher, &credentials, t1).await;

    assert_eq!(count(&store, "SELECT COUNT(*) FROM metadata WHERE record_type = 0").await, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM metadata WHERE record_type = 1").await, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM metadata WHERE record_type = 2").await, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM episodes").await, 2);

    let initial = sqlx::query_as::<_, (DateTime<Utc>,)>("SELECT found FROM metadata WHERE record_type = 0")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(initial.0, t0);

    let diff = sqlx::query_as::<_, (DateTime<Utc>,)>("SELECT found FROM metadata WHERE record_type = 1")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(diff.0, t1);

    // L1: initial + diffs applied in `found` order reproduces the final.
    let video = store.find_site(VIDEO_URL, true).await.unwrap().unwrap();
    let mut txn = store.begin_epoch(t(48)).await.unwrap();
    let initial_row = txn
        .latest_record_of_type(VersionedTable::Metadata, METADATA_URL, Some(video.key), portalwatch_common::RecordType::Initial)
        .await
        .unwrap()
        .unwrap();
    let final_row = txn.latest_non_diff(VersionedTable::Metadata, METADATA_URL, Some(video.key)).await.unwrap().unwrap();
    let diffs = txn.list_diffs(VersionedTable::Metadata, METADATA_URL, Some(video.key)).await.unwrap();
    let ok = portalwatch_delta::verify_chain(
        &initial_row.json_text,
        &diffs.into_iter().map(|d| d.json_text).collect::<Vec<_>>(),
        &final_row.json_text,
    )
    .unwrap();
    assert!(ok);
    txn.commit().await.unwrap();
}

#[tokio::test]
async fn s4_episode_disappears_then_deprecates() {
    let store = Store::connect_in_memory().await.unwrap();
    let fetcher = Arc::new(MockFetcher::new());
    let credentials = dead_credential_resolver();

    fetcher.set(PORTAL_ROOT, r#"<html><body><a href="/lectures.html">lectures</a></body></html>"#);
    fetcher.set(
        CONTAINER_URL,
        r#"<html><body><div class="newsListBox"><a href="/lectures/x.html">x</a></div></body></html>"#,
    );
    fetcher.set(VIDEO_URL, r#"<html><body><vp-episode-page></vp-episode-page></body></html>"#);
    fetcher.set(METADATA_URL, series_json(&["e1", "e2"]));
    fetcher.set(EPISODE1_URL, episode_json("https://cdn.example/x/e1.mp4", 1920, 1080));
    fetcher.set(EPISODE2_URL, episode_json("https://cdn.example/x/e2.mp4", 1280, 720));

    let t0 = t(0);
    run_index_and_metadata_stage(&store, &fetcher, &credentials, t0).await;
    run_episode_stage(&store, &fetcher, &credentials, t0).await;
    assert_eq!(count(&store, "SELECT COUNT(*) FROM episodes WHERE deprecated = 0").await, 2);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM stream WHERE deprecated = 0").await, 2);

    // e2 drops out of the series at T1 (§8 S4).
    fetcher.set(METADATA_URL, series_json(&["e1"]));

    let t1 = t(24);
    run_index_and_metadata_stage(&store, &fetcher, &credentials, t1).await;
    run_episode_stage(&store, &fetcher, &credentials, t1).await;

    assert_eq!(count(&store, "SELECT COUNT(*) FROM episodes WHERE deprecated = 0").await, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM episodes WHERE deprecated = 1").await, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM stream WHERE deprecated = 1").await, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM stream WHERE deprecated = 0").await, 1);
}
