use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use portalwatch_fetch::{CredentialResolver, Fetcher, Pool, PoolConfig};
use portalwatch_store::{EpochTxn, SiteInsertOutcome, Store, SYNTHETIC_ROOT_URL};
use scraper::{Html, Selector};
use tracing::{info, warn};
use url::Url;

/// HTML custom element that marks an episode (leaf/video) page (§4.5).
const VIDEO_MARKER_TAG: &str = "vp-episode-page";
/// Selector the original scrapes child links from on container pages.
const LIST_BOX_SELECTOR: &str = "div.newsListBox > a";

/// Outcome of one Site Indexer pass.
#[derive(Debug, Default, Clone)]
pub struct IndexStats {
    pub containers: usize,
    pub videos: usize,
    pub parents_resolved: usize,
    pub failed: Vec<String>,
}

struct IndexTask {
    url: String,
    href: String,
}

struct IndexResult {
    url: String,
    href: String,
    is_video: bool,
    /// (absolute url, raw href) of discovered children, empty for video
    /// pages or failed fetches.
    children: Vec<(String, String)>,
    fetch_failed: bool,
}

/// Does `document` contain the episode-page marker (§4.5: "classifies it as
/// video when an episode-page HTML marker is present")?
fn is_video_page(document: &Html) -> bool {
    match Selector::parse(VIDEO_MARKER_TAG) {
        Ok(sel) => document.select(&sel).next().is_some(),
        Err(_) => false,
    }
}

/// Child `<a href>`s drawn from the list-box selector, restricted to those
/// sharing the current page's stem (everything before the first `.`) and
/// differing from the current href.
fn list_box_children(document: &Html, href: &str) -> Vec<String> {
    let selector = match Selector::parse(LIST_BOX_SELECTOR) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    let stem = href.split('.').next().unwrap_or(href);

    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter(|child| child.contains(stem) && *child != href)
        .map(str::to_string)
        .collect()
}

/// Root-page anchors matching the allow-list shape: one path segment,
/// `.html` suffix, and one of the configured top-level prefixes (§4.5).
fn root_links(document: &Html, allowed_prefixes: &[String]) -> Vec<String> {
    let selector = match Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter(|href| valid_root_uri(href, allowed_prefixes))
        .map(str::to_string)
        .collect()
}

fn valid_root_uri(href: &str, allowed_prefixes: &[String]) -> bool {
    if !href.contains(".html") {
        return false;
    }
    if href.split('/').count() > 2 {
        return false;
    }
    allowed_prefixes.iter().any(|prefix| href.contains(prefix.as_str()))
}

/// `/a/b/c.html` -> `/a/b.html` (§4.5: "removing the last path segment and
/// reattaching the `.html` suffix").
fn derive_parent_url(url: &str) -> String {
    let without_ext = url.strip_suffix(".html").unwrap_or(url);
    match without_ext.rsplit_once('/') {
        Some((head, _)) if !head.is_empty() => format!("{head}.html"),
        _ => format!("{without_ext}.html"),
    }
}

fn resolve_href(portal_root: &str, href: &str) -> Option<String> {
    let base = Url::parse(portal_root).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

/// Classify a fetched page as video/container. Malformed HTML still yields
/// a container with zero children (§4.5 failure modes: "a classification
/// failure is treated as container with zero children").
fn classify(portal_root: &str, task: IndexTask, status: i32, body: Option<String>) -> IndexResult {
    let success = (200..300).contains(&status);
    let Some(body) = body.filter(|_| success) else {
        return IndexResult { url: task.url, href: task.href, is_video: false, children: Vec::new(), fetch_failed: true };
    };

    let document = Html::parse_document(&body);
    let is_video = is_video_page(&document);
    let children = if is_video {
        Vec::new()
    } else {
        list_box_children(&document, &task.href)
            .into_iter()
            .filter_map(|href| resolve_href(portal_root, &href).map(|abs| (abs, href)))
            .collect()
    };

    IndexResult { url: task.url, href: task.href, is_video, children, fetch_failed: false }
}

/// Walks the video portal tree breadth-first from `portal_root`, classifying
/// each page as *video* or *container* and recording every discovered page
/// as a Site row (§4.5).
pub struct SiteIndexer<F: Fetcher + 'static> {
    fetcher: Arc<F>,
    credentials: Arc<CredentialResolver>,
    portal_root: String,
    allowed_prefixes: Vec<String>,
    pool_config: PoolConfig,
}

impl<F: Fetcher + 'static> SiteIndexer<F> {
    pub fn new(
        fetcher: Arc<F>,
        credentials: Arc<CredentialResolver>,
        portal_root: String,
        allowed_prefixes: Vec<String>,
        pool_config: PoolConfig,
    ) -> Self {
        Self { fetcher, credentials, portal_root, allowed_prefixes, pool_config }
    }

    /// Run the full crawl (§4.5: root fetch, recursive sub-indexing, dedupe,
    /// second-pass parentage). Ensures the synthetic root exists, opens and
    /// commits its own `EpochTxn`.
    pub async fn crawl(&self, store: &Store, t0: DateTime<Utc>) -> anyhow::Result<IndexStats> {
        store.ensure_root(t0).await?;

        let mut stats = IndexStats::default();
        let root_cookies = self.credentials.resolve(&self.portal_root).await;
        let root_outcome = self.fetcher.fetch(&self.portal_root, Some(&root_cookies)).await;
        let Some(root_html) = root_outcome.body.filter(|_| root_outcome.is_success()) else {
            warn!(url = %self.portal_root, "failed to fetch portal root, nothing to index");
            stats.failed.push(self.portal_root.clone());
            return Ok(stats);
        };

        let seed_hrefs = root_links(&Html::parse_document(&root_html), &self.allowed_prefixes);

        let mut txn = store.begin_epoch(t0).await?;
        self.walk(seed_hrefs, &mut txn, &mut stats).await?;

        stats.parents_resolved = self.resolve_parentage(&mut txn).await?;
        txn.commit().await?;

        info!(
            root_url = %self.portal_root,
            containers = stats.containers,
            videos = stats.videos,
            parents_resolved = stats.parents_resolved,
            failed = stats.failed.len(),
            "site index walk complete"
        );
        Ok(stats)
    }

    /// Concurrent frontier walk: a `Pool` fetches+classifies pages while
    /// this function is the sole writer into `txn` (§5 single-writer
    /// model), submitting newly discovered children back onto the pool as
    /// results arrive. Terminates when every submitted task has a matching
    /// result (tracked via `pending`).
    async fn walk(&self, seed_hrefs: Vec<String>, txn: &mut EpochTxn, stats: &mut IndexStats) -> anyhow::Result<()> {
        let portal_root = self.portal_root.clone();
        let fetcher = self.fetcher.clone();
        let credentials = self.credentials.clone();
        let (pool, mut results) = Pool::<IndexTask>::spawn(self.pool_config, move |task: IndexTask| {
            let portal_root = portal_root.clone();
            let fetcher = fetcher.clone();
            let credentials = credentials.clone();
            async move {
                let cookies = credentials.resolve(&task.url).await;
                let outcome = fetcher.fetch(&task.url, Some(&cookies)).await;
                classify(&portal_root, task, outcome.status, outcome.body)
            }
        });

        let mut visited: HashSet<String> = HashSet::new();
        let mut pending: usize = 0;

        for href in seed_hrefs {
            let Some(abs) = resolve_href(&self.portal_root, &href) else { continue };
            if visited.insert(abs.clone()) {
                pool.submit(IndexTask { url: abs, href }).await?;
                pending += 1;
            }
        }

        while pending > 0 {
            let Some(result) = results.recv().await else { break };
            pending -= 1;

            if result.fetch_failed {
                stats.failed.push(result.url);
                continue;
            }

            let insert = txn.insert_site(&result.url, result.is_video, None).await?;
            if result.is_video {
                stats.videos += 1;
            } else {
                stats.containers += 1;
            }

            if let SiteInsertOutcome::New(_) = insert {
                for (child_url, child_href) in result.children {
                    if visited.insert(child_url.clone()) {
                        pool.submit(IndexTask { url: child_url, href: child_href }).await?;
                        pending += 1;
                    }
                }
            }
        }

        pool.close().await;
        Ok(())
    }

    /// Second pass (§4.5): for every Site row with a NULL parent, derive the
    /// parent URL by dropping the last path segment and reattaching
    /// `.html`; resolve its key, falling back to the synthetic root.
    /// Memoizes parent URL → key across the pass.
    async fn resolve_parentage(&self, txn: &mut EpochTxn) -> anyhow::Result<usize> {
        let unresolved = txn.list_sites_with_null_parent().await?;
        let mut memo: HashMap<String, i64> = HashMap::new();
        let mut resolved = 0usize;

        let root_key = match txn.find_site(SYNTHETIC_ROOT_URL, false).await? {
            Some(row) => row.key,
            None => anyhow::bail!("synthetic root site row missing after ensure_root"),
        };

        for site in unresolved {
            let parent_url = derive_parent_url(&site.url);

            let parent_key = if let Some(key) = memo.get(&parent_url) {
                *key
            } else {
                let key = match txn.find_site(&parent_url, false).await? {
                    Some(row) => row.key,
                    None => match txn.find_site(&parent_url, true).await? {
                        Some(row) => row.key,
                        None => root_key,
                    },
                };
                memo.insert(parent_url, key);
                key
            };

            txn.set_site_parent(site.key, parent_key).await?;
            resolved += 1;
        }

        Ok(resolved)
    }
}
