use chrono::{DateTime, Utc};
use portalwatch_common::{canonicalize, content_hash, decode_from_storage, encode_for_storage, RecordType, VersionedTable};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::models::{
    CandidateRow, RawRecordRow, RecordRow, SiteInsertOutcome, SiteRow, StreamUpsertOutcome, UpsertOutcome,
    SYNTHETIC_ROOT_PARENT, SYNTHETIC_ROOT_URL,
};

/// The Snapshot Store (§4.3): owns the single SQLite connection pool and
/// exposes the operations the Epoch Controller and its stages need. Reads
/// used purely for stage enumeration go straight through the pool; all
/// writes for a stage go through one `EpochTxn`, matching the single-writer
/// model of §5 ("store operations are synchronous and serialized through a
/// single writer... commit at stage boundaries only").
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(db_path: &str) -> anyhow::Result<Self> {
        let url = format!("sqlite://{db_path}?mode=rwc");
        let pool = SqlitePoolOptions::new().max_connections(8).connect(&url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn connect_in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Copy the store file before running (§6 `backup`, §4.10 step 2).
    pub fn backup(db_path: &str) -> anyhow::Result<String> {
        let dest = format!("{db_path}.bak");
        std::fs::copy(db_path, &dest)?;
        Ok(dest)
    }

    /// Idempotently insert the single synthetic forest root (§3) and return
    /// its key.
    pub async fn ensure_root(&self, t0: DateTime<Utc>) -> anyhow::Result<i64> {
        if let Some(row) = sqlx::query_as::<_, (i64,)>(
            "SELECT key FROM site WHERE url = ?1 AND is_video = 0",
        )
        .bind(SYNTHETIC_ROOT_URL)
        .fetch_optional(&self.pool)
        .await?
        {
            sqlx::query("UPDATE site SET last_seen = ?1 WHERE key = ?2")
                .bind(t0)
                .bind(row.0)
                .execute(&self.pool)
                .await?;
            return Ok(row.0);
        }

        let rec = sqlx::query(
            "INSERT INTO site (parent_key, url, is_video, found, last_seen) VALUES (?1, ?2, 0, ?3, ?3)",
        )
        .bind(SYNTHETIC_ROOT_PARENT)
        .bind(SYNTHETIC_ROOT_URL)
        .bind(t0)
        .execute(&self.pool)
        .await?;
        Ok(rec.last_insert_rowid())
    }

    pub async fn find_site(&self, url: &str, is_video: bool) -> anyhow::Result<Option<SiteRow>> {
        let row = sqlx::query_as::<_, SiteRow>(
            "SELECT key, parent_key, url, is_video, found, last_seen FROM site WHERE url = ?1 AND is_video = ?2",
        )
        .bind(url)
        .bind(is_video)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Sites whose parent is still unresolved, for the Site Indexer's
    /// second pass (§4.5).
    pub async fn list_sites_with_null_parent(&self) -> anyhow::Result<Vec<SiteRow>> {
        let rows = sqlx::query_as::<_, SiteRow>(
            "SELECT key, parent_key, url, is_video, found, last_seen FROM site WHERE parent_key IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn set_site_parent(&self, key: i64, parent_key: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE site SET parent_key = ?1 WHERE key = ?2")
            .bind(parent_key)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Video-leaf sites still linked as of this epoch (§4.6: `is_video=1
    /// AND last_seen >= T0`).
    pub async fn list_video_sites_due(&self, t0: DateTime<Utc>) -> anyhow::Result<Vec<SiteRow>> {
        let rows = sqlx::query_as::<_, SiteRow>(
            "SELECT key, parent_key, url, is_video, found, last_seen FROM site WHERE is_video = 1 AND last_seen >= ?1",
        )
        .bind(t0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Non-deprecated Metadata records with a materialized body, the walk
    /// set for the Episode/Stream Loader (§4.7).
    pub async fn list_metadata_for_episode_loading(&self) -> anyhow::Result<Vec<RecordRow>> {
        let rows = sqlx::query_as::<_, RawRecordRow>(
            "SELECT key, parent_key, url, json_text, json_hash, found, last_seen, deprecated, record_type \
             FROM metadata WHERE deprecated = 0 AND record_type IN (0, 2)",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RecordRow::from).collect())
    }

    pub async fn begin_epoch(&self, t0: DateTime<Utc>) -> anyhow::Result<EpochTxn> {
        let tx = self.pool.begin().await?;
        Ok(EpochTxn { tx, t0 })
    }
}

/// A single stage's write scope (§4.3, §5). Dropped without `commit()`
/// rolls back, matching "a crash mid-stage is recovered by redoing the
/// stage" (§5).
pub struct EpochTxn {
    tx: Transaction<'static, Sqlite>,
    t0: DateTime<Utc>,
}

impl EpochTxn {
    pub fn epoch(&self) -> DateTime<Utc> {
        self.t0
    }

    pub async fn commit(self) -> anyhow::Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    /// §4.5: insert or refresh a Site row. A URL already present is updated
    /// (`last_seen := T0`) and reported as `Existing` so the caller does not
    /// re-enqueue it.
    pub async fn insert_site(
        &mut self,
        url: &str,
        is_video: bool,
        parent_key: Option<i64>,
    ) -> anyhow::Result<SiteInsertOutcome> {
        if let Some(row) = sqlx::query_as::<_, (i64,)>(
            "SELECT key FROM site WHERE url = ?1 AND is_video = ?2",
        )
        .bind(url)
        .bind(is_video)
        .fetch_optional(&mut *self.tx)
        .await?
        {
            sqlx::query("UPDATE site SET last_seen = ?1 WHERE key = ?2")
                .bind(self.t0)
                .bind(row.0)
                .execute(&mut *self.tx)
                .await?;
            return Ok(SiteInsertOutcome::Existing(row.0));
        }

        let rec = sqlx::query(
            "INSERT INTO site (parent_key, url, is_video, found, last_seen) VALUES (?1, ?2, ?3, ?4, ?4)",
        )
        .bind(parent_key)
        .bind(url)
        .bind(is_video)
        .bind(self.t0)
        .execute(&mut *self.tx)
        .await?;
        Ok(SiteInsertOutcome::New(rec.last_insert_rowid()))
    }

    /// The central operation (§4.3). `parent_key` is `Some` for Metadata,
    /// `None` for Episodes (O2: Episodes groups are keyed on URL alone).
    pub async fn upsert_record(
        &mut self,
        table: VersionedTable,
        url: &str,
        parent_key: Option<i64>,
        raw_body: &str,
        use_base64: bool,
    ) -> anyhow::Result<UpsertOutcome> {
        match canonicalize(raw_body) {
            Ok(canonical) => self.upsert_json(table, url, parent_key, &canonical, use_base64).await,
            Err(_) => self.upsert_non_json(table, url, parent_key, raw_body, use_base64).await,
        }
    }

    async fn upsert_json(
        &mut self,
        table: VersionedTable,
        url: &str,
        parent_key: Option<i64>,
        canonical: &str,
        use_base64: bool,
    ) -> anyhow::Result<UpsertOutcome> {
        let hash = content_hash(canonical);
        let stored_body = encode_for_storage(canonical, use_base64);

        match self.latest_non_diff(table, url, parent_key).await? {
            None => {
                let key = self
                    .insert_row(table, url, parent_key, &stored_body, &hash, Some(self.t0), RecordType::Initial)
                    .await?;
                Ok(UpsertOutcome::Initial { key })
            }
            Some(existing) => {
                let stored_canonical = decode_from_storage(&existing.json_text, use_base64)?;
                if stored_canonical == canonical {
                    self.touch_row(table, existing.key).await?;
                    let live_key = if existing.record_type == Some(RecordType::Final) {
                        if let Some(diff) = self.newest_diff(table, url, parent_key).await? {
                            self.touch_row(table, diff.key).await?;
                            diff.key
                        } else {
                            existing.key
                        }
                    } else {
                        existing.key
                    };
                    Ok(UpsertOutcome::Unchanged { key: live_key })
                } else {
                    let key = self.insert_candidate(table, url, parent_key, &stored_body, &hash).await?;
                    Ok(UpsertOutcome::CandidateInserted { key })
                }
            }
        }
    }

    async fn upsert_non_json(
        &mut self,
        table: VersionedTable,
        url: &str,
        parent_key: Option<i64>,
        raw_body: &str,
        use_base64: bool,
    ) -> anyhow::Result<UpsertOutcome> {
        let hash = content_hash(raw_body);
        let stored_body = encode_for_storage(raw_body, use_base64);

        match self.latest_record_of_type(table, url, parent_key, RecordType::NonJson).await? {
            Some(existing) if decode_from_storage(&existing.json_text, use_base64)?.as_str() == raw_body => {
                self.touch_row(table, existing.key).await?;
                Ok(UpsertOutcome::NonJson { key: existing.key })
            }
            _ => {
                let key = self
                    .insert_row(table, url, parent_key, &stored_body, &hash, Some(self.t0), RecordType::NonJson)
                    .await?;
                Ok(UpsertOutcome::NonJson { key })
            }
        }
    }

    async fn touch_row(&mut self, table: VersionedTable, key: i64) -> anyhow::Result<()> {
        let sql = format!(
            "UPDATE {} SET last_seen = ?1, deprecated = 0 WHERE key = ?2",
            table.as_str()
        );
        sqlx::query(&sql).bind(self.t0).bind(key).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn insert_row(
        &mut self,
        table: VersionedTable,
        url: &str,
        parent_key: Option<i64>,
        stored_body: &str,
        hash: &str,
        found: Option<DateTime<Utc>>,
        record_type: RecordType,
    ) -> anyhow::Result<i64> {
        let key = match table {
            VersionedTable::Metadata => {
                let rec = sqlx::query(
                    "INSERT INTO metadata (parent_key, url, json_text, json_hash, found, last_seen, deprecated, record_type) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                )
                .bind(parent_key.expect("metadata rows carry parent_key"))
                .bind(url)
                .bind(stored_body)
                .bind(hash)
                .bind(found)
                .bind(self.t0)
                .bind(record_type.as_i64())
                .execute(&mut *self.tx)
                .await?;
                rec.last_insert_rowid()
            }
            VersionedTable::Episodes => {
                let rec = sqlx::query(
                    "INSERT INTO episodes (url, json_text, json_hash, found, last_seen, deprecated, record_type) \
                     VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                )
                .bind(url)
                .bind(stored_body)
                .bind(hash)
                .bind(found)
                .bind(self.t0)
                .bind(record_type.as_i64())
                .execute(&mut *self.tx)
                .await?;
                rec.last_insert_rowid()
            }
        };
        Ok(key)
    }

    /// Insert a fresh candidate (`record_type = NULL`, §4.3 step 4).
    async fn insert_candidate(
        &mut self,
        table: VersionedTable,
        url: &str,
        parent_key: Option<i64>,
        stored_body: &str,
        hash: &str,
    ) -> anyhow::Result<i64> {
        let key = match table {
            VersionedTable::Metadata => {
                let rec = sqlx::query(
                    "INSERT INTO metadata (parent_key, url, json_text, json_hash, found, last_seen, deprecated, record_type) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5, 0, NULL)",
                )
                .bind(parent_key.expect("metadata rows carry parent_key"))
                .bind(url)
                .bind(stored_body)
                .bind(hash)
                .bind(self.t0)
                .execute(&mut *self.tx)
                .await?;
                rec.last_insert_rowid()
            }
            VersionedTable::Episodes => {
                let rec = sqlx::query(
                    "INSERT INTO episodes (url, json_text, json_hash, found, last_seen, deprecated, record_type) \
                     VALUES (?1, ?2, ?3, ?4, ?4, 0, NULL)",
                )
                .bind(url)
                .bind(stored_body)
                .bind(hash)
                .bind(self.t0)
                .execute(&mut *self.tx)
                .await?;
                rec.last_insert_rowid()
            }
        };
        Ok(key)
    }

    /// The latest `initial`/`final` record in a group (§4.3 step 1, §4.8
    /// step 1).
    pub async fn latest_non_diff(
        &mut self,
        table: VersionedTable,
        url: &str,
        parent_key: Option<i64>,
    ) -> anyhow::Result<Option<RecordRow>> {
        self.latest_in_group(table, url, parent_key, &[RecordType::Initial, RecordType::Final])
            .await
    }

    /// The latest record of a specific type in a group (e.g. sanity checks
    /// walking the `initial` row of a chain, §8).
    pub async fn latest_record_of_type(
        &mut self,
        table: VersionedTable,
        url: &str,
        parent_key: Option<i64>,
        record_type: RecordType,
    ) -> anyhow::Result<Option<RecordRow>> {
        self.latest_in_group(table, url, parent_key, &[record_type]).await
    }

    /// Every `diff` row in a group, ordered `found` ascending — the order
    /// the chain integrity check (L1) must apply them in.
    pub async fn list_diffs(&mut self, table: VersionedTable, url: &str, parent_key: Option<i64>) -> anyhow::Result<Vec<RecordRow>> {
        let sql = match table {
            VersionedTable::Metadata => {
                "SELECT key, parent_key, url, json_text, json_hash, found, last_seen, deprecated, record_type \
                 FROM metadata WHERE url = ?1 AND parent_key = ?2 AND record_type = 1 ORDER BY found ASC, key ASC"
            }
            VersionedTable::Episodes => {
                "SELECT key, parent_key, url, json_text, json_hash, found, last_seen, deprecated, record_type \
                 FROM episodes WHERE url = ?1 AND record_type = 1 ORDER BY found ASC, key ASC"
            }
        };
        let mut query = sqlx::query_as::<_, RawRecordRow>(sql).bind(url);
        if matches!(table, VersionedTable::Metadata) {
            query = query.bind(parent_key.expect("metadata rows carry parent_key"));
        }
        let rows = query.fetch_all(&mut *self.tx).await?;
        Ok(rows.into_iter().map(RecordRow::from).collect())
    }

    async fn latest_in_group(
        &mut self,
        table: VersionedTable,
        url: &str,
        parent_key: Option<i64>,
        types: &[RecordType],
    ) -> anyhow::Result<Option<RecordRow>> {
        let placeholders = types
            .iter()
            .map(|t| t.as_i64().to_string())
            .collect::<Vec<_>>()
            .join(",");
        let sql = match table {
            VersionedTable::Metadata => format!(
                "SELECT key, parent_key, url, json_text, json_hash, found, last_seen, deprecated, record_type \
                 FROM metadata WHERE url = ?1 AND parent_key = ?2 AND record_type IN ({placeholders}) \
                 ORDER BY record_type DESC, key DESC LIMIT 1"
            ),
            VersionedTable::Episodes => format!(
                "SELECT key, parent_key, url, json_text, json_hash, found, last_seen, deprecated, record_type \
                 FROM episodes WHERE url = ?1 AND record_type IN ({placeholders}) \
                 ORDER BY record_type DESC, key DESC LIMIT 1"
            ),
        };
        let mut query = sqlx::query_as::<_, RawRecordRow>(&sql).bind(url);
        if matches!(table, VersionedTable::Metadata) {
            query = query.bind(parent_key.expect("metadata rows carry parent_key"));
        }
        let row = query.fetch_optional(&mut *self.tx).await?;
        Ok(row.map(RecordRow::from))
    }

    /// The newest `diff` in a group, tie-broken by largest key (§4.3).
    pub async fn newest_diff(
        &mut self,
        table: VersionedTable,
        url: &str,
        parent_key: Option<i64>,
    ) -> anyhow::Result<Option<RecordRow>> {
        let sql = match table {
            VersionedTable::Metadata => {
                "SELECT key, parent_key, url, json_text, json_hash, found, last_seen, deprecated, record_type \
                 FROM metadata WHERE url = ?1 AND parent_key = ?2 AND record_type = 1 \
                 ORDER BY found DESC, key DESC LIMIT 1"
            }
            VersionedTable::Episodes => {
                "SELECT key, parent_key, url, json_text, json_hash, found, last_seen, deprecated, record_type \
                 FROM episodes WHERE url = ?1 AND record_type = 1 \
                 ORDER BY found DESC, key DESC LIMIT 1"
            }
        };
        let mut query = sqlx::query_as::<_, RawRecordRow>(sql).bind(url);
        if matches!(table, VersionedTable::Metadata) {
            query = query.bind(parent_key.expect("metadata rows carry parent_key"));
        }
        let row = query.fetch_optional(&mut *self.tx).await?;
        Ok(row.map(RecordRow::from))
    }

    /// Candidates (`record_type IS NULL`), largest body first (§4.8: "to
    /// concentrate the expensive work").
    pub async fn list_candidates(&mut self, table: VersionedTable) -> anyhow::Result<Vec<CandidateRow>> {
        let sql = match table {
            VersionedTable::Metadata => {
                "SELECT key, parent_key, url, json_text, json_hash, found FROM metadata \
                 WHERE record_type IS NULL ORDER BY LENGTH(json_text) DESC"
            }
            VersionedTable::Episodes => {
                "SELECT key, parent_key, url, json_text, json_hash, found FROM episodes \
                 WHERE record_type IS NULL ORDER BY LENGTH(json_text) DESC"
            }
        };
        let rows = sqlx::query_as::<_, CandidateRow>(sql).fetch_all(&mut *self.tx).await?;
        Ok(rows)
    }

    /// §4.8 step 3: no prior `final` existed — materialize one from the
    /// candidate's body and turn the candidate into a `diff`.
    pub async fn promote_initial_to_final(
        &mut self,
        table: VersionedTable,
        candidate_key: i64,
        url: &str,
        parent_key: Option<i64>,
        full_json: &str,
        candidate_last_seen: DateTime<Utc>,
        diff_body: &str,
    ) -> anyhow::Result<()> {
        let hash = content_hash(full_json);
        match table {
            VersionedTable::Metadata => {
                sqlx::query(
                    "INSERT INTO metadata (parent_key, url, json_text, json_hash, found, last_seen, deprecated, record_type) \
                     VALUES (?1, ?2, ?3, ?4, NULL, ?5, 0, 2)",
                )
                .bind(parent_key.expect("metadata rows carry parent_key"))
                .bind(url)
                .bind(full_json)
                .bind(&hash)
                .bind(candidate_last_seen)
                .execute(&mut *self.tx)
                .await?;
            }
            VersionedTable::Episodes => {
                sqlx::query(
                    "INSERT INTO episodes (url, json_text, json_hash, found, last_seen, deprecated, record_type) \
                     VALUES (?1, ?2, ?3, NULL, ?4, 0, 2)",
                )
                .bind(url)
                .bind(full_json)
                .bind(&hash)
                .bind(candidate_last_seen)
                .execute(&mut *self.tx)
                .await?;
            }
        }

        self.rewrite_candidate_as_diff(table, candidate_key, diff_body).await
    }

    /// §4.8 step 4: a `final` already existed — overwrite it and turn the
    /// candidate into a `diff`.
    pub async fn overwrite_final(
        &mut self,
        table: VersionedTable,
        final_key: i64,
        candidate_key: i64,
        full_json: &str,
        candidate_last_seen: DateTime<Utc>,
        diff_body: &str,
    ) -> anyhow::Result<()> {
        let hash = content_hash(full_json);
        let sql = format!(
            "UPDATE {} SET json_text = ?1, json_hash = ?2, last_seen = ?3 WHERE key = ?4",
            table.as_str()
        );
        sqlx::query(&sql)
            .bind(full_json)
            .bind(&hash)
            .bind(candidate_last_seen)
            .bind(final_key)
            .execute(&mut *self.tx)
            .await?;

        self.rewrite_candidate_as_diff(table, candidate_key, diff_body).await
    }

    async fn rewrite_candidate_as_diff(
        &mut self,
        table: VersionedTable,
        candidate_key: i64,
        diff_body: &str,
    ) -> anyhow::Result<()> {
        let hash = content_hash(diff_body);
        let sql = format!(
            "UPDATE {} SET json_text = ?1, json_hash = ?2, record_type = 1 WHERE key = ?3",
            table.as_str()
        );
        sqlx::query(&sql)
            .bind(diff_body)
            .bind(&hash)
            .bind(candidate_key)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// §4.7 step 3 / general insert-or-refresh for Stream rows.
    pub async fn insert_stream(&mut self, url: &str, resolution: &str) -> anyhow::Result<StreamUpsertOutcome> {
        if let Some(row) = sqlx::query_as::<_, (i64,)>(
            "SELECT key FROM stream WHERE url = ?1 AND resolution = ?2",
        )
        .bind(url)
        .bind(resolution)
        .fetch_optional(&mut *self.tx)
        .await?
        {
            sqlx::query("UPDATE stream SET last_seen = ?1, deprecated = 0 WHERE key = ?2")
                .bind(self.t0)
                .bind(row.0)
                .execute(&mut *self.tx)
                .await?;
            return Ok(StreamUpsertOutcome::Unchanged(row.0));
        }

        let rec = sqlx::query(
            "INSERT INTO stream (url, resolution, found, last_seen, deprecated) VALUES (?1, ?2, ?3, ?3, 0)",
        )
        .bind(url)
        .bind(resolution)
        .bind(self.t0)
        .execute(&mut *self.tx)
        .await?;
        Ok(StreamUpsertOutcome::New(rec.last_insert_rowid()))
    }

    /// Idempotent association inserts (L4). Unique-constraint violations are
    /// a Store conflict (§7) — ignored, not propagated.
    pub async fn link_metadata_episode(&mut self, metadata_key: i64, episode_key: i64) -> anyhow::Result<()> {
        sqlx::query("INSERT OR IGNORE INTO metadata_episode_assoc (metadata_key, episode_key) VALUES (?1, ?2)")
            .bind(metadata_key)
            .bind(episode_key)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn link_episode_stream(&mut self, episode_key: i64, stream_key: i64) -> anyhow::Result<()> {
        sqlx::query("INSERT OR IGNORE INTO episode_stream_assoc (episode_key, stream_key) VALUES (?1, ?2)")
            .bind(episode_key)
            .bind(stream_key)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// In-transaction lookup used by the Site Indexer's parentage pass
    /// (§4.5) so it sees sites inserted earlier in the same stage.
    pub async fn find_site(&mut self, url: &str, is_video: bool) -> anyhow::Result<Option<SiteRow>> {
        let row = sqlx::query_as::<_, SiteRow>(
            "SELECT key, parent_key, url, is_video, found, last_seen FROM site WHERE url = ?1 AND is_video = ?2",
        )
        .bind(url)
        .bind(is_video)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    /// In-transaction counterpart of `Store::list_sites_with_null_parent`
    /// (§4.5 second pass).
    pub async fn list_sites_with_null_parent(&mut self) -> anyhow::Result<Vec<SiteRow>> {
        let rows = sqlx::query_as::<_, SiteRow>(
            "SELECT key, parent_key, url, is_video, found, last_seen FROM site WHERE parent_key IS NULL",
        )
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    pub async fn set_site_parent(&mut self, key: i64, parent_key: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE site SET parent_key = ?1 WHERE key = ?2")
            .bind(parent_key)
            .bind(key)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// §4.9: deprecate rows not observed this epoch.
    pub async fn deprecate_older_than(&mut self, table: VersionedTable) -> anyhow::Result<u64> {
        let sql = format!(
            "UPDATE {} SET deprecated = 1 WHERE last_seen < ?1 AND deprecated = 0",
            table.as_str()
        );
        let res = sqlx::query(&sql).bind(self.t0).execute(&mut *self.tx).await?;
        Ok(res.rows_affected())
    }

    /// §4.9: a stream is kept non-deprecated iff a non-deprecated episode
    /// observed this epoch still links to it.
    pub async fn deprecate_streams(&mut self) -> anyhow::Result<u64> {
        let res = sqlx::query(
            "UPDATE stream SET deprecated = 1 \
             WHERE deprecated = 0 AND NOT EXISTS ( \
                 SELECT 1 FROM episode_stream_assoc esa \
                 JOIN episodes e ON e.key = esa.episode_key \
                 WHERE esa.stream_key = stream.key \
                   AND e.deprecated = 0 \
                   AND e.last_seen >= ?1 \
                   AND stream.last_seen >= ?1 \
             )",
        )
        .bind(self.t0)
        .execute(&mut *self.tx)
        .await?;
        Ok(res.rows_affected())
    }
}
