use chrono::{DateTime, Utc};
use portalwatch_common::RecordType;

/// URL used for the single synthetic Site forest root (§3, parent_key = -1).
pub const SYNTHETIC_ROOT_URL: &str = "__root__";
pub const SYNTHETIC_ROOT_PARENT: i64 = -1;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SiteRow {
    pub key: i64,
    pub parent_key: Option<i64>,
    pub url: String,
    pub is_video: bool,
    pub found: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A row from `metadata` or `episodes`, with `record_type` decoded.
#[derive(Debug, Clone)]
pub struct RecordRow {
    pub key: i64,
    pub parent_key: Option<i64>,
    pub url: String,
    pub json_text: String,
    pub json_hash: String,
    pub found: Option<DateTime<Utc>>,
    pub last_seen: DateTime<Utc>,
    pub deprecated: bool,
    pub record_type: Option<RecordType>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RawRecordRow {
    pub key: i64,
    pub parent_key: Option<i64>,
    pub url: String,
    pub json_text: String,
    pub json_hash: String,
    pub found: Option<DateTime<Utc>>,
    pub last_seen: DateTime<Utc>,
    pub deprecated: bool,
    pub record_type: Option<i64>,
}

impl From<RawRecordRow> for RecordRow {
    fn from(r: RawRecordRow) -> Self {
        Self {
            key: r.key,
            parent_key: r.parent_key,
            url: r.url,
            json_text: r.json_text,
            json_hash: r.json_hash,
            found: r.found,
            last_seen: r.last_seen,
            deprecated: r.deprecated,
            record_type: r.record_type.and_then(RecordType::from_i64),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StreamRow {
    pub key: i64,
    pub url: String,
    pub resolution: String,
    pub found: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub deprecated: bool,
}

/// Outcome of `EpochTxn::insert_site` (§4.5: a URL already present is
/// updated and not re-queued for indexing).
#[derive(Debug, Clone, Copy)]
pub enum SiteInsertOutcome {
    New(i64),
    Existing(i64),
}

impl SiteInsertOutcome {
    pub fn key(self) -> i64 {
        match self {
            Self::New(k) | Self::Existing(k) => k,
        }
    }

    pub fn is_new(self) -> bool {
        matches!(self, Self::New(_))
    }
}

/// Outcome of `EpochTxn::upsert_record` (§4.3). `key` is always safe to use
/// for association inserts — it never identifies a `final` row (I3/P5): on
/// `Unchanged` against a matched `final`, `key` is the group's current
/// `diff` row instead.
#[derive(Debug, Clone, Copy)]
pub enum UpsertOutcome {
    /// First observation for this group; inserted as `initial`.
    Initial { key: i64 },
    /// Canonical body matches the current materialized state; only
    /// timestamps changed.
    Unchanged { key: i64 },
    /// Body differs from the current materialized state; a candidate row
    /// was inserted for the Delta Builder to process.
    CandidateInserted { key: i64 },
    /// Body failed JSON parsing; stored opaquely.
    NonJson { key: i64 },
}

impl UpsertOutcome {
    pub fn key(self) -> i64 {
        match self {
            Self::Initial { key }
            | Self::Unchanged { key }
            | Self::CandidateInserted { key }
            | Self::NonJson { key } => key,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum StreamUpsertOutcome {
    New(i64),
    Unchanged(i64),
}

impl StreamUpsertOutcome {
    pub fn key(self) -> i64 {
        match self {
            Self::New(k) | Self::Unchanged(k) => k,
        }
    }
}

/// A candidate (record_type = NULL) row awaiting the Delta Builder (§4.8).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CandidateRow {
    pub key: i64,
    pub parent_key: Option<i64>,
    pub url: String,
    pub json_text: String,
    pub json_hash: String,
    pub found: DateTime<Utc>,
}
