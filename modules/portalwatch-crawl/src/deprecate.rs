use chrono::{DateTime, Utc};
use portalwatch_common::VersionedTable;
use portalwatch_store::Store;
use tracing::info;

/// §4.9 for a single VersionedRecord table: everything not observed this
/// epoch is marked deprecated. Opens and commits its own `EpochTxn`.
pub async fn deprecate_table(store: &Store, t0: DateTime<Utc>, table: VersionedTable) -> anyhow::Result<u64> {
    let mut txn = store.begin_epoch(t0).await?;
    let affected = txn.deprecate_older_than(table).await?;
    txn.commit().await?;
    info!(table = table.as_str(), deprecated = affected, "deprecation pass complete");
    Ok(affected)
}

/// §4.9 stream guard: a stream survives iff a non-deprecated episode
/// observed this epoch still links to it.
pub async fn deprecate_streams(store: &Store, t0: DateTime<Utc>) -> anyhow::Result<u64> {
    let mut txn = store.begin_epoch(t0).await?;
    let affected = txn.deprecate_streams().await?;
    txn.commit().await?;
    info!(deprecated = affected, "stream deprecation pass complete");
    Ok(affected)
}
