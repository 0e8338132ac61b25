use portalwatch_common::{decode_from_storage, encode_for_storage, RecordType, VersionedTable};
use portalwatch_store::EpochTxn;
use tracing::{info, warn};

use crate::diff::compute_delta;

/// Outcome of one Delta Builder pass over a table (§4.8).
#[derive(Debug, Default, Clone, Copy)]
pub struct DeltaStats {
    pub processed: usize,
    pub failed: usize,
}

/// Processes every candidate (`record_type = NULL`) in `table`, largest body
/// first (already the order `EpochTxn::list_candidates` returns them in).
/// An invariant violation (no `initial`/`final` in the group) is logged and
/// that candidate is skipped; the stage continues (§7: "fatal for the
/// current record ... the stage continues with other records").
pub async fn build_deltas(txn: &mut EpochTxn, table: VersionedTable, use_base64: bool) -> anyhow::Result<DeltaStats> {
    let candidates = txn.list_candidates(table).await?;
    let mut stats = DeltaStats::default();

    for candidate in candidates {
        let existing = match txn.latest_non_diff(table, &candidate.url, candidate.parent_key).await? {
            Some(row) => row,
            None => {
                warn!(
                    table = table.as_str(),
                    url = %candidate.url,
                    candidate_key = candidate.key,
                    "store invariant violated: candidate has no initial/final in its group"
                );
                stats.failed += 1;
                continue;
            }
        };

        let existing_canonical = match decode_from_storage(&existing.json_text, use_base64) {
            Ok(v) => v,
            Err(e) => {
                warn!(candidate_key = candidate.key, error = %e, "failed to decode existing body");
                stats.failed += 1;
                continue;
            }
        };
        let candidate_canonical = match decode_from_storage(&candidate.json_text, use_base64) {
            Ok(v) => v,
            Err(e) => {
                warn!(candidate_key = candidate.key, error = %e, "failed to decode candidate body");
                stats.failed += 1;
                continue;
            }
        };

        let delta = match compute_delta(&existing_canonical, &candidate_canonical) {
            Ok(d) => d,
            Err(e) => {
                warn!(candidate_key = candidate.key, error = %e, "failed to compute structural diff");
                stats.failed += 1;
                continue;
            }
        };

        let stored_full_json = encode_for_storage(&delta.target_body, use_base64);
        let stored_diff_body = encode_for_storage(&delta.diff_body, use_base64);

        let result = match existing.record_type {
            Some(RecordType::Initial) => {
                txn.promote_initial_to_final(
                    table,
                    candidate.key,
                    &candidate.url,
                    candidate.parent_key,
                    &stored_full_json,
                    candidate.found,
                    &stored_diff_body,
                )
                .await
            }
            Some(RecordType::Final) => {
                txn.overwrite_final(
                    table,
                    existing.key,
                    candidate.key,
                    &stored_full_json,
                    candidate.found,
                    &stored_diff_body,
                )
                .await
            }
            other => {
                warn!(candidate_key = candidate.key, ?other, "unexpected record_type for latest_non_diff match");
                stats.failed += 1;
                continue;
            }
        };

        match result {
            Ok(()) => stats.processed += 1,
            Err(e) => {
                warn!(candidate_key = candidate.key, error = %e, "failed to write delta result");
                stats.failed += 1;
            }
        }
    }

    info!(table = table.as_str(), processed = stats.processed, failed = stats.failed, "delta builder pass complete");
    Ok(stats)
}
