use std::fmt;

use portalwatch_store::Store;
use tracing::{error, info};

/// One post-hoc sanity finding (§8). Checks report, they never roll back
/// the epoch (§7: "Sanity checks ... run post-hoc and report, never
/// rollback").
#[derive(Debug, Clone)]
pub struct Violation {
    pub property: &'static str,
    pub detail: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.property, self.detail)
    }
}

/// Outcome of the full §8 sanity pass. `passed()` drives the CLI exit code
/// (§6: "exit code 0 if all sanity checks pass, 1 if any fail").
#[derive(Debug, Default, Clone)]
pub struct SanityReport {
    pub violations: Vec<Violation>,
}

impl SanityReport {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

impl fmt::Display for SanityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.violations.is_empty() {
            write!(f, "sanity: all checks passed")
        } else {
            write!(f, "sanity: {} violation(s)", self.violations.len())
        }
    }
}

/// Runs P1–P8 (§8) against both versioned tables and the Site forest.
/// `non_json` groups are exempt from P1/P2 by construction (§3-I1 /
/// B5) — they are not VersionedRecord chains.
pub async fn run_all(store: &Store) -> anyhow::Result<SanityReport> {
    let mut violations = Vec::new();

    for table in ["metadata", "episodes"] {
        violations.extend(check_exactly_one_initial(store, table).await?); // P1
        violations.extend(check_final_iff_diff(store, table).await?); // P2
        violations.extend(check_found_nullability(store, table).await?); // P3
        violations.extend(check_last_seen_ge_found(store, table).await?); // P4
        violations.extend(check_no_final_in_assoc(store, table).await?); // P5
        violations.extend(check_one_live_row_per_group(store, table).await?); // P6
    }

    violations.extend(check_video_sites_are_leaves(store).await?); // P7
    violations.extend(check_sites_have_parent(store).await?); // P8

    for v in &violations {
        error!(property = v.property, detail = %v.detail, "sanity check failed");
    }
    if violations.is_empty() {
        info!("sanity checks: all properties hold");
    }

    Ok(SanityReport { violations })
}

fn group_column(table: &str) -> &'static str {
    if table == "metadata" {
        "url, parent_key"
    } else {
        "url"
    }
}

/// P1: exactly one `initial` (record_type = 0) per group.
async fn check_exactly_one_initial(store: &Store, table: &str) -> anyhow::Result<Vec<Violation>> {
    let sql = format!(
        "SELECT {cols}, COUNT(*) AS n FROM {table} WHERE record_type = 0 \
         GROUP BY {cols} HAVING COUNT(*) != 1",
        cols = group_column(table),
        table = table
    );
    let rows = sqlx::query(&sql).fetch_all(store.pool()).await?;
    Ok(rows
        .into_iter()
        .map(|_| Violation { property: "P1", detail: format!("{table}: group with != 1 initial row") })
        .collect())
}

/// P2: exactly one `final` iff any `diff` exists, in the same group.
async fn check_final_iff_diff(store: &Store, table: &str) -> anyhow::Result<Vec<Violation>> {
    let cols = group_column(table);
    let sql = format!(
        "SELECT {cols}, \
            SUM(CASE WHEN record_type = 1 THEN 1 ELSE 0 END) AS diffs, \
            SUM(CASE WHEN record_type = 2 THEN 1 ELSE 0 END) AS finals \
         FROM {table} GROUP BY {cols} \
         HAVING (diffs > 0 AND finals != 1) OR (diffs = 0 AND finals != 0)"
    );
    let rows = sqlx::query(&sql).fetch_all(store.pool()).await?;
    Ok(rows
        .into_iter()
        .map(|_| Violation { property: "P2", detail: format!("{table}: diff/final count mismatch in a group") })
        .collect())
}

/// P3: `final` rows have NULL `found`; every other row has non-NULL `found`.
async fn check_found_nullability(store: &Store, table: &str) -> anyhow::Result<Vec<Violation>> {
    let sql = format!(
        "SELECT COUNT(*) AS n FROM {table} \
         WHERE (record_type = 2 AND found IS NOT NULL) \
            OR (record_type != 2 AND record_type IS NOT NULL AND found IS NULL)"
    );
    let (n,): (i64,) = sqlx::query_as(&sql).fetch_one(store.pool()).await?;
    Ok(if n > 0 {
        vec![Violation { property: "P3", detail: format!("{table}: {n} row(s) with wrong found nullability") }]
    } else {
        Vec::new()
    })
}

/// P4: `last_seen >= found` wherever `found` is set.
async fn check_last_seen_ge_found(store: &Store, table: &str) -> anyhow::Result<Vec<Violation>> {
    let sql = format!("SELECT COUNT(*) AS n FROM {table} WHERE found IS NOT NULL AND last_seen < found");
    let (n,): (i64,) = sqlx::query_as(&sql).fetch_one(store.pool()).await?;
    Ok(if n > 0 {
        vec![Violation { property: "P4", detail: format!("{table}: {n} row(s) with last_seen < found") }]
    } else {
        Vec::new()
    })
}

/// P5: no association row references a `final` record.
async fn check_no_final_in_assoc(store: &Store, table: &str) -> anyhow::Result<Vec<Violation>> {
    let sql = match table {
        "metadata" => {
            "SELECT COUNT(*) AS n FROM metadata_episode_assoc a \
             JOIN metadata m ON m.key = a.metadata_key WHERE m.record_type = 2"
        }
        _ => {
            "SELECT COUNT(*) AS n FROM metadata_episode_assoc a \
             JOIN episodes e ON e.key = a.episode_key WHERE e.record_type = 2 \
             UNION ALL \
             SELECT COUNT(*) FROM episode_stream_assoc a \
             JOIN episodes e ON e.key = a.episode_key WHERE e.record_type = 2"
        }
    };
    let rows: Vec<(i64,)> = sqlx::query_as(sql).fetch_all(store.pool()).await?;
    let total: i64 = rows.iter().map(|(n,)| n).sum();
    Ok(if total > 0 {
        vec![Violation { property: "P5", detail: format!("{table}: {total} association row(s) reference a final record") }]
    } else {
        Vec::new()
    })
}

/// P6: exactly one non-deprecated row per group (the sole `initial` if no
/// `diff` exists, otherwise the `(newest diff, final)` pair; `non_json`
/// groups have all non-deprecated entries and are excluded here — they
/// stand alone per §3-I5).
async fn check_one_live_row_per_group(store: &Store, table: &str) -> anyhow::Result<Vec<Violation>> {
    let cols = group_column(table);
    let sql = format!(
        "SELECT {cols}, \
            SUM(CASE WHEN deprecated = 0 AND record_type != 3 THEN 1 ELSE 0 END) AS live, \
            SUM(CASE WHEN record_type = 1 THEN 1 ELSE 0 END) AS diffs \
         FROM {table} WHERE record_type IN (0, 1, 2) GROUP BY {cols} \
         HAVING (diffs = 0 AND live != 1) OR (diffs > 0 AND live != 2)"
    );
    let rows = sqlx::query(&sql).fetch_all(store.pool()).await?;
    Ok(rows
        .into_iter()
        .map(|_| Violation { property: "P6", detail: format!("{table}: group without exactly one live record") })
        .collect())
}

/// P7: a video-leaf Site is never itself a parent.
async fn check_video_sites_are_leaves(store: &Store) -> anyhow::Result<Vec<Violation>> {
    let sql = "SELECT COUNT(*) AS n FROM site s \
               JOIN site child ON child.parent_key = s.key WHERE s.is_video = 1";
    let (n,): (i64,) = sqlx::query_as(sql).fetch_one(store.pool()).await?;
    Ok(if n > 0 {
        vec![Violation { property: "P7", detail: format!("{n} video-leaf site(s) have children") }]
    } else {
        Vec::new()
    })
}

/// P8: every Site has a resolved parent except the synthetic root.
async fn check_sites_have_parent(store: &Store) -> anyhow::Result<Vec<Violation>> {
    let sql = format!(
        "SELECT COUNT(*) AS n FROM site WHERE parent_key IS NULL AND url != '{}'",
        portalwatch_store::SYNTHETIC_ROOT_URL
    );
    let (n,): (i64,) = sqlx::query_as(&sql).fetch_one(store.pool()).await?;
    Ok(if n > 0 {
        vec![Violation { property: "P8", detail: format!("{n} site(s) with unresolved parent") }]
    } else {
        Vec::new()
    })
}
