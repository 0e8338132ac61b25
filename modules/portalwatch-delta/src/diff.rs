use json_patch::Patch;
use portalwatch_common::canonicalize;
use serde_json::Value;

/// The structural diff `Δ = diff(C, T)` (§4.8 step 2) together with the
/// canonicalized target body it was computed against.
pub struct Delta {
    pub diff_body: String,
    pub target_body: String,
}

/// Compute `Δ` such that `patch(existing, Δ) ≡ target` for any JSON (RFC
/// 6902 structural diff, satisfying `patch(X, diff(X, Y)) ≡ Y` for all JSON
/// values). Both inputs must already be canonical JSON.
pub fn compute_delta(existing_canonical: &str, target_canonical: &str) -> anyhow::Result<Delta> {
    let existing: Value = serde_json::from_str(existing_canonical)?;
    let target: Value = serde_json::from_str(target_canonical)?;

    let patch = json_patch::diff(&existing, &target);
    let diff_value = serde_json::to_value(&patch)?;
    let diff_body = canonicalize(&serde_json::to_string(&diff_value)?)?;

    Ok(Delta { diff_body, target_body: target_canonical.to_string() })
}

/// Apply a stored diff body to a base JSON document, returning the
/// canonicalized result. Used both to materialize the Delta Builder's next
/// `final` and by the chain integrity check (L1).
pub fn apply_delta(base_canonical: &str, diff_body: &str) -> anyhow::Result<String> {
    let mut doc: Value = serde_json::from_str(base_canonical)?;
    let patch: Patch = serde_json::from_str(diff_body)?;
    json_patch::patch(&mut doc, &patch)?;
    canonicalize(&serde_json::to_string(&doc)?).map_err(Into::into)
}

/// L1: applying `initial`, then every `diff` in `found` order, must
/// reproduce the materialized `final` exactly.
pub fn verify_chain(initial_canonical: &str, diffs_in_found_order: &[String], final_canonical: &str) -> anyhow::Result<bool> {
    let mut current = initial_canonical.to_string();
    for diff_body in diffs_in_found_order {
        current = apply_delta(&current, diff_body)?;
    }
    Ok(current == final_canonical)
}
