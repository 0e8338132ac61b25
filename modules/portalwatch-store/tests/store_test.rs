use chrono::{Duration, TimeZone, Utc};
use portalwatch_common::VersionedTable;
use portalwatch_store::{Store, SYNTHETIC_ROOT_PARENT, SYNTHETIC_ROOT_URL};

fn t(hour: i64) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hour)
}

#[tokio::test]
async fn ensure_root_is_idempotent() {
    let store = Store::connect_in_memory().await.unwrap();
    let first = store.ensure_root(t(0)).await.unwrap();
    let second = store.ensure_root(t(1)).await.unwrap();
    assert_eq!(first, second);

    let row = store.find_site(SYNTHETIC_ROOT_URL, false).await.unwrap().unwrap();
    assert_eq!(row.parent_key, Some(SYNTHETIC_ROOT_PARENT));
    assert_eq!(row.last_seen, t(1));
}

#[tokio::test]
async fn insert_site_reports_new_then_existing() {
    let store = Store::connect_in_memory().await.unwrap();
    let mut txn = store.begin_epoch(t(0)).await.unwrap();

    let first = txn.insert_site("https://portal.example/cat/a", false, Some(1)).await.unwrap();
    assert!(first.is_new());

    let second = txn.insert_site("https://portal.example/cat/a", false, Some(1)).await.unwrap();
    assert!(!second.is_new());
    assert_eq!(first.key(), second.key());

    txn.commit().await.unwrap();
}

#[tokio::test]
async fn upsert_record_first_seen_is_initial() {
    let store = Store::connect_in_memory().await.unwrap();
    let mut txn = store.begin_epoch(t(0)).await.unwrap();

    let outcome = txn
        .upsert_record(VersionedTable::Metadata, "https://portal.example/series/1", Some(1), r#"{"title":"A"}"#, false)
        .await
        .unwrap();
    assert!(matches!(outcome, portalwatch_store::UpsertOutcome::Initial { .. }));
}

#[tokio::test]
async fn upsert_record_unchanged_body_is_noop_beyond_timestamps() {
    let store = Store::connect_in_memory().await.unwrap();
    let mut txn = store.begin_epoch(t(0)).await.unwrap();
    txn.upsert_record(VersionedTable::Metadata, "https://portal.example/series/1", Some(1), r#"{"a":1,"b":2}"#, false)
        .await
        .unwrap();
    txn.commit().await.unwrap();

    let mut txn2 = store.begin_epoch(t(1)).await.unwrap();
    let outcome = txn2
        .upsert_record(VersionedTable::Metadata, "https://portal.example/series/1", Some(1), r#"{"b":2,"a":1}"#, false)
        .await
        .unwrap();
    assert!(matches!(outcome, portalwatch_store::UpsertOutcome::Unchanged { .. }));
    txn2.commit().await.unwrap();
}

#[tokio::test]
async fn upsert_record_changed_body_produces_candidate() {
    let store = Store::connect_in_memory().await.unwrap();
    let mut txn = store.begin_epoch(t(0)).await.unwrap();
    txn.upsert_record(VersionedTable::Metadata, "https://portal.example/series/1", Some(1), r#"{"title":"A"}"#, false)
        .await
        .unwrap();
    txn.commit().await.unwrap();

    let mut txn2 = store.begin_epoch(t(1)).await.unwrap();
    let outcome = txn2
        .upsert_record(VersionedTable::Metadata, "https://portal.example/series/1", Some(1), r#"{"title":"B"}"#, false)
        .await
        .unwrap();
    assert!(matches!(outcome, portalwatch_store::UpsertOutcome::CandidateInserted { .. }));
    let candidates = txn2.list_candidates(VersionedTable::Metadata).await.unwrap();
    assert_eq!(candidates.len(), 1);
    txn2.commit().await.unwrap();
}

#[tokio::test]
async fn non_json_body_round_trips_without_colliding_with_json_group() {
    let store = Store::connect_in_memory().await.unwrap();
    let mut txn = store.begin_epoch(t(0)).await.unwrap();

    let first = txn
        .upsert_record(VersionedTable::Episodes, "https://portal.example/ep/1", None, "<html>broken</html>", false)
        .await
        .unwrap();
    let second = txn
        .upsert_record(VersionedTable::Episodes, "https://portal.example/ep/1", None, "<html>broken</html>", false)
        .await
        .unwrap();
    assert_eq!(first.key(), second.key());

    // A later valid body for the same URL is its own, independent group (O1).
    let json_outcome = txn
        .upsert_record(VersionedTable::Episodes, "https://portal.example/ep/1", None, r#"{"ok":true}"#, false)
        .await
        .unwrap();
    assert!(matches!(json_outcome, portalwatch_store::UpsertOutcome::Initial { .. }));
    assert_ne!(json_outcome.key(), first.key());

    txn.commit().await.unwrap();
}

#[tokio::test]
async fn candidate_promotes_to_final_when_no_prior_final_exists() {
    let store = Store::connect_in_memory().await.unwrap();
    let mut txn = store.begin_epoch(t(0)).await.unwrap();
    txn.upsert_record(VersionedTable::Metadata, "https://portal.example/series/1", Some(1), r#"{"title":"A"}"#, false)
        .await
        .unwrap();
    txn.commit().await.unwrap();

    let mut txn2 = store.begin_epoch(t(1)).await.unwrap();
    txn2.upsert_record(VersionedTable::Metadata, "https://portal.example/series/1", Some(1), r#"{"title":"B"}"#, false)
        .await
        .unwrap();
    let candidates = txn2.list_candidates(VersionedTable::Metadata).await.unwrap();
    assert_eq!(candidates.len(), 1);
    let candidate = &candidates[0];

    txn2.promote_initial_to_final(
        VersionedTable::Metadata,
        candidate.key,
        &candidate.url,
        candidate.parent_key,
        &candidate.json_text,
        candidate.found,
        r#"[{"op":"replace","path":"/title","value":"B"}]"#,
    )
    .await
    .unwrap();
    txn2.commit().await.unwrap();

    let mut txn3 = store.begin_epoch(t(2)).await.unwrap();
    let latest = txn3
        .latest_non_diff(VersionedTable::Metadata, "https://portal.example/series/1", Some(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.record_type, Some(portalwatch_common::RecordType::Final));
    assert_eq!(latest.json_text, r#"{"title":"B"}"#);
    txn3.commit().await.unwrap();
}

#[tokio::test]
async fn deprecate_older_than_marks_rows_not_seen_this_epoch() {
    let store = Store::connect_in_memory().await.unwrap();
    let mut txn = store.begin_epoch(t(0)).await.unwrap();
    txn.upsert_record(VersionedTable::Metadata, "https://portal.example/series/1", Some(1), r#"{"title":"A"}"#, false)
        .await
        .unwrap();
    txn.commit().await.unwrap();

    let mut txn2 = store.begin_epoch(t(1)).await.unwrap();
    let affected = txn2.deprecate_older_than(VersionedTable::Metadata).await.unwrap();
    assert_eq!(affected, 1);
    txn2.commit().await.unwrap();
}

#[tokio::test]
async fn deprecate_streams_keeps_streams_linked_to_live_episodes() {
    let store = Store::connect_in_memory().await.unwrap();
    let mut txn = store.begin_epoch(t(0)).await.unwrap();

    let episode = txn
        .upsert_record(VersionedTable::Episodes, "https://portal.example/ep/1", None, r#"{"ok":true}"#, false)
        .await
        .unwrap();
    let stream = txn.insert_stream("https://cdn.example/ep1.m3u8", "1080p").await.unwrap();
    txn.link_episode_stream(episode.key(), stream.key()).await.unwrap();
    txn.commit().await.unwrap();

    // Next epoch: episode is re-seen, stream is not directly touched but
    // remains linked, so it must not be deprecated.
    let mut txn2 = store.begin_epoch(t(1)).await.unwrap();
    let episode2 = txn2
        .upsert_record(VersionedTable::Episodes, "https://portal.example/ep/1", None, r#"{"ok":true}"#, false)
        .await
        .unwrap();
    let stream2 = txn2.insert_stream("https://cdn.example/ep1.m3u8", "1080p").await.unwrap();
    txn2.link_episode_stream(episode2.key(), stream2.key()).await.unwrap();
    let affected = txn2.deprecate_streams().await.unwrap();
    assert_eq!(affected, 0);
    txn2.commit().await.unwrap();

    // Third epoch: the episode is gone, so the stream should now deprecate.
    let mut txn3 = store.begin_epoch(t(2)).await.unwrap();
    txn3.deprecate_older_than(VersionedTable::Episodes).await.unwrap();
    let affected = txn3.deprecate_streams().await.unwrap();
    assert_eq!(affected, 1);
    txn3.commit().await.unwrap();
}
