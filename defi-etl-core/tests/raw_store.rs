//! Raw store: per-qualifier lookup, status and pruning on a real directory.

use chrono::{DateTime, TimeZone, Utc};
use defi_etl_core::{Dataset, DatasetKey, RawPayload, RawStore, Source};
use serde_json::json;
use std::fs;

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 8, day, hour, 0, 0).unwrap()
}

fn write(store: &RawStore, key: &DatasetKey, when: DateTime<Utc>, n: u32) {
    store
        .write(&RawPayload::new(key, "/x", when, json!({ "n": n })))
        .unwrap();
}

fn seeded() -> (tempfile::TempDir, RawStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = RawStore::new(dir.path());
    let aave = DatasetKey::qualified(Dataset::ProtocolTvl, "aave");
    let lido = DatasetKey::qualified(Dataset::ProtocolTvl, "lido");
    let markets = DatasetKey::new(Dataset::Markets);

    write(&store, &aave, at(29, 1), 1);
    write(&store, &aave, at(30, 1), 2);
    write(&store, &aave, at(31, 1), 3);
    write(&store, &lido, at(30, 2), 4);
    write(&store, &markets, at(31, 3), 5);
    (dir, store)
}

#[test]
fn newest_file_per_qualifier() {
    let (_dir, store) = seeded();
    let latest = store.latest_per_qualifier(Dataset::ProtocolTvl).unwrap();
    let seen: Vec<(Option<String>, serde_json::Value)> = latest
        .into_iter()
        .map(|(_, p)| (p.qualifier, p.data))
        .collect();
    assert_eq!(
        seen,
        vec![
            (Some("aave".to_string()), json!({"n": 3})),
            (Some("lido".to_string()), json!({"n": 4})),
        ]
    );
    assert!(store.latest_per_qualifier(Dataset::Pairs).unwrap().is_empty());
}

#[test]
fn stray_files_are_ignored() {
    let (dir, store) = seeded();
    let llama = dir.path().join("defillama");
    fs::write(llama.join("README.txt"), "notes").unwrap();
    fs::write(llama.join("2025-08-31_999999_protocols.json"), "{}").unwrap();
    fs::write(llama.join("2025-08-31_010000_protocols.json.tmp"), "{}").unwrap();

    assert_eq!(store.list(Source::DefiLlama).unwrap().len(), 4);
}

#[test]
fn status_groups_by_dataset() {
    let (_dir, store) = seeded();
    let status = store.status().unwrap();
    let stems: Vec<(&str, usize)> = status.iter().map(|s| (s.stem.as_str(), s.files)).collect();
    assert_eq!(
        stems,
        vec![("markets", 1), ("protocol_tvl@aave", 3), ("protocol_tvl@lido", 1)]
    );
    let aave = &status[1];
    assert_eq!(aave.source, Source::DefiLlama);
    assert_eq!(aave.latest, Some(at(31, 1).naive_utc()));
    assert!(aave.bytes > 0);
}

#[test]
fn prune_keeps_newest_per_dataset() {
    let (_dir, store) = seeded();
    assert!(store.prune_candidates(3).unwrap().is_empty());

    let doomed = store.prune_candidates(1).unwrap();
    assert_eq!(doomed.len(), 2);
    assert!(doomed.iter().all(|e| e.key.qualifier.as_deref() == Some("aave")));

    let freed = store.remove(&doomed).unwrap();
    assert_eq!(freed, doomed.iter().map(|e| e.bytes).sum::<u64>());

    let aave = DatasetKey::qualified(Dataset::ProtocolTvl, "aave");
    let (_, latest) = store.require_latest(&aave).unwrap();
    assert_eq!(latest.data, json!({"n": 3}));
    assert_eq!(store.list(Source::DefiLlama).unwrap().len(), 2);
}

#[test]
fn stored_payload_verifies_after_reload() {
    let (_dir, store) = seeded();
    let (path, payload) = store
        .require_latest(&DatasetKey::new(Dataset::Markets))
        .unwrap();
    assert!(payload.verify());
    assert!(path.starts_with(store.root().join("coingecko")));
    assert!(store
        .require_latest(&DatasetKey::new(Dataset::Trending))
        .is_err());
}
