//! Integration tests for verify / purge reconciliation against on-disk fixtures.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cachesync_core::{
    CacheMode, Collection, CollectionKey, FetchEngine, HttpClient, Manifest, ModeSelection,
    Operation, Origin, ProgressReporter, Reconciler, RetryPolicy, RunState, Selection, Tally,
    VersionSelection, build_collections,
};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn reconciler(manifest: Manifest, collections: &[Collection]) -> (Reconciler, Arc<ProgressReporter>) {
    let engine = FetchEngine::new(
        HttpClient::new().unwrap(),
        5,
        RetryPolicy::new(2, Duration::from_millis(1)),
        2,
    )
    .unwrap();
    let reporter = Arc::new(ProgressReporter::sink());
    let state = Arc::new(RunState::new(manifest, collections));
    (
        Reconciler::new(engine, state, Arc::clone(&reporter), 3),
        reporter,
    )
}

fn offline_selection(offline_root: &Path, user_dir: &Path, curated: &[&str]) -> Selection {
    Selection {
        modes: ModeSelection::Only(CacheMode::Offline),
        versions: VersionSelection::All,
        playable_root: None,
        offline_root: Some(offline_root.to_path_buf()),
        user_dir: user_dir.to_path_buf(),
        origin: Origin::parse("http://cdn.invalid/ff/big").unwrap(),
        curated: curated.iter().map(|s| (*s).to_string()).collect(),
    }
}

fn write(root: &Path, rel: &str, content: &[u8]) -> PathBuf {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn test_verify_beta_20100104_playable_scenario() {
    let tmp = TempDir::new().unwrap();
    let playable_root = tmp.path().join("playable");
    let user_dir = tmp.path().join("user");
    std::fs::create_dir_all(&user_dir).unwrap();
    let content = b"unity web player archive".to_vec();
    write(&playable_root, "beta-20100104/data/a.pak", &content);

    let manifest = Manifest::parse(&format!(
        r#"{{"beta-20100104": {{"playable_size": {}, "offline_size": 0,
             "playable": {{"data/a.pak": "{}"}}, "offline": {{}}}}}}"#,
        content.len(),
        digest(&content)
    ))
    .unwrap();
    let selection = Selection {
        modes: ModeSelection::Only(CacheMode::Playable),
        versions: VersionSelection::Only("beta-20100104".to_string()),
        playable_root: Some(playable_root.clone()),
        offline_root: None,
        user_dir,
        origin: Origin::parse("http://cdn.invalid/ff/big").unwrap(),
        curated: HashSet::new(),
    };
    let collections = build_collections(&manifest, &selection).unwrap();
    let (reconciler, _reporter) = reconciler(manifest, &collections);

    reconciler.run(Operation::Verify, &collections).await.unwrap();

    let key = CollectionKey::new("beta-20100104", CacheMode::Playable);
    assert_eq!(
        reconciler.state().tallies().get(&key),
        Some(Tally {
            intact: content.len() as u64,
            altered: 0,
            total: content.len() as u64,
        })
    );
    assert!(!reconciler.state().is_manifest_dirty());
}

#[tokio::test]
async fn test_verify_counts_intact_and_altered_bytes_read() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("offline");
    write(&root, "v1/good/a.pak", b"aaaa");
    write(&root, "v1/good/b.pak", b"bbbbbbbb");
    write(&root, "v1/bad.pak", b"tampered!");

    let manifest = Manifest::parse(&format!(
        r#"{{"v1": {{"offline_size": 1000, "offline": {{
            "good/a.pak": "{}", "good/b.pak": "{}", "bad.pak": "{}", "missing.pak": "{}"}}}}}}"#,
        digest(b"aaaa"),
        digest(b"bbbbbbbb"),
        digest(b"original"),
        digest(b"gone"),
    ))
    .unwrap();
    let collections =
        build_collections(&manifest, &offline_selection(&root, tmp.path(), &["v1"])).unwrap();
    let (reconciler, reporter) = reconciler(manifest, &collections);

    reconciler.run(Operation::Verify, &collections).await.unwrap();

    let tally = reconciler
        .state()
        .tallies()
        .get(&CollectionKey::new("v1", CacheMode::Offline))
        .unwrap();
    assert_eq!(tally.intact, 12);
    assert_eq!(tally.altered, 9, "altered counts bytes read, not expected size");
    assert_eq!(tally.total, 1000);
    // 4 hash checks with update_freq 2
    assert_eq!(reporter.push_count(), 2);
}

#[tokio::test]
async fn test_verify_twice_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("offline");
    write(&root, "v1/a.pak", b"first");
    write(&root, "v1/b.pak", b"second, altered");
    let manifest = Manifest::parse(&format!(
        r#"{{"v1": {{"offline_size": 20, "offline": {{"a.pak": "{}", "b.pak": "{}"}}}}}}"#,
        digest(b"first"),
        digest(b"second"),
    ))
    .unwrap();
    let collections =
        build_collections(&manifest, &offline_selection(&root, tmp.path(), &[])).unwrap();

    let mut snapshots = Vec::new();
    for _ in 0..2 {
        let (reconciler, _reporter) = reconciler(manifest.clone(), &collections);
        reconciler.run(Operation::Verify, &collections).await.unwrap();
        snapshots.push(reconciler.state().snapshot());
    }

    assert_eq!(snapshots[0], snapshots[1]);
}

#[tokio::test]
async fn test_verify_discovers_and_registers_untracked_file() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("offline");
    write(&root, "v1/known.pak", b"known");
    write(&root, "v1/extra/new.pak", b"discovered");
    let manifest = Manifest::parse(&format!(
        r#"{{"v1": {{"offline_size": 5, "offline": {{"known.pak": "{}"}}}}}}"#,
        digest(b"known"),
    ))
    .unwrap();
    let collections =
        build_collections(&manifest, &offline_selection(&root, tmp.path(), &[])).unwrap();
    let (reconciler, reporter) = reconciler(manifest, &collections);

    reconciler.run(Operation::Verify, &collections).await.unwrap();

    let state = reconciler.state();
    let tally = state
        .tallies()
        .get(&CollectionKey::new("v1", CacheMode::Offline))
        .unwrap();
    assert_eq!(tally.intact, 5 + 10);
    assert_eq!(tally.altered, 0);
    assert_eq!(tally.total, 5 + 10);
    assert!(state.is_manifest_dirty());
    let manifest = state.manifest_snapshot();
    let expected = digest(b"discovered");
    assert_eq!(
        manifest.entry("v1").unwrap().offline.get("extra/new.pak"),
        Some(expected.as_str())
    );
    // One batched push for the known file, one for the discovery
    assert_eq!(reporter.push_count(), 2);
}

#[tokio::test]
async fn test_purge_curated_removes_only_recorded_files() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("offline");
    write(&root, "v1/a.pak", b"a");
    write(&root, "v1/b.pak", b"b");
    write(&root, "v1/c.pak", b"c");
    let manifest = Manifest::parse(
        r#"{"v1": {"offline_size": 2, "offline": {"a.pak": "00", "b.pak": "00"}}}"#,
    )
    .unwrap();
    let collections =
        build_collections(&manifest, &offline_selection(&root, tmp.path(), &["v1"])).unwrap();
    let (reconciler, reporter) = reconciler(manifest, &collections);

    reconciler.run(Operation::Purge, &collections).await.unwrap();

    assert!(!root.join("v1/a.pak").exists());
    assert!(!root.join("v1/b.pak").exists());
    assert!(root.join("v1/c.pak").exists());
    assert!(!reconciler.state().is_manifest_dirty());
    assert_eq!(reporter.push_count(), 1);
}

#[tokio::test]
async fn test_purge_curated_removes_root_once_empty() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("offline");
    write(&root, "v1/a.pak", b"a");
    write(&root, "v1/sub/b.pak", b"b");
    let manifest = Manifest::parse(
        r#"{"v1": {"offline": {"a.pak": "00", "sub/b.pak": "00"}}}"#,
    )
    .unwrap();
    let collections =
        build_collections(&manifest, &offline_selection(&root, tmp.path(), &["v1"])).unwrap();
    let (reconciler, _reporter) = reconciler(manifest, &collections);

    reconciler.run(Operation::Purge, &collections).await.unwrap();

    assert!(!root.join("v1").exists());
    assert!(root.exists());
}

#[tokio::test]
async fn test_purge_non_curated_deletes_tree_and_resets_collection() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("offline");
    write(&root, "v1/a.pak", b"a");
    write(&root, "v1/untracked/deep/x.bin", b"x");
    let manifest = Manifest::parse(
        r#"{"v1": {"offline_size": 99, "offline": {"a.pak": "00"}},
            "v2": {"offline_size": 7, "offline": {"z.pak": "00"}}}"#,
    )
    .unwrap();
    let selection = Selection {
        versions: VersionSelection::Only("v1".to_string()),
        ..offline_selection(&root, tmp.path(), &[])
    };
    let collections = build_collections(&manifest, &selection).unwrap();
    let (reconciler, _reporter) = reconciler(manifest, &collections);

    reconciler.run(Operation::Purge, &collections).await.unwrap();

    assert!(!root.join("v1").exists());
    let state = reconciler.state();
    assert_eq!(
        state
            .tallies()
            .get(&CollectionKey::new("v1", CacheMode::Offline)),
        Some(Tally::default())
    );
    let manifest = state.manifest_snapshot();
    let v1 = manifest.entry("v1").unwrap();
    assert!(v1.offline.is_empty());
    assert_eq!(v1.offline_size, 0);
    let v2 = manifest.entry("v2").unwrap();
    assert_eq!(v2.offline.len(), 1, "other versions are untouched");
}

#[tokio::test]
async fn test_finish_always_pushes_after_run() {
    let tmp = TempDir::new().unwrap();
    let manifest = Manifest::parse(r#"{"v1": {}}"#).unwrap();
    let collections =
        build_collections(&manifest, &offline_selection(tmp.path(), tmp.path(), &["v1"]))
            .unwrap();
    let (reconciler, reporter) = reconciler(manifest, &collections);

    reconciler.run(Operation::Verify, &collections).await.unwrap();
    reconciler.finish().await.unwrap();

    assert_eq!(reporter.push_count(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_verify_registers_each_file_once_despite_symlink_loop() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("offline");
    write(&root, "v1/a.pak", b"only copy");
    std::os::unix::fs::symlink(root.join("v1"), root.join("v1/loop")).unwrap();
    let manifest = Manifest::parse(r#"{"v1": {}}"#).unwrap();
    let collections =
        build_collections(&manifest, &offline_selection(&root, tmp.path(), &[])).unwrap();
    let (reconciler, _reporter) = reconciler(manifest, &collections);

    reconciler.run(Operation::Verify, &collections).await.unwrap();

    let state = reconciler.state();
    let tally = state
        .tallies()
        .get(&CollectionKey::new("v1", CacheMode::Offline))
        .unwrap();
    assert_eq!(tally.intact, 9);
    assert_eq!(tally.total, 9);
    let manifest = state.manifest_snapshot();
    assert_eq!(manifest.entry("v1").unwrap().offline.len(), 1);
}
