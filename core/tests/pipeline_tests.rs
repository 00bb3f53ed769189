use bm25_core::pipeline::build_from_store;
use bm25_core::{
    load_cached, load_or_build, Bm25Params, CorpusBuilder, MemoryStore, Origin, SearchError, SledStore, Stage,
    StoreError,
};
use serde_json::json;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

fn reports() -> MemoryStore {
    let mut store = MemoryStore::new();
    store.push_tokens("60001", &["bird", "strike", "on", "takeoff"]);
    store.push_tokens("60002", &["bird", "ingested", "engine"]);
    store.push("60003", Some(json!({"not": "a list"})));
    store.push_tokens("60004", &["hydraulic", "failure"]);
    store
}

#[test]
fn missing_cache_builds_and_saves() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bm25.cache");
    let store = reports();
    let params = Bm25Params::default();

    let (built, origin) = load_or_build(&path, Some(params), 2, || Ok::<_, StoreError>(&store)).unwrap();
    assert_eq!(origin, Origin::Built);
    assert!(path.exists());

    let (direct, report) = build_from_store(&store, params, 100).unwrap();
    assert_eq!(report.skipped_malformed, 1);
    assert_eq!(built.index(), direct.index());
    assert_eq!(built.doc_ids(), direct.doc_ids());

    let (again, origin) = load_or_build(&path, Some(params), 2, || -> Result<MemoryStore, StoreError> {
        panic!("store must not be opened when the cache is present")
    })
    .unwrap();
    assert_eq!(origin, Origin::Cache);
    assert_eq!(again.index(), direct.index());
    assert!(again.built_at().is_some());
}

#[test]
fn corrupt_cache_does_not_fall_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bm25.cache");
    fs::write(&path, b"BM25garbage").unwrap();
    let store = reports();
    let err = load_or_build(&path, Some(Bm25Params::default()), 10, || Ok::<_, StoreError>(&store)).unwrap_err();
    assert!(matches!(err, SearchError::CacheCorrupt(Stage::Load, _)));
    assert_eq!(fs::read(&path).unwrap(), b"BM25garbage");
}

#[test]
fn parameter_drift_requires_rebuild() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bm25.cache");
    let store = reports();
    let built_with = Bm25Params::new(1.5, 0.5).unwrap();
    load_or_build(&path, Some(built_with), 10, || Ok::<_, StoreError>(&store)).unwrap();
    let err = load_or_build(&path, Some(Bm25Params::default()), 10, || Ok::<_, StoreError>(&store)).unwrap_err();
    assert!(matches!(err, SearchError::ParamsMismatch { .. }));

    let (cached, origin) = load_or_build(&path, None, 10, || Ok::<_, StoreError>(&store)).unwrap();
    assert_eq!(origin, Origin::Cache);
    assert_eq!(cached.index().params(), built_with);
}

#[test]
fn unreachable_store_is_reported_as_build_failure() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bm25.cache");
    let err = load_or_build(&path, Some(Bm25Params::default()), 10, || -> Result<MemoryStore, StoreError> {
        Err(StoreError::Unreachable("refused".into()))
    })
    .unwrap_err();
    assert!(matches!(err, SearchError::StoreUnavailable(Stage::Build, _)));
    assert!(!path.exists());
}

#[test]
fn store_timeout_is_reported_as_build_failure() {
    let dir = tempdir().unwrap();
    let store = SledStore::open(dir.path().join("store"), Duration::ZERO).unwrap();
    store.put("a", &json!({"tokens": ["bird"]})).unwrap();

    let err = CorpusBuilder::new(&store, 10).build().unwrap_err();
    assert!(matches!(err, SearchError::StoreUnavailable(Stage::Build, StoreError::Timeout(_))));
    assert_eq!(err.to_string(), "build failed: document store unavailable");
}

#[test]
fn load_cached_without_cache() {
    let dir = tempdir().unwrap();
    let err = load_cached(&dir.path().join("none")).unwrap_err();
    assert!(matches!(err, SearchError::CacheMissing(Stage::Load)));
}

#[test]
fn sled_store_end_to_end() {
    let dir = tempdir().unwrap();
    let store = SledStore::open(dir.path().join("store"), Duration::from_secs(10)).unwrap();
    store.put("a", &json!({"tokens": ["bird", "strike"], "Narrative": "Bird strike."})).unwrap();
    store.put("b", &json!({"tokens": ["tire", "burst"]})).unwrap();
    store.put("c", &json!({"Synopsis": "untokenized"})).unwrap();

    let cache = dir.path().join("bm25.cache");
    let (built, origin) = load_or_build(&cache, None, 1, || Ok::<_, StoreError>(&store)).unwrap();
    assert_eq!(origin, Origin::Built);
    assert_eq!(built.doc_ids(), &["a".to_string(), "b".to_string()]);

    let top = built.engine().query("bird", 1);
    assert_eq!(top[0].doc_id, "a");
    store.close().unwrap();
}
