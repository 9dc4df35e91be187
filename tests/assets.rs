//! Asset cache lifecycle: loading, pinning, eviction

use std::sync::Arc;

use scene_engine::assets::{AssetCache, AssetError, MemorySource, ModelAsset};

const TRIANGLE_OBJ: &str = "\
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 0.0 1.0 0.0
f 1 2 3
";

fn cache_with(paths: &[&str]) -> AssetCache<ModelAsset> {
    let _ = env_logger::builder().is_test(true).try_init();
    let source = Arc::new(MemorySource::new());
    for path in paths {
        source.insert(path, TRIANGLE_OBJ);
    }
    AssetCache::new(source, 8)
}

#[test]
fn create_rejects_duplicates() {
    let cache = cache_with(&["mem://a.obj"]);
    cache.create("mem://a.obj").unwrap();
    assert!(matches!(
        cache.create("mem://a.obj"),
        Err(AssetError::AlreadyExists(_))
    ));
}

#[test]
fn get_returns_the_same_instance() {
    let cache = cache_with(&["mem://a.obj"]);
    let created = cache.create("mem://a.obj").unwrap();
    let fetched = cache.get("mem://a.obj").unwrap();
    assert!(created.same_instance(&fetched));
    assert_eq!(created.uid(), fetched.uid());
    assert!(cache.get_uid(created.uid()).is_some());
}

#[test]
fn missing_source_bytes_fail_with_not_found() {
    let cache = cache_with(&[]);
    assert!(matches!(
        cache.create("mem://nope.obj"),
        Err(AssetError::NotFound(_))
    ));
}

#[test]
fn undecodable_bytes_fail_with_decode() {
    let source = Arc::new(MemorySource::new());
    source.insert("mem://broken.obj", "f 1 2");
    let cache: AssetCache<ModelAsset> = AssetCache::new(source, 8);
    assert!(matches!(
        cache.create("mem://broken.obj"),
        Err(AssetError::Decode(_))
    ));
}

#[test]
fn shrinking_capacity_evicts_least_recently_used_first() {
    let cache = cache_with(&["mem://a.obj", "mem://b.obj", "mem://c.obj"]);
    let a = cache.create("mem://a.obj").unwrap();
    let b = cache.create("mem://b.obj").unwrap();
    let c = cache.create("mem://c.obj").unwrap();
    let (a_uid, b_uid, c_uid) = (a.uid(), b.uid(), c.uid());
    drop((a, b, c));

    // Touch a so b becomes the oldest.
    cache.get("mem://a.obj").unwrap();

    cache.resize(2);
    assert_eq!(cache.len(), 2);
    assert!(cache.is_in_cache(a_uid));
    assert!(!cache.is_in_cache(b_uid));
    assert!(cache.is_in_cache(c_uid));
}

#[test]
fn pinned_assets_survive_eviction() {
    let cache = cache_with(&["mem://a.obj", "mem://b.obj"]);
    let pinned = cache.create("mem://a.obj").unwrap();
    let unpinned = cache.create("mem://b.obj").unwrap();
    let unpinned_uid = unpinned.uid();
    drop(unpinned);

    cache.resize(0);
    assert!(cache.is_in_cache(pinned.uid()));
    assert!(!cache.is_in_cache(unpinned_uid));
    assert!(cache.is_in_use(pinned.uid()));

    // Once the pin drops, the next tick evicts.
    let uid = pinned.uid();
    drop(pinned);
    assert!(!cache.is_in_use(uid));
    cache.tick();
    assert!(cache.is_empty());
}

#[test]
fn async_load_resolves_and_publishes_on_tick() {
    let cache = cache_with(&["mem://a.obj"]);
    let future = cache.create_async("mem://a.obj").unwrap();

    let handle = future.wait().unwrap();
    assert_eq!(handle.data().vertices.len(), 3);

    // The entry becomes visible to get() once the tick publishes it.
    cache.tick();
    let fetched = cache.get("mem://a.obj").unwrap();
    assert!(handle.same_instance(&fetched));
}

#[test]
fn async_load_failure_surfaces_in_the_future() {
    let cache = cache_with(&[]);
    let future = cache.create_async("mem://nope.obj").unwrap();
    assert!(matches!(future.wait(), Err(AssetError::LoadFailed(_))));
    cache.tick();
    assert!(cache.get("mem://nope.obj").is_none());
}

#[test]
fn get_async_deduplicates_in_flight_loads() {
    let cache = cache_with(&["mem://a.obj"]);
    let first = cache.get_async("mem://a.obj").unwrap();
    let second = cache.get_async("mem://a.obj").unwrap();
    let first = first.wait().unwrap();
    let second = second.wait().unwrap();
    assert!(first.same_instance(&second));
    assert_eq!(cache.len(), 1);
}

#[test]
fn delete_forgets_the_path_and_the_backing_bytes() {
    let cache = cache_with(&["mem://a.obj"]);
    let handle = cache.create("mem://a.obj").unwrap();
    let uid = handle.uid();

    cache.delete("mem://a.obj").unwrap();
    assert!(cache.get("mem://a.obj").is_none());
    assert!(!cache.is_in_cache(uid));
    // Live handles keep their data.
    assert_eq!(handle.data().indices.len(), 3);

    // The bytes are gone from the source too.
    assert!(matches!(
        cache.create("mem://a.obj"),
        Err(AssetError::NotFound(_))
    ));
}

#[test]
fn import_stores_bytes_then_loads_them() {
    let cache = cache_with(&[]);
    let handle = cache.import("mem://new.obj", TRIANGLE_OBJ.as_bytes()).unwrap();
    assert_eq!(handle.data().vertices.len(), 3);
    assert!(cache.get("mem://new.obj").is_some());
}

#[test]
fn invalid_paths_are_rejected() {
    let cache = cache_with(&[]);
    assert!(matches!(
        cache.create("no-scheme.obj"),
        Err(AssetError::InvalidPath(_))
    ));
    assert!(matches!(
        cache.create("mem://../escape.obj"),
        Err(AssetError::InvalidPath(_))
    ));
}
