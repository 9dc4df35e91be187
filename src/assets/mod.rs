//! Path-addressed asset cache
//!
//! Assets are identified by `scheme://path` keys and pinned by reference:
//! a cloneable [`AssetHandle`] keeps its entry immune to eviction. Entries
//! nobody holds line up in least-recently-used order and are evicted once the
//! cache exceeds its capacity. Loading can happen synchronously or on a
//! background thread; [`AssetCache::tick`] runs once per frame to publish
//! async completions and to evict.

mod model;
mod path;
mod source;

pub use model::{ModelAsset, TextureAsset};
pub use path::AssetPath;
pub use source::{AssetSource, FileSource, MemorySource};

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::{BuildHasher, Hasher};
use std::ops::Deref;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use thiserror::Error;

/// Asset cache errors
#[derive(Error, Debug)]
pub enum AssetError {
    /// Distinct from I/O failure: the path is already tracked by the cache.
    #[error("asset already exists: {0}")]
    AlreadyExists(String),
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("invalid asset path: {0}")]
    InvalidPath(String),
    #[error("failed to decode asset: {0}")]
    Decode(String),
    #[error("asset load failed: {0}")]
    LoadFailed(String),
    #[error("asset source is read-only")]
    ReadOnly,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Stable asset identifier, unique within a cache instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uid(u64);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Decoded payload stored in the cache. Decoding runs in the load path,
/// possibly on a background thread.
pub trait AssetData: Sized + Send + Sync + 'static {
    fn decode(path: &AssetPath, bytes: &[u8]) -> Result<Self, AssetError>;
}

struct AssetRecord<A> {
    uid: Uid,
    path: AssetPath,
    data: A,
}

/// Pinning handle to a cached asset. Holding any clone keeps the entry in
/// the cache regardless of its LRU position.
pub struct AssetHandle<A> {
    record: Arc<AssetRecord<A>>,
}

impl<A> AssetHandle<A> {
    pub fn uid(&self) -> Uid {
        self.record.uid
    }

    pub fn path(&self) -> &AssetPath {
        &self.record.path
    }

    pub fn data(&self) -> &A {
        &self.record.data
    }

    /// Two handles to the same cached instance compare equal.
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.record, &other.record)
    }
}

impl<A> Clone for AssetHandle<A> {
    fn clone(&self) -> Self {
        Self {
            record: Arc::clone(&self.record),
        }
    }
}

impl<A> Deref for AssetHandle<A> {
    type Target = A;
    fn deref(&self) -> &A {
        &self.record.data
    }
}

struct FutureShared<A> {
    result: Option<Result<AssetHandle<A>, String>>,
    wakers: Vec<Waker>,
}

impl<A> Default for FutureShared<A> {
    fn default() -> Self {
        Self {
            result: None,
            wakers: Vec::new(),
        }
    }
}

/// Future resolving to an [`AssetHandle`] once a background load finishes.
pub struct AssetFuture<A> {
    shared: Arc<Mutex<FutureShared<A>>>,
}

impl<A> AssetFuture<A> {
    fn pending(shared: Arc<Mutex<FutureShared<A>>>) -> Self {
        Self { shared }
    }

    fn ready(result: Result<AssetHandle<A>, String>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(FutureShared {
                result: Some(result),
                wakers: Vec::new(),
            })),
        }
    }

    /// Block the calling thread until the load finishes.
    pub fn wait(self) -> Result<AssetHandle<A>, AssetError> {
        pollster::block_on(self)
    }

    /// Non-blocking peek; `None` while the load is still running.
    pub fn try_take(&self) -> Option<Result<AssetHandle<A>, AssetError>> {
        self.shared
            .lock()
            .result
            .clone()
            .map(|r| r.map_err(AssetError::LoadFailed))
    }
}

impl<A> Future for AssetFuture<A> {
    type Output = Result<AssetHandle<A>, AssetError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.lock();
        if let Some(result) = state.result.clone() {
            Poll::Ready(result.map_err(AssetError::LoadFailed))
        } else {
            state.wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

enum EntryState<A> {
    /// Background load in flight; the shared slot fulfills every future
    /// handed out for this entry.
    Loading(Arc<Mutex<FutureShared<A>>>),
    Loaded(Arc<AssetRecord<A>>),
    Failed(String),
}

struct Entry<A> {
    uid: Uid,
    state: EntryState<A>,
}

struct Inner<A> {
    entries: HashMap<String, Entry<A>>,
    paths_by_uid: HashMap<Uid, String>,
    /// Least recently used first.
    lru: Vec<Uid>,
    capacity: usize,
}

struct LoadComplete<A> {
    key: String,
    outcome: Result<Arc<AssetRecord<A>>, String>,
}

/// Reference-counted, LRU-evicting cache over one asset type.
///
/// The engine holds one instance per asset type and threads it explicitly
/// through jobs and passes; interior locking keeps the surface `&self`.
pub struct AssetCache<A: AssetData> {
    inner: Mutex<Inner<A>>,
    source: Arc<dyn AssetSource>,
    completed_tx: Sender<LoadComplete<A>>,
    completed_rx: Mutex<Receiver<LoadComplete<A>>>,
    next_uid: AtomicU64,
    uid_seed: u64,
}

impl<A: AssetData> AssetCache<A> {
    pub fn new(source: Arc<dyn AssetSource>, capacity: usize) -> Self {
        let (completed_tx, completed_rx) = channel();
        let mut hasher = RandomState::new().build_hasher();
        hasher.write_u64(0x5ce5_e1f0_cac8_e5ee);
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                paths_by_uid: HashMap::new(),
                lru: Vec::new(),
                capacity,
            }),
            source,
            completed_tx,
            completed_rx: Mutex::new(completed_rx),
            next_uid: AtomicU64::new(1),
            uid_seed: hasher.finish(),
        }
    }

    fn make_uid(&self) -> Uid {
        let counter = self.next_uid.fetch_add(1, Ordering::Relaxed);
        Uid(self.uid_seed ^ counter.wrapping_mul(0x9e37_79b9_7f4a_7c15))
    }

    /// Load an asset synchronously and insert it. Fails with
    /// [`AssetError::AlreadyExists`] when the path is already tracked.
    pub fn create(&self, raw_path: &str) -> Result<AssetHandle<A>, AssetError> {
        let path = AssetPath::parse(raw_path)?;
        let key = path.to_string();

        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&key) {
            return Err(AssetError::AlreadyExists(key));
        }

        let bytes = self.source.load(&path)?;
        let data = A::decode(&path, &bytes)?;
        let uid = self.make_uid();
        let record = Arc::new(AssetRecord { uid, path, data });
        let handle = AssetHandle {
            record: Arc::clone(&record),
        };

        inner.entries.insert(
            key.clone(),
            Entry {
                uid,
                state: EntryState::Loaded(record),
            },
        );
        inner.paths_by_uid.insert(uid, key);
        inner.lru.push(uid);
        Ok(handle)
    }

    /// Write `bytes` to the backing source, then load them as a new asset.
    pub fn import(&self, raw_path: &str, bytes: &[u8]) -> Result<AssetHandle<A>, AssetError> {
        let path = AssetPath::parse(raw_path)?;
        {
            let inner = self.inner.lock();
            if inner.entries.contains_key(&path.to_string()) {
                return Err(AssetError::AlreadyExists(path.to_string()));
            }
        }
        self.source.store(&path, bytes)?;
        self.create(raw_path)
    }

    /// Schedule a background load. Fails with [`AssetError::AlreadyExists`]
    /// when the path is already tracked.
    pub fn create_async(&self, raw_path: &str) -> Result<AssetFuture<A>, AssetError> {
        let path = AssetPath::parse(raw_path)?;
        let key = path.to_string();

        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&key) {
            return Err(AssetError::AlreadyExists(key));
        }
        Ok(self.spawn_load(&mut inner, path))
    }

    /// Get the asset if cached, otherwise schedule a background load.
    /// The returned future is already resolved for loaded entries.
    pub fn get_async(&self, raw_path: &str) -> Result<AssetFuture<A>, AssetError> {
        let path = AssetPath::parse(raw_path)?;
        let key = path.to_string();

        let mut inner = self.inner.lock();
        let existing = inner.entries.get(&key).map(|entry| match &entry.state {
            EntryState::Loaded(record) => (
                AssetFuture::ready(Ok(AssetHandle {
                    record: Arc::clone(record),
                })),
                Some(entry.uid),
            ),
            EntryState::Loading(shared) => (AssetFuture::pending(Arc::clone(shared)), None),
            EntryState::Failed(msg) => (AssetFuture::ready(Err(msg.clone())), None),
        });
        if let Some((future, touched)) = existing {
            if let Some(uid) = touched {
                touch(&mut inner, uid);
            }
            return Ok(future);
        }
        Ok(self.spawn_load(&mut inner, path))
    }

    fn spawn_load(&self, inner: &mut Inner<A>, path: AssetPath) -> AssetFuture<A> {
        let key = path.to_string();
        let uid = self.make_uid();
        let shared: Arc<Mutex<FutureShared<A>>> = Arc::new(Mutex::new(FutureShared::default()));

        inner.entries.insert(
            key.clone(),
            Entry {
                uid,
                state: EntryState::Loading(Arc::clone(&shared)),
            },
        );
        inner.paths_by_uid.insert(uid, key.clone());
        inner.lru.push(uid);

        let source = Arc::clone(&self.source);
        let tx = self.completed_tx.clone();
        let worker_shared = Arc::clone(&shared);
        std::thread::spawn(move || {
            let outcome: Result<Arc<AssetRecord<A>>, String> = source
                .load(&path)
                .and_then(|bytes| A::decode(&path, &bytes))
                .map(|data| Arc::new(AssetRecord { uid, path, data }))
                .map_err(|err| err.to_string());

            // Fulfill futures first so blocked callers proceed without
            // waiting for the next frame's tick.
            {
                let mut state = worker_shared.lock();
                state.result = Some(outcome.clone().map(|record| AssetHandle { record }));
                for waker in state.wakers.drain(..) {
                    waker.wake();
                }
            }
            let _ = tx.send(LoadComplete { key, outcome });
        });

        AssetFuture::pending(shared)
    }

    /// Cached, loaded asset for `raw_path`. Refreshes the LRU position.
    pub fn get(&self, raw_path: &str) -> Option<AssetHandle<A>> {
        let key = AssetPath::parse(raw_path).ok()?.to_string();
        self.get_key(&key)
    }

    /// Cached, loaded asset by UID. Refreshes the LRU position.
    pub fn get_uid(&self, uid: Uid) -> Option<AssetHandle<A>> {
        let key = self.inner.lock().paths_by_uid.get(&uid).cloned()?;
        self.get_key(&key)
    }

    fn get_key(&self, key: &str) -> Option<AssetHandle<A>> {
        let mut inner = self.inner.lock();
        let found = inner.entries.get(key).and_then(|entry| match &entry.state {
            EntryState::Loaded(record) => Some((Arc::clone(record), entry.uid)),
            _ => None,
        });
        let (record, uid) = found?;
        touch(&mut inner, uid);
        Some(AssetHandle { record })
    }

    /// Remove the backing storage and the cache entry unconditionally.
    /// Live handles keep their data; the cache forgets the path either way.
    pub fn delete(&self, raw_path: &str) -> Result<(), AssetError> {
        let path = AssetPath::parse(raw_path)?;
        let key = path.to_string();
        {
            let mut inner = self.inner.lock();
            if let Some(entry) = inner.entries.remove(&key) {
                inner.paths_by_uid.remove(&entry.uid);
                inner.lru.retain(|&u| u != entry.uid);
            }
        }
        self.source.remove(&path)
    }

    /// Set the LRU capacity. Shrinking evicts unreferenced entries at once.
    pub fn resize(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        inner.capacity = capacity;
        evict_excess(&mut inner);
    }

    /// Per-frame maintenance: publish async load completions, then evict
    /// unreferenced entries beyond capacity.
    pub fn tick(&self) {
        let rx = self.completed_rx.lock();
        let mut inner = self.inner.lock();
        while let Ok(done) = rx.try_recv() {
            match inner.entries.get_mut(&done.key) {
                Some(entry) if matches!(entry.state, EntryState::Loading(_)) => {
                    entry.state = match done.outcome {
                        Ok(record) => EntryState::Loaded(record),
                        Err(msg) => {
                            log::warn!("asset load failed for {}: {msg}", done.key);
                            EntryState::Failed(msg)
                        }
                    };
                }
                // Deleted while loading; drop the result.
                _ => {}
            }
        }
        evict_excess(&mut inner);
    }

    pub fn is_in_cache(&self, uid: Uid) -> bool {
        self.inner.lock().paths_by_uid.contains_key(&uid)
    }

    /// True when any handle outside the cache references the asset.
    pub fn is_in_use(&self, uid: Uid) -> bool {
        let inner = self.inner.lock();
        let Some(key) = inner.paths_by_uid.get(&uid) else {
            return false;
        };
        match inner.entries.get(key).map(|e| &e.state) {
            Some(EntryState::Loaded(record)) => Arc::strong_count(record) > 1,
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }
}

fn touch<A>(inner: &mut Inner<A>, uid: Uid) {
    inner.lru.retain(|&u| u != uid);
    inner.lru.push(uid);
}

fn evict_excess<A>(inner: &mut Inner<A>) {
    if inner.entries.len() <= inner.capacity {
        return;
    }
    for uid in inner.lru.clone() {
        if inner.entries.len() <= inner.capacity {
            break;
        }
        let Some(key) = inner.paths_by_uid.get(&uid).cloned() else {
            continue;
        };
        let evictable = match inner.entries.get(&key).map(|e| &e.state) {
            // Pinned entries are immune regardless of LRU position.
            Some(EntryState::Loaded(record)) => Arc::strong_count(record) == 1,
            Some(EntryState::Failed(_)) => true,
            _ => false,
        };
        if evictable {
            inner.entries.remove(&key);
            inner.paths_by_uid.remove(&uid);
            inner.lru.retain(|&u| u != uid);
            log::debug!("evicted asset {key}");
        }
    }
}
