//! Keyed store with TTL, a max entry count with FIFO eviction, and optional
//! JSON snapshot persistence. Used for both tile and whole-request results.

use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// Source of "now" in milliseconds since the epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self(AtomicU64::new(start_ms))
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub ttl: Duration,
    pub max_entries: usize,
    pub persist_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry<V> {
    value: V,
    expires: u64,
}

struct Store<V> {
    entries: HashMap<String, Entry<V>>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
    /// Bumped for every snapshot taken.
    seq: u64,
}

impl<V> Store<V> {
    fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            hits: 0,
            misses: 0,
            seq: 0,
        }
    }

    /// Drop everything with `expires <= now`. Returns how many went.
    fn purge(&mut self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires > now);
        let removed = before - self.entries.len();
        if removed > 0 {
            let entries = &self.entries;
            self.order.retain(|key| entries.contains_key(key));
        }
        removed
    }

    fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(entry)
    }

    fn evict_oldest(&mut self) -> Option<String> {
        let oldest = self.order.pop_front()?;
        self.entries.remove(&oldest);
        Some(oldest)
    }
}

pub struct Cache<V> {
    options: CacheOptions,
    clock: Arc<dyn Clock>,
    store: Mutex<Store<V>>,
    /// Sequence number of the last snapshot handed to the disk.
    written: AsyncMutex<u64>,
}

/// Serialized table taken under the store lock, written after it is released.
struct Snapshot {
    seq: u64,
    json: String,
}

impl<V> Cache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    pub async fn open(options: CacheOptions) -> Self {
        Self::open_with_clock(options, Arc::new(SystemClock)).await
    }

    /// Build a cache reading time from `clock`, loading any non-expired
    /// entries from the snapshot file.
    pub async fn open_with_clock(options: CacheOptions, clock: Arc<dyn Clock>) -> Self {
        let mut store = Store::empty();
        if let Some(path) = &options.persist_file {
            load_snapshot(path, clock.now_ms(), &mut store).await;
        }
        let capacity = options.max_entries.max(1);
        while store.order.len() > capacity {
            store.evict_oldest();
        }
        Self {
            options,
            clock,
            store: Mutex::new(store),
            written: AsyncMutex::new(0),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_ms();
        let (value, snapshot) = {
            let mut store = self.store.lock();
            let expired = store.purge(now);
            let snapshot = if expired > 0 {
                debug!("cache: {} expired entries dropped", expired);
                self.snapshot(&mut store)
            } else {
                None
            };
            let value = store.entries.get(key).map(|entry| entry.value.clone());
            if value.is_some() {
                store.hits += 1;
            } else {
                store.misses += 1;
            }
            (value, snapshot)
        };
        self.persist(snapshot).await;
        value
    }

    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        let mut store = self.store.lock();
        store.purge(now);
        store.entries.contains_key(key)
    }

    /// Insert with `expires = now + ttl`. Re-setting a key replaces it and
    /// moves it to the newest position.
    pub async fn set(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let now = self.clock.now_ms();
        let snapshot = {
            let mut store = self.store.lock();
            store.purge(now);

            if store.remove(&key).is_none() {
                while store.entries.len() >= self.options.max_entries.max(1) {
                    match store.evict_oldest() {
                        Some(evicted) => debug!("cache: evicted {}", evicted),
                        None => break,
                    }
                }
            }

            let expires = now.saturating_add(self.options.ttl.as_millis() as u64);
            store.order.push_back(key.clone());
            store.entries.insert(key, Entry { value, expires });
            self.snapshot(&mut store)
        };
        self.persist(snapshot).await;
    }

    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn clear(&self) {
        let snapshot = {
            let mut store = self.store.lock();
            store.entries.clear();
            store.order.clear();
            self.snapshot(&mut store)
        };
        self.persist(snapshot).await;
    }

    pub fn stats(&self) -> CacheStats {
        let store = self.store.lock();
        CacheStats {
            entries: store.entries.len(),
            max_entries: self.options.max_entries,
            hits: store.hits,
            misses: store.misses,
        }
    }

    /// Serialize the table in insertion order. `None` when persistence is
    /// off or serialization fails.
    fn snapshot(&self, store: &mut Store<V>) -> Option<Snapshot> {
        self.options.persist_file.as_ref()?;
        let entries: Vec<(&String, &Entry<V>)> = store
            .order
            .iter()
            .filter_map(|key| store.entries.get(key).map(|entry| (key, entry)))
            .collect();
        let json = match serde_json::to_string(&entries) {
            Ok(json) => json,
            Err(e) => {
                warn!("cache: failed to serialize snapshot: {}", e);
                return None;
            }
        };
        store.seq += 1;
        Some(Snapshot {
            seq: store.seq,
            json,
        })
    }

    /// Write a snapshot unless a newer one already reached the disk.
    /// Failures are logged and swallowed.
    async fn persist(&self, snapshot: Option<Snapshot>) {
        let (Some(snapshot), Some(path)) = (snapshot, &self.options.persist_file) else {
            return;
        };
        let mut written = self.written.lock().await;
        if snapshot.seq <= *written {
            debug!("cache: snapshot {} superseded", snapshot.seq);
            return;
        }
        if let Err(e) = fs::write(path, snapshot.json).await {
            warn!("cache: failed to persist {}: {}", path.display(), e);
        }
        *written = snapshot.seq;
    }
}

async fn load_snapshot<V: DeserializeOwned>(path: &Path, now: u64, store: &mut Store<V>) {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return,
        Err(e) => {
            warn!("cache: failed to read {}: {}", path.display(), e);
            return;
        }
    };
    let entries: Vec<(String, Entry<V>)> = match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("cache: failed to load {}: {}", path.display(), e);
            return;
        }
    };
    for (key, entry) in entries {
        if entry.expires <= now {
            continue;
        }
        if store.entries.insert(key.clone(), entry).is_some() {
            store.order.retain(|k| k != &key);
        }
        store.order.push_back(key);
    }
    debug!(
        "cache: loaded {} entries from {}",
        store.entries.len(),
        path.display()
    );
}
