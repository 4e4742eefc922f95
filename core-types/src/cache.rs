use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Explicit get/put-with-ttl cache. One long-lived instance is owned by the
/// service layer and injected into collaborators that reuse third-party auth
/// tokens; nothing reads it as ambient process state.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    inner: Mutex<HashMap<K, Entry<V>>>,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the live value, dropping it if the TTL has lapsed.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock();
        match guard.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                guard.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let mut guard = self.inner.lock();
        guard.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.inner.lock().retain(|_, entry| entry.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
