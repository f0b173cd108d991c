//! LRU cache for query and content embeddings.
//!
//! Keyed by a content hash of the embedded text, capped by entry count,
//! with zero-copy sharing via `Arc<[f32]>`. A hit moves the entry to the
//! front; inserting into a full cache evicts the least recently used
//! entry. The lock is never held across an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Cache observability counters
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub max_entries: usize,
    /// Hit rate as percentage (0.0 - 100.0)
    pub hit_rate: f64,
}

struct Node {
    vector: Arc<[f32]>,
    /// More recently used neighbor
    prev: Option<String>,
    /// Less recently used neighbor
    next: Option<String>,
}

struct LruState {
    entries: HashMap<String, Node>,
    head: Option<String>,
    tail: Option<String>,
}

impl LruState {
    fn detach(&mut self, key: &str) {
        let (prev, next) = match self.entries.get(key) {
            Some(node) => (node.prev.clone(), node.next.clone()),
            None => return,
        };

        match prev {
            Some(ref prev_key) => {
                if let Some(prev_node) = self.entries.get_mut(prev_key) {
                    prev_node.next = next.clone();
                }
            }
            None => self.head = next.clone(),
        }
        match next {
            Some(ref next_key) => {
                if let Some(next_node) = self.entries.get_mut(next_key) {
                    next_node.prev = prev.clone();
                }
            }
            None => self.tail = prev.clone(),
        }

        if let Some(node) = self.entries.get_mut(key) {
            node.prev = None;
            node.next = None;
        }
    }

    fn attach_front(&mut self, key: &str) {
        let old_head = self.head.replace(key.to_string());
        if let Some(ref old_head_key) = old_head {
            if let Some(old_head_node) = self.entries.get_mut(old_head_key) {
                old_head_node.prev = Some(key.to_string());
            }
        }
        if let Some(node) = self.entries.get_mut(key) {
            node.prev = None;
            node.next = old_head;
        }
        if self.tail.is_none() {
            self.tail = self.head.clone();
        }
    }

    fn evict_tail(&mut self) {
        if let Some(tail_key) = self.tail.clone() {
            self.detach(&tail_key);
            self.entries.remove(&tail_key);
        }
    }
}

/// Thread-safe LRU embedding cache with entry-count capacity
pub struct EmbeddingCache {
    state: Mutex<LruState>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    /// Create a cache holding at most `max_entries` vectors
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(LruState {
                entries: HashMap::new(),
                head: None,
                tail: None,
            }),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a vector, promoting the entry to most recently used.
    /// Returns an `Arc` clone, never a vector copy.
    pub fn get(&self, key: &str) -> Option<Arc<[f32]>> {
        let mut state = self.state.lock().unwrap();

        if state.entries.contains_key(key) {
            state.detach(key);
            state.attach_front(key);
            self.hits.fetch_add(1, Ordering::Relaxed);
            state.entries.get(key).map(|node| node.vector.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Insert or refresh a vector at the most-recently-used position,
    /// evicting the least recently used entry if the cache is full.
    pub fn put(&self, key: String, vector: Arc<[f32]>) {
        let mut state = self.state.lock().unwrap();

        if state.entries.contains_key(&key) {
            state.detach(&key);
            if let Some(node) = state.entries.get_mut(&key) {
                node.vector = vector;
            }
            state.attach_front(&key);
            return;
        }

        while state.entries.len() >= self.max_entries {
            state.evict_tail();
        }

        state.entries.insert(
            key.clone(),
            Node {
                vector,
                prev: None,
                next: None,
            },
        );
        state.attach_front(&key);
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock().unwrap();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            entries: state.entries.len(),
            max_entries: self.max_entries,
            hit_rate: if total > 0 {
                (hits as f64 / total as f64) * 100.0
            } else {
                0.0
            },
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.entries.clear();
        state.head = None;
        state.tail = None;
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
