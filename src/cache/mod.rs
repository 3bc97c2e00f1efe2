use bytes::Bytes;
use http::HeaderMap;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// A cached response: buffered body, response headers, and the absolute
/// instant after which the entry is dead. Expiry is computed by the caller
/// so the cache itself stays free of TTL arithmetic.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub body: Bytes,
    pub headers: HeaderMap,
    pub expires_at: Instant,
}

const NIL: usize = usize::MAX;

struct Node {
    key: String,
    entry: CacheEntry,
    prev: usize,
    next: usize,
}

struct Inner {
    // Doubly linked list over slot indices; `free` recycles vacated slots so
    // the vec never grows past capacity.
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    index: HashMap<String, usize>,
}

/// Bounded LRU response cache with per-entry TTL.
///
/// `get` and `set` are O(1): a HashMap finds the slot, an index-linked
/// doubly linked list maintains recency order. An entry whose expiry has
/// passed is indistinguishable from an absent one and is removed on read.
pub struct ResponseCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                nodes: Vec::with_capacity(capacity),
                free: Vec::new(),
                head: NIL,
                tail: NIL,
                index: HashMap::with_capacity(capacity),
            }),
        }
    }

    /// Build the cache key: `METHOD:PATH`, with `?RAWQUERY` appended only
    /// when the query is non-empty.
    pub fn key(method: &str, path: &str, raw_query: &str) -> String {
        let mut key = String::with_capacity(method.len() + 1 + path.len() + raw_query.len() + 1);
        key.push_str(method);
        key.push(':');
        key.push_str(path);
        if !raw_query.is_empty() {
            key.push('?');
            key.push_str(raw_query);
        }
        key
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut inner = self.inner.lock().unwrap();
        let slot = *inner.index.get(key)?;

        let expired = inner.nodes[slot]
            .as_ref()
            .map(|n| Instant::now() > n.entry.expires_at)
            .unwrap_or(true);
        if expired {
            remove_slot(&mut inner, slot);
            return None;
        }

        promote(&mut inner, slot);
        inner.nodes[slot].as_ref().map(|n| n.entry.clone())
    }

    pub fn set(&self, key: &str, entry: CacheEntry) {
        let mut inner = self.inner.lock().unwrap();

        if let Some(&slot) = inner.index.get(key) {
            if let Some(node) = inner.nodes[slot].as_mut() {
                node.entry = entry;
            }
            promote(&mut inner, slot);
            return;
        }

        if inner.index.len() >= self.capacity {
            let tail = inner.tail;
            if tail != NIL {
                remove_slot(&mut inner, tail);
            }
        }

        let node = Node {
            key: key.to_string(),
            entry,
            prev: NIL,
            next: inner.head,
        };
        let slot = match inner.free.pop() {
            Some(s) => {
                inner.nodes[s] = Some(node);
                s
            }
            None => {
                inner.nodes.push(Some(node));
                inner.nodes.len() - 1
            }
        };

        if inner.head != NIL {
            let head = inner.head;
            if let Some(h) = inner.nodes[head].as_mut() {
                h.prev = slot;
            }
        }
        inner.head = slot;
        if inner.tail == NIL {
            inner.tail = slot;
        }
        inner.index.insert(key.to_string(), slot);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unlink `slot` from the recency list and drop its entry.
fn remove_slot(inner: &mut Inner, slot: usize) {
    let (prev, next, key) = match inner.nodes[slot].as_ref() {
        Some(n) => (n.prev, n.next, n.key.clone()),
        None => return,
    };

    if prev != NIL {
        if let Some(p) = inner.nodes[prev].as_mut() {
            p.next = next;
        }
    } else {
        inner.head = next;
    }
    if next != NIL {
        if let Some(n) = inner.nodes[next].as_mut() {
            n.prev = prev;
        }
    } else {
        inner.tail = prev;
    }

    inner.index.remove(&key);
    inner.nodes[slot] = None;
    inner.free.push(slot);
}

/// Move `slot` to the head (most recently used) position.
fn promote(inner: &mut Inner, slot: usize) {
    if inner.head == slot {
        return;
    }
    let (prev, next) = match inner.nodes[slot].as_ref() {
        Some(n) => (n.prev, n.next),
        None => return,
    };

    if prev != NIL {
        if let Some(p) = inner.nodes[prev].as_mut() {
            p.next = next;
        }
    }
    if next != NIL {
        if let Some(n) = inner.nodes[next].as_mut() {
            n.prev = prev;
        }
    } else {
        inner.tail = prev;
    }

    let head = inner.head;
    if let Some(n) = inner.nodes[slot].as_mut() {
        n.prev = NIL;
        n.next = head;
    }
    if head != NIL {
        if let Some(h) = inner.nodes[head].as_mut() {
            h.prev = slot;
        }
    }
    inner.head = slot;
}
