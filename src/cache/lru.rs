//! Arena-backed LRU map.
//!
//! Nodes live in a `Vec` and link to each other by index, forming a
//! doubly-linked recency list; a hash index maps keys to slots. Freed slots
//! are recycled, so the arena never grows beyond `capacity`.

use std::hash::Hash;

use ahash::AHashMap;

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
pub struct LruMap<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    index: AHashMap<K, usize>,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used.
    tail: Option<usize>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V> LruMap<K, V> {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            index: AHashMap::with_capacity(capacity),
            head: None,
            tail: None,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Returns the value and marks it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.touch(slot);
        self.node(slot).map(|n| &n.value)
    }

    /// Returns the value without changing recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.node(slot).map(|n| &n.value)
    }

    /// Inserts or replaces `key`, making it most recently used.
    ///
    /// Returns the evicted least-recently-used entry when the map was full.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&slot) = self.index.get(&key) {
            if let Some(node) = self.slots[slot].as_mut() {
                node.value = value;
            }
            self.touch(slot);
            return None;
        }

        let evicted = if self.index.len() >= self.capacity {
            self.pop_lru()
        } else {
            None
        };

        let node = Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.push_front(slot);

        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.index.remove(key)?;
        self.release(slot).map(|node| node.value)
    }

    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        let slot = self.tail?;
        let node = self.release(slot)?;
        self.index.remove(&node.key);
        Some((node.key, node.value))
    }

    /// Keeps only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) -> usize {
        let doomed: Vec<K> = self
            .iter()
            .filter(|(k, v)| !keep(k, v))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    /// Iterates from most to least recently used.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let node = self.node(cursor?)?;
            cursor = node.next;
            Some((&node.key, &node.value))
        })
    }

    pub fn lru_key(&self) -> Option<&K> {
        self.tail.and_then(|slot| self.node(slot)).map(|n| &n.key)
    }

    fn node(&self, slot: usize) -> Option<&Node<K, V>> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn touch(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    fn release(&mut self, slot: usize) -> Option<Node<K, V>> {
        self.unlink(slot);
        let node = self.slots.get_mut(slot)?.take()?;
        self.free.push(slot);
        Some(node)
    }

    fn unlink(&mut self, slot: usize) {
        let Some((prev, next)) = self.node(slot).map(|n| (n.prev, n.next)) else {
            return;
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.slots[p].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.slots[n].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(node) = self.slots[slot].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(node) = self.slots[slot].as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head
            && let Some(node) = self.slots[h].as_mut()
        {
            node.prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }
}
