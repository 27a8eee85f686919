//! An adaptive hash table: two bucket arrays plus a migration cursor.
//! Growing swaps the arrays and rehashes incrementally, moving at most
//! `REHASH_WORK` slots per mutation, so no single operation pays for a
//! full rehash.

/// Keys bring their own 64-bit hash.
pub trait AdaptiveKey: Eq {
    fn hash64(&self) -> u64;
}

const MIN_BUCKETS: usize = 16;
const MAX_LOAD_FACTOR: usize = 4;
const REHASH_WORK: usize = 28;

pub struct AdaptiveMap<K, V> {
    current: Vec<Vec<(K, V)>>,
    prev: Vec<Vec<(K, V)>>,
    migrate_pos: usize,
    prev_len: usize,
    len: usize,
}

impl<K: AdaptiveKey, V> AdaptiveMap<K, V> {
    pub fn new() -> Self {
        Self {
            current: (0..MIN_BUCKETS).map(|_| Vec::new()).collect(),
            prev: Vec::new(),
            migrate_pos: 0,
            prev_len: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket_of(&self, key: &K) -> usize {
        (key.hash64() % self.current.len() as u64) as usize
    }

    /// Move up to `REHASH_WORK` entries from the old table.
    fn help_rehash(&mut self) {
        let mut work = 0;
        while work < REHASH_WORK && self.prev_len > 0 {
            if self.migrate_pos >= self.prev.len() {
                break;
            }
            if self.prev[self.migrate_pos].is_empty() {
                self.migrate_pos += 1;
                continue;
            }
            let (k, v) = self.prev[self.migrate_pos].pop().unwrap();
            self.prev_len -= 1;
            let b = self.bucket_of(&k);
            self.current[b].push((k, v));
            work += 1;
        }
    }

    /// Drain the old table completely (one-step growth fallback).
    fn finish_rehash(&mut self) {
        while self.prev_len > 0 {
            if self.prev[self.migrate_pos].is_empty() {
                self.migrate_pos += 1;
                continue;
            }
            let (k, v) = self.prev[self.migrate_pos].pop().unwrap();
            self.prev_len -= 1;
            let b = self.bucket_of(&k);
            self.current[b].push((k, v));
        }
    }

    fn maybe_grow(&mut self) {
        if self.len / self.current.len() < MAX_LOAD_FACTOR {
            return;
        }
        if self.prev_len > 0 {
            // A growth is already in flight; drain it before starting
            // another.
            self.finish_rehash();
        }
        let new_cap = self.current.len() * 2;
        let fresh: Vec<Vec<(K, V)>> = (0..new_cap).map(|_| Vec::new()).collect();
        self.prev = std::mem::replace(&mut self.current, fresh);
        self.prev_len = self.len;
        self.migrate_pos = 0;
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.maybe_grow();
        self.help_rehash();

        let b = self.bucket_of(&key);
        self.current[b].push((key, value));
        self.len += 1;
    }

    fn find_prev(&self, key: &K) -> Option<(usize, usize)> {
        if self.prev_len == 0 {
            return None;
        }
        let b = (key.hash64() % self.prev.len() as u64) as usize;
        self.prev[b]
            .iter()
            .position(|(k, _)| k == key)
            .map(|i| (b, i))
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let b = self.bucket_of(key);
        if let Some((_, v)) = self.current[b].iter().find(|(k, _)| k == key) {
            return Some(v);
        }
        self.find_prev(key)
            .map(move |(b, i)| &self.prev[b][i].1)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.help_rehash();

        let b = self.bucket_of(key);
        if self.current[b].iter().any(|(k, _)| k == key) {
            let i = self.current[b].iter().position(|(k, _)| k == key).unwrap();
            return Some(&mut self.current[b][i].1);
        }
        if let Some((b, i)) = self.find_prev(key) {
            return Some(&mut self.prev[b][i].1);
        }
        None
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.help_rehash();

        let b = self.bucket_of(key);
        if let Some(i) = self.current[b].iter().position(|(k, _)| k == key) {
            self.len -= 1;
            return Some(self.current[b].swap_remove(i).1);
        }
        if let Some((b, i)) = self.find_prev(key) {
            self.len -= 1;
            self.prev_len -= 1;
            return Some(self.prev[b].swap_remove(i).1);
        }
        None
    }
}
