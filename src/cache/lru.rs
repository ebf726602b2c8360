// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Recency list backing the cache.
//!
//! Hash map from key to slot index plus a doubly linked list threaded through
//! a slab of slots. Head is the most recently used entry, tail the least.
//! Freed slots are recycled so indices stay dense.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::entity::Entity;

#[derive(Debug)]
pub(super) struct Slot {
    pub key: String,
    pub value: Entity,
    pub inserted_at: Instant,
    pub ttl: Duration,
    prev: Option<usize>,
    next: Option<usize>,
}

impl Slot {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > self.ttl
    }
}

#[derive(Debug, Default)]
pub(super) struct LruList {
    index: HashMap<String, usize>,
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl LruList {
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn slot(&self, key: &str) -> Option<&Slot> {
        self.index.get(key).and_then(|&i| self.slots[i].as_ref())
    }

    /// Mark `key` as most recently used.
    pub fn touch(&mut self, key: &str) {
        if let Some(&i) = self.index.get(key) {
            self.unlink(i);
            self.push_front(i);
        }
    }

    /// Insert or replace. Replacing refreshes `inserted_at` and recency.
    pub fn upsert(&mut self, key: String, value: Entity, ttl: Duration, now: Instant) {
        if let Some(&i) = self.index.get(&key) {
            if let Some(slot) = self.slots[i].as_mut() {
                slot.value = value;
                slot.ttl = ttl;
                slot.inserted_at = now;
            }
            self.unlink(i);
            self.push_front(i);
            return;
        }

        let slot = Slot {
            key: key.clone(),
            value,
            inserted_at: now,
            ttl,
            prev: None,
            next: None,
        };
        let i = match self.free.pop() {
            Some(i) => {
                self.slots[i] = Some(slot);
                i
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, i);
        self.push_front(i);
    }

    pub fn remove(&mut self, key: &str) -> Option<Slot> {
        let i = self.index.remove(key)?;
        self.unlink(i);
        self.free.push(i);
        self.slots[i].take()
    }

    /// Remove and return the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<Slot> {
        let i = self.tail?;
        let key = self.slots[i].as_ref()?.key.clone();
        self.remove(&key)
    }

    /// Keys matching `pred`, in no particular order.
    pub fn keys_where(&self, mut pred: impl FnMut(&Slot) -> bool) -> Vec<String> {
        self.slots
            .iter()
            .flatten()
            .filter(|slot| pred(slot))
            .map(|slot| slot.key.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    fn unlink(&mut self, i: usize) {
        let (prev, next) = match self.slots[i].as_ref() {
            Some(slot) => (slot.prev, slot.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(s) = self.slots[p].as_mut() {
                    s.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(s) = self.slots[n].as_mut() {
                    s.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(slot) = self.slots[i].as_mut() {
            slot.prev = None;
            slot.next = None;
        }
    }

    fn push_front(&mut self, i: usize) {
        let old_head = self.head;
        if let Some(slot) = self.slots[i].as_mut() {
            slot.prev = None;
            slot.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(s) = self.slots[h].as_mut() {
                s.prev = Some(i);
            }
        }
        self.head = Some(i);
        if self.tail.is_none() {
            self.tail = Some(i);
        }
    }

    /// Keys from most to least recently used.
    #[cfg(test)]
    pub fn order(&self) -> Vec<String> {
        let mut keys = Vec::new();
        let mut cursor = self.head;
        while let Some(i) = cursor {
            let slot = self.slots[i].as_ref().expect("linked slot is occupied");
            keys.push(slot.key.clone());
            cursor = slot.next;
        }
        keys
    }
}
