// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    collections::VecDeque,
    hash::Hash,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use log::trace;

/// Most recently used entries passed over by one eviction before the oldest candidate is taken regardless.
const SECOND_CHANCES: usize = 8;

struct Slot<V> {
    value: V,
    /// Admission stamp; tells a live queue position from one left behind by a removed entry.
    admitted: u64,
    referenced: bool,
}

/// Fixed-capacity concurrent map that evicts a cold entry to make room for a new key.
///
/// Eviction approximates least-recently-used order with a second-chance sweep: keys are queued in admission order,
/// and an entry used since the sweep last passed it is requeued instead of dropped, at most `SECOND_CHANCES` times
/// per eviction.  Lookups and updates of existing keys only take the owning shard's lock.  Admitting a new key is
/// serialized so that the capacity bound is never exceeded, even transiently, and costs amortized constant time.
pub struct LruTable<K, V> {
    name: &'static str,
    entries: DashMap<K, Slot<V>>,
    capacity: usize,
    clock: AtomicU64,
    evictions: AtomicU64,
    /// Admission order, oldest first.  Positions of removed entries are skipped when reached.
    queue: Mutex<VecDeque<(K, u64)>>,
}

impl<K, V> LruTable<K, V>
where
    K: Eq + Hash + Copy,
{
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        LruTable {
            name,
            entries: DashMap::with_capacity(capacity),
            capacity,
            clock: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Replaces the value of a present key, handing `value` back if the key is absent.
    fn overwrite(&self, key: &K, value: V) -> Result<(), V> {
        match self.entries.get_mut(key) {
            Some(mut slot) => {
                slot.value = value;
                slot.referenced = true;
                Ok(())
            }
            None => Err(value),
        }
    }

    /// Inserts or overwrites `key`, returning the key that was evicted to make room, if any.
    pub fn insert(&self, key: K, value: V) -> Option<K> {
        let Err(value) = self.overwrite(&key, value) else {
            return None;
        };

        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        // Admitted by another thread since the first check.
        let Err(value) = self.overwrite(&key, value) else {
            return None;
        };
        let mut evicted = None;
        while self.entries.len() >= self.capacity {
            let Some(victim) = self.evict_one(&mut queue) else {
                break;
            };
            evicted = Some(victim);
        }

        let admitted = self.tick();
        self.entries.insert(
            key,
            Slot {
                value,
                admitted,
                referenced: false,
            },
        );
        queue.push_back((key, admitted));
        if queue.len() > self.capacity * 2 {
            // At least `capacity` removals happened since the queue last held only live entries.
            queue.retain(|(key, admitted)| {
                self.entries
                    .get(key)
                    .is_some_and(|slot| slot.admitted == *admitted)
            });
        }
        evicted
    }

    fn evict_one(&self, queue: &mut VecDeque<(K, u64)>) -> Option<K> {
        let mut passed_over = 0;
        while let Some((key, admitted)) = queue.pop_front() {
            let Some(referenced) = self.entries.get_mut(&key).and_then(|mut slot| {
                (slot.admitted == admitted).then(|| std::mem::replace(&mut slot.referenced, false))
            }) else {
                continue;
            };
            if referenced && passed_over < SECOND_CHANCES {
                passed_over += 1;
                queue.push_back((key, admitted));
                continue;
            }
            if self
                .entries
                .remove_if(&key, |_, slot| slot.admitted == admitted)
                .is_some()
            {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                trace!("{}: evicted cold entry", self.name);
                return Some(key);
            }
        }
        None
    }

    /// Looks up `key` and marks it as recently used.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.entries.get_mut(key).map(|mut slot| {
            slot.referenced = true;
            slot.value.clone()
        })
    }

    /// Looks up `key` without affecting its eviction order; intended for readers outside the probe.
    pub fn peek(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.entries.get(key).map(|slot| slot.value.clone())
    }

    /// Membership test that counts as a use of the entry.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.get_mut(key).is_some_and(|mut slot| {
            slot.referenced = true;
            true
        })
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, slot)| slot.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of entries dropped to make room for new keys.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}
