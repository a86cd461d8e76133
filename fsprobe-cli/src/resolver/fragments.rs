// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::atomic::{AtomicU64, Ordering};

use fsprobe_common::{PathFragment, PathKey};
use log::trace;

use super::{PathResolution, Resolution, Step, WalkEnd, walk};
use crate::{
    accessor::{DentryAccessor, DentryHandle},
    cache::PathRef,
    scratch::PathBuffer,
    table::LruTable,
};

/// Stores each directory entry once, as a `(parent key, name)` fragment keyed by its own location.
///
/// Paths are shared between records: a walk stops as soon as it reaches a key that is already present, since the rest
/// of the chain is in the table already.  A consumer follows `parent` links from the leaf key until it meets a root
/// or a detached fragment.
pub struct FragmentStoreResolver {
    table: LruTable<PathKey, PathFragment>,
    inserted: AtomicU64,
    deduplicated: AtomicU64,
}

impl FragmentStoreResolver {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        FragmentStoreResolver {
            table: LruTable::new("path fragments", capacity),
            inserted: AtomicU64::new(0),
            deduplicated: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn table(&self) -> &LruTable<PathKey, PathFragment> {
        &self.table
    }

    /// Fragments written so far.
    #[must_use]
    pub fn inserted(&self) -> u64 {
        self.inserted.load(Ordering::Relaxed)
    }

    /// Walks that ended early because the rest of the chain was already stored.
    #[must_use]
    pub fn deduplicated(&self) -> u64 {
        self.deduplicated.load(Ordering::Relaxed)
    }

    /// Drops the fragment stored for `leaf`, so that the next resolution of that key records the entry's current
    /// name and parent instead of stopping at what was stored before.
    pub fn refresh(&self, leaf: PathKey) {
        if self.table.remove(&leaf).is_some() {
            trace!("fragment {leaf} dropped for refresh");
        }
    }

    fn store(&self, key: PathKey, fragment: PathFragment) {
        if let Some(evicted) = self.table.insert(key, fragment) {
            trace!("fragment {evicted} evicted to make room for {key}");
        }
        self.inserted.fetch_add(1, Ordering::Relaxed);
    }
}

impl PathResolution for FragmentStoreResolver {
    fn resolve(
        &self,
        accessor: &dyn DentryAccessor,
        _paths: &mut PathBuffer,
        dentry: DentryHandle,
        leaf: PathKey,
    ) -> Resolution {
        // Entries without an inode all share one key; nothing stored under it would describe a single entry.
        if leaf.has_empty_inode() {
            trace!("not storing fragments for {dentry:?}, which has no inode");
            return Resolution {
                path: PathRef::Chain(leaf),
                truncated: false,
            };
        }
        let mut key = leaf;
        let end = walk(accessor, dentry, |level| {
            // A detached marker left by a truncated walk is replaced once the entry is reachable.
            if self.table.get(&key).is_some_and(|stored| !stored.is_detached()) {
                self.deduplicated.fetch_add(1, Ordering::Relaxed);
                return Step::Stop;
            }
            // Parents are keyed on the leaf's mount; the walk never crosses into another mount's root.
            let next = if level.is_boundary {
                PathKey::NULL
            } else {
                PathKey::new(level.parent_ino, leaf.mount_id)
            };
            self.store(key, PathFragment::new(next, level.name));
            key = next;
            if key.is_null() { Step::Stop } else { Step::Continue }
        });

        let truncated = matches!(end, WalkEnd::Exhausted);
        if truncated && !key.is_null() && !self.table.contains(&key) {
            // Ends the chain so the consumer knows the path is incomplete rather than missing.
            self.store(key, PathFragment::default());
        }
        Resolution {
            path: PathRef::Chain(leaf),
            truncated,
        }
    }
}
