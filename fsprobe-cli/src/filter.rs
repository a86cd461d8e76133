// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use log::trace;

use crate::table::LruTable;

/// Set of watched inodes.  An entry is in scope when it, or the directory directly containing it, is watched.
///
/// Only the immediate parent is checked.  Deeper descendants are covered by registering directories as they are
/// created or moved in, not by walking ancestors on every call.
pub struct AncestorFilter {
    enabled: bool,
    inodes: LruTable<u64, ()>,
}

impl AncestorFilter {
    #[must_use]
    pub fn new(enabled: bool, capacity: usize) -> Self {
        AncestorFilter {
            enabled,
            inodes: LruTable::new("watched inodes", capacity),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Always true while filtering is disabled.  Inode `0` (no inode) never matches.
    #[must_use]
    pub fn is_in_scope(&self, inode_id: u64, parent_inode_id: u64) -> bool {
        if !self.enabled {
            return true;
        }
        (inode_id != 0 && self.inodes.contains(&inode_id))
            || (parent_inode_id != 0 && self.inodes.contains(&parent_inode_id))
    }

    /// Adds `inode_id` to the watched set, possibly evicting the least recently matched inode.  Returns whether the
    /// set changed.
    pub fn register(&self, inode_id: u64) -> bool {
        if inode_id == 0 || self.inodes.contains(&inode_id) {
            return false;
        }
        if let Some(evicted) = self.inodes.insert(inode_id, ()) {
            trace!("watched inode {evicted} evicted to make room for {inode_id}");
        }
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }
}
