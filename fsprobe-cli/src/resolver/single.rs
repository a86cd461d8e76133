// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use fsprobe_common::{PathKey, SINGLE_FRAGMENT_SIZE, SingleFragment};
use log::trace;
use rand::Rng as _;

use super::{PathResolution, Resolution, inline::build_path};
use crate::{
    accessor::{DentryAccessor, DentryHandle},
    cache::PathRef,
    scratch::PathBuffer,
    table::LruTable,
};

/// Stores each resolved path whole, under a random non-zero key that the record carries.
pub struct SingleFragmentResolver {
    table: LruTable<u32, SingleFragment>,
}

impl SingleFragmentResolver {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        SingleFragmentResolver {
            table: LruTable::new("single fragments", capacity),
        }
    }

    #[must_use]
    pub fn table(&self) -> &LruTable<u32, SingleFragment> {
        &self.table
    }
}

impl PathResolution for SingleFragmentResolver {
    fn resolve(
        &self,
        accessor: &dyn DentryAccessor,
        paths: &mut PathBuffer,
        dentry: DentryHandle,
        _leaf: PathKey,
    ) -> Resolution {
        // The whole value must fit one table entry, so staging always starts at the front of the buffer.
        paths.reset();
        let (len, truncated) = build_path(accessor, paths, dentry, SINGLE_FRAGMENT_SIZE);
        let key = rand::rng().random_range(1..=u32::MAX);
        if let Some(evicted) = self
            .table
            .insert(key, SingleFragment::from_bytes(paths.filled()))
        {
            trace!("single fragment {evicted:#x} evicted to make room for {key:#x}");
        }
        paths.reset();
        Resolution {
            path: PathRef::Keyed { key, len },
            truncated,
        }
    }
}
