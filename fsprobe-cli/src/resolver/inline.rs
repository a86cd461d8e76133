// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use fsprobe_common::{PATH_BUFFER_SIZE, PathKey};

use super::{PathResolution, Resolution, Step, WalkEnd, walk};
use crate::{
    accessor::{DentryAccessor, DentryHandle},
    cache::PathRef,
    scratch::PathBuffer,
};

/// Appends the segments of `dentry`'s path to `paths`, leaf first, never writing past `limit`.
///
/// An entry with an empty name ends the walk without being written.  Returns the number of bytes appended and
/// whether the walk was cut short before reaching a root.
pub(super) fn build_path(
    accessor: &dyn DentryAccessor,
    paths: &mut PathBuffer,
    dentry: DentryHandle,
    limit: usize,
) -> (u32, bool) {
    let start = paths.cursor();
    let mut full = false;
    let end = walk(accessor, dentry, |level| {
        if level.name.is_empty() {
            return Step::Stop;
        }
        if paths.push_segment(level.name, limit).is_none() {
            full = true;
            return Step::Stop;
        }
        Step::Continue
    });
    let len = u32::try_from(paths.cursor() - start).unwrap_or(u32::MAX);
    (len, full || matches!(end, WalkEnd::Exhausted))
}

pub struct InlineBufferResolver;

impl PathResolution for InlineBufferResolver {
    fn resolve(
        &self,
        accessor: &dyn DentryAccessor,
        paths: &mut PathBuffer,
        dentry: DentryHandle,
        _leaf: PathKey,
    ) -> Resolution {
        let (len, truncated) = build_path(accessor, paths, dentry, PATH_BUFFER_SIZE);
        Resolution {
            path: PathRef::Inline { len },
            truncated,
        }
    }
}
