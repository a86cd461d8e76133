// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use enum_dispatch::enum_dispatch;
use fsprobe_common::{MAX_PATH_DEPTH, NAME_MAX, PathFragment, PathKey, SingleFragment};

use crate::{
    accessor::{DentryAccessor, DentryAccessorExt as _, DentryHandle},
    cache::PathRef,
    config::{Capacities, ResolutionMode},
    scratch::PathBuffer,
    table::LruTable,
};

pub mod fragments;
pub mod inline;
pub mod single;

pub use fragments::FragmentStoreResolver;
pub use inline::InlineBufferResolver;
pub use single::SingleFragmentResolver;

/// Outcome of resolving one directory entry.
#[derive(Debug, Clone, Copy)]
pub struct Resolution {
    pub path: PathRef,
    /// The walk stopped before reaching a root, for lack of depth or buffer space.
    pub truncated: bool,
}

#[enum_dispatch]
pub trait PathResolution {
    /// Resolves the path of `dentry`, whose own location is `leaf`.
    ///
    /// `paths` is the execution unit's buffer.  Inline resolution appends at its cursor; other strategies may use it
    /// as staging space but leave it empty.
    fn resolve(
        &self,
        accessor: &dyn DentryAccessor,
        paths: &mut PathBuffer,
        dentry: DentryHandle,
        leaf: PathKey,
    ) -> Resolution;
}

#[enum_dispatch(PathResolution)]
pub enum PathResolver {
    InlineBufferResolver,
    FragmentStoreResolver,
    SingleFragmentResolver,
}

impl PathResolver {
    #[must_use]
    pub fn for_mode(mode: ResolutionMode, capacities: &Capacities) -> Self {
        match mode {
            ResolutionMode::InlineBuffer => InlineBufferResolver.into(),
            ResolutionMode::FragmentStore => {
                FragmentStoreResolver::new(capacities.path_fragments).into()
            }
            ResolutionMode::SingleFragment => {
                SingleFragmentResolver::new(capacities.single_fragments).into()
            }
        }
    }

    /// Forgets what is known about the location `leaf`; only the fragment store remembers locations.
    pub fn refresh(&self, leaf: PathKey) {
        if let PathResolver::FragmentStoreResolver(resolver) = self {
            resolver.refresh(leaf);
        }
    }

    #[must_use]
    pub fn fragments(&self) -> Option<&LruTable<PathKey, PathFragment>> {
        match self {
            PathResolver::FragmentStoreResolver(resolver) => Some(resolver.table()),
            _ => None,
        }
    }

    #[must_use]
    pub fn single_fragments(&self) -> Option<&LruTable<u32, SingleFragment>> {
        match self {
            PathResolver::SingleFragmentResolver(resolver) => Some(resolver.table()),
            _ => None,
        }
    }
}

/// One directory entry visited on the way to the root.
pub(crate) struct Level<'a> {
    pub ino: u64,
    pub parent_ino: u64,
    pub name: &'a [u8],
    /// Nothing above this entry should be visited: it is its own parent, it is named like a root, or it has no name.
    pub is_boundary: bool,
}

pub(crate) enum Step {
    Continue,
    Stop,
}

pub(crate) enum WalkEnd {
    /// A boundary entry was visited.
    Root,
    /// The visitor asked to stop.
    Stopped,
    /// `MAX_PATH_DEPTH` entries were visited without reaching a boundary.
    Exhausted,
}

/// Walks from `dentry` towards the root, visiting at most `MAX_PATH_DEPTH` entries.
pub(crate) fn walk(
    accessor: &dyn DentryAccessor,
    dentry: DentryHandle,
    mut visit: impl FnMut(&Level<'_>) -> Step,
) -> WalkEnd {
    let mut buf = [0u8; NAME_MAX];
    let mut current = dentry;
    for _ in 0..MAX_PATH_DEPTH {
        let len = accessor
            .read_name(current, &mut buf[..NAME_MAX - 1])
            .unwrap_or(0)
            .min(NAME_MAX - 1);
        let parent = accessor.parent_or_self(current);
        let ino = accessor.ino(current);
        let parent_ino = accessor.ino(parent);
        let name = &buf[..len];

        let level = Level {
            ino,
            parent_ino,
            name,
            is_boundary: parent == current
                || ino == parent_ino
                || name.is_empty()
                || name[0] == b'/',
        };
        if let Step::Stop = visit(&level) {
            return WalkEnd::Stopped;
        }
        if level.is_boundary {
            return WalkEnd::Root;
        }
        current = parent;
    }
    WalkEnd::Exhausted
}
