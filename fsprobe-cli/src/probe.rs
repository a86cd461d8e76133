// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::Arc;

use fsprobe_common::{
    EventKind, FS_MODIFY, FsEvent, PathFragment, PathKey, ProcessContext, SINGLE_FRAGMENT_SIZE,
    SingleFragment,
};
use log::{debug, trace};
use rand::Rng as _;

use crate::{
    accessor::{DentryAccessor, DentryAccessorExt as _, DentryHandle},
    cache::{CorrelationCache, PathRef, PendingCall},
    config::{ProbeConfig, ResolutionMode},
    errors::ConfigError,
    filter::AncestorFilter,
    modes::ProbeModes,
    resolver::{PathResolution as _, PathResolver},
    scratch::{PathBuffer, ScratchPool, ScratchSlot},
    sink::EventSink,
    stats::{Counter, ProbeStats, StatsSnapshot},
    table::LruTable,
};

/// Where and on whose behalf a handler runs.
#[derive(Debug, Clone, Copy)]
pub struct Invocation {
    /// Execution unit (CPU) running the handler; selects the scratch slot.
    pub unit: usize,
    pub process: ProcessContext,
}

/// Arguments observed when an operation starts.
#[derive(Debug, Clone, Copy)]
pub enum EntryArgs {
    Open {
        dentry: DentryHandle,
        mount_id: u32,
    },
    Mkdir {
        dir: DentryHandle,
        dentry: DentryHandle,
        mode: u32,
    },
    Link {
        source: DentryHandle,
        target_dir: DentryHandle,
        target: DentryHandle,
    },
    Rename {
        source: DentryHandle,
        target_dir: DentryHandle,
        target: DentryHandle,
    },
    Unlink {
        dir: DentryHandle,
        dentry: DentryHandle,
    },
    Rmdir {
        dir: DentryHandle,
        dentry: DentryHandle,
    },
    /// Content change notification; only `FS_MODIFY` masks are traced.
    Modify {
        dentry: DentryHandle,
        mask: u32,
    },
    SetAttr {
        dentry: DentryHandle,
        valid: u32,
        mode: u32,
    },
}

impl EntryArgs {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            EntryArgs::Open { .. } => EventKind::Open,
            EntryArgs::Mkdir { .. } => EventKind::Mkdir,
            EntryArgs::Link { .. } => EventKind::Link,
            EntryArgs::Rename { .. } => EventKind::Rename,
            EntryArgs::Unlink { .. } => EventKind::Unlink,
            EntryArgs::Rmdir { .. } => EventKind::Rmdir,
            EntryArgs::Modify { .. } => EventKind::Modify,
            EntryArgs::SetAttr { .. } => EventKind::SetAttr,
        }
    }
}

/// Copies `bytes` into a value that travels with a pending call, cutting at a segment boundary if it doesn't fit.
/// Returns whether anything was dropped.
fn embed(bytes: &[u8]) -> (SingleFragment, bool) {
    if bytes.len() <= SINGLE_FRAGMENT_SIZE {
        return (SingleFragment::from_bytes(bytes), false);
    }
    let end = bytes[..SINGLE_FRAGMENT_SIZE]
        .iter()
        .rposition(|b| *b == 0)
        .map_or(0, |nul| nul + 1);
    (SingleFragment::from_bytes(&bytes[..end]), true)
}

fn record_path(event: &mut FsEvent, target: bool, path: PathRef) {
    let (path_key, path_length) = if target {
        (&mut event.target_path_key, &mut event.target_path_length)
    } else {
        (&mut event.src_path_key, &mut event.src_path_length)
    };
    match path {
        PathRef::Inline { len } => *path_length = len,
        PathRef::Keyed { key, len } => {
            *path_key = key;
            *path_length = len;
        }
        // A chain is found from the inode and mount already in the record.
        PathRef::Chain(_) | PathRef::Embedded(_) | PathRef::Unresolved => {}
    }
}

/// Entry and return handlers for the traced filesystem operations.
///
/// `enter` captures what is only observable before the operation runs and parks it in the correlation cache; `exit`
/// completes it with the return value, resolves paths, and emits the record.  Both may run concurrently on any number
/// of threads; work for one execution unit is serialized by its scratch slot.
pub struct Probe<A: DentryAccessor> {
    accessor: A,
    modes: ProbeModes,
    scratch: ScratchPool,
    pending: CorrelationCache,
    filter: AncestorFilter,
    resolver: PathResolver,
    sink: Arc<dyn EventSink>,
    stats: ProbeStats,
}

impl<A: DentryAccessor> Probe<A> {
    pub fn new(
        config: &ProbeConfig,
        accessor: A,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let modes = ProbeModes::from_config(config);
        let units = config.execution_units();
        debug!("probe using {modes:?} across {units} execution units");
        Ok(Probe {
            accessor,
            modes,
            scratch: ScratchPool::new(units),
            pending: CorrelationCache::new(config.capacities.pending_calls),
            filter: AncestorFilter::new(config.filtering_enabled, config.capacities.inode_filter),
            resolver: PathResolver::for_mode(config.resolution_mode, &config.capacities),
            sink,
            stats: ProbeStats::default(),
        })
    }

    pub fn accessor(&self) -> &A {
        &self.accessor
    }

    pub fn modes(&self) -> ProbeModes {
        self.modes
    }

    pub fn execution_units(&self) -> usize {
        self.scratch.units()
    }

    /// Adds `inode_id` to the watched set; returns whether it was newly added.
    pub fn watch(&self, inode_id: u64) -> bool {
        self.filter.register(inode_id)
    }

    pub fn filter(&self) -> &AncestorFilter {
        &self.filter
    }

    /// Fragment table, when resolving into fragments.
    pub fn fragments(&self) -> Option<&LruTable<PathKey, PathFragment>> {
        self.resolver.fragments()
    }

    /// Single-fragment table, when resolving whole paths into keyed values.
    pub fn single_fragments(&self) -> Option<&LruTable<u32, SingleFragment>> {
        self.resolver.single_fragments()
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot::from(&self.stats);
        if let PathResolver::FragmentStoreResolver(resolver) = &self.resolver {
            snapshot.fragments_inserted = resolver.inserted();
            snapshot.fragments_deduplicated = resolver.deduplicated();
            snapshot.fragments_evicted = resolver.table().evictions();
        }
        if let Some(table) = self.resolver.single_fragments() {
            snapshot.single_fragments_evicted = table.evictions();
        }
        snapshot
    }

    pub fn enter(&self, invocation: &Invocation, args: EntryArgs) {
        let kind = args.kind();
        if !self.modes.events.contains(kind) {
            return;
        }
        if let EntryArgs::Modify { mask, .. } = args
            && mask != FS_MODIFY
        {
            return;
        }

        let mut slot = self.scratch.lock(invocation.unit);
        slot.prepare(kind, invocation.process);
        let ScratchSlot { pending, paths } = &mut *slot;
        self.capture(pending, args);

        if !self.in_scope(pending) {
            self.stats.increment(Counter::FilteredOut);
            trace!(
                "{kind} by thread {} is out of scope",
                invocation.process.tid
            );
            return;
        }
        if kind == EventKind::Rename {
            self.resolve_rename_source(pending, paths);
        }

        if let Some(evicted) = self
            .pending
            .begin(invocation.process.correlation_key(), pending)
        {
            self.stats.increment(Counter::PendingEvicted);
            trace!("pending call {evicted:#x} evicted; its return will not be reported");
        }
    }

    pub fn exit(&self, invocation: &Invocation, retval: i64) {
        let Some(mut call) = self.pending.complete(invocation.process.correlation_key()) else {
            self.stats.increment(Counter::MissingCorrelation);
            trace!(
                "return on thread {} has no pending call",
                invocation.process.tid
            );
            return;
        };
        call.event.retval = retval;

        let a = &self.accessor;
        match call.event.kind {
            // The new directory only has an inode once the operation has run.
            EventKind::Mkdir => call.event.src_inode = a.ino(call.src_dentry),
            EventKind::Link | EventKind::Rename => {
                call.event.target_inode = a.ino(call.target_dentry);
                call.event.target_mount_id = a.mnt(call.target_dir);
                call.event.target_device = a.dev(call.target_dir);
            }
            _ => {}
        }

        let mut slot = self.scratch.lock(invocation.unit);
        let paths = &mut slot.paths;
        paths.reset();
        let src = match call.src_path {
            PathRef::Unresolved => {
                self.resolve(paths, call.src_dentry, call.event.src_fragment_key())
            }
            PathRef::Embedded(fragment) => PathRef::Inline {
                len: u32::try_from(paths.push_bytes(fragment.as_bytes())).unwrap_or(u32::MAX),
            },
            resolved => resolved,
        };
        record_path(&mut call.event, false, src);
        if call.event.kind == EventKind::Rename {
            // The inode's location key still describes where it was before the rename.
            self.resolver.refresh(call.event.target_fragment_key());
        }
        if call.event.kind.has_target() {
            let target = self.resolve(
                paths,
                call.target_dentry,
                call.event.target_fragment_key(),
            );
            record_path(&mut call.event, true, target);
        }

        self.register_followups(&call);
        self.sink.emit(&call.event, paths.filled());
        self.stats.increment(Counter::EventsEmitted);
    }

    fn capture(&self, pending: &mut PendingCall, args: EntryArgs) {
        let a = &self.accessor;
        let event = &mut pending.event;
        match args {
            EntryArgs::Open { dentry, mount_id } => {
                pending.src_dentry = dentry;
                event.src_inode = a.ino(dentry);
                event.src_mount_id = mount_id;
                event.src_device = a.dev(dentry);
            }
            EntryArgs::Mkdir { dir, dentry, mode } => {
                pending.src_dentry = dentry;
                event.mode = mode.cast_signed();
                event.src_mount_id = a.mnt(dir);
                event.src_device = a.dev(dir);
            }
            EntryArgs::Link {
                source,
                target_dir,
                target,
            }
            | EntryArgs::Rename {
                source,
                target_dir,
                target,
            } => {
                pending.src_dentry = source;
                pending.target_dir = target_dir;
                pending.target_dentry = target;
                event.src_inode = a.ino(source);
                event.src_mount_id = a.mnt(source);
                event.src_device = a.dev(source);
            }
            EntryArgs::Unlink { dir, dentry } | EntryArgs::Rmdir { dir, dentry } => {
                pending.src_dentry = dentry;
                event.src_inode = a.ino(dentry);
                event.src_mount_id = a.mnt(dir);
                event.src_device = a.dev(dir);
            }
            EntryArgs::Modify { dentry, .. } => {
                pending.src_dentry = dentry;
                event.src_inode = a.ino(dentry);
                event.src_mount_id = a.mnt(dentry);
                event.src_device = a.dev(dentry);
            }
            EntryArgs::SetAttr {
                dentry,
                valid,
                mode,
            } => {
                pending.src_dentry = dentry;
                event.flags = valid.cast_signed();
                event.mode = mode.cast_signed();
                event.src_inode = a.ino(dentry);
                event.src_mount_id = a.mnt(dentry);
                event.src_device = a.dev(dentry);
            }
        }
    }

    /// Link and rename are in scope when either end is.
    fn in_scope(&self, pending: &PendingCall) -> bool {
        if !self.filter.is_enabled() {
            return true;
        }
        let a = &self.accessor;
        let src = pending.src_dentry;
        if self.filter.is_in_scope(a.ino(src), a.parent_ino(src)) {
            return true;
        }
        pending.event.kind.has_target()
            && self.filter.is_in_scope(
                a.ino(pending.target_dentry),
                a.ino(pending.target_dir),
            )
    }

    /// A rename's source location no longer exists once the call returns, so it is resolved now.
    fn resolve_rename_source(&self, pending: &mut PendingCall, paths: &mut PathBuffer) {
        if self.modes.resolution == ResolutionMode::FragmentStore {
            // The inode moves to the target; the old location is keyed on a stand-in.
            pending.event.src_path_key = rand::rng().random_range(1..=u32::MAX);
        }
        let leaf = pending.event.src_fragment_key();
        pending.src_path = match self.resolve(paths, pending.src_dentry, leaf) {
            PathRef::Inline { .. } => {
                let (fragment, cut) = embed(paths.filled());
                if cut {
                    self.stats.increment(Counter::TruncatedPaths);
                }
                PathRef::Embedded(fragment)
            }
            resolved => resolved,
        };
        paths.reset();
    }

    fn resolve(&self, paths: &mut PathBuffer, dentry: DentryHandle, leaf: PathKey) -> PathRef {
        let resolution = self.resolver.resolve(&self.accessor, paths, dentry, leaf);
        if resolution.truncated {
            self.stats.increment(Counter::TruncatedPaths);
            trace!("path of {dentry:?} truncated");
        }
        resolution.path
    }

    fn register_followups(&self, call: &PendingCall) {
        if call.event.retval != 0 {
            return;
        }
        let inode = match call.event.kind {
            EventKind::Mkdir if self.modes.registers_new_directories() => call.event.src_inode,
            EventKind::Rename if self.modes.registers_renamed_entries() => call.event.target_inode,
            _ => return,
        };
        if self.filter.register(inode) {
            self.stats.increment(Counter::InodesRegistered);
            trace!("now watching inode {inode}");
        }
    }
}
