// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use fsprobe_common::{EventKind, FsEvent, PathKey, ProcessContext, SingleFragment};

use crate::{accessor::DentryHandle, table::LruTable};

/// Where the bytes of a resolved path can be found.
#[derive(Debug, Clone, Copy, Default)]
#[allow(clippy::large_enum_variant)]
pub enum PathRef {
    #[default]
    Unresolved,

    /// Written to the execution unit's path buffer; `len` bytes including terminators.
    Inline { len: u32 },

    /// Resolved before the operation ran and carried along with the pending call.
    Embedded(SingleFragment),

    /// Leaf key of a chain in the fragment table.
    Chain(PathKey),

    /// Key of a complete path in the single-fragment table.
    Keyed { key: u32, len: u32 },
}

/// State captured when an operation starts, needed to finish the record once it returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct PendingCall {
    pub event: FsEvent,
    pub src_dentry: DentryHandle,
    pub target_dir: DentryHandle,
    pub target_dentry: DentryHandle,
    pub src_path: PathRef,
}

impl PendingCall {
    /// Starts a fresh record; nothing from a previous call survives.
    pub fn start(&mut self, kind: EventKind, process: ProcessContext) {
        *self = PendingCall::default();
        self.event.kind = kind;
        self.event.process = process;
    }
}

/// In-flight operations, keyed by the calling thread's correlation key.
pub struct CorrelationCache {
    calls: LruTable<u64, PendingCall>,
}

impl CorrelationCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        CorrelationCache {
            calls: LruTable::new("pending calls", capacity),
        }
    }

    /// Stores a copy of `partial` under `key`, replacing any earlier entry for the same thread.  Returns the key of
    /// an unrelated call that was evicted to make room; that call's return will go unreported.
    pub fn begin(&self, key: u64, partial: &PendingCall) -> Option<u64> {
        self.calls.insert(key, *partial)
    }

    /// Takes the pending call for `key`.  `None` when it was never stored or has been evicted.
    pub fn complete(&self, key: u64) -> Option<PendingCall> {
        self.calls.remove(&key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.calls.capacity()
    }
}
