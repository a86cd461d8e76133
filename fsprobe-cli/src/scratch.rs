// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::{Mutex, MutexGuard, PoisonError};

use fsprobe_common::{EventKind, NAME_MAX, PATH_BUFFER_SIZE, ProcessContext};

use crate::cache::PendingCall;

/// Fixed-size byte buffer that paths are built into, one segment at a time.
pub struct PathBuffer {
    bytes: Box<[u8; PATH_BUFFER_SIZE]>,
    cursor: usize,
}

impl PathBuffer {
    #[must_use]
    pub fn new() -> Self {
        PathBuffer {
            bytes: Box::new([0; PATH_BUFFER_SIZE]),
            cursor: 0,
        }
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Bytes written since the last reset.
    #[must_use]
    pub fn filled(&self) -> &[u8] {
        &self.bytes[..self.cursor]
    }

    /// Appends `name` followed by a NUL at the cursor, truncating the name to `NAME_MAX - 1` bytes.
    ///
    /// A segment is only started while at least `NAME_MAX` bytes remain before `limit`, so a write never crosses it;
    /// otherwise nothing is written and `None` is returned.  Returns the number of bytes written.
    pub fn push_segment(&mut self, name: &[u8], limit: usize) -> Option<usize> {
        let limit = limit.min(PATH_BUFFER_SIZE);
        if self.cursor + NAME_MAX > limit {
            return None;
        }
        let len = name.len().min(NAME_MAX - 1);
        let start = self.cursor;
        self.bytes[start..start + len].copy_from_slice(&name[..len]);
        self.bytes[start + len] = 0;
        self.cursor += len + 1;
        Some(len + 1)
    }

    /// Copies already-formed segment bytes at the cursor, dropping whatever doesn't fit.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> usize {
        let len = bytes.len().min(PATH_BUFFER_SIZE - self.cursor);
        let start = self.cursor;
        self.bytes[start..start + len].copy_from_slice(&bytes[..len]);
        self.cursor += len;
        len
    }
}

impl Default for PathBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Working memory owned by one execution unit.
#[derive(Default)]
pub struct ScratchSlot {
    pub pending: PendingCall,
    pub paths: PathBuffer,
}

impl ScratchSlot {
    /// Readies the slot for a new call.  Nothing a previous call on this unit left behind survives; a stale path key
    /// or length would otherwise leak into the next record.
    pub fn prepare(&mut self, kind: EventKind, process: ProcessContext) {
        self.pending.start(kind, process);
        self.paths.reset();
    }
}

/// One scratch slot per execution unit, allocated once.
pub struct ScratchPool {
    slots: Box<[Mutex<ScratchSlot>]>,
}

impl ScratchPool {
    #[must_use]
    pub fn new(units: usize) -> Self {
        let slots = (0..units.max(1))
            .map(|_| Mutex::new(ScratchSlot::default()))
            .collect();
        ScratchPool { slots }
    }

    #[must_use]
    pub fn units(&self) -> usize {
        self.slots.len()
    }

    /// Locks the slot for `unit`; unit indexes beyond the pool wrap around.
    pub fn lock(&self, unit: usize) -> MutexGuard<'_, ScratchSlot> {
        self.slots[unit % self.slots.len()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
