// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;

/// Opaque reference to one directory entry in the observed environment.
///
/// A handle is only meaningful for the duration of the observation that supplied it; nothing here dereferences it,
/// it is only ever passed back to a [`DentryAccessor`].  Handle equality says nothing about entry identity, compare
/// inode ids for that.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DentryHandle(pub u64);

impl fmt::Debug for DentryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DentryHandle({:#x})", self.0)
    }
}

/// Read-only navigation over directory entries.
///
/// Every read may fail (the entry was freed, the environment refused the read, ...); failures are reported as `None`
/// and callers degrade the field to zero rather than aborting.
pub trait DentryAccessor: Send + Sync {
    /// Copies the entry's name (without terminator) into `dst`, returning the number of bytes written.  Names longer
    /// than `dst` are truncated.
    fn read_name(&self, dentry: DentryHandle, dst: &mut [u8]) -> Option<usize>;

    fn parent(&self, dentry: DentryHandle) -> Option<DentryHandle>;

    /// Inode number of the entry; `0` for a negative entry that has no inode yet.
    fn inode_id(&self, dentry: DentryHandle) -> Option<u64>;

    fn mount_id(&self, dentry: DentryHandle) -> Option<u32>;

    fn device_id(&self, dentry: DentryHandle) -> Option<u32>;
}

/// Degrading wrappers used throughout the probe: a failed read becomes a zero value.
pub(crate) trait DentryAccessorExt: DentryAccessor {
    fn ino(&self, dentry: DentryHandle) -> u64 {
        self.inode_id(dentry).unwrap_or_default()
    }

    fn mnt(&self, dentry: DentryHandle) -> u32 {
        self.mount_id(dentry).unwrap_or_default()
    }

    fn dev(&self, dentry: DentryHandle) -> u32 {
        self.device_id(dentry).unwrap_or_default()
    }

    /// Parent of `dentry`; an unreadable parent is treated as the entry itself, which ends a walk.
    fn parent_or_self(&self, dentry: DentryHandle) -> DentryHandle {
        self.parent(dentry).unwrap_or(dentry)
    }

    fn parent_ino(&self, dentry: DentryHandle) -> u64 {
        self.ino(self.parent_or_self(dentry))
    }
}

impl<A: DentryAccessor + ?Sized> DentryAccessorExt for A {}
