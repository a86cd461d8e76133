// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]

use core::{fmt, str::FromStr};

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Longest directory entry name that is copied, including its NUL terminator.
pub const NAME_MAX: usize = 255;

/// Size of a per-execution-unit path building buffer: `2**13 + NAME_MAX`.  A maximal segment may start anywhere in
/// the first `2**13` bytes without ever running past the end.
pub const PATH_BUFFER_SIZE: usize = 8192 + NAME_MAX;

/// Size of one single-fragment table value; holds exactly one path: `2**12 + NAME_MAX`.
pub const SINGLE_FRAGMENT_SIZE: usize = 4096 + NAME_MAX;

/// Upper bound on the number of directory entries visited while walking towards the root.
pub const MAX_PATH_DEPTH: usize = 75;

pub const TASK_COMM_LEN: usize = 16;
pub const TTY_NAME_LEN: usize = 16;

/// fsnotify mask value for a content modification; other masks are not reported as `Modify` events.
pub const FS_MODIFY: u32 = 0x0000_0002;

/// Returns the bytes of `buf` preceding the first NUL, or all of `buf` if there is none.
#[must_use]
pub fn nul_terminated(buf: &[u8]) -> &[u8] {
    match buf.iter().position(|b| *b == 0) {
        Some(end) => &buf[..end],
        None => buf,
    }
}

/// Location of a directory entry: an inode on a specific mount.  The all-zero key means "no parent".
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PathKey {
    pub ino: u64,
    pub mount_id: u32,
    pub padding: u32,
}

impl PathKey {
    pub const NULL: PathKey = PathKey::new(0, 0);

    #[must_use]
    pub const fn new(ino: u64, mount_id: u32) -> Self {
        PathKey {
            ino,
            mount_id,
            padding: 0,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.ino == 0 && self.mount_id == 0
    }

    #[must_use]
    pub const fn has_empty_inode(&self) -> bool {
        self.ino == 0
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}/{:x}", self.mount_id, self.ino)
    }
}

/// One edge of the directory hierarchy: an entry's name and the key of the directory containing it.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PathFragment {
    pub parent: PathKey,
    pub name: [u8; NAME_MAX],
}

impl PathFragment {
    /// Builds a fragment, truncating `name` so that a NUL terminator always fits.
    #[must_use]
    pub fn new(parent: PathKey, name: &[u8]) -> Self {
        let mut fragment = PathFragment {
            parent,
            name: [0; NAME_MAX],
        };
        let len = name.len().min(NAME_MAX - 1);
        fragment.name[..len].copy_from_slice(&name[..len]);
        fragment
    }

    #[must_use]
    pub fn name(&self) -> &[u8] {
        nul_terminated(&self.name)
    }

    /// The root of a mount is named `/`.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.name[0] == b'/'
    }

    /// A fragment with no parent that isn't a root: either a disconnected entry, or the marker left when the walk
    /// ran out of depth before reaching the root.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.parent.is_null() && self.name[0] == 0
    }
}

impl Default for PathFragment {
    fn default() -> Self {
        PathFragment::new(PathKey::NULL, &[])
    }
}

impl fmt::Debug for PathFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathFragment")
            .field("parent", &self.parent)
            .field("name", &format_args!("{}", self.name().escape_ascii()))
            .finish()
    }
}

/// A complete resolved path, stored in the single-fragment side table.  Segments are laid out exactly as in the
/// inline buffer: leaf first, each followed by a NUL.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SingleFragment {
    pub len: u32,
    pub bytes: [u8; SINGLE_FRAGMENT_SIZE],
}

impl SingleFragment {
    #[must_use]
    pub fn from_bytes(src: &[u8]) -> Self {
        let mut fragment = SingleFragment {
            len: 0,
            bytes: [0; SINGLE_FRAGMENT_SIZE],
        };
        let len = src.len().min(SINGLE_FRAGMENT_SIZE);
        fragment.bytes[..len].copy_from_slice(&src[..len]);
        fragment.len = u32::try_from(len).unwrap_or(u32::MAX);
        fragment
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl fmt::Debug for SingleFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFragment")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// Identity of the task that triggered an operation.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessContext {
    pub pidns: u64,
    pub timestamp: u64,
    pub pid: u32,
    pub tid: u32,
    pub uid: u32,
    pub gid: u32,
    pub tty_name: [u8; TTY_NAME_LEN],
    pub comm: [u8; TASK_COMM_LEN],
}

impl ProcessContext {
    /// Identifier of the calling thread; a thread has at most one traced operation in flight.
    #[must_use]
    pub const fn correlation_key(&self) -> u64 {
        ((self.pid as u64) << 32) | self.tid as u64
    }

    #[must_use]
    pub fn comm(&self) -> &[u8] {
        nul_terminated(&self.comm)
    }

    #[must_use]
    pub fn tty_name(&self) -> &[u8] {
        nul_terminated(&self.tty_name)
    }

    /// Copies `comm` into the fixed-size command name field, truncated to leave room for a terminator.
    pub fn set_comm(&mut self, comm: &[u8]) {
        self.comm = [0; TASK_COMM_LEN];
        let len = comm.len().min(TASK_COMM_LEN - 1);
        self.comm[..len].copy_from_slice(&comm[..len]);
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum EventKind {
    Open = 0,
    Mkdir = 1,
    Link = 2,
    Rename = 3,
    Unlink = 4,
    Rmdir = 5,
    Modify = 6,
    SetAttr = 7,
}

// Not derived: num_enum reads a `#[default]` variant as the fallback for unknown wire values.
#[allow(clippy::derivable_impls)]
impl Default for EventKind {
    fn default() -> Self {
        EventKind::Open
    }
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::Open,
        EventKind::Mkdir,
        EventKind::Link,
        EventKind::Rename,
        EventKind::Unlink,
        EventKind::Rmdir,
        EventKind::Modify,
        EventKind::SetAttr,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::Open => "open",
            EventKind::Mkdir => "mkdir",
            EventKind::Link => "link",
            EventKind::Rename => "rename",
            EventKind::Unlink => "unlink",
            EventKind::Rmdir => "rmdir",
            EventKind::Modify => "modify",
            EventKind::SetAttr => "setattr",
        }
    }

    /// Whether the operation carries a second (target) entry to resolve.
    #[must_use]
    pub const fn has_target(&self) -> bool {
        matches!(self, EventKind::Link | EventKind::Rename)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownEventKind;

impl fmt::Display for UnknownEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown event kind")
    }
}

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or(UnknownEventKind)
    }
}

/// The record emitted for every completed, in-scope operation.  How the paths are referenced depends on the
/// resolution mode: inline lengths (bytes follow the record), fragment-table keys, or single-fragment keys.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsEvent {
    pub process: ProcessContext,
    pub kind: EventKind,
    pub flags: i32,
    pub mode: i32,
    pub src_path_key: u32,
    pub target_path_key: u32,
    pub src_inode: u64,
    pub src_path_length: u32,
    pub src_mount_id: u32,
    pub src_device: u32,
    pub target_inode: u64,
    pub target_path_length: u32,
    pub target_mount_id: u32,
    pub target_device: u32,
    pub retval: i64,
}

impl FsEvent {
    /// Key of the first source fragment in the fragment table.  A non-zero `src_path_key` replaces the inode, as
    /// for renames, where the inode now belongs to the target.
    #[must_use]
    pub const fn src_fragment_key(&self) -> PathKey {
        if self.src_path_key != 0 {
            PathKey::new(self.src_path_key as u64, self.src_mount_id)
        } else {
            PathKey::new(self.src_inode, self.src_mount_id)
        }
    }

    #[must_use]
    pub const fn target_fragment_key(&self) -> PathKey {
        PathKey::new(self.target_inode, self.target_mount_id)
    }
}
