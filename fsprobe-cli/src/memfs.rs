// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use log::debug;
use rand::{Rng, distr::Alphanumeric};

use crate::{
    accessor::{DentryAccessor, DentryHandle},
    errors::SimulationError,
};

const ROOT_HANDLE: DentryHandle = DentryHandle(1);
const ROOT_INODE: u64 = 2;

struct Entry {
    name: Vec<u8>,
    parent: DentryHandle,
    inode: u64,
}

/// In-memory directory tree on a single mount, navigable through [`DentryAccessor`].
///
/// The root is named `/` and is its own parent.  All mutation goes through `&self`, so one tree can be shared by the
/// threads driving the probe and by the probe reading it.  A handle that has been [`forget`](MemFs::forget)ten reads as
/// missing.
pub struct MemFs {
    entries: DashMap<DentryHandle, Entry>,
    children: DashMap<(DentryHandle, Vec<u8>), DentryHandle>,
    next_handle: AtomicU64,
    next_inode: AtomicU64,
    mount_id: u32,
    device: u32,
}

impl MemFs {
    #[must_use]
    pub fn new(mount_id: u32, device: u32) -> Self {
        let entries = DashMap::new();
        entries.insert(
            ROOT_HANDLE,
            Entry {
                name: b"/".to_vec(),
                parent: ROOT_HANDLE,
                inode: ROOT_INODE,
            },
        );
        MemFs {
            entries,
            children: DashMap::new(),
            next_handle: AtomicU64::new(ROOT_HANDLE.0 + 1),
            next_inode: AtomicU64::new(ROOT_INODE + 1),
            mount_id,
            device,
        }
    }

    #[must_use]
    pub fn root(&self) -> DentryHandle {
        ROOT_HANDLE
    }

    #[must_use]
    pub fn mount(&self) -> u32 {
        self.mount_id
    }

    #[must_use]
    pub fn device(&self) -> u32 {
        self.device
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn allocate_inode(&self) -> u64 {
        self.next_inode.fetch_add(1, Ordering::Relaxed)
    }

    fn insert(&self, parent: DentryHandle, name: &[u8], inode: u64) -> DentryHandle {
        let handle = DentryHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.entries.insert(
            handle,
            Entry {
                name: name.to_vec(),
                parent,
                inode,
            },
        );
        self.children.insert((parent, name.to_vec()), handle);
        handle
    }

    #[must_use]
    pub fn lookup(&self, parent: DentryHandle, name: &[u8]) -> Option<DentryHandle> {
        self.children
            .get(&(parent, name.to_vec()))
            .map(|child| *child)
    }

    /// Creates directory `name` in `parent`, or returns the entry already there.
    pub fn mkdir(&self, parent: DentryHandle, name: &[u8]) -> DentryHandle {
        if let Some(existing) = self.lookup(parent, name) {
            return existing;
        }
        self.insert(parent, name, self.allocate_inode())
    }

    /// Creates every missing directory along an absolute, `/`-separated path.
    pub fn mkdir_all(&self, path: &str) -> DentryHandle {
        path.split('/')
            .filter(|component| !component.is_empty())
            .fold(self.root(), |dir, component| {
                self.mkdir(dir, component.as_bytes())
            })
    }

    /// Creates a new file entry with its own inode.
    pub fn create(&self, parent: DentryHandle, name: &[u8]) -> DentryHandle {
        self.insert(parent, name, self.allocate_inode())
    }

    /// Creates an entry with no inode yet, as seen by an operation that is about to create it.
    pub fn negative(&self, parent: DentryHandle, name: &[u8]) -> DentryHandle {
        self.insert(parent, name, 0)
    }

    /// Gives a negative entry a fresh inode, returning it.
    pub fn instantiate(&self, dentry: DentryHandle) -> Option<u64> {
        let inode = self.allocate_inode();
        let mut entry = self.entries.get_mut(&dentry)?;
        entry.inode = inode;
        Some(inode)
    }

    /// Makes `target` another name for the inode behind `existing`.
    pub fn link(&self, existing: DentryHandle, target: DentryHandle) -> Option<u64> {
        let inode = self.entries.get(&existing)?.inode;
        self.entries.get_mut(&target)?.inode = inode;
        Some(inode)
    }

    /// Moves `dentry` under `new_parent` as `new_name`.  An entry previously at the destination is forgotten.
    pub fn rename(&self, dentry: DentryHandle, new_parent: DentryHandle, new_name: &[u8]) {
        let old_key = {
            let Some(mut entry) = self.entries.get_mut(&dentry) else {
                return;
            };
            let old_key = (entry.parent, std::mem::replace(&mut entry.name, new_name.to_vec()));
            entry.parent = new_parent;
            old_key
        };
        self.children.remove_if(&old_key, |_, child| *child == dentry);
        if let Some(replaced) = self.children.insert((new_parent, new_name.to_vec()), dentry)
            && replaced != dentry
        {
            self.entries.remove(&replaced);
        }
    }

    /// Detaches `dentry` from its parent; the entry stays readable but turns negative.
    pub fn unlink(&self, dentry: DentryHandle) {
        let key = {
            let Some(mut entry) = self.entries.get_mut(&dentry) else {
                return;
            };
            entry.inode = 0;
            (entry.parent, entry.name.clone())
        };
        self.children.remove_if(&key, |_, child| *child == dentry);
    }

    /// Drops `dentry` entirely; every later read of the handle fails.
    pub fn forget(&self, dentry: DentryHandle) {
        if let Some((_, entry)) = self.entries.remove(&dentry) {
            self.children
                .remove_if(&(entry.parent, entry.name), |_, child| *child == dentry);
        }
    }

    /// Clears the entry's name, as for an entry cut off from the tree.
    pub fn disconnect(&self, dentry: DentryHandle) {
        if let Some(mut entry) = self.entries.get_mut(&dentry) {
            entry.name.clear();
        }
    }

    /// The entry's absolute path, for display and checks; `None` if the chain to the root is broken.
    #[must_use]
    pub fn path_of(&self, dentry: DentryHandle) -> Option<String> {
        let limit = self.entries.len();
        let mut names = Vec::new();
        let mut current = dentry;
        while current != ROOT_HANDLE {
            let entry = self.entries.get(&current)?;
            if entry.name.is_empty() || entry.parent == current || names.len() > limit {
                return None;
            }
            names.push(String::from_utf8_lossy(&entry.name).into_owned());
            current = entry.parent;
        }
        names.reverse();
        Some(format!("/{}", names.join("/")))
    }
}

impl DentryAccessor for MemFs {
    fn read_name(&self, dentry: DentryHandle, dst: &mut [u8]) -> Option<usize> {
        let entry = self.entries.get(&dentry)?;
        let len = entry.name.len().min(dst.len());
        dst[..len].copy_from_slice(&entry.name[..len]);
        Some(len)
    }

    fn parent(&self, dentry: DentryHandle) -> Option<DentryHandle> {
        self.entries.get(&dentry).map(|entry| entry.parent)
    }

    fn inode_id(&self, dentry: DentryHandle) -> Option<u64> {
        self.entries.get(&dentry).map(|entry| entry.inode)
    }

    fn mount_id(&self, dentry: DentryHandle) -> Option<u32> {
        self.entries.contains_key(&dentry).then_some(self.mount_id)
    }

    fn device_id(&self, dentry: DentryHandle) -> Option<u32> {
        self.entries.contains_key(&dentry).then_some(self.device)
    }
}

/// Populates a [`MemFs`] with `breadth` chains of `depth` nested directories under a fresh top directory, and
/// `files` files scattered across the chains' deepest directories.
#[derive(Debug, Clone, Copy)]
pub struct PathsGenerator {
    pub depth: usize,
    pub breadth: usize,
    pub files: usize,
    pub name_length: usize,
}

impl Default for PathsGenerator {
    fn default() -> Self {
        PathsGenerator {
            depth: 10,
            breadth: 4,
            files: 32,
            name_length: 8,
        }
    }
}

pub struct GeneratedTree {
    /// Directory containing everything generated.
    pub top: DentryHandle,
    /// Every generated directory, including `top`.
    pub folders: Vec<DentryHandle>,
    pub files: Vec<DentryHandle>,
}

impl PathsGenerator {
    pub fn random_name(&self, rng: &mut impl Rng) -> Vec<u8> {
        (0..self.name_length)
            .map(|_| rng.sample(Alphanumeric))
            .collect()
    }

    pub fn generate(&self, fs: &MemFs, rng: &mut impl Rng) -> Result<GeneratedTree, SimulationError> {
        for (name, value) in [
            ("depth", self.depth),
            ("breadth", self.breadth),
            ("files", self.files),
            ("name length", self.name_length),
        ] {
            if value == 0 {
                return Err(SimulationError::InvalidParameter(name));
            }
        }

        let mut top_name = b"fsprobe-".to_vec();
        top_name.extend(self.random_name(rng));
        let top = fs.mkdir(fs.root(), &top_name);
        let mut folders = vec![top];
        let mut leaves = Vec::with_capacity(self.breadth);
        for _ in 0..self.breadth {
            let mut dir = top;
            for _ in 0..self.depth {
                dir = fs.mkdir(dir, &self.random_name(rng));
                folders.push(dir);
            }
            leaves.push(dir);
        }

        let files = (0..self.files)
            .map(|_| {
                let dir = leaves[rng.random_range(0..leaves.len())];
                fs.create(dir, &self.random_name(rng))
            })
            .collect();
        debug!(
            "generated {} folders and {} files under {:?}",
            folders.len(),
            self.files,
            fs.path_of(top)
        );
        Ok(GeneratedTree {
            top,
            folders,
            files,
        })
    }
}
