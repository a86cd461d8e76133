// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::Arc;

use fsprobe::{
    config::ProbeConfig,
    memfs::MemFs,
    probe::{Invocation, Probe},
    sink::{RecordingSink, segments},
    table::LruTable,
};
use fsprobe_common::{PathFragment, PathKey, ProcessContext, SingleFragment};

pub const MOUNT_ID: u32 = 0x21;
pub const DEVICE: u32 = 0x0080_0003;

pub fn probe_with(config: &ProbeConfig) -> (Probe<MemFs>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let probe = Probe::new(config, MemFs::new(MOUNT_ID, DEVICE), sink.clone())
        .expect("valid probe configuration");
    (probe, sink)
}

pub fn invocation(unit: usize, tid: u32) -> Invocation {
    let mut process = ProcessContext {
        pid: 4000,
        tid,
        uid: 1000,
        gid: 1000,
        ..Default::default()
    };
    process.set_comm(b"test");
    Invocation { unit, process }
}

/// Root-to-leaf path from inline segments; segments are stored leaf first.
pub fn inline_path(bytes: &[u8]) -> String {
    let mut names: Vec<String> = segments(bytes)
        .map(|segment| String::from_utf8_lossy(segment).into_owned())
        .collect();
    names.reverse();
    join(&names)
}

/// Follows a fragment chain from `leaf`.  Returns the path and whether the chain ended at a root.
pub fn chain_path(table: &LruTable<PathKey, PathFragment>, leaf: PathKey) -> (String, bool) {
    let mut names = Vec::new();
    let mut key = leaf;
    let mut complete = false;
    while let Some(fragment) = table.peek(&key) {
        if fragment.is_detached() || names.len() > table.len() {
            break;
        }
        names.push(String::from_utf8_lossy(fragment.name()).into_owned());
        if fragment.is_root() {
            complete = true;
            break;
        }
        key = fragment.parent;
    }
    names.reverse();
    (join(&names), complete)
}

pub fn single_path(table: &LruTable<u32, SingleFragment>, key: u32) -> Option<String> {
    table.peek(&key).map(|fragment| inline_path(fragment.as_bytes()))
}

fn join(root_first: &[String]) -> String {
    match root_first.split_first() {
        Some((root, rest)) if root == "/" => format!("/{}", rest.join("/")),
        _ => root_first.join("/"),
    }
}
