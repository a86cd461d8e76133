// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::Arc;

use fsprobe::{
    accessor::{DentryAccessor as _, DentryHandle},
    config::ProbeConfig,
    memfs::MemFs,
    probe::{EntryArgs, Probe},
    sink::RecordingSink,
};
use fsprobe_common::EventKind;

use crate::util::{MOUNT_ID, invocation, probe_with};

/// A probe watching `dir`, which is created first.
fn watched(
    config: &ProbeConfig,
    dir: &str,
) -> (Probe<MemFs>, Arc<RecordingSink>, DentryHandle) {
    let (probe, sink) = probe_with(config);
    let dentry = probe.accessor().mkdir_all(dir);
    assert!(probe.watch(probe.accessor().inode_id(dentry).unwrap()));
    (probe, sink, dentry)
}

fn open(probe: &Probe<MemFs>, tid: u32, dentry: DentryHandle) {
    let inv = invocation(0, tid);
    probe.enter(
        &inv,
        EntryArgs::Open {
            dentry,
            mount_id: MOUNT_ID,
        },
    );
    probe.exit(&inv, 0);
}

fn mkdir(probe: &Probe<MemFs>, parent: DentryHandle, name: &[u8], retval: i64) -> DentryHandle {
    let fs = probe.accessor();
    let dentry = fs.negative(parent, name);
    let inv = invocation(0, 40);
    probe.enter(
        &inv,
        EntryArgs::Mkdir {
            dir: parent,
            dentry,
            mode: 0o700,
        },
    );
    if retval == 0 {
        fs.instantiate(dentry);
    }
    probe.exit(&inv, retval);
    dentry
}

#[test]
fn only_direct_children_of_watched_directories_pass() {
    let (probe, sink, dir) = watched(&ProbeConfig::default(), "/project");
    let fs = probe.accessor();
    let inside = fs.create(dir, b"Cargo.toml");
    let nested = fs.create(fs.mkdir(dir, b"src"), b"main.rs");
    let outside = fs.create(fs.mkdir_all("/elsewhere"), b"notes");

    open(&probe, 1, inside);
    open(&probe, 2, nested);
    open(&probe, 3, outside);
    // The watched directory itself is in scope.
    open(&probe, 4, dir);

    let emitted = sink.take();
    let inodes: Vec<u64> = emitted.iter().map(|record| record.event.src_inode).collect();
    assert_eq!(
        inodes,
        vec![fs.inode_id(inside).unwrap(), fs.inode_id(dir).unwrap()]
    );
    let stats = probe.stats();
    assert_eq!(stats.filtered_out, 2);
    // Returns of filtered calls find nothing pending.
    assert_eq!(stats.missing_correlation, 2);
    assert_eq!(probe.pending_calls(), 0);
}

#[test]
fn new_directories_are_watched_when_recursive() {
    let (probe, sink, dir) = watched(&ProbeConfig::default(), "/project");
    let fs = probe.accessor();

    let created = mkdir(&probe, dir, b"target", 0);
    let file = fs.create(created, b"app");
    open(&probe, 1, file);

    let emitted = sink.take();
    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted[0].event.kind, EventKind::Mkdir);
    assert_eq!(emitted[1].event.src_inode, fs.inode_id(file).unwrap());
    assert_eq!(probe.stats().inodes_registered, 1);
    assert_eq!(probe.filter().len(), 2);
}

#[test]
fn failed_mkdir_registers_nothing() {
    let (probe, sink, dir) = watched(&ProbeConfig::default(), "/project");

    mkdir(&probe, dir, b"exists", -17);

    let emitted = sink.take();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].event.retval, -17);
    assert_eq!(probe.stats().inodes_registered, 0);
    assert_eq!(probe.filter().len(), 1);
}

#[test]
fn new_directories_stay_unwatched_without_recursion() {
    let config = ProbeConfig {
        recursive_watch: false,
        ..Default::default()
    };
    let (probe, sink, dir) = watched(&config, "/project");
    let fs = probe.accessor();

    let created = mkdir(&probe, dir, b"target", 0);
    open(&probe, 1, fs.create(created, b"app"));

    assert_eq!(sink.len(), 1);
    assert_eq!(probe.stats().filtered_out, 1);
}

fn rename_out(
    probe: &Probe<MemFs>,
    source: DentryHandle,
    target_dir: DentryHandle,
) -> DentryHandle {
    let fs = probe.accessor();
    let target = fs.negative(target_dir, b"moved");
    let inv = invocation(1, 41);
    probe.enter(
        &inv,
        EntryArgs::Rename {
            source,
            target_dir,
            target,
        },
    );
    fs.link(source, target);
    fs.unlink(source);
    probe.exit(&inv, 0);
    fs.forget(source);
    target
}

#[test]
fn renamed_entries_are_followed() {
    let (probe, sink, dir) = watched(&ProbeConfig::default(), "/inbox");
    let fs = probe.accessor();
    let file = fs.create(dir, b"letter");

    let moved = rename_out(&probe, file, fs.mkdir_all("/archive/2024"));
    open(&probe, 2, moved);

    let emitted = sink.take();
    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted[1].event.src_inode, emitted[0].event.target_inode);
    assert_eq!(probe.stats().inodes_registered, 1);
}

#[test]
fn renamed_entries_are_dropped_without_follow() {
    let config = ProbeConfig {
        follow_renames: false,
        ..Default::default()
    };
    let (probe, sink, dir) = watched(&config, "/inbox");
    let fs = probe.accessor();
    let file = fs.create(dir, b"letter");

    let moved = rename_out(&probe, file, fs.mkdir_all("/archive/2024"));
    open(&probe, 2, moved);

    assert_eq!(sink.len(), 1);
    assert_eq!(probe.stats().filtered_out, 1);
}

#[test]
fn link_into_watched_directory_is_in_scope() {
    let (probe, sink, dir) = watched(&ProbeConfig::default(), "/shared");
    let fs = probe.accessor();
    let source = fs.create(fs.mkdir_all("/private"), b"key");
    let target = fs.negative(dir, b"key");
    let inv = invocation(0, 42);

    probe.enter(
        &inv,
        EntryArgs::Link {
            source,
            target_dir: dir,
            target,
        },
    );
    fs.link(source, target);
    probe.exit(&inv, 0);

    let emitted = sink.take();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].event.kind, EventKind::Link);
    // Links never extend the watched set.
    assert_eq!(probe.stats().inodes_registered, 0);
}

#[test]
fn disabled_filtering_admits_everything() {
    let config = ProbeConfig {
        filtering_enabled: false,
        ..Default::default()
    };
    let (probe, sink) = probe_with(&config);
    let fs = probe.accessor();
    let file = fs.create(fs.mkdir_all("/a/b/c"), b"d");

    open(&probe, 1, file);
    mkdir(&probe, fs.root(), b"e", 0);

    assert_eq!(sink.len(), 2);
    assert_eq!(probe.stats().filtered_out, 0);
    // Nothing is tracked when every operation is reported.
    assert!(probe.filter().is_empty());
}
