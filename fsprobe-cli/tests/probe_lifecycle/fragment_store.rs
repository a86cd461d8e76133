// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use fsprobe::{
    accessor::DentryAccessor as _,
    config::{ProbeConfig, ResolutionMode},
    probe::EntryArgs,
};
use fsprobe_common::{EventKind, MAX_PATH_DEPTH, PathKey};

use crate::util::{MOUNT_ID, chain_path, invocation, probe_with};

fn unfiltered() -> ProbeConfig {
    ProbeConfig {
        resolution_mode: ResolutionMode::FragmentStore,
        filtering_enabled: false,
        execution_units: 2,
        ..Default::default()
    }
}

#[test]
fn open_leaves_a_resolvable_chain() {
    let (probe, sink) = probe_with(&unfiltered());
    let fs = probe.accessor();
    let file = fs.create(fs.mkdir_all("/home/alice"), b"notes.txt");
    let inv = invocation(0, 21);

    probe.enter(
        &inv,
        EntryArgs::Open {
            dentry: file,
            mount_id: MOUNT_ID,
        },
    );
    probe.exit(&inv, 0);

    let emitted = sink.take();
    let event = emitted[0].event;
    assert_eq!(event.src_path_length, 0);
    assert!(emitted[0].paths.is_empty());
    let table = probe.fragments().unwrap();
    assert_eq!(table.len(), 4);
    assert_eq!(
        chain_path(table, event.src_fragment_key()),
        (String::from("/home/alice/notes.txt"), true)
    );
}

#[test]
fn shared_ancestors_are_stored_once() {
    let (probe, sink) = probe_with(&unfiltered());
    let fs = probe.accessor();
    let dir = fs.mkdir_all("/var/log");
    let first = fs.create(dir, b"syslog");
    let second = fs.create(dir, b"auth.log");
    let inv = invocation(0, 22);

    for dentry in [first, second] {
        probe.enter(
            &inv,
            EntryArgs::Open {
                dentry,
                mount_id: MOUNT_ID,
            },
        );
        probe.exit(&inv, 0);
    }

    let table = probe.fragments().unwrap();
    // Two leaves plus `log`, `var` and the root.
    assert_eq!(table.len(), 5);
    let stats = probe.stats();
    assert_eq!(stats.fragments_inserted, 5);
    assert_eq!(stats.fragments_deduplicated, 1);

    let emitted = sink.take();
    assert_eq!(
        chain_path(table, emitted[0].event.src_fragment_key()).0,
        "/var/log/syslog"
    );
    assert_eq!(
        chain_path(table, emitted[1].event.src_fragment_key()).0,
        "/var/log/auth.log"
    );
}

#[test]
fn rename_source_uses_a_substitute_key() {
    let (probe, sink) = probe_with(&unfiltered());
    let fs = probe.accessor();
    let source = fs.create(fs.mkdir_all("/tmp"), b"draft");
    let target_dir = fs.mkdir_all("/docs");
    let target = fs.negative(target_dir, b"final");
    let inv = invocation(1, 23);

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
    fs.forget(source);
    probe.exit(&inv, 0);

    let emitted = sink.take();
    let event = emitted[0].event;
    assert_eq!(event.kind, EventKind::Rename);
    assert_ne!(event.src_path_key, 0);
    assert_eq!(event.target_inode, event.src_inode);
    assert_ne!(event.src_fragment_key(), event.target_fragment_key());

    let table = probe.fragments().unwrap();
    assert_eq!(
        chain_path(table, event.src_fragment_key()),
        (String::from("/tmp/draft"), true)
    );
    assert_eq!(
        chain_path(table, event.target_fragment_key()),
        (String::from("/docs/final"), true)
    );
}

#[test]
fn exhausted_walk_leaves_detached_marker() {
    let (probe, sink) = probe_with(&unfiltered());
    let fs = probe.accessor();
    let mut leaf = fs.root();
    for _ in 0..MAX_PATH_DEPTH {
        leaf = fs.mkdir(leaf, b"d");
    }
    let inv = invocation(0, 24);

    probe.enter(
        &inv,
        EntryArgs::Open {
            dentry: leaf,
            mount_id: MOUNT_ID,
        },
    );
    probe.exit(&inv, 0);

    let emitted = sink.take();
    let table = probe.fragments().unwrap();
    let (path, complete) = chain_path(table, emitted[0].event.src_fragment_key());
    assert!(!complete);
    assert_eq!(path.split('/').count(), MAX_PATH_DEPTH);
    // Every visited level plus the marker for the first level not visited.
    assert_eq!(table.len(), MAX_PATH_DEPTH + 1);
    assert_eq!(probe.stats().truncated_paths, 1);
}

#[test]
fn evicted_fragments_break_the_chain() {
    let mut config = unfiltered();
    config.capacities.path_fragments = 3;
    let (probe, sink) = probe_with(&config);
    let fs = probe.accessor();
    let file = fs.create(fs.mkdir_all("/a/b/c"), b"d");
    let inv = invocation(0, 25);

    probe.enter(
        &inv,
        EntryArgs::Open {
            dentry: file,
            mount_id: MOUNT_ID,
        },
    );
    probe.exit(&inv, 0);

    let table = probe.fragments().unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(probe.stats().fragments_evicted, 2);
    let emitted = sink.take();
    let leaf = emitted[0].event.src_fragment_key();
    assert!(table.peek(&leaf).is_none());
    assert_eq!(chain_path(table, leaf), (String::new(), false));
    // The entries written last survive.
    let root = PathKey::new(fs.inode_id(fs.root()).unwrap(), MOUNT_ID);
    assert!(table.peek(&root).is_some_and(|fragment| fragment.is_root()));
}

#[test]
fn rename_of_previously_seen_entry_reports_new_location() {
    let (probe, sink) = probe_with(&unfiltered());
    let fs = probe.accessor();
    let source = fs.create(fs.mkdir_all("/tmp"), b"draft");
    let target_dir = fs.mkdir_all("/docs");
    let target = fs.negative(target_dir, b"final");
    let inv = invocation(0, 26);

    probe.enter(
        &inv,
        EntryArgs::Open {
            dentry: source,
            mount_id: MOUNT_ID,
        },
    );
    probe.exit(&inv, 0);
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
    fs.forget(source);
    probe.exit(&inv, 0);
    probe.enter(
        &inv,
        EntryArgs::Open {
            dentry: target,
            mount_id: MOUNT_ID,
        },
    );
    probe.exit(&inv, 0);

    let emitted = sink.take();
    assert_eq!(emitted.len(), 3);
    let table = probe.fragments().unwrap();
    let rename = emitted[1].event;
    assert_eq!(
        chain_path(table, rename.src_fragment_key()),
        (String::from("/tmp/draft"), true)
    );
    assert_eq!(
        chain_path(table, rename.target_fragment_key()),
        (String::from("/docs/final"), true)
    );
    assert_eq!(
        chain_path(table, emitted[2].event.src_fragment_key()),
        (String::from("/docs/final"), true)
    );
}

#[test]
fn failed_mkdir_stores_nothing() {
    let (probe, sink) = probe_with(&unfiltered());
    let fs = probe.accessor();
    let dir = fs.mkdir_all("/var");
    let inv = invocation(0, 27);

    for name in [&b"exists"[..], b"also-exists"] {
        let dentry = fs.negative(dir, name);
        probe.enter(
            &inv,
            EntryArgs::Mkdir {
                dir,
                dentry,
                mode: 0o755,
            },
        );
        probe.exit(&inv, -17);
    }

    let emitted = sink.take();
    assert_eq!(emitted.len(), 2);
    assert!(emitted.iter().all(|record| record.event.src_inode == 0));
    let table = probe.fragments().unwrap();
    assert!(table.peek(&PathKey::new(0, MOUNT_ID)).is_none());
    assert!(table.is_empty());
}
