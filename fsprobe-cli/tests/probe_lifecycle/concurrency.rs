// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{collections::HashMap, thread};

use fsprobe::{
    accessor::DentryAccessor as _,
    config::{ProbeConfig, ResolutionMode},
    probe::EntryArgs,
};

use crate::util::{MOUNT_ID, chain_path, inline_path, invocation, probe_with};

const THREADS: u32 = 8;
const CALLS: usize = 50;

#[test]
fn concurrent_calls_do_not_mix() {
    let config = ProbeConfig {
        filtering_enabled: false,
        // Fewer units than threads, so slots are shared.
        execution_units: 3,
        ..Default::default()
    };
    let (probe, sink) = probe_with(&config);
    let fs = probe.accessor();
    let files: HashMap<u32, _> = (1..=THREADS)
        .map(|tid| {
            let dir = fs.mkdir_all(&format!("/worker{tid}/data"));
            (tid, fs.create(dir, format!("file{tid}").as_bytes()))
        })
        .collect();

    thread::scope(|s| {
        for (&tid, &file) in &files {
            let probe = &probe;
            s.spawn(move || {
                let inv = invocation(tid as usize, tid);
                for _ in 0..CALLS {
                    probe.enter(
                        &inv,
                        EntryArgs::Open {
                            dentry: file,
                            mount_id: MOUNT_ID,
                        },
                    );
                    thread::yield_now();
                    probe.exit(&inv, i64::from(tid));
                }
            });
        }
    });

    let emitted = sink.take();
    assert_eq!(emitted.len(), THREADS as usize * CALLS);
    for record in &emitted {
        let tid = record.event.process.tid;
        let file = files[&tid];
        assert_eq!(record.event.retval, i64::from(tid));
        assert_eq!(record.event.src_inode, fs.inode_id(file).unwrap());
        assert_eq!(
            inline_path(record.src_path_bytes()),
            format!("/worker{tid}/data/file{tid}")
        );
    }
    let stats = probe.stats();
    assert_eq!(stats.missing_correlation, 0);
    assert_eq!(stats.pending_evicted, 0);
}

#[test]
fn concurrent_fragment_walks_share_ancestors() {
    let config = ProbeConfig {
        resolution_mode: ResolutionMode::FragmentStore,
        filtering_enabled: false,
        execution_units: 4,
        ..Default::default()
    };
    let (probe, sink) = probe_with(&config);
    let fs = probe.accessor();
    let dir = fs.mkdir_all("/usr/share/doc");
    let files: Vec<_> = (0..THREADS)
        .map(|index| fs.create(dir, format!("page{index}").as_bytes()))
        .collect();

    thread::scope(|s| {
        for (index, &file) in files.iter().enumerate() {
            let probe = &probe;
            s.spawn(move || {
                let inv = invocation(index, 100 + u32::try_from(index).unwrap());
                probe.enter(
                    &inv,
                    EntryArgs::Open {
                        dentry: file,
                        mount_id: MOUNT_ID,
                    },
                );
                probe.exit(&inv, 0);
            });
        }
    });

    let table = probe.fragments().unwrap();
    // One fragment per file plus `doc`, `share`, `usr` and the root.
    assert_eq!(table.len(), THREADS as usize + 4);
    for record in sink.take() {
        let (path, complete) = chain_path(table, record.event.src_fragment_key());
        assert!(complete, "{path}");
        assert!(path.starts_with("/usr/share/doc/page"), "{path}");
    }
}

#[test]
fn evicted_pending_call_is_not_reported() {
    let mut config = ProbeConfig {
        filtering_enabled: false,
        execution_units: 1,
        ..Default::default()
    };
    config.capacities.pending_calls = 2;
    let (probe, sink) = probe_with(&config);
    let fs = probe.accessor();
    let dir = fs.mkdir_all("/tmp");
    let invocations: Vec<_> = (1..=3).map(|tid| invocation(0, tid)).collect();

    for inv in &invocations {
        let dentry = fs.create(dir, format!("f{}", inv.process.tid).as_bytes());
        probe.enter(
            inv,
            EntryArgs::Open {
                dentry,
                mount_id: MOUNT_ID,
            },
        );
    }
    assert_eq!(probe.pending_calls(), 2);
    for inv in &invocations {
        probe.exit(inv, 0);
    }

    let emitted = sink.take();
    let tids: Vec<u32> = emitted.iter().map(|record| record.event.process.tid).collect();
    assert_eq!(tids, vec![2, 3]);
    assert_eq!(inline_path(emitted[0].src_path_bytes()), "/tmp/f2");
    let stats = probe.stats();
    assert_eq!(stats.pending_evicted, 1);
    assert_eq!(stats.missing_correlation, 1);
}

#[test]
fn return_without_entry_is_counted() {
    let (probe, sink) = probe_with(&ProbeConfig::default());
    probe.exit(&invocation(0, 77), 0);
    assert!(sink.is_empty());
    assert_eq!(probe.stats().missing_correlation, 1);
}
