// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    io::{self, Write as _},
    path::Path,
    process::ExitCode,
    sync::Arc,
    thread,
    time::Instant,
};

use anyhow::{Context as _, Result};
use fsprobe_common::{EventKind, FS_MODIFY, ProcessContext};
use log::{Log, debug, error, info};
use rand::{Rng, seq::IndexedRandom as _};

use crate::{
    accessor::{DentryAccessor as _, DentryHandle},
    config::{ProbeConfig, load_config},
    memfs::{GeneratedTree, MemFs, PathsGenerator},
    probe::{EntryArgs, Invocation, Probe},
    sink::{EventSink, JsonLinesSink, NullSink, TableSink},
    stats::StatsSnapshot,
};

use super::cli::{CommonOptions, OutputFormat, SimulateOptions};

const SIMULATED_MOUNT_ID: u32 = 0x20;
const SIMULATED_DEVICE: u32 = 0x0080_0001;
const ATTR_MODE: u32 = 1;

// Design note: the `cli` function performs the interactive output, while `simulate` and `run_simulation` return data
// structures and can be driven from tests.
pub fn cli(logger: Box<dyn Log>, common: &CommonOptions, options: &SimulateOptions) -> ExitCode {
    // Only fails if a logger is already installed, in which case that one stays.
    let _ = log::set_boxed_logger(logger);

    match simulate(common.config.as_deref(), options) {
        Ok(stats) => {
            let mut stdout = io::stdout().lock();
            let written = serde_json::to_writer(&mut stdout, &stats)
                .map_err(io::Error::from)
                .and_then(|()| writeln!(stdout));
            if let Err(err) = written {
                error!("failed to write statistics: {err}");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("error occurred in simulate: {err:?}");
            ExitCode::FAILURE
        }
    }
}

/// Loads the configuration and applies the command-line overrides to it.
pub fn effective_config(path: Option<&Path>, options: &SimulateOptions) -> Result<ProbeConfig> {
    let mut config = load_config(path).context("failed to load probe configuration")?;
    if let Some(mode) = options.resolution_mode {
        config.resolution_mode = mode;
    }
    if options.no_filtering {
        config.filtering_enabled = false;
    }
    if options.no_recursive {
        config.recursive_watch = false;
    }
    if options.no_follow {
        config.follow_renames = false;
    }
    Ok(config)
}

pub fn simulate(config_path: Option<&Path>, options: &SimulateOptions) -> Result<StatsSnapshot> {
    let config = effective_config(config_path, options)?;
    let sink: Arc<dyn EventSink> = match options.format {
        OutputFormat::Table => Arc::new(TableSink::new(io::stdout())),
        OutputFormat::Json => Arc::new(JsonLinesSink::new(io::stdout())),
        OutputFormat::None => Arc::new(NullSink),
    };
    run_simulation(&config, options, sink)
}

/// Builds a probe over a freshly generated tree, watches the tree, and runs the workers to completion.
pub fn run_simulation(
    config: &ProbeConfig,
    options: &SimulateOptions,
    sink: Arc<dyn EventSink>,
) -> Result<StatsSnapshot> {
    let generator = PathsGenerator {
        depth: options.tree.depth,
        breadth: options.tree.breadth,
        files: options.tree.files,
        name_length: options.tree.name_length,
    };
    let probe = Probe::new(
        config,
        MemFs::new(SIMULATED_MOUNT_ID, SIMULATED_DEVICE),
        sink,
    )?;
    let tree = generator
        .generate(probe.accessor(), &mut rand::rng())
        .context("failed to generate simulated tree")?;

    // A recursive watch covers every directory that already exists below the top.
    let seeds = if config.recursive_watch {
        &tree.folders[..]
    } else {
        &tree.folders[..1]
    };
    for folder in seeds {
        probe.watch(probe.accessor().inode_id(*folder).unwrap_or_default());
    }
    debug!("watching {} directories", probe.filter().len());

    let workers = if options.jobs == 0 {
        probe.execution_units()
    } else {
        options.jobs
    };
    let started = Instant::now();
    thread::scope(|s| {
        for index in 0..workers {
            let mut worker = Worker::new(&probe, &tree, generator, index, started);
            s.spawn(move || worker.run(options.operations));
        }
    });

    let stats = probe.stats();
    info!(
        "{workers} workers ran {} operations each in {:?}; {} records emitted",
        options.operations,
        started.elapsed(),
        stats.events_emitted
    );
    Ok(stats)
}

/// One simulated thread.  Entries it creates are its own, so no two workers ever remove the same entry.
struct Worker<'a> {
    probe: &'a Probe<MemFs>,
    tree: &'a GeneratedTree,
    generator: PathsGenerator,
    invocation: Invocation,
    started: Instant,
    directories: Vec<DentryHandle>,
    links: Vec<DentryHandle>,
}

impl<'a> Worker<'a> {
    fn new(
        probe: &'a Probe<MemFs>,
        tree: &'a GeneratedTree,
        generator: PathsGenerator,
        index: usize,
        started: Instant,
    ) -> Self {
        let mut process = ProcessContext {
            pid: std::process::id(),
            tid: u32::try_from(index + 1).unwrap_or(u32::MAX),
            ..Default::default()
        };
        process.set_comm(b"fsprobe-sim");
        Worker {
            probe,
            tree,
            generator,
            invocation: Invocation {
                unit: index,
                process,
            },
            started,
            directories: Vec::new(),
            links: Vec::new(),
        }
    }

    fn run(&mut self, operations: usize) {
        let mut rng = rand::rng();
        for _ in 0..operations {
            let Some(&kind) = EventKind::ALL.choose(&mut rng) else {
                return;
            };
            self.perform(kind, &mut rng);
        }
    }

    fn call(&mut self, args: EntryArgs, operation: impl FnOnce(&MemFs), retval: i64) {
        self.invocation.process.timestamp =
            u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.probe.enter(&self.invocation, args);
        operation(self.probe.accessor());
        self.probe.exit(&self.invocation, retval);
    }

    fn perform(&mut self, kind: EventKind, rng: &mut impl Rng) {
        let (probe, tree) = (self.probe, self.tree);
        let fs = probe.accessor();
        let (Some(&file), Some(&folder)) = (tree.files.choose(rng), tree.folders.choose(rng)) else {
            return;
        };
        match kind {
            EventKind::Open => {
                let args = EntryArgs::Open {
                    dentry: file,
                    mount_id: fs.mount(),
                };
                self.call(args, |_| {}, 3);
            }
            EventKind::Modify => {
                let args = EntryArgs::Modify {
                    dentry: file,
                    mask: FS_MODIFY,
                };
                self.call(args, |_| {}, 0);
            }
            EventKind::SetAttr => {
                let args = EntryArgs::SetAttr {
                    dentry: file,
                    valid: ATTR_MODE,
                    mode: 0o100_600,
                };
                self.call(args, |_| {}, 0);
            }
            EventKind::Mkdir => {
                let dentry = fs.negative(folder, &self.generator.random_name(rng));
                let args = EntryArgs::Mkdir {
                    dir: folder,
                    dentry,
                    mode: 0o755,
                };
                self.call(
                    args,
                    |fs| {
                        fs.instantiate(dentry);
                    },
                    0,
                );
                self.directories.push(dentry);
            }
            EventKind::Rmdir => {
                let Some(dentry) = self.directories.pop() else {
                    return self.perform(EventKind::Mkdir, rng);
                };
                let dir = fs.parent(dentry).unwrap_or(fs.root());
                self.call(EntryArgs::Rmdir { dir, dentry }, |fs| fs.unlink(dentry), 0);
                fs.forget(dentry);
            }
            EventKind::Link => {
                let target = fs.negative(folder, &self.generator.random_name(rng));
                let args = EntryArgs::Link {
                    source: file,
                    target_dir: folder,
                    target,
                };
                self.call(
                    args,
                    |fs| {
                        fs.link(file, target);
                    },
                    0,
                );
                self.links.push(target);
            }
            EventKind::Rename => {
                let Some(source) = self.links.pop() else {
                    return self.perform(EventKind::Link, rng);
                };
                let target = fs.negative(folder, &self.generator.random_name(rng));
                let args = EntryArgs::Rename {
                    source,
                    target_dir: folder,
                    target,
                };
                self.call(
                    args,
                    |fs| {
                        fs.link(source, target);
                        fs.unlink(source);
                    },
                    0,
                );
                fs.forget(source);
                self.links.push(target);
            }
            EventKind::Unlink => {
                let Some(dentry) = self.links.pop() else {
                    return self.perform(EventKind::Link, rng);
                };
                let dir = fs.parent(dentry).unwrap_or(fs.root());
                self.call(EntryArgs::Unlink { dir, dentry }, |fs| fs.unlink(dentry), 0);
                fs.forget(dentry);
            }
        }
    }
}
