// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{path::PathBuf, process::ExitCode};

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use log::set_max_level;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use crate::config::ResolutionMode;

use super::simulate;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
pub struct CommonOptions {
    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,

    /// Probe configuration file (TOML); built-in defaults are used when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive the probe with concurrent operations on a generated in-memory tree and report what it emits
    Simulate(SimulateOptions),
}

#[derive(Args, Debug)]
pub struct SimulateOptions {
    /// Override the configured path resolution strategy
    #[arg(value_enum, long)]
    pub resolution_mode: Option<ResolutionMode>,

    /// Trace operations anywhere in the tree, not only under the generated directory
    #[arg(long)]
    pub no_filtering: bool,

    /// Don't watch directories created inside watched directories
    #[arg(long)]
    pub no_recursive: bool,

    /// Don't watch entries renamed out of watched directories
    #[arg(long)]
    pub no_follow: bool,

    /// Number of concurrent workers; defaults to the configured number of execution units
    #[arg(short, long, default_value_t = 0)]
    pub jobs: usize,

    /// Operations performed by each worker
    #[arg(short, long, default_value_t = 200)]
    pub operations: usize,

    #[command(flatten)]
    pub tree: TreeParameters,

    /// How emitted records are written to stdout
    #[arg(value_enum, long, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct TreeParameters {
    /// Nesting depth of each generated directory chain
    #[arg(long, default_value_t = 10)]
    pub depth: usize,

    /// Number of generated directory chains
    #[arg(long, default_value_t = 4)]
    pub breadth: usize,

    /// Number of files spread over the deepest directories
    #[arg(long, default_value_t = 32)]
    pub files: usize,

    /// Length of each generated name
    #[arg(long, default_value_t = 8)]
    pub name_length: usize,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum OutputFormat {
    /// One aligned line per record, paths shown root first when available
    Table,

    /// One JSON object per record
    Json,

    /// Only the final statistics
    None,
}

pub fn run_cli() -> ExitCode {
    let cli = Cli::parse();
    let logger = TermLogger::new(
        cli.common.verbose.log_level_filter(),
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
    set_max_level(cli.common.verbose.log_level_filter());

    match &cli.command {
        Commands::Simulate(options) => simulate::cli(logger, &cli.common, options),
    }
}
