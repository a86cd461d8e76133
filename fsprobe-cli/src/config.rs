// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, path::Path};

use clap::ValueEnum;
use fsprobe_common::EventKind;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// How resolved paths reach the consumer.
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Deserialize, Serialize, ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionMode {
    /// Path segments are appended to the emitted record, leaf first.
    #[default]
    InlineBuffer,

    /// Each directory entry is stored once as a (parent, name) fragment in a shared table; records carry keys.
    FragmentStore,

    /// The whole path is stored as one value under a random key; records carry the key.
    SingleFragment,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default)]
pub struct Capacities {
    pub pending_calls: usize,
    pub path_fragments: usize,
    pub single_fragments: usize,
    pub inode_filter: usize,
}

impl Default for Capacities {
    fn default() -> Self {
        Capacities {
            pending_calls: 1000,
            path_fragments: 10000,
            single_fragments: 10000,
            inode_filter: 10111,
        }
    }
}

impl Capacities {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, capacity) in [
            ("pending-calls", self.pending_calls),
            ("path-fragments", self.path_fragments),
            ("single-fragments", self.single_fragments),
            ("inode-filter", self.inode_filter),
        ] {
            if capacity == 0 {
                return Err(ConfigError::InvalidCapacity(name));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProbeConfig {
    pub resolution_mode: ResolutionMode,
    pub filtering_enabled: bool,
    pub recursive_watch: bool,
    pub follow_renames: bool,
    /// Names of the operation kinds to trace; see [`EventKind::as_str`].
    pub events: Vec<String>,
    /// Number of scratch slots; `0` sizes the pool to the number of CPUs.
    pub execution_units: usize,
    pub capacities: Capacities,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            resolution_mode: ResolutionMode::default(),
            filtering_enabled: true,
            recursive_watch: true,
            follow_renames: true,
            events: EventKind::ALL
                .iter()
                .map(|kind| String::from(kind.as_str()))
                .collect(),
            execution_units: 0,
            capacities: Capacities::default(),
        }
    }
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.capacities.validate()
    }

    /// Parses `events` into kinds.  Unknown names are logged and skipped rather than rejected.
    #[must_use]
    pub fn enabled_events(&self) -> Vec<EventKind> {
        let mut kinds = Vec::with_capacity(self.events.len());
        for name in &self.events {
            match name.parse::<EventKind>() {
                Ok(kind) if !kinds.contains(&kind) => kinds.push(kind),
                Ok(_) => {}
                Err(_) => warn!("ignoring unknown event kind {name:?} in configuration"),
            }
        }
        kinds
    }

    #[must_use]
    pub fn execution_units(&self) -> usize {
        if self.execution_units == 0 {
            num_cpus::get()
        } else {
            self.execution_units
        }
    }
}

/// Reads a probe configuration from `path`; with no path the defaults apply.  An explicitly named file that doesn't
/// exist is an error.
pub fn load_config(path: Option<&Path>) -> Result<ProbeConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(ProbeConfig::default());
    };
    let exists = fs::exists(path).map_err(|error| ConfigError::Unreadable {
        path: path.to_path_buf(),
        error,
    })?;
    if !exists {
        return Err(ConfigError::Missing(path.to_path_buf()));
    }

    let text = fs::read_to_string(path).map_err(|error| ConfigError::Unreadable {
        path: path.to_path_buf(),
        error,
    })?;
    let config: ProbeConfig = toml::from_str(&text).map_err(|error| ConfigError::Invalid {
        path: path.to_path_buf(),
        error,
    })?;
    config.validate()?;
    debug!("loaded probe configuration from {path:?}: {config:?}");
    Ok(config)
}
