// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file does not exist: `{0:?}`")]
    Missing(PathBuf),
    // The failing path is kept next to the cause, so these can't be `#[from]` conversions.
    #[error("i/o error reading config file `{path:?}`: `{error}`")]
    Unreadable {
        path: PathBuf,
        #[source]
        error: io::Error,
    },
    #[error("config file parsing error in `{path:?}`: `{error}`")]
    Invalid {
        path: PathBuf,
        #[source]
        error: toml::de::Error,
    },
    #[error("table capacity must be greater than zero: `{0}`")]
    InvalidCapacity(&'static str),
}

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("paths generator parameter must be non-zero: `{0}`")]
    InvalidParameter(&'static str),
}
