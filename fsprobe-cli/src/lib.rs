// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::unused_self)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::too_many_lines)]
#![warn(clippy::print_stderr)]
#![warn(clippy::print_stdout)]
#![warn(clippy::string_slice)]

pub mod accessor;
pub mod cache;
pub mod cmd;
pub mod config;
pub mod errors;
pub mod filter;
pub mod memfs;
pub mod modes;
pub mod probe;
pub mod resolver;
pub mod scratch;
pub mod sink;
pub mod stats;
pub mod table;
