// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    EventsEmitted,
    FilteredOut,
    MissingCorrelation,
    PendingEvicted,
    TruncatedPaths,
    InodesRegistered,
}

const COUNTERS: usize = 6;

/// Running counters updated from every handler.
#[derive(Default)]
pub struct ProbeStats {
    counters: [AtomicU64; COUNTERS],
}

impl ProbeStats {
    pub fn increment(&self, counter: Counter) {
        self.counters[counter as usize].fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter as usize].load(Ordering::Relaxed)
    }
}

/// Point-in-time copy of the probe's counters, including those kept by the path tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub events_emitted: u64,
    pub filtered_out: u64,
    pub missing_correlation: u64,
    pub pending_evicted: u64,
    pub truncated_paths: u64,
    pub inodes_registered: u64,
    pub fragments_inserted: u64,
    pub fragments_deduplicated: u64,
    pub fragments_evicted: u64,
    pub single_fragments_evicted: u64,
}

impl From<&ProbeStats> for StatsSnapshot {
    fn from(stats: &ProbeStats) -> Self {
        StatsSnapshot {
            events_emitted: stats.get(Counter::EventsEmitted),
            filtered_out: stats.get(Counter::FilteredOut),
            missing_correlation: stats.get(Counter::MissingCorrelation),
            pending_evicted: stats.get(Counter::PendingEvicted),
            truncated_paths: stats.get(Counter::TruncatedPaths),
            inodes_registered: stats.get(Counter::InodesRegistered),
            ..Default::default()
        }
    }
}
