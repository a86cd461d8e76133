// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use fsprobe_common::EventKind;

use crate::config::{ProbeConfig, ResolutionMode};

/// Set of operation kinds, one bit per [`EventKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventSet(u8);

impl EventSet {
    #[must_use]
    pub fn all() -> Self {
        EventKind::ALL.into_iter().collect()
    }

    #[must_use]
    pub fn contains(&self, kind: EventKind) -> bool {
        self.0 & Self::bit(kind) != 0
    }

    pub fn insert(&mut self, kind: EventKind) {
        self.0 |= Self::bit(kind);
    }

    fn bit(kind: EventKind) -> u8 {
        1 << u32::from(kind)
    }
}

impl FromIterator<EventKind> for EventSet {
    fn from_iter<T: IntoIterator<Item = EventKind>>(iter: T) -> Self {
        let mut set = EventSet::default();
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

/// Behaviour switches fixed when the probe is built.  Handlers only ever read these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeModes {
    pub resolution: ResolutionMode,
    pub filtering: bool,
    pub recursive: bool,
    pub follow_renames: bool,
    pub events: EventSet,
}

impl ProbeModes {
    #[must_use]
    pub fn from_config(config: &ProbeConfig) -> Self {
        ProbeModes {
            resolution: config.resolution_mode,
            filtering: config.filtering_enabled,
            recursive: config.recursive_watch,
            follow_renames: config.follow_renames,
            events: config.enabled_events().into_iter().collect(),
        }
    }

    /// Whether a newly created directory should be added to the watched set.
    #[must_use]
    pub fn registers_new_directories(&self) -> bool {
        self.filtering && self.recursive
    }

    #[must_use]
    pub fn registers_renamed_entries(&self) -> bool {
        self.filtering && self.follow_renames
    }
}

impl Default for ProbeModes {
    fn default() -> Self {
        ProbeModes::from_config(&ProbeConfig::default())
    }
}
