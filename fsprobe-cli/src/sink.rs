// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    io::Write,
    sync::{Mutex, PoisonError},
};

use fsprobe_common::FsEvent;
use log::warn;
use serde::Serialize;

/// Receives every completed record.  `paths` holds the inline path bytes that follow the record: the source path's
/// `src_path_length` bytes, then the target's `target_path_length` bytes.  It is empty unless paths are inline.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &FsEvent, paths: &[u8]);
}

/// Discards everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &FsEvent, _paths: &[u8]) {}
}

/// Splits inline path bytes into their segments, leaf first.
pub fn segments(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    bytes
        .split(|b| *b == 0)
        .filter(|segment| !segment.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedEvent {
    pub event: FsEvent,
    pub paths: Vec<u8>,
}

/// Splits the inline bytes following `event` into its source and target paths.
#[must_use]
pub fn split_paths<'a>(event: &FsEvent, paths: &'a [u8]) -> (&'a [u8], &'a [u8]) {
    let src_end = (event.src_path_length as usize).min(paths.len());
    let target_end = (src_end + event.target_path_length as usize).min(paths.len());
    (&paths[..src_end], &paths[src_end..target_end])
}

impl EmittedEvent {
    #[must_use]
    pub fn src_path_bytes(&self) -> &[u8] {
        split_paths(&self.event, &self.paths).0
    }

    #[must_use]
    pub fn target_path_bytes(&self) -> &[u8] {
        split_paths(&self.event, &self.paths).1
    }
}

/// Keeps every record in memory, in emission order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EmittedEvent>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything recorded so far.
    pub fn take(&self) -> Vec<EmittedEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &FsEvent, paths: &[u8]) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(EmittedEvent {
                event: *event,
                paths: paths.to_vec(),
            });
    }
}

#[derive(Serialize)]
struct PathRecord {
    inode: u64,
    mount_id: u32,
    device: u32,
    /// Fragment or single-fragment key, when the mode uses one.
    #[serde(skip_serializing_if = "is_zero")]
    path_key: u32,
    path_length: u32,
    /// Inline segments, leaf first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    segments: Vec<String>,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // signature required by serde
fn is_zero(value: &u32) -> bool {
    *value == 0
}

#[derive(Serialize)]
struct EventRecord {
    timestamp: u64,
    pid: u32,
    tid: u32,
    uid: u32,
    gid: u32,
    comm: String,
    kind: &'static str,
    flags: i32,
    mode: i32,
    retval: i64,
    src: PathRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<PathRecord>,
}

fn lossy_segments(bytes: &[u8]) -> Vec<String> {
    segments(bytes)
        .map(|segment| String::from_utf8_lossy(segment).into_owned())
        .collect()
}

impl EventRecord {
    fn new(event: &FsEvent, paths: &[u8]) -> Self {
        let (src_path, target_path) = split_paths(event, paths);
        EventRecord {
            timestamp: event.process.timestamp,
            pid: event.process.pid,
            tid: event.process.tid,
            uid: event.process.uid,
            gid: event.process.gid,
            comm: String::from_utf8_lossy(event.process.comm()).into_owned(),
            kind: event.kind.as_str(),
            flags: event.flags,
            mode: event.mode,
            retval: event.retval,
            src: PathRecord {
                inode: event.src_inode,
                mount_id: event.src_mount_id,
                device: event.src_device,
                path_key: event.src_path_key,
                path_length: event.src_path_length,
                segments: lossy_segments(src_path),
            },
            target: event.kind.has_target().then(|| PathRecord {
                inode: event.target_inode,
                mount_id: event.target_mount_id,
                device: event.target_device,
                path_key: event.target_path_key,
                path_length: event.target_path_length,
                segments: lossy_segments(target_path),
            }),
        }
    }
}

/// Writes one JSON object per record.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn emit(&self, event: &FsEvent, paths: &[u8]) {
        let record = EventRecord::new(event, paths);
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let result = serde_json::to_writer(&mut *writer, &record)
            .map_err(std::io::Error::from)
            .and_then(|()| writeln!(writer));
        if let Err(e) = result {
            warn!("failed to write {} event: {e}", event.kind);
        }
    }
}

/// Writes one aligned, human-readable line per record.
pub struct TableSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> TableSink<W> {
    pub fn new(writer: W) -> Self {
        TableSink {
            writer: Mutex::new(writer),
        }
    }
}

fn display_path(event_path: &[u8], key: u32, inode: u64, mount_id: u32) -> String {
    if !event_path.is_empty() {
        let mut names: Vec<_> = segments(event_path)
            .map(|segment| String::from_utf8_lossy(segment).into_owned())
            .collect();
        names.reverse();
        let joined = names.join("/");
        return match joined.strip_prefix("//") {
            Some(rest) => format!("/{rest}"),
            None => joined,
        };
    }
    if key != 0 {
        format!("key:{key:#x}")
    } else {
        format!("inode:{mount_id:x}/{inode:x}")
    }
}

impl<W: Write + Send> EventSink for TableSink<W> {
    fn emit(&self, event: &FsEvent, paths: &[u8]) {
        let (src_path, target_path) = split_paths(event, paths);
        let mut line = format!(
            "{:>16} {:>7} {:<16} {:<8} {:>4} {}",
            event.process.timestamp,
            event.process.pid,
            String::from_utf8_lossy(event.process.comm()),
            event.kind.as_str(),
            event.retval,
            display_path(
                src_path,
                event.src_path_key,
                event.src_inode,
                event.src_mount_id
            ),
        );
        if event.kind.has_target() {
            line.push_str(" -> ");
            line.push_str(&display_path(
                target_path,
                event.target_path_key,
                event.target_inode,
                event.target_mount_id,
            ));
        }
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(writer, "{line}") {
            warn!("failed to write {} event: {e}", event.kind);
        }
    }
}
