//! Per-request diagnostic timeline.
//!
//! A [`Timeline`] is created once per logical request and shared by every
//! hop of it (redirects, auth challenges, token fetches) and by the agent
//! that opens connections for it. Entries are append-only.

use std::sync::{Arc, Mutex, MutexGuard};
use time::OffsetDateTime;

/// Body previews recorded on the timeline are cut to this many bytes.
pub const MAX_PREVIEW_BYTES: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Info,
    Tls,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub timestamp: OffsetDateTime,
    pub kind: EntryKind,
    pub message: String,
}

/// Cheap-clone handle over a shared entry list.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Arc<Mutex<Vec<TimelineEntry>>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TimelineEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, kind: EntryKind, message: impl Into<String>) {
        self.lock().push(TimelineEntry {
            timestamp: OffsetDateTime::now_utc(),
            kind,
            message: message.into(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(EntryKind::Info, message);
    }

    pub fn tls(&self, message: impl Into<String>) {
        self.push(EntryKind::Tls, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(EntryKind::Error, message);
    }

    /// Record a body preview, truncated to [`MAX_PREVIEW_BYTES`].
    pub fn preview(&self, label: &str, body: &[u8]) {
        let text = truncate_preview(body);
        self.info(format!("{}: {}", label, text));
    }

    /// Copy of all entries in insertion order.
    pub fn entries(&self) -> Vec<TimelineEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn messages(&self) -> Vec<String> {
        self.lock().iter().map(|e| e.message.clone()).collect()
    }

    /// True when both handles point at the same entry list.
    pub fn same_as(&self, other: &Timeline) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

/// Lossy UTF-8 rendering of at most [`MAX_PREVIEW_BYTES`] bytes of `body`.
pub fn truncate_preview(body: &[u8]) -> String {
    if body.len() <= MAX_PREVIEW_BYTES {
        return String::from_utf8_lossy(body).into_owned();
    }
    let mut text = String::from_utf8_lossy(&body[..MAX_PREVIEW_BYTES]).into_owned();
    text.push_str("... (truncated)");
    text
}
