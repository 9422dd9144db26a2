//! The time-bounded FIFO window combos are evaluated against.

use crate::common::{Signal, TimeStamp};
use std::collections::VecDeque;

/// An observed `(signal, timestamp)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalBufferEntry {
    pub signal: Signal,
    pub timestamp: TimeStamp,
}

impl SignalBufferEntry {
    pub fn new(signal: Signal, timestamp: TimeStamp) -> Self {
        Self { signal, timestamp }
    }
}

/// An append-only, index-addressable sequence of entries in non-decreasing
/// timestamp order.
///
/// Entries are addressed by absolute index. Expiring entries from the front
/// advances [`start`](Self::start) but never renumbers the survivors, so an
/// index recorded on one tick still names the same entry on the next.
#[derive(Debug, Clone, Default)]
pub struct SignalWindow {
    entries: VecDeque<SignalBufferEntry>,
    offset: usize,
}

impl SignalWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a window from entries already sorted by timestamp.
    pub fn from_entries(entries: impl IntoIterator<Item = SignalBufferEntry>) -> Self {
        let mut window = Self::new();
        for entry in entries {
            window.push(entry);
        }
        window
    }

    /// Absolute index of the oldest entry still in the window.
    pub fn start(&self) -> usize {
        self.offset
    }

    /// Absolute index one past the newest entry.
    pub fn end(&self) -> usize {
        self.offset + self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entry at absolute `index`, if it has not expired.
    pub fn get(&self, index: usize) -> Option<&SignalBufferEntry> {
        index
            .checked_sub(self.offset)
            .and_then(|relative| self.entries.get(relative))
    }

    /// Appends an entry.
    ///
    /// A timestamp older than the newest entry is clamped forward so the
    /// window stays ordered.
    pub fn push(&mut self, mut entry: SignalBufferEntry) {
        if let Some(last) = self.entries.back() {
            entry.timestamp = entry.timestamp.max(last.timestamp);
        }
        self.entries.push_back(entry);
    }

    /// Drops every entry older than `threshold`, returning how many were dropped.
    pub fn expire_before(&mut self, threshold: TimeStamp) -> usize {
        let mut dropped = 0;
        while self
            .entries
            .front()
            .is_some_and(|entry| entry.timestamp < threshold)
        {
            self.entries.pop_front();
            dropped += 1;
        }
        self.offset += dropped;
        dropped
    }

    /// Drops every entry, keeping the absolute numbering monotonic.
    pub fn expire_all(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        self.offset += dropped;
        dropped
    }

    /// Iterates entries oldest first, paired with their absolute index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &SignalBufferEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(move |(relative, entry)| (self.offset + relative, entry))
    }
}
