//! Preloaded journals of one invocation

use std::collections::BTreeMap;

use crate::persistence::{LogEntry, SignalEntry};

/// Event log rows and the signal journal as seen by one invocation
///
/// Signals are consumed in sequence order through a forward-only cursor.
/// A logged step applies signals up to its recorded `signal_mark`; an
/// unlogged step applies everything loaded and records that mark, so replay
/// applies the same signals before the same step as the live run did.
#[derive(Debug, Clone, Default)]
pub struct History {
    logs: BTreeMap<u64, LogEntry>,
    signals: Vec<SignalEntry>,
    applied: usize,
    mark: u64,
}

impl History {
    /// Build from rows as loaded from the store
    ///
    /// Load the log before the journal: a row's mark then never refers to
    /// a signal missing from `signals`.
    pub fn new(logs: Vec<LogEntry>, mut signals: Vec<SignalEntry>) -> Self {
        signals.sort_by_key(|s| s.sequence);
        Self {
            logs: logs.into_iter().map(|entry| (entry.index, entry)).collect(),
            signals,
            applied: 0,
            mark: 0,
        }
    }

    /// Logged row for a step
    pub fn logged(&self, index: u64) -> Option<&LogEntry> {
        self.logs.get(&index)
    }

    /// Check whether any row exists at or after `index`
    pub fn has_entries_from(&self, index: u64) -> bool {
        self.logs.range(index..).next().is_some()
    }

    /// Remember a row written (or found) during this invocation
    pub fn record(&mut self, entry: LogEntry) {
        self.logs.insert(entry.index, entry);
    }

    /// Number of logged steps
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    /// Mark covering every loaded signal
    pub fn loaded_mark(&self) -> u64 {
        self.signals.last().map_or(0, |s| s.sequence + 1)
    }

    /// Mark of the signals applied so far
    pub fn mark(&self) -> u64 {
        self.mark
    }

    /// Signals below `mark` that have not been applied yet; advances the
    /// cursor past them. A mark behind the cursor applies nothing.
    pub fn take_signals_before(&mut self, mark: u64) -> &[SignalEntry] {
        self.mark = self.mark.max(mark);
        let start = self.applied;
        let due = self.signals[start..]
            .iter()
            .take_while(|s| s.sequence < self.mark)
            .count();
        self.applied = start + due;
        &self.signals[start..self.applied]
    }

    /// Signals not applied so far
    pub fn pending_signals(&self) -> usize {
        self.signals.len() - self.applied
    }
}
