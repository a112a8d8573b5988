//! Rolling-window alert history

use std::collections::VecDeque;

use super::record::AlertRecord;

/// Default retention window (24 hours)
pub const DEFAULT_RETENTION_MS: i64 = 24 * 60 * 60 * 1000;

/// Time-ordered buffer of recent alert records.
///
/// Records are kept in insertion order. Producers stamp monotonically in
/// practice, but ordering is not enforced, so pruning scans the whole buffer.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    records: VecDeque<AlertRecord>,
    retention_ms: i64,
}

impl HistoryStore {
    pub fn new(retention_ms: i64) -> Self {
        Self {
            records: VecDeque::new(),
            retention_ms,
        }
    }

    pub fn retention_ms(&self) -> i64 {
        self.retention_ms
    }

    /// Append, then prune everything outside the window (including `record`
    /// itself if it was stamped too far in the past)
    pub fn append(&mut self, record: AlertRecord, now: i64) {
        self.records.push_back(record);
        self.prune(now);
    }

    /// Remove every record older than the retention window. Returns the number removed.
    pub fn prune(&mut self, now: i64) -> usize {
        let cutoff = now - self.retention_ms;
        let before = self.records.len();
        self.records.retain(|r| r.timestamp >= cutoff);
        before - self.records.len()
    }

    /// All records in insertion order
    pub fn query(&self) -> impl Iterator<Item = &AlertRecord> {
        self.records.iter()
    }

    /// Records stamped within `window_ms` of `now`
    pub fn within(&self, window_ms: i64, now: i64) -> impl Iterator<Item = &AlertRecord> {
        let cutoff = now - window_ms;
        self.records.iter().filter(move |r| r.timestamp > cutoff)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_MS)
    }
}
