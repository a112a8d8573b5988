//! Alert frequency pattern index
//!
//! Tracks how often each distinct `(type, data)` combination occurs. Purely for
//! introspection; correlation rules query the history store instead.
//! Uses moka so idle patterns age out and the index stays bounded.

use std::collections::VecDeque;
use std::time::Duration;

use moka::sync::Cache;
use serde::Serialize;

use super::record::AlertRecord;

/// Occurrence timestamps kept per pattern
pub const MAX_PATTERN_OCCURRENCES: usize = 100;

/// Frequency statistics for one alert signature
#[derive(Debug, Clone, Serialize)]
pub struct AlertPattern {
    pub alert_type: String,
    pub data: String,
    pub count: u64,
    pub first_seen: i64,
    pub last_seen: i64,
    pub occurrences: VecDeque<i64>,
}

/// Bounded index of alert patterns
pub struct PatternIndex {
    cache: Cache<String, AlertPattern>,
}

impl PatternIndex {
    pub fn new() -> Self {
        Self::with_config(10_000, Duration::from_secs(24 * 60 * 60))
    }

    /// Index holding at most `max_patterns`, dropping those not seen for `idle`
    pub fn with_config(max_patterns: u64, idle: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_patterns)
                .time_to_idle(idle)
                .build(),
        }
    }

    /// Record one occurrence of `record`
    pub fn record(&self, record: &AlertRecord) {
        let data = record.data.to_canonical_string();
        let key = format!("{}-{}", record.alert_type, data);

        let mut pattern = self.cache.get(&key).unwrap_or_else(|| AlertPattern {
            alert_type: record.alert_type.clone(),
            data,
            count: 0,
            first_seen: record.timestamp,
            last_seen: record.timestamp,
            occurrences: VecDeque::new(),
        });

        pattern.count += 1;
        pattern.last_seen = record.timestamp;
        pattern.occurrences.push_back(record.timestamp);
        while pattern.occurrences.len() > MAX_PATTERN_OCCURRENCES {
            pattern.occurrences.pop_front();
        }

        self.cache.insert(key, pattern);
    }

    /// Snapshot of all patterns, most frequent first
    pub fn patterns(&self) -> Vec<AlertPattern> {
        let mut patterns: Vec<AlertPattern> =
            self.cache.iter().map(|(_, pattern)| pattern).collect();
        patterns.sort_by(|a, b| b.count.cmp(&a.count).then(b.last_seen.cmp(&a.last_seen)));
        patterns
    }

    /// Tracked pattern count, after pending expiries are applied
    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}

impl Default for PatternIndex {
    fn default() -> Self {
        Self::new()
    }
}
