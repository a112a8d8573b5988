//! Correlation rule engine
//!
//! Every processed alert is appended to the history, recorded in the pattern
//! index, and then run past each registered rule in registration order. A rule
//! firing is suppressed while its correlation key is still active; keys are
//! dropped by a scheduled task once the cooldown elapses.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use super::builtin::builtin_rules;
use super::rule::{correlation_key, CorrelationResult, CorrelationRule, RuleError};
use crate::alerts::{AlertPattern, AlertRecord, HistoryStore, PatternIndex, RawAlert};

/// Default suppression period for a fired correlation key (1 hour)
pub const DEFAULT_COOLDOWN_MS: i64 = 60 * 60 * 1000;

/// A rule firing that passed deduplication
#[derive(Debug, Clone, Serialize)]
pub struct Correlation {
    pub rule: String,
    pub key: String,
    pub results: Vec<CorrelationResult>,
    /// Higher-level alerts produced by the rule's action
    pub alerts: Vec<RawAlert>,
    pub fired_at: i64,
}

/// Suppression record for one correlation key
#[derive(Debug, Clone, Serialize)]
pub struct ActiveCorrelation {
    pub key: String,
    pub rule: String,
    pub fired_at: i64,
    #[serde(skip)]
    generation: u64,
}

#[derive(Debug, Default)]
struct ActiveCorrelations {
    entries: HashMap<String, ActiveCorrelation>,
    next_generation: u64,
}

impl ActiveCorrelations {
    fn is_active(&self, key: &str, now: i64, cooldown_ms: i64) -> bool {
        self.entries
            .get(key)
            .map(|e| now - e.fired_at < cooldown_ms)
            .unwrap_or(false)
    }

    fn insert(&mut self, key: String, rule: &str, now: i64) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.entries.insert(
            key.clone(),
            ActiveCorrelation {
                key,
                rule: rule.to_string(),
                fired_at: now,
                generation,
            },
        );
        generation
    }

    /// Remove `key` only if it still belongs to the firing that scheduled the removal
    fn expire(&mut self, key: &str, generation: u64) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.generation == generation => {
                self.entries.remove(key);
                true
            }
            _ => false,
        }
    }

    fn sweep(&mut self, now: i64, cooldown_ms: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| now - e.fired_at < cooldown_ms);
        before - self.entries.len()
    }
}

struct CorrelationState {
    history: HistoryStore,
    rules: Vec<Arc<dyn CorrelationRule>>,
    active: ActiveCorrelations,
    patterns: PatternIndex,
}

/// Registry of correlation rules plus the state they read and write.
///
/// All state sits behind one mutex, so concurrent `process_alert` calls are
/// serialized per engine.
pub struct CorrelationEngine {
    state: Arc<Mutex<CorrelationState>>,
    cooldown_ms: i64,
}

impl CorrelationEngine {
    /// Engine with no rules registered
    pub fn new(retention_ms: i64, cooldown_ms: i64) -> Self {
        Self {
            state: Arc::new(Mutex::new(CorrelationState {
                history: HistoryStore::new(retention_ms),
                rules: Vec::new(),
                active: ActiveCorrelations::default(),
                patterns: PatternIndex::with_config(
                    10_000,
                    Duration::from_millis(retention_ms.max(1) as u64),
                ),
            })),
            cooldown_ms,
        }
    }

    /// Engine with the built-in rules registered
    pub fn with_builtin_rules(retention_ms: i64, cooldown_ms: i64) -> Self {
        let engine = Self::new(retention_ms, cooldown_ms);
        for rule in builtin_rules() {
            // Names are distinct, registration cannot collide
            let _ = engine.add_rule(rule);
        }
        engine
    }

    pub fn cooldown_ms(&self) -> i64 {
        self.cooldown_ms
    }

    /// Register a rule. Names are unique.
    pub fn add_rule(&self, rule: impl CorrelationRule + 'static) -> Result<(), RuleError> {
        self.add_shared_rule(Arc::new(rule))
    }

    pub fn add_shared_rule(&self, rule: Arc<dyn CorrelationRule>) -> Result<(), RuleError> {
        let mut state = self.state.lock();
        if state.rules.iter().any(|r| r.name() == rule.name()) {
            return Err(RuleError::Duplicate(rule.name().to_string()));
        }
        tracing::info!(rule = %rule.name(), "Registered correlation rule");
        state.rules.push(rule);
        Ok(())
    }

    /// Registered rule names in evaluation order
    pub fn rule_names(&self) -> Vec<String> {
        self.state
            .lock()
            .rules
            .iter()
            .map(|r| r.name().to_string())
            .collect()
    }

    /// Process a record using the wall clock
    pub fn process_alert(&self, record: AlertRecord) -> Vec<Correlation> {
        self.process_alert_at(record, chrono::Utc::now().timestamp_millis())
    }

    /// Append `record` and evaluate every rule as of `now`.
    ///
    /// Returns the firings that were not suppressed. A rule that errors or
    /// panics is logged and skipped; it never affects other rules or the
    /// append itself.
    pub fn process_alert_at(&self, record: AlertRecord, now: i64) -> Vec<Correlation> {
        let mut state = self.state.lock();
        state.patterns.record(&record);
        state.history.append(record, now);

        let rules = state.rules.clone();
        let mut fired = Vec::new();

        for rule in rules {
            let name = rule.name().to_string();

            let results = match contain(|| rule.condition(&state.history, now)) {
                Ok(results) => results,
                Err(e) => {
                    tracing::error!(rule = %name, error = %e, "Correlation rule condition failed");
                    continue;
                }
            };

            if results.is_empty() {
                continue;
            }

            let key = correlation_key(&name, &results);
            if state.active.is_active(&key, now, self.cooldown_ms) {
                tracing::debug!(rule = %name, "Correlation suppressed during cooldown");
                continue;
            }

            let alerts = match contain(|| rule.action(&results, now)) {
                Ok(alerts) => alerts,
                Err(e) => {
                    tracing::error!(rule = %name, error = %e, "Correlation rule action failed");
                    Vec::new()
                }
            };

            let generation = state.active.insert(key.clone(), &name, now);
            self.schedule_expiry(key.clone(), generation);

            tracing::info!(
                rule = %name,
                results = results.len(),
                alerts = alerts.len(),
                "Correlation fired"
            );

            fired.push(Correlation {
                rule: name,
                key,
                results,
                alerts,
                fired_at: now,
            });
        }

        fired
    }

    /// Spawn the task that drops `key` once the cooldown elapses
    fn schedule_expiry(&self, key: String, generation: u64) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime available, correlation key expires on sweep");
            return;
        };

        let state = Arc::clone(&self.state);
        let cooldown = Duration::from_millis(self.cooldown_ms.max(0) as u64);
        handle.spawn(async move {
            tokio::time::sleep(cooldown).await;
            if state.lock().active.expire(&key, generation) {
                tracing::debug!(key = %key, "Correlation cooldown elapsed");
            }
        });
    }

    /// Drop expired keys and history records as of `now`
    pub fn sweep(&self, now: i64) -> SweepStats {
        let mut state = self.state.lock();
        SweepStats {
            history_pruned: state.history.prune(now),
            correlations_expired: state.active.sweep(now, self.cooldown_ms),
        }
    }

    pub fn active_correlations(&self) -> Vec<ActiveCorrelation> {
        let state = self.state.lock();
        let mut active: Vec<_> = state.active.entries.values().cloned().collect();
        active.sort_by_key(|a| a.fired_at);
        active
    }

    pub fn alert_patterns(&self) -> Vec<AlertPattern> {
        self.state.lock().patterns.patterns()
    }

    pub fn history(&self) -> Vec<AlertRecord> {
        self.state.lock().history.query().cloned().collect()
    }

    pub fn pattern_count(&self) -> u64 {
        self.state.lock().patterns.entry_count()
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }
}

/// Counts from a maintenance sweep
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepStats {
    pub history_pruned: usize,
    pub correlations_expired: usize,
}

/// Run a rule callback, converting a panic into a [`RuleError`]
fn contain<T>(f: impl FnOnce() -> Result<T, RuleError>) -> Result<T, RuleError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(RuleError::Panicked(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertData, HistoryStore, Severity};
    use crate::correlation::custom::{AlertPredicate, CustomRule};
    use serde_json::json;

    const MINUTE: i64 = 60 * 1000;
    const HOUR: i64 = 60 * MINUTE;

    fn failed(from: &str, timestamp: i64) -> AlertRecord {
        AlertRecord {
            alert_type: "Transfer Failed".to_string(),
            data: AlertData::new().with("from", from).with("severity", "low"),
            timestamp,
        }
    }

    fn other(alert_type: &str, timestamp: i64) -> AlertRecord {
        AlertRecord {
            alert_type: alert_type.to_string(),
            data: AlertData::new().with("severity", "low"),
            timestamp,
        }
    }

    struct FailingRule;

    impl CorrelationRule for FailingRule {
        fn name(&self) -> &str {
            "always-fails"
        }

        fn condition(&self, _: &HistoryStore, _: i64) -> Result<Vec<CorrelationResult>, RuleError> {
            Err(RuleError::Condition("boom".to_string()))
        }
    }

    struct PanickingRule;

    impl CorrelationRule for PanickingRule {
        fn name(&self) -> &str {
            "always-panics"
        }

        fn condition(&self, _: &HistoryStore, _: i64) -> Result<Vec<CorrelationResult>, RuleError> {
            panic!("rule exploded");
        }
    }

    #[test]
    fn test_repeated_failures_scenario() {
        let engine = CorrelationEngine::with_builtin_rules(24 * HOUR, HOUR);
        let base = 100 * HOUR;

        assert!(engine.process_alert_at(failed("0xA", base), base).is_empty());
        assert!(engine
            .process_alert_at(failed("0xA", base + 4 * MINUTE), base + 4 * MINUTE)
            .is_empty());

        let fired = engine.process_alert_at(failed("0xA", base + 9 * MINUTE), base + 9 * MINUTE);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].rule, "repeated-failures");
        assert_eq!(fired[0].results[0].severity, Severity::Medium);
        assert_eq!(fired[0].alerts.len(), 1);

        // Same result set again: suppressed
        let fired = engine.process_alert_at(other("Unrelated", base + 10 * MINUTE), base + 10 * MINUTE);
        assert!(fired.is_empty());

        // A 4th occurrence changes the count and thus the key
        let fired = engine.process_alert_at(failed("0xA", base + 11 * MINUTE), base + 11 * MINUTE);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].results[0].get("count"), Some(&json!(4)));

        let fired = engine.process_alert_at(failed("0xA", base + 12 * MINUTE), base + 12 * MINUTE);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].results[0].severity, Severity::High);
        assert_eq!(fired[0].results[0].get("count"), Some(&json!(5)));
    }

    #[test]
    fn test_dedup_within_cooldown_then_refire() {
        let engine = CorrelationEngine::new(24 * HOUR, HOUR);
        engine
            .add_rule(
                CustomRule::new("cpu", 24 * HOUR, Severity::High)
                    .with_predicate(AlertPredicate::TypeIs("High CPU Usage".to_string())),
            )
            .unwrap();

        let t0 = 10 * HOUR;
        assert_eq!(engine.process_alert_at(other("High CPU Usage", t0), t0).len(), 1);

        // Identical result set within the cooldown
        let fired = engine.process_alert_at(other("Noise", t0 + MINUTE), t0 + MINUTE);
        assert!(fired.is_empty());
        assert_eq!(engine.active_correlations().len(), 1);

        // Past the cooldown the same key may fire again
        let fired = engine.process_alert_at(other("Noise", t0 + HOUR + 1), t0 + HOUR + 1);
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn test_failing_rules_are_isolated() {
        let engine = CorrelationEngine::new(24 * HOUR, HOUR);
        engine.add_rule(FailingRule).unwrap();
        engine.add_rule(PanickingRule).unwrap();
        engine
            .add_rule(
                CustomRule::new("disk", HOUR, Severity::Medium)
                    .with_predicate(AlertPredicate::TypeIs("High Disk Usage".to_string())),
            )
            .unwrap();

        let now = 5 * HOUR;
        let fired = engine.process_alert_at(other("High Disk Usage", now), now);

        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].rule, "disk");
        assert_eq!(engine.history_len(), 1);
    }

    #[test]
    fn test_panicking_action_still_records_key() {
        let engine = CorrelationEngine::new(24 * HOUR, HOUR);
        engine
            .add_rule(
                CustomRule::new("explode", HOUR, Severity::Low)
                    .on_fire(|_| panic!("callback exploded")),
            )
            .unwrap();

        let now = 5 * HOUR;
        let fired = engine.process_alert_at(other("Anything", now), now);
        assert_eq!(fired.len(), 1);
        assert!(fired[0].alerts.is_empty());
        assert_eq!(engine.active_correlations()[0].key, fired[0].key);
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let engine = CorrelationEngine::with_builtin_rules(HOUR, HOUR);
        assert!(matches!(
            engine.add_rule(crate::correlation::BuiltinRule::SystemHealth),
            Err(RuleError::Duplicate(_))
        ));
        assert_eq!(
            engine.rule_names(),
            vec![
                "repeated-failures",
                "bridge-congestion",
                "security-incident",
                "system-health"
            ]
        );
    }

    #[test]
    fn test_patterns_and_sweep() {
        let engine = CorrelationEngine::new(HOUR, HOUR);
        engine.process_alert_at(failed("0xA", 0), 0);
        engine.process_alert_at(failed("0xA", 10), 10);

        let patterns = engine.alert_patterns();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].count, 2);

        let stats = engine.sweep(2 * HOUR);
        assert_eq!(stats.history_pruned, 2);
        assert_eq!(engine.history_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_removal_is_scheduled() {
        let engine = CorrelationEngine::new(24 * HOUR, 1_000);
        engine
            .add_rule(
                CustomRule::new("cpu", 24 * HOUR, Severity::High)
                    .with_predicate(AlertPredicate::TypeIs("High CPU Usage".to_string())),
            )
            .unwrap();

        let now = 10 * HOUR;
        assert_eq!(engine.process_alert_at(other("High CPU Usage", now), now).len(), 1);
        assert_eq!(engine.active_correlations().len(), 1);

        // No further alerts arrive; the timer alone clears the key
        tokio::time::sleep(Duration::from_millis(1_001)).await;
        assert!(engine.active_correlations().is_empty());
    }
}
