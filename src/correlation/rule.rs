//! Correlation rule contract

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::alerts::{AlertData, HistoryStore, RawAlert, Severity};

/// One match computed by a rule's condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub severity: Severity,
    #[serde(flatten)]
    pub payload: Map<String, JsonValue>,
}

impl CorrelationResult {
    pub fn new(severity: Severity) -> Self {
        Self {
            severity,
            payload: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.payload.get(key)
    }

    /// Payload plus severity as alert data
    pub fn to_alert_data(&self) -> AlertData {
        let mut data = AlertData::from(self.payload.clone());
        data.insert("severity", self.severity.as_str());
        data
    }
}

/// A named pattern detector evaluated over the alert history.
///
/// `condition` must be free of side effects. `action` turns a non-empty result
/// set into the higher-level alerts the engine escalates. Both run while the
/// correlation engine holds its lock, so neither may call back into the engine.
pub trait CorrelationRule: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Evaluate the rule against the history as of `now` (unix millis)
    fn condition(
        &self,
        history: &HistoryStore,
        now: i64,
    ) -> Result<Vec<CorrelationResult>, RuleError>;

    /// Build the alerts to emit for a firing
    fn action(&self, results: &[CorrelationResult], now: i64) -> Result<Vec<RawAlert>, RuleError> {
        let severity = most_urgent(results);
        let data = AlertData::new()
            .with("rule", self.name())
            .with("description", self.description())
            .with("matches", results.len())
            .with(
                "results",
                serde_json::to_value(results).map_err(|e| RuleError::Action(e.to_string()))?,
            )
            .with("severity", severity.as_str());

        Ok(vec![
            RawAlert::new(format!("Correlated: {}", self.name()), data).at(now)
        ])
    }
}

/// Deduplication identity of a rule firing
pub fn correlation_key(rule: &str, results: &[CorrelationResult]) -> String {
    format!(
        "{}-{}",
        rule,
        serde_json::to_string(results).unwrap_or_default()
    )
}

/// Most urgent severity among results, `low` when empty
pub fn most_urgent(results: &[CorrelationResult]) -> Severity {
    results
        .iter()
        .map(|r| r.severity)
        .min()
        .unwrap_or(Severity::Low)
}

/// Rule failures, contained per rule by the engine
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Condition failed: {0}")]
    Condition(String),

    #[error("Action failed: {0}")]
    Action(String),

    #[error("Rule panicked: {0}")]
    Panicked(String),

    #[error("Invalid rule definition: {0}")]
    InvalidDefinition(String),

    #[error("Rule '{0}' is already registered")]
    Duplicate(String),
}
