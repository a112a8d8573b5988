//! Declarative custom rules
//!
//! A custom rule counts the alerts inside a time window that satisfy every
//! predicate and fires when the count lands within `[min_count, max_count]`.
//! Rules can be built in code (with closure predicates and an extra action
//! callback) or loaded from a JSON [`RuleDefinition`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::rule::{most_urgent, CorrelationResult, CorrelationRule, RuleError};
use crate::alerts::{AlertData, AlertRecord, HistoryStore, RawAlert, Severity};

/// Callback invoked after a custom rule's alert has been emitted
pub type FireCallback = Arc<dyn Fn(&[CorrelationResult]) + Send + Sync>;

/// Per-alert filter; all predicates of a rule must hold for an alert to count
#[derive(Clone)]
pub enum AlertPredicate {
    TypeIs(String),
    TypeIn(Vec<String>),
    TypeMatches(Regex),
    FieldEquals { key: String, value: JsonValue },
    FieldPresent(String),
    /// At least this urgent
    MinSeverity(Severity),
    Custom(Arc<dyn Fn(&AlertRecord) -> bool + Send + Sync>),
}

impl AlertPredicate {
    pub fn custom(f: impl Fn(&AlertRecord) -> bool + Send + Sync + 'static) -> Self {
        AlertPredicate::Custom(Arc::new(f))
    }

    pub fn matches(&self, record: &AlertRecord) -> bool {
        match self {
            AlertPredicate::TypeIs(t) => record.alert_type == *t,
            AlertPredicate::TypeIn(types) => types.iter().any(|t| *t == record.alert_type),
            AlertPredicate::TypeMatches(re) => re.is_match(&record.alert_type),
            AlertPredicate::FieldEquals { key, value } => record.data.get(key) == Some(value),
            AlertPredicate::FieldPresent(key) => record.data.contains_key(key),
            AlertPredicate::MinSeverity(min) => record.severity() <= *min,
            AlertPredicate::Custom(f) => f(record),
        }
    }
}

impl fmt::Debug for AlertPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertPredicate::TypeIs(t) => write!(f, "TypeIs({:?})", t),
            AlertPredicate::TypeIn(types) => write!(f, "TypeIn({:?})", types),
            AlertPredicate::TypeMatches(re) => write!(f, "TypeMatches({:?})", re.as_str()),
            AlertPredicate::FieldEquals { key, value } => {
                write!(f, "FieldEquals({:?} == {})", key, value)
            }
            AlertPredicate::FieldPresent(key) => write!(f, "FieldPresent({:?})", key),
            AlertPredicate::MinSeverity(s) => write!(f, "MinSeverity({})", s),
            AlertPredicate::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Windowed count rule built from the declarative shorthand
pub struct CustomRule {
    name: String,
    description: String,
    window_ms: i64,
    min_count: usize,
    max_count: Option<usize>,
    predicates: Vec<AlertPredicate>,
    severity: Severity,
    on_fire: Option<FireCallback>,
}

impl CustomRule {
    pub fn new(name: impl Into<String>, window_ms: i64, severity: Severity) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            window_ms,
            min_count: 1,
            max_count: None,
            predicates: Vec::new(),
            severity,
            on_fire: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_min_count(mut self, min_count: usize) -> Self {
        self.min_count = min_count;
        self
    }

    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = Some(max_count);
        self
    }

    pub fn with_predicate(mut self, predicate: AlertPredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Extra callback run after the rule's alert is emitted
    pub fn on_fire(mut self, callback: impl Fn(&[CorrelationResult]) + Send + Sync + 'static) -> Self {
        self.on_fire = Some(Arc::new(callback));
        self
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    pub fn predicates(&self) -> &[AlertPredicate] {
        &self.predicates
    }
}

impl fmt::Debug for CustomRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomRule")
            .field("name", &self.name)
            .field("window_ms", &self.window_ms)
            .field("min_count", &self.min_count)
            .field("max_count", &self.max_count)
            .field("predicates", &self.predicates)
            .field("severity", &self.severity)
            .finish()
    }
}

impl CorrelationRule for CustomRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn condition(
        &self,
        history: &HistoryStore,
        now: i64,
    ) -> Result<Vec<CorrelationResult>, RuleError> {
        let matching: Vec<&AlertRecord> = history
            .within(self.window_ms, now)
            .filter(|r| self.predicates.iter().all(|p| p.matches(r)))
            .collect();

        let count = matching.len();
        if count < self.min_count || self.max_count.is_some_and(|max| count > max) {
            return Ok(Vec::new());
        }

        let types: BTreeSet<&str> = matching.iter().map(|r| r.alert_type.as_str()).collect();
        Ok(vec![CorrelationResult::new(self.severity)
            .with("count", count)
            .with("description", self.description.as_str())
            .with("types", types.into_iter().collect::<Vec<_>>())])
    }

    fn action(&self, results: &[CorrelationResult], now: i64) -> Result<Vec<RawAlert>, RuleError> {
        let data = AlertData::new()
            .with("rule", self.name.as_str())
            .with("description", self.description.as_str())
            .with(
                "count",
                results
                    .first()
                    .and_then(|r| r.get("count"))
                    .cloned()
                    .unwrap_or_default(),
            )
            .with("severity", most_urgent(results).as_str());

        let alerts = vec![RawAlert::new(format!("Correlated: {}", self.name), data).at(now)];

        if let Some(callback) = &self.on_fire {
            callback(results);
        }

        Ok(alerts)
    }
}

/// JSON form of a custom rule, used by the rules file and the HTTP API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub window_ms: i64,
    #[serde(default = "default_min_count")]
    pub min_count: usize,
    #[serde(default)]
    pub max_count: Option<usize>,
    #[serde(default)]
    pub filters: Vec<FilterDefinition>,
    #[serde(default)]
    pub severity: Severity,
}

fn default_min_count() -> usize {
    1
}

/// JSON form of an [`AlertPredicate`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterDefinition {
    Type { value: String },
    TypeIn { values: Vec<String> },
    TypeMatches { pattern: String },
    FieldEquals { key: String, value: JsonValue },
    FieldPresent { key: String },
    MinSeverity { severity: Severity },
}

impl FilterDefinition {
    fn compile(&self) -> Result<AlertPredicate, RuleError> {
        Ok(match self {
            FilterDefinition::Type { value } => AlertPredicate::TypeIs(value.clone()),
            FilterDefinition::TypeIn { values } => AlertPredicate::TypeIn(values.clone()),
            FilterDefinition::TypeMatches { pattern } => AlertPredicate::TypeMatches(
                Regex::new(pattern)
                    .map_err(|e| RuleError::InvalidDefinition(format!("bad pattern '{}': {}", pattern, e)))?,
            ),
            FilterDefinition::FieldEquals { key, value } => AlertPredicate::FieldEquals {
                key: key.clone(),
                value: value.clone(),
            },
            FilterDefinition::FieldPresent { key } => AlertPredicate::FieldPresent(key.clone()),
            FilterDefinition::MinSeverity { severity } => AlertPredicate::MinSeverity(*severity),
        })
    }
}

impl RuleDefinition {
    /// Validate and build the rule
    pub fn compile(&self) -> Result<CustomRule, RuleError> {
        if self.name.trim().is_empty() {
            return Err(RuleError::InvalidDefinition("name must not be empty".to_string()));
        }
        if self.window_ms <= 0 {
            return Err(RuleError::InvalidDefinition(format!(
                "window_ms must be positive, got {}",
                self.window_ms
            )));
        }
        if let Some(max) = self.max_count {
            if max < self.min_count {
                return Err(RuleError::InvalidDefinition(format!(
                    "max_count {} is below min_count {}",
                    max, self.min_count
                )));
            }
        }

        let mut rule = CustomRule::new(self.name.trim(), self.window_ms, self.severity)
            .with_description(self.description.clone())
            .with_min_count(self.min_count);
        if let Some(max) = self.max_count {
            rule = rule.with_max_count(max);
        }
        for filter in &self.filters {
            rule = rule.with_predicate(filter.compile()?);
        }
        Ok(rule)
    }
}
