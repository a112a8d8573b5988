//! Built-in correlation rules

use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;

use super::rule::{CorrelationResult, CorrelationRule, RuleError};
use crate::alerts::{HistoryStore, RawAlert, Severity};

const MINUTE_MS: i64 = 60 * 1000;

const BRIDGE_TYPES: &[&str] = &["High Pending Transfers", "High Completion Time", "Stuck Transfer"];
const SECURITY_TYPES: &[&str] = &[
    "Large Transfer Detected",
    "Suspicious Repeated Calls",
    "Contract Deployment",
];
const SYSTEM_TYPES: &[&str] = &[
    "High CPU Usage",
    "High Memory Usage",
    "High Disk Usage",
    "API Error Rate High",
];

/// The rules every engine starts with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinRule {
    /// Three or more failed transfers from one address within an hour
    RepeatedFailures,
    /// Three or more bridge slowdown alerts within 15 minutes
    BridgeCongestion,
    /// Two or more security alerts around at most two addresses within 5 minutes
    SecurityIncident,
    /// Two or more resource alerts within 10 minutes
    SystemHealth,
}

impl BuiltinRule {
    pub const ALL: [BuiltinRule; 4] = [
        BuiltinRule::RepeatedFailures,
        BuiltinRule::BridgeCongestion,
        BuiltinRule::SecurityIncident,
        BuiltinRule::SystemHealth,
    ];

    pub fn window_ms(self) -> i64 {
        match self {
            BuiltinRule::RepeatedFailures => 60 * MINUTE_MS,
            BuiltinRule::BridgeCongestion => 15 * MINUTE_MS,
            BuiltinRule::SecurityIncident => 5 * MINUTE_MS,
            BuiltinRule::SystemHealth => 10 * MINUTE_MS,
        }
    }

    fn repeated_failures(history: &HistoryStore, now: i64, window: i64) -> Vec<CorrelationResult> {
        let mut by_address: BTreeMap<&str, u64> = BTreeMap::new();
        for record in history
            .within(window, now)
            .filter(|r| r.alert_type == "Transfer Failed")
        {
            if let Some(from) = record.data.from_address() {
                *by_address.entry(from).or_insert(0) += 1;
            }
        }

        by_address
            .into_iter()
            .filter(|(_, count)| *count >= 3)
            .map(|(address, count)| {
                let severity = if count >= 5 {
                    Severity::High
                } else {
                    Severity::Medium
                };
                CorrelationResult::new(severity)
                    .with("address", address)
                    .with("count", count)
            })
            .collect()
    }

    fn bridge_congestion(history: &HistoryStore, now: i64, window: i64) -> Vec<CorrelationResult> {
        let matching: Vec<_> = history
            .within(window, now)
            .filter(|r| BRIDGE_TYPES.contains(&r.alert_type.as_str()))
            .collect();

        if matching.len() < 3 {
            return Vec::new();
        }

        let count = matching.len();
        let types: BTreeSet<&str> = matching.iter().map(|r| r.alert_type.as_str()).collect();
        let severity = if count >= 5 {
            Severity::Critical
        } else {
            Severity::High
        };

        vec![CorrelationResult::new(severity)
            .with("count", count)
            .with("types", types.into_iter().collect::<Vec<_>>())]
    }

    fn security_incident(history: &HistoryStore, now: i64, window: i64) -> Vec<CorrelationResult> {
        let related: Vec<_> = history
            .within(window, now)
            .filter(|r| SECURITY_TYPES.contains(&r.alert_type.as_str()))
            .collect();

        let addresses: BTreeSet<&str> = related
            .iter()
            .filter_map(|r| r.data.from_address().or_else(|| r.data.recipient()))
            .collect();

        if related.len() < 2 || addresses.len() > 2 {
            return Vec::new();
        }

        let alerts: Vec<_> = related
            .iter()
            .map(|r| json!({ "type": r.alert_type, "timestamp": r.timestamp }))
            .collect();

        vec![CorrelationResult::new(Severity::Critical)
            .with("alerts", alerts)
            .with("addresses", addresses.into_iter().collect::<Vec<_>>())]
    }

    fn system_health(history: &HistoryStore, now: i64, window: i64) -> Vec<CorrelationResult> {
        let matching: Vec<_> = history
            .within(window, now)
            .filter(|r| SYSTEM_TYPES.contains(&r.alert_type.as_str()))
            .collect();

        if matching.len() < 2 {
            return Vec::new();
        }

        let count = matching.len();
        let types: BTreeSet<&str> = matching.iter().map(|r| r.alert_type.as_str()).collect();
        let severity = if count >= 3 {
            Severity::Critical
        } else {
            Severity::High
        };

        vec![CorrelationResult::new(severity)
            .with("count", count)
            .with("types", types.into_iter().collect::<Vec<_>>())]
    }
}

impl CorrelationRule for BuiltinRule {
    fn name(&self) -> &str {
        match self {
            BuiltinRule::RepeatedFailures => "repeated-failures",
            BuiltinRule::BridgeCongestion => "bridge-congestion",
            BuiltinRule::SecurityIncident => "security-incident",
            BuiltinRule::SystemHealth => "system-health",
        }
    }

    fn description(&self) -> &str {
        match self {
            BuiltinRule::RepeatedFailures => "Repeated transfer failures from the same address",
            BuiltinRule::BridgeCongestion => "Bridge congestion across pending, slow and stuck transfers",
            BuiltinRule::SecurityIncident => "Clustered security signals around a small set of addresses",
            BuiltinRule::SystemHealth => "Multiple infrastructure resource alerts",
        }
    }

    fn condition(
        &self,
        history: &HistoryStore,
        now: i64,
    ) -> Result<Vec<CorrelationResult>, RuleError> {
        let window = self.window_ms();
        Ok(match self {
            BuiltinRule::RepeatedFailures => Self::repeated_failures(history, now, window),
            BuiltinRule::BridgeCongestion => Self::bridge_congestion(history, now, window),
            BuiltinRule::SecurityIncident => Self::security_incident(history, now, window),
            BuiltinRule::SystemHealth => Self::system_health(history, now, window),
        })
    }

    fn action(&self, results: &[CorrelationResult], now: i64) -> Result<Vec<RawAlert>, RuleError> {
        let alerts = results
            .iter()
            .map(|result| {
                let (alert_type, message) = match self {
                    BuiltinRule::RepeatedFailures => (
                        "Repeated Transfer Failures",
                        format!(
                            "{} failed transfers from {} within the last hour",
                            result.get("count").cloned().unwrap_or_default(),
                            result
                                .get("address")
                                .and_then(|a| a.as_str())
                                .unwrap_or("unknown address")
                        ),
                    ),
                    BuiltinRule::BridgeCongestion => (
                        "Bridge Congestion Detected",
                        format!(
                            "{} bridge slowdown alerts within 15 minutes",
                            result.get("count").cloned().unwrap_or_default()
                        ),
                    ),
                    BuiltinRule::SecurityIncident => (
                        "Potential Security Incident",
                        "Multiple security alerts involving the same addresses".to_string(),
                    ),
                    BuiltinRule::SystemHealth => (
                        "System Health Degradation",
                        format!(
                            "{} resource alerts within 10 minutes",
                            result.get("count").cloned().unwrap_or_default()
                        ),
                    ),
                };

                let mut data = result.to_alert_data();
                data.insert("rule", self.name());
                data.insert("message", message);
                RawAlert::new(alert_type, data).at(now)
            })
            .collect();

        Ok(alerts)
    }
}

/// Built-in rules in registration order
pub fn builtin_rules() -> Vec<BuiltinRule> {
    BuiltinRule::ALL.to_vec()
}
