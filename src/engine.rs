//! Alert engine
//!
//! Wires the pipeline together: producers hand alerts to [`AlertEngine`],
//! which normalizes them, appends them to history, evaluates correlation
//! rules and opens escalation campaigns for raw and derived alerts.
//!
//! The engine is constructed once by the process entry point and shared as
//! `Arc<AlertEngine>` with the HTTP API, the Kafka intake and the retention
//! worker.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alerts::{normalize, AlertData, AlertPattern, AlertRecord, RawAlert};
use crate::config::{load_rule_definitions, ConfigError, EngineConfig};
use crate::correlation::{
    ActiveCorrelation, Correlation, CorrelationEngine, CorrelationRule, RuleDefinition, RuleError,
    SweepStats,
};
use crate::escalation::{
    AlertInstance, EscalationManager, EscalationStats, EscalationStatus, LifecycleError, Opened,
};
use crate::notify::Dispatcher;

/// What happened to one submitted alert
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub record: AlertRecord,
    /// Instance opened for, or absorbing, the raw alert
    pub instance: Option<Opened>,
    pub correlations: Vec<Correlation>,
    /// Instances opened for alerts derived by correlation actions
    pub derived: Vec<Opened>,
}

/// Engine-wide counters
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub started_at: DateTime<Utc>,
    pub alerts_received: u64,
    pub correlations_fired: u64,
    pub history_size: usize,
    pub patterns: u64,
    pub active_correlations: usize,
    pub rules: usize,
    pub escalation: EscalationStats,
}

pub struct AlertEngine {
    correlation: CorrelationEngine,
    escalation: EscalationManager,
    escalate_raw_alerts: bool,
    started_at: DateTime<Utc>,
    alerts_received: AtomicU64,
    correlations_fired: AtomicU64,
}

impl AlertEngine {
    /// Engine with built-in rules and channels built from `config`
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        Self::new(config, Dispatcher::from_config(&config.channels))
    }

    /// Engine with built-in rules, rules from `config.rules_file`, and the
    /// given dispatcher
    pub fn new(config: &EngineConfig, dispatcher: Dispatcher) -> Result<Self, ConfigError> {
        let engine = Self {
            correlation: CorrelationEngine::with_builtin_rules(
                config.history_retention_ms,
                config.correlation_cooldown_ms,
            ),
            escalation: EscalationManager::build(
                config.policies.clone(),
                dispatcher,
                config.archive_capacity,
            ),
            escalate_raw_alerts: config.escalate_raw_alerts,
            started_at: Utc::now(),
            alerts_received: AtomicU64::new(0),
            correlations_fired: AtomicU64::new(0),
        };

        if let Some(path) = &config.rules_file {
            for definition in load_rule_definitions(path)? {
                engine
                    .add_definition(&definition)
                    .map_err(|source| ConfigError::InvalidRule {
                        path: path.clone(),
                        source,
                    })?;
            }
            tracing::info!(path = ?path, rules = engine.correlation.rule_names().len(), "Loaded rules file");
        }

        Ok(engine)
    }

    pub fn correlation(&self) -> &CorrelationEngine {
        &self.correlation
    }

    pub fn escalation(&self) -> &EscalationManager {
        &self.escalation
    }

    /// Producer entry point
    pub async fn submit_alert(&self, alert_type: impl Into<String>, data: AlertData) -> SubmitOutcome {
        self.process_alert(RawAlert::new(alert_type, data)).await
    }

    /// Run one alert through normalization, correlation and escalation
    pub async fn process_alert(&self, raw: RawAlert) -> SubmitOutcome {
        let now = Utc::now().timestamp_millis();
        let record = normalize(raw, now);
        self.alerts_received.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            alert_type = %record.alert_type,
            severity = %record.severity(),
            "Processing alert"
        );

        let correlations = self.correlation.process_alert_at(record.clone(), now);
        self.correlations_fired
            .fetch_add(correlations.len() as u64, Ordering::Relaxed);

        let instance = if self.escalate_raw_alerts {
            Some(self.escalation.open(record.clone()).await)
        } else {
            None
        };

        let mut derived = Vec::new();
        for correlation in &correlations {
            for alert in &correlation.alerts {
                let derived_record = normalize(alert.clone(), now);
                tracing::info!(
                    rule = %correlation.rule,
                    alert_type = %derived_record.alert_type,
                    severity = %derived_record.severity(),
                    "Correlated alert raised"
                );
                derived.push(self.escalation.open(derived_record).await);
            }
        }

        SubmitOutcome {
            record,
            instance,
            correlations,
            derived,
        }
    }

    pub fn add_rule(&self, rule: impl CorrelationRule + 'static) -> Result<(), RuleError> {
        self.correlation.add_rule(rule)
    }

    /// Compile and register a declarative rule
    pub fn add_definition(&self, definition: &RuleDefinition) -> Result<(), RuleError> {
        self.correlation.add_rule(definition.compile()?)
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.correlation.rule_names()
    }

    pub async fn acknowledge(&self, id: &str) -> Result<AlertInstance, LifecycleError> {
        self.escalation.acknowledge(id).await
    }

    pub async fn resolve(&self, id: &str) -> Result<AlertInstance, LifecycleError> {
        self.escalation.resolve(id).await
    }

    /// Returns false for unknown or resolved ids
    pub async fn acknowledge_alert(&self, id: &str) -> bool {
        self.acknowledge(id).await.is_ok()
    }

    /// Returns false for unknown or already resolved ids
    pub async fn resolve_alert(&self, id: &str) -> bool {
        self.resolve(id).await.is_ok()
    }

    pub fn get_alert(&self, id: &str) -> Option<AlertInstance> {
        self.escalation.get(id)
    }

    pub fn get_active_alerts(&self) -> Vec<AlertInstance> {
        self.escalation.active_alerts()
    }

    pub fn get_alert_history(&self) -> Vec<AlertInstance> {
        self.escalation.alert_history()
    }

    pub fn get_escalation_status(&self, id: &str) -> Option<EscalationStatus> {
        self.escalation.escalation_status(id)
    }

    pub fn get_active_correlations(&self) -> Vec<ActiveCorrelation> {
        self.correlation.active_correlations()
    }

    pub fn get_alert_patterns(&self) -> Vec<AlertPattern> {
        self.correlation.alert_patterns()
    }

    /// Prune history, drop expired correlation keys and archive resolved
    /// instances older than `archive_after_ms`
    pub fn run_maintenance(&self, archive_after_ms: i64) -> MaintenanceStats {
        let now = Utc::now();
        let sweep = self.correlation.sweep(now.timestamp_millis());
        let cutoff = now - chrono::Duration::milliseconds(archive_after_ms);
        MaintenanceStats {
            sweep,
            instances_archived: self.escalation.archive_resolved(cutoff),
        }
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            started_at: self.started_at,
            alerts_received: self.alerts_received.load(Ordering::Relaxed),
            correlations_fired: self.correlations_fired.load(Ordering::Relaxed),
            history_size: self.correlation.history_len(),
            patterns: self.correlation.pattern_count(),
            active_correlations: self.correlation.active_correlations().len(),
            rules: self.correlation.rule_names().len(),
            escalation: self.escalation.stats(),
        }
    }

    /// Stop all escalation timers
    pub fn shutdown(&self) {
        self.escalation.shutdown();
    }
}

/// Counts from one maintenance pass
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MaintenanceStats {
    #[serde(flatten)]
    pub sweep: SweepStats,
    pub instances_archived: usize,
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::*;
    use crate::alerts::{HistoryStore, Severity};
    use crate::correlation::{CorrelationResult, CustomRule};
    use crate::notify::channel::testing::RecordingChannel;
    use crate::notify::ChannelKind;

    fn engine_with(config: &EngineConfig) -> (AlertEngine, RecordingChannel, RecordingChannel, RecordingChannel) {
        let chat = RecordingChannel::new();
        let email = RecordingChannel::new();
        let paging = RecordingChannel::new();
        let dispatcher = Dispatcher::new()
            .with_channel(ChannelKind::Chat, chat.clone())
            .with_channel(ChannelKind::Email, email.clone())
            .with_channel(ChannelKind::Paging, paging.clone());
        let engine = AlertEngine::new(config, dispatcher).unwrap();
        (engine, chat, email, paging)
    }

    fn failure_from(from: &str) -> AlertData {
        AlertData::new().with("from", from).with("severity", "medium")
    }

    #[tokio::test]
    async fn test_submit_defaults_and_dedups_raw_alert() {
        let (engine, chat, _, _) = engine_with(&EngineConfig::default());

        let first = engine.submit_alert("Ping", AlertData::new()).await;
        assert_eq!(first.record.severity(), Severity::Low);
        let opened = first.instance.unwrap();
        assert!(opened.created);

        let second = engine.submit_alert("Ping", AlertData::new()).await;
        assert_eq!(second.instance.unwrap().id, opened.id);
        assert_eq!(engine.get_alert(&opened.id).unwrap().occurrences, 2);
        assert_eq!(chat.count(), 1);
        assert_eq!(engine.stats().alerts_received, 2);
    }

    #[tokio::test]
    async fn test_repeated_failures_open_derived_instances() {
        let config = EngineConfig {
            escalate_raw_alerts: false,
            ..EngineConfig::default()
        };
        let (engine, _, _, _) = engine_with(&config);

        for _ in 0..2 {
            let outcome = engine.submit_alert("Transfer Failed", failure_from("0xabc")).await;
            assert!(outcome.correlations.is_empty());
            assert!(outcome.instance.is_none());
        }

        let third = engine.submit_alert("Transfer Failed", failure_from("0xabc")).await;
        assert_eq!(third.correlations.len(), 1);
        assert_eq!(third.correlations[0].rule, "repeated-failures");
        assert_eq!(third.derived.len(), 1);

        let instance = engine.get_alert(&third.derived[0].id).unwrap();
        assert_eq!(instance.alert.alert_type, "Repeated Transfer Failures");
        assert_eq!(instance.severity, Severity::Medium);
        assert_eq!(engine.get_active_correlations().len(), 1);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_failing_rule_does_not_block_others() {
        struct Broken;
        impl CorrelationRule for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            fn condition(&self, _: &HistoryStore, _: i64) -> Result<Vec<CorrelationResult>, RuleError> {
                Err(RuleError::Condition("always".to_string()))
            }
        }

        let (engine, _, _, _) = engine_with(&EngineConfig::default());
        engine.add_rule(Broken).unwrap();
        engine
            .add_rule(CustomRule::new("any-alert", 60_000, Severity::Low))
            .unwrap();

        let outcome = engine.submit_alert("Ping", AlertData::new()).await;
        assert!(outcome.correlations.iter().any(|c| c.rule == "any-alert"));
        assert_eq!(engine.correlation().history_len(), 1);
        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_surface() {
        let (engine, _, email, paging) = engine_with(&EngineConfig::default());
        let outcome = engine
            .submit_alert("Stuck Transfer", AlertData::new().with("severity", "critical"))
            .await;
        let id = outcome.instance.unwrap().id;

        tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
        assert_eq!(engine.get_escalation_status(&id).unwrap().escalation_level, 1);
        assert_eq!(email.count(), 1);

        assert!(engine.acknowledge_alert(&id).await);
        tokio::time::sleep(Duration::from_secs(30 * 60)).await;
        assert_eq!(paging.count(), 0);

        assert!(engine.resolve_alert(&id).await);
        assert!(!engine.resolve_alert(&id).await);
        assert!(!engine.acknowledge_alert("alert-unknown").await);
        assert!(engine.get_escalation_status("alert-unknown").is_none());
        assert!(engine.get_active_alerts().is_empty());
        assert_eq!(engine.get_alert_history().len(), 1);
    }

    #[tokio::test]
    async fn test_rules_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name": "gas-spike", "window_ms": 600000, "min_count": 2,
                "filters": [{{"kind": "type", "value": "HighGasPrice"}}]}}]"#
        )
        .unwrap();

        let config = EngineConfig {
            rules_file: Some(file.path().to_path_buf()),
            escalate_raw_alerts: false,
            ..EngineConfig::default()
        };
        let (engine, _, _, _) = engine_with(&config);
        assert!(engine.rule_names().contains(&"gas-spike".to_string()));

        engine.submit_alert("HighGasPrice", AlertData::new()).await;
        let outcome = engine.submit_alert("HighGasPrice", AlertData::new()).await;
        assert_eq!(outcome.correlations.len(), 1);
        assert_eq!(outcome.derived.len(), 1);
    }

    #[test]
    fn test_invalid_rules_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"name": "bad", "window_ms": 0}}]"#).unwrap();

        let config = EngineConfig {
            rules_file: Some(file.path().to_path_buf()),
            ..EngineConfig::default()
        };
        let result = AlertEngine::new(&config, Dispatcher::new());
        assert!(matches!(result, Err(ConfigError::InvalidRule { .. })));
    }

    #[test]
    fn test_maintenance_archives_resolved() {
        let (engine, _, _, _) = engine_with(&EngineConfig::default());
        let outcome = tokio_test::block_on(engine.submit_alert("Ping", AlertData::new()));
        let id = outcome.instance.unwrap().id;
        assert!(tokio_test::block_on(engine.resolve_alert(&id)));

        let stats = engine.run_maintenance(-1_000);
        assert_eq!(stats.instances_archived, 1);
        assert_eq!(engine.stats().escalation.archived, 1);
        assert!(engine.get_alert(&id).is_some());
    }
}
