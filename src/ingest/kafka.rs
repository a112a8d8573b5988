//! Kafka consumer for durable alert intake
//!
//! Consumes alert messages from Kafka topics and feeds them to the engine.
//! On restart, resumes from the last committed offset for recovery.
//!
//! ## Message Format
//!
//! Single alert:
//! ```json
//! {"type": "Transfer Failed", "data": {"from": "0xabc", "severity": "medium"}}
//! ```
//!
//! Batch format:
//! ```json
//! {"alerts": [{"type": "High CPU Usage", "data": {"severity": "high"}}]}
//! ```
//!
//! A single message without `type` takes the topic name as its type.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `KAFKA_BROKERS`: Comma-separated list of brokers (default: localhost:9092)
//! - `KAFKA_TOPICS`: Comma-separated list of topics to consume
//! - `KAFKA_GROUP_ID`: Consumer group ID (default: klaxon)
//! - `KAFKA_AUTO_OFFSET_RESET`: Where to start if no offset (earliest/latest, default: earliest)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;

use crate::alerts::RawAlert;
use crate::engine::AlertEngine;

/// Kafka consumer configuration
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Kafka broker addresses
    pub brokers: String,
    /// Topics to consume from
    pub topics: Vec<String>,
    /// Consumer group ID
    pub group_id: String,
    /// Auto offset reset (earliest or latest)
    pub auto_offset_reset: String,
    /// Enable auto commit (default: false for at-least-once)
    pub enable_auto_commit: bool,
    /// Session timeout in ms
    pub session_timeout_ms: u32,
    /// Max poll interval in ms
    pub max_poll_interval_ms: u32,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topics: vec![],
            group_id: "klaxon".to_string(),
            auto_offset_reset: "earliest".to_string(),
            enable_auto_commit: false,
            session_timeout_ms: 30000,
            max_poll_interval_ms: 300000,
        }
    }
}

impl KafkaConfig {
    /// Create config from environment variables; `None` when no topics are set
    pub fn from_env() -> Option<Self> {
        let topics = std::env::var("KAFKA_TOPICS").ok()?;
        let topics: Vec<String> = topics
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if topics.is_empty() {
            return None;
        }

        let defaults = Self::default();
        Some(Self {
            brokers: std::env::var("KAFKA_BROKERS").unwrap_or(defaults.brokers),
            topics,
            group_id: std::env::var("KAFKA_GROUP_ID").unwrap_or(defaults.group_id),
            auto_offset_reset: std::env::var("KAFKA_AUTO_OFFSET_RESET")
                .unwrap_or(defaults.auto_offset_reset),
            ..defaults
        })
    }
}

/// Statistics from Kafka consumer
#[derive(Debug, Clone, Default)]
pub struct KafkaStats {
    pub messages_received: u64,
    pub messages_processed: u64,
    pub alerts_submitted: u64,
    pub errors: u64,
    pub last_offset: HashMap<String, i64>,
}

/// Kafka consumer feeding alerts into the engine
pub struct KafkaConsumer {
    config: KafkaConfig,
    engine: Arc<AlertEngine>,
    consumer: StreamConsumer,
    stats: Arc<RwLock<KafkaStats>>,
}

impl KafkaConsumer {
    /// Create a new Kafka consumer
    pub fn new(config: KafkaConfig, engine: Arc<AlertEngine>) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", config.enable_auto_commit.to_string())
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("max.poll.interval.ms", config.max_poll_interval_ms.to_string())
            .create()?;

        Ok(Self {
            config,
            engine,
            consumer,
            stats: Arc::new(RwLock::new(KafkaStats::default())),
        })
    }

    /// Subscribe to configured topics
    pub fn subscribe(&self) -> Result<(), KafkaError> {
        let topics: Vec<&str> = self.config.topics.iter().map(|s| s.as_str()).collect();
        self.consumer.subscribe(&topics)?;
        tracing::info!("Subscribed to Kafka topics: {:?}", self.config.topics);
        Ok(())
    }

    /// Shared view of the consumer statistics
    pub fn stats(&self) -> Arc<RwLock<KafkaStats>> {
        Arc::clone(&self.stats)
    }

    /// Start consuming in background. Abort the handle to stop.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let consumer = self.consumer;
        let engine = self.engine;
        let stats = self.stats;

        tokio::spawn(async move {
            tracing::info!("Kafka consumer started");

            loop {
                let message = match consumer.recv().await {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::error!(error = %e, "Kafka receive error");
                        // Back off on error
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                };

                let topic = message.topic().to_string();
                let partition = message.partition();
                let offset = message.offset();
                stats.write().messages_received += 1;

                let Some(payload) = message.payload() else {
                    continue;
                };

                match parse_message(&topic, payload) {
                    Ok(alerts) => {
                        let count = alerts.len();
                        for alert in alerts {
                            engine.process_alert(alert).await;
                        }

                        // Commit offset after the alerts are in the engine
                        if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                            tracing::error!(
                                topic = %topic,
                                partition = partition,
                                offset = offset,
                                error = %e,
                                "Failed to commit offset"
                            );
                        }

                        let mut s = stats.write();
                        s.messages_processed += 1;
                        s.alerts_submitted += count as u64;
                        s.last_offset.insert(format!("{}:{}", topic, partition), offset);
                    }
                    Err(e) => {
                        tracing::error!(
                            topic = %topic,
                            partition = partition,
                            offset = offset,
                            error = %e,
                            "Failed to process message"
                        );
                        stats.write().errors += 1;
                    }
                }
            }
        })
    }
}

/// Decode one message into raw alerts
pub fn parse_message(topic: &str, payload: &[u8]) -> Result<Vec<RawAlert>, ProcessError> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| ProcessError::Parse(e.to_string()))?;

    // Batch format: {"alerts": [...]}
    if let Some(alerts) = value.get("alerts") {
        let alerts = alerts
            .as_array()
            .ok_or_else(|| ProcessError::Parse("'alerts' must be an array".to_string()))?;
        // Each element is coerced on its own so one bad entry cannot drop the batch
        return Ok(alerts.iter().cloned().map(RawAlert::from_json).collect());
    }

    let mut alert = RawAlert::from_json(value.clone());
    if alert.alert_type.is_none() && alert.data.is_none() {
        // Bare payload: the whole object is the data, the topic is the type
        alert.data = Some(value);
    }
    if alert.type_name().is_none() {
        alert.alert_type = Some(serde_json::Value::String(topic.to_string()));
    }
    Ok(vec![alert])
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kafka_config_default() {
        let config = KafkaConfig::default();
        assert_eq!(config.brokers, "localhost:9092");
        assert_eq!(config.group_id, "klaxon");
        assert!(!config.enable_auto_commit);
    }

    #[test]
    fn test_parse_batch_message() {
        let payload = br#"{
            "alerts": [
                {"type": "High CPU Usage", "data": {"severity": "high"}},
                {"type": "High Disk Usage"}
            ]
        }"#;

        let alerts = parse_message("system", payload).unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[1].type_name().as_deref(), Some("High Disk Usage"));
    }

    #[test]
    fn test_parse_single_message() {
        let payload = br#"{"type": "Transfer Failed", "data": {"from": "0xabc"}}"#;
        let alerts = parse_message("transfers", payload).unwrap();
        assert_eq!(alerts[0].type_name().as_deref(), Some("Transfer Failed"));
    }

    #[test]
    fn test_topic_is_fallback_type() {
        let payload = br#"{"from": "0xabc", "severity": "medium"}"#;
        let alerts = parse_message("Transfer Failed", payload).unwrap();
        assert_eq!(alerts[0].type_name().as_deref(), Some("Transfer Failed"));
        assert_eq!(alerts[0].data.as_ref().unwrap()["from"], "0xabc");
    }

    #[test]
    fn test_mixed_batch_keeps_every_alert() {
        let payload = br#"{
            "alerts": [
                {"type": "Transfer Failed", "data": {"from": "0xabc"}},
                {"type": 42, "timestamp": "x"},
                "not an object"
            ]
        }"#;

        let alerts = parse_message("transfers", payload).unwrap();
        assert_eq!(alerts.len(), 3);
        assert_eq!(alerts[0].type_name().as_deref(), Some("Transfer Failed"));
        assert_eq!(alerts[1].type_name().as_deref(), Some("42"));
        assert_eq!(alerts[1].timestamp_ms(), None);
        assert_eq!(alerts[2].type_name(), None);
    }

    #[test]
    fn test_mistyped_single_message() {
        let payload = br#"{"type": null, "data": {"from": "0xabc"}, "timestamp": 1.5e3}"#;
        let alerts = parse_message("Transfer Failed", payload).unwrap();
        assert_eq!(alerts[0].type_name().as_deref(), Some("Transfer Failed"));
        assert_eq!(alerts[0].timestamp_ms(), Some(1_500));
    }

    #[test]
    fn test_invalid_payload() {
        assert!(parse_message("t", b"not json").is_err());
        assert!(parse_message("t", br#"{"alerts": 5}"#).is_err());
    }

    #[test]
    fn test_non_object_payload_uses_topic_type() {
        let alerts = parse_message("Stuck Transfer", b"[1, 2]").unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].type_name().as_deref(), Some("Stuck Transfer"));
        assert_eq!(alerts[0].data, Some(serde_json::json!([1, 2])));
    }
}
