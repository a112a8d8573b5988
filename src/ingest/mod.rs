//! Alert intake sources
//!
//! Supports multiple intake methods:
//! - HTTP API (default)
//! - Kafka consumer (optional, enable with `kafka` feature)

#[cfg(feature = "kafka")]
pub mod kafka;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaConfig, KafkaConsumer};
