//! Klaxon: Alert Correlation and Escalation Engine
//!
//! Turns raw, high-volume, often-duplicate alert signals from independent
//! monitoring producers into a small number of deduplicated incidents,
//! delivered to operators with escalating urgency until acknowledged or
//! resolved.
//!
//! # Features
//!
//! - **Normalization**: malformed alerts are coerced, never rejected
//! - **Rolling History**: time-windowed buffer that correlation rules query
//! - **Correlation Rules**: built-in and declarative rules with per-result cooldown
//! - **Escalation**: per-severity timers widening the channel path until acknowledged
//! - **Best-Effort Delivery**: chat, email and paging channels fail independently
//! - **Incident Dedup**: repeats of an open incident bump a counter instead of re-notifying
//!
//! # Example
//!
//! ```no_run
//! use klaxon::alerts::AlertData;
//! use klaxon::config::EngineConfig;
//! use klaxon::engine::AlertEngine;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = AlertEngine::from_config(&EngineConfig::from_env())?;
//!
//! let outcome = engine
//!     .submit_alert("Transfer Failed", AlertData::new().with("from", "0xabc").with("severity", "medium"))
//!     .await;
//!
//! if let Some(opened) = outcome.instance {
//!     engine.acknowledge_alert(&opened.id).await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod api;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod escalation;
pub mod ingest;
pub mod maintenance;
pub mod notify;

// Re-export commonly used types
pub use alerts::{AlertData, AlertRecord, RawAlert, Severity};
pub use config::{ConfigError, EngineConfig, ServerConfig};
pub use engine::{AlertEngine, SubmitOutcome};
pub use escalation::{AlertInstance, LifecycleError};
