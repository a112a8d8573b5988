//! Alert instances, severity policies and timed escalation

pub mod instance;
pub mod manager;
pub mod policy;

pub use instance::{generate_alert_id, AlertInstance, AlertStatus, EscalationStatus};
pub use manager::{EscalationManager, EscalationStats, LifecycleError, Opened};
pub use policy::{lifecycle_channels, EscalationPolicies, EscalationPolicy};
