//! Time-windowed correlation of raw alerts into incidents
//!
//! Rules are evaluated over the alert history on every new record. A firing
//! produces higher-level alerts and is suppressed for a cooldown period keyed
//! by the rule name and its serialized results.

pub mod builtin;
pub mod custom;
pub mod engine;
pub mod rule;

pub use builtin::{builtin_rules, BuiltinRule};
pub use custom::{AlertPredicate, CustomRule, FilterDefinition, RuleDefinition};
pub use engine::{
    ActiveCorrelation, Correlation, CorrelationEngine, SweepStats, DEFAULT_COOLDOWN_MS,
};
pub use rule::{correlation_key, CorrelationResult, CorrelationRule, RuleError};
