//! Alert records, intake normalization and the rolling history
//!
//! Everything the correlation engine reads from lives here: the normalized
//! record shape, the retention-bounded history buffer, and the frequency
//! pattern index exposed for introspection.

pub mod history;
pub mod patterns;
pub mod record;

pub use history::{HistoryStore, DEFAULT_RETENTION_MS};
pub use patterns::{AlertPattern, PatternIndex};
pub use record::{normalize, AlertData, AlertRecord, RawAlert, Severity};
