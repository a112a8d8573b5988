//! Escalation-tracked alert instances

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;

use crate::alerts::{AlertRecord, Severity};

/// Lifecycle state derived from the instance flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

/// One alert or incident moving through escalation
#[derive(Debug, Clone, Serialize)]
pub struct AlertInstance {
    pub id: String,
    pub alert: AlertRecord,
    pub severity: Severity,
    /// Index into the severity's channel path
    pub escalation_level: usize,
    pub created_at: DateTime<Utc>,
    pub last_escalated_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Times this incident signature was reported while open
    pub occurrences: u64,
}

impl AlertInstance {
    pub fn new(id: String, alert: AlertRecord) -> Self {
        let now = Utc::now();
        Self {
            id,
            severity: alert.severity(),
            alert,
            escalation_level: 0,
            created_at: now,
            last_escalated_at: now,
            acknowledged: false,
            acknowledged_at: None,
            resolved: false,
            resolved_at: None,
            occurrences: 1,
        }
    }

    pub fn status(&self) -> AlertStatus {
        if self.resolved {
            AlertStatus::Resolved
        } else if self.acknowledged {
            AlertStatus::Acknowledged
        } else {
            AlertStatus::Active
        }
    }

    /// Still eligible for escalation
    pub fn is_escalating(&self) -> bool {
        !self.acknowledged && !self.resolved
    }

    /// Advance one level if allowed. Returns false when acknowledged, resolved,
    /// or already at `max_level`.
    pub fn escalate(&mut self, max_level: usize) -> bool {
        if !self.is_escalating() || self.escalation_level >= max_level {
            return false;
        }
        self.escalation_level += 1;
        self.last_escalated_at = Utc::now();
        true
    }

    /// Returns false if the instance was already acknowledged or is resolved
    pub fn acknowledge(&mut self) -> bool {
        if self.resolved || self.acknowledged {
            return false;
        }
        self.acknowledged = true;
        self.acknowledged_at = Some(Utc::now());
        true
    }

    /// Returns false if the instance was already resolved
    pub fn resolve(&mut self) -> bool {
        if self.resolved {
            return false;
        }
        self.resolved = true;
        self.resolved_at = Some(Utc::now());
        true
    }

    pub fn escalation_status(&self) -> EscalationStatus {
        EscalationStatus {
            status: self.status(),
            escalation_level: self.escalation_level,
            last_escalation: self.last_escalated_at,
            acknowledged: self.acknowledged,
            resolved: self.resolved,
        }
    }
}

/// Operator-facing escalation summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationStatus {
    pub status: AlertStatus,
    pub escalation_level: usize,
    pub last_escalation: DateTime<Utc>,
    pub acknowledged: bool,
    pub resolved: bool,
}

/// Unique instance id: creation time plus a random suffix
pub fn generate_alert_id() -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("alert-{}-{:08x}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertData;

    fn instance(severity: &str) -> AlertInstance {
        AlertInstance::new(
            generate_alert_id(),
            AlertRecord {
                alert_type: "High CPU Usage".to_string(),
                data: AlertData::new().with("severity", severity),
                timestamp: 0,
            },
        )
    }

    #[test]
    fn test_escalate_stops_at_max_level() {
        let mut alert = instance("critical");
        assert_eq!(alert.severity, Severity::Critical);
        assert!(alert.escalate(2));
        assert!(alert.escalate(2));
        assert!(!alert.escalate(2));
        assert_eq!(alert.escalation_level, 2);
    }

    #[test]
    fn test_acknowledged_freezes_level() {
        let mut alert = instance("high");
        assert!(alert.escalate(1));
        assert!(alert.acknowledge());
        assert!(!alert.acknowledge());
        assert!(!alert.escalate(5));
        assert_eq!(alert.escalation_level, 1);
        assert_eq!(alert.status(), AlertStatus::Acknowledged);
    }

    #[test]
    fn test_resolved_is_terminal() {
        let mut alert = instance("medium");
        assert!(alert.resolve());
        assert!(!alert.resolve());
        assert!(!alert.acknowledge());
        assert!(!alert.escalate(5));
        assert!(!alert.acknowledged);
        assert_eq!(alert.status(), AlertStatus::Resolved);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = generate_alert_id();
        let b = generate_alert_id();
        assert!(a.starts_with("alert-"));
        assert_ne!(a, b);
    }
}
