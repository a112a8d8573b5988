//! Per-severity escalation policies

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alerts::Severity;
use crate::notify::ChannelKind;

/// How alerts of one severity escalate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub priority: u8,
    /// Time between escalation steps
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// Channels in escalation order; level `n` notifies `channels[..=n]`
    pub channels: Vec<ChannelKind>,
    pub auto_escalate: bool,
}

impl EscalationPolicy {
    /// Default policy table
    pub fn default_for(severity: Severity) -> Self {
        use ChannelKind::*;
        let minutes = |m: u64| Duration::from_secs(m * 60);
        match severity {
            Severity::Critical => Self {
                priority: 1,
                timeout: minutes(5),
                channels: vec![Chat, Email, Paging],
                auto_escalate: true,
            },
            Severity::High => Self {
                priority: 2,
                timeout: minutes(15),
                channels: vec![Chat, Email],
                auto_escalate: true,
            },
            Severity::Medium => Self {
                priority: 3,
                timeout: minutes(30),
                channels: vec![Chat],
                auto_escalate: false,
            },
            Severity::Low => Self {
                priority: 4,
                timeout: minutes(60),
                channels: vec![Chat],
                auto_escalate: false,
            },
        }
    }

    /// Highest reachable escalation level
    pub fn max_level(&self) -> usize {
        self.channels.len().saturating_sub(1)
    }

    /// Channels notified at `level`
    pub fn channels_for_level(&self, level: usize) -> &[ChannelKind] {
        let end = (level + 1).min(self.channels.len());
        &self.channels[..end]
    }
}

/// Policy table covering every severity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicies {
    pub critical: EscalationPolicy,
    pub high: EscalationPolicy,
    pub medium: EscalationPolicy,
    pub low: EscalationPolicy,
}

impl EscalationPolicies {
    pub fn get(&self, severity: Severity) -> &EscalationPolicy {
        match severity {
            Severity::Critical => &self.critical,
            Severity::High => &self.high,
            Severity::Medium => &self.medium,
            Severity::Low => &self.low,
        }
    }

    pub fn get_mut(&mut self, severity: Severity) -> &mut EscalationPolicy {
        match severity {
            Severity::Critical => &mut self.critical,
            Severity::High => &mut self.high,
            Severity::Medium => &mut self.medium,
            Severity::Low => &mut self.low,
        }
    }

    /// Override one severity's timeout
    pub fn with_timeout(mut self, severity: Severity, timeout: Duration) -> Self {
        self.get_mut(severity).timeout = timeout;
        self
    }
}

impl Default for EscalationPolicies {
    fn default() -> Self {
        Self {
            critical: EscalationPolicy::default_for(Severity::Critical),
            high: EscalationPolicy::default_for(Severity::High),
            medium: EscalationPolicy::default_for(Severity::Medium),
            low: EscalationPolicy::default_for(Severity::Low),
        }
    }
}

/// Acknowledge/resolve notices go to chat, plus email for urgent alerts
pub fn lifecycle_channels(severity: Severity) -> Vec<ChannelKind> {
    match severity {
        Severity::Critical | Severity::High => vec![ChannelKind::Chat, ChannelKind::Email],
        Severity::Medium | Severity::Low => vec![ChannelKind::Chat],
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let policies = EscalationPolicies::default();

        let critical = policies.get(Severity::Critical);
        assert_eq!(critical.timeout, Duration::from_secs(300));
        assert_eq!(critical.max_level(), 2);
        assert!(critical.auto_escalate);

        let high = policies.get(Severity::High);
        assert_eq!(high.timeout, Duration::from_secs(900));
        assert_eq!(high.channels, vec![ChannelKind::Chat, ChannelKind::Email]);

        assert!(!policies.get(Severity::Medium).auto_escalate);
        assert_eq!(policies.get(Severity::Low).priority, 4);
    }

    #[test]
    fn test_channels_for_level_are_cumulative() {
        let policy = EscalationPolicy::default_for(Severity::Critical);
        assert_eq!(policy.channels_for_level(0), &[ChannelKind::Chat]);
        assert_eq!(
            policy.channels_for_level(2),
            &[ChannelKind::Chat, ChannelKind::Email, ChannelKind::Paging]
        );
        assert_eq!(policy.channels_for_level(9).len(), 3);
    }

    #[test]
    fn test_timeout_override() {
        let policies = EscalationPolicies::default().with_timeout(Severity::High, Duration::from_secs(60));
        assert_eq!(policies.high.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_policy_serializes_timeout_as_millis() {
        let json = serde_json::to_value(EscalationPolicy::default_for(Severity::Medium)).unwrap();
        assert_eq!(json["timeout"], 1_800_000);
        assert_eq!(json["channels"], serde_json::json!(["chat"]));
    }

    #[test]
    fn test_lifecycle_channels() {
        assert_eq!(lifecycle_channels(Severity::Critical), vec![ChannelKind::Chat, ChannelKind::Email]);
        assert_eq!(lifecycle_channels(Severity::Low), vec![ChannelKind::Chat]);
    }
}
