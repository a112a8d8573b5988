//! Best-effort fan-out of notifications to channels

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use super::channel::{ChannelKind, DeliveryMeta, LogChannel, NotificationChannel, WebhookChannel};
use crate::config::ChannelsConfig;
use crate::escalation::AlertInstance;

/// Outcome of one dispatch
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub delivered: Vec<ChannelKind>,
    pub failed: Vec<(ChannelKind, String)>,
    /// Requested channels with nothing registered
    pub skipped: Vec<ChannelKind>,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Routes notifications to the channel registered for each kind
#[derive(Clone, Default)]
pub struct Dispatcher {
    channels: HashMap<ChannelKind, Arc<dyn NotificationChannel>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build channels from configuration: a webhook when a URL is set, the
    /// log otherwise; disabled channels are left unregistered.
    pub fn from_config(config: &ChannelsConfig) -> Self {
        let mut dispatcher = Self::new();
        for kind in ChannelKind::ALL {
            let settings = config.get(kind);
            if !settings.enabled {
                tracing::info!(channel = %kind, "Notification channel disabled");
                continue;
            }
            match &settings.webhook_url {
                Some(url) => {
                    tracing::info!(
                        channel = %kind,
                        url = %url,
                        headers = settings.webhook_headers.len(),
                        "Webhook notification channel"
                    );
                    let channel = settings
                        .webhook_headers
                        .iter()
                        .fold(WebhookChannel::new(kind.as_str(), url.clone()), |channel, (name, value)| {
                            channel.with_header(name.clone(), value.clone())
                        });
                    dispatcher.register(kind, Arc::new(channel));
                }
                None => {
                    tracing::info!(channel = %kind, "Log notification channel (no webhook configured)");
                    dispatcher.register(kind, Arc::new(LogChannel::new(kind.as_str())));
                }
            }
        }
        dispatcher
    }

    pub fn with_channel(mut self, kind: ChannelKind, channel: impl NotificationChannel + 'static) -> Self {
        self.register(kind, Arc::new(channel));
        self
    }

    pub fn register(&mut self, kind: ChannelKind, channel: Arc<dyn NotificationChannel>) {
        self.channels.insert(kind, channel);
    }

    pub fn registered(&self) -> Vec<ChannelKind> {
        let mut kinds: Vec<_> = self.channels.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Notify `channels` about the current state of `instance`
    pub async fn dispatch(&self, instance: &AlertInstance, channels: &[ChannelKind]) -> DispatchReport {
        let text = format_alert_message(instance);
        self.send(&text, &DeliveryMeta::from(instance), channels).await
    }

    /// Attempt every requested channel. A failure is logged and never stops
    /// the remaining attempts.
    pub async fn send(&self, text: &str, meta: &DeliveryMeta, channels: &[ChannelKind]) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut targets = Vec::new();

        for kind in channels {
            match self.channels.get(kind) {
                Some(channel) => targets.push((*kind, Arc::clone(channel))),
                None => {
                    tracing::debug!(channel = %kind, alert_id = %meta.alert_id, "No channel registered, skipping");
                    report.skipped.push(*kind);
                }
            }
        }

        let outcomes = join_all(targets.iter().map(|(kind, channel)| async move {
            (*kind, channel.deliver(text, meta).await)
        }))
        .await;

        for (kind, outcome) in outcomes {
            match outcome {
                Ok(()) => report.delivered.push(kind),
                Err(e) => {
                    tracing::error!(
                        channel = %kind,
                        alert_id = %meta.alert_id,
                        error = %e,
                        "Failed to deliver notification"
                    );
                    report.failed.push((kind, e.to_string()));
                }
            }
        }

        report
    }
}

impl From<&AlertInstance> for DeliveryMeta {
    fn from(instance: &AlertInstance) -> Self {
        DeliveryMeta {
            severity: instance.severity,
            alert_id: instance.id.clone(),
            alert_type: instance.alert.alert_type.clone(),
            escalation_level: instance.escalation_level,
        }
    }
}

/// Human-readable notification body for an instance
pub fn format_alert_message(instance: &AlertInstance) -> String {
    let mut lines = vec![
        format!(
            "[{}] {}",
            instance.severity.as_str().to_uppercase(),
            instance.alert.alert_type
        ),
        format!("Alert ID: {}", instance.id),
        format!("Escalation level: {}", instance.escalation_level),
    ];
    if instance.occurrences > 1 {
        lines.push(format!("Occurrences: {}", instance.occurrences));
    }
    for (key, value) in instance.alert.data.iter() {
        if key == "severity" {
            continue;
        }
        match value.as_str() {
            Some(s) => lines.push(format!("{}: {}", key, s)),
            None => lines.push(format!("{}: {}", key, value)),
        }
    }
    lines.join("\n")
}
