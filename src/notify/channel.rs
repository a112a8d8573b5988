//! Notification channels

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::alerts::Severity;

/// Kinds of channel a severity's escalation path is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Chat,
    Email,
    Paging,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [ChannelKind::Chat, ChannelKind::Email, ChannelKind::Paging];

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Chat => "chat",
            ChannelKind::Email => "email",
            ChannelKind::Paging => "paging",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context passed along with every delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryMeta {
    pub severity: Severity,
    pub alert_id: String,
    pub alert_type: String,
    pub escalation_level: usize,
}

/// Uniform delivery capability. Transport, formatting details and retries are
/// the channel's own business; the dispatcher only sees success or failure.
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    fn deliver<'a>(
        &'a self,
        text: &'a str,
        meta: &'a DeliveryMeta,
    ) -> BoxFuture<'a, Result<(), ChannelError>>;
}

/// Writes notifications to the log
#[derive(Debug, Clone)]
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver<'a>(
        &'a self,
        text: &'a str,
        meta: &'a DeliveryMeta,
    ) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(async move {
            tracing::warn!(
                channel = %self.name,
                alert_id = %meta.alert_id,
                severity = %meta.severity,
                level = meta.escalation_level,
                "Alert notification: {}",
                text
            );
            Ok(())
        })
    }
}

/// Posts notifications as JSON to an HTTP endpoint (chat webhook, mail relay,
/// paging service)
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    name: String,
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            name: name.into(),
            url: url.into(),
            headers: HashMap::new(),
            client,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn payload(text: &str, meta: &DeliveryMeta) -> serde_json::Value {
        serde_json::json!({
            "text": text,
            "alert_id": meta.alert_id,
            "alert_type": meta.alert_type,
            "severity": meta.severity,
            "escalation_level": meta.escalation_level,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    }
}

impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver<'a>(
        &'a self,
        text: &'a str,
        meta: &'a DeliveryMeta,
    ) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(async move {
            let mut request = self.client.post(&self.url).json(&Self::payload(text, meta));

            for (key, value) in &self.headers {
                request = request.header(key, value);
            }

            let response = request.send().await.map_err(|e| {
                ChannelError::Webhook(format!("Failed to send webhook: {}", e))
            })?;

            if !response.status().is_success() {
                return Err(ChannelError::Webhook(format!(
                    "Webhook returned status {}",
                    response.status()
                )));
            }

            tracing::debug!(
                channel = %self.name,
                alert_id = %meta.alert_id,
                url = %self.url,
                "Webhook notification sent"
            );

            Ok(())
        })
    }
}

/// Channel delivery errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    /// Records every delivery it receives
    #[derive(Clone, Default)]
    pub struct RecordingChannel {
        pub deliveries: Arc<Mutex<Vec<(String, DeliveryMeta)>>>,
    }

    impl RecordingChannel {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn count(&self) -> usize {
            self.deliveries.lock().len()
        }

        pub fn levels(&self) -> Vec<usize> {
            self.deliveries
                .lock()
                .iter()
                .map(|(_, meta)| meta.escalation_level)
                .collect()
        }

        pub fn texts(&self) -> Vec<String> {
            self.deliveries.lock().iter().map(|(t, _)| t.clone()).collect()
        }
    }

    impl NotificationChannel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        fn deliver<'a>(
            &'a self,
            text: &'a str,
            meta: &'a DeliveryMeta,
        ) -> BoxFuture<'a, Result<(), ChannelError>> {
            Box::pin(async move {
                self.deliveries.lock().push((text.to_string(), meta.clone()));
                Ok(())
            })
        }
    }

    /// Fails every delivery, counting attempts
    #[derive(Clone, Default)]
    pub struct FailingChannel {
        pub attempts: Arc<Mutex<usize>>,
    }

    impl FailingChannel {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn attempts(&self) -> usize {
            *self.attempts.lock()
        }
    }

    impl NotificationChannel for FailingChannel {
        fn name(&self) -> &str {
            "failing"
        }

        fn deliver<'a>(
            &'a self,
            _text: &'a str,
            _meta: &'a DeliveryMeta,
        ) -> BoxFuture<'a, Result<(), ChannelError>> {
            Box::pin(async move {
                *self.attempts.lock() += 1;
                Err(ChannelError::Delivery("endpoint unavailable".to_string()))
            })
        }
    }

    /// Records deliveries after a fixed delay
    #[derive(Clone)]
    pub struct SlowChannel {
        pub delay: std::time::Duration,
        pub inner: RecordingChannel,
    }

    impl SlowChannel {
        pub fn new(delay: std::time::Duration) -> Self {
            Self {
                delay,
                inner: RecordingChannel::new(),
            }
        }
    }

    impl NotificationChannel for SlowChannel {
        fn name(&self) -> &str {
            "slow"
        }

        fn deliver<'a>(
            &'a self,
            text: &'a str,
            meta: &'a DeliveryMeta,
        ) -> BoxFuture<'a, Result<(), ChannelError>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                self.inner.deliver(text, meta).await
            })
        }
    }
}
