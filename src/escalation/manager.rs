//! Escalation lifecycle manager
//!
//! Owns every [`AlertInstance`] and one escalation timer per auto-escalating
//! instance. Timers re-check the acknowledged/resolved flags under the store
//! lock before every step, so acknowledge/resolve never race a pending tick.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use super::instance::{generate_alert_id, AlertInstance, EscalationStatus};
use super::policy::{lifecycle_channels, EscalationPolicies};
use crate::alerts::AlertRecord;
use crate::notify::{DeliveryMeta, Dispatcher};

/// Result of handing an alert to the manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Opened {
    pub id: String,
    /// False when an open instance with the same signature absorbed the alert
    pub created: bool,
}

#[derive(Default)]
struct InstanceStore {
    instances: HashMap<String, AlertInstance>,
    /// Fingerprint -> id of the unresolved instance carrying it
    open_by_fingerprint: HashMap<String, String>,
    archive: VecDeque<AlertInstance>,
}

impl InstanceStore {
    fn is_archived(&self, id: &str) -> bool {
        self.archive.iter().any(|a| a.id == id)
    }

    fn release_fingerprint(&mut self, instance: &AlertInstance) {
        let fingerprint = instance.alert.fingerprint();
        if self.open_by_fingerprint.get(&fingerprint) == Some(&instance.id) {
            self.open_by_fingerprint.remove(&fingerprint);
        }
    }
}

struct Inner {
    store: Mutex<InstanceStore>,
    timers: DashMap<String, JoinHandle<()>>,
    policies: EscalationPolicies,
    dispatcher: Dispatcher,
    archive_capacity: Option<usize>,
}

/// Tracks alert instances through escalation. Cheap to clone.
#[derive(Clone)]
pub struct EscalationManager {
    inner: Arc<Inner>,
}

impl EscalationManager {
    pub fn new(policies: EscalationPolicies, dispatcher: Dispatcher) -> Self {
        Self::build(policies, dispatcher, None)
    }

    /// Bound the archive of old resolved instances; unbounded when `None`
    pub fn build(policies: EscalationPolicies, dispatcher: Dispatcher, archive_capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: Mutex::new(InstanceStore::default()),
                timers: DashMap::new(),
                policies,
                dispatcher,
                archive_capacity,
            }),
        }
    }

    pub fn policies(&self) -> &EscalationPolicies {
        &self.inner.policies
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Start a campaign for `record`, or fold it into the open instance with
    /// the same signature.
    ///
    /// A new instance is notified at level 0 right away and, if its policy
    /// auto-escalates, gets a repeating escalation timer.
    pub async fn open(&self, record: AlertRecord) -> Opened {
        let fingerprint = record.fingerprint();

        let instance = {
            let mut store = self.inner.store.lock();

            if let Some(id) = store.open_by_fingerprint.get(&fingerprint).cloned() {
                if let Some(existing) = store.instances.get_mut(&id) {
                    if !existing.resolved {
                        existing.occurrences += 1;
                        tracing::debug!(
                            alert_id = %id,
                            occurrences = existing.occurrences,
                            "Alert folded into open instance"
                        );
                        return Opened { id, created: false };
                    }
                }
            }

            let instance = AlertInstance::new(generate_alert_id(), record);
            store.open_by_fingerprint.insert(fingerprint, instance.id.clone());
            store.instances.insert(instance.id.clone(), instance.clone());
            instance
        };

        let policy = self.inner.policies.get(instance.severity);
        tracing::info!(
            alert_id = %instance.id,
            alert_type = %instance.alert.alert_type,
            severity = %instance.severity,
            "Alert instance created"
        );

        // Armed before the first delivery so an acknowledge arriving while it
        // is in flight finds the timer and cancels it
        if policy.auto_escalate {
            self.start_timer(&instance.id, policy.timeout);
        }

        let report = self
            .inner
            .dispatcher
            .dispatch(&instance, policy.channels_for_level(0))
            .await;
        if !report.failed.is_empty() {
            tracing::warn!(
                alert_id = %instance.id,
                failed = report.failed.len(),
                "Initial notification partially failed"
            );
        }

        Opened {
            id: instance.id,
            created: true,
        }
    }

    fn start_timer(&self, id: &str, period: Duration) {
        let period = period.max(Duration::from_millis(1));
        let Some(first_tick) = Instant::now().checked_add(period) else {
            tracing::warn!(alert_id = %id, timeout = ?period, "Escalation timeout out of range, timer not started");
            return;
        };
        let manager = self.clone();
        let alert_id = id.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(first_tick, period);
            loop {
                ticker.tick().await;
                if !manager.escalation_tick(&alert_id).await {
                    break;
                }
            }
            manager.inner.timers.remove(&alert_id);
        });

        if let Some(previous) = self.inner.timers.insert(id.to_string(), handle) {
            previous.abort();
        }
    }

    /// One timer step. Returns whether the timer should keep running.
    async fn escalation_tick(&self, id: &str) -> bool {
        let (snapshot, channels) = {
            let mut store = self.inner.store.lock();
            let Some(instance) = store.instances.get_mut(id) else {
                return false;
            };
            if !instance.is_escalating() {
                return false;
            }

            let policy = self.inner.policies.get(instance.severity);
            if !instance.escalate(policy.max_level()) {
                tracing::debug!(alert_id = %id, level = instance.escalation_level, "Alert fully escalated");
                return false;
            }

            (
                instance.clone(),
                policy.channels_for_level(instance.escalation_level).to_vec(),
            )
        };

        tracing::warn!(
            alert_id = %id,
            level = snapshot.escalation_level,
            severity = %snapshot.severity,
            "Escalating unacknowledged alert"
        );
        self.inner.dispatcher.dispatch(&snapshot, &channels).await;
        true
    }

    fn cancel_timer(&self, id: &str) {
        if let Some((_, handle)) = self.inner.timers.remove(id) {
            handle.abort();
        }
    }

    /// Stop escalation and notify that an operator took the alert
    pub async fn acknowledge(&self, id: &str) -> Result<AlertInstance, LifecycleError> {
        let (snapshot, changed) = {
            let mut store = self.inner.store.lock();
            if store.is_archived(id) {
                return Err(LifecycleError::AlreadyResolved(id.to_string()));
            }
            let instance = store
                .instances
                .get_mut(id)
                .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
            if instance.resolved {
                return Err(LifecycleError::AlreadyResolved(id.to_string()));
            }
            let changed = instance.acknowledge();
            (instance.clone(), changed)
        };

        self.cancel_timer(id);

        if changed {
            tracing::info!(alert_id = %id, level = snapshot.escalation_level, "Alert acknowledged");
            self.notify_lifecycle(&snapshot, "acknowledged").await;
        }
        Ok(snapshot)
    }

    /// Close the alert for good and notify
    pub async fn resolve(&self, id: &str) -> Result<AlertInstance, LifecycleError> {
        let snapshot = {
            let mut store = self.inner.store.lock();
            if store.is_archived(id) {
                return Err(LifecycleError::AlreadyResolved(id.to_string()));
            }
            let instance = store
                .instances
                .get_mut(id)
                .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
            if !instance.resolve() {
                return Err(LifecycleError::AlreadyResolved(id.to_string()));
            }
            let snapshot = instance.clone();
            store.release_fingerprint(&snapshot);
            snapshot
        };

        self.cancel_timer(id);

        tracing::info!(alert_id = %id, level = snapshot.escalation_level, "Alert resolved");
        self.notify_lifecycle(&snapshot, "resolved").await;
        Ok(snapshot)
    }

    async fn notify_lifecycle(&self, instance: &AlertInstance, event: &str) {
        let text = format!(
            "[{}] Alert {}: {} ({})",
            instance.severity.as_str().to_uppercase(),
            event,
            instance.alert.alert_type,
            instance.id
        );
        let channels = lifecycle_channels(instance.severity);
        self.inner
            .dispatcher
            .send(&text, &DeliveryMeta::from(instance), &channels)
            .await;
    }

    pub fn get(&self, id: &str) -> Option<AlertInstance> {
        let store = self.inner.store.lock();
        store
            .instances
            .get(id)
            .cloned()
            .or_else(|| store.archive.iter().find(|a| a.id == id).cloned())
    }

    pub fn escalation_status(&self, id: &str) -> Option<EscalationStatus> {
        self.get(id).map(|a| a.escalation_status())
    }

    /// Unresolved instances, most urgent first
    pub fn active_alerts(&self) -> Vec<AlertInstance> {
        let store = self.inner.store.lock();
        let mut active: Vec<_> = store
            .instances
            .values()
            .filter(|a| !a.resolved)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.severity.cmp(&b.severity).then(a.created_at.cmp(&b.created_at)));
        active
    }

    /// Every instance ever created, oldest first
    pub fn alert_history(&self) -> Vec<AlertInstance> {
        let store = self.inner.store.lock();
        let mut all: Vec<_> = store
            .archive
            .iter()
            .chain(store.instances.values())
            .cloned()
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    /// Move instances resolved before `cutoff` out of the hot map
    pub fn archive_resolved(&self, cutoff: DateTime<Utc>) -> usize {
        let mut store = self.inner.store.lock();
        let ids: Vec<String> = store
            .instances
            .values()
            .filter(|a| a.resolved && a.resolved_at.is_some_and(|t| t < cutoff))
            .map(|a| a.id.clone())
            .collect();

        for id in &ids {
            if let Some(instance) = store.instances.remove(id) {
                store.archive.push_back(instance);
            }
        }

        if let Some(capacity) = self.inner.archive_capacity {
            while store.archive.len() > capacity {
                if let Some(dropped) = store.archive.pop_front() {
                    tracing::debug!(alert_id = %dropped.id, "Archive full, dropping oldest instance");
                }
            }
        }

        ids.len()
    }

    pub fn has_timer(&self, id: &str) -> bool {
        self.inner.timers.contains_key(id)
    }

    pub fn stats(&self) -> EscalationStats {
        let store = self.inner.store.lock();
        let mut stats = EscalationStats {
            archived: store.archive.len(),
            running_timers: self.inner.timers.len(),
            ..Default::default()
        };
        for instance in store.instances.values() {
            if instance.resolved {
                stats.resolved += 1;
            } else if instance.acknowledged {
                stats.acknowledged += 1;
            } else {
                stats.active += 1;
            }
        }
        stats
    }

    /// Abort every escalation timer
    pub fn shutdown(&self) {
        let ids: Vec<String> = self.inner.timers.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.cancel_timer(&id);
        }
    }
}

/// Instance counts by state
#[derive(Debug, Clone, Default, Serialize)]
pub struct EscalationStats {
    pub active: usize,
    pub acknowledged: usize,
    pub resolved: usize,
    pub archived: usize,
    pub running_timers: usize,
}

/// Operator control errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Alert '{0}' not found")]
    NotFound(String),

    #[error("Alert '{0}' is already resolved")]
    AlreadyResolved(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertData, Severity};
    use crate::notify::channel::testing::{FailingChannel, RecordingChannel, SlowChannel};
    use crate::notify::ChannelKind;

    const MINUTE: Duration = Duration::from_secs(60);

    struct Harness {
        manager: EscalationManager,
        chat: RecordingChannel,
        email: RecordingChannel,
        paging: RecordingChannel,
    }

    fn harness() -> Harness {
        let chat = RecordingChannel::new();
        let email = RecordingChannel::new();
        let paging = RecordingChannel::new();
        let dispatcher = Dispatcher::new()
            .with_channel(ChannelKind::Chat, chat.clone())
            .with_channel(ChannelKind::Email, email.clone())
            .with_channel(ChannelKind::Paging, paging.clone());
        Harness {
            manager: EscalationManager::new(EscalationPolicies::default(), dispatcher),
            chat,
            email,
            paging,
        }
    }

    fn record(alert_type: &str, severity: &str) -> AlertRecord {
        AlertRecord {
            alert_type: alert_type.to_string(),
            data: AlertData::new().with("severity", severity),
            timestamp: 0,
        }
    }

    fn level(manager: &EscalationManager, id: &str) -> usize {
        manager.escalation_status(id).unwrap().escalation_level
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_escalates_through_path_then_stops() {
        let h = harness();
        let opened = h.manager.open(record("Stuck Transfer", "critical")).await;
        assert!(opened.created);
        assert_eq!(level(&h.manager, &opened.id), 0);
        assert_eq!(h.chat.count(), 1);
        assert!(h.manager.has_timer(&opened.id));

        tokio::time::sleep(5 * MINUTE + Duration::from_secs(1)).await;
        assert_eq!(level(&h.manager, &opened.id), 1);
        assert_eq!(h.email.count(), 1);
        assert_eq!(h.paging.count(), 0);

        tokio::time::sleep(5 * MINUTE).await;
        assert_eq!(level(&h.manager, &opened.id), 2);
        assert_eq!(h.paging.count(), 1);
        assert_eq!(h.chat.levels(), vec![0, 1, 2]);

        tokio::time::sleep(5 * MINUTE).await;
        assert_eq!(level(&h.manager, &opened.id), 2);
        assert_eq!(h.paging.count(), 1);
        assert!(!h.manager.has_timer(&opened.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_freezes_escalation() {
        let h = harness();
        let opened = h.manager.open(record("Stuck Transfer", "critical")).await;

        tokio::time::sleep(5 * MINUTE + Duration::from_secs(1)).await;
        assert_eq!(level(&h.manager, &opened.id), 1);

        let acked = h.manager.acknowledge(&opened.id).await.unwrap();
        assert!(acked.acknowledged);
        assert!(!h.manager.has_timer(&opened.id));

        tokio::time::sleep(60 * MINUTE).await;
        let status = h.manager.escalation_status(&opened.id).unwrap();
        assert_eq!(status.escalation_level, 1);
        assert!(status.acknowledged);
        assert_eq!(h.paging.count(), 0);

        // chat: level 0, level 1, acknowledgement
        assert_eq!(h.chat.count(), 3);
        assert!(h.chat.texts()[2].contains("acknowledged"));
        // critical acknowledgements also go to email
        assert_eq!(h.email.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_medium_does_not_auto_escalate() {
        let h = harness();
        let opened = h.manager.open(record("HighGasPrice", "medium")).await;
        assert!(!h.manager.has_timer(&opened.id));

        tokio::time::sleep(120 * MINUTE).await;
        assert_eq!(level(&h.manager, &opened.id), 0);
        assert_eq!(h.chat.count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found_without_side_effects() {
        let h = harness();
        assert!(matches!(
            h.manager.resolve("alert-missing").await,
            Err(LifecycleError::NotFound(id)) if id == "alert-missing"
        ));
        assert!(matches!(
            h.manager.acknowledge("alert-missing").await,
            Err(LifecycleError::NotFound(_))
        ));
        assert!(h.manager.alert_history().is_empty());
        assert_eq!(h.chat.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolved_is_terminal() {
        let h = harness();
        let opened = h.manager.open(record("Large Transfer Detected", "high")).await;
        let resolved = h.manager.resolve(&opened.id).await.unwrap();
        assert!(resolved.resolved);
        assert!(!h.manager.has_timer(&opened.id));

        assert!(matches!(
            h.manager.acknowledge(&opened.id).await,
            Err(LifecycleError::AlreadyResolved(id)) if id == opened.id
        ));
        assert!(h.manager.resolve(&opened.id).await.is_err());

        tokio::time::sleep(60 * MINUTE).await;
        let status = h.manager.escalation_status(&opened.id).unwrap();
        assert_eq!(status.escalation_level, 0);
        assert!(!status.acknowledged);
        assert!(status.resolved);
        assert!(h.manager.active_alerts().is_empty());
        assert_eq!(h.manager.alert_history().len(), 1);
    }

    #[tokio::test]
    async fn test_repeats_fold_into_open_instance() {
        let h = harness();
        let first = h.manager.open(record("High CPU Usage", "low")).await;
        let second = h.manager.open(record("High CPU Usage", "low")).await;

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(h.manager.get(&first.id).unwrap().occurrences, 2);
        assert_eq!(h.chat.count(), 1);

        h.manager.resolve(&first.id).await.unwrap();
        let third = h.manager.open(record("High CPU Usage", "low")).await;
        assert!(third.created);
        assert_ne!(third.id, first.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_channel_does_not_stop_escalation() {
        let chat = RecordingChannel::new();
        let failing = FailingChannel::new();
        let paging = RecordingChannel::new();
        let dispatcher = Dispatcher::new()
            .with_channel(ChannelKind::Chat, chat.clone())
            .with_channel(ChannelKind::Email, failing.clone())
            .with_channel(ChannelKind::Paging, paging.clone());
        let manager = EscalationManager::new(EscalationPolicies::default(), dispatcher);

        let opened = manager.open(record("Stuck Transfer", "critical")).await;
        tokio::time::sleep(10 * MINUTE + Duration::from_secs(1)).await;

        assert_eq!(manager.escalation_status(&opened.id).unwrap().escalation_level, 2);
        assert_eq!(failing.attempts(), 2);
        assert_eq!(paging.count(), 1);
        assert_eq!(chat.count(), 3);
    }

    #[tokio::test]
    async fn test_active_alerts_sorted_by_severity() {
        let h = harness();
        h.manager.open(record("a", "low")).await;
        h.manager.open(record("b", "critical")).await;
        h.manager.open(record("c", "medium")).await;

        let severities: Vec<_> = h.manager.active_alerts().iter().map(|a| a.severity).collect();
        assert_eq!(severities, vec![Severity::Critical, Severity::Medium, Severity::Low]);
        h.manager.shutdown();
        assert_eq!(h.manager.stats().running_timers, 0);
    }

    #[tokio::test]
    async fn test_archive_keeps_history_and_blocks_transitions() {
        let h = harness();
        let opened = h.manager.open(record("a", "low")).await;
        h.manager.resolve(&opened.id).await.unwrap();

        let archived = h.manager.archive_resolved(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(archived, 1);
        assert_eq!(h.manager.stats().archived, 1);
        assert_eq!(h.manager.alert_history().len(), 1);
        assert!(h.manager.get(&opened.id).is_some());
        assert!(matches!(
            h.manager.acknowledge(&opened.id).await,
            Err(LifecycleError::AlreadyResolved(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_during_first_delivery_leaves_no_timer() {
        let chat = SlowChannel::new(Duration::from_secs(1));
        let dispatcher = Dispatcher::new().with_channel(ChannelKind::Chat, chat.clone());
        let manager = EscalationManager::new(EscalationPolicies::default(), dispatcher);

        let opener = manager.clone();
        let open = tokio::spawn(async move {
            opener.open(record("Large Transfer Detected", "critical")).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let id = manager.active_alerts()[0].id.clone();
        manager.acknowledge(&id).await.unwrap();
        let opened = open.await.unwrap();

        assert_eq!(opened.id, id);
        assert!(!manager.has_timer(&id));
        assert_eq!(manager.stats().running_timers, 0);

        tokio::time::sleep(30 * MINUTE).await;
        assert_eq!(level(&manager, &id), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_timeout_skips_timer() {
        let chat = RecordingChannel::new();
        let dispatcher = Dispatcher::new().with_channel(ChannelKind::Chat, chat.clone());
        let policies = EscalationPolicies::default().with_timeout(Severity::Critical, Duration::MAX);
        let manager = EscalationManager::new(policies, dispatcher);

        let opened = manager.open(record("Large Transfer Detected", "critical")).await;

        assert!(opened.created);
        assert!(!manager.has_timer(&opened.id));
        assert_eq!(chat.count(), 1);
        assert!(manager.resolve(&opened.id).await.is_ok());
    }
}
