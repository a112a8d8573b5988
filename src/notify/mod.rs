//! Notification channels and the dispatcher that fans alerts out to them

pub mod channel;
pub mod dispatcher;

pub use channel::{ChannelError, ChannelKind, DeliveryMeta, LogChannel, NotificationChannel, WebhookChannel};
pub use dispatcher::{format_alert_message, DispatchReport, Dispatcher};
