//! Notifications and the notifiers that receive them.
//!
//! The engine emits one [`Notification`] per group flush and hands it to every
//! registered [`Notifier`]. Delivery to a transport is the notifier's concern;
//! the engine only logs failures.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, RouterError};
use crate::group::GroupId;
use crate::labels::LabelSet;
use crate::types::Alert;

/// A batch of alerts for one receiver, produced by a group flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Unique id of this notification.
    pub id: Uuid,
    /// Receiver the batch is addressed to.
    pub receiver: String,
    /// Identifier of the originating group.
    pub group_key: String,
    /// The group's projection of labels.
    pub group_labels: LabelSet,
    /// Labels shared by every alert in the batch.
    pub common_labels: LabelSet,
    /// Annotations shared by every alert in the batch.
    pub common_annotations: LabelSet,
    /// Firing if any alert in the batch is firing.
    pub status: NotificationStatus,
    /// Firing alerts first, then resolved ones.
    pub alerts: Vec<Alert>,
    /// When the flush happened.
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// Builds a notification for a group flush at `now`.
    #[must_use]
    pub fn new(group: &GroupId, alerts: Vec<Alert>, now: DateTime<Utc>) -> Self {
        let status = if alerts.iter().any(|a| a.is_firing_at(now)) {
            NotificationStatus::Firing
        } else {
            NotificationStatus::Resolved
        };
        let common_labels = LabelSet::common(alerts.iter().map(|a| &a.labels));
        let common_annotations = LabelSet::common(alerts.iter().map(|a| &a.annotations));

        Self {
            id: Uuid::new_v4(),
            receiver: group.receiver().to_string(),
            group_key: group.to_string(),
            group_labels: group.labels().clone(),
            common_labels,
            common_annotations,
            status,
            alerts,
            timestamp: now,
        }
    }

    /// Number of alerts firing at the notification's timestamp.
    #[must_use]
    pub fn firing_count(&self) -> usize {
        self.alerts
            .iter()
            .filter(|a| a.is_firing_at(self.timestamp))
            .count()
    }

    /// Number of resolved alerts in the batch.
    #[must_use]
    pub fn resolved_count(&self) -> usize {
        self.alerts.len() - self.firing_count()
    }
}

/// The status of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    /// At least one alert is firing.
    Firing,
    /// All alerts are resolved.
    Resolved,
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Firing => write!(f, "firing"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

/// Result of handing a notification to a notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationResult {
    /// The notifier that processed the notification.
    pub notifier: String,
    /// Optional detail.
    pub message: Option<String>,
}

impl NotificationResult {
    /// Creates a result for `notifier`.
    #[must_use]
    pub fn new(notifier: impl Into<String>) -> Self {
        Self {
            notifier: notifier.into(),
            message: None,
        }
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }
}

/// A consumer of notifications.
///
/// Implementations must not block: the engine calls `send` from its flush
/// path. Anything slow belongs behind a channel, see [`ChannelNotifier`].
pub trait Notifier: Send + Sync + fmt::Debug {
    /// Returns the name of this notifier.
    fn name(&self) -> &str;

    /// Accepts a notification.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::NotificationFailed` if the notification cannot be accepted.
    fn send(&self, notification: &Notification) -> Result<NotificationResult>;

    /// Returns true if this notifier handles notifications for `receiver`.
    fn accepts(&self, _receiver: &str) -> bool {
        true
    }

    /// Returns true if this notifier is enabled.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Writes notifications to the tracing log.
#[derive(Debug, Clone)]
pub struct LogNotifier {
    name: String,
    enabled: bool,
}

impl LogNotifier {
    /// Creates a new log notifier.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
        }
    }

    /// Sets whether the notifier is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new("log")
    }
}

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, notification: &Notification) -> Result<NotificationResult> {
        if !self.is_enabled() {
            return Ok(NotificationResult::new(self.name()).with_message("notifier disabled"));
        }

        match notification.status {
            NotificationStatus::Firing => warn!(
                receiver = %notification.receiver,
                group_key = %notification.group_key,
                firing = notification.firing_count(),
                resolved = notification.resolved_count(),
                "ALERT"
            ),
            NotificationStatus::Resolved => info!(
                receiver = %notification.receiver,
                group_key = %notification.group_key,
                resolved = notification.alerts.len(),
                "RESOLVED"
            ),
        }

        Ok(NotificationResult::new(self.name()).with_message("logged to tracing"))
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Hands notifications to an async consumer over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    name: String,
    receivers: Option<Vec<String>>,
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    /// Creates a notifier and the receiving end of its channel.
    #[must_use]
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                name: name.into(),
                receivers: None,
                tx,
            },
            rx,
        )
    }

    /// Restricts the notifier to the given receivers.
    #[must_use]
    pub fn for_receivers<I, S>(mut self, receivers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.receivers = Some(receivers.into_iter().map(Into::into).collect());
        self
    }
}

impl Notifier for ChannelNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, notification: &Notification) -> Result<NotificationResult> {
        self.tx
            .send(notification.clone())
            .map_err(|_| RouterError::NotificationFailed {
                notifier: self.name.clone(),
                reason: "channel closed".to_string(),
            })?;
        Ok(NotificationResult::new(self.name()))
    }

    fn accepts(&self, receiver: &str) -> bool {
        self.receivers
            .as_ref()
            .is_none_or(|list| list.iter().any(|r| r == receiver))
    }

    fn is_enabled(&self) -> bool {
        !self.tx.is_closed()
    }
}
