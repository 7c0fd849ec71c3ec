//! Core alert types.
//!
//! - [`AlertStatus`]: Whether an alert is firing or resolved at a point in time
//! - [`Alert`]: A labeled, timestamped event handed to the engine by an ingester

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};
use crate::labels::{Fingerprint, LabelSet};

/// The status of an alert at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// `ends_at` is unset or in the future.
    Firing,
    /// `ends_at` has passed.
    Resolved,
}

impl AlertStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An alert as supplied by the ingester.
///
/// The engine only ever reads the labels of an alert. Resolution is signalled
/// by re-ingesting the same label set with `ends_at` set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Identifying labels.
    pub labels: LabelSet,
    /// Descriptive, non-identifying annotations.
    #[serde(default)]
    pub annotations: LabelSet,
    /// When the condition started.
    #[serde(default = "Utc::now")]
    pub starts_at: DateTime<Utc>,
    /// When the condition ended, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    /// Link back to the system that generated the alert.
    #[serde(
        default,
        rename = "generatorURL",
        skip_serializing_if = "Option::is_none"
    )]
    pub generator_url: Option<String>,
}

impl Alert {
    /// Creates a firing alert that starts now.
    #[must_use]
    pub fn new(labels: LabelSet) -> Self {
        Self {
            labels,
            annotations: LabelSet::new(),
            starts_at: Utc::now(),
            ends_at: None,
            generator_url: None,
        }
    }

    /// Adds an annotation.
    #[must_use]
    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations = self.annotations.with(key, value);
        self
    }

    /// Sets the start time.
    #[must_use]
    pub const fn starting_at(mut self, at: DateTime<Utc>) -> Self {
        self.starts_at = at;
        self
    }

    /// Sets the end time.
    #[must_use]
    pub const fn ending_at(mut self, at: DateTime<Utc>) -> Self {
        self.ends_at = Some(at);
        self
    }

    /// Returns the stable identity of this alert.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.labels.fingerprint()
    }

    /// Returns true if the alert is firing at `now`.
    #[must_use]
    pub fn is_firing_at(&self, now: DateTime<Utc>) -> bool {
        self.ends_at.is_none_or(|ends| ends > now)
    }

    /// Returns true if the alert is firing right now.
    #[must_use]
    pub fn is_firing(&self) -> bool {
        self.is_firing_at(Utc::now())
    }

    /// Returns the status at `now`.
    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> AlertStatus {
        if self.is_firing_at(now) {
            AlertStatus::Firing
        } else {
            AlertStatus::Resolved
        }
    }

    /// Checks the ingestion contract.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::InvalidAlert` if the alert has no labels, has a
    /// label with an empty name, or ends before it starts.
    pub fn validate(&self) -> Result<()> {
        if self.labels.is_empty() {
            return Err(RouterError::InvalidAlert {
                reason: "alert has no labels".to_string(),
            });
        }

        if self.labels.keys().any(str::is_empty) {
            return Err(RouterError::InvalidAlert {
                reason: "label name cannot be empty".to_string(),
            });
        }

        if let Some(ends_at) = self.ends_at {
            if ends_at < self.starts_at {
                return Err(RouterError::InvalidAlert {
                    reason: "end time must not be before start time".to_string(),
                });
            }
        }

        Ok(())
    }
}
