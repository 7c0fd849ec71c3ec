//! The active alert table.
//!
//! Alerts are keyed by [`Fingerprint`]. Re-ingesting an alert with the same
//! labels updates the stored entry in place, which is how resolution
//! (`ends_at` being set) reaches the engine.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::labels::{Fingerprint, LabelSet};
use crate::types::Alert;

/// An alert together with bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAlert {
    /// The most recent version of the alert.
    pub alert: Alert,
    /// When the engine first saw this fingerprint.
    pub received_at: DateTime<Utc>,
    /// When the entry was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// No alert with this fingerprint existed.
    Created,
    /// An existing alert was replaced.
    Updated,
}

/// Table of alerts keyed by fingerprint.
#[derive(Debug, Default)]
pub struct AlertStore {
    alerts: HashMap<Fingerprint, StoredAlert>,
}

impl AlertStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an alert.
    ///
    /// When a still-firing alert is refreshed, the earlier `starts_at` is kept.
    pub fn upsert(&mut self, mut alert: Alert, now: DateTime<Utc>) -> (Fingerprint, Upsert) {
        let fingerprint = alert.fingerprint();
        match self.alerts.get_mut(&fingerprint) {
            Some(existing) => {
                if existing.alert.is_firing_at(now) && existing.alert.starts_at < alert.starts_at {
                    alert.starts_at = existing.alert.starts_at;
                }
                existing.alert = alert;
                existing.updated_at = now;
                (fingerprint, Upsert::Updated)
            }
            None => {
                self.alerts.insert(
                    fingerprint,
                    StoredAlert {
                        alert,
                        received_at: now,
                        updated_at: now,
                    },
                );
                (fingerprint, Upsert::Created)
            }
        }
    }

    /// Looks up an alert.
    #[must_use]
    pub fn get(&self, fingerprint: Fingerprint) -> Option<&Alert> {
        self.alerts.get(&fingerprint).map(|s| &s.alert)
    }

    /// Looks up an alert with its bookkeeping.
    #[must_use]
    pub fn get_entry(&self, fingerprint: Fingerprint) -> Option<&StoredAlert> {
        self.alerts.get(&fingerprint)
    }

    /// Removes an alert.
    pub fn remove(&mut self, fingerprint: Fingerprint) -> Option<Alert> {
        self.alerts.remove(&fingerprint).map(|s| s.alert)
    }

    /// Number of stored alerts, firing or resolved.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Iterates over every stored alert.
    pub fn iter(&self) -> impl Iterator<Item = (Fingerprint, &Alert)> {
        self.alerts.iter().map(|(fp, s)| (*fp, &s.alert))
    }

    /// Alerts firing at `now`.
    pub fn firing(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Alert> {
        self.alerts
            .values()
            .map(|s| &s.alert)
            .filter(move |a| a.is_firing_at(now))
    }

    /// Label sets of the alerts firing at `now`.
    #[must_use]
    pub fn firing_labels(&self, now: DateTime<Utc>) -> Vec<&LabelSet> {
        self.firing(now).map(|a| &a.labels).collect()
    }

    /// Drops resolved alerts whose end lies more than `retention` before `now`.
    ///
    /// Returns the fingerprints that were removed.
    pub fn gc(&mut self, retention: Duration, now: DateTime<Utc>) -> Vec<Fingerprint> {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        self.alerts.retain(|fp, stored| {
            let expired = stored
                .alert
                .ends_at
                .is_some_and(|ends| ends <= now && now.signed_duration_since(ends) >= retention);
            if expired {
                removed.push(*fp);
            }
            !expired
        });
        removed
    }
}
