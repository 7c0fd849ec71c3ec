//! Aggregation groups and the flush schedule.
//!
//! Alerts delivered to the same receiver with the same projection onto the
//! route's `group_by` keys share an [`AggregationGroup`]. Each group walks a
//! small state machine:
//!
//! ```text
//!   (new) --ingest--> Waiting --flush after group_wait--> Active
//!   Active --flush every group_interval--> Active   (notify if changed or repeat due)
//!   Active --flush with no members left--> Idle      (removed from the table)
//! ```
//!
//! Pending flushes live in a single time-ordered queue. Entries are never
//! updated in place; a popped entry whose deadline no longer matches its
//! group's `next_flush` is stale and skipped.

use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info};

use crate::labels::{Fingerprint, LabelSet};
use crate::notify::Notification;
use crate::route::{Route, RouteOpts};
use crate::store::AlertStore;
use crate::types::Alert;

/// Identity of an aggregation group: receiver plus grouping projection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupId {
    receiver: String,
    labels: LabelSet,
}

impl GroupId {
    /// Creates a group id.
    #[must_use]
    pub fn new(receiver: impl Into<String>, labels: LabelSet) -> Self {
        Self {
            receiver: receiver.into(),
            labels,
        }
    }

    /// Receiver name.
    #[must_use]
    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    /// The grouping projection.
    #[must_use]
    pub const fn labels(&self) -> &LabelSet {
        &self.labels
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.receiver, self.labels)
    }
}

/// Lifecycle state of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupState {
    /// No members; the group is gone from the table.
    Idle,
    /// Created, first flush pending after `group_wait`.
    Waiting,
    /// Flushed at least once.
    Active,
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Waiting => write!(f, "waiting"),
            Self::Active => write!(f, "active"),
        }
    }
}

/// What happened to a group when an alert was ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GroupEvent {
    /// A new group was created and its first flush scheduled.
    Created {
        /// The group.
        group: GroupId,
        /// The alert.
        fingerprint: Fingerprint,
        /// When the first flush is due.
        flush_at: DateTime<Utc>,
    },
    /// The alert joined an existing group.
    Added {
        /// The group.
        group: GroupId,
        /// The alert.
        fingerprint: Fingerprint,
    },
    /// The alert was already a member and has been refreshed.
    Updated {
        /// The group.
        group: GroupId,
        /// The alert.
        fingerprint: Fingerprint,
    },
}

impl GroupEvent {
    /// The affected group.
    #[must_use]
    pub const fn group(&self) -> &GroupId {
        match self {
            Self::Created { group, .. } | Self::Added { group, .. } | Self::Updated { group, .. } => {
                group
            }
        }
    }
}

/// Flush-time settings that do not vary per group.
#[derive(Debug, Clone, Copy)]
pub struct FlushOptions {
    /// Include resolved alerts (once) in the notification that follows their resolution.
    pub send_resolved: bool,
}

impl Default for FlushOptions {
    fn default() -> Self {
        Self {
            send_resolved: true,
        }
    }
}

/// A bucket of alerts notified together.
#[derive(Debug)]
pub struct AggregationGroup {
    id: GroupId,
    route_path: String,
    opts: RouteOpts,
    state: GroupState,
    members: BTreeMap<Fingerprint, Alert>,
    first_alert_at: DateTime<Utc>,
    last_flush_at: Option<DateTime<Utc>>,
    last_notified_at: Option<DateTime<Utc>>,
    notified: BTreeSet<Fingerprint>,
    next_flush: Option<DateTime<Utc>>,
    removed: bool,
}

impl AggregationGroup {
    fn new(id: GroupId, route: &Route, now: DateTime<Utc>) -> Self {
        let opts = route.opts().clone();
        let next_flush = add_duration(now, opts.group_wait);
        Self {
            id,
            route_path: route.path().to_string(),
            opts,
            state: GroupState::Waiting,
            members: BTreeMap::new(),
            first_alert_at: now,
            last_flush_at: None,
            last_notified_at: None,
            notified: BTreeSet::new(),
            next_flush: Some(next_flush),
            removed: false,
        }
    }

    /// Adds or refreshes a member. Returns true if it was new.
    fn upsert(&mut self, fingerprint: Fingerprint, alert: &Alert) -> bool {
        self.members.insert(fingerprint, alert.clone()).is_none()
    }

    /// Brings every member up to the version held in `store`.
    ///
    /// A member the store no longer holds has been resolved and collected.
    fn refresh(&mut self, store: &AlertStore, now: DateTime<Utc>) {
        for (fingerprint, member) in &mut self.members {
            match store.get(*fingerprint) {
                Some(current) => member.clone_from(current),
                None if member.is_firing_at(now) => member.ends_at = Some(now),
                None => {}
            }
        }
    }

    /// Runs one flush. Returns the notification to emit, if any.
    fn flush(
        &mut self,
        now: DateTime<Utc>,
        store: &AlertStore,
        is_muted: &dyn Fn(&Alert) -> bool,
        options: FlushOptions,
    ) -> Option<Notification> {
        self.last_flush_at = Some(now);
        self.refresh(store, now);

        let mut firing: Vec<&Alert> = Vec::new();
        let mut firing_set = BTreeSet::new();
        let mut resolved: Vec<&Alert> = Vec::new();
        let mut resolved_fps = Vec::new();
        for (fp, alert) in &self.members {
            if !alert.is_firing_at(now) {
                resolved_fps.push(*fp);
                if options.send_resolved && self.notified.contains(fp) {
                    resolved.push(alert);
                }
            } else if !is_muted(alert) {
                firing.push(alert);
                firing_set.insert(*fp);
            }
        }

        let changed = firing_set != self.notified || !resolved.is_empty();
        let repeat_due = self
            .last_notified_at
            .is_none_or(|at| add_duration(at, self.opts.repeat_interval) <= now);
        let should_notify = match self.state {
            GroupState::Waiting => !firing.is_empty(),
            GroupState::Active => changed || (repeat_due && !firing.is_empty()),
            GroupState::Idle => false,
        };

        let notification = if should_notify && (!firing.is_empty() || !resolved.is_empty()) {
            let alerts = firing.into_iter().chain(resolved).cloned().collect();
            Some(Notification::new(&self.id, alerts, now))
        } else {
            None
        };

        if notification.is_some() {
            self.last_notified_at = Some(now);
        }
        self.notified = firing_set;
        for fp in resolved_fps {
            self.members.remove(&fp);
        }

        self.state = GroupState::Active;
        self.next_flush = Some(add_duration(now, self.opts.group_interval));
        notification
    }

    fn snapshot(&self) -> GroupSnapshot {
        GroupSnapshot {
            id: self.id.clone(),
            route: self.route_path.clone(),
            state: self.state,
            members: self.members.keys().copied().collect(),
            first_alert_at: self.first_alert_at,
            last_flush_at: self.last_flush_at,
            next_flush: self.next_flush,
            group_wait: self.opts.group_wait,
            group_interval: self.opts.group_interval,
            repeat_interval: self.opts.repeat_interval,
        }
    }
}

/// Point-in-time view of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSnapshot {
    /// Group identity.
    pub id: GroupId,
    /// Path of the route that created the group.
    pub route: String,
    /// Current state.
    pub state: GroupState,
    /// Member fingerprints in order.
    pub members: Vec<Fingerprint>,
    /// When the first alert arrived.
    pub first_alert_at: DateTime<Utc>,
    /// When the group was last flushed.
    pub last_flush_at: Option<DateTime<Utc>>,
    /// When the next flush is due.
    pub next_flush: Option<DateTime<Utc>>,
    /// Timing captured when the group was created.
    #[serde(with = "crate::duration::serde_str")]
    pub group_wait: Duration,
    /// Timing captured when the group was created.
    #[serde(with = "crate::duration::serde_str")]
    pub group_interval: Duration,
    /// Timing captured when the group was created.
    #[serde(with = "crate::duration::serde_str")]
    pub repeat_interval: Duration,
}

type SharedGroup = Arc<Mutex<AggregationGroup>>;

/// Owns the group table and the flush queue.
///
/// Ingesting into a group and flushing it are serialized by the group's own
/// mutex; different groups never block one another.
#[derive(Debug, Default)]
pub struct Grouper {
    groups: RwLock<HashMap<GroupId, SharedGroup>>,
    queue: Mutex<BinaryHeap<Reverse<(DateTime<Utc>, GroupId)>>>,
}

impl Grouper {
    /// Creates an empty grouper.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an alert to the group selected by `route`, creating it if needed.
    pub fn ingest(&self, alert: &Alert, route: &Route, now: DateTime<Utc>) -> GroupEvent {
        let opts = route.opts();
        let id = GroupId::new(opts.receiver.clone(), opts.group_by.project(&alert.labels));
        let fingerprint = alert.fingerprint();

        loop {
            let existing = self.groups.read().get(&id).cloned();
            let group = match existing {
                Some(group) => group,
                None => match self.groups.write().entry(id.clone()) {
                    Entry::Occupied(entry) => Arc::clone(entry.get()),
                    Entry::Vacant(entry) => {
                        let mut group = AggregationGroup::new(id.clone(), route, now);
                        group.upsert(fingerprint, alert);
                        let flush_at = group.next_flush.unwrap_or(now);
                        entry.insert(Arc::new(Mutex::new(group)));
                        self.schedule(flush_at, id.clone());
                        info!(
                            group = %id,
                            route = %route.path(),
                            flush_at = %flush_at,
                            "Aggregation group created"
                        );
                        return GroupEvent::Created {
                            group: id,
                            fingerprint,
                            flush_at,
                        };
                    }
                },
            };

            let mut guard = group.lock();
            if guard.removed {
                // Lost a race with the flush that retired this group.
                continue;
            }
            let added = guard.upsert(fingerprint, alert);
            debug!(group = %id, fingerprint = %fingerprint, added, "Alert grouped");
            return if added {
                GroupEvent::Added {
                    group: id,
                    fingerprint,
                }
            } else {
                GroupEvent::Updated {
                    group: id,
                    fingerprint,
                }
            };
        }
    }

    /// Flushes every group whose deadline is at or before `now`.
    ///
    /// Members are evaluated at the version `store` holds for them, so a
    /// resolution routed elsewhere still reaches every group holding the alert.
    /// `is_muted` decides whether a firing member is suppressed (inhibited).
    pub fn flush_due(
        &self,
        now: DateTime<Utc>,
        store: &AlertStore,
        is_muted: &dyn Fn(&Alert) -> bool,
        options: FlushOptions,
    ) -> Vec<Notification> {
        let due = self.pop_due(now);
        let mut notifications = Vec::new();

        for (deadline, id) in due {
            let flushed = self.flush_group(&id, Some(deadline), now, store, is_muted, options);
            notifications.extend(flushed);
        }

        notifications
    }

    /// Flushes every live group now, ignoring the schedule.
    pub fn flush_all(
        &self,
        now: DateTime<Utc>,
        store: &AlertStore,
        is_muted: &dyn Fn(&Alert) -> bool,
        options: FlushOptions,
    ) -> Vec<Notification> {
        let mut ids: Vec<GroupId> = self.groups.read().keys().cloned().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.flush_group(&id, None, now, store, is_muted, options))
            .collect()
    }

    /// Earliest pending flush deadline, if any.
    ///
    /// May name a stale entry; flushing at that time is then a no-op.
    #[must_use]
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.queue.lock().peek().map(|Reverse((at, _))| *at)
    }

    /// Snapshots of every live group, ordered by id.
    #[must_use]
    pub fn groups(&self) -> Vec<GroupSnapshot> {
        let shared: Vec<SharedGroup> = self.groups.read().values().cloned().collect();
        let mut snapshots: Vec<GroupSnapshot> = shared.iter().map(|g| g.lock().snapshot()).collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    /// Snapshot of one group.
    #[must_use]
    pub fn group(&self, id: &GroupId) -> Option<GroupSnapshot> {
        let group = self.groups.read().get(id).cloned()?;
        let snapshot = group.lock().snapshot();
        Some(snapshot)
    }

    /// Number of live groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    /// Returns true if there are no live groups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }

    /// Flushes one group. With `deadline` set, the flush only runs if that
    /// deadline is still the group's current one.
    fn flush_group(
        &self,
        id: &GroupId,
        deadline: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        store: &AlertStore,
        is_muted: &dyn Fn(&Alert) -> bool,
        options: FlushOptions,
    ) -> Option<Notification> {
        let group = self.groups.read().get(id).cloned()?;
        let mut guard = group.lock();
        if guard.removed || deadline.is_some_and(|d| guard.next_flush != Some(d)) {
            return None;
        }

        if guard.members.is_empty() {
            self.retire(id, &mut guard);
            return None;
        }

        let notification = guard.flush(now, store, is_muted, options);
        if let Some(next) = guard.next_flush {
            self.schedule(next, id.clone());
        }
        match &notification {
            Some(n) => info!(
                group = %id,
                status = %n.status,
                alerts = n.alerts.len(),
                "Group flushed"
            ),
            None => debug!(group = %id, "Group flushed, nothing to send"),
        }
        notification
    }

    /// Marks an empty group idle and drops it from the table.
    ///
    /// The caller holds the group's lock. An ingest already waiting on that
    /// lock sees `removed` and starts over with a fresh group.
    fn retire(&self, id: &GroupId, group: &mut AggregationGroup) {
        group.state = GroupState::Idle;
        group.next_flush = None;
        group.removed = true;
        self.groups.write().remove(id);
        info!(group = %id, "Aggregation group idle, removed");
    }

    fn schedule(&self, at: DateTime<Utc>, id: GroupId) {
        self.queue.lock().push(Reverse((at, id)));
    }

    fn pop_due(&self, now: DateTime<Utc>) -> Vec<(DateTime<Utc>, GroupId)> {
        let mut queue = self.queue.lock();
        let mut due = Vec::new();
        while queue.peek().is_some_and(|Reverse((at, _))| *at <= now) {
            if let Some(Reverse(entry)) = queue.pop() {
                due.push(entry);
            }
        }
        due
    }
}

fn add_duration(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
