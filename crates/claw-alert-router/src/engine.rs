//! The routing engine.
//!
//! [`Engine`] ties the pieces together:
//! - ingests alerts into the [`AlertStore`] and routes them through the tree
//! - hands each routed alert to the [`Grouper`]
//! - flushes due groups, filtering inhibited members, and dispatches the
//!   resulting notifications to every registered [`Notifier`]
//!
//! The compiled configuration lives behind an `Arc` snapshot. Every operation
//! grabs the snapshot once and uses it throughout, so a concurrent reload is
//! never observed half-applied.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

use crate::config::{CompiledConfig, Config};
use crate::error::{ConfigError, Result};
use crate::group::{FlushOptions, GroupEvent, GroupSnapshot, Grouper};
use crate::labels::{Fingerprint, LabelSet};
use crate::notify::{Notification, Notifier};
use crate::route::Route;
use crate::store::AlertStore;
use crate::types::Alert;

/// How long the run loop sleeps when nothing is scheduled.
const IDLE_POLL: Duration = Duration::from_secs(60);

/// What happened when an alert was ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    /// The alert's identity.
    pub fingerprint: Fingerprint,
    /// Receivers of the routes the alert was delivered to, in route order.
    pub receivers: Vec<String>,
    /// One event per delivery route.
    pub events: Vec<GroupEvent>,
}

/// The alert routing, grouping and inhibition engine.
#[derive(Debug)]
pub struct Engine {
    config: Arc<RwLock<Arc<CompiledConfig>>>,
    store: Arc<RwLock<AlertStore>>,
    grouper: Arc<Grouper>,
    notifiers: Arc<RwLock<Vec<Box<dyn Notifier>>>>,
    wakeup: Arc<Notify>,
}

impl Engine {
    /// Creates an engine from a configuration document.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the configuration does not compile.
    pub fn new(config: &Config) -> std::result::Result<Self, ConfigError> {
        Ok(Self::from_compiled(config.compile()?))
    }

    /// Creates an engine from an already compiled configuration.
    #[must_use]
    pub fn from_compiled(compiled: CompiledConfig) -> Self {
        info!(
            routes = compiled.tree.len(),
            inhibit_rules = compiled.inhibitor.rules().len(),
            delivery = ?compiled.global.delivery,
            "Routing engine configured"
        );
        Self {
            config: Arc::new(RwLock::new(Arc::new(compiled))),
            store: Arc::new(RwLock::new(AlertStore::new())),
            grouper: Arc::new(Grouper::new()),
            notifiers: Arc::new(RwLock::new(Vec::new())),
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Replaces the configuration.
    ///
    /// The new configuration is compiled first; on failure the current one
    /// stays in force. Existing groups keep the timings they were created with.
    ///
    /// # Errors
    ///
    /// Returns the `ConfigError` that rejected the new configuration.
    pub fn reload(&self, config: &Config) -> std::result::Result<(), ConfigError> {
        let compiled = match config.compile() {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!(error = %e, "Configuration reload rejected, keeping previous configuration");
                return Err(e);
            }
        };

        info!(
            routes = compiled.tree.len(),
            inhibit_rules = compiled.inhibitor.rules().len(),
            "Configuration reloaded"
        );
        *self.config.write() = Arc::new(compiled);
        self.wakeup.notify_one();
        Ok(())
    }

    /// The configuration currently in force.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CompiledConfig> {
        self.config.read().clone()
    }

    // ============ Notifiers ============

    /// Registers a notifier.
    pub fn add_notifier(&self, notifier: Box<dyn Notifier>) {
        info!(notifier = %notifier.name(), "Added notifier");
        self.notifiers.write().push(notifier);
    }

    /// Number of registered notifiers.
    #[must_use]
    pub fn notifier_count(&self) -> usize {
        self.notifiers.read().len()
    }

    // ============ Ingestion ============

    /// Ingests an alert at the current time.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::InvalidAlert` if the alert fails validation.
    pub fn ingest(&self, alert: Alert) -> Result<IngestOutcome> {
        self.ingest_at(alert, Utc::now())
    }

    /// Ingests an alert as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::InvalidAlert` if the alert fails validation.
    pub fn ingest_at(&self, alert: Alert, now: DateTime<Utc>) -> Result<IngestOutcome> {
        alert.validate()?;
        let snapshot = self.snapshot();

        let (fingerprint, upsert) = self.store.write().upsert(alert.clone(), now);
        debug!(fingerprint = %fingerprint, ?upsert, labels = %alert.labels, "Alert ingested");

        let routes = snapshot
            .tree
            .resolve_with(&alert.labels, snapshot.global.delivery);

        let mut receivers = Vec::with_capacity(routes.len());
        let mut events = Vec::with_capacity(routes.len());
        let mut created = false;
        for route in routes {
            receivers.push(route.receiver().to_string());
            let event = self.grouper.ingest(&alert, route, now);
            created |= matches!(event, GroupEvent::Created { .. });
            events.push(event);
        }

        if created {
            self.wakeup.notify_one();
        }

        Ok(IngestOutcome {
            fingerprint,
            receivers,
            events,
        })
    }

    // ============ Flushing ============

    /// Flushes every group due at or before `now` and dispatches the results.
    pub fn flush_due(&self, now: DateTime<Utc>) -> Vec<Notification> {
        self.flush(now, false)
    }

    /// Flushes every live group immediately, regardless of its schedule.
    pub fn flush_all(&self, now: DateTime<Utc>) -> Vec<Notification> {
        self.flush(now, true)
    }

    /// Groups read their members from the store under one read lock, and
    /// inhibition is worked out once for the alerts firing at `now`.
    fn flush(&self, now: DateTime<Utc>, ignore_schedule: bool) -> Vec<Notification> {
        let snapshot = self.snapshot();
        let options = FlushOptions {
            send_resolved: snapshot.global.send_resolved,
        };

        let notifications = {
            let store = self.store.read();
            let active = store.firing_labels(now);
            let inhibitions = snapshot.inhibitor.evaluate(&active);
            let is_muted = |alert: &Alert| inhibitions.is_inhibited(&alert.labels);
            if ignore_schedule {
                self.grouper.flush_all(now, &store, &is_muted, options)
            } else {
                self.grouper.flush_due(now, &store, &is_muted, options)
            }
        };
        self.finish_flush(&snapshot, notifications, now)
    }

    fn finish_flush(
        &self,
        snapshot: &CompiledConfig,
        notifications: Vec<Notification>,
        now: DateTime<Utc>,
    ) -> Vec<Notification> {
        for notification in &notifications {
            self.dispatch(notification);
        }

        let removed = self
            .store
            .write()
            .gc(snapshot.global.resolved_retention, now);
        if !removed.is_empty() {
            debug!(count = removed.len(), "Pruned resolved alerts");
        }

        notifications
    }

    /// Hands a notification to every enabled notifier that accepts its receiver.
    ///
    /// Returns how many notifiers accepted it. Failures are logged, not returned.
    fn dispatch(&self, notification: &Notification) -> usize {
        let notifiers = self.notifiers.read();
        let mut delivered = 0;
        for notifier in notifiers.iter() {
            if !notifier.is_enabled() || !notifier.accepts(&notification.receiver) {
                continue;
            }
            match notifier.send(notification) {
                Ok(_) => delivered += 1,
                Err(e) => {
                    warn!(
                        notifier = %notifier.name(),
                        receiver = %notification.receiver,
                        error = %e,
                        "Notification error"
                    );
                }
            }
        }
        delivered
    }

    // ============ Queries ============

    /// Returns true if `alert` is inhibited by the alerts firing now.
    #[must_use]
    pub fn is_inhibited(&self, alert: &Alert) -> bool {
        self.is_inhibited_at(&alert.labels, Utc::now())
    }

    /// Returns true if `labels` are inhibited by the alerts firing at `now`.
    #[must_use]
    pub fn is_inhibited_at(&self, labels: &LabelSet, now: DateTime<Utc>) -> bool {
        let snapshot = self.snapshot();
        let store = self.store.read();
        let active = store.firing_labels(now);
        snapshot.inhibitor.is_inhibited(labels, &active)
    }

    /// Routes `labels` would be delivered to under the current delivery mode.
    #[must_use]
    pub fn routes_for(&self, labels: &LabelSet) -> Vec<Route> {
        let snapshot = self.snapshot();
        snapshot
            .tree
            .resolve_with(labels, snapshot.global.delivery)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Snapshots of every live group.
    #[must_use]
    pub fn groups(&self) -> Vec<GroupSnapshot> {
        self.grouper.groups()
    }

    /// Earliest pending flush deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.grouper.next_deadline()
    }

    /// Looks up a stored alert.
    #[must_use]
    pub fn get_alert(&self, fingerprint: Fingerprint) -> Option<Alert> {
        self.store.read().get(fingerprint).cloned()
    }

    /// Alerts firing now.
    #[must_use]
    pub fn firing_alerts(&self) -> Vec<Alert> {
        let now = Utc::now();
        self.store.read().firing(now).cloned().collect()
    }

    /// Number of stored alerts, firing or resolved.
    #[must_use]
    pub fn alert_count(&self) -> usize {
        self.store.read().len()
    }

    // ============ Background loop ============

    /// Flushes groups as their deadlines come due until `shutdown` turns true
    /// or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Routing engine started");
        loop {
            let wait = self
                .next_deadline()
                .map_or(IDLE_POLL, |at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
                .min(IDLE_POLL);
            let deadline = tokio::time::Instant::now() + wait;

            tokio::select! {
                () = tokio::time::sleep_until(deadline) => {
                    let sent = self.flush_due(Utc::now());
                    if !sent.is_empty() {
                        debug!(notifications = sent.len(), "Flush tick");
                    }
                }
                () = self.wakeup.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Routing engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            grouper: Arc::clone(&self.grouper),
            notifiers: Arc::clone(&self.notifiers),
            wakeup: Arc::clone(&self.wakeup),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GlobalConfig, InhibitRuleConfig, RouteConfig};
    use crate::error::RouterError;
    use crate::notify::{ChannelNotifier, NotificationStatus};
    use crate::route::DeliveryMode;
    use chrono::Duration as ChronoDuration;

    fn secs(n: i64) -> ChronoDuration {
        ChronoDuration::seconds(n)
    }

    fn routing_config() -> Config {
        Config::new(
            RouteConfig::new("default")
                .group_by(["alertname"])
                .group_wait(Duration::from_secs(10))
                .group_interval(Duration::from_secs(60))
                .repeat_interval(Duration::from_secs(3_600))
                .routes([
                    RouteConfig::new("critical-alerts")
                        .match_label("severity", "critical")
                        .routes([RouteConfig::new("platform-critical").match_label("team", "platform")]),
                    RouteConfig::new("data-team").match_label("team", "data"),
                ]),
        )
    }

    fn inhibiting_config() -> Config {
        Config::new(
            RouteConfig::new("default")
                .group_by(["instance"])
                .group_wait(Duration::from_secs(10))
                .group_interval(Duration::from_secs(60)),
        )
        .with_inhibit_rule(InhibitRuleConfig {
            source_match: [("alertname".to_string(), "NodeDown".to_string())].into(),
            target_match: [("severity".to_string(), "warning".to_string())].into(),
            equal: vec!["instance".to_string()],
            ..InhibitRuleConfig::default()
        })
    }

    fn alert(pairs: &[(&str, &str)]) -> Alert {
        Alert::new(pairs.iter().copied().collect())
    }

    mod ingest_tests {
        use super::*;

        #[test]
        fn deepest_delivery_by_default() {
            let engine = Engine::new(&routing_config()).unwrap();
            let outcome = engine
                .ingest(alert(&[("alertname", "HighCPU"), ("severity", "critical"), ("team", "platform")]))
                .unwrap();
            assert_eq!(outcome.receivers, vec!["platform-critical"]);
            assert_eq!(outcome.events.len(), 1);
            assert!(matches!(outcome.events[0], GroupEvent::Created { .. }));
        }

        #[test]
        fn full_path_delivery_fans_out() {
            let config = routing_config().with_global(GlobalConfig {
                delivery: DeliveryMode::FullPath,
                ..GlobalConfig::default()
            });
            let engine = Engine::new(&config).unwrap();
            let outcome = engine
                .ingest(alert(&[("alertname", "HighCPU"), ("severity", "critical"), ("team", "platform")]))
                .unwrap();
            assert_eq!(outcome.receivers, vec!["critical-alerts", "platform-critical"]);
            assert_eq!(engine.groups().len(), 2);
        }

        #[test]
        fn unmatched_alert_goes_to_default() {
            let engine = Engine::new(&routing_config()).unwrap();
            let outcome = engine
                .ingest(alert(&[("alertname", "Info"), ("severity", "info"), ("team", "unknown")]))
                .unwrap();
            assert_eq!(outcome.receivers, vec!["default"]);
        }

        #[test]
        fn invalid_alert_is_rejected() {
            let engine = Engine::new(&routing_config()).unwrap();
            let result = engine.ingest(Alert::new(LabelSet::new()));
            assert!(matches!(result, Err(RouterError::InvalidAlert { .. })));
            assert_eq!(engine.alert_count(), 0);
        }

        #[test]
        fn reingest_updates_instead_of_duplicating() {
            let engine = Engine::new(&routing_config()).unwrap();
            let a = alert(&[("alertname", "HighCPU"), ("team", "data")]);
            let first = engine.ingest(a.clone()).unwrap();
            let second = engine.ingest(a).unwrap();
            assert_eq!(first.fingerprint, second.fingerprint);
            assert_eq!(engine.alert_count(), 1);
            assert!(matches!(second.events[0], GroupEvent::Updated { .. }));
            assert!(engine.get_alert(first.fingerprint).is_some());
        }

        #[test]
        fn routes_for_uses_current_tree() {
            let engine = Engine::new(&routing_config()).unwrap();
            let labels: LabelSet = [("team", "data")].into_iter().collect();
            let routes = engine.routes_for(&labels);
            assert_eq!(routes.len(), 1);
            assert_eq!(routes[0].receiver(), "data-team");
        }
    }

    mod flush_tests {
        use super::*;

        #[test]
        fn flush_dispatches_to_notifiers() {
            let engine = Engine::new(&routing_config()).unwrap();
            let (notifier, mut rx) = ChannelNotifier::new("test");
            engine.add_notifier(Box::new(notifier));
            assert_eq!(engine.notifier_count(), 1);

            let t0 = Utc::now();
            engine
                .ingest_at(alert(&[("alertname", "HighCPU"), ("team", "data")]), t0)
                .unwrap();
            assert_eq!(engine.next_deadline(), Some(t0 + secs(10)));

            assert!(engine.flush_due(t0 + secs(9)).is_empty());
            let sent = engine.flush_due(t0 + secs(10));
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].receiver, "data-team");

            let received = rx.try_recv().unwrap();
            assert_eq!(received.id, sent[0].id);
        }

        #[test]
        fn notifier_receiver_filter_is_respected() {
            let engine = Engine::new(&routing_config()).unwrap();
            let (notifier, mut rx) = ChannelNotifier::new("pager");
            engine.add_notifier(Box::new(notifier.for_receivers(["critical-alerts"])));

            let t0 = Utc::now();
            engine
                .ingest_at(alert(&[("alertname", "HighCPU"), ("team", "data")]), t0)
                .unwrap();
            assert_eq!(engine.flush_due(t0 + secs(10)).len(), 1);
            assert!(rx.try_recv().is_err());
        }

        #[test]
        fn closed_notifier_does_not_break_flush() {
            let engine = Engine::new(&routing_config()).unwrap();
            let (notifier, rx) = ChannelNotifier::new("gone");
            drop(rx);
            engine.add_notifier(Box::new(notifier));

            let t0 = Utc::now();
            engine.ingest_at(alert(&[("alertname", "HighCPU")]), t0).unwrap();
            assert_eq!(engine.flush_due(t0 + secs(10)).len(), 1);
        }

        #[test]
        fn inhibited_members_are_filtered_at_flush() {
            let engine = Engine::new(&inhibiting_config()).unwrap();
            let t0 = Utc::now();
            engine
                .ingest_at(alert(&[("alertname", "NodeDown"), ("instance", "web-01")]), t0)
                .unwrap();
            engine
                .ingest_at(
                    alert(&[("alertname", "DiskFull"), ("severity", "warning"), ("instance", "web-01")]),
                    t0,
                )
                .unwrap();
            engine
                .ingest_at(
                    alert(&[("alertname", "DiskFull"), ("severity", "warning"), ("instance", "web-02")]),
                    t0,
                )
                .unwrap();

            let sent = engine.flush_due(t0 + secs(10));
            assert_eq!(sent.len(), 2);
            let web01 = sent
                .iter()
                .find(|n| n.group_labels.get("instance") == Some("web-01"))
                .unwrap();
            assert_eq!(web01.alerts.len(), 1);
            assert_eq!(web01.alerts[0].labels.get("alertname"), Some("NodeDown"));
            let web02 = sent
                .iter()
                .find(|n| n.group_labels.get("instance") == Some("web-02"))
                .unwrap();
            assert_eq!(web02.alerts.len(), 1);
        }

        #[test]
        fn resolving_the_source_lifts_inhibition() {
            let engine = Engine::new(&inhibiting_config()).unwrap();
            let t0 = Utc::now();
            let source = alert(&[("alertname", "NodeDown"), ("instance", "web-01")]);
            let target = alert(&[("alertname", "DiskFull"), ("severity", "warning"), ("instance", "web-01")]);
            engine.ingest_at(source.clone(), t0).unwrap();
            engine.ingest_at(target.clone(), t0).unwrap();
            assert!(engine.is_inhibited_at(&target.labels, t0));
            assert!(!engine.is_inhibited_at(&source.labels, t0));

            engine
                .ingest_at(source.ending_at(t0 + secs(5)), t0 + secs(5))
                .unwrap();
            assert!(!engine.is_inhibited_at(&target.labels, t0 + secs(6)));

            let sent = engine.flush_due(t0 + secs(10));
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].status, NotificationStatus::Firing);
            assert_eq!(sent[0].alerts.len(), 1);
            assert_eq!(sent[0].alerts[0].labels.get("alertname"), Some("DiskFull"));
        }

        #[test]
        fn flush_all_ignores_schedule() {
            let engine = Engine::new(&routing_config()).unwrap();
            let t0 = Utc::now();
            engine.ingest_at(alert(&[("alertname", "A")]), t0).unwrap();
            engine.ingest_at(alert(&[("alertname", "B")]), t0).unwrap();
            assert_eq!(engine.flush_all(t0).len(), 2);
            // Stale queue entries are skipped.
            assert!(engine.flush_due(t0 + secs(10)).is_empty());
        }

        #[test]
        fn resolved_alerts_are_pruned_after_retention() {
            let config = routing_config().with_global(GlobalConfig {
                resolved_retention: Duration::from_secs(60),
                ..GlobalConfig::default()
            });
            let engine = Engine::new(&config).unwrap();
            let t0 = Utc::now();
            let a = alert(&[("alertname", "HighCPU")]);
            engine.ingest_at(a.clone(), t0).unwrap();
            engine.ingest_at(a.ending_at(t0 + secs(1)), t0 + secs(1)).unwrap();

            engine.flush_due(t0 + secs(10));
            assert_eq!(engine.alert_count(), 1);
            engine.flush_due(t0 + secs(70));
            assert_eq!(engine.alert_count(), 0);
        }
    }

    mod reload_tests {
        use super::*;

        #[test]
        fn reload_swaps_tree() {
            let engine = Engine::new(&routing_config()).unwrap();
            let labels: LabelSet = [("team", "data")].into_iter().collect();
            assert_eq!(engine.routes_for(&labels)[0].receiver(), "data-team");

            let new = Config::new(
                RouteConfig::new("default")
                    .routes([RouteConfig::new("data-oncall").match_label("team", "data")]),
            );
            engine.reload(&new).unwrap();
            assert_eq!(engine.routes_for(&labels)[0].receiver(), "data-oncall");
        }

        #[test]
        fn failed_reload_keeps_previous_config() {
            let engine = Engine::new(&routing_config()).unwrap();
            let before = engine.snapshot();

            let broken = Config::new(
                RouteConfig::new("default").routes([RouteConfig::new("web").match_regex("instance", "(")]),
            );
            assert!(engine.reload(&broken).is_err());
            assert!(Arc::ptr_eq(&before, &engine.snapshot()));
        }

        #[test]
        fn held_snapshot_survives_reload() {
            let engine = Engine::new(&routing_config()).unwrap();
            let held = engine.snapshot();
            engine
                .reload(&Config::new(RouteConfig::new("other")))
                .unwrap();
            assert_eq!(held.tree.root().receiver(), "default");
            assert_eq!(engine.snapshot().tree.root().receiver(), "other");
        }

        #[test]
        fn resolution_after_reroute_reaches_the_old_group() {
            let tree = |receiver: &str| {
                Config::new(
                    RouteConfig::new("default")
                        .group_by(["alertname"])
                        .group_wait(Duration::from_secs(10))
                        .group_interval(Duration::from_secs(60))
                        .routes([RouteConfig::new(receiver).match_label("team", "data")]),
                )
            };
            let engine = Engine::new(&tree("data-old")).unwrap();
            let (notifier, mut rx) = ChannelNotifier::new("test");
            engine.add_notifier(Box::new(notifier));
            let t0 = Utc::now();
            let x = alert(&[("alertname", "X"), ("team", "data")]);

            engine.ingest_at(x.clone(), t0).unwrap();
            let first = engine.flush_due(t0 + secs(10));
            assert_eq!(first.len(), 1);
            assert_eq!(first[0].receiver, "data-old");
            assert_eq!(first[0].status, NotificationStatus::Firing);

            engine.reload(&tree("data-new")).unwrap();
            let outcome = engine
                .ingest_at(x.ending_at(t0 + secs(20)), t0 + secs(20))
                .unwrap();
            assert_eq!(outcome.receivers, vec!["data-new"]);

            // The new group never notified the alert, so only the old one speaks.
            let sent = engine.flush_due(t0 + secs(70));
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].receiver, "data-old");
            assert_eq!(sent[0].status, NotificationStatus::Resolved);
            assert!(engine.flush_due(t0 + secs(130)).is_empty());
            assert!(engine.groups().is_empty());

            let mut delivered = Vec::new();
            while let Ok(notification) = rx.try_recv() {
                delivered.push(notification.status);
            }
            assert_eq!(delivered, vec![NotificationStatus::Firing, NotificationStatus::Resolved]);
        }

        #[test]
        fn clones_share_state() {
            let engine = Engine::new(&routing_config()).unwrap();
            let clone = engine.clone();
            clone.ingest(alert(&[("alertname", "HighCPU")])).unwrap();
            assert_eq!(engine.alert_count(), 1);
            assert_eq!(engine.groups().len(), 1);
        }
    }

    #[tokio::test]
    async fn run_loop_flushes_and_stops() {
        let config = Config::new(RouteConfig::new("default").group_wait(Duration::ZERO));
        let engine = Engine::new(&config).unwrap();
        let (notifier, mut rx) = ChannelNotifier::new("test");
        engine.add_notifier(Box::new(notifier));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = engine.clone();
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        engine.ingest(alert(&[("alertname", "HighCPU")])).unwrap();
        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.receiver, "default");

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
