//! End-to-end routing, grouping and inhibition through a JSON configuration.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;

use claw_alert_router::{
    Alert, ChannelNotifier, Config, ConfigError, DeliveryMode, Engine, GroupState, LabelSet,
    NotificationStatus,
};

const TREE: &str = r#"{
    "route": {
        "receiver": "default",
        "group_by": ["alertname"],
        "group_wait": "10s",
        "group_interval": "1m",
        "repeat_interval": "1h",
        "routes": [
            {
                "match": {"severity": "critical"},
                "receiver": "critical-alerts",
                "routes": [
                    {"match": {"team": "platform"}, "receiver": "platform-critical"}
                ]
            },
            {"match": {"team": "data"}, "receiver": "data-team"}
        ]
    },
    "receivers": [
        {"name": "default"},
        {"name": "critical-alerts"},
        {"name": "platform-critical"},
        {"name": "data-team"}
    ]
}"#;

const CONTINUE_TREE: &str = r#"{
    "route": {
        "receiver": "default",
        "routes": [
            {"match": {"severity": "critical"}, "receiver": "critical-alerts", "continue": true},
            {"match": {"team": "platform"}, "receiver": "platform-team"}
        ]
    }
}"#;

const INHIBITION: &str = r#"{
    "route": {"receiver": "default", "group_by": ["instance"], "group_wait": "0s"},
    "inhibit_rules": [
        {
            "source_match": {"alertname": "NodeDown"},
            "target_match": {"severity": "warning"},
            "equal": ["instance"]
        }
    ]
}"#;

fn labels(pairs: &[(&str, &str)]) -> LabelSet {
    pairs.iter().copied().collect()
}

fn alert(pairs: &[(&str, &str)]) -> Alert {
    Alert::new(labels(pairs))
}

fn receivers(config: &str, pairs: &[(&str, &str)], mode: DeliveryMode) -> Vec<String> {
    let compiled = Config::from_json(config).unwrap().compile().unwrap();
    compiled
        .tree
        .resolve_with(&labels(pairs), mode)
        .iter()
        .map(|r| r.receiver().to_string())
        .collect()
}

#[test]
fn nested_critical_platform_alert() {
    let pairs = [("severity", "critical"), ("team", "platform")];
    assert_eq!(receivers(TREE, &pairs, DeliveryMode::Deepest), vec!["platform-critical"]);
    assert_eq!(
        receivers(TREE, &pairs, DeliveryMode::FullPath),
        vec!["critical-alerts", "platform-critical"]
    );
}

#[test]
fn unmatched_alert_uses_default_receiver() {
    let pairs = [("severity", "info"), ("team", "unknown")];
    assert_eq!(receivers(TREE, &pairs, DeliveryMode::Deepest), vec!["default"]);
    assert_eq!(receivers(TREE, &pairs, DeliveryMode::FullPath), vec!["default"]);
}

#[test]
fn continue_delivers_to_both_siblings_in_order() {
    let pairs = [("severity", "critical"), ("team", "platform")];
    assert_eq!(
        receivers(CONTINUE_TREE, &pairs, DeliveryMode::FullPath),
        vec!["critical-alerts", "platform-team"]
    );
    assert_eq!(
        receivers(CONTINUE_TREE, &pairs, DeliveryMode::Deepest),
        vec!["critical-alerts", "platform-team"]
    );
}

#[test]
fn node_down_inhibits_only_same_instance() {
    let engine = Engine::new(&Config::from_json(INHIBITION).unwrap()).unwrap();
    let now = Utc::now();
    engine
        .ingest_at(alert(&[("alertname", "NodeDown"), ("instance", "web-01")]), now)
        .unwrap();

    let same = labels(&[("alertname", "HighLatency"), ("severity", "warning"), ("instance", "web-01")]);
    let other = labels(&[("alertname", "HighLatency"), ("severity", "warning"), ("instance", "web-02")]);
    assert!(engine.is_inhibited_at(&same, now));
    assert!(!engine.is_inhibited_at(&other, now));
}

#[test]
fn four_alerts_grouped_into_three_groups() {
    let config = Config::from_json(
        r#"{"route": {"receiver": "default", "group_by": ["alertname", "service"]}}"#,
    )
    .unwrap();
    let engine = Engine::new(&config).unwrap();
    let now = Utc::now();

    for pairs in [
        [("alertname", "HighCPUUsage"), ("service", "web-server"), ("instance", "web-01")],
        [("alertname", "HighCPUUsage"), ("service", "web-server"), ("instance", "web-02")],
        [("alertname", "HighCPUUsage"), ("service", "database"), ("instance", "db-01")],
        [("alertname", "HighMemoryUsage"), ("service", "web-server"), ("instance", "web-01")],
    ] {
        engine.ingest_at(alert(&pairs), now).unwrap();
    }

    let groups = engine.groups();
    assert_eq!(groups.len(), 3);
    assert!(groups.iter().all(|g| g.state == GroupState::Waiting));
    let pair = groups.iter().find(|g| g.members.len() == 2).unwrap();
    assert_eq!(pair.id.labels().get("alertname"), Some("HighCPUUsage"));
    assert_eq!(pair.id.labels().get("service"), Some("web-server"));
}

#[test]
fn full_lifecycle_wait_notify_resolve_idle() {
    let engine = Engine::new(&Config::from_json(TREE).unwrap()).unwrap();
    let t0 = Utc::now();
    let s = ChronoDuration::seconds;
    let cpu = alert(&[("alertname", "HighCPU"), ("team", "data"), ("instance", "db-01")]);

    engine.ingest_at(cpu.clone(), t0).unwrap();
    assert!(engine.flush_due(t0 + s(5)).is_empty());

    let first = engine.flush_due(t0 + s(10));
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].receiver, "data-team");
    assert_eq!(first[0].status, NotificationStatus::Firing);

    // Nothing changed: the interval flush stays quiet.
    assert!(engine.flush_due(t0 + s(70)).is_empty());

    engine
        .ingest_at(cpu.ending_at(t0 + s(80)), t0 + s(80))
        .unwrap();
    let resolved = engine.flush_due(t0 + s(130));
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].status, NotificationStatus::Resolved);

    assert!(engine.flush_due(t0 + s(190)).is_empty());
    assert!(engine.groups().is_empty());
}

#[test]
fn concurrent_ingest_and_flush_lose_no_alerts() {
    let engine = Engine::new(&Config::from_json(TREE).unwrap()).unwrap();
    let t0 = Utc::now();
    let s = ChronoDuration::seconds;

    let mut sent = std::thread::scope(|scope| {
        for worker in 0..4 {
            let engine = &engine;
            scope.spawn(move || {
                // Workers 0 and 1 feed one group; 2 and 3 each feed their own.
                let (name, team) = if worker < 2 {
                    ("Shared".to_string(), "ops")
                } else {
                    (format!("Own{worker}"), "data")
                };
                for i in 0..100 {
                    let instance = format!("{worker}-{i}");
                    let pairs = [("alertname", name.as_str()), ("team", team), ("instance", instance.as_str())];
                    engine.ingest_at(alert(&pairs), t0 + s(i)).unwrap();
                }
            });
        }
        let engine = &engine;
        let flusher = scope.spawn(move || {
            (0..40)
                .flat_map(|step| engine.flush_due(t0 + s(step * 5)))
                .collect::<Vec<_>>()
        });
        flusher.join().unwrap()
    });

    assert_eq!(engine.alert_count(), 400);
    let groups = engine.groups();
    assert_eq!(groups.len(), 3);
    assert_eq!(groups.iter().map(|g| g.members.len()).sum::<usize>(), 400);

    // Anything added after its group's last flush goes out now.
    sent.extend(engine.flush_all(t0 + s(1_000)));
    let notified: HashSet<_> = sent
        .iter()
        .flat_map(|n| n.alerts.iter().map(Alert::fingerprint))
        .collect();
    assert_eq!(notified.len(), 400);
}

#[test]
fn failed_reload_leaves_previous_tree_in_force() {
    let engine = Engine::new(&Config::from_json(TREE).unwrap()).unwrap();
    let broken = r#"{"route": {"receiver": "default", "routes": [{"match_re": {"instance": "web-("}}]}}"#;

    let err = Config::from_json(broken).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidRegex { .. }));

    let mut config = Config::from_json(TREE).unwrap();
    config.route.routes[1].match_re.insert("instance".to_string(), "(".to_string());
    assert!(engine.reload(&config).is_err());

    let routes = engine.routes_for(&labels(&[("team", "data")]));
    assert_eq!(routes[0].receiver(), "data-team");
}

#[tokio::test]
async fn run_loop_delivers_inhibition_filtered_notifications() {
    let engine = Engine::new(&Config::from_json(INHIBITION).unwrap()).unwrap();
    let (notifier, mut rx) = ChannelNotifier::new("test");
    engine.add_notifier(Box::new(notifier));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

    engine
        .ingest(alert(&[("alertname", "NodeDown"), ("instance", "web-01")]))
        .unwrap();
    engine
        .ingest(alert(&[("alertname", "HighLatency"), ("severity", "warning"), ("instance", "web-01")]))
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(Some(notification)) = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
        seen.extend(notification.alerts);
    }

    assert!(!seen.is_empty());
    assert!(seen.iter().all(|a| a.labels.get("severity") != Some("warning")));

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
