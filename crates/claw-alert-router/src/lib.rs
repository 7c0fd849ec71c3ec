//! Alertmanager-style alert routing, grouping and inhibition for Clawbernetes.
//!
//! `claw-alert-router` decides which receivers an alert goes to, batches
//! related alerts so a storm becomes one notification, and suppresses alerts
//! whose root cause is already being reported.
//!
//! # Features
//!
//! - **Routing tree**: `match`, `match_re` and `matchers` predicates, `continue`
//!   fan-out, and inheritance of receiver, `group_by` and timings
//! - **Grouping**: per-receiver aggregation groups with `group_wait`,
//!   `group_interval` and `repeat_interval`
//! - **Inhibition**: source/target rules linked by `equal` labels, with an
//!   optional transitive policy
//! - **Atomic reload**: a new configuration either compiles and replaces the old
//!   one whole, or is rejected and changes nothing
//!
//! # Example
//!
//! ```rust
//! use claw_alert_router::{Alert, Config, Engine, LabelSet, LogNotifier};
//!
//! let config = Config::from_json(r#"{
//!     "route": {
//!         "receiver": "default",
//!         "group_by": ["alertname"],
//!         "group_wait": "0s",
//!         "routes": [
//!             {"match": {"severity": "critical"}, "receiver": "pager"}
//!         ]
//!     }
//! }"#).unwrap();
//!
//! let engine = Engine::new(&config).unwrap();
//! engine.add_notifier(Box::new(LogNotifier::default()));
//!
//! let alert = Alert::new(
//!     LabelSet::new()
//!         .with("alertname", "NodeDown")
//!         .with("severity", "critical"),
//! );
//! let outcome = engine.ingest(alert).unwrap();
//! assert_eq!(outcome.receivers, vec!["pager"]);
//!
//! // group_wait is zero, so the group is due immediately.
//! let sent = engine.flush_due(chrono::Utc::now());
//! assert_eq!(sent.len(), 1);
//! ```
//!
//! # Resolving a route without an engine
//!
//! ```rust
//! use claw_alert_router::{LabelSet, RouteConfig, RouteTree};
//!
//! let tree = RouteTree::from_config(
//!     &RouteConfig::new("default").routes([
//!         RouteConfig::new("critical-alerts")
//!             .match_label("severity", "critical")
//!             .continue_matching(true),
//!         RouteConfig::new("platform-team").match_label("team", "platform"),
//!     ]),
//!     None,
//! ).unwrap();
//!
//! let labels: LabelSet = [("severity", "critical"), ("team", "platform")].into_iter().collect();
//! let receivers: Vec<&str> = tree.resolve(&labels).iter().map(|r| r.receiver()).collect();
//! assert_eq!(receivers, ["critical-alerts", "platform-team"]);
//! ```

#![forbid(unsafe_code)]
#![doc(html_root_url = "https://docs.rs/claw-alert-router/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod duration;
pub mod engine;
pub mod error;
pub mod group;
pub mod inhibit;
pub mod labels;
pub mod matcher;
pub mod notify;
pub mod route;
pub mod store;
pub mod types;

// Re-export main types at crate root
pub use config::{CompiledConfig, Config, GlobalConfig, InhibitRuleConfig, ReceiverConfig, RouteConfig};
pub use engine::{Engine, IngestOutcome};
pub use error::{ConfigError, Result, RouterError};
pub use group::{FlushOptions, GroupEvent, GroupId, GroupSnapshot, GroupState, Grouper};
pub use inhibit::{InhibitRule, Inhibition, InhibitionPolicy, InhibitionView, Inhibitor};
pub use labels::{Fingerprint, LabelSet};
pub use matcher::{MatchType, Matcher, Matchers};
pub use notify::{
    ChannelNotifier, LogNotifier, Notification, NotificationResult, NotificationStatus, Notifier,
};
pub use route::{DeliveryMode, GroupBy, Route, RouteId, RouteOpts, RouteTree};
pub use store::AlertStore;
pub use types::{Alert, AlertStatus};
