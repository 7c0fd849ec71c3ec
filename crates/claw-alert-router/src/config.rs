//! Routing configuration.
//!
//! The configuration document is JSON with four sections:
//! - `global`: engine-wide knobs (delivery mode, inhibition policy, retention)
//! - `route`: the routing tree, root first
//! - `inhibit_rules`: inhibition rules in evaluation order
//! - `receivers`: declared receiver names (optional)
//!
//! A document is parsed, validated and compiled into a [`CompiledConfig`]
//! before the engine ever sees it, so matching never fails at runtime.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration;
use crate::error::ConfigError;
use crate::inhibit::{InhibitionPolicy, Inhibitor};
use crate::matcher::{Matcher, Matchers};
use crate::route::{DeliveryMode, RouteTree};

/// Default retention for resolved alerts.
pub const DEFAULT_RESOLVED_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Engine-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GlobalConfig {
    /// Include resolved alerts in the notification that follows their resolution.
    pub send_resolved: bool,
    /// Which matched routes receive an alert.
    pub delivery: DeliveryMode,
    /// Whether inhibited alerts may inhibit others.
    pub inhibition_policy: InhibitionPolicy,
    /// How long resolved alerts stay in the alert table.
    #[serde(with = "duration::serde_str")]
    pub resolved_retention: Duration,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            send_resolved: true,
            delivery: DeliveryMode::default(),
            inhibition_policy: InhibitionPolicy::default(),
            resolved_retention: DEFAULT_RESOLVED_RETENTION,
        }
    }
}

/// One node of the routing tree as written in configuration.
///
/// Unset fields inherit from the parent route.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    /// Receiver for alerts on this route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    /// Grouping keys; `["..."]` groups by every label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<Vec<String>>,
    /// Delay before a new group's first notification.
    #[serde(default, with = "duration::serde_opt", skip_serializing_if = "Option::is_none")]
    pub group_wait: Option<Duration>,
    /// Delay between flushes of an active group.
    #[serde(default, with = "duration::serde_opt", skip_serializing_if = "Option::is_none")]
    pub group_interval: Option<Duration>,
    /// Delay before re-sending an unchanged notification.
    #[serde(default, with = "duration::serde_opt", skip_serializing_if = "Option::is_none")]
    pub repeat_interval: Option<Duration>,
    /// Label equality matchers.
    #[serde(default, rename = "match", skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    /// Label regex matchers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_re: BTreeMap<String, String>,
    /// Matchers in `name=value` / `name=~regex` syntax.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matchers: Vec<String>,
    /// Keep examining later siblings after this route matches.
    #[serde(default, rename = "continue")]
    pub continue_matching: bool,
    /// Child routes in evaluation order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteConfig>,
}

impl RouteConfig {
    /// Creates a route with the given receiver.
    #[must_use]
    pub fn new(receiver: impl Into<String>) -> Self {
        Self {
            receiver: Some(receiver.into()),
            ..Self::default()
        }
    }

    /// Adds an equality matcher.
    #[must_use]
    pub fn match_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(name.into(), value.into());
        self
    }

    /// Adds a regex matcher.
    #[must_use]
    pub fn match_regex(mut self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.match_re.insert(name.into(), pattern.into());
        self
    }

    /// Adds a matcher in text form.
    #[must_use]
    pub fn matcher(mut self, matcher: impl Into<String>) -> Self {
        self.matchers.push(matcher.into());
        self
    }

    /// Sets the grouping keys.
    #[must_use]
    pub fn group_by<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Sets `group_wait`.
    #[must_use]
    pub const fn group_wait(mut self, wait: Duration) -> Self {
        self.group_wait = Some(wait);
        self
    }

    /// Sets `group_interval`.
    #[must_use]
    pub const fn group_interval(mut self, interval: Duration) -> Self {
        self.group_interval = Some(interval);
        self
    }

    /// Sets `repeat_interval`.
    #[must_use]
    pub const fn repeat_interval(mut self, interval: Duration) -> Self {
        self.repeat_interval = Some(interval);
        self
    }

    /// Sets `continue`.
    #[must_use]
    pub const fn continue_matching(mut self, value: bool) -> Self {
        self.continue_matching = value;
        self
    }

    /// Appends child routes.
    #[must_use]
    pub fn routes(mut self, routes: impl IntoIterator<Item = Self>) -> Self {
        self.routes.extend(routes);
        self
    }

    /// Returns true if the route carries any matcher.
    #[must_use]
    pub fn has_matchers(&self) -> bool {
        !self.match_labels.is_empty() || !self.match_re.is_empty() || !self.matchers.is_empty()
    }

    /// Compiles this route's own matchers.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for invalid matcher text or regexes.
    pub fn compile_matchers(&self) -> Result<Matchers, ConfigError> {
        compile_matchers(&self.match_labels, &self.match_re, &self.matchers)
    }
}

/// An inhibition rule as written in configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct InhibitRuleConfig {
    /// Source equality matchers.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub source_match: BTreeMap<String, String>,
    /// Source regex matchers.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub source_match_re: BTreeMap<String, String>,
    /// Source matchers in text form.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_matchers: Vec<String>,
    /// Target equality matchers.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub target_match: BTreeMap<String, String>,
    /// Target regex matchers.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub target_match_re: BTreeMap<String, String>,
    /// Target matchers in text form.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub target_matchers: Vec<String>,
    /// Labels that must be equal on source and target.
    pub equal: Vec<String>,
}

impl InhibitRuleConfig {
    /// Compiles the source side.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for invalid matcher text or regexes.
    pub fn compile_source(&self) -> Result<Matchers, ConfigError> {
        compile_matchers(&self.source_match, &self.source_match_re, &self.source_matchers)
    }

    /// Compiles the target side.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for invalid matcher text or regexes.
    pub fn compile_target(&self) -> Result<Matchers, ConfigError> {
        compile_matchers(&self.target_match, &self.target_match_re, &self.target_matchers)
    }
}

/// A declared notification receiver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// Receiver name referenced by routes.
    pub name: String,
}

/// The full configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Engine-wide settings.
    #[serde(default)]
    pub global: GlobalConfig,
    /// The root route.
    pub route: RouteConfig,
    /// Inhibition rules.
    #[serde(default)]
    pub inhibit_rules: Vec<InhibitRuleConfig>,
    /// Declared receivers; when empty, any receiver name is accepted.
    #[serde(default)]
    pub receivers: Vec<ReceiverConfig>,
}

/// A validated configuration, ready for the engine.
#[derive(Debug, Clone)]
pub struct CompiledConfig {
    /// The routing tree.
    pub tree: RouteTree,
    /// The inhibition rules.
    pub inhibitor: Inhibitor,
    /// Engine-wide settings.
    pub global: GlobalConfig,
}

impl Config {
    /// Creates a configuration with only a root route.
    #[must_use]
    pub fn new(route: RouteConfig) -> Self {
        Self {
            global: GlobalConfig::default(),
            route,
            inhibit_rules: Vec::new(),
            receivers: Vec::new(),
        }
    }

    /// Adds an inhibition rule.
    #[must_use]
    pub fn with_inhibit_rule(mut self, rule: InhibitRuleConfig) -> Self {
        self.inhibit_rules.push(rule);
        self
    }

    /// Replaces the global settings.
    #[must_use]
    pub fn with_global(mut self, global: GlobalConfig) -> Self {
        self.global = global;
        self
    }

    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_json(&content)
    }

    /// Parses configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or validation fails.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validates the configuration by compiling it.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.compile().map(|_| ())
    }

    /// Compiles the routing tree and inhibition rules.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the receiver list has duplicates, or if the
    /// tree or any rule is invalid.
    pub fn compile(&self) -> Result<CompiledConfig, ConfigError> {
        let declared = self.declared_receivers()?;
        let tree = RouteTree::from_config(&self.route, declared.as_ref())?;
        let inhibitor = Inhibitor::from_configs(&self.inhibit_rules, self.global.inhibition_policy)?;

        Ok(CompiledConfig {
            tree,
            inhibitor,
            global: self.global.clone(),
        })
    }

    fn declared_receivers(&self) -> Result<Option<HashSet<String>>, ConfigError> {
        if self.receivers.is_empty() {
            return Ok(None);
        }
        let mut names = HashSet::with_capacity(self.receivers.len());
        for receiver in &self.receivers {
            if receiver.name.is_empty() {
                return Err(ConfigError::InvalidRoute {
                    path: "receivers".to_string(),
                    reason: "receiver name cannot be empty".to_string(),
                });
            }
            if !names.insert(receiver.name.clone()) {
                return Err(ConfigError::DuplicateReceiver {
                    name: receiver.name.clone(),
                });
            }
        }
        Ok(Some(names))
    }
}

/// Builds a matcher sequence from the three configuration forms, in the
/// order: equality map, regex map, text matchers.
fn compile_matchers(
    equal: &BTreeMap<String, String>,
    regex: &BTreeMap<String, String>,
    text: &[String],
) -> Result<Matchers, ConfigError> {
    let mut matchers = Matchers::new();
    for (name, value) in equal {
        matchers.push(Matcher::equal(name.as_str(), value.as_str())?);
    }
    for (name, pattern) in regex {
        matchers.push(Matcher::regex(name.as_str(), pattern.as_str())?);
    }
    for matcher in text {
        matchers.push(matcher.parse()?);
    }
    Ok(matchers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelSet;
    use std::io::Write;

    const FULL_CONFIG: &str = r#"{
        "global": {
            "send_resolved": false,
            "delivery": "full_path",
            "inhibition_policy": "transitive",
            "resolved_retention": "30m"
        },
        "route": {
            "receiver": "default",
            "group_by": ["alertname"],
            "group_wait": "10s",
            "group_interval": "10s",
            "repeat_interval": "1h",
            "routes": [
                {
                    "match": {"severity": "critical"},
                    "match_re": {"service": "web-.*"},
                    "matchers": ["team!=data"],
                    "receiver": "critical-alerts",
                    "continue": true
                },
                {"match": {"team": "platform"}, "receiver": "platform-team"}
            ]
        },
        "inhibit_rules": [
            {
                "source_match": {"alertname": "NodeDown"},
                "target_match": {"severity": "warning"},
                "target_match_re": {"instance": ".*"},
                "equal": ["instance"]
            }
        ],
        "receivers": [
            {"name": "default"},
            {"name": "critical-alerts"},
            {"name": "platform-team"}
        ]
    }"#;

    mod parse_tests {
        use super::*;

        #[test]
        fn full_document_parses() {
            let config = Config::from_json(FULL_CONFIG).unwrap();
            assert!(!config.global.send_resolved);
            assert_eq!(config.global.delivery, DeliveryMode::FullPath);
            assert_eq!(config.global.inhibition_policy, InhibitionPolicy::Transitive);
            assert_eq!(config.global.resolved_retention, Duration::from_secs(1_800));
            assert_eq!(config.route.group_wait, Some(Duration::from_secs(10)));
            assert_eq!(config.route.routes.len(), 2);
            assert!(config.route.routes[0].continue_matching);
            assert_eq!(config.inhibit_rules[0].equal, vec!["instance".to_string()]);
        }

        #[test]
        fn minimal_document_uses_defaults() {
            let config = Config::from_json(r#"{"route": {"receiver": "default"}}"#).unwrap();
            assert_eq!(config.global, GlobalConfig::default());
            assert!(config.global.send_resolved);
            assert_eq!(config.global.delivery, DeliveryMode::Deepest);
            assert!(config.inhibit_rules.is_empty());
        }

        #[test]
        fn unknown_field_is_rejected() {
            let result = Config::from_json(r#"{"route": {"receiver": "default", "recevier": "x"}}"#);
            assert!(matches!(result, Err(ConfigError::Parse(_))));
        }

        #[test]
        fn bad_duration_is_rejected() {
            let result = Config::from_json(r#"{"route": {"receiver": "default", "group_wait": "soon"}}"#);
            match result {
                Err(ConfigError::Parse(msg)) => assert!(msg.contains("invalid duration")),
                other => panic!("expected Parse, got {other:?}"),
            }
        }

        #[test]
        fn serializes_back_to_equivalent_json() {
            let config = Config::from_json(FULL_CONFIG).unwrap();
            let json = config.to_json().unwrap();
            let reparsed = Config::from_json(&json).unwrap();
            assert_eq!(config, reparsed);
            assert!(json.contains("\"group_wait\": \"10s\""));
        }
    }

    mod validation_tests {
        use super::*;

        #[test]
        fn compiles_full_document() {
            let compiled = Config::from_json(FULL_CONFIG).unwrap().compile().unwrap();
            assert_eq!(compiled.tree.len(), 3);
            assert_eq!(compiled.inhibitor.rules().len(), 1);
            assert_eq!(compiled.inhibitor.policy(), InhibitionPolicy::Transitive);

            let labels: LabelSet = [
                ("severity", "critical"),
                ("service", "web-frontend"),
                ("team", "platform"),
            ]
            .into_iter()
            .collect();
            let receivers: Vec<&str> = compiled
                .tree
                .resolve(&labels)
                .iter()
                .map(|r| r.receiver())
                .collect();
            assert_eq!(receivers, vec!["critical-alerts", "platform-team"]);
        }

        #[test]
        fn undefined_receiver_is_rejected() {
            let json = r#"{
                "route": {"receiver": "default", "routes": [{"receiver": "pager"}]},
                "receivers": [{"name": "default"}]
            }"#;
            assert!(matches!(
                Config::from_json(json),
                Err(ConfigError::UndefinedReceiver { .. })
            ));
        }

        #[test]
        fn duplicate_receiver_is_rejected() {
            let json = r#"{
                "route": {"receiver": "default"},
                "receivers": [{"name": "default"}, {"name": "default"}]
            }"#;
            assert!(matches!(
                Config::from_json(json),
                Err(ConfigError::DuplicateReceiver { .. })
            ));
        }

        #[test]
        fn invalid_regex_in_rule_is_rejected() {
            let json = r#"{
                "route": {"receiver": "default"},
                "inhibit_rules": [{"source_match_re": {"alertname": "("}}]
            }"#;
            assert!(matches!(
                Config::from_json(json),
                Err(ConfigError::InvalidRegex { .. })
            ));
        }

        #[test]
        fn invalid_matcher_text_is_rejected() {
            let json = r#"{"route": {"receiver": "default", "routes": [{"matchers": ["severity"]}]}}"#;
            assert!(matches!(
                Config::from_json(json),
                Err(ConfigError::InvalidMatcher { .. })
            ));
        }

        #[test]
        fn missing_route_is_a_parse_error() {
            assert!(matches!(Config::from_json("{}"), Err(ConfigError::Parse(_))));
        }
    }

    mod file_tests {
        use super::*;

        #[test]
        fn from_file_reads_json() {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            file.write_all(FULL_CONFIG.as_bytes()).unwrap();
            let config = Config::from_file(file.path()).unwrap();
            assert_eq!(config.receivers.len(), 3);
        }

        #[test]
        fn from_file_missing_path() {
            let dir = tempfile::tempdir().unwrap();
            let result = Config::from_file(dir.path().join("missing.json"));
            match result {
                Err(ConfigError::Io { path, .. }) => assert!(path.ends_with("missing.json")),
                other => panic!("expected Io, got {other:?}"),
            }
        }
    }

    #[test]
    fn builder_matches_parsed_document() {
        let built = Config::new(
            RouteConfig::new("default").routes([RouteConfig::new("pager")
                .match_label("severity", "critical")
                .continue_matching(true)]),
        );
        let parsed = Config::from_json(
            r#"{"route": {"receiver": "default", "routes": [
                {"receiver": "pager", "match": {"severity": "critical"}, "continue": true}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(built, parsed);
    }
}
