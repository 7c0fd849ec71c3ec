//! Inhibition: suppressing target alerts while a matching source alert fires.
//!
//! A rule applies to a candidate when the candidate satisfies the rule's
//! target matchers. It then inhibits the candidate if some other firing
//! alert satisfies the source matchers and agrees with the candidate on
//! every `equal` label. A label missing on either side never counts as
//! agreement.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::InhibitRuleConfig;
use crate::error::ConfigError;
use crate::labels::LabelSet;
use crate::matcher::Matchers;

/// Whether an inhibited alert may still inhibit others.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InhibitionPolicy {
    /// Any firing alert can act as a source, inhibited or not.
    #[default]
    NonTransitive,
    /// A source that is itself inhibited cannot inhibit.
    Transitive,
}

/// A compiled inhibition rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InhibitRule {
    source: Matchers,
    target: Matchers,
    equal: Vec<String>,
}

impl InhibitRule {
    /// Creates a rule from compiled matchers.
    #[must_use]
    pub fn new(source: Matchers, target: Matchers, equal: Vec<String>) -> Self {
        Self {
            source,
            target,
            equal,
        }
    }

    /// Compiles a rule from configuration. `index` is used in errors only.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a matcher is invalid or an `equal` label is empty.
    pub fn from_config(cfg: &InhibitRuleConfig, index: usize) -> Result<Self, ConfigError> {
        if cfg.equal.iter().any(String::is_empty) {
            return Err(ConfigError::InvalidInhibitRule {
                index,
                reason: "equal label cannot be empty".to_string(),
            });
        }
        Ok(Self::new(
            cfg.compile_source()?,
            cfg.compile_target()?,
            cfg.equal.clone(),
        ))
    }

    /// Source matchers.
    #[must_use]
    pub const fn source(&self) -> &Matchers {
        &self.source
    }

    /// Target matchers.
    #[must_use]
    pub const fn target(&self) -> &Matchers {
        &self.target
    }

    /// Labels that must agree between source and target.
    #[must_use]
    pub fn equal(&self) -> &[String] {
        &self.equal
    }

    /// Returns true if `candidate` is a potential target of this rule.
    #[must_use]
    pub fn applies_to(&self, candidate: &LabelSet) -> bool {
        self.target.matches(candidate)
    }

    /// Returns true if `source` can inhibit `target` under this rule,
    /// ignoring policy.
    #[must_use]
    pub fn inhibits(&self, source: &LabelSet, target: &LabelSet) -> bool {
        source != target
            && self.applies_to(target)
            && self.source.matches(source)
            && self.has_equal(source, target)
    }

    fn has_equal(&self, source: &LabelSet, target: &LabelSet) -> bool {
        self.equal.iter().all(|key| match (source.get(key), target.get(key)) {
            (Some(s), Some(t)) => s == t,
            _ => false,
        })
    }
}

/// Which rule and source alert inhibit a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inhibition<'a> {
    /// Index of the rule in configuration order.
    pub rule: usize,
    /// Labels of the inhibiting alert.
    pub source: &'a LabelSet,
}

/// Evaluates a rule set against the firing alerts.
#[derive(Debug, Clone, Default)]
pub struct Inhibitor {
    rules: Vec<InhibitRule>,
    policy: InhibitionPolicy,
}

impl Inhibitor {
    /// Creates an inhibitor.
    #[must_use]
    pub fn new(rules: Vec<InhibitRule>, policy: InhibitionPolicy) -> Self {
        Self { rules, policy }
    }

    /// Compiles every rule in `configs`.
    ///
    /// # Errors
    ///
    /// Returns the first rule's `ConfigError`.
    pub fn from_configs(
        configs: &[InhibitRuleConfig],
        policy: InhibitionPolicy,
    ) -> Result<Self, ConfigError> {
        let rules = configs
            .iter()
            .enumerate()
            .map(|(i, cfg)| InhibitRule::from_config(cfg, i))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules, policy))
    }

    /// The compiled rules.
    #[must_use]
    pub fn rules(&self) -> &[InhibitRule] {
        &self.rules
    }

    /// The configured policy.
    #[must_use]
    pub const fn policy(&self) -> InhibitionPolicy {
        self.policy
    }

    /// Returns true if any rule inhibits `candidate` given the `active` (firing) alerts.
    #[must_use]
    pub fn is_inhibited(&self, candidate: &LabelSet, active: &[&LabelSet]) -> bool {
        self.evaluate(active).is_inhibited(candidate)
    }

    /// Returns the first rule and source alert that inhibit `candidate`.
    #[must_use]
    pub fn inhibited_by<'a>(
        &self,
        candidate: &LabelSet,
        active: &[&'a LabelSet],
    ) -> Option<Inhibition<'a>> {
        self.evaluate(active).inhibited_by(candidate)
    }

    /// Works out which of the `active` alerts may act as sources.
    ///
    /// Under the transitive policy every active alert is settled once, in
    /// label order, and an alert still being settled is not a valid source.
    /// Query the returned view for as many candidates as needed.
    #[must_use]
    pub fn evaluate<'a>(&self, active: &[&'a LabelSet]) -> InhibitionView<'_, 'a> {
        match self.policy {
            InhibitionPolicy::NonTransitive => InhibitionView {
                rules: &self.rules,
                sources: active.to_vec(),
                settled: HashMap::new(),
            },
            InhibitionPolicy::Transitive => self.settle_all(active),
        }
    }

    fn settle_all<'a>(&self, active: &[&'a LabelSet]) -> InhibitionView<'_, 'a> {
        let mut alerts = active.to_vec();
        alerts.sort();
        alerts.dedup();

        let mut marks = vec![Mark::Unvisited; alerts.len()];
        for index in 0..alerts.len() {
            self.settle(index, &alerts, &mut marks);
        }

        let mut sources = Vec::new();
        let mut settled = HashMap::with_capacity(alerts.len());
        for (alert, mark) in alerts.into_iter().zip(marks) {
            let result = match mark {
                Mark::Settled(result) => result,
                Mark::Unvisited | Mark::InProgress => None,
            };
            if result.is_none() {
                sources.push(alert);
            }
            settled.insert(alert, result);
        }

        InhibitionView {
            rules: &self.rules,
            sources,
            settled,
        }
    }

    fn settle<'a>(
        &self,
        index: usize,
        alerts: &[&'a LabelSet],
        marks: &mut [Mark<'a>],
    ) -> Option<Inhibition<'a>> {
        if let Mark::Settled(result) = marks[index] {
            return result;
        }
        marks[index] = Mark::InProgress;
        let candidate = alerts[index];

        let mut found = None;
        'rules: for (rule, inhibit_rule) in self.rules.iter().enumerate() {
            if !inhibit_rule.applies_to(candidate) {
                continue;
            }
            for (source_index, source) in alerts.iter().copied().enumerate() {
                if !inhibit_rule.inhibits(source, candidate) {
                    continue;
                }
                let source_inhibited = match marks[source_index] {
                    // Still being settled: using it would close a cycle.
                    Mark::InProgress => true,
                    Mark::Settled(result) => result.is_some(),
                    Mark::Unvisited => self.settle(source_index, alerts, marks).is_some(),
                };
                if !source_inhibited {
                    found = Some(Inhibition { rule, source });
                    break 'rules;
                }
            }
        }

        marks[index] = Mark::Settled(found);
        found
    }
}

#[derive(Debug, Clone, Copy)]
enum Mark<'a> {
    Unvisited,
    InProgress,
    Settled(Option<Inhibition<'a>>),
}

/// Inhibition state of one set of firing alerts.
///
/// Built by [`Inhibitor::evaluate`]. Candidates outside the evaluated set are
/// checked against the alerts that may act as sources.
#[derive(Debug)]
pub struct InhibitionView<'r, 'a> {
    rules: &'r [InhibitRule],
    sources: Vec<&'a LabelSet>,
    settled: HashMap<&'a LabelSet, Option<Inhibition<'a>>>,
}

impl<'a> InhibitionView<'_, 'a> {
    /// Alerts allowed to inhibit others.
    #[must_use]
    pub fn sources(&self) -> &[&'a LabelSet] {
        &self.sources
    }

    /// Returns true if `candidate` is inhibited.
    #[must_use]
    pub fn is_inhibited(&self, candidate: &LabelSet) -> bool {
        self.inhibited_by(candidate).is_some()
    }

    /// Returns the first rule and source alert that inhibit `candidate`.
    #[must_use]
    pub fn inhibited_by(&self, candidate: &LabelSet) -> Option<Inhibition<'a>> {
        let found = match self.settled.get(candidate) {
            Some(settled) => *settled,
            None => self.first_inhibition(candidate),
        };
        if let Some(inhibition) = found {
            debug!(
                target_labels = %candidate,
                source_labels = %inhibition.source,
                rule = inhibition.rule,
                "Alert inhibited"
            );
        }
        found
    }

    fn first_inhibition(&self, candidate: &LabelSet) -> Option<Inhibition<'a>> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.applies_to(candidate))
            .find_map(|(rule, inhibit_rule)| {
                self.sources
                    .iter()
                    .copied()
                    .find(|source| inhibit_rule.inhibits(source, candidate))
                    .map(|source| Inhibition { rule, source })
            })
    }
}
