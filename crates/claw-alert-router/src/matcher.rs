//! Label matchers.
//!
//! A [`Matcher`] is a single predicate over one label: equality or a fully
//! anchored regular expression, optionally negated. [`Matchers`] is an ordered
//! conjunction of them.
//!
//! Matchers also have a textual form used in configuration files:
//!
//! ```text
//! severity=critical
//! team!="data"
//! instance=~"web-.*"
//! service!~db-[0-9]+
//! ```

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::labels::LabelSet;

/// Textual matcher: label name, operator, optionally quoted value.
static MATCHER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(=~|!~|!=|=)\s*(.*?)\s*$"#)
        .unwrap_or_else(|_| unreachable!())
});

/// How a matcher compares the label value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchType {
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `=~`
    Regex,
    /// `!~`
    NotRegex,
}

impl MatchType {
    /// Returns the operator symbol.
    #[must_use]
    pub const fn as_symbol(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Regex => "=~",
            Self::NotRegex => "!~",
        }
    }

    /// Returns true for the regex operators.
    #[must_use]
    pub const fn is_regex(&self) -> bool {
        matches!(self, Self::Regex | Self::NotRegex)
    }

    /// Returns true for the negated operators.
    #[must_use]
    pub const fn is_negated(&self) -> bool {
        matches!(self, Self::NotEqual | Self::NotRegex)
    }

    const fn from_flags(is_regex: bool, negate: bool) -> Self {
        match (is_regex, negate) {
            (false, false) => Self::Equal,
            (false, true) => Self::NotEqual,
            (true, false) => Self::Regex,
            (true, true) => Self::NotRegex,
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_symbol())
    }
}

/// A predicate over a single label.
#[derive(Debug, Clone)]
pub struct Matcher {
    name: String,
    value: String,
    match_type: MatchType,
    /// Anchored pattern, present for the regex operators.
    re: Option<Regex>,
}

impl Matcher {
    /// Creates a matcher.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidMatcher` if the label name is empty and
    /// `ConfigError::InvalidRegex` if a regex value does not compile.
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        is_regex: bool,
        negate: bool,
    ) -> Result<Self, ConfigError> {
        Self::with_type(name, value, MatchType::from_flags(is_regex, negate))
    }

    /// Creates a matcher from an explicit [`MatchType`].
    ///
    /// # Errors
    ///
    /// See [`Matcher::new`].
    pub fn with_type(
        name: impl Into<String>,
        value: impl Into<String>,
        match_type: MatchType,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let value = value.into();

        if name.is_empty() {
            return Err(ConfigError::InvalidMatcher {
                input: format!("{match_type}{value}"),
                reason: "label name cannot be empty".to_string(),
            });
        }

        let re = if match_type.is_regex() {
            let anchored = format!("^(?:{value})$");
            Some(Regex::new(&anchored).map_err(|e| ConfigError::InvalidRegex {
                label: name.clone(),
                reason: e.to_string(),
            })?)
        } else {
            None
        };

        Ok(Self {
            name,
            value,
            match_type,
            re,
        })
    }

    /// `name = value`
    ///
    /// # Errors
    ///
    /// See [`Matcher::new`].
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Result<Self, ConfigError> {
        Self::with_type(name, value, MatchType::Equal)
    }

    /// `name != value`
    ///
    /// # Errors
    ///
    /// See [`Matcher::new`].
    pub fn not_equal(
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Self::with_type(name, value, MatchType::NotEqual)
    }

    /// `name =~ pattern`
    ///
    /// # Errors
    ///
    /// See [`Matcher::new`].
    pub fn regex(name: impl Into<String>, pattern: impl Into<String>) -> Result<Self, ConfigError> {
        Self::with_type(name, pattern, MatchType::Regex)
    }

    /// `name !~ pattern`
    ///
    /// # Errors
    ///
    /// See [`Matcher::new`].
    pub fn not_regex(
        name: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Self::with_type(name, pattern, MatchType::NotRegex)
    }

    /// The label name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value or pattern source.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The operator.
    #[must_use]
    pub const fn match_type(&self) -> MatchType {
        self.match_type
    }

    /// Evaluates the matcher against a label set.
    ///
    /// An absent label is treated as the empty string.
    #[must_use]
    pub fn matches(&self, labels: &LabelSet) -> bool {
        let actual = labels.value_or_empty(&self.name);
        let hit = match &self.re {
            Some(re) => re.is_match(actual),
            None => actual == self.value,
        };
        hit != self.match_type.is_negated()
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value && self.match_type == other.match_type
    }
}

impl Eq for Matcher {}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}\"{}\"", self.name, self.match_type, escape(&self.value))
    }
}

impl FromStr for Matcher {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = MATCHER_REGEX
            .captures(s)
            .ok_or_else(|| ConfigError::InvalidMatcher {
                input: s.to_string(),
                reason: "expected <label><op><value> with op one of =, !=, =~, !~".to_string(),
            })?;

        let name = &caps[1];
        let match_type = match &caps[2] {
            "=" => MatchType::Equal,
            "!=" => MatchType::NotEqual,
            "=~" => MatchType::Regex,
            _ => MatchType::NotRegex,
        };
        let value = unquote(&caps[3]).map_err(|reason| ConfigError::InvalidMatcher {
            input: s.to_string(),
            reason,
        })?;

        Self::with_type(name, value, match_type)
    }
}

impl TryFrom<String> for Matcher {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl Serialize for Matcher {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Matcher {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Escapes a value for the quoted text form. Inverse of [`unquote`].
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

/// Strips surrounding double quotes and resolves `\"`, `\\` and `\n` escapes.
fn unquote(raw: &str) -> Result<String, String> {
    let Some(inner) = raw.strip_prefix('"') else {
        return Ok(raw.to_string());
    };
    let Some(inner) = inner.strip_suffix('"') else {
        return Err("unterminated quoted value".to_string());
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some('n') => out.push('\n'),
                // Regex escapes such as `\d` pass through untouched.
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => return Err("dangling escape at end of value".to_string()),
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

/// An ordered conjunction of matchers.
///
/// An empty sequence matches every label set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Matchers(Vec<Matcher>);

impl Matchers {
    /// Creates an empty (match-all) sequence.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a matcher.
    pub fn push(&mut self, matcher: Matcher) {
        self.0.push(matcher);
    }

    /// Returns true if every matcher is satisfied.
    #[must_use]
    pub fn matches(&self, labels: &LabelSet) -> bool {
        self.0.iter().all(|m| m.matches(labels))
    }

    /// Number of matchers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no matchers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the matchers in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Matcher> {
        self.0.iter()
    }
}

impl FromIterator<Matcher> for Matchers {
    fn from_iter<T: IntoIterator<Item = Matcher>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Matchers {
    type Item = &'a Matcher;
    type IntoIter = std::slice::Iter<'a, Matcher>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Matchers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, m) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{m}")?;
        }
        f.write_str("}")
    }
}
