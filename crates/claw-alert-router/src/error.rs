//! Error types for the claw-alert-router crate.

use thiserror::Error;

/// Errors raised while building a routing configuration.
///
/// These are only ever produced when a configuration is constructed or
/// reloaded. Matching, grouping and inhibition never fail at runtime.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A matcher string could not be parsed.
    #[error("invalid matcher {input:?}: {reason}")]
    InvalidMatcher {
        /// The offending matcher text.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A regular expression in a matcher failed to compile.
    #[error("invalid regex for label {label:?}: {reason}")]
    InvalidRegex {
        /// The label the regex was attached to.
        label: String,
        /// The compiler's error message.
        reason: String,
    },

    /// A duration string could not be parsed.
    #[error("invalid duration {input:?}: {reason}")]
    InvalidDuration {
        /// The offending duration text.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A route in the tree is malformed.
    #[error("invalid route at {path}: {reason}")]
    InvalidRoute {
        /// Position of the route in the tree, e.g. `route.routes[1]`.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An inhibition rule is malformed.
    #[error("invalid inhibit rule #{index}: {reason}")]
    InvalidInhibitRule {
        /// Index of the rule in configuration order.
        index: usize,
        /// Why it was rejected.
        reason: String,
    },

    /// A route references a receiver missing from the receiver list.
    #[error("undefined receiver {name:?} used in {path}")]
    UndefinedReceiver {
        /// The receiver name.
        name: String,
        /// Position of the referencing route.
        path: String,
    },

    /// The receiver list declares the same name twice.
    #[error("duplicate receiver {name:?}")]
    DuplicateReceiver {
        /// The receiver name.
        name: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {reason}")]
    Io {
        /// Path of the file.
        path: String,
        /// The underlying I/O error.
        reason: String,
    },

    /// The configuration document is not valid JSON for the schema.
    #[error("failed to parse config: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Errors that can occur in the routing engine.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An alert was rejected at the ingestion boundary.
    #[error("invalid alert: {reason}")]
    InvalidAlert {
        /// Why the alert was rejected.
        reason: String,
    },

    /// A notifier failed to accept a notification.
    #[error("notification failed on {notifier}: {reason}")]
    NotificationFailed {
        /// The notifier name.
        notifier: String,
        /// The reason the notification failed.
        reason: String,
    },
}

/// Result type for routing operations.
pub type Result<T> = std::result::Result<T, RouterError>;
