//! The routing tree.
//!
//! Routes are stored in an arena indexed by [`RouteId`], in pre-order, with
//! each node holding the ids of its children. Construction and resolution
//! are both iterative walks over indices, so arbitrarily deep trees never
//! recurse on the call stack.
//!
//! Resolution follows Alertmanager semantics:
//!
//! - the walk starts at the root's children;
//! - a matching node is recorded and its children are always examined;
//! - after a matching node's subtree, later siblings are examined only if the
//!   node has `continue` set;
//! - if nothing matches, the root itself is the result.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::RouteConfig;
use crate::error::ConfigError;
use crate::labels::LabelSet;
use crate::matcher::Matchers;

/// Default `group_wait` when the root route leaves it unset.
pub const DEFAULT_GROUP_WAIT: Duration = Duration::from_secs(30);
/// Default `group_interval` when the root route leaves it unset.
pub const DEFAULT_GROUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Default `repeat_interval` when the root route leaves it unset.
pub const DEFAULT_REPEAT_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

/// Special `group_by` entry meaning "every label".
pub const GROUP_BY_ALL: &str = "...";

/// Index of a route in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteId(usize);

impl RouteId {
    /// The root route.
    pub const ROOT: Self = Self(0);

    /// Returns the arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which matched routes receive an alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Only matched routes none of whose children matched.
    #[default]
    Deepest,
    /// Every matched route, in pre-order.
    FullPath,
}

/// Label keys that partition alerts into aggregation groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupBy {
    /// Group by the complete label set (one alert per group).
    All,
    /// Group by the listed keys, sorted and deduplicated.
    Labels(Vec<String>),
}

impl GroupBy {
    /// Builds a `GroupBy` from configured keys.
    ///
    /// # Errors
    ///
    /// Returns a reason string if `...` is mixed with other keys or a key is empty.
    pub fn from_keys<I, S>(keys: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys: BTreeSet<String> = keys.into_iter().map(|k| k.as_ref().to_string()).collect();
        if keys.contains(GROUP_BY_ALL) {
            if keys.len() > 1 {
                return Err(format!("cannot combine {GROUP_BY_ALL:?} with other group_by labels"));
            }
            return Ok(Self::All);
        }
        if keys.iter().any(String::is_empty) {
            return Err("group_by label cannot be empty".to_string());
        }
        Ok(Self::Labels(keys.into_iter().collect()))
    }

    /// Projects a label set onto the grouping keys.
    #[must_use]
    pub fn project(&self, labels: &LabelSet) -> LabelSet {
        match self {
            Self::All => labels.clone(),
            Self::Labels(keys) => labels.project(keys.iter().map(String::as_str)),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "[{GROUP_BY_ALL}]"),
            Self::Labels(keys) => write!(f, "[{}]", keys.join(", ")),
        }
    }
}

/// The effective configuration of a route after inheritance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOpts {
    /// Receiver that alerts on this route are delivered to.
    pub receiver: String,
    /// Grouping keys.
    pub group_by: GroupBy,
    /// Delay before the first notification of a new group.
    pub group_wait: Duration,
    /// Delay between flushes of an active group.
    pub group_interval: Duration,
    /// Delay before re-sending an unchanged notification.
    pub repeat_interval: Duration,
}

/// A node in the routing tree.
#[derive(Debug, Clone)]
pub struct Route {
    id: RouteId,
    parent: Option<RouteId>,
    depth: usize,
    path: String,
    matchers: Matchers,
    continue_matching: bool,
    children: Vec<RouteId>,
    opts: RouteOpts,
}

impl Route {
    /// This route's id.
    #[must_use]
    pub const fn id(&self) -> RouteId {
        self.id
    }

    /// The parent route, `None` for the root.
    #[must_use]
    pub const fn parent(&self) -> Option<RouteId> {
        self.parent
    }

    /// Distance from the root.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Position in the configuration, e.g. `route.routes[0].routes[1]`.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The route's own matchers (empty matches everything).
    #[must_use]
    pub const fn matchers(&self) -> &Matchers {
        &self.matchers
    }

    /// Whether later siblings are still examined after this route matches.
    #[must_use]
    pub const fn continue_matching(&self) -> bool {
        self.continue_matching
    }

    /// Child routes in configuration order.
    #[must_use]
    pub fn children(&self) -> &[RouteId] {
        &self.children
    }

    /// Effective receiver.
    #[must_use]
    pub fn receiver(&self) -> &str {
        &self.opts.receiver
    }

    /// Effective configuration.
    #[must_use]
    pub const fn opts(&self) -> &RouteOpts {
        &self.opts
    }

    /// Returns true if the route's matchers accept `labels`.
    #[must_use]
    pub fn matches(&self, labels: &LabelSet) -> bool {
        self.matchers.matches(labels)
    }
}

/// An immutable routing tree.
///
/// Trees are never modified after construction; a configuration reload
/// builds a new tree and swaps it in whole.
#[derive(Debug, Clone)]
pub struct RouteTree {
    routes: Vec<Route>,
}

struct ResolveFrame {
    parent: RouteId,
    next_child: usize,
    child_matched: bool,
}

impl RouteTree {
    /// Compiles a tree from its configuration.
    ///
    /// `receivers`, when given, is the set of declared receiver names; every
    /// explicitly configured receiver must be in it.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the root route has matchers, sets
    /// `continue` or lacks a receiver, if a matcher or `group_by` is invalid,
    /// or if a receiver is undeclared.
    pub fn from_config(
        root: &RouteConfig,
        receivers: Option<&HashSet<String>>,
    ) -> Result<Self, ConfigError> {
        const ROOT_PATH: &str = "route";

        if root.has_matchers() {
            return Err(ConfigError::InvalidRoute {
                path: ROOT_PATH.to_string(),
                reason: "root route must not have any matchers".to_string(),
            });
        }
        if root.continue_matching {
            return Err(ConfigError::InvalidRoute {
                path: ROOT_PATH.to_string(),
                reason: "cannot have continue in root route".to_string(),
            });
        }
        let Some(root_receiver) = root.receiver.clone() else {
            return Err(ConfigError::InvalidRoute {
                path: ROOT_PATH.to_string(),
                reason: "root route must specify a default receiver".to_string(),
            });
        };

        let root_defaults = RouteOpts {
            receiver: root_receiver,
            group_by: GroupBy::All,
            group_wait: DEFAULT_GROUP_WAIT,
            group_interval: DEFAULT_GROUP_INTERVAL,
            repeat_interval: DEFAULT_REPEAT_INTERVAL,
        };

        let mut routes: Vec<Route> = Vec::new();
        // (config, parent, inherited opts, path), popped in pre-order.
        let mut stack: Vec<(&RouteConfig, Option<RouteId>, RouteOpts, String)> =
            vec![(root, None, root_defaults, ROOT_PATH.to_string())];

        while let Some((cfg, parent, inherited, path)) = stack.pop() {
            if let (Some(name), Some(declared)) = (&cfg.receiver, receivers) {
                if !declared.contains(name) {
                    return Err(ConfigError::UndefinedReceiver {
                        name: name.clone(),
                        path,
                    });
                }
            }

            let opts = merge_opts(cfg, inherited, &path)?;
            let matchers = cfg.compile_matchers()?;
            let id = RouteId(routes.len());
            let depth = parent.map_or(0, |p| routes[p.0].depth + 1);

            if let Some(p) = parent {
                routes[p.0].children.push(id);
            }

            for (i, child) in cfg.routes.iter().enumerate().rev() {
                stack.push((child, Some(id), opts.clone(), format!("{path}.routes[{i}]")));
            }

            routes.push(Route {
                id,
                parent,
                depth,
                path,
                matchers,
                continue_matching: cfg.continue_matching,
                children: Vec::with_capacity(cfg.routes.len()),
                opts,
            });
        }

        Ok(Self { routes })
    }

    /// The root route.
    #[must_use]
    pub fn root(&self) -> &Route {
        &self.routes[RouteId::ROOT.0]
    }

    /// Looks up a route by id.
    #[must_use]
    pub fn get(&self, id: RouteId) -> Option<&Route> {
        self.routes.get(id.0)
    }

    /// Number of routes, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// A tree always has a root, so this is always false.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Iterates over all routes in pre-order.
    pub fn iter(&self) -> std::slice::Iter<'_, Route> {
        self.routes.iter()
    }

    /// Effective configuration of a route.
    #[must_use]
    pub fn effective_config(&self, id: RouteId) -> Option<&RouteOpts> {
        self.get(id).map(Route::opts)
    }

    /// Every receiver referenced by the tree.
    #[must_use]
    pub fn receivers(&self) -> BTreeSet<&str> {
        self.routes.iter().map(Route::receiver).collect()
    }

    /// All routes an alert matches, in pre-order.
    ///
    /// Never empty: falls back to the root route.
    #[must_use]
    pub fn resolve(&self, labels: &LabelSet) -> Vec<&Route> {
        self.resolve_with(labels, DeliveryMode::FullPath)
    }

    /// Matched routes none of whose children matched, in pre-order.
    ///
    /// Never empty: falls back to the root route.
    #[must_use]
    pub fn resolve_deepest(&self, labels: &LabelSet) -> Vec<&Route> {
        self.resolve_with(labels, DeliveryMode::Deepest)
    }

    /// Resolves an alert under the given delivery mode.
    #[must_use]
    pub fn resolve_with(&self, labels: &LabelSet, mode: DeliveryMode) -> Vec<&Route> {
        let mut matched: Vec<RouteId> = Vec::new();
        let mut stack = vec![ResolveFrame {
            parent: RouteId::ROOT,
            next_child: 0,
            child_matched: false,
        }];

        while let Some(frame) = stack.last_mut() {
            let siblings = &self.routes[frame.parent.0].children;

            if frame.next_child >= siblings.len() {
                let done = frame.parent;
                let had_match = frame.child_matched;
                stack.pop();
                if mode == DeliveryMode::Deepest && !had_match && done != RouteId::ROOT {
                    matched.push(done);
                }
                continue;
            }

            let id = siblings[frame.next_child];
            frame.next_child += 1;

            let route = &self.routes[id.0];
            if !route.matches(labels) {
                continue;
            }

            frame.child_matched = true;
            if !route.continue_matching {
                // Skip the remaining siblings once this subtree is done.
                frame.next_child = siblings.len();
            }
            if mode == DeliveryMode::FullPath {
                matched.push(id);
            }
            stack.push(ResolveFrame {
                parent: id,
                next_child: 0,
                child_matched: false,
            });
        }

        if matched.is_empty() {
            return vec![self.root()];
        }
        matched.into_iter().map(|id| &self.routes[id.0]).collect()
    }
}

fn merge_opts(cfg: &RouteConfig, inherited: RouteOpts, path: &str) -> Result<RouteOpts, ConfigError> {
    let group_by = match &cfg.group_by {
        Some(keys) => GroupBy::from_keys(keys).map_err(|reason| ConfigError::InvalidRoute {
            path: path.to_string(),
            reason,
        })?,
        None => inherited.group_by,
    };

    let opts = RouteOpts {
        receiver: cfg.receiver.clone().unwrap_or(inherited.receiver),
        group_by,
        group_wait: cfg.group_wait.unwrap_or(inherited.group_wait),
        group_interval: cfg.group_interval.unwrap_or(inherited.group_interval),
        repeat_interval: cfg.repeat_interval.unwrap_or(inherited.repeat_interval),
    };

    if opts.group_interval.is_zero() {
        return Err(ConfigError::InvalidRoute {
            path: path.to_string(),
            reason: "group_interval must be greater than 0".to_string(),
        });
    }
    if opts.repeat_interval.is_zero() {
        return Err(ConfigError::InvalidRoute {
            path: path.to_string(),
            reason: "repeat_interval must be greater than 0".to_string(),
        });
    }

    Ok(opts)
}
