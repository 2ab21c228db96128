//! Error types for configuration and deployment.
//!
//! Configuration errors are collected per convergence pass and only reported
//! once the engine proves it cannot make further progress. Deployment errors
//! are fatal: they stop the scheduler from launching new work.
//!
//! Every error carries a [`SortKey`] that orders user-facing reports. It never
//! influences control flow.

use crate::graph::Graph;
use crate::registry::ResourceMap;
use crate::root::RootKey;
use crate::scheduler::TaskKey;
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Ordering key for error reports: `(rank, primary, secondary)`.
///
/// Lower ranks are reported first. Environment problems rank before component
/// problems, which rank before whole-graph diagnostics.
pub type SortKey = (u8, String, String);

/// Errors detected while loading an environment or converging its configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Generic configuration error raised by a component.
    #[error("{message}")]
    Configuration {
        /// Root the error was raised for, filled in by the engine
        root: Option<RootKey>,
        /// Human-readable message
        message: String,
    },

    /// An override value could not be converted to the attribute's type.
    #[error("cannot convert overrides of `{component}`: {message}")]
    Conversion {
        /// Component whose overrides failed to convert
        component: String,
        /// Deserializer message
        message: String,
    },

    /// Overrides name attributes the component kind does not declare.
    #[error("overrides for undefined attributes of `{component}`: {}", .attributes.join(", "))]
    MissingOverrideAttributes {
        /// Component the overrides were given for
        component: String,
        /// Unknown attribute names
        attributes: Vec<String>,
    },

    /// The same component is assigned to a host more than once.
    #[error("component `{component}` is assigned to host `{host}` more than once")]
    DuplicateComponent {
        /// Component name
        component: String,
        /// Host name
        host: String,
    },

    /// A host references a component that is neither declared nor built in.
    #[error("host `{host}` references unknown component `{component}`")]
    MissingComponent {
        /// Component name
        component: String,
        /// Host name
        host: String,
    },

    /// A host is defined more than once.
    #[error("host `{host}` is defined more than once")]
    DuplicateHost {
        /// Host name
        host: String,
    },

    /// A host address is not a valid IP address.
    #[error("host `{host}` has an invalid IP address `{address}`")]
    InvalidIpAddress {
        /// Host name
        host: String,
        /// The rejected address
        address: String,
    },

    /// The provide/require graph contains a cycle.
    #[error("dependency cycle detected:\n{}", format_cycle(.cycle))]
    CycleDetected {
        /// Remaining subgraph after pruning nodes without outgoing edges
        cycle: Graph<RootKey>,
    },

    /// Values were provided that no subscription could ever consume.
    #[error("unused provided resources:\n{}", format_unused(.resources))]
    UnusedResources {
        /// `key -> provider -> values` for every unused contribution
        resources: ResourceMap,
    },

    /// Strict requirements without a matching provider.
    #[error("unsatisfied resources:\n{}", format_unsatisfied(.resources))]
    UnsatisfiedResources {
        /// `(key, host filter)` pairs nobody provides
        resources: BTreeSet<(String, Option<String>)>,
    },

    /// The retry set repeated a previous working set.
    #[error("configuration did not converge, still retrying: {}", format_roots(.roots))]
    NonConvergingWorkingSet {
        /// Roots that kept needing reconfiguration
        roots: BTreeSet<RootKey>,
    },

    /// A component failed with an error outside this taxonomy.
    #[error("unexpected error while configuring {root}: {message}")]
    UnknownComponent {
        /// Root whose configuration failed
        root: RootKey,
        /// Top-level error message
        message: String,
        /// Cause chain below the top-level message
        trace: Vec<String>,
    },
}

impl ConfigError {
    /// Build a generic configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            root: None,
            message: message.into(),
        }
    }

    /// Attach the root a component-level error was raised for.
    pub fn with_root(self, key: &RootKey) -> Self {
        match self {
            Self::Configuration { root: None, message } => Self::Configuration {
                root: Some(key.clone()),
                message,
            },
            other => other,
        }
    }

    /// Root this error belongs to, if it is bound to one.
    pub fn root(&self) -> Option<&RootKey> {
        match self {
            Self::Configuration { root, .. } => root.as_ref(),
            Self::UnknownComponent { root, .. } => Some(root),
            _ => None,
        }
    }

    /// Whether the error is likely a bug in component code rather than in
    /// the environment.
    pub fn is_possible_bug(&self) -> bool {
        matches!(self, Self::UnknownComponent { .. })
    }

    /// Key used to order error reports.
    pub fn sort_key(&self) -> SortKey {
        match self {
            Self::DuplicateHost { host } => (0, host.clone(), String::new()),
            Self::InvalidIpAddress { host, address } => (0, host.clone(), address.clone()),
            Self::DuplicateComponent { component, host }
            | Self::MissingComponent { component, host } => (1, host.clone(), component.clone()),
            Self::MissingOverrideAttributes { component, .. }
            | Self::Conversion { component, .. } => (2, component.clone(), String::new()),
            Self::Configuration { root, message } => match root {
                Some(root) => (3, root.host.clone(), root.name.clone()),
                None => (3, String::new(), message.clone()),
            },
            Self::UnknownComponent { root, .. } => (3, root.host.clone(), root.name.clone()),
            Self::UnsatisfiedResources { .. } => (4, String::new(), String::new()),
            Self::CycleDetected { .. } => (5, String::new(), String::new()),
            Self::UnusedResources { .. } => (6, String::new(), String::new()),
            Self::NonConvergingWorkingSet { .. } => (7, String::new(), String::new()),
        }
    }
}

/// Errors raised while connecting to hosts or deploying components.
#[derive(Debug, Clone, Error)]
pub enum DeployError {
    /// The host reported a failed deployment.
    #[error("deploying `{component}` on {host} failed: {message}")]
    Failed {
        /// Host name
        host: String,
        /// Component name
        component: String,
        /// Failure details
        message: String,
    },

    /// The remote side runs a different revision of the environment.
    #[error("repository on {host} differs: expected revision {expected}, found {found}")]
    RepositoryDifferent {
        /// Host name
        host: String,
        /// Local revision
        expected: String,
        /// Revision reported by the host
        found: String,
    },

    /// The host could not be connected after all retries.
    #[error("could not connect to {host}: {message}")]
    Connect {
        /// Host name
        host: String,
        /// Last connection error
        message: String,
    },

    /// Tasks whose dependencies never completed.
    #[error("unschedulable tasks: {}", .tasks.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    Unschedulable {
        /// Tasks left in the todo list
        tasks: Vec<TaskKey>,
    },
}

impl DeployError {
    /// Key used to order error reports.
    pub fn sort_key(&self) -> SortKey {
        match self {
            Self::Connect { host, .. } => (0, host.clone(), String::new()),
            Self::RepositoryDifferent { host, .. } => (1, host.clone(), String::new()),
            Self::Failed {
                host, component, ..
            } => (2, host.clone(), component.clone()),
            Self::Unschedulable { .. } => (3, String::new(), String::new()),
        }
    }
}

/// Error returned by a host connection attempt.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConnectError {
    /// Human-readable message
    pub message: String,
    /// Whether another attempt may succeed
    pub retryable: bool,
}

impl ConnectError {
    /// A transient failure worth retrying.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will not go away by retrying.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration failed; errors are sorted by their sort key.
    #[error("configuration failed with {} error(s)", .0.len())]
    Configuration(Vec<ConfigError>),

    /// Deployment failed; errors are sorted by their sort key.
    #[error("deployment failed with {} error(s)", .0.len())]
    Deployment(Vec<DeployError>),

    /// Another run holds the lock.
    #[error("{} is locked by another run{}", .path.display(), .pid.map(|pid| format!(" (pid {pid})")).unwrap_or_default())]
    Locked {
        /// Lock file path
        path: PathBuf,
        /// Holder process id, if recorded
        pid: Option<u32>,
    },

    /// A worker pool could not be created.
    #[error("failed to create worker pool: {0}")]
    ThreadPool(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Configuration error list sorted for reporting.
    pub fn configuration(mut errors: Vec<ConfigError>) -> Self {
        errors.sort_by_key(ConfigError::sort_key);
        Self::Configuration(errors)
    }

    /// Deployment error list sorted for reporting.
    pub fn deployment(mut errors: Vec<DeployError>) -> Self {
        errors.sort_by_key(DeployError::sort_key);
        Self::Deployment(errors)
    }
}

fn format_roots(roots: &BTreeSet<RootKey>) -> String {
    roots
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_cycle(cycle: &Graph<RootKey>) -> String {
    cycle
        .iter()
        .map(|(node, targets)| {
            let targets = targets
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            format!("    {node} -> {targets}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_unused(resources: &ResourceMap) -> String {
    let mut lines = Vec::new();
    for (key, providers) in resources {
        for (root, values) in providers {
            let values = values
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("    {key}: {values} (provided by {root})"));
        }
    }
    lines.join("\n")
}

fn format_unsatisfied(resources: &BTreeSet<(String, Option<String>)>) -> String {
    resources
        .iter()
        .map(|(key, host)| match host {
            Some(host) => format!("    {key} (on host {host})"),
            None => format!("    {key}"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_root_fills_only_generic_errors() {
        let key = RootKey::new("app", "web1");
        let err = ConfigError::configuration("boom").with_root(&key);
        assert_eq!(err.root(), Some(&key));

        let err = ConfigError::DuplicateHost { host: "web1".into() }.with_root(&key);
        assert!(err.root().is_none());
    }

    #[test]
    fn test_sort_key_orders_environment_errors_first() {
        let mut errors = vec![
            ConfigError::NonConvergingWorkingSet {
                roots: BTreeSet::new(),
            },
            ConfigError::UnsatisfiedResources {
                resources: BTreeSet::new(),
            },
            ConfigError::DuplicateHost { host: "a".into() },
        ];
        errors.sort_by_key(ConfigError::sort_key);

        assert!(matches!(errors[0], ConfigError::DuplicateHost { .. }));
        assert!(matches!(errors[1], ConfigError::UnsatisfiedResources { .. }));
        assert!(matches!(errors[2], ConfigError::NonConvergingWorkingSet { .. }));
    }

    #[test]
    fn test_unsatisfied_display_names_host() {
        let mut resources = BTreeSet::new();
        resources.insert(("db-addr".to_string(), Some("web1".to_string())));
        let err = ConfigError::UnsatisfiedResources { resources };
        assert!(err.to_string().contains("db-addr (on host web1)"));
    }

    #[test]
    fn test_locked_display_includes_pid() {
        let err = Error::Locked {
            path: PathBuf::from("/tmp/.rigger-lock"),
            pid: Some(42),
        };
        assert!(err.to_string().contains("pid 42"));
    }
}
