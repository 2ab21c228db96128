//! Options and results of a deployment run.

use crate::error::DeployError;
use crate::retry::RetryConfig;
use crate::scheduler::TaskKey;
use std::time::Duration;

/// Options for connecting to hosts and dispatching deployment tasks.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Worker pool size for deployment tasks
    pub jobs: usize,
    /// Report what would change without changing anything
    pub predict_only: bool,
    /// Maximum number of hosts connecting at the same time
    pub connect_parallelism: usize,
    /// How long a host may take to become reachable
    pub connect_timeout: Option<Duration>,
    /// Retry policy for connection attempts
    pub retry: RetryConfig,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            predict_only: false,
            connect_parallelism: 8,
            connect_timeout: None,
            retry: RetryConfig::default(),
        }
    }
}

impl DeployOptions {
    /// Set the worker pool size (at least one).
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Enable or disable predict-only mode.
    pub fn with_predict_only(mut self, predict_only: bool) -> Self {
        self.predict_only = predict_only;
        self
    }

    /// Set the connection readiness timeout.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Result of a single deployment task.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// The host deployed the component
    Deployed,
    /// The task was skipped
    Ignored {
        /// Why it was skipped
        reason: String,
    },
    /// The host reported a failure
    Failed(DeployError),
}

/// Summary of a successful deployment run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploySummary {
    /// Deployed tasks, in completion order
    pub deployed: Vec<TaskKey>,
    /// Skipped tasks
    pub ignored: Vec<TaskKey>,
}
