//! Host and progress traits
//!
//! These traits let the engine drive deployments without depending on a
//! particular transport or terminal.

use crate::error::{ConnectError, DeployError};
use crate::scheduler::TaskKey;
use crate::types::TaskOutcome;
use std::time::Duration;

/// Connection to one deployment target.
///
/// Methods take `&self`: the scheduler calls `deploy_component` from worker
/// threads, possibly for several components of the same host at once.
pub trait Host: Send + Sync {
    /// Host name as used in the environment
    fn name(&self) -> &str;

    /// Establish the connection, waiting at most `timeout` for the host to
    /// become reachable.
    fn connect(&self, timeout: Option<Duration>) -> Result<(), ConnectError>;

    /// Tear down the connection.
    fn disconnect(&self) -> Result<(), ConnectError>;

    /// Deploy one component on this host.
    fn deploy_component(&self, component: &str, predict_only: bool) -> Result<(), DeployError>;
}

/// Progress callback for deployment runs
///
/// Called from the dispatch loop only, never from worker threads.
pub trait ProgressCallback: Send {
    /// Called once before the first task is dispatched
    fn on_start(&mut self, total: usize);

    /// Called when a task is handed to the worker pool
    fn on_task_start(&mut self, task: &TaskKey);

    /// Called when a task completes, successfully or not
    fn on_task_complete(&mut self, task: &TaskKey, outcome: &TaskOutcome);

    /// Called once after the last task completed
    fn on_finish(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_start(&mut self, _total: usize) {}
    fn on_task_start(&mut self, _task: &TaskKey) {}
    fn on_task_complete(&mut self, _task: &TaskKey, _outcome: &TaskOutcome) {}
    fn on_finish(&mut self) {}
}
