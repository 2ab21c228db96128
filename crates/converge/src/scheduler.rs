//! Deployment scheduler
//!
//! Walks the converged dependency graph and dispatches one task per
//! `(host, component)` pair to a bounded worker pool. The dispatch loop owns
//! the `todo` map; workers only run the blocking host call and report back
//! over a channel. A task is launched once every task it depends on has
//! completed, whether it was deployed or ignored.
//!
//! After the first failure no new task is launched, but tasks already handed
//! to the pool are drained before the errors are returned.

use crate::connect::HostMap;
use crate::error::{DeployError, Error, Result};
use crate::graph::Graph;
use crate::host::{Host, ProgressCallback};
use crate::root::RootKey;
use crate::types::{DeployOptions, DeploySummary, TaskOutcome};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc;

/// One unit of deployment work: a component on a host.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskKey {
    /// Host name
    pub host: String,
    /// Component name
    pub component: String,
}

impl TaskKey {
    /// Create a task key.
    pub fn new(host: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            component: component.into(),
        }
    }
}

impl From<&RootKey> for TaskKey {
    fn from(root: &RootKey) -> Self {
        Self::new(&root.host, &root.name)
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.component, self.host)
    }
}

/// Pending task state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskEntry {
    /// Tasks that must complete first
    pub dependencies: BTreeSet<TaskKey>,
    /// Skip the task, but still unblock its dependents
    pub ignore: bool,
}

/// Tasks to dispatch, with their dependencies.
#[derive(Debug, Clone, Default)]
pub struct DeploymentPlan {
    todo: BTreeMap<TaskKey, TaskEntry>,
    ignored_hosts: BTreeSet<String>,
}

impl DeploymentPlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a plan from a `root -> roots it depends on` graph.
    pub fn from_graph(
        graph: &Graph<RootKey>,
        ignored_roots: &BTreeSet<RootKey>,
        ignored_hosts: &BTreeSet<String>,
    ) -> Self {
        let mut plan = Self::new();
        for (root, dependencies) in graph {
            plan.add_task(
                TaskKey::from(root),
                dependencies.iter().map(TaskKey::from),
                ignored_roots.contains(root),
            );
        }
        for host in ignored_hosts {
            plan.ignore_host(host);
        }
        plan
    }

    /// Add or replace a task.
    pub fn add_task(
        &mut self,
        key: TaskKey,
        dependencies: impl IntoIterator<Item = TaskKey>,
        ignore: bool,
    ) {
        self.todo.insert(
            key,
            TaskEntry {
                dependencies: dependencies.into_iter().collect(),
                ignore,
            },
        );
    }

    /// Skip every task on `host`.
    pub fn ignore_host(&mut self, host: impl Into<String>) {
        self.ignored_hosts.insert(host.into());
    }

    /// Look up a pending task.
    pub fn get(&self, key: &TaskKey) -> Option<&TaskEntry> {
        self.todo.get(key)
    }

    /// Pending tasks in key order.
    pub fn tasks(&self) -> impl Iterator<Item = (&TaskKey, &TaskEntry)> {
        self.todo.iter()
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.todo.len()
    }

    /// Whether the plan has no tasks.
    pub fn is_empty(&self) -> bool {
        self.todo.is_empty()
    }

    /// Why `key` would be skipped, if it would.
    fn skip_reason(&self, key: &TaskKey, entry: &TaskEntry) -> Option<String> {
        if self.ignored_hosts.contains(&key.host) {
            Some(format!("host {} is ignored", key.host))
        } else if entry.ignore {
            Some(format!("component {} is ignored", key.component))
        } else {
            None
        }
    }
}

/// Dispatch every task in `plan` to `hosts`.
///
/// Hosts must already be connected.
pub fn run_deployment(
    mut plan: DeploymentPlan,
    hosts: &HostMap,
    options: &DeployOptions,
    progress: &mut dyn ProgressCallback,
) -> Result<DeploySummary> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs.max(1))
        .thread_name(|i| format!("deploy-{i}"))
        .build()
        .map_err(|e| Error::ThreadPool(e.to_string()))?;
    let (tx, rx) = mpsc::channel::<(TaskKey, TaskOutcome)>();

    let mut todo = std::mem::take(&mut plan.todo);
    let mut summary = DeploySummary::default();
    let mut errors = Vec::new();
    let mut outstanding = 0usize;

    progress.on_start(todo.len());
    loop {
        if errors.is_empty() {
            let ready: Vec<TaskKey> = todo
                .iter()
                .filter(|(_, entry)| entry.dependencies.is_empty())
                .map(|(key, _)| key.clone())
                .collect();
            for key in ready {
                let Some(entry) = todo.remove(&key) else {
                    continue;
                };
                let skip = plan.skip_reason(&key, &entry);
                let host = hosts.get(&key.host).cloned();
                let predict_only = options.predict_only;
                let tx = tx.clone();

                progress.on_task_start(&key);
                outstanding += 1;
                pool.spawn(move || {
                    let outcome = run_task(&key, host, skip, predict_only);
                    // the receiver outlives every outstanding task
                    let _ = tx.send((key, outcome));
                });
            }
        }

        if outstanding == 0 {
            break;
        }
        let Ok((key, outcome)) = rx.recv() else {
            break;
        };
        outstanding -= 1;
        progress.on_task_complete(&key, &outcome);

        match outcome {
            TaskOutcome::Deployed => {
                log::info!("deployed {key}");
                complete(&mut todo, &key);
                summary.deployed.push(key);
            }
            TaskOutcome::Ignored { reason } => {
                log::info!("skipped {key}: {reason}");
                complete(&mut todo, &key);
                summary.ignored.push(key);
            }
            TaskOutcome::Failed(e) => {
                log::warn!("{e}");
                if errors.is_empty() && outstanding > 0 {
                    log::info!("waiting for {outstanding} running task(s) to finish");
                }
                errors.push(e);
            }
        }
    }
    progress.on_finish();

    if errors.is_empty() && !todo.is_empty() {
        errors.push(DeployError::Unschedulable {
            tasks: todo.into_keys().collect(),
        });
    }
    if !errors.is_empty() {
        return Err(Error::deployment(errors));
    }
    Ok(summary)
}

/// Remove a completed task from every remaining dependency set.
fn complete(todo: &mut BTreeMap<TaskKey, TaskEntry>, key: &TaskKey) {
    for entry in todo.values_mut() {
        entry.dependencies.remove(key);
    }
}

fn run_task(
    key: &TaskKey,
    host: Option<Arc<dyn Host>>,
    skip: Option<String>,
    predict_only: bool,
) -> TaskOutcome {
    if let Some(reason) = skip {
        return TaskOutcome::Ignored { reason };
    }
    let Some(host) = host else {
        return TaskOutcome::Failed(DeployError::Failed {
            host: key.host.clone(),
            component: key.component.clone(),
            message: "host is not connected".to_string(),
        });
    };

    log::debug!("deploying {key}");
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        host.deploy_component(&key.component, predict_only)
    }));
    match result {
        Ok(Ok(())) => TaskOutcome::Deployed,
        Ok(Err(e)) => TaskOutcome::Failed(e),
        Err(_) => TaskOutcome::Failed(DeployError::Failed {
            host: key.host.clone(),
            component: key.component.clone(),
            message: "deployment panicked".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectError;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    type Journal = Arc<Mutex<Vec<String>>>;

    /// Host that records start/end of every deployment.
    struct RecordingHost {
        name: String,
        journal: Journal,
        failing: BTreeSet<String>,
        delay: Duration,
    }

    impl RecordingHost {
        fn new(name: &str, journal: &Journal) -> Self {
            Self {
                name: name.to_string(),
                journal: Arc::clone(journal),
                failing: BTreeSet::new(),
                delay: Duration::from_millis(5),
            }
        }

        fn failing(mut self, component: &str) -> Self {
            self.failing.insert(component.to_string());
            self
        }
    }

    impl Host for RecordingHost {
        fn name(&self) -> &str {
            &self.name
        }

        fn connect(&self, _timeout: Option<Duration>) -> std::result::Result<(), ConnectError> {
            Ok(())
        }

        fn disconnect(&self) -> std::result::Result<(), ConnectError> {
            Ok(())
        }

        fn deploy_component(
            &self,
            component: &str,
            predict_only: bool,
        ) -> std::result::Result<(), DeployError> {
            let mode = if predict_only { " (predict)" } else { "" };
            self.journal
                .lock()
                .unwrap()
                .push(format!("start {component}{mode}"));
            thread::sleep(self.delay);
            if component == "explode" {
                panic!("remote crashed");
            }
            self.journal.lock().unwrap().push(format!("end {component}"));
            if self.failing.contains(component) {
                return Err(DeployError::Failed {
                    host: self.name.clone(),
                    component: component.to_string(),
                    message: "exit status 1".to_string(),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingProgress {
        total: usize,
        started: usize,
        completed: usize,
        finished: bool,
    }

    impl ProgressCallback for CountingProgress {
        fn on_start(&mut self, total: usize) {
            self.total = total;
        }
        fn on_task_start(&mut self, _task: &TaskKey) {
            self.started += 1;
        }
        fn on_task_complete(&mut self, _task: &TaskKey, _outcome: &TaskOutcome) {
            self.completed += 1;
        }
        fn on_finish(&mut self) {
            self.finished = true;
        }
    }

    fn hosts(host: RecordingHost) -> HostMap {
        let mut map = HostMap::new();
        map.insert(host.name.clone(), Arc::new(host) as Arc<dyn Host>);
        map
    }

    fn task(component: &str) -> TaskKey {
        TaskKey::new("h", component)
    }

    fn index(journal: &Journal, entry: &str) -> usize {
        journal
            .lock()
            .unwrap()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("missing journal entry {entry}"))
    }

    fn run(plan: DeploymentPlan, hosts: &HostMap, jobs: usize) -> Result<DeploySummary> {
        let options = DeployOptions::default().with_jobs(jobs);
        run_deployment(plan, hosts, &options, &mut CountingProgress::default())
    }

    #[test]
    fn test_dependent_starts_after_dependency_completes() {
        for jobs in [1, 4] {
            let journal = Journal::default();
            let hosts = hosts(RecordingHost::new("h", &journal));
            let mut plan = DeploymentPlan::new();
            plan.add_task(task("A"), [], false);
            plan.add_task(task("B"), [task("A")], false);
            plan.add_task(task("C"), [], false);

            let summary = run(plan, &hosts, jobs).unwrap();

            assert_eq!(summary.deployed.len(), 3);
            assert!(index(&journal, "end A") < index(&journal, "start B"));
        }
    }

    #[test]
    fn test_ignored_task_is_skipped_but_unblocks_dependents() {
        let journal = Journal::default();
        let hosts = hosts(RecordingHost::new("h", &journal));
        let mut plan = DeploymentPlan::new();
        plan.add_task(task("A"), [], true);
        plan.add_task(task("B"), [task("A")], false);

        let summary = run(plan, &hosts, 2).unwrap();

        assert_eq!(summary.ignored, vec![task("A")]);
        assert_eq!(summary.deployed, vec![task("B")]);
        assert_eq!(*journal.lock().unwrap(), vec!["start B", "end B"]);
    }

    #[test]
    fn test_ignored_host_skips_all_its_tasks() {
        let journal = Journal::default();
        let hosts = hosts(RecordingHost::new("h", &journal));
        let mut plan = DeploymentPlan::new();
        plan.add_task(task("A"), [], false);
        plan.add_task(task("B"), [task("A")], false);
        plan.ignore_host("h");

        let summary = run(plan, &hosts, 1).unwrap();

        assert_eq!(summary.ignored.len(), 2);
        assert!(summary.deployed.is_empty());
        assert!(journal.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failure_stops_new_work_and_drains_running_tasks() {
        let journal = Journal::default();
        let hosts = hosts(RecordingHost::new("h", &journal).failing("A"));
        let mut plan = DeploymentPlan::new();
        plan.add_task(task("A"), [], false);
        plan.add_task(task("B"), [task("A")], false);
        plan.add_task(task("C"), [], false);

        let err = run(plan, &hosts, 2).unwrap_err();

        match err {
            Error::Deployment(errors) => {
                assert_eq!(errors.len(), 1);
                assert!(matches!(&errors[0], DeployError::Failed { component, .. } if component == "A"));
            }
            other => panic!("unexpected error: {other}"),
        }
        let journal = journal.lock().unwrap();
        assert!(journal.contains(&"end C".to_string()));
        assert!(!journal.contains(&"start B".to_string()));
    }

    #[test]
    fn test_panicking_host_is_a_failure() {
        let journal = Journal::default();
        let hosts = hosts(RecordingHost::new("h", &journal));
        let mut plan = DeploymentPlan::new();
        plan.add_task(task("explode"), [], false);

        let err = run(plan, &hosts, 1).unwrap_err();
        assert!(matches!(err, Error::Deployment(errors) if errors.len() == 1));
    }

    #[test]
    fn test_unknown_host_is_a_failure() {
        let mut plan = DeploymentPlan::new();
        plan.add_task(TaskKey::new("ghost", "A"), [], false);

        let err = run(plan, &HostMap::new(), 1).unwrap_err();
        assert!(err.to_string().contains("1 error"));
    }

    #[test]
    fn test_missing_dependency_is_unschedulable() {
        let journal = Journal::default();
        let hosts = hosts(RecordingHost::new("h", &journal));
        let mut plan = DeploymentPlan::new();
        plan.add_task(task("A"), [task("never")], false);

        let err = run(plan, &hosts, 1).unwrap_err();

        match err {
            Error::Deployment(errors) => {
                assert!(matches!(&errors[0], DeployError::Unschedulable { tasks } if tasks == &vec![task("A")]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_predict_only_is_forwarded() {
        let journal = Journal::default();
        let hosts = hosts(RecordingHost::new("h", &journal));
        let mut plan = DeploymentPlan::new();
        plan.add_task(task("A"), [], false);
        let options = DeployOptions::default().with_predict_only(true);

        run_deployment(plan, &hosts, &options, &mut CountingProgress::default()).unwrap();

        assert_eq!(journal.lock().unwrap()[0], "start A (predict)");
    }

    #[test]
    fn test_progress_sees_every_task() {
        let journal = Journal::default();
        let hosts = hosts(RecordingHost::new("h", &journal));
        let mut plan = DeploymentPlan::new();
        plan.add_task(task("A"), [], false);
        plan.add_task(task("B"), [task("A")], true);
        let mut progress = CountingProgress::default();

        run_deployment(plan, &hosts, &DeployOptions::default(), &mut progress).unwrap();

        assert_eq!(progress.total, 2);
        assert_eq!(progress.started, 2);
        assert_eq!(progress.completed, 2);
        assert!(progress.finished);
    }

    #[test]
    fn test_plan_from_graph() {
        let db = RootKey::new("postgres", "db1");
        let app = RootKey::new("app", "web1");
        let mut graph = Graph::new();
        graph.insert(db.clone(), BTreeSet::new());
        graph.insert(app.clone(), BTreeSet::from([db.clone()]));

        let plan = DeploymentPlan::from_graph(
            &graph,
            &BTreeSet::from([db]),
            &BTreeSet::from(["web1".to_string()]),
        );

        assert_eq!(plan.len(), 2);
        let entry = plan.get(&TaskKey::new("web1", "app")).unwrap();
        assert_eq!(entry.dependencies, BTreeSet::from([TaskKey::new("db1", "postgres")]));
        assert!(plan.get(&TaskKey::new("db1", "postgres")).unwrap().ignore);
        assert_eq!(
            plan.skip_reason(&TaskKey::new("web1", "app"), entry),
            Some("host web1 is ignored".to_string())
        );
    }
}
