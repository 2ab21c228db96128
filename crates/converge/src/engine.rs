//! Configuration engine
//!
//! Components may require resources that other, not yet configured components
//! provide later, so no single pass can know the right order in advance. The
//! engine instead iterates to a fixed point:
//!
//! 1. configure every root in the working set (after resetting what it
//!    provided before),
//! 2. retry the roots that failed, went stale, or still lack strict
//!    requirements,
//! 3. stop when nothing needs a retry, or when the retry set repeats a working
//!    set already attempted (no progress is possible).
//!
//! Errors are collected per pass; only the final pass decides the outcome.

use crate::error::ConfigError;
use crate::graph::{Graph, reverse, topological_sort};
use crate::registry::ResourceRegistry;
use crate::root::{RootComponent, RootKey};
use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};

/// Result of a successful configuration.
#[derive(Debug, Clone)]
pub struct Convergence {
    /// Roots ordered so that every dependency precedes its dependents
    pub order: Vec<RootKey>,
    /// Number of passes until the fixed point
    pub passes: usize,
    /// `root -> roots it depends on`, complete over all roots
    pub graph: Graph<RootKey>,
}

/// Configure `roots` until their resource dependencies stabilize.
///
/// Returns the errors of the final pass, sorted by sort key, when the roots
/// cannot be configured.
pub fn run_configuration(
    roots: &mut [RootComponent],
    registry: &mut ResourceRegistry,
    environment: &str,
) -> Result<Convergence, Vec<ConfigError>> {
    if roots.is_empty() {
        return Err(vec![ConfigError::configuration(format!(
            "environment `{environment}` does not assign any components"
        ))]);
    }
    roots.sort_by(|a, b| a.key().cmp(b.key()));

    let mut working_set: BTreeSet<RootKey> = roots.iter().map(|r| r.key().clone()).collect();
    let mut attempted: Vec<BTreeSet<RootKey>> = Vec::new();
    let mut order = Vec::new();
    let mut graph;
    let mut errors;
    let mut passes = 0;

    loop {
        passes += 1;
        log::debug!(
            "configuration pass {passes}: {} component(s)",
            working_set.len()
        );
        errors = Vec::new();
        attempted.push(working_set.clone());
        let mut retry = BTreeSet::new();
        registry.clear_dirty();

        for root in roots.iter_mut().filter(|r| working_set.contains(r.key())) {
            registry.reset_component_resources(root.key());
            if let Err(error) = configure_root(root, registry, environment) {
                log::debug!("{} failed to configure: {error}", root.key());
                errors.push(error);
                retry.insert(root.key().clone());
            }
        }

        retry.extend(registry.dirty().iter().cloned());
        retry.extend(registry.unsatisfied_roots());

        graph = registry.dependency_graph();
        for root in roots.iter() {
            graph.entry(root.key().clone()).or_default();
        }
        match topological_sort(&reverse(&graph)) {
            Ok(sorted) => order = sorted,
            Err(cycle) => errors.push(ConfigError::CycleDetected { cycle: cycle.graph }),
        }

        if attempted.contains(&retry) {
            let unsatisfied = registry.unsatisfied();
            if !unsatisfied.is_empty() {
                errors.push(ConfigError::UnsatisfiedResources {
                    resources: unsatisfied,
                });
            }
            errors.push(ConfigError::NonConvergingWorkingSet { roots: retry });
            errors.sort_by_key(ConfigError::sort_key);
            return Err(errors);
        }

        if retry.is_empty() {
            break;
        }
        log::debug!(
            "retrying: {}",
            retry
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        working_set = retry;
    }

    let unused = registry.unused();
    if !unused.is_empty() {
        errors.push(ConfigError::UnusedResources { resources: unused });
    }
    if !errors.is_empty() {
        errors.sort_by_key(ConfigError::sort_key);
        return Err(errors);
    }

    log::info!("configuration converged after {passes} pass(es)");
    Ok(Convergence {
        order,
        passes,
        graph,
    })
}

/// Configure one root, classifying whatever goes wrong.
fn configure_root(
    root: &mut RootComponent,
    registry: &mut ResourceRegistry,
    environment: &str,
) -> Result<(), ConfigError> {
    let key = root.key().clone();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| root.configure(environment, registry)));
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(classify(&key, error)),
        Err(payload) => Err(ConfigError::UnknownComponent {
            root: key,
            message: format!("panicked: {}", panic_message(payload.as_ref())),
            trace: Vec::new(),
        }),
    }
}

/// Tell known configuration errors from unexpected ones.
fn classify(key: &RootKey, error: anyhow::Error) -> ConfigError {
    match error.downcast::<ConfigError>() {
        Ok(known) => known.with_root(key),
        Err(error) => ConfigError::UnknownComponent {
            root: key.clone(),
            message: error.to_string(),
            trace: error.chain().skip(1).map(ToString::to_string).collect(),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
