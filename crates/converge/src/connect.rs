//! Host connection phase
//!
//! All hosts are connected before any deployment task is dispatched. At most
//! `connect_parallelism` hosts connect at the same time, each with its own
//! retry budget. If any host fails to connect, every host that did connect is
//! disconnected again and nothing is deployed.

use crate::error::{DeployError, Error, Result};
use crate::host::Host;
use crate::retry::with_retry;
use crate::types::DeployOptions;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Hosts participating in a run, by name.
pub type HostMap = BTreeMap<String, Arc<dyn Host>>;

/// Connect every host in `hosts`.
pub fn connect_all(hosts: &HostMap, options: &DeployOptions) -> Result<()> {
    if hosts.is_empty() {
        return Ok(());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.connect_parallelism.max(1))
        .build()
        .map_err(|e| Error::ThreadPool(e.to_string()))?;

    let results: Vec<(String, std::result::Result<(), DeployError>)> = pool.install(|| {
        hosts
            .par_iter()
            .map(|(name, host)| (name.clone(), connect_one(name, host.as_ref(), options)))
            .collect()
    });

    let mut errors = Vec::new();
    for (name, result) in results {
        match result {
            Ok(()) => log::debug!("connected to {name}"),
            Err(e) => errors.push(e),
        }
    }
    if errors.is_empty() {
        return Ok(());
    }

    disconnect_all(hosts);
    Err(Error::deployment(errors))
}

fn connect_one(
    name: &str,
    host: &dyn Host,
    options: &DeployOptions,
) -> std::result::Result<(), DeployError> {
    with_retry(&options.retry, name, |attempt| {
        log::debug!("connecting to {name} (attempt {attempt})");
        host.connect(options.connect_timeout)
    })
    .map_err(|e| DeployError::Connect {
        host: name.to_string(),
        message: e.message,
    })
}

/// Disconnect every host, logging failures.
pub fn disconnect_all(hosts: &HostMap) {
    for (name, host) in hosts {
        if let Err(e) = host.disconnect() {
            log::warn!("failed to disconnect from {name}: {e}");
        }
    }
}
