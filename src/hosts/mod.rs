//! Host transports
//!
//! `local` hosts deploy in this process; `ssh` hosts run the `apply-component`
//! subcommand of the remote binary.

mod local;
mod ssh;

pub use ssh::REPOSITORY_DIFFERENT;

use local::LocalHost;
use ssh::SshHost;

use converge::{Environment, Host, HostMap, Transport};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Build a host for every host of `environment` that is not ignored.
///
/// Consumes the environment: configured trees move into the local hosts.
pub fn build_hosts(environment: Environment, revision: &str) -> HostMap {
    let name = environment.name().to_string();
    let settings = environment.settings().clone();
    let specs = environment.hosts().to_vec();

    let mut roots_by_host: BTreeMap<String, Vec<_>> = BTreeMap::new();
    for root in environment.into_roots() {
        roots_by_host
            .entry(root.host().to_string())
            .or_default()
            .push(root);
    }

    let mut hosts = HostMap::new();
    for spec in specs.into_iter().filter(|spec| !spec.ignore) {
        let host: Arc<dyn Host> = match spec.transport {
            Transport::Local => Arc::new(LocalHost::new(
                &spec.name,
                &name,
                roots_by_host.remove(&spec.name).unwrap_or_default(),
            )),
            Transport::Ssh => Arc::new(SshHost::new(&spec, &name, revision, &settings)),
        };
        hosts.insert(spec.name, host);
    }
    hosts
}
