//! Environment model
//!
//! An environment assigns components to hosts. It is described by a
//! serializable [`EnvironmentFile`] (plus an optional [`SecretsFile`] overlay)
//! and validated against a [`Catalog`] of component kinds into an
//! [`Environment`] of root components ready for configuration.

use crate::engine::{Convergence, run_configuration};
use crate::error::ConfigError;
use crate::registry::ResourceRegistry;
use crate::root::{Catalog, Overrides, RootComponent, RootKey};
use crate::scheduler::DeploymentPlan;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// How the controller reaches a host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Remote host reached over ssh
    #[default]
    Ssh,
    /// The controlling machine itself
    Local,
}

/// Environment-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Default transport for hosts
    #[serde(default)]
    pub connect_method: Transport,
    /// Base directory for per-component working directories
    #[serde(default)]
    pub workdir: Option<String>,
    /// Binary invoked on remote hosts
    #[serde(default = "default_remote_command")]
    pub remote_command: String,
    /// Deployment repository on remote hosts
    #[serde(default)]
    pub remote_base: Option<String>,
    /// Default worker pool size
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    /// Seconds a host may take to become reachable
    #[serde(default)]
    pub timeout: Option<u64>,
}

fn default_remote_command() -> String {
    "rigger".to_string()
}

const fn default_jobs() -> usize {
    1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connect_method: Transport::default(),
            workdir: None,
            remote_command: default_remote_command(),
            remote_base: None,
            jobs: default_jobs(),
            timeout: None,
        }
    }
}

/// A `[[hosts]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Host name
    pub name: String,
    /// IP address, if the name is not resolvable
    #[serde(default)]
    pub address: Option<String>,
    /// Assigned components; a `!` prefix marks the component ignored
    #[serde(default)]
    pub components: Vec<String>,
    /// Skip every deployment task on this host
    #[serde(default)]
    pub ignore: bool,
    /// Override of the environment's transport
    #[serde(default)]
    pub transport: Option<Transport>,
}

/// A `[components.<name>]` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Component kind; defaults to the component name
    #[serde(default)]
    pub kind: Option<String>,
    /// Enabled features
    #[serde(default)]
    pub features: Vec<String>,
    /// Attribute overrides
    #[serde(flatten)]
    pub overrides: Overrides,
}

/// Parsed environment file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentFile {
    /// Environment-wide settings
    #[serde(default)]
    pub environment: Settings,
    /// Hosts in declaration order
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
    /// Component declarations by name
    #[serde(default)]
    pub components: BTreeMap<String, ComponentConfig>,
}

impl EnvironmentFile {
    /// Merge secret overrides over the declared ones.
    pub fn merge_secrets(&mut self, secrets: SecretsFile) {
        for (name, overrides) in secrets.components {
            self.components
                .entry(name)
                .or_default()
                .overrides
                .extend(overrides);
        }
    }
}

/// Parsed secrets overlay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretsFile {
    /// Overrides by component name
    #[serde(default)]
    pub components: BTreeMap<String, Overrides>,
}

/// A validated host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    /// Host name
    pub name: String,
    /// Parsed address
    pub address: Option<IpAddr>,
    /// Skip every deployment task on this host
    pub ignore: bool,
    /// Effective transport
    pub transport: Transport,
}

impl HostSpec {
    /// A reachable host with the default transport.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            ignore: false,
            transport: Transport::default(),
        }
    }
}

/// Hosts and root components of one environment.
#[derive(Debug)]
pub struct Environment {
    name: String,
    workdir_base: PathBuf,
    settings: Settings,
    hosts: Vec<HostSpec>,
    roots: Vec<RootComponent>,
}

impl Environment {
    /// Create an empty environment.
    pub fn new(name: impl Into<String>, workdir_base: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            workdir_base: workdir_base.into(),
            settings: Settings::default(),
            hosts: Vec::new(),
            roots: Vec::new(),
        }
    }

    /// Validate `file` against `catalog`.
    ///
    /// Component working directories are derived from `workdir_base`. Every
    /// problem found is reported, not just the first.
    pub fn from_file(
        name: &str,
        workdir_base: &Path,
        file: EnvironmentFile,
        catalog: &Catalog,
    ) -> Result<Self, Vec<ConfigError>> {
        let mut env = Self::new(name, workdir_base);
        env.settings = file.environment.clone();
        let mut errors = Vec::new();
        let mut validated = BTreeSet::new();

        for host in &file.hosts {
            let address = match host.address.as_deref().map(str::parse::<IpAddr>) {
                None => None,
                Some(Ok(address)) => Some(address),
                Some(Err(_)) => {
                    errors.push(ConfigError::InvalidIpAddress {
                        host: host.name.clone(),
                        address: host.address.clone().unwrap_or_default(),
                    });
                    None
                }
            };
            let spec = HostSpec {
                name: host.name.clone(),
                address,
                ignore: host.ignore,
                transport: host.transport.unwrap_or(file.environment.connect_method),
            };
            if let Err(e) = env.add_host(spec) {
                errors.push(e);
                continue;
            }

            for entry in &host.components {
                let (component, ignore) = match entry.trim().strip_prefix('!') {
                    Some(component) => (component.trim(), true),
                    None => (entry.trim(), false),
                };
                let config = file.components.get(component);
                let kind_name = config
                    .and_then(|c| c.kind.as_deref())
                    .unwrap_or(component);
                let Some(kind) = catalog.get(kind_name) else {
                    errors.push(ConfigError::MissingComponent {
                        component: component.to_string(),
                        host: host.name.clone(),
                    });
                    continue;
                };

                let overrides = config.map(|c| c.overrides.clone()).unwrap_or_default();
                if validated.insert(component.to_string()) {
                    if let Err(e) = kind.instantiate(component, &overrides) {
                        errors.push(e);
                    }
                }

                let root = RootComponent::new(component, &host.name, kind.clone())
                    .with_workdir_base(workdir_base)
                    .with_overrides(overrides)
                    .with_features(config.map(|c| c.features.clone()).unwrap_or_default())
                    .with_address(address)
                    .ignored(ignore);
                if let Err(e) = env.add_root(root) {
                    errors.push(e);
                }
            }
        }

        if errors.is_empty() {
            Ok(env)
        } else {
            errors.sort_by_key(ConfigError::sort_key);
            Err(errors)
        }
    }

    /// Add a host; names must be unique.
    pub fn add_host(&mut self, host: HostSpec) -> Result<(), ConfigError> {
        if self.host(&host.name).is_some() {
            return Err(ConfigError::DuplicateHost { host: host.name });
        }
        self.hosts.push(host);
        Ok(())
    }

    /// Add a root component; a component may appear once per host.
    pub fn add_root(&mut self, root: RootComponent) -> Result<(), ConfigError> {
        if self.roots.iter().any(|r| r.key() == root.key()) {
            return Err(ConfigError::DuplicateComponent {
                component: root.name().to_string(),
                host: root.host().to_string(),
            });
        }
        self.roots.push(root);
        Ok(())
    }

    /// Converge the configuration of every root component.
    pub fn configure(&mut self) -> Result<Convergence, Vec<ConfigError>> {
        let mut registry = ResourceRegistry::new();
        run_configuration(&mut self.roots, &mut registry, &self.name)
    }

    /// Host whose view of the dependency graph drives the deployment order:
    /// the first host that is not ignored.
    pub fn reference_host(&self) -> Option<&HostSpec> {
        self.hosts.iter().find(|h| !h.ignore)
    }

    /// Tasks to dispatch for a converged configuration.
    pub fn deployment_plan(&self, convergence: &Convergence) -> DeploymentPlan {
        let ignored_roots: BTreeSet<RootKey> = self
            .roots
            .iter()
            .filter(|r| r.is_ignored())
            .map(|r| r.key().clone())
            .collect();
        let ignored_hosts: BTreeSet<String> = self
            .hosts
            .iter()
            .filter(|h| h.ignore)
            .map(|h| h.name.clone())
            .collect();
        DeploymentPlan::from_graph(&convergence.graph, &ignored_roots, &ignored_hosts)
    }

    /// Environment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base directory for working directories.
    pub fn workdir_base(&self) -> &Path {
        &self.workdir_base
    }

    /// Environment-wide settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Hosts in declaration order.
    pub fn hosts(&self) -> &[HostSpec] {
        &self.hosts
    }

    /// Look up a host by name.
    pub fn host(&self, name: &str) -> Option<&HostSpec> {
        self.hosts.iter().find(|h| h.name == name)
    }

    /// Root components in configuration order.
    pub fn roots(&self) -> &[RootComponent] {
        &self.roots
    }

    /// Mutable access, e.g. to take configured trees for deployment.
    pub fn roots_mut(&mut self) -> &mut [RootComponent] {
        &mut self.roots
    }

    /// Root components assigned to `host`.
    pub fn roots_on<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a RootComponent> + 'a {
        self.roots.iter().filter(move |r| r.host() == host)
    }

    /// Consume the environment, keeping its root components.
    pub fn into_roots(self) -> Vec<RootComponent> {
        self.roots
    }
}
