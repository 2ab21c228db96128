//! Component lifecycle
//!
//! A component is a unit of deployment work. Its lifecycle is
//! `Unconfigured -> Configured -> {UpToDate | NeedsUpdate} -> Updated`:
//!
//! - `configure()` is declarative: it may attach sub-components and publish or
//!   consume resources through the [`ConfigureContext`]. It runs once per
//!   convergence pass and must have the same net effect every time.
//! - `verify()` probes the current state and answers [`Verify::UpToDate`] or
//!   [`Verify::NeedsUpdate`]; errors are real failures.
//! - `update()` runs only after `verify()` asked for it.
//!
//! Sub-components deploy before their parent, in insertion order.

use crate::error::ConfigError;
use crate::registry::{Require, ResourceRegistry, ResourceValue};
use crate::root::RootKey;
use anyhow::{Context, Result};
use std::fmt;
use std::net::IpAddr;
use std::path::Path;

/// Outcome of a component's state probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verify {
    /// Current state matches the desired state
    UpToDate,
    /// `update()` must run to reach the desired state
    NeedsUpdate,
}

/// Lifecycle position of a component node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Created but `configure()` has not completed
    Unconfigured,
    /// `configure()` completed
    Configured,
    /// `verify()` reported no changes needed
    UpToDate,
    /// `verify()` asked for an update that has not run (predict mode)
    NeedsUpdate,
    /// `update()` completed
    Updated,
}

/// Core trait for deployable units of work.
pub trait Component: Send + fmt::Debug {
    /// Component kind, e.g. "file" or "command".
    fn kind(&self) -> &'static str;

    /// Optional naming attribute distinguishing siblings of the same kind.
    fn name(&self) -> Option<String> {
        None
    }

    /// Declare sub-components and resources.
    fn configure(&mut self, _ctx: &mut ConfigureContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Probe whether an update is needed.
    fn verify(&self, _ctx: &DeployContext<'_>) -> Result<Verify> {
        Ok(Verify::UpToDate)
    }

    /// Converge to the desired state.
    fn update(&mut self, _ctx: &DeployContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// A component instance together with the sub-components it owns.
#[derive(Debug)]
pub struct ComponentNode {
    component: Box<dyn Component>,
    children: Vec<ComponentNode>,
    changed: bool,
    state: LifecycleState,
}

impl ComponentNode {
    /// Wrap an unconfigured component.
    pub fn new(component: Box<dyn Component>) -> Self {
        Self {
            component,
            children: Vec::new(),
            changed: false,
            state: LifecycleState::Unconfigured,
        }
    }

    /// Configure the component, collecting the sub-components it attaches.
    pub fn configure(&mut self, ctx: &mut ConfigureContext<'_>) -> Result<()> {
        self.component.configure(ctx)?;
        self.children.append(&mut ctx.children);
        self.state = LifecycleState::Configured;
        Ok(())
    }

    /// Deploy sub-components, then verify and update this component.
    ///
    /// Returns whether this node or any descendant changed.
    pub fn deploy(&mut self, ctx: &DeployContext<'_>) -> Result<bool> {
        self.changed = false;
        for child in &mut self.children {
            if child.deploy(ctx)? {
                self.changed = true;
            }
        }

        let ctx = DeployContext {
            children_changed: self.changed,
            ..*ctx
        };
        let label = self.label();
        let outcome = self
            .component
            .verify(&ctx)
            .with_context(|| format!("verifying {label} failed"))?;

        match outcome {
            Verify::UpToDate => {
                self.state = LifecycleState::UpToDate;
            }
            Verify::NeedsUpdate if ctx.predict_only => {
                log::info!("{}: would update {label}", ctx.host);
                self.state = LifecycleState::NeedsUpdate;
                self.changed = true;
            }
            Verify::NeedsUpdate => {
                log::info!("{}: updating {label}", ctx.host);
                self.component
                    .update(&ctx)
                    .with_context(|| format!("updating {label} failed"))?;
                self.state = LifecycleState::Updated;
                self.changed = true;
            }
        }
        Ok(self.changed)
    }

    /// Human-readable label, e.g. `file(/etc/motd)`.
    pub fn label(&self) -> String {
        match self.component.name() {
            Some(name) => format!("{}({name})", self.component.kind()),
            None => self.component.kind().to_string(),
        }
    }

    /// Sub-components in deployment order.
    pub fn children(&self) -> &[ComponentNode] {
        &self.children
    }

    /// Whether the last deploy changed anything.
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Current lifecycle position.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The wrapped component.
    pub fn component(&self) -> &dyn Component {
        self.component.as_ref()
    }
}

/// Context passed to `configure()`.
///
/// Holds the only mutable handle to the resource registry for the duration of
/// the call, so registry mutations are serialized by construction.
pub struct ConfigureContext<'a> {
    root: &'a RootKey,
    environment: &'a str,
    address: Option<IpAddr>,
    workdir: &'a Path,
    features: &'a [String],
    registry: &'a mut ResourceRegistry,
    children: Vec<ComponentNode>,
}

impl<'a> ConfigureContext<'a> {
    /// Create a context for configuring the tree of `root`.
    pub fn new(
        root: &'a RootKey,
        environment: &'a str,
        address: Option<IpAddr>,
        workdir: &'a Path,
        features: &'a [String],
        registry: &'a mut ResourceRegistry,
    ) -> Self {
        Self {
            root,
            environment,
            address,
            workdir,
            features,
            registry,
            children: Vec::new(),
        }
    }

    /// Attach a sub-component and configure it immediately.
    ///
    /// The child inherits root, host, environment and working directory.
    pub fn add(&mut self, component: Box<dyn Component>) -> Result<()> {
        let mut node = ComponentNode::new(component);
        let mut child = ConfigureContext {
            root: self.root,
            environment: self.environment,
            address: self.address,
            workdir: self.workdir,
            features: self.features,
            registry: &mut *self.registry,
            children: Vec::new(),
        };
        node.configure(&mut child)?;
        self.children.push(node);
        Ok(())
    }

    /// Publish `value` under `key`.
    pub fn provide(&mut self, key: &str, value: impl Into<ResourceValue>) {
        self.registry.provide(self.root, key, value.into());
    }

    /// Subscribe to `key` and return the values currently provided for it.
    ///
    /// Missing values yield an empty list; the engine reconfigures this root
    /// once they appear.
    pub fn require(&mut self, key: &str, options: Require) -> Vec<ResourceValue> {
        self.registry.require(self.root, key, &options)
    }

    /// Like [`require`](Self::require) but expects exactly one value.
    pub fn require_one(&mut self, key: &str, options: Require) -> Result<ResourceValue> {
        let mut values = self.require(key, options);
        if values.len() != 1 {
            return Err(ConfigError::Configuration {
                root: Some(self.root.clone()),
                message: format!(
                    "expected exactly one value for `{key}`, found {}",
                    values.len()
                ),
            }
            .into());
        }
        Ok(values.remove(0))
    }

    /// Root component being configured.
    pub fn root(&self) -> &RootKey {
        self.root
    }

    /// Host the root is assigned to.
    pub fn host(&self) -> &str {
        &self.root.host
    }

    /// Address of the host, if configured.
    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    /// Environment name.
    pub fn environment(&self) -> &str {
        self.environment
    }

    /// Working directory of the root component.
    pub fn workdir(&self) -> &Path {
        self.workdir
    }

    /// Features enabled for the root component.
    pub fn features(&self) -> &[String] {
        self.features
    }

    /// Whether `feature` is enabled for the root component.
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

/// Context passed to `verify()` and `update()`.
#[derive(Debug, Clone, Copy)]
pub struct DeployContext<'a> {
    /// Only report what would change
    pub predict_only: bool,
    /// Host being deployed
    pub host: &'a str,
    /// Environment name
    pub environment: &'a str,
    /// Working directory of the root component
    pub workdir: &'a Path,
    /// Whether any sub-component of the current node changed
    pub children_changed: bool,
}

impl<'a> DeployContext<'a> {
    /// Create a context for deploying a root component.
    pub fn new(host: &'a str, environment: &'a str, workdir: &'a Path, predict_only: bool) -> Self {
        Self {
            predict_only,
            host,
            environment,
            workdir,
            children_changed: false,
        }
    }

    /// Ask for an update when any sub-component changed.
    pub fn assert_no_subcomponent_changes(&self) -> Verify {
        if self.children_changed {
            Verify::NeedsUpdate
        } else {
            Verify::UpToDate
        }
    }
}
