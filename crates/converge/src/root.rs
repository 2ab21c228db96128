//! Root components and component kinds
//!
//! A root component binds one component kind to one host under one name. It
//! is the unit of scheduling: the dependency graph and the retry sets use its
//! [`RootKey`] as node identity, so the key stays stable across convergence
//! passes while the component tree behind it is rebuilt on every pass.

use crate::component::{Component, ComponentNode, ConfigureContext, DeployContext};
use crate::error::ConfigError;
use crate::registry::ResourceRegistry;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Attribute overrides applied to a component kind.
pub type Overrides = BTreeMap<String, serde_json::Value>;

/// Stable identity of a root component: component name on a host.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RootKey {
    /// Component name
    pub name: String,
    /// Host name
    pub host: String,
}

impl RootKey {
    /// Create a key for `name` on `host`.
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
        }
    }
}

impl fmt::Display for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.host)
    }
}

/// Typed component whose attributes can be set from overrides.
pub trait Configurable: Component + DeserializeOwned + 'static {
    /// Kind name used in environment files.
    const KIND: &'static str;

    /// Attribute names accepted as overrides.
    const ATTRIBUTES: &'static [&'static str];
}

type BuildFn = dyn Fn(&Overrides) -> std::result::Result<Box<dyn Component>, String> + Send + Sync;

/// Factory for a kind of component.
///
/// Overrides are validated against the declared attribute names before the
/// typed attribute struct is built from them.
#[derive(Clone)]
pub struct ComponentKind {
    name: String,
    attributes: Vec<String>,
    build: Arc<BuildFn>,
}

impl ComponentKind {
    /// Kind built by an arbitrary factory function.
    pub fn new<F>(name: impl Into<String>, attributes: &[&str], build: F) -> Self
    where
        F: Fn(&Overrides) -> std::result::Result<Box<dyn Component>, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            attributes: attributes.iter().map(ToString::to_string).collect(),
            build: Arc::new(build),
        }
    }

    /// Kind built by deserializing overrides into `T`.
    pub fn of<T: Configurable>() -> Self {
        Self::new(T::KIND, T::ATTRIBUTES, |overrides| {
            let value = serde_json::Value::Object(overrides.clone().into_iter().collect());
            serde_json::from_value::<T>(value)
                .map(|component| Box::new(component) as Box<dyn Component>)
                .map_err(|e| e.to_string())
        })
    }

    /// Kind name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared attribute names.
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Reject overrides for attributes the kind does not declare.
    pub fn validate(&self, component: &str, overrides: &Overrides) -> Result<(), ConfigError> {
        let unknown: Vec<String> = overrides
            .keys()
            .filter(|key| !self.attributes.contains(key))
            .cloned()
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingOverrideAttributes {
                component: component.to_string(),
                attributes: unknown,
            })
        }
    }

    /// Build a fresh, unconfigured component instance.
    pub fn instantiate(
        &self,
        component: &str,
        overrides: &Overrides,
    ) -> Result<Box<dyn Component>, ConfigError> {
        self.validate(component, overrides)?;
        (self.build)(overrides).map_err(|message| ConfigError::Conversion {
            component: component.to_string(),
            message,
        })
    }
}

impl fmt::Debug for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentKind")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

/// Registry of component kinds by name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    kinds: BTreeMap<String, ComponentKind>,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed kind.
    pub fn with<T: Configurable>(mut self) -> Self {
        self.register(ComponentKind::of::<T>());
        self
    }

    /// Register a kind, replacing any kind with the same name.
    pub fn register(&mut self, kind: ComponentKind) {
        self.kinds.insert(kind.name().to_string(), kind);
    }

    /// Look up a kind by name.
    pub fn get(&self, name: &str) -> Option<&ComponentKind> {
        self.kinds.get(name)
    }

    /// Registered kind names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }
}

/// A component kind bound to a host under a name.
#[derive(Debug)]
pub struct RootComponent {
    key: RootKey,
    kind: ComponentKind,
    address: Option<IpAddr>,
    workdir: PathBuf,
    overrides: Overrides,
    features: Vec<String>,
    ignore: bool,
    tree: Option<ComponentNode>,
}

impl RootComponent {
    /// Bind `kind` as component `name` on `host`.
    pub fn new(name: impl Into<String>, host: impl Into<String>, kind: ComponentKind) -> Self {
        let key = RootKey::new(name, host);
        let workdir = PathBuf::from("work").join(&key.name);
        Self {
            key,
            kind,
            address: None,
            workdir,
            overrides: Overrides::new(),
            features: Vec::new(),
            ignore: false,
            tree: None,
        }
    }

    /// Derive the working directory from the environment's base directory.
    pub fn with_workdir_base(mut self, base: &Path) -> Self {
        self.workdir = base.join("work").join(&self.key.name);
        self
    }

    /// Set attribute overrides.
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Set enabled features.
    pub fn with_features(mut self, features: Vec<String>) -> Self {
        self.features = features;
        self
    }

    /// Set the host address.
    pub fn with_address(mut self, address: Option<IpAddr>) -> Self {
        self.address = address;
        self
    }

    /// Mark the root as ignored: it is configured but never deployed.
    pub fn ignored(mut self, ignore: bool) -> Self {
        self.ignore = ignore;
        self
    }

    /// Graph identity.
    pub fn key(&self) -> &RootKey {
        &self.key
    }

    /// Component name.
    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// Host name.
    pub fn host(&self) -> &str {
        &self.key.host
    }

    /// Component kind.
    pub fn kind(&self) -> &ComponentKind {
        &self.kind
    }

    /// Working directory.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Attribute overrides.
    pub fn overrides(&self) -> &Overrides {
        &self.overrides
    }

    /// Enabled features.
    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// Whether deployment skips this root.
    pub fn is_ignored(&self) -> bool {
        self.ignore
    }

    /// Component tree from the last successful configuration.
    pub fn tree(&self) -> Option<&ComponentNode> {
        self.tree.as_ref()
    }

    /// Take the configured tree, e.g. to hand it to a deploying host.
    pub fn take_tree(&mut self) -> Option<ComponentNode> {
        self.tree.take()
    }

    /// Build a fresh component tree and configure it.
    ///
    /// The caller resets this root's resources first.
    pub fn configure(&mut self, environment: &str, registry: &mut ResourceRegistry) -> Result<()> {
        self.tree = None;
        let component = self.kind.instantiate(&self.key.name, &self.overrides)?;
        let mut node = ComponentNode::new(component);
        let mut ctx = ConfigureContext::new(
            &self.key,
            environment,
            self.address,
            &self.workdir,
            &self.features,
            registry,
        );
        node.configure(&mut ctx)?;
        self.tree = Some(node);
        Ok(())
    }

    /// Deploy the configured tree. Returns whether anything changed.
    pub fn deploy(&mut self, environment: &str, predict_only: bool) -> Result<bool> {
        let tree = self
            .tree
            .as_mut()
            .with_context(|| format!("{} has not been configured", self.key))?;
        if !predict_only {
            std::fs::create_dir_all(&self.workdir).with_context(|| {
                format!("Failed to create working directory: {}", self.workdir.display())
            })?;
        }
        let ctx = DeployContext::new(&self.key.host, environment, &self.workdir, predict_only);
        tree.deploy(&ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{LifecycleState, Verify};

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Motd {
        message: String,
        #[serde(default)]
        port: u16,
    }

    impl Component for Motd {
        fn kind(&self) -> &'static str {
            "motd"
        }

        fn configure(&mut self, ctx: &mut ConfigureContext<'_>) -> Result<()> {
            ctx.provide("motd", self.message.clone());
            ctx.provide("port", self.port);
            Ok(())
        }

        fn verify(&self, _ctx: &DeployContext<'_>) -> Result<Verify> {
            Ok(Verify::UpToDate)
        }
    }

    impl Configurable for Motd {
        const KIND: &'static str = "motd";
        const ATTRIBUTES: &'static [&'static str] = &["message", "port"];
    }

    fn overrides(pairs: &[(&str, serde_json::Value)]) -> Overrides {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_unknown_override_is_rejected() {
        let kind = ComponentKind::of::<Motd>();
        let err = kind
            .instantiate("motd", &overrides(&[("colour", serde_json::json!("red"))]))
            .unwrap_err();
        match err {
            ConfigError::MissingOverrideAttributes { attributes, .. } => {
                assert_eq!(attributes, vec!["colour".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_wrong_type_is_a_conversion_error() {
        let kind = ComponentKind::of::<Motd>();
        let err = kind
            .instantiate(
                "motd",
                &overrides(&[
                    ("message", serde_json::json!("hi")),
                    ("port", serde_json::json!("eighty")),
                ]),
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::Conversion { .. }));
    }

    #[test]
    fn test_configure_builds_fresh_tree_each_time() {
        let mut registry = ResourceRegistry::new();
        let mut root = RootComponent::new("motd", "localhost", ComponentKind::of::<Motd>())
            .with_overrides(overrides(&[("message", serde_json::json!("hello"))]));

        for _ in 0..2 {
            registry.reset_component_resources(root.key());
            root.configure("test", &mut registry).unwrap();
        }

        let provided = registry.provided_by(root.key());
        assert_eq!(provided["motd"], vec![serde_json::json!("hello")]);
        assert_eq!(
            root.tree().map(ComponentNode::state),
            Some(LifecycleState::Configured)
        );
    }

    #[test]
    fn test_workdir_is_derived_from_name() {
        let root = RootComponent::new("app", "web1", ComponentKind::of::<Motd>())
            .with_workdir_base(Path::new("/srv/deploy"));
        assert_eq!(root.workdir(), Path::new("/srv/deploy/work/app"));
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = Catalog::new().with::<Motd>();
        assert!(catalog.get("motd").is_some());
        assert!(catalog.get("nginx").is_none());
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["motd"]);
    }

    #[test]
    fn test_deploy_requires_configuration() {
        let mut root = RootComponent::new("motd", "localhost", ComponentKind::of::<Motd>());
        assert!(root.deploy("test", true).is_err());
    }
}
