//! Resource registry
//!
//! Components publish values under string keys with `provide()` and consume
//! them with `require()`. The registry remembers who provided what and who
//! subscribed to what, which is enough to:
//!
//! - mark subscribers stale when a key they read changes (`dirty` set),
//! - derive the dependency graph between root components,
//! - detect unused and unsatisfied resources once configuration settles.

use crate::graph::Graph;
use crate::root::RootKey;
use std::collections::{BTreeMap, BTreeSet};

/// Opaque value contributed under a resource key.
pub type ResourceValue = serde_json::Value;

/// `key -> provider -> values`
pub type ResourceMap = BTreeMap<String, BTreeMap<RootKey, Vec<ResourceValue>>>;

/// Options for a `require()` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Require {
    /// Only consider values provided by roots on this host
    pub host: Option<String>,
    /// Fail the run if no value ever appears
    pub strict: bool,
    /// Flip the dependency edge: the provider deploys after the subscriber
    pub reverse: bool,
    /// Accept stale values without being reconfigured
    pub dirty: bool,
}

impl Default for Require {
    fn default() -> Self {
        Self {
            host: None,
            strict: true,
            reverse: false,
            dirty: false,
        }
    }
}

impl Require {
    /// Strict, host-agnostic requirement.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to providers on `host`.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Allow the key to stay unprovided.
    pub fn optional(mut self) -> Self {
        self.strict = false;
        self
    }

    /// Deploy providers after this subscriber.
    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Do not reconfigure when the value changes.
    pub fn dirty(mut self) -> Self {
        self.dirty = true;
        self
    }
}

/// A recorded `require()` call.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subscription {
    /// Root that called `require()`
    pub subscriber: RootKey,
    /// Missing values are a hard error
    pub strict: bool,
    /// Host filter; `None` matches every host
    pub host: Option<String>,
    /// Edge direction flipped
    pub reverse: bool,
    /// Tolerates stale values
    pub dirty: bool,
}

impl Subscription {
    /// Whether a value provided by `provider` is visible to this subscription.
    pub fn matches(&self, provider: &RootKey) -> bool {
        self.host.as_ref().is_none_or(|host| *host == provider.host)
    }
}

/// Provide/require store for one configuration run.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    resources: ResourceMap,
    subscriptions: BTreeMap<String, BTreeSet<Subscription>>,
    dirty: BTreeSet<RootKey>,
}

impl ResourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` to the values `root` provides under `key`.
    ///
    /// Every non-tolerant subscriber that can see `root` becomes dirty.
    pub fn provide(&mut self, root: &RootKey, key: &str, value: ResourceValue) {
        log::trace!("{root} provides {key} = {value}");
        self.resources
            .entry(key.to_string())
            .or_default()
            .entry(root.clone())
            .or_default()
            .push(value);
        self.mark_dirty(key, root);
    }

    /// Subscribe `root` to `key` and return a snapshot of matching values.
    pub fn require(&mut self, root: &RootKey, key: &str, options: &Require) -> Vec<ResourceValue> {
        log::trace!("{root} requires {key}");
        self.subscriptions
            .entry(key.to_string())
            .or_default()
            .insert(Subscription {
                subscriber: root.clone(),
                strict: options.strict,
                host: options.host.clone(),
                reverse: options.reverse,
                dirty: options.dirty,
            });
        self.get(key, options.host.as_deref())
    }

    /// Values currently provided under `key`, optionally restricted to
    /// providers on `host`. Ordered by provider, then insertion.
    pub fn get(&self, key: &str, host: Option<&str>) -> Vec<ResourceValue> {
        self.resources
            .get(key)
            .into_iter()
            .flatten()
            .filter(|(provider, _)| host.is_none_or(|host| provider.host == host))
            .flat_map(|(_, values)| values.iter().cloned())
            .collect()
    }

    /// Forget everything `root` contributed, ahead of reconfiguring it.
    ///
    /// Subscribers of every key `root` provided become dirty, and the root's
    /// own subscriptions are dropped until its next `configure()`.
    pub fn reset_component_resources(&mut self, root: &RootKey) {
        for subscriptions in self.subscriptions.values_mut() {
            subscriptions.retain(|s| s.subscriber != *root);
        }
        self.subscriptions.retain(|_, subscriptions| !subscriptions.is_empty());

        let keys: Vec<String> = self
            .resources
            .iter()
            .filter(|(_, providers)| providers.contains_key(root))
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            if let Some(providers) = self.resources.get_mut(&key) {
                providers.remove(root);
                if providers.is_empty() {
                    self.resources.remove(&key);
                }
            }
            self.mark_dirty(&key, root);
        }
    }

    fn mark_dirty(&mut self, key: &str, provider: &RootKey) {
        let Some(subscriptions) = self.subscriptions.get(key) else {
            return;
        };
        for subscription in subscriptions {
            if subscription.dirty
                || subscription.subscriber == *provider
                || !subscription.matches(provider)
            {
                continue;
            }
            self.dirty.insert(subscription.subscriber.clone());
        }
    }

    /// Roots that became stale since the last [`clear_dirty`](Self::clear_dirty).
    pub fn dirty(&self) -> &BTreeSet<RootKey> {
        &self.dirty
    }

    /// Start a new pass of staleness tracking.
    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    /// Values no subscription could ever consume.
    pub fn unused(&self) -> ResourceMap {
        let mut unused = ResourceMap::new();
        for (key, providers) in &self.resources {
            let subscriptions = self.subscriptions.get(key);
            let leftover: BTreeMap<RootKey, Vec<ResourceValue>> = providers
                .iter()
                .filter(|(provider, _)| {
                    !subscriptions
                        .into_iter()
                        .flatten()
                        .any(|s| s.matches(provider))
                })
                .map(|(provider, values)| (provider.clone(), values.clone()))
                .collect();
            if !leftover.is_empty() {
                unused.insert(key.clone(), leftover);
            }
        }
        unused
    }

    /// `(key, host filter)` pairs of strict subscriptions nobody satisfies.
    pub fn unsatisfied(&self) -> BTreeSet<(String, Option<String>)> {
        let mut unsatisfied = BTreeSet::new();
        for (key, subscriptions) in &self.subscriptions {
            for subscription in subscriptions.iter().filter(|s| s.strict) {
                if !self.is_satisfied(key, subscription) {
                    unsatisfied.insert((key.clone(), subscription.host.clone()));
                }
            }
        }
        unsatisfied
    }

    /// Subscribers holding at least one unsatisfied strict requirement.
    pub fn unsatisfied_roots(&self) -> BTreeSet<RootKey> {
        let mut roots = BTreeSet::new();
        for (key, subscriptions) in &self.subscriptions {
            for subscription in subscriptions.iter().filter(|s| s.strict) {
                if !self.is_satisfied(key, subscription) {
                    roots.insert(subscription.subscriber.clone());
                }
            }
        }
        roots
    }

    fn is_satisfied(&self, key: &str, subscription: &Subscription) -> bool {
        self.resources
            .get(key)
            .is_some_and(|providers| providers.keys().any(|p| subscription.matches(p)))
    }

    /// Edges between roots implied by current subscriptions.
    ///
    /// By default a subscriber points at each provider it can see (the
    /// provider deploys first); `reverse` subscriptions flip the edge. Every
    /// root involved in any relationship is a key.
    pub fn dependency_graph(&self) -> Graph<RootKey> {
        let mut graph = Graph::new();
        for (key, providers) in &self.resources {
            let Some(subscriptions) = self.subscriptions.get(key) else {
                continue;
            };
            for subscription in subscriptions {
                let subscriber = &subscription.subscriber;
                graph.entry(subscriber.clone()).or_default();
                for provider in providers.keys() {
                    if provider == subscriber || !subscription.matches(provider) {
                        continue;
                    }
                    graph.entry(provider.clone()).or_default();
                    if subscription.reverse {
                        graph
                            .entry(provider.clone())
                            .or_default()
                            .insert(subscriber.clone());
                    } else {
                        graph
                            .entry(subscriber.clone())
                            .or_default()
                            .insert(provider.clone());
                    }
                }
            }
        }
        graph
    }

    /// Everything `root` currently provides, by key.
    pub fn provided_by(&self, root: &RootKey) -> BTreeMap<String, Vec<ResourceValue>> {
        self.resources
            .iter()
            .filter_map(|(key, providers)| {
                providers
                    .get(root)
                    .map(|values| (key.clone(), values.clone()))
            })
            .collect()
    }

    /// Subscriptions registered for `key`.
    pub fn subscriptions(&self, key: &str) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.get(key).into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn root(name: &str, host: &str) -> RootKey {
        RootKey::new(name, host)
    }

    #[test]
    fn test_require_returns_snapshot() {
        let mut registry = ResourceRegistry::new();
        let db = root("postgres", "db1");
        let app = root("app", "web1");

        assert!(registry.require(&app, "db-addr", &Require::new()).is_empty());
        registry.provide(&db, "db-addr", json!("10.0.0.1"));
        assert_eq!(
            registry.require(&app, "db-addr", &Require::new()),
            vec![json!("10.0.0.1")]
        );
    }

    #[test]
    fn test_provide_marks_subscribers_dirty() {
        let mut registry = ResourceRegistry::new();
        let db = root("postgres", "db1");
        let app = root("app", "web1");
        let tolerant = root("monitor", "web1");

        registry.require(&app, "db-addr", &Require::new());
        registry.require(&tolerant, "db-addr", &Require::new().dirty());
        registry.provide(&db, "db-addr", json!("10.0.0.1"));

        assert_eq!(registry.dirty(), &BTreeSet::from([app]));
        registry.clear_dirty();
        assert!(registry.dirty().is_empty());
    }

    #[test]
    fn test_host_filter_hides_other_hosts() {
        let mut registry = ResourceRegistry::new();
        registry.provide(&root("postgres", "db1"), "db-addr", json!("10.0.0.1"));
        registry.provide(&root("postgres", "db2"), "db-addr", json!("10.0.0.2"));
        let app = root("app", "db2");

        let values = registry.require(&app, "db-addr", &Require::new().host("db2"));
        assert_eq!(values, vec![json!("10.0.0.2")]);

        let values = registry.require(&app, "db-addr", &Require::new().host("web9"));
        assert!(values.is_empty());
        assert!(
            registry
                .unsatisfied()
                .contains(&("db-addr".to_string(), Some("web9".to_string())))
        );
    }

    #[test]
    fn test_reset_removes_contributions_and_marks_dirty() {
        let mut registry = ResourceRegistry::new();
        let db = root("postgres", "db1");
        let app = root("app", "web1");
        registry.provide(&db, "db-addr", json!("10.0.0.1"));
        registry.require(&app, "db-addr", &Require::new());
        registry.clear_dirty();

        registry.reset_component_resources(&db);

        assert!(registry.get("db-addr", None).is_empty());
        assert!(registry.dirty().contains(&app));
        assert!(registry.provided_by(&db).is_empty());
    }

    #[test]
    fn test_reset_then_reprovide_is_idempotent() {
        let mut registry = ResourceRegistry::new();
        let db = root("postgres", "db1");
        for _ in 0..2 {
            registry.reset_component_resources(&db);
            registry.provide(&db, "db-addr", json!("10.0.0.1"));
            registry.provide(&db, "db-port", json!(5432));
        }

        let provided = registry.provided_by(&db);
        assert_eq!(provided["db-addr"], vec![json!("10.0.0.1")]);
        assert_eq!(provided["db-port"], vec![json!(5432)]);
    }

    #[test]
    fn test_reset_drops_own_subscriptions() {
        let mut registry = ResourceRegistry::new();
        let app = root("app", "web1");
        registry.require(&app, "db-addr", &Require::new());
        assert_eq!(registry.unsatisfied_roots(), BTreeSet::from([app.clone()]));

        registry.reset_component_resources(&app);
        assert!(registry.unsatisfied().is_empty());
        assert_eq!(registry.subscriptions("db-addr").count(), 0);
    }

    #[test]
    fn test_unused_respects_host_filters() {
        let mut registry = ResourceRegistry::new();
        registry.provide(&root("postgres", "db1"), "db-addr", json!("10.0.0.1"));
        registry.provide(&root("postgres", "db2"), "db-addr", json!("10.0.0.2"));
        registry.provide(&root("postgres", "db2"), "db-port", json!(5432));
        registry.require(&root("app", "db1"), "db-addr", &Require::new().host("db1"));

        let unused = registry.unused();
        assert_eq!(unused.len(), 2);
        assert!(unused["db-addr"].contains_key(&root("postgres", "db2")));
        assert!(!unused["db-addr"].contains_key(&root("postgres", "db1")));
        assert!(unused.contains_key("db-port"));

        registry.require(&root("monitor", "web1"), "db-addr", &Require::new());
        registry.require(&root("monitor", "web1"), "db-port", &Require::new().optional());
        assert!(registry.unused().is_empty());
    }

    #[test]
    fn test_optional_requirement_is_never_unsatisfied() {
        let mut registry = ResourceRegistry::new();
        registry.require(&root("app", "web1"), "cache", &Require::new().optional());
        assert!(registry.unsatisfied().is_empty());
        assert!(registry.unsatisfied_roots().is_empty());
    }

    #[test]
    fn test_dependency_graph_edges() {
        let mut registry = ResourceRegistry::new();
        let db = root("postgres", "db1");
        let app = root("app", "web1");
        let proxy = root("haproxy", "lb1");
        registry.provide(&db, "db-addr", json!("10.0.0.1"));
        registry.require(&app, "db-addr", &Require::new());
        // the proxy collects backends but is deployed before them
        registry.provide(&app, "backend", json!("web1:8080"));
        registry.require(&proxy, "backend", &Require::new().reverse());

        let graph = registry.dependency_graph();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph[&app], BTreeSet::from([db.clone(), proxy.clone()]));
        assert!(graph[&proxy].is_empty());
        assert!(graph[&db].is_empty());
    }

    #[test]
    fn test_own_values_do_not_create_edges() {
        let mut registry = ResourceRegistry::new();
        let app = root("app", "web1");
        registry.provide(&app, "peers", json!("web1"));
        registry.require(&app, "peers", &Require::new());

        assert!(registry.dirty().is_empty());
        assert!(registry.dependency_graph()[&app].is_empty());
    }
}
