//! Bundle component - resources plus files and commands
//!
//! A bundle publishes values, consumes values from other components, and
//! attaches its files and commands as sub-components in declaration order.
//! Consumed values can be spliced into file contents and commands with
//! `{{resource:<key>}}`. Entries under `features.<name>` are only attached
//! when the root has that feature enabled.

use anyhow::Result;
use converge::{
    Component, ConfigureContext, Configurable, DeployContext, Require, ResourceValue, Verify,
};
use serde::Deserialize;
use std::collections::BTreeMap;

use super::{Command, File, substitute};

/// A `require` entry of a bundle
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequireSpec {
    /// Resource key
    pub key: String,
    /// Only accept values provided on this host (`{{host}}` allowed)
    #[serde(default)]
    pub host: Option<String>,
    /// Fail if nobody provides the key
    #[serde(default = "default_strict")]
    pub strict: bool,
    /// Deploy the providers after this bundle
    #[serde(default)]
    pub reverse: bool,
    /// Do not reconfigure when the values change
    #[serde(default)]
    pub dirty: bool,
    /// Expect exactly one value
    #[serde(default)]
    pub one: bool,
}

const fn default_strict() -> bool {
    true
}

/// Files and commands attached only when a feature is enabled
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureSection {
    #[serde(default)]
    pub files: Vec<File>,
    #[serde(default)]
    pub commands: Vec<Command>,
}

/// Group of resources, files and commands
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bundle {
    /// Values published under each key
    #[serde(default)]
    pub provide: BTreeMap<String, ResourceValue>,
    /// Values consumed
    #[serde(default)]
    pub require: Vec<RequireSpec>,
    /// Files to manage
    #[serde(default)]
    pub files: Vec<File>,
    /// Commands to run after the files
    #[serde(default)]
    pub commands: Vec<Command>,
    /// Extra files and commands per feature name
    #[serde(default)]
    pub features: BTreeMap<String, FeatureSection>,
    #[serde(skip)]
    received: BTreeMap<String, Vec<ResourceValue>>,
}

impl Bundle {
    fn attach(
        &self,
        ctx: &mut ConfigureContext<'_>,
        files: &[File],
        commands: &[Command],
    ) -> Result<()> {
        for file in files {
            let mut file = file.clone();
            file.content = self.splice(&file.content);
            ctx.add(Box::new(file))?;
        }
        for command in commands {
            let mut command = command.clone();
            command.command = self.splice(&command.command);
            ctx.add(Box::new(command))?;
        }
        Ok(())
    }

    fn splice(&self, text: &str) -> String {
        let mut text = text.to_string();
        for (key, values) in &self.received {
            let token = format!("{{{{resource:{key}}}}}");
            if text.contains(&token) {
                text = text.replace(&token, &render(values));
            }
        }
        text
    }
}

/// Render values for splicing: strings unquoted, everything else as JSON.
fn render(values: &[ResourceValue]) -> String {
    values
        .iter()
        .map(|value| match value {
            ResourceValue::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Substitute host tokens in every string of a value.
fn substitute_value(value: &ResourceValue, ctx: &ConfigureContext<'_>) -> ResourceValue {
    match value {
        ResourceValue::String(s) => ResourceValue::String(substitute(s, ctx)),
        ResourceValue::Array(items) => {
            ResourceValue::Array(items.iter().map(|v| substitute_value(v, ctx)).collect())
        }
        ResourceValue::Object(map) => ResourceValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

impl Component for Bundle {
    fn kind(&self) -> &'static str {
        "bundle"
    }

    fn configure(&mut self, ctx: &mut ConfigureContext<'_>) -> Result<()> {
        for (key, value) in &self.provide {
            let value = substitute_value(value, ctx);
            ctx.provide(key, value);
        }

        self.received.clear();
        for spec in &self.require {
            let mut options = Require::new();
            if let Some(host) = &spec.host {
                options = options.host(substitute(host, ctx));
            }
            if !spec.strict {
                options = options.optional();
            }
            if spec.reverse {
                options = options.reverse();
            }
            if spec.dirty {
                options = options.dirty();
            }
            let values = if spec.one {
                vec![ctx.require_one(&spec.key, options)?]
            } else {
                ctx.require(&spec.key, options)
            };
            self.received.insert(spec.key.clone(), values);
        }

        self.attach(ctx, &self.files, &self.commands)?;
        for (feature, section) in &self.features {
            if ctx.has_feature(feature) {
                self.attach(ctx, &section.files, &section.commands)?;
            } else {
                log::debug!(
                    "{}: skipping feature `{feature}`, enabled: {:?}",
                    ctx.host(),
                    ctx.features()
                );
            }
        }
        Ok(())
    }

    fn verify(&self, ctx: &DeployContext<'_>) -> Result<Verify> {
        Ok(ctx.assert_no_subcomponent_changes())
    }

    fn update(&mut self, ctx: &DeployContext<'_>) -> Result<()> {
        log::debug!("{}: bundle in {} changed", ctx.host, ctx.workdir.display());
        Ok(())
    }
}

impl Configurable for Bundle {
    const KIND: &'static str = "bundle";
    const ATTRIBUTES: &'static [&'static str] = &["provide", "require", "files", "commands", "features"];
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::testing::{with_context, with_features};
    use converge::{ComponentNode, ResourceRegistry, RootKey};
    use serde_json::json;
    use std::path::Path;

    fn bundle(value: serde_json::Value) -> Bundle {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_provide_substitutes_host_tokens() {
        let mut registry = ResourceRegistry::new();
        let mut b = bundle(json!({ "provide": { "backend": "{{address}}:8080" } }));
        let address = "10.0.0.7".parse().ok();

        with_context(Path::new("/tmp"), address, &mut registry, |ctx| b.configure(ctx)).unwrap();

        assert_eq!(
            registry.get("backend", None),
            vec![json!("10.0.0.7:8080")]
        );
    }

    #[test]
    fn test_require_collects_values() {
        let mut registry = ResourceRegistry::new();
        registry.provide(&RootKey::new("db", "db1"), "db-addr", json!("10.0.0.1"));
        let mut b = bundle(json!({
            "require": [{ "key": "db-addr", "one": true }],
            "files": [{ "path": "app.conf", "content": "db={{resource:db-addr}}\n" }]
        }));

        let mut node = None;
        with_context(Path::new("/srv/app"), None, &mut registry, |ctx| {
            let mut root = ComponentNode::new(Box::new(b.clone()));
            root.configure(ctx)?;
            b.configure(ctx)?;
            node = Some(root);
            anyhow::Ok(())
        })
        .unwrap();

        assert_eq!(b.received["db-addr"], [json!("10.0.0.1")]);
        let node = node.unwrap();
        assert_eq!(node.children().len(), 1);
        assert_eq!(node.children()[0].label(), "file(app.conf)");
    }

    #[test]
    fn test_missing_single_value_is_an_error() {
        let mut registry = ResourceRegistry::new();
        let mut b = bundle(json!({ "require": [{ "key": "db-addr", "one": true }] }));

        let result =
            with_context(Path::new("/tmp"), None, &mut registry, |ctx| b.configure(ctx));

        assert!(result.is_err());
    }

    #[test]
    fn test_optional_require_is_not_unsatisfied() {
        let mut registry = ResourceRegistry::new();
        let mut b = bundle(json!({ "require": [{ "key": "cache", "strict": false }] }));

        with_context(Path::new("/tmp"), None, &mut registry, |ctx| b.configure(ctx)).unwrap();

        assert!(registry.unsatisfied().is_empty());
        assert!(b.received["cache"].is_empty());
    }

    #[test]
    fn test_feature_sections_follow_enabled_features() {
        let mut registry = ResourceRegistry::new();
        let b = bundle(json!({
            "files": [{ "path": "app.conf", "content": "x" }],
            "features": {
                "replica": { "files": [{ "path": "replica.conf", "content": "y" }] },
                "metrics": { "commands": [{ "command": "enable-metrics" }] }
            }
        }));

        let features = ["replica".to_string()];
        let node = with_features(Path::new("/srv/app"), &features, &mut registry, |ctx| {
            let mut root = ComponentNode::new(Box::new(b.clone()));
            root.configure(ctx)?;
            anyhow::Ok(root)
        })
        .unwrap();

        let labels: Vec<_> = node.children().iter().map(|c| c.label()).collect();
        assert_eq!(labels, ["file(app.conf)", "file(replica.conf)"]);
    }

    #[test]
    fn test_splice_renders_values() {
        let mut b = Bundle::default();
        b.received
            .insert("peers".to_string(), vec![json!("a"), json!("b"), json!(3)]);
        assert_eq!(b.splice("peers={{resource:peers}}"), "peers=a,b,3");
        assert_eq!(b.splice("{{resource:other}}"), "{{resource:other}}");
    }

    #[test]
    fn test_unknown_attribute_is_rejected() {
        let result = serde_json::from_value::<Bundle>(json!({ "provides": {} }));
        assert!(result.is_err());
    }
}
