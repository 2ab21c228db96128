//! The controlling machine as a deployment target

use converge::{ConnectError, DeployError, Host, RootComponent};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// Deploys configured root components in this process.
pub struct LocalHost {
    name: String,
    environment: String,
    roots: BTreeMap<String, Mutex<RootComponent>>,
}

impl LocalHost {
    /// `roots` must already be configured.
    pub fn new(name: &str, environment: &str, roots: Vec<RootComponent>) -> Self {
        Self {
            name: name.to_string(),
            environment: environment.to_string(),
            roots: roots
                .into_iter()
                .map(|root| (root.name().to_string(), Mutex::new(root)))
                .collect(),
        }
    }

    fn failed(&self, component: &str, message: String) -> DeployError {
        DeployError::Failed {
            host: self.name.clone(),
            component: component.to_string(),
            message,
        }
    }
}

impl Host for LocalHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self, _timeout: Option<Duration>) -> Result<(), ConnectError> {
        Ok(())
    }

    fn disconnect(&self) -> Result<(), ConnectError> {
        Ok(())
    }

    fn deploy_component(&self, component: &str, predict_only: bool) -> Result<(), DeployError> {
        let Some(root) = self.roots.get(component) else {
            return Err(self.failed(component, "component is not assigned to this host".into()));
        };
        let mut root = root
            .lock()
            .map_err(|_| self.failed(component, "component state is poisoned".into()))?;
        match root.deploy(&self.environment, predict_only) {
            Ok(true) => {
                log::info!("{}: {component} changed", self.name);
                Ok(())
            }
            Ok(false) => {
                log::debug!("{}: {component} up to date", self.name);
                Ok(())
            }
            Err(e) => Err(self.failed(component, format!("{e:#}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::File;
    use converge::{ComponentKind, ResourceRegistry};
    use std::path::Path;
    use tempfile::TempDir;

    fn configured_root(base: &Path) -> RootComponent {
        let kind = ComponentKind::new("motd", &[], |_| {
            Ok(Box::new(File::new("motd", "hello {{host}}\n")))
        });
        let mut root = RootComponent::new("motd", "localhost", kind).with_workdir_base(base);
        let mut registry = ResourceRegistry::new();
        root.configure("test", &mut registry).unwrap();
        root
    }

    #[test]
    fn test_deploys_configured_root() {
        let temp_dir = TempDir::new().unwrap();
        let host = LocalHost::new("localhost", "test", vec![configured_root(temp_dir.path())]);

        host.connect(None).unwrap();
        host.deploy_component("motd", false).unwrap();

        let written = temp_dir.path().join("work/motd/motd");
        assert_eq!(
            std::fs::read_to_string(written).unwrap(),
            "hello localhost\n"
        );
    }

    #[test]
    fn test_predict_only_changes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let host = LocalHost::new("localhost", "test", vec![configured_root(temp_dir.path())]);

        host.deploy_component("motd", true).unwrap();

        assert!(!temp_dir.path().join("work").exists());
    }

    #[test]
    fn test_unknown_component_fails() {
        let host = LocalHost::new("localhost", "test", Vec::new());
        let err = host.deploy_component("nginx", false).unwrap_err();
        assert!(matches!(err, DeployError::Failed { component, .. } if component == "nginx"));
    }
}
