//! Command component - runs a shell command unless a check says it is done

use anyhow::Result;
use converge::{Component, ConfigureContext, Configurable, DeployContext, Verify};
use serde::Deserialize;
use std::path::PathBuf;

use crate::runner;
use crate::ui;

/// A shell command
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Command {
    /// Command run by `sh -c`
    pub command: String,
    /// Check; exit status 0 means the command need not run
    #[serde(default)]
    pub unless: Option<String>,
    /// Working directory, relative to the component's working directory
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(skip)]
    dir: PathBuf,
}

#[cfg(test)]
impl Command {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            unless: None,
            cwd: None,
            dir: PathBuf::new(),
        }
    }

    pub fn unless(mut self, check: impl Into<String>) -> Self {
        self.unless = Some(check.into());
        self
    }
}

impl Component for Command {
    fn kind(&self) -> &'static str {
        "command"
    }

    fn name(&self) -> Option<String> {
        Some(self.command.clone())
    }

    fn configure(&mut self, ctx: &mut ConfigureContext<'_>) -> Result<()> {
        self.command = crate::components::substitute(&self.command, ctx);
        self.unless = self
            .unless
            .as_deref()
            .map(|check| crate::components::substitute(check, ctx));
        self.dir = match &self.cwd {
            Some(cwd) => ctx.workdir().join(crate::config::expand_path(cwd)),
            None => ctx.workdir().to_path_buf(),
        };
        Ok(())
    }

    fn verify(&self, ctx: &DeployContext<'_>) -> Result<Verify> {
        if let Some(check) = &self.unless
            && self.dir.is_dir()
            && runner::shell(check, Some(&self.dir))?.status.success()
        {
            return Ok(Verify::UpToDate);
        }
        if ctx.predict_only {
            ui::info(&format!("{}: would run `{}`", ctx.host, self.command));
        }
        Ok(Verify::NeedsUpdate)
    }

    fn update(&mut self, _ctx: &DeployContext<'_>) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let stdout = runner::shell_checked(&self.command, Some(&self.dir))?;
        if !stdout.is_empty() {
            log::info!("{}: {stdout}", self.command);
        }
        Ok(())
    }
}

impl Configurable for Command {
    const KIND: &'static str = "command";
    const ATTRIBUTES: &'static [&'static str] = &["command", "unless", "cwd"];
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::components::testing::with_context;
    use converge::ResourceRegistry;
    use std::path::Path;
    use tempfile::TempDir;

    fn configured(mut command: Command, workdir: &Path) -> Command {
        let mut registry = ResourceRegistry::new();
        with_context(workdir, None, &mut registry, |ctx| command.configure(ctx)).unwrap();
        command
    }

    #[test]
    fn test_command_without_unless_always_runs() {
        let temp_dir = TempDir::new().unwrap();
        let command = configured(Command::new("true"), temp_dir.path());
        let ctx = DeployContext::new("web1", "test", temp_dir.path(), false);
        assert_eq!(command.verify(&ctx).unwrap(), Verify::NeedsUpdate);
    }

    #[test]
    fn test_unless_makes_command_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let mut command = configured(
            Command::new("echo {{host}} > marker").unless("test -f marker"),
            temp_dir.path(),
        );
        let ctx = DeployContext::new("web1", "test", temp_dir.path(), false);

        assert_eq!(command.verify(&ctx).unwrap(), Verify::NeedsUpdate);
        command.update(&ctx).unwrap();

        assert_eq!(command.verify(&ctx).unwrap(), Verify::UpToDate);
        assert_eq!(
            std::fs::read_to_string(temp_dir.path().join("marker")).unwrap(),
            "web1\n"
        );
    }

    #[test]
    fn test_predict_only_never_runs_the_command() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = DeployContext::new("web1", "test", temp_dir.path(), true);

        let plain = configured(Command::new("touch ran"), temp_dir.path());
        assert_eq!(plain.verify(&ctx).unwrap(), Verify::NeedsUpdate);

        let guarded = configured(
            Command::new("touch ran").unless("test -f done"),
            temp_dir.path(),
        );
        assert_eq!(guarded.verify(&ctx).unwrap(), Verify::NeedsUpdate);

        assert!(!temp_dir.path().join("ran").exists());
    }

    #[test]
    fn test_failing_command_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut command = configured(Command::new("exit 2"), temp_dir.path());
        let ctx = DeployContext::new("web1", "test", temp_dir.path(), false);
        assert!(command.update(&ctx).is_err());
    }

    #[test]
    fn test_cwd_is_relative_to_workdir() {
        let temp_dir = TempDir::new().unwrap();
        let mut command = Command::new("pwd > here");
        command.cwd = Some("sub".to_string());
        let mut command = configured(command, temp_dir.path());
        let ctx = DeployContext::new("web1", "test", temp_dir.path(), false);

        command.update(&ctx).unwrap();

        assert!(temp_dir.path().join("sub/here").exists());
    }
}
