//! File component - manages the content of one file

use anyhow::{Context, Result};
use converge::{Component, ConfigureContext, Configurable, DeployContext, Verify};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::ui;

/// A file with fixed content
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct File {
    /// Absolute, `~`-prefixed, or relative to the working directory
    pub path: String,
    /// Desired content
    #[serde(default)]
    pub content: String,
    /// Permission bits, e.g. `0o644`
    #[serde(default)]
    pub mode: Option<u32>,
    #[serde(skip)]
    target: PathBuf,
}

#[cfg(test)]
impl File {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            mode: None,
            target: PathBuf::new(),
        }
    }

    /// Resolved target path (available after configure)
    pub fn target(&self) -> &std::path::Path {
        &self.target
    }
}

impl File {
    fn content_differs(&self, current: &[u8]) -> bool {
        blake3::hash(current) != blake3::hash(self.content.as_bytes())
    }

    #[cfg(unix)]
    fn mode_differs(&self) -> Result<bool> {
        use std::os::unix::fs::PermissionsExt;
        let Some(mode) = self.mode else {
            return Ok(false);
        };
        let metadata = fs::metadata(&self.target)
            .with_context(|| format!("Failed to stat {}", self.target.display()))?;
        Ok(metadata.permissions().mode() & 0o7777 != mode)
    }

    #[cfg(not(unix))]
    fn mode_differs(&self) -> Result<bool> {
        Ok(false)
    }

    #[cfg(unix)]
    fn apply_mode(&self) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = self.mode {
            fs::set_permissions(&self.target, fs::Permissions::from_mode(mode))
                .with_context(|| format!("Failed to set mode of {}", self.target.display()))?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn apply_mode(&self) -> Result<()> {
        Ok(())
    }
}

impl Component for File {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn name(&self) -> Option<String> {
        Some(self.path.clone())
    }

    fn configure(&mut self, ctx: &mut ConfigureContext<'_>) -> Result<()> {
        let path = crate::config::expand_path(&crate::components::substitute(&self.path, ctx));
        self.target = if path.is_absolute() {
            path
        } else {
            ctx.workdir().join(path)
        };
        self.content = crate::components::substitute(&self.content, ctx);
        Ok(())
    }

    fn verify(&self, ctx: &DeployContext<'_>) -> Result<Verify> {
        if !self.target.exists() {
            if ctx.predict_only {
                ui::info(&format!("{}: would create {}", ctx.host, self.target.display()));
                ui::diff("", &self.content);
            }
            return Ok(Verify::NeedsUpdate);
        }

        let current = fs::read(&self.target)
            .with_context(|| format!("Failed to read {}", self.target.display()))?;
        if self.content_differs(&current) {
            if ctx.predict_only {
                ui::info(&format!("{}: would change {}", ctx.host, self.target.display()));
                ui::diff(&String::from_utf8_lossy(&current), &self.content);
            }
            return Ok(Verify::NeedsUpdate);
        }
        if self.mode_differs()? {
            return Ok(Verify::NeedsUpdate);
        }
        Ok(Verify::UpToDate)
    }

    fn update(&mut self, _ctx: &DeployContext<'_>) -> Result<()> {
        if let Some(parent) = self.target.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create parent directory: {}", parent.display())
            })?;
        }
        fs::write(&self.target, &self.content)
            .with_context(|| format!("Failed to write {}", self.target.display()))?;
        self.apply_mode()
    }
}

impl Configurable for File {
    const KIND: &'static str = "file";
    const ATTRIBUTES: &'static [&'static str] = &["path", "content", "mode"];
}
