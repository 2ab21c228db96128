//! Environment file loading
//!
//! Layout of a deployment repository:
//!
//! ```text
//! <base>/environments/<name>.toml   hosts, components, settings
//! <base>/secrets/<name>.toml        optional override overlay
//! ```

use anyhow::{Context, Result};
use converge::{Catalog, Environment, EnvironmentFile, SecretsFile, Settings};
use std::fs;
use std::path::{Path, PathBuf};

/// A validated environment together with its revision.
pub struct LoadedEnvironment {
    pub environment: Environment,
    /// blake3 digest of the environment file
    pub revision: String,
}

/// Expand `~` and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Path of the environment file for `name`.
pub fn environment_path(base_dir: &Path, name: &str) -> PathBuf {
    base_dir.join("environments").join(format!("{name}.toml"))
}

/// Path of the secrets overlay for `name`.
pub fn secrets_path(base_dir: &Path, name: &str) -> PathBuf {
    base_dir.join("secrets").join(format!("{name}.toml"))
}

/// Revision of an environment file's contents.
pub fn revision(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// Read and parse the environment file, merging secrets if present.
pub fn read_environment_file(base_dir: &Path, name: &str) -> Result<(EnvironmentFile, String)> {
    let path = environment_path(base_dir, name);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Could not read environment {}", path.display()))?;
    let mut file: EnvironmentFile =
        toml::from_str(&content).with_context(|| format!("Invalid {}", path.display()))?;

    let secrets = secrets_path(base_dir, name);
    if secrets.exists() {
        let content = fs::read_to_string(&secrets)
            .with_context(|| format!("Could not read secrets {}", secrets.display()))?;
        let overlay: SecretsFile =
            toml::from_str(&content).with_context(|| format!("Invalid {}", secrets.display()))?;
        log::debug!("merging secrets from {}", secrets.display());
        file.merge_secrets(overlay);
    }

    Ok((file, revision(&content)))
}

/// Base directory for component working directories.
pub fn workdir_base(settings: &Settings, base_dir: &Path) -> PathBuf {
    match &settings.workdir {
        Some(workdir) => {
            let expanded = expand_path(workdir);
            if expanded.is_absolute() {
                expanded
            } else {
                base_dir.join(expanded)
            }
        }
        None => base_dir.to_path_buf(),
    }
}

/// Load and validate environment `name`.
pub fn load(base_dir: &Path, name: &str, catalog: &Catalog) -> Result<LoadedEnvironment> {
    let (file, revision) = read_environment_file(base_dir, name)?;
    let workdir = workdir_base(&file.environment, base_dir);
    let environment = Environment::from_file(name, &workdir, file, catalog)
        .map_err(converge::Error::configuration)?;
    log::info!(
        "loaded environment {name}: {} host(s), {} component(s)",
        environment.hosts().len(),
        environment.roots().len()
    );
    Ok(LoadedEnvironment {
        environment,
        revision,
    })
}
