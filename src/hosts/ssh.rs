//! Remote hosts reached over ssh
//!
//! One multiplexed master connection is kept per host while a run lasts.
//! Components are deployed by the remote binary's `apply-component`
//! subcommand, which exits with [`REPOSITORY_DIFFERENT`] when its environment
//! revision does not match ours.

use converge::{ConnectError, DeployError, Host, HostSpec, Settings};
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use crate::runner;

/// Exit status of `apply-component` when the revisions differ.
pub const REPOSITORY_DIFFERENT: i32 = 3;

/// Exit status ssh itself reports for connection failures.
const SSH_CONNECTION_FAILED: i32 = 255;

/// A host deployed through the remote binary.
pub struct SshHost {
    name: String,
    target: String,
    control_path: PathBuf,
    remote_command: String,
    remote_base: String,
    environment: String,
    revision: String,
}

impl SshHost {
    pub fn new(spec: &HostSpec, environment: &str, revision: &str, settings: &Settings) -> Self {
        let target = spec
            .address
            .map_or_else(|| spec.name.clone(), |address| address.to_string());
        let control_path = std::env::temp_dir().join(format!(
            "rigger-{}-{}.sock",
            std::process::id(),
            spec.name
        ));
        Self {
            name: spec.name.clone(),
            target,
            control_path,
            remote_command: settings.remote_command.clone(),
            remote_base: settings.remote_base.clone().unwrap_or_else(|| ".".to_string()),
            environment: environment.to_string(),
            revision: revision.to_string(),
        }
    }

    fn control_option(&self) -> String {
        format!("ControlPath={}", self.control_path.display())
    }

    /// Arguments opening the master connection.
    fn connect_args(&self, timeout: Option<Duration>) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
            "-o".to_string(),
            self.control_option(),
        ];
        if let Some(timeout) = timeout {
            args.push("-o".to_string());
            args.push(format!("ConnectTimeout={}", timeout.as_secs().max(1)));
        }
        args.push(self.target.clone());
        args.push("true".to_string());
        args
    }

    /// Arguments running `apply-component` on the remote side.
    ///
    /// Fails for arguments the remote shell cannot carry, such as NUL bytes.
    fn deploy_args(
        &self,
        component: &str,
        predict_only: bool,
    ) -> Result<Vec<String>, shlex::QuoteError> {
        let mut remote = vec![
            self.remote_command.as_str(),
            "--base",
            self.remote_base.as_str(),
            "apply-component",
            "--environment",
            self.environment.as_str(),
            "--host",
            self.name.as_str(),
            "--revision",
            self.revision.as_str(),
        ];
        if predict_only {
            remote.push("--predict-only");
        }
        remote.push(component);

        Ok(vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            self.control_option(),
            self.target.clone(),
            shlex::try_join(remote)?,
        ])
    }

    fn disconnect_args(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            self.control_option(),
            "-O".to_string(),
            "exit".to_string(),
            self.target.clone(),
        ]
    }

    fn classify_deploy(&self, component: &str, output: &Output) -> Result<(), DeployError> {
        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
            log::info!("{}: {line}", self.name);
        }
        match output.status.code() {
            Some(0) => Ok(()),
            Some(REPOSITORY_DIFFERENT) => Err(DeployError::RepositoryDifferent {
                host: self.name.clone(),
                expected: self.revision.clone(),
                found: stdout.lines().last().unwrap_or_default().trim().to_string(),
            }),
            _ => Err(DeployError::Failed {
                host: self.name.clone(),
                component: component.to_string(),
                message: failure_message(output),
            }),
        }
    }
}

fn failure_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("remote command exited with {}", output.status)
    } else {
        stderr.to_string()
    }
}

fn classify_connect(output: &Output) -> Result<(), ConnectError> {
    match output.status.code() {
        Some(0) => Ok(()),
        Some(SSH_CONNECTION_FAILED) => Err(ConnectError::retryable(failure_message(output))),
        _ => Err(ConnectError::fatal(failure_message(output))),
    }
}

fn run_ssh(args: &[String]) -> anyhow::Result<Output> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    runner::output("ssh", &args)
}

impl Host for SshHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self, timeout: Option<Duration>) -> Result<(), ConnectError> {
        let output = run_ssh(&self.connect_args(timeout))
            .map_err(|e| ConnectError::fatal(format!("{e:#}")))?;
        classify_connect(&output)
    }

    fn disconnect(&self) -> Result<(), ConnectError> {
        let output = run_ssh(&self.disconnect_args())
            .map_err(|e| ConnectError::fatal(format!("{e:#}")))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ConnectError::fatal(failure_message(&output)))
        }
    }

    fn deploy_component(&self, component: &str, predict_only: bool) -> Result<(), DeployError> {
        let failed = |message: String| DeployError::Failed {
            host: self.name.clone(),
            component: component.to_string(),
            message,
        };
        let args = self
            .deploy_args(component, predict_only)
            .map_err(|e| failed(format!("cannot quote remote command: {e}")))?;
        let output = run_ssh(&args).map_err(|e| failed(format!("{e:#}")))?;
        self.classify_deploy(component, &output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn host() -> SshHost {
        let mut spec = HostSpec::new("web1");
        spec.address = "10.0.0.9".parse().ok();
        let settings = Settings {
            remote_base: Some("/srv/deploy".to_string()),
            ..Settings::default()
        };
        SshHost::new(&spec, "production", "abc123", &settings)
    }

    fn output(code: i32, stdout: &str, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_connect_targets_address() {
        let args = host().connect_args(Some(Duration::from_secs(10)));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert_eq!(&args[args.len() - 2..], ["10.0.0.9", "true"]);
    }

    #[test]
    fn test_deploy_runs_apply_component() {
        let args = host().deploy_args("nginx", true).unwrap();
        let words = shlex::split(args.last().unwrap()).unwrap();
        assert_eq!(
            words,
            [
                "rigger",
                "--base",
                "/srv/deploy",
                "apply-component",
                "--environment",
                "production",
                "--host",
                "web1",
                "--revision",
                "abc123",
                "--predict-only",
                "nginx",
            ]
        );
    }

    #[test]
    fn test_shell_quote() {
        let args = host().deploy_args("my app's", false).unwrap();
        let line = args.last().unwrap();
        assert!(line.starts_with("rigger --base /srv/deploy "));
        assert_eq!(
            shlex::split(line).unwrap().last().map(String::as_str),
            Some("my app's")
        );
        for word in ["web1", "my app", "it's", ""] {
            let quoted = shlex::try_quote(word).unwrap();
            assert_eq!(shlex::split(&quoted).unwrap(), [word]);
        }
    }

    #[test]
    fn test_nul_byte_fails_the_task() {
        let host = host();
        assert!(host.deploy_args("bad\0name", false).is_err());
        let err = host.deploy_component("bad\0name", false).unwrap_err();
        assert!(
            matches!(err, DeployError::Failed { component, .. } if component == "bad\0name")
        );
    }

    #[test]
    fn test_connection_failures_are_retryable() {
        let err = classify_connect(&output(255, "", "Connection refused")).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.message, "Connection refused");

        let err = classify_connect(&output(1, "", "")).unwrap_err();
        assert!(!err.is_retryable());
        assert!(classify_connect(&output(0, "", "")).is_ok());
    }

    #[test]
    fn test_revision_mismatch_is_reported() {
        let err = host()
            .classify_deploy("nginx", &output(REPOSITORY_DIFFERENT, "fff000\n", ""))
            .unwrap_err();
        match err {
            DeployError::RepositoryDifferent {
                expected, found, ..
            } => {
                assert_eq!(expected, "abc123");
                assert_eq!(found, "fff000");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_remote_failure_carries_stderr() {
        let err = host()
            .classify_deploy("nginx", &output(1, "", "disk full\n"))
            .unwrap_err();
        assert!(
            matches!(err, DeployError::Failed { message, .. } if message == "disk full")
        );
    }
}
