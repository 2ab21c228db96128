use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Command, Output, Stdio};

/// Run a command and capture its output
pub fn output(cmd: &str, args: &[&str]) -> Result<Output> {
    Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))
}

/// Run a shell snippet through `sh -c`, capturing output
pub fn shell(script: &str, cwd: Option<&Path>) -> Result<Output> {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script).stdin(Stdio::null());
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    command
        .output()
        .with_context(|| format!("Failed to execute: sh -c {script}"))
}

/// Run a shell snippet and fail unless it exits successfully
pub fn shell_checked(script: &str, cwd: Option<&Path>) -> Result<String> {
    let output = shell(script, cwd)?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "Command `{script}` failed ({}): {}",
            output.status,
            stderr.trim()
        )
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_shell_checked_captures_stdout() {
        assert_eq!(shell_checked("echo hello", None).unwrap(), "hello");
    }

    #[test]
    fn test_shell_checked_reports_stderr() {
        let err = shell_checked("echo broken >&2; exit 4", None).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_shell_runs_in_cwd() {
        let temp_dir = TempDir::new().unwrap();
        let out = shell_checked("pwd", Some(temp_dir.path())).unwrap();
        assert_eq!(
            Path::new(&out).canonicalize().unwrap(),
            temp_dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_output_captures_exit_status() {
        let out = output("sh", &["-c", "exit 7"]).unwrap();
        assert_eq!(out.status.code(), Some(7));
    }
}
