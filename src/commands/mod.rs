pub mod apply_component;
pub mod check;
pub mod deploy;
pub mod graph;

use anyhow::Result;
use colored::Colorize;
use converge::{ConfigError, Convergence, DeployError};
use std::process::ExitCode;

use crate::Context;
use crate::components;
use crate::config::{self, LoadedEnvironment};
use crate::hosts::REPOSITORY_DIFFERENT;
use crate::ui;

/// Load environment `name` and converge its configuration.
pub fn configure(ctx: &Context, name: &str) -> Result<(LoadedEnvironment, Convergence)> {
    let mut loaded = config::load(&ctx.base_dir, name, &components::catalog())?;
    let convergence = loaded
        .environment
        .configure()
        .map_err(converge::Error::configuration)?;
    Ok((loaded, convergence))
}

/// Print a failed run's error and pick the exit status.
pub fn report(ctx: &Context, err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<converge::Error>() {
        Some(converge::Error::Configuration(errors)) => {
            ui::error(&err.to_string());
            for error in errors {
                print_config_error(ctx, error);
            }
            ExitCode::FAILURE
        }
        Some(converge::Error::Deployment(errors)) => {
            ui::error(&err.to_string());
            for error in errors {
                eprintln!("  {} {error}", "✗".red());
            }
            match errors.as_slice() {
                [DeployError::RepositoryDifferent { .. }] => exit_code(REPOSITORY_DIFFERENT),
                _ => ExitCode::FAILURE,
            }
        }
        _ => {
            ui::error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

fn print_config_error(ctx: &Context, error: &ConfigError) {
    let mut lines = error.to_string();
    if error.is_possible_bug() {
        lines.push_str(&format!(" {}", "(possibly a bug)".yellow()));
    }
    for (i, line) in lines.lines().enumerate() {
        if i == 0 {
            eprintln!("  {} {line}", "✗".red());
        } else {
            eprintln!("    {line}");
        }
    }
    if let ConfigError::UnknownComponent { trace, .. } = error
        && ctx.verbose > 0
    {
        for cause in trace {
            ui::dim_err(&format!("  caused by: {cause}"));
        }
    }
}

fn exit_code(status: i32) -> ExitCode {
    u8::try_from(status).map_or(ExitCode::FAILURE, ExitCode::from)
}
