mod cli;
mod commands;
mod components;
mod config;
mod hosts;
mod progress;
mod runner;
mod ui;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Directory holding `environments/` and `secrets/`
    pub base_dir: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        base_dir: config::expand_path(&cli.base.to_string_lossy()),
    };

    let result = match cli.command {
        Command::Deploy(args) => commands::deploy::run(&ctx, &args),
        Command::Check { environment } => commands::check::run(&ctx, &environment),
        Command::Graph { environment, dot } => commands::graph::run(&ctx, &environment, dot),
        Command::ApplyComponent(args) => commands::apply_component::run(&ctx, &args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "rigger", &mut io::stdout());
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => commands::report(&ctx, &e),
    }
}
