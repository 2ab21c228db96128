use anyhow::Result;
use converge::{DeployOptions, RunLock, connect_all, disconnect_all, run_deployment};
use std::time::Duration;

use crate::Context;
use crate::cli::DeployArgs;
use crate::config::LoadedEnvironment;
use crate::hosts;
use crate::progress::DeployProgress;
use crate::ui;

pub fn run(ctx: &Context, args: &DeployArgs) -> Result<()> {
    let _lock = RunLock::acquire_in(&ctx.base_dir)?;

    let (loaded, convergence) = super::configure(ctx, &args.environment)?;
    let LoadedEnvironment {
        environment,
        revision,
    } = loaded;
    if !ctx.quiet {
        ui::success(&format!(
            "Configured {} component(s) in {} pass(es)",
            environment.roots().len(),
            convergence.passes
        ));
    }
    if args.consistency_only {
        return Ok(());
    }

    let settings = environment.settings();
    let options = DeployOptions::default()
        .with_jobs(args.jobs.unwrap_or(settings.jobs))
        .with_predict_only(args.predict_only)
        .with_connect_timeout(args.timeout.or(settings.timeout).map(Duration::from_secs));

    let plan = environment.deployment_plan(&convergence);
    if let Some(reference) = environment.reference_host() {
        log::debug!("deployment order taken from {}", reference.name);
    }
    let hosts = hosts::build_hosts(environment, &revision);

    if !ctx.quiet {
        if args.predict_only {
            ui::warn("Predict-only run: nothing will be changed");
        }
        ui::info(&format!("Connecting to {} host(s)", hosts.len()));
    }
    connect_all(&hosts, &options)?;

    let mut progress = DeployProgress::new(ctx.quiet);
    let result = run_deployment(plan, &hosts, &options, &mut progress);
    disconnect_all(&hosts);
    let summary = result?;

    if !ctx.quiet {
        let verb = if args.predict_only { "Checked" } else { "Deployed" };
        ui::success(&format!(
            "{verb} {} component(s), {} skipped",
            summary.deployed.len(),
            summary.ignored.len()
        ));
    }
    Ok(())
}
