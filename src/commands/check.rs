use anyhow::Result;

use crate::Context;
use crate::ui;

pub fn run(ctx: &Context, environment: &str) -> Result<()> {
    let (loaded, convergence) = super::configure(ctx, environment)?;
    if ctx.quiet {
        return Ok(());
    }

    let env = &loaded.environment;
    let ignored_hosts = env.hosts().iter().filter(|h| h.ignore).count();
    let ignored_roots = env.roots().iter().filter(|r| r.is_ignored()).count();

    ui::header(&format!("Environment {environment}"));
    ui::kv("revision", &loaded.revision);
    ui::kv(
        "hosts",
        &format!("{} ({ignored_hosts} ignored)", env.hosts().len()),
    );
    ui::kv(
        "components",
        &format!("{} ({ignored_roots} ignored)", env.roots().len()),
    );
    ui::kv("passes", &convergence.passes.to_string());
    println!();
    ui::success("Configuration is consistent");
    Ok(())
}
