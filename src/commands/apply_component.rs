//! Remote entry point: deploy one component of one host in this process.

use anyhow::{Result, bail};
use converge::DeployError;

use crate::Context;
use crate::cli::ApplyComponentArgs;
use crate::components;
use crate::config;
use crate::ui;

pub fn run(ctx: &Context, args: &ApplyComponentArgs) -> Result<()> {
    let mut loaded = config::load(&ctx.base_dir, &args.environment, &components::catalog())?;

    if let Some(expected) = &args.revision
        && *expected != loaded.revision
    {
        // the controller reads our revision from the last line of stdout
        println!("{}", loaded.revision);
        return Err(converge::Error::deployment(vec![DeployError::RepositoryDifferent {
            host: args.host.clone(),
            expected: expected.clone(),
            found: loaded.revision,
        }])
        .into());
    }

    loaded
        .environment
        .configure()
        .map_err(converge::Error::configuration)?;

    let environment = loaded.environment.name().to_string();
    let Some(root) = loaded
        .environment
        .roots_mut()
        .iter_mut()
        .find(|r| r.name() == args.component && r.host() == args.host)
    else {
        bail!(
            "component `{}` is not assigned to host `{}`",
            args.component,
            args.host
        );
    };

    let changed = root.deploy(&environment, args.predict_only)?;
    if !ctx.quiet {
        match (changed, args.predict_only) {
            (false, _) => ui::success(&format!("{} is up to date", root.key())),
            (true, true) => ui::info(&format!("{} would change", root.key())),
            (true, false) => ui::success(&format!("{} updated", root.key())),
        }
    }
    Ok(())
}
