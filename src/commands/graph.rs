use anyhow::Result;
use colored::Colorize;
use converge::{Graph, RootKey};
use std::collections::BTreeSet;
use std::fmt::Write;

use crate::Context;
use crate::ui;

pub fn run(ctx: &Context, environment: &str, dot: bool) -> Result<()> {
    let (loaded, convergence) = super::configure(ctx, environment)?;
    let ignored: BTreeSet<&RootKey> = loaded
        .environment
        .roots()
        .iter()
        .filter(|r| r.is_ignored())
        .map(|r| r.key())
        .collect();

    if dot {
        print!("{}", render_dot(environment, &convergence.graph, &ignored));
        return Ok(());
    }

    ui::header(&format!("Deployment order of {environment}"));
    let total = convergence.order.len();
    for (i, key) in convergence.order.iter().enumerate() {
        let label = if ignored.contains(&key) {
            format!("{key} {}", "(ignored)".dimmed())
        } else {
            key.to_string()
        };
        ui::step(i + 1, total, &label);
    }
    Ok(())
}

/// Render `root -> dependency` edges in DOT format.
fn render_dot(environment: &str, graph: &Graph<RootKey>, ignored: &BTreeSet<&RootKey>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph \"{environment}\" {{");
    for (root, dependencies) in graph {
        if ignored.contains(&root) {
            let _ = writeln!(out, "  \"{root}\" [style=dashed];");
        } else {
            let _ = writeln!(out, "  \"{root}\";");
        }
        for dependency in dependencies {
            let _ = writeln!(out, "  \"{root}\" -> \"{dependency}\";");
        }
    }
    out.push_str("}\n");
    out
}
