use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rigger")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Deploy components to many hosts in dependency order", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Deployment repository holding environments/ and secrets/
    #[arg(short = 'C', long, global = true, env = "RIGGER_BASE", default_value = ".")]
    pub base: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Configure an environment and deploy it to its hosts
    Deploy(DeployArgs),

    /// Configure an environment without connecting to any host
    Check {
        /// Environment name (environments/<name>.toml)
        environment: String,
    },

    /// Show the deployment order of an environment
    Graph {
        /// Environment name (environments/<name>.toml)
        environment: String,

        /// Print the dependency graph in DOT format
        #[arg(long)]
        dot: bool,
    },

    /// Deploy one component of one host locally (invoked over ssh)
    #[command(hide = true)]
    ApplyComponent(ApplyComponentArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct DeployArgs {
    /// Environment name (environments/<name>.toml)
    pub environment: String,

    /// Number of parallel deployment jobs (defaults to the environment's setting)
    #[arg(short, long, env = "RIGGER_JOBS")]
    pub jobs: Option<usize>,

    /// Only report what would change
    #[arg(short = 'P', long)]
    pub predict_only: bool,

    /// Stop after configuration; do not connect to hosts
    #[arg(short, long)]
    pub consistency_only: bool,

    /// Seconds a host may take to become reachable
    #[arg(short, long)]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct ApplyComponentArgs {
    /// Environment name
    #[arg(long)]
    pub environment: String,

    /// Host to deploy as
    #[arg(long)]
    pub host: String,

    /// Expected revision of the environment file
    #[arg(long)]
    pub revision: Option<String>,

    /// Only report what would change
    #[arg(long)]
    pub predict_only: bool,

    /// Component to deploy
    pub component: String,
}
