//! # Converge
//!
//! Provide/require resolution and dependency-ordered deployment scheduling
//! for multi-host environments.
//!
//! Components are assigned to hosts as root components. While configuring,
//! they publish values other components need and consume values published by
//! others. Nobody declares the order up front: the engine configures
//! components repeatedly until the published values stop changing, derives the
//! dependency graph from who consumed what, and the scheduler then deploys
//! every `(host, component)` pair once everything it depends on is done.
//!
//! ## Core Concepts
//!
//! - **Component**: Unit of deployment work with a `configure -> verify -> update` lifecycle
//! - **RootComponent**: A component kind bound to a host under a name; the unit of scheduling
//! - **ResourceRegistry**: Provide/require store recording who depends on whom
//! - **Engine**: Fixed-point configuration producing a topological order
//! - **Scheduler**: Dispatches deployment tasks to a bounded worker pool
//!
//! ## Example
//!
//! ```ignore
//! use converge::{Catalog, Environment, DeployOptions, NoProgress, connect_all, run_deployment};
//!
//! let mut env = Environment::from_file("production", base_dir, file, &catalog)
//!     .map_err(converge::Error::configuration)?;
//! let convergence = env.configure().map_err(converge::Error::configuration)?;
//!
//! connect_all(&hosts, &options)?;
//! let summary = run_deployment(env.deployment_plan(&convergence), &hosts, &options, &mut NoProgress);
//! converge::disconnect_all(&hosts);
//! ```
//!
//! ## Provider Traits
//!
//! - [`Host`]: Connects to and deploys on one target
//! - [`ProgressCallback`]: Receives scheduler progress updates
//! - [`Component`]: Implemented by every component kind

pub mod component;
pub mod connect;
pub mod engine;
pub mod environment;
pub mod error;
pub mod graph;
pub mod host;
pub mod lock;
pub mod registry;
pub mod retry;
pub mod root;
pub mod scheduler;
pub mod types;

// Re-export main types at crate root
pub use component::{Component, ComponentNode, ConfigureContext, DeployContext, LifecycleState, Verify};
pub use connect::{HostMap, connect_all, disconnect_all};
pub use engine::{Convergence, run_configuration};
pub use environment::{
    ComponentConfig, Environment, EnvironmentFile, HostConfig, HostSpec, SecretsFile, Settings,
    Transport,
};
pub use error::{ConfigError, ConnectError, DeployError, Error, Result, SortKey};
pub use graph::{CycleError, Graph, remove_nodes_without_outgoing_edges, reverse, topological_sort};
pub use host::{Host, NoProgress, ProgressCallback};
pub use lock::RunLock;
pub use registry::{Require, ResourceMap, ResourceRegistry, ResourceValue, Subscription};
pub use retry::{RetryConfig, with_retry};
pub use root::{Catalog, ComponentKind, Configurable, Overrides, RootComponent, RootKey};
pub use scheduler::{DeploymentPlan, TaskEntry, TaskKey, run_deployment};
pub use types::{DeployOptions, DeploySummary, TaskOutcome};
