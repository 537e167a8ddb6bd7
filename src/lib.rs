//! asgipack - container build planner and init supervisor for Python ASGI services
//!
//! This library turns a Python ASGI project into a reproducible container build and
//! provides the pieces needed to run it correctly as PID 1.
//!
//! # Core Concepts
//!
//! - **Manifest**: the declared dependency set (`pyproject.toml` with `uv.lock` or
//!   `poetry.lock`, or `requirements.txt`) and the resolver that installs it
//! - **Build Plan**: three ordered phases (base, dependencies, runtime) where only the
//!   manifest and lock are copied before the frozen install, so source edits reuse the
//!   dependency layer
//! - **Lint**: static checks for hand-written Dockerfiles (cache-busting copies,
//!   missing init, hardcoded ports, root runtime)
//! - **Launch**: an in-process init supervisor that forwards signals, reaps zombies and
//!   enforces a shutdown grace period
//!
//! # Example Usage
//!
//! ```no_run
//! use asgipack::fs::RealFileSystem;
//! use asgipack::{manifest, AsgipackConfig, PlanBuilder};
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let project = Path::new("./rsvp-service");
//! let config = AsgipackConfig::load(project, None)?;
//! let manifest = manifest::detect(&RealFileSystem::new(), project, config.dependencies.resolver)?;
//! let plan = PlanBuilder::new(&config, &manifest).build()?;
//! println!("{}", plan.to_dockerfile());
//! # Ok(())
//! # }
//! ```
//!
//! # Project Structure
//!
//! - [`manifest`]: resolver detection and frozen-lock verification
//! - [`plan`]: build plan construction and structural validation
//! - [`dockerfile`]: Dockerfile model, parser and renderer
//! - [`lint`]: Dockerfile lint rules
//! - [`launch`]: init supervisor for the ASGI server

pub mod cli;
pub mod config;
pub mod dockerfile;
pub mod fs;
pub mod knobs;
pub mod launch;
pub mod lint;
pub mod manifest;
pub mod plan;
pub mod util;

pub use config::{AsgipackConfig, ConfigError};
pub use launch::{LaunchEnv, LaunchError};
pub use lint::{LintReport, Linter};
pub use plan::{BuildPlan, PlanBuilder};
pub use util::{init_from_args, init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
