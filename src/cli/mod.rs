pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{CliArgs, Commands, LaunchArgs, LintArgs, LockCheckArgs, PlanArgs};
pub use output::{OutputFormat, OutputFormatter};
