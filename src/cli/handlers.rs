//! Subcommand handlers; each returns the process exit code

use super::commands::{LaunchArgs, LintArgs, LockCheckArgs, PlanArgs};
use super::output::{OutputFormat, OutputFormatter};
use crate::config::AsgipackConfig;
use crate::fs::RealFileSystem;
use crate::launch::{self, LaunchCommand, LaunchEnv, SupervisorOptions};
use crate::lint::Linter;
use crate::manifest::{self, LockError};
use crate::plan::{BuildPlan, PlanBuilder};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

pub fn handle_plan(args: &PlanArgs, quiet: bool) -> i32 {
    match run_plan(args, quiet) {
        Ok(()) => 0,
        Err(e) => {
            error!("Planning failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

fn run_plan(args: &PlanArgs, quiet: bool) -> Result<()> {
    let project_dir = project_dir(args.project_path.as_deref())?;
    info!("Planning build for {}", project_dir.display());

    let mut config = AsgipackConfig::load(&project_dir, args.config.as_deref())
        .context("Failed to load configuration")?;
    apply_plan_overrides(&mut config, args);

    let effective = OutputFormatter::new(OutputFormat::Human)
        .format_config(&config.to_display_map())?;
    debug!("Effective configuration:\n{}", effective);

    let fs = RealFileSystem::new();
    let manifest = manifest::detect(&fs, &project_dir, config.dependencies.resolver)
        .context("Failed to read the dependency manifest")?;
    let plan = PlanBuilder::new(&config, &manifest).build()?;

    let output = OutputFormatter::new(args.format.into()).format_plan(&plan)?;
    write_output(&output, args.output.as_deref())?;
    if !quiet {
        report_written(&plan, args.output.as_deref());
    }
    Ok(())
}

fn apply_plan_overrides(config: &mut AsgipackConfig, args: &PlanArgs) {
    if let Some(resolver) = args.resolver {
        config.dependencies.resolver = Some(resolver);
    }
    if let Some(isolation) = args.isolation {
        config.dependencies.isolation = isolation;
    }
    if let Some(supervisor) = args.supervisor {
        config.runtime.supervisor = supervisor;
    }
    if args.no_privilege_drop {
        config.runtime.privilege_drop = false;
    }
    if let Some(ref base) = args.base_image {
        config.image.base = Some(base.clone());
    }
    if let Some(ref app) = args.app {
        config.runtime.app = app.clone();
    }
    if let Some(port) = args.port {
        config.runtime.port = port;
    }
}

fn report_written(plan: &BuildPlan, output: Option<&Path>) {
    if let Some(path) = output {
        eprintln!(
            "Wrote {} plan ({} warnings) to {}",
            plan.metadata.resolver,
            plan.warnings.len(),
            path.display()
        );
    }
}

pub fn handle_lock_check(args: &LockCheckArgs) -> i32 {
    match run_lock_check(args) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            error!("Lock check failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

fn run_lock_check(args: &LockCheckArgs) -> Result<bool> {
    let project_dir = project_dir(args.project_path.as_deref())?;
    let config =
        AsgipackConfig::load(&project_dir, None).context("Failed to load configuration")?;
    let forced = args.resolver.or(config.dependencies.resolver);

    let fs = RealFileSystem::new();
    let result = manifest::detect(&fs, &project_dir, forced)
        .map_err(LockError::from)
        .and_then(|m| manifest::verify_frozen(&fs, &m));

    match result {
        Ok(ref report) => info!(
            "Frozen {} install would succeed ({} declared)",
            report.resolver, report.declared
        ),
        Err(ref e) => error!("{}", e),
    }

    let output = OutputFormatter::new(args.format.into()).format_lock_check(&result)?;
    print!("{}", with_newline(output));
    Ok(result.is_ok())
}

pub fn handle_lint(args: &LintArgs) -> i32 {
    match run_lint(args) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            error!("Lint failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

fn run_lint(args: &LintArgs) -> Result<bool> {
    let content = std::fs::read_to_string(&args.dockerfile)
        .with_context(|| format!("Failed to read {}", args.dockerfile.display()))?;
    let mut report = Linter::default()
        .lint(&content)
        .with_context(|| format!("Failed to parse {}", args.dockerfile.display()))?;
    report.path = Some(args.dockerfile.display().to_string());
    debug!("{} findings", report.findings.len());

    let output = OutputFormatter::new(args.format.into()).format_lint(&report)?;
    print!("{}", with_newline(output));
    Ok(!report.is_failure(args.strict))
}

pub fn handle_launch(args: &LaunchArgs) -> i32 {
    let config = match launch_config(args) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            return 1;
        }
    };

    let result = LaunchEnv::from_process_env(&config.runtime).and_then(|env| {
        let command = if args.command.is_empty() {
            LaunchCommand::server(&config.runtime.server, &config.runtime.app, &env, &[])
        } else {
            LaunchCommand::explicit(args.command.clone())?
        };
        let options = SupervisorOptions {
            grace_period: Duration::from_secs(config.runtime.grace_period_secs),
            process_group: args.process_group,
        };
        launch::run(&command, &env, &options)
    });

    match result {
        Ok(outcome) => outcome.code,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn launch_config(args: &LaunchArgs) -> Result<AsgipackConfig> {
    let cwd = std::env::current_dir().context("Failed to read the working directory")?;
    let mut config =
        AsgipackConfig::load(&cwd, args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(ref app) = args.app {
        config.runtime.app = app.clone();
    }
    if let Some(ref server) = args.server {
        config.runtime.server = server.clone();
    }
    if let Some(ref var) = args.credentials_env {
        config.runtime.credentials_env = var.clone();
    }
    if let Some(secs) = args.grace_period {
        config.runtime.grace_period_secs = secs;
    }
    Ok(config)
}

fn project_dir(path: Option<&Path>) -> Result<PathBuf> {
    let dir = match path {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir().context("Failed to read the working directory")?,
    };
    if !dir.is_dir() {
        anyhow::bail!("{} is not a directory", dir.display());
    }
    Ok(dir)
}

fn write_output(output: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, with_newline(output.to_string()))
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            print!("{}", with_newline(output.to_string()));
            Ok(())
        }
    }
}

fn with_newline(mut s: String) -> String {
    if !s.ends_with('\n') {
        s.push('\n');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::{CliArgs, Commands};
    use crate::knobs::{Isolation, Resolver, Supervisor};
    use clap::Parser;

    fn plan_args(argv: &[&str]) -> PlanArgs {
        let mut full = vec!["asgipack", "plan"];
        full.extend_from_slice(argv);
        match CliArgs::parse_from(full).command {
            Commands::Plan(args) => args,
            _ => panic!("Expected Plan command"),
        }
    }

    #[test]
    fn test_plan_overrides_win_over_config() {
        let mut config = AsgipackConfig::from_toml_str(
            "[dependencies]\nresolver = \"poetry\"\n[runtime]\nport = 9000\n",
        )
        .unwrap();
        let args = plan_args(&[
            "--resolver",
            "uv",
            "--isolation",
            "system",
            "--supervisor",
            "none",
            "--no-privilege-drop",
            "--base-image",
            "python:3.12-slim-bookworm",
            "--app",
            "rsvp.api:app",
            "--port",
            "8000",
        ]);
        apply_plan_overrides(&mut config, &args);

        assert_eq!(config.dependencies.resolver, Some(Resolver::Uv));
        assert_eq!(config.dependencies.isolation, Isolation::System);
        assert_eq!(config.runtime.supervisor, Supervisor::Disabled);
        assert!(!config.runtime.privilege_drop);
        assert_eq!(config.image.base.as_deref(), Some("python:3.12-slim-bookworm"));
        assert_eq!(config.runtime.app, "rsvp.api:app");
        assert_eq!(config.runtime.port, 8000);
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let mut config = AsgipackConfig::from_toml_str("[runtime]\nport = 9000\n").unwrap();
        apply_plan_overrides(&mut config, &plan_args(&[]));
        assert_eq!(config.runtime.port, 9000);
        assert!(config.runtime.privilege_drop);
    }

    #[test]
    fn test_project_dir_must_exist() {
        assert!(project_dir(Some(Path::new("/nonexistent/asgipack/project"))).is_err());
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(project_dir(Some(dir.path())).unwrap(), dir.path());
    }

    #[test]
    fn test_write_output_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Dockerfile");
        write_output("FROM python:3.11-slim", Some(&path)).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "FROM python:3.11-slim\n"
        );
    }

    #[test]
    fn test_with_newline() {
        assert_eq!(with_newline("a".to_string()), "a\n");
        assert_eq!(with_newline("a\n".to_string()), "a\n");
    }
}
