use crate::knobs::{Isolation, Resolver, Supervisor};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Build planner, linter and init supervisor for containerized Python ASGI services
#[derive(Parser, Debug)]
#[command(
    name = "asgipack",
    about = "Build planner, linter and init supervisor for containerized Python ASGI services",
    version,
    author,
    long_about = "asgipack turns a Python ASGI project into a reproducible container build: \
                  it detects the dependency manifest, verifies the lock, plans a cache-friendly \
                  Dockerfile with a non-root runtime and an init supervisor, lints existing \
                  Dockerfiles, and can itself act as the container's init process."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Plan a container build for a project",
        long_about = "Detects the resolver, reads the manifest and emits a three-phase build \
                      plan (base, dependencies, runtime).\n\n\
                      Examples:\n  \
                      asgipack plan\n  \
                      asgipack plan ./service -f dockerfile -o Dockerfile\n  \
                      asgipack plan --resolver pip --isolation system --supervisor dumb-init"
    )]
    Plan(PlanArgs),

    #[command(
        about = "Check that a frozen dependency install would succeed",
        long_about = "Verifies the lock file against the manifest (uv, poetry) or that every \
                      requirement is pinned (pip). Exits 1 when a frozen install would fail.\n\n\
                      Examples:\n  \
                      asgipack lock-check\n  \
                      asgipack lock-check ./service -f json"
    )]
    LockCheck(LockCheckArgs),

    #[command(
        about = "Lint a Dockerfile for ASGI service pitfalls",
        long_about = "Reports cache-busting source copies, missing init supervisors, hardcoded \
                      ports, root runtime users and related issues. Exits 1 on any error, or \
                      on any warning with --strict.\n\n\
                      Examples:\n  \
                      asgipack lint Dockerfile\n  \
                      asgipack lint Dockerfile --strict -f json"
    )]
    Lint(LintArgs),

    #[command(
        about = "Run the ASGI server under a minimal init supervisor",
        long_about = "Resolves HOST and PORT, starts the server, forwards signals, reaps \
                      zombies and exits with the server's status.\n\n\
                      Examples:\n  \
                      asgipack launch --app main:app\n  \
                      asgipack launch --grace-period 20 -- gunicorn -k uvicorn.workers.UvicornWorker main:app"
    )]
    Launch(LaunchArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    #[arg(value_name = "PATH", help = "Project directory (defaults to current directory)")]
    pub project_path: Option<PathBuf>,

    #[arg(short = 'f', long, value_enum, default_value = "human", help = "Output format")]
    pub format: OutputFormatArg,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write output to file instead of stdout"
    )]
    pub output: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Configuration file (default: <PATH>/asgipack.toml)")]
    pub config: Option<PathBuf>,

    #[arg(long, value_parser = parse_knob::<Resolver>, help = "Force a resolver (uv, poetry, pip)")]
    pub resolver: Option<Resolver>,

    #[arg(long, value_parser = parse_knob::<Isolation>, help = "Install target (venv, system)")]
    pub isolation: Option<Isolation>,

    #[arg(long, value_parser = parse_knob::<Supervisor>, help = "Init supervisor (tini, dumb-init, none)")]
    pub supervisor: Option<Supervisor>,

    #[arg(long, help = "Keep the runtime user as root")]
    pub no_privilege_drop: bool,

    #[arg(long, value_name = "IMAGE", help = "Base image (default: python:<version>-slim)")]
    pub base_image: Option<String>,

    #[arg(long, value_name = "MODULE:ATTR", help = "ASGI application import path")]
    pub app: Option<String>,

    #[arg(long, value_name = "PORT", help = "Default port baked into the image")]
    pub port: Option<u16>,
}

#[derive(Parser, Debug, Clone)]
pub struct LockCheckArgs {
    #[arg(value_name = "PATH", help = "Project directory (defaults to current directory)")]
    pub project_path: Option<PathBuf>,

    #[arg(short = 'f', long, value_enum, default_value = "human", help = "Output format")]
    pub format: OutputFormatArg,

    #[arg(long, value_parser = parse_knob::<Resolver>, help = "Force a resolver (uv, poetry, pip)")]
    pub resolver: Option<Resolver>,
}

#[derive(Parser, Debug, Clone)]
pub struct LintArgs {
    #[arg(value_name = "DOCKERFILE", help = "Dockerfile to lint")]
    pub dockerfile: PathBuf,

    #[arg(short = 'f', long, value_enum, default_value = "human", help = "Output format")]
    pub format: OutputFormatArg,

    #[arg(long, help = "Fail on warnings as well as errors")]
    pub strict: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct LaunchArgs {
    #[arg(long, value_name = "MODULE:ATTR", help = "ASGI application import path")]
    pub app: Option<String>,

    #[arg(long, value_name = "PROGRAM", help = "ASGI server executable (default: uvicorn)")]
    pub server: Option<String>,

    #[arg(
        long,
        value_name = "SECONDS",
        help = "Seconds between the shutdown signal and SIGKILL (default: 10)"
    )]
    pub grace_period: Option<u64>,

    #[arg(long, help = "Run the server in its own process group and signal the whole group")]
    pub process_group: bool,

    #[arg(
        long,
        value_name = "NAME",
        help = "Env var holding the credential file path (default: GOOGLE_APPLICATION_CREDENTIALS)"
    )]
    pub credentials_env: Option<String>,

    #[arg(long, value_name = "FILE", help = "Configuration file for runtime defaults")]
    pub config: Option<PathBuf>,

    #[arg(
        last = true,
        value_name = "COMMAND",
        help = "Command to run instead of the server (after --)"
    )]
    pub command: Vec<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
    Dockerfile,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
            OutputFormatArg::Dockerfile => super::output::OutputFormat::Dockerfile,
        }
    }
}

fn parse_knob<T>(s: &str) -> Result<T, String>
where
    T: std::str::FromStr<Err = String>,
{
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_args_verify() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_default_plan_args() {
        let args = CliArgs::parse_from(["asgipack", "plan"]);
        match args.command {
            Commands::Plan(plan_args) => {
                assert_eq!(plan_args.format, OutputFormatArg::Human);
                assert!(plan_args.project_path.is_none());
                assert!(plan_args.resolver.is_none());
                assert!(!plan_args.no_privilege_drop);
            }
            _ => panic!("Expected Plan command"),
        }
    }

    #[test]
    fn test_plan_with_options() {
        let args = CliArgs::parse_from([
            "asgipack",
            "plan",
            "/srv/rsvp",
            "-f",
            "dockerfile",
            "--resolver",
            "requirements",
            "--isolation",
            "system",
            "--supervisor",
            "dumb-init",
            "--no-privilege-drop",
            "--port",
            "9000",
        ]);
        match args.command {
            Commands::Plan(plan_args) => {
                assert_eq!(plan_args.project_path, Some(PathBuf::from("/srv/rsvp")));
                assert_eq!(plan_args.format, OutputFormatArg::Dockerfile);
                assert_eq!(plan_args.resolver, Some(Resolver::Pip));
                assert_eq!(plan_args.isolation, Some(Isolation::System));
                assert_eq!(plan_args.supervisor, Some(Supervisor::DumbInit));
                assert!(plan_args.no_privilege_drop);
                assert_eq!(plan_args.port, Some(9000));
            }
            _ => panic!("Expected Plan command"),
        }
    }

    #[test]
    fn test_invalid_resolver_rejected() {
        let result = CliArgs::try_parse_from(["asgipack", "plan", "--resolver", "conda"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_lint_args() {
        let args = CliArgs::parse_from(["asgipack", "lint", "Dockerfile", "--strict"]);
        match args.command {
            Commands::Lint(lint_args) => {
                assert_eq!(lint_args.dockerfile, PathBuf::from("Dockerfile"));
                assert!(lint_args.strict);
            }
            _ => panic!("Expected Lint command"),
        }
    }

    #[test]
    fn test_lint_requires_path() {
        assert!(CliArgs::try_parse_from(["asgipack", "lint"]).is_err());
    }

    #[test]
    fn test_launch_with_trailing_command() {
        let args = CliArgs::parse_from([
            "asgipack",
            "launch",
            "--grace-period",
            "3",
            "--process-group",
            "--",
            "gunicorn",
            "-k",
            "uvicorn.workers.UvicornWorker",
        ]);
        match args.command {
            Commands::Launch(launch_args) => {
                assert_eq!(launch_args.grace_period, Some(3));
                assert!(launch_args.process_group);
                assert_eq!(
                    launch_args.command,
                    vec!["gunicorn", "-k", "uvicorn.workers.UvicornWorker"]
                );
            }
            _ => panic!("Expected Launch command"),
        }
    }

    #[test]
    fn test_lock_check_command() {
        let args = CliArgs::parse_from(["asgipack", "lock-check", "-f", "json"]);
        match args.command {
            Commands::LockCheck(lock_args) => {
                assert_eq!(lock_args.format, OutputFormatArg::Json);
                assert!(lock_args.project_path.is_none());
            }
            _ => panic!("Expected LockCheck command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let args = CliArgs::parse_from(["asgipack", "-v", "lock-check"]);
        assert!(args.verbose);
        assert!(!args.quiet);

        let args = CliArgs::parse_from(["asgipack", "--log-level", "debug", "plan"]);
        assert_eq!(args.log_level, Some("debug".to_string()));

        assert!(CliArgs::try_parse_from(["asgipack", "-v", "-q", "plan"]).is_err());
    }
}
