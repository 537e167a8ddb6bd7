//! Structured logging setup for asgipack
//!
//! Logs always go to stderr so that plans, reports and Dockerfiles printed on stdout
//! can be piped. Level selection, in priority order:
//!
//! 1. `RUST_LOG` (full `EnvFilter` syntax, overrides everything)
//! 2. `--log-level`, then `-v` (debug) / `-q` (error)
//! 3. `ASGIPACK_LOG_LEVEL`
//! 4. `info`
//!
//! `ASGIPACK_LOG_JSON=true` switches to JSON lines, which is what log collectors expect
//! when `asgipack launch` runs as a container entrypoint.
//!
//! # Example
//!
//! ```no_run
//! use asgipack::util::logging;
//!
//! logging::init_from_env();
//! tracing::info!(port = 8080, "Starting server");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Ensures logging is only initialized once
static INIT: Once = Once::new();

pub const LOG_LEVEL_ENV: &str = "ASGIPACK_LOG_LEVEL";
pub const LOG_JSON_ENV: &str = "ASGIPACK_LOG_JSON";

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level for asgipack's own targets
    pub level: Level,

    /// Emit JSON lines instead of human-readable text
    pub use_json: bool,

    /// Include the module target (e.g., asgipack::launch) in logs
    pub include_target: bool,

    /// Include file and line number information
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// JSON output with source locations, for running inside a container
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            use_json: true,
            include_target: true,
            include_location: true,
        }
    }

    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            use_json: false,
            include_target: true,
            include_location: false,
        }
    }
}

/// Parses a log level from a string, falling back to `INFO`
pub fn parse_level(level_str: &str) -> Level {
    match level_str.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

/// Level implied by the global CLI flags, falling back to `env_level`
pub fn resolve_level(
    log_level: Option<&str>,
    verbose: bool,
    quiet: bool,
    env_level: Option<&str>,
) -> Level {
    match (log_level, verbose, quiet) {
        (Some(level), _, _) => parse_level(level),
        (None, true, _) => Level::DEBUG,
        (None, false, true) => Level::ERROR,
        (None, false, false) => env_level.map(parse_level).unwrap_or(Level::INFO),
    }
}

fn json_from_env() -> bool {
    env::var(LOG_JSON_ENV)
        .ok()
        .and_then(|v| v.trim().to_lowercase().parse::<bool>().ok())
        .unwrap_or(false)
}

/// Initializes the global subscriber; later calls are ignored
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = if env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(format!("warn,asgipack={}", config.level))
        };

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .init();
        }
    });
}

/// Initializes logging from the global CLI flags plus `ASGIPACK_LOG_LEVEL`/`ASGIPACK_LOG_JSON`
pub fn init_from_args(log_level: Option<&str>, verbose: bool, quiet: bool) {
    let env_level = env::var(LOG_LEVEL_ENV).ok();
    init_logging(LoggingConfig {
        level: resolve_level(log_level, verbose, quiet, env_level.as_deref()),
        use_json: json_from_env(),
        ..Default::default()
    });
}

/// Initializes logging from `ASGIPACK_LOG_LEVEL` and `ASGIPACK_LOG_JSON` only
pub fn init_from_env() {
    init_from_args(None, false, false);
}
