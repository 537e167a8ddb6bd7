//! `asgipack launch`: in-process init supervisor for the ASGI server
//!
//! Used as the container entrypoint when no OS-level init (tini, dumb-init) is
//! installed. Resolves `HOST`/`PORT`, starts the server, relays signals, reaps
//! zombies and exits with the server's status.

mod command;
mod env;
mod supervisor;

pub use command::LaunchCommand;
pub use env::{LaunchEnv, LaunchError};
pub use supervisor::{is_terminating, supervise, ExitOutcome, SupervisorOptions};

/// Runs the supervisor on a single-threaded runtime until the child exits
pub fn run(
    command: &LaunchCommand,
    env: &LaunchEnv,
    options: &SupervisorOptions,
) -> Result<ExitOutcome, LaunchError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(LaunchError::Runtime)?;
    runtime.block_on(supervise(command, env, options))
}
