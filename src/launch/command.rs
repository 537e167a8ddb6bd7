use super::env::{LaunchEnv, LaunchError};
use std::os::unix::process::CommandExt;
use std::process::Command;

/// Program and arguments of the supervised child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchCommand {
    /// `<server> <app> --host <host> --port <port> [extra...]`
    pub fn server(server: &str, app: &str, env: &LaunchEnv, extra: &[String]) -> Self {
        let mut args = vec![
            app.to_string(),
            "--host".to_string(),
            env.host.clone(),
            "--port".to_string(),
            env.port.to_string(),
        ];
        args.extend(extra.iter().cloned());
        Self {
            program: server.to_string(),
            args,
        }
    }

    /// Arbitrary argv, as given after `--`
    pub fn explicit(mut argv: Vec<String>) -> Result<Self, LaunchError> {
        if argv.is_empty() || argv[0].is_empty() {
            return Err(LaunchError::EmptyCommand);
        }
        let program = argv.remove(0);
        Ok(Self {
            program,
            args: argv,
        })
    }

    /// Process builder with `HOST`/`PORT` exported; `own_group` puts the child in a new
    /// process group led by itself
    pub fn to_command(&self, env: &LaunchEnv, own_group: bool) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).envs(env.exports());
        if own_group {
            command.process_group(0);
        }
        command
    }
}

impl std::fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
