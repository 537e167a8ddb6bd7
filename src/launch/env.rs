//! Startup environment of the supervised server

use crate::config::RuntimeConfig;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("PORT must be an integer between 1 and 65535, got '{0}'")]
    InvalidPort(String),

    #[error("HOST cannot be empty")]
    EmptyHost,

    #[error("{var} points to {path:?}, which is not a readable file: {reason}")]
    Credentials {
        var: String,
        path: PathBuf,
        reason: String,
    },

    #[error("No command to launch")]
    EmptyCommand,

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to set up signal handling: {0}")]
    Signals(#[source] io::Error),

    #[error("Failed to start the async runtime: {0}")]
    Runtime(#[source] io::Error),
}

impl LaunchError {
    /// Exit status reported when the launch fails before the server runs
    ///
    /// Follows shell conventions: 127 for a missing program, 126 for one that cannot be
    /// executed, 1 for configuration problems.
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::Spawn { source, .. } if source.kind() == io::ErrorKind::NotFound => 127,
            LaunchError::Spawn { .. } => 126,
            _ => 1,
        }
    }
}

/// Bind address and credential location, resolved once before the server starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchEnv {
    pub host: String,
    pub port: u16,
    /// Credential variable name and the file it points at, when set
    pub credentials: Option<(String, PathBuf)>,
}

impl LaunchEnv {
    /// Resolves `HOST`, `PORT` and the credential variable through `lookup`
    ///
    /// Unset or empty values fall back to the configured defaults. A `PORT` that does not
    /// parse, or parses to zero, is rejected instead of silently replaced.
    pub fn resolve<F>(lookup: F, defaults: &RuntimeConfig) -> Result<Self, LaunchError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let host = non_empty("HOST").unwrap_or_else(|| defaults.host.clone());
        if host.trim().is_empty() {
            return Err(LaunchError::EmptyHost);
        }

        let port = match non_empty("PORT") {
            Some(raw) => match raw.trim().parse::<u16>() {
                Ok(port) if port != 0 => port,
                _ => return Err(LaunchError::InvalidPort(raw)),
            },
            None => defaults.port,
        };
        if port == 0 {
            return Err(LaunchError::InvalidPort("0".to_string()));
        }

        let credentials = match non_empty(&defaults.credentials_env) {
            Some(path) => {
                let path = PathBuf::from(path);
                check_readable(&defaults.credentials_env, &path)?;
                Some((defaults.credentials_env.clone(), path))
            }
            None => None,
        };

        Ok(Self {
            host,
            port,
            credentials,
        })
    }

    pub fn from_process_env(defaults: &RuntimeConfig) -> Result<Self, LaunchError> {
        Self::resolve(|name| std::env::var(name).ok(), defaults)
    }

    /// Variables exported to the child process
    pub fn exports(&self) -> Vec<(String, String)> {
        vec![
            ("HOST".to_string(), self.host.clone()),
            ("PORT".to_string(), self.port.to_string()),
        ]
    }
}

fn check_readable(var: &str, path: &Path) -> Result<(), LaunchError> {
    let fail = |reason: String| LaunchError::Credentials {
        var: var.to_string(),
        path: path.to_path_buf(),
        reason,
    };
    let file = File::open(path).map_err(|e| fail(e.to_string()))?;
    let metadata = file.metadata().map_err(|e| fail(e.to_string()))?;
    if !metadata.is_file() {
        return Err(fail("not a regular file".to_string()));
    }
    Ok(())
}
