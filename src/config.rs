//! Configuration management for asgipack
//!
//! Settings are resolved in layers, each overriding the previous one:
//!
//! 1. Built-in defaults
//! 2. `asgipack.toml` in the project directory (or an explicit `--config` file)
//! 3. `ASGIPACK_*` environment variables
//! 4. Command-line flags (applied by the CLI handlers)
//!
//! # Environment Variables
//!
//! - `ASGIPACK_BASE_IMAGE`: Python base image - default: derived from the project's
//!   Python version, else "python:3.12-slim"
//! - `ASGIPACK_RESOLVER`: Dependency resolver (auto|uv|poetry|pip) - default: "auto"
//! - `ASGIPACK_ISOLATION`: Install target (venv|system) - default: "venv"
//! - `ASGIPACK_SUPERVISOR`: Init process (tini|dumb-init|none) - default: "tini"
//! - `ASGIPACK_PRIVILEGE_DROP`: Run as a non-root user (true|false) - default: "true"
//! - `ASGIPACK_UID`: UID of the runtime user - default: "1000"
//! - `ASGIPACK_APP`: ASGI application import path - default: "main:app"
//! - `ASGIPACK_PORT`: Default listen port baked into the image - default: "8080"
//! - `ASGIPACK_GRACE_PERIOD`: Shutdown grace period in seconds - default: "10"
//!
//! # Example file
//!
//! ```toml
//! [image]
//! base = "python:3.12-slim"
//!
//! [dependencies]
//! resolver = "uv"
//! isolation = "venv"
//!
//! [runtime]
//! supervisor = "tini"
//! privilege_drop = true
//! app = "main:app"
//! credentials_path = "/secrets/service_account.json"
//! ```

use crate::knobs::{Isolation, Resolver, Supervisor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "asgipack.toml";

const DEFAULT_BASE_IMAGE: &str = "python:3.12-slim";
const DEFAULT_WORKDIR: &str = "/app";
const DEFAULT_UV_VERSION: &str = "0.4.20";
const DEFAULT_POETRY_VERSION: &str = "1.8.3";
const DEFAULT_USER: &str = "appuser";
const DEFAULT_UID: u32 = 1000;
const DEFAULT_APP: &str = "main:app";
const DEFAULT_SERVER: &str = "uvicorn";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";
const DEFAULT_GRACE_PERIOD_SECS: u64 = 10;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Failed to parse configuration value
    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Base provisioning knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageConfig {
    /// Pinned Python runtime image; derived from the project's Python version when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    /// Application directory inside the image
    pub workdir: String,
    /// OS packages installed in addition to the toolchain
    pub extra_packages: Vec<String>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            base: None,
            workdir: DEFAULT_WORKDIR.to_string(),
            extra_packages: Vec::new(),
        }
    }
}

/// Dependency resolution knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DependencyConfig {
    /// `None` means detect from the project files
    #[serde(
        deserialize_with = "deserialize_resolver",
        serialize_with = "serialize_resolver"
    )]
    pub resolver: Option<Resolver>,
    pub isolation: Isolation,
    /// Virtual environment location; defaults to `<workdir>/.venv`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venv_path: Option<String>,
    pub uv_version: String,
    pub poetry_version: String,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            resolver: None,
            isolation: Isolation::Venv,
            venv_path: None,
            uv_version: DEFAULT_UV_VERSION.to_string(),
            poetry_version: DEFAULT_POETRY_VERSION.to_string(),
        }
    }
}

/// Runtime assembly and launch knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub supervisor: Supervisor,
    pub privilege_drop: bool,
    pub user: String,
    pub uid: u32,
    /// ASGI application import path (`module:attribute`)
    pub app: String,
    /// ASGI server executable
    pub server: String,
    pub host: String,
    pub port: u16,
    /// Env var that points the application at its mounted credential file
    pub credentials_env: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<String>,
    pub grace_period_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            supervisor: Supervisor::Tini,
            privilege_drop: true,
            user: DEFAULT_USER.to_string(),
            uid: DEFAULT_UID,
            app: DEFAULT_APP.to_string(),
            server: DEFAULT_SERVER.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            credentials_env: DEFAULT_CREDENTIALS_ENV.to_string(),
            credentials_path: None,
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
        }
    }
}

/// Main configuration structure for asgipack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AsgipackConfig {
    pub image: ImageConfig,
    pub dependencies: DependencyConfig,
    pub runtime: RuntimeConfig,
}

fn deserialize_resolver<'de, D>(deserializer: D) -> Result<Option<Resolver>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    match value.as_deref() {
        None | Some("auto") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

fn serialize_resolver<S>(value: &Option<Resolver>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(resolver) => serializer.serialize_str(resolver.as_str()),
        None => serializer.serialize_str("auto"),
    }
}

impl AsgipackConfig {
    /// Loads `asgipack.toml` from the project directory if present, then applies env overrides
    pub fn load(project_dir: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let candidate = project_dir.join(CONFIG_FILE_NAME);
                if candidate.is_file() {
                    Self::from_file(&candidate)?
                } else {
                    debug!("No {} in {:?}, using defaults", CONFIG_FILE_NAME, project_dir);
                    Self::default()
                }
            }
        };
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Applies `ASGIPACK_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base) = lookup("ASGIPACK_BASE_IMAGE") {
            self.image.base = Some(base);
        }
        if let Some(value) = lookup("ASGIPACK_RESOLVER") {
            self.dependencies.resolver = match value.to_lowercase().as_str() {
                "auto" => None,
                other => Some(parse_field("ASGIPACK_RESOLVER", other)?),
            };
        }
        if let Some(value) = lookup("ASGIPACK_ISOLATION") {
            self.dependencies.isolation = parse_field("ASGIPACK_ISOLATION", &value)?;
        }
        if let Some(value) = lookup("ASGIPACK_SUPERVISOR") {
            self.runtime.supervisor = parse_field("ASGIPACK_SUPERVISOR", &value)?;
        }
        if let Some(value) = lookup("ASGIPACK_PRIVILEGE_DROP") {
            self.runtime.privilege_drop = parse_field("ASGIPACK_PRIVILEGE_DROP", &value)?;
        }
        if let Some(value) = lookup("ASGIPACK_UID") {
            self.runtime.uid = parse_field("ASGIPACK_UID", &value)?;
        }
        if let Some(app) = lookup("ASGIPACK_APP") {
            self.runtime.app = app;
        }
        if let Some(value) = lookup("ASGIPACK_PORT") {
            self.runtime.port = parse_field("ASGIPACK_PORT", &value)?;
        }
        if let Some(value) = lookup("ASGIPACK_GRACE_PERIOD") {
            self.runtime.grace_period_secs = parse_field("ASGIPACK_GRACE_PERIOD", &value)?;
        }
        Ok(())
    }

    /// Validates the configuration
    ///
    /// Checks that:
    /// - Base image and workdir are set, and workdir is absolute
    /// - The runtime user is not root when privilege drop is on
    /// - Port is non-zero and the app path looks like `module:attribute`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref base) = self.image.base {
            if base.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "image.base cannot be empty".to_string(),
                ));
            }
        }
        if !self.image.workdir.starts_with('/') {
            return Err(ConfigError::ValidationFailed(format!(
                "image.workdir must be an absolute path, got '{}'",
                self.image.workdir
            )));
        }
        if let Some(ref venv) = self.dependencies.venv_path {
            if !venv.starts_with('/') {
                return Err(ConfigError::ValidationFailed(format!(
                    "dependencies.venv_path must be an absolute path, got '{}'",
                    venv
                )));
            }
        }
        if self.runtime.privilege_drop {
            if self.runtime.uid == 0 || self.runtime.user == "root" {
                return Err(ConfigError::ValidationFailed(
                    "privilege drop requires a non-root user and a non-zero uid".to_string(),
                ));
            }
            if self.runtime.user.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "runtime.user cannot be empty".to_string(),
                ));
            }
        }
        if self.runtime.port == 0 {
            return Err(ConfigError::ValidationFailed(
                "runtime.port must be between 1 and 65535".to_string(),
            ));
        }
        match self.runtime.app.split_once(':') {
            Some((module, attr)) if !module.is_empty() && !attr.is_empty() => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "runtime.app must look like 'module:attribute', got '{}'",
                    self.runtime.app
                )))
            }
        }
        if self.runtime.credentials_env.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "runtime.credentials_env cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Base image to build from, given the Python version the project declares
    pub fn base_image(&self, python_version: Option<&str>) -> String {
        match (&self.image.base, python_version) {
            (Some(base), _) => base.clone(),
            (None, Some(version)) => format!("python:{}-slim", version),
            (None, None) => DEFAULT_BASE_IMAGE.to_string(),
        }
    }

    /// Virtual environment directory for the configured workdir
    pub fn venv_path(&self) -> String {
        self.dependencies
            .venv_path
            .clone()
            .unwrap_or_else(|| format!("{}/.venv", self.image.workdir.trim_end_matches('/')))
    }

    /// Flattened key/value view used by the human and JSON outputs
    pub fn to_display_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(
            "image.base".to_string(),
            self.image
                .base
                .clone()
                .unwrap_or_else(|| "auto".to_string()),
        );
        map.insert("image.workdir".to_string(), self.image.workdir.clone());
        map.insert(
            "dependencies.resolver".to_string(),
            self.dependencies
                .resolver
                .map(|r| r.to_string())
                .unwrap_or_else(|| "auto".to_string()),
        );
        map.insert(
            "dependencies.isolation".to_string(),
            self.dependencies.isolation.to_string(),
        );
        map.insert(
            "runtime.supervisor".to_string(),
            self.runtime.supervisor.to_string(),
        );
        map.insert(
            "runtime.privilege_drop".to_string(),
            self.runtime.privilege_drop.to_string(),
        );
        map.insert(
            "runtime.user".to_string(),
            format!("{} ({})", self.runtime.user, self.runtime.uid),
        );
        map.insert("runtime.app".to_string(), self.runtime.app.clone());
        map.insert(
            "runtime.listen".to_string(),
            format!("{}:{}", self.runtime.host, self.runtime.port),
        );
        map.insert(
            "runtime.grace_period_secs".to_string(),
            self.runtime.grace_period_secs.to_string(),
        );
        map
    }
}

fn parse_field<T>(field: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
        field: field.to_string(),
        error: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AsgipackConfig::default();
        assert_eq!(config.image.base, None);
        assert_eq!(config.base_image(None), "python:3.12-slim");
        assert_eq!(config.dependencies.resolver, None);
        assert_eq!(config.dependencies.isolation, Isolation::Venv);
        assert_eq!(config.runtime.supervisor, Supervisor::Tini);
        assert!(config.runtime.privilege_drop);
        assert_eq!(config.runtime.host, "0.0.0.0");
        assert_eq!(config.runtime.port, 8080);
        assert_eq!(config.runtime.credentials_env, "GOOGLE_APPLICATION_CREDENTIALS");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml_partial() {
        let config = AsgipackConfig::from_toml_str(
            r#"
[dependencies]
resolver = "poetry"
isolation = "system"

[runtime]
supervisor = "none"
privilege_drop = false
port = 9000
"#,
        )
        .unwrap();

        assert_eq!(config.dependencies.resolver, Some(Resolver::Poetry));
        assert_eq!(config.dependencies.isolation, Isolation::System);
        assert_eq!(config.runtime.supervisor, Supervisor::Disabled);
        assert!(!config.runtime.privilege_drop);
        assert_eq!(config.runtime.port, 9000);
        assert_eq!(config.image.base, None);
    }

    #[test]
    fn test_parse_toml_auto_resolver() {
        let config = AsgipackConfig::from_toml_str("[dependencies]\nresolver = \"auto\"\n").unwrap();
        assert_eq!(config.dependencies.resolver, None);
    }

    #[test]
    fn test_parse_toml_rejects_unknown_fields() {
        assert!(AsgipackConfig::from_toml_str("[runtime]\nprot = 1\n").is_err());
        assert!(AsgipackConfig::from_toml_str("[dependencies]\nresolver = \"conda\"\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AsgipackConfig::default();
        config
            .apply_env(lookup_from(&[
                ("ASGIPACK_RESOLVER", "pip"),
                ("ASGIPACK_SUPERVISOR", "dumb-init"),
                ("ASGIPACK_PRIVILEGE_DROP", "false"),
                ("ASGIPACK_PORT", "9090"),
                ("ASGIPACK_APP", "service.api:app"),
            ]))
            .unwrap();

        assert_eq!(config.dependencies.resolver, Some(Resolver::Pip));
        assert_eq!(config.runtime.supervisor, Supervisor::DumbInit);
        assert!(!config.runtime.privilege_drop);
        assert_eq!(config.runtime.port, 9090);
        assert_eq!(config.runtime.app, "service.api:app");
    }

    #[test]
    fn test_env_override_invalid_port() {
        let mut config = AsgipackConfig::default();
        let err = config
            .apply_env(lookup_from(&[("ASGIPACK_PORT", "eighty")]))
            .unwrap_err();
        assert!(err.to_string().contains("ASGIPACK_PORT"));
    }

    #[test]
    fn test_validate_rejects_root_with_privilege_drop() {
        let mut config = AsgipackConfig::default();
        config.runtime.uid = 0;
        assert!(config.validate().is_err());

        config.runtime.privilege_drop = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_app_path() {
        let mut config = AsgipackConfig::default();
        config.runtime.app = "main".to_string();
        assert!(config.validate().is_err());
        config.runtime.app = "main:".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_relative_workdir() {
        let mut config = AsgipackConfig::default();
        config.image.workdir = "app".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_base_image_follows_python_version() {
        let mut config = AsgipackConfig::default();
        assert_eq!(config.base_image(Some("3.11")), "python:3.11-slim");
        config.image.base = Some("python:3.12.4-slim-bookworm".to_string());
        assert_eq!(config.base_image(Some("3.11")), "python:3.12.4-slim-bookworm");
    }

    #[test]
    fn test_venv_path_default_and_override() {
        let mut config = AsgipackConfig::default();
        assert_eq!(config.venv_path(), "/app/.venv");
        config.dependencies.venv_path = Some("/opt/venv".to_string());
        assert_eq!(config.venv_path(), "/opt/venv");
    }

    #[test]
    fn test_load_from_project_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            "[image]\nbase = \"python:3.11-slim-bookworm\"\n",
        )
        .unwrap();
        let config = AsgipackConfig::load(temp.path(), None).unwrap();
        assert_eq!(config.image.base.as_deref(), Some("python:3.11-slim-bookworm"));
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = AsgipackConfig::load(temp.path(), Some(&temp.path().join("nope.toml")))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_display_map() {
        let map = AsgipackConfig::default().to_display_map();
        assert_eq!(map.get("dependencies.resolver").unwrap(), "auto");
        assert_eq!(map.get("runtime.listen").unwrap(), "0.0.0.0:8080");
        assert_eq!(map.get("runtime.user").unwrap(), "appuser (1000)");
    }
}
