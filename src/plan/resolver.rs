//! Install strategies for each dependency resolver
//!
//! A strategy contributes the dependency phase of a plan: tool setup, the environment
//! that points the resolver at the chosen install target, and one install command.
//! Nothing a strategy emits may depend on application source files.

use crate::config::AsgipackConfig;
use crate::dockerfile::Instruction;
use crate::knobs::{Isolation, Resolver};
use crate::manifest::ProjectManifest;

/// Inputs every strategy needs
pub struct InstallContext<'a> {
    pub config: &'a AsgipackConfig,
    pub manifest: &'a ProjectManifest,
}

impl InstallContext<'_> {
    pub fn isolation(&self) -> Isolation {
        self.config.dependencies.isolation
    }

    pub fn workdir(&self) -> &str {
        self.config.image.workdir.trim_end_matches('/')
    }
}

pub trait InstallStrategy: Send + Sync {
    fn resolver(&self) -> Resolver;

    /// Virtual environment the strategy installs into, `None` for system isolation
    fn venv_dir(&self, ctx: &InstallContext<'_>) -> Option<String> {
        match ctx.isolation() {
            Isolation::Venv => Some(ctx.config.venv_path()),
            Isolation::System => None,
        }
    }

    /// Instructions that install the resolver itself and configure its target
    fn setup(&self, ctx: &InstallContext<'_>) -> Vec<Instruction>;

    /// The frozen, production-only install command
    fn install_command(&self, ctx: &InstallContext<'_>) -> String;

    /// BuildKit cache mount targets for the install step
    fn cache_dirs(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Caveats reported with the plan
    fn warnings(&self, ctx: &InstallContext<'_>) -> Vec<String> {
        let _ = ctx;
        Vec::new()
    }
}

/// Returns the strategy for a resolver
pub fn strategy_for(resolver: Resolver) -> Box<dyn InstallStrategy> {
    match resolver {
        Resolver::Uv => Box::new(UvStrategy),
        Resolver::Poetry => Box::new(PoetryStrategy),
        Resolver::Pip => Box::new(PipStrategy),
    }
}

/// `PATH`/`VIRTUAL_ENV` pointing at a venv
fn venv_env(venv: &str) -> Instruction {
    Instruction::env(vec![
        ("VIRTUAL_ENV", venv.to_string()),
        ("PATH", format!("{}/bin:$PATH", venv)),
    ])
}

fn missing_lock_warning(ctx: &InstallContext<'_>) -> Option<String> {
    let resolver = ctx.manifest.resolver;
    match resolver.lock_file() {
        Some(lock) if !ctx.manifest.has_lock() => Some(format!(
            "{} not found; the frozen {} install will fail until it is generated and committed",
            lock, resolver
        )),
        _ => None,
    }
}

pub struct UvStrategy;

impl InstallStrategy for UvStrategy {
    fn resolver(&self) -> Resolver {
        Resolver::Uv
    }

    fn setup(&self, ctx: &InstallContext<'_>) -> Vec<Instruction> {
        let target = self
            .venv_dir(ctx)
            .unwrap_or_else(|| "/usr/local".to_string());
        let mut instructions = vec![
            Instruction::Copy {
                from: Some(format!(
                    "ghcr.io/astral-sh/uv:{}",
                    ctx.config.dependencies.uv_version
                )),
                chown: None,
                sources: vec!["/uv".to_string(), "/uvx".to_string()],
                dest: "/bin/".to_string(),
            },
            Instruction::env(vec![
                ("UV_COMPILE_BYTECODE", "1".to_string()),
                ("UV_LINK_MODE", "copy".to_string()),
                ("UV_PYTHON_DOWNLOADS", "never".to_string()),
                ("UV_PROJECT_ENVIRONMENT", target),
            ]),
        ];
        if let Some(venv) = self.venv_dir(ctx) {
            instructions.push(venv_env(&venv));
        }
        instructions
    }

    fn install_command(&self, _ctx: &InstallContext<'_>) -> String {
        "uv sync --locked --no-dev --no-install-project".to_string()
    }

    fn cache_dirs(&self) -> Vec<&'static str> {
        vec!["/root/.cache/uv"]
    }

    fn warnings(&self, ctx: &InstallContext<'_>) -> Vec<String> {
        missing_lock_warning(ctx).into_iter().collect()
    }
}

pub struct PoetryStrategy;

impl InstallStrategy for PoetryStrategy {
    fn resolver(&self) -> Resolver {
        Resolver::Poetry
    }

    /// Poetry can only be pointed at `<project>/.venv`, so a custom venv path is ignored
    fn venv_dir(&self, ctx: &InstallContext<'_>) -> Option<String> {
        match ctx.isolation() {
            Isolation::Venv => Some(format!("{}/.venv", ctx.workdir())),
            Isolation::System => None,
        }
    }

    fn setup(&self, ctx: &InstallContext<'_>) -> Vec<Instruction> {
        let create = matches!(ctx.isolation(), Isolation::Venv);
        let mut instructions = vec![
            Instruction::env(vec![
                ("POETRY_NO_INTERACTION", "1".to_string()),
                ("POETRY_VIRTUALENVS_CREATE", create.to_string()),
                ("POETRY_VIRTUALENVS_IN_PROJECT", create.to_string()),
            ]),
            Instruction::run(format!(
                "pip install --no-cache-dir poetry=={}",
                ctx.config.dependencies.poetry_version
            )),
        ];
        if let Some(venv) = self.venv_dir(ctx) {
            instructions.push(venv_env(&venv));
        }
        instructions
    }

    fn install_command(&self, _ctx: &InstallContext<'_>) -> String {
        "poetry install --only main --no-root --no-interaction --no-ansi".to_string()
    }

    fn cache_dirs(&self) -> Vec<&'static str> {
        vec!["/root/.cache/pypoetry"]
    }

    fn warnings(&self, ctx: &InstallContext<'_>) -> Vec<String> {
        let mut warnings: Vec<String> = missing_lock_warning(ctx).into_iter().collect();
        let default_venv = format!("{}/.venv", ctx.workdir());
        if let Some(ref custom) = ctx.config.dependencies.venv_path {
            if matches!(ctx.isolation(), Isolation::Venv) && *custom != default_venv {
                warnings.push(format!(
                    "poetry always creates the project venv at {}; dependencies.venv_path '{}' is ignored",
                    default_venv, custom
                ));
            }
        }
        warnings
    }
}

pub struct PipStrategy;

impl InstallStrategy for PipStrategy {
    fn resolver(&self) -> Resolver {
        Resolver::Pip
    }

    fn setup(&self, ctx: &InstallContext<'_>) -> Vec<Instruction> {
        match self.venv_dir(ctx) {
            Some(venv) => vec![
                venv_env(&venv),
                Instruction::run(format!("python -m venv {}", venv)),
            ],
            None => Vec::new(),
        }
    }

    fn install_command(&self, ctx: &InstallContext<'_>) -> String {
        format!(
            "pip install --no-cache-dir -r {}",
            ctx.manifest.manifest_file
        )
    }

    fn warnings(&self, ctx: &InstallContext<'_>) -> Vec<String> {
        let mut warnings = vec![
            "requirements.txt has no lock file; installs are only as reproducible as its pins"
                .to_string(),
        ];
        let unpinned: Vec<&str> = ctx
            .manifest
            .dependencies
            .iter()
            .filter(|r| !r.is_pinned())
            .map(|r| r.name.as_str())
            .collect();
        if !unpinned.is_empty() {
            warnings.push(format!(
                "requirements without an exact == pin: {}",
                unpinned.join(", ")
            ));
        }
        if !ctx.manifest.editables.is_empty() {
            warnings.push(format!(
                "editable installs need their source before the install step and are not reproducible: {}",
                ctx.manifest.editables.join(", ")
            ));
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::requirement::Requirement;
    use std::path::PathBuf;

    fn manifest(resolver: Resolver, lock: Option<&str>) -> ProjectManifest {
        ProjectManifest {
            project_dir: PathBuf::from("/src"),
            resolver,
            manifest_file: resolver.manifest_file().to_string(),
            lock_file: lock.map(String::from),
            project_name: Some("rsvp".to_string()),
            dependencies: vec![
                Requirement::parse("fastapi==0.110.0").unwrap(),
                Requirement::parse("uvicorn>=0.30").unwrap(),
            ],
            optional_dependencies: Vec::new(),
            included_files: Vec::new(),
            editables: Vec::new(),
            python_version: None,
            has_dockerignore: true,
        }
    }

    #[test]
    fn test_uv_venv_target() {
        let config = AsgipackConfig::default();
        let manifest = manifest(Resolver::Uv, Some("uv.lock"));
        let ctx = InstallContext {
            config: &config,
            manifest: &manifest,
        };
        let strategy = strategy_for(Resolver::Uv);
        let setup = strategy.setup(&ctx);

        assert!(matches!(&setup[0], Instruction::Copy { from: Some(f), .. } if f == "ghcr.io/astral-sh/uv:0.4.20"));
        match &setup[1] {
            Instruction::Env { vars } => assert!(vars
                .contains(&("UV_PROJECT_ENVIRONMENT".to_string(), "/app/.venv".to_string()))),
            other => panic!("Expected Env, got {:?}", other),
        }
        assert_eq!(
            strategy.install_command(&ctx),
            "uv sync --locked --no-dev --no-install-project"
        );
        assert!(strategy.warnings(&ctx).is_empty());
    }

    #[test]
    fn test_uv_system_target() {
        let mut config = AsgipackConfig::default();
        config.dependencies.isolation = Isolation::System;
        let manifest = manifest(Resolver::Uv, None);
        let ctx = InstallContext {
            config: &config,
            manifest: &manifest,
        };
        let strategy = UvStrategy;
        assert_eq!(strategy.venv_dir(&ctx), None);
        let setup = strategy.setup(&ctx);
        assert_eq!(setup.len(), 2);
        match &setup[1] {
            Instruction::Env { vars } => assert!(vars
                .contains(&("UV_PROJECT_ENVIRONMENT".to_string(), "/usr/local".to_string()))),
            other => panic!("Expected Env, got {:?}", other),
        }
        let warnings = strategy.warnings(&ctx);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("uv.lock not found"));
    }

    #[test]
    fn test_poetry_ignores_custom_venv() {
        let mut config = AsgipackConfig::default();
        config.dependencies.venv_path = Some("/opt/venv".to_string());
        let manifest = manifest(Resolver::Poetry, Some("poetry.lock"));
        let ctx = InstallContext {
            config: &config,
            manifest: &manifest,
        };
        let strategy = PoetryStrategy;
        assert_eq!(strategy.venv_dir(&ctx).as_deref(), Some("/app/.venv"));
        assert!(strategy.warnings(&ctx)[0].contains("/opt/venv"));
        match &strategy.setup(&ctx)[1] {
            Instruction::Run { command, .. } => {
                assert_eq!(command.text(), "pip install --no-cache-dir poetry==1.8.3")
            }
            other => panic!("Expected Run, got {:?}", other),
        }
    }

    #[test]
    fn test_pip_warnings() {
        let config = AsgipackConfig::default();
        let manifest = manifest(Resolver::Pip, None);
        let ctx = InstallContext {
            config: &config,
            manifest: &manifest,
        };
        let strategy = PipStrategy;
        let warnings = strategy.warnings(&ctx);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[1].contains("uvicorn"));
        assert!(!warnings[1].contains("fastapi"));
        assert_eq!(
            strategy.install_command(&ctx),
            "pip install --no-cache-dir -r requirements.txt"
        );
        match &strategy.setup(&ctx)[1] {
            Instruction::Run { command, .. } => {
                assert_eq!(command.text(), "python -m venv /app/.venv")
            }
            other => panic!("Expected Run, got {:?}", other),
        }
    }
}
