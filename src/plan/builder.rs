use super::phases::{base_phase, dependencies_phase, runtime_phase};
use super::resolver::{strategy_for, InstallContext};
use super::{BuildPlan, PlanMetadata, PlanValidator, RunAs};
use crate::config::AsgipackConfig;
use crate::manifest::requirement::normalize_name;
use crate::manifest::ProjectManifest;
use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// Turns a validated configuration and a detected manifest into a checked build plan
pub struct PlanBuilder<'a> {
    config: &'a AsgipackConfig,
    manifest: &'a ProjectManifest,
    validator: PlanValidator,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(config: &'a AsgipackConfig, manifest: &'a ProjectManifest) -> Self {
        Self {
            config,
            manifest,
            validator: PlanValidator::default(),
        }
    }

    pub fn with_validator(mut self, validator: PlanValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn build(&self) -> Result<BuildPlan> {
        self.config
            .validate()
            .context("Invalid asgipack configuration")?;

        let strategy = strategy_for(self.manifest.resolver);
        let ctx = InstallContext {
            config: self.config,
            manifest: self.manifest,
        };
        let venv = strategy.venv_dir(&ctx);
        let run_as = self.config.runtime.privilege_drop.then(|| RunAs {
            user: self.config.runtime.user.clone(),
            uid: self.config.runtime.uid,
        });
        let base_image = self
            .config
            .base_image(self.manifest.python_version.as_deref());
        debug!(
            "Planning {} install into {} on {}",
            strategy.resolver(),
            venv.as_deref().unwrap_or("system site-packages"),
            base_image
        );

        let phases = vec![
            base_phase(
                &base_image,
                self.config.runtime.supervisor,
                &self.config.image.extra_packages,
            ),
            dependencies_phase(&ctx, strategy.as_ref()),
            runtime_phase(self.config, run_as.as_ref(), venv.as_deref()),
        ];

        let mut warnings = strategy.warnings(&ctx);
        warnings.extend(self.runtime_warnings());
        for warning in &warnings {
            warn!("{}", warning);
        }

        let plan = BuildPlan {
            metadata: PlanMetadata {
                project_name: self.manifest.project_name.clone(),
                resolver: self.manifest.resolver,
                isolation: self.config.dependencies.isolation,
                supervisor: self.config.runtime.supervisor,
                base_image,
                python_version: self.manifest.python_version.clone(),
                workdir: ctx.workdir().to_string(),
                venv_path: venv,
                install_inputs: self.manifest.install_inputs(),
                run_as,
                app: self.config.runtime.app.clone(),
                port: self.config.runtime.port,
            },
            phases,
            warnings,
        };

        self.validator
            .validate(&plan)
            .context("Generated plan failed validation")?;
        info!(
            "Planned {} instructions ({} warnings)",
            plan.instructions().count(),
            plan.warnings.len()
        );
        Ok(plan)
    }

    fn runtime_warnings(&self) -> Vec<String> {
        let runtime = &self.config.runtime;
        let mut warnings = Vec::new();

        if !runtime.supervisor.is_enabled() {
            warnings.push(format!(
                "no init supervisor: {} runs as PID 1, so zombie reaping and graceful shutdown are not guaranteed",
                runtime.server
            ));
        }
        if !runtime.privilege_drop {
            warnings.push("privilege drop disabled: the service runs as root".to_string());
        }

        let server = normalize_name(&runtime.server);
        let declared = self
            .manifest
            .dependencies
            .iter()
            .any(|d| d.normalized == server);
        if !declared {
            warnings.push(format!(
                "{} is not a declared production dependency; the CMD will fail to start",
                runtime.server
            ));
        }
        if !self.manifest.has_dockerignore {
            warnings.push(
                "no .dockerignore: a local .venv, .git or credential files would be copied into the image"
                    .to_string(),
            );
        }
        warnings
    }
}
