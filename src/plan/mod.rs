//! Build plans for ASGI service images
//!
//! A plan is three ordered phases whose concatenation is the Dockerfile:
//!
//! 1. `base`: pinned Python image plus OS toolchain and the init supervisor
//! 2. `dependencies`: resolver setup, copy of the manifest and lock only, frozen install
//! 3. `runtime`: application source, privilege drop, `HOST`/`PORT` env, entrypoint
//!
//! The dependency phase is computed from the manifest alone, so a source-only change
//! leaves every instruction up to the install step unchanged and the layer cache hits.

mod builder;
pub mod phases;
pub mod resolver;
pub mod validate;

pub use builder::PlanBuilder;
pub use validate::{PlanRule, PlanValidator};

use crate::dockerfile::{self, Instruction};
use crate::knobs::{Isolation, Resolver, Supervisor};
use serde::Serialize;
use std::fmt;

/// Header lines written above the generated instructions
const DOCKERFILE_HEADER: &str = "# syntax=docker/dockerfile:1\n# Generated by asgipack\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    Base,
    Dependencies,
    Runtime,
}

impl PhaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKind::Base => "base",
            PhaseKind::Dependencies => "dependencies",
            PhaseKind::Runtime => "runtime",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanPhase {
    pub kind: PhaseKind,
    pub instructions: Vec<Instruction>,
}

impl PlanPhase {
    pub fn new(kind: PhaseKind) -> Self {
        Self {
            kind,
            instructions: Vec::new(),
        }
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }
}

/// Decisions the plan was built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    pub resolver: Resolver,
    pub isolation: Isolation,
    pub supervisor: Supervisor,
    pub base_image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python_version: Option<String>,
    pub workdir: String,
    /// Venv the dependencies land in; `None` for system isolation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venv_path: Option<String>,
    /// Files copied before the install step
    pub install_inputs: Vec<String>,
    /// `user:uid` the service runs as; `None` keeps root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_as: Option<RunAs>,
    pub app: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunAs {
    pub user: String,
    pub uid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
    pub metadata: PlanMetadata,
    pub phases: Vec<PlanPhase>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl BuildPlan {
    pub fn phase(&self, kind: PhaseKind) -> Option<&PlanPhase> {
        self.phases.iter().find(|p| p.kind == kind)
    }

    /// All instructions in build order
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.phases.iter().flat_map(|p| p.instructions.iter())
    }

    /// Renders the plan as a Dockerfile
    pub fn to_dockerfile(&self) -> String {
        let mut out = String::from(DOCKERFILE_HEADER);
        for phase in &self.phases {
            out.push_str(&format!("\n# {}\n", phase.kind));
            out.push_str(&dockerfile::render(&phase.instructions));
        }
        out
    }
}

impl fmt::Display for BuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Build Plan")?;
        writeln!(f, "==========")?;
        if let Some(ref name) = self.metadata.project_name {
            writeln!(f, "Project:    {}", name)?;
        }
        writeln!(f, "Base Image: {}", self.metadata.base_image)?;
        writeln!(
            f,
            "Resolver:   {} ({})",
            self.metadata.resolver, self.metadata.isolation
        )?;
        writeln!(f, "Supervisor: {}", self.metadata.supervisor)?;
        match self.metadata.run_as {
            Some(ref run_as) => writeln!(f, "User:       {} ({})", run_as.user, run_as.uid)?,
            None => writeln!(f, "User:       root")?,
        }
        writeln!(f, "App:        {} on port {}", self.metadata.app, self.metadata.port)?;
        for phase in &self.phases {
            writeln!(f)?;
            writeln!(f, "{} ({} instructions)", phase.kind, phase.instructions.len())?;
            for instruction in &phase.instructions {
                writeln!(f, "  {}", instruction.keyword())?;
            }
        }
        if !self.warnings.is_empty() {
            writeln!(f)?;
            writeln!(f, "Warnings:")?;
            for warning in &self.warnings {
                writeln!(f, "  - {}", warning)?;
            }
        }
        Ok(())
    }
}
