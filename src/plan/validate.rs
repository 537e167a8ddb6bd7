use super::{BuildPlan, PhaseKind};
use crate::dockerfile::Instruction;
use anyhow::Result;
use regex::Regex;
use std::sync::OnceLock;

pub trait PlanRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, plan: &BuildPlan) -> Result<()>;
}

pub struct RequiredPhasesRule;

impl PlanRule for RequiredPhasesRule {
    fn name(&self) -> &'static str {
        "RequiredPhases"
    }

    fn validate(&self, plan: &BuildPlan) -> Result<()> {
        let order: Vec<PhaseKind> = plan.phases.iter().map(|p| p.kind).collect();
        if order != [PhaseKind::Base, PhaseKind::Dependencies, PhaseKind::Runtime] {
            anyhow::bail!("Phases must be base, dependencies, runtime; got {:?}", order);
        }
        if plan.metadata.base_image.trim().is_empty() {
            anyhow::bail!("Base image cannot be empty");
        }
        match plan.instructions().next() {
            Some(Instruction::From { image, .. }) if !image.trim().is_empty() => Ok(()),
            _ => anyhow::bail!("Plan must start with FROM <base image>"),
        }
    }
}

/// Application source may only arrive after the install step, and only the declared
/// install inputs may be copied before it
pub struct DependenciesBeforeSourceRule;

impl PlanRule for DependenciesBeforeSourceRule {
    fn name(&self) -> &'static str {
        "DependenciesBeforeSource"
    }

    fn validate(&self, plan: &BuildPlan) -> Result<()> {
        for kind in [PhaseKind::Base, PhaseKind::Dependencies] {
            let Some(phase) = plan.phase(kind) else {
                continue;
            };
            for instruction in &phase.instructions {
                if let Instruction::Copy {
                    from: None,
                    sources,
                    ..
                } = instruction
                {
                    for source in sources {
                        if !plan.metadata.install_inputs.contains(source) {
                            anyhow::bail!(
                                "{} phase copies '{}' before dependencies are installed",
                                kind,
                                source
                            );
                        }
                    }
                }
            }
        }

        let deps = plan
            .phase(PhaseKind::Dependencies)
            .map(|p| p.instructions.as_slice())
            .unwrap_or_default();
        if !matches!(deps.last(), Some(Instruction::Run { .. })) {
            anyhow::bail!("Dependency phase must end with the install step");
        }

        let copies_source = plan
            .phase(PhaseKind::Runtime)
            .map(|p| {
                p.instructions.iter().any(|i| {
                    matches!(i, Instruction::Copy { from: None, sources, .. } if sources.iter().any(|s| s == "."))
                })
            })
            .unwrap_or(false);
        if !copies_source {
            anyhow::bail!("Runtime phase must copy the application source");
        }
        Ok(())
    }
}

/// Multi-command `RUN` steps must stop at the first failure
pub struct FailFastRule;

impl PlanRule for FailFastRule {
    fn name(&self) -> &'static str {
        "FailFast"
    }

    fn validate(&self, plan: &BuildPlan) -> Result<()> {
        for instruction in plan.instructions() {
            if let Instruction::Run { command, .. } = instruction {
                let text = command.text();
                if text.contains("; ") || text.contains(" || ") {
                    anyhow::bail!("RUN must chain commands with && only: {}", text);
                }
            }
        }
        Ok(())
    }
}

pub struct PrivilegeDropRule;

impl PlanRule for PrivilegeDropRule {
    fn name(&self) -> &'static str {
        "PrivilegeDrop"
    }

    fn validate(&self, plan: &BuildPlan) -> Result<()> {
        let Some(ref run_as) = plan.metadata.run_as else {
            return Ok(());
        };
        if run_as.uid == 0 || run_as.user == "root" {
            anyhow::bail!("Runtime user must not be root");
        }

        let instructions: Vec<&Instruction> = plan.instructions().collect();
        let last_user = instructions.iter().rposition(|i| matches!(i, Instruction::User { .. }));
        let Some(user_idx) = last_user else {
            anyhow::bail!("Plan drops privileges but has no USER instruction");
        };
        if let Instruction::User { user } = instructions[user_idx] {
            if *user != run_as.uid.to_string() {
                anyhow::bail!("Final USER is '{}', expected uid {}", user, run_as.uid);
            }
        }
        let source_idx = instructions.iter().position(|i| {
            matches!(i, Instruction::Copy { from: None, sources, .. } if sources.iter().any(|s| s == "."))
        });
        if source_idx.map_or(true, |idx| idx > user_idx) {
            anyhow::bail!("USER must come after the source copy and its chown");
        }
        Ok(())
    }
}

pub struct SupervisorRule;

impl PlanRule for SupervisorRule {
    fn name(&self) -> &'static str {
        "Supervisor"
    }

    fn validate(&self, plan: &BuildPlan) -> Result<()> {
        let entrypoint = plan.instructions().find_map(|i| match i {
            Instruction::Entrypoint { command } => Some(command),
            _ => None,
        });
        match (plan.metadata.supervisor.entrypoint(), entrypoint) {
            (Some(expected), Some(crate::dockerfile::CommandForm::Exec(actual))) => {
                if *actual != expected {
                    anyhow::bail!("ENTRYPOINT {:?} does not match supervisor {:?}", actual, expected);
                }
            }
            (Some(_), _) => anyhow::bail!(
                "Supervisor {} requires an exec-form ENTRYPOINT",
                plan.metadata.supervisor
            ),
            (None, Some(_)) => anyhow::bail!("Plan without a supervisor must not set ENTRYPOINT"),
            (None, None) => {}
        }
        Ok(())
    }
}

fn literal_port_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"--port[= ]+\d+").expect("valid regex"))
}

/// The server must take its bind address from `$HOST` / `$PORT`
pub struct PortFromEnvRule;

impl PlanRule for PortFromEnvRule {
    fn name(&self) -> &'static str {
        "PortFromEnv"
    }

    fn validate(&self, plan: &BuildPlan) -> Result<()> {
        let cmd = plan.instructions().find_map(|i| match i {
            Instruction::Cmd { command } => Some(command),
            _ => None,
        });
        let Some(cmd) = cmd else {
            anyhow::bail!("Plan has no CMD");
        };
        if cmd.is_shell() {
            anyhow::bail!("CMD must be exec form so signals reach the server");
        }
        let text = cmd.text();
        if literal_port_re().is_match(&text) {
            anyhow::bail!("CMD hardcodes the port: {}", text);
        }
        if !text.contains("$PORT") || !text.contains("$HOST") {
            anyhow::bail!("CMD must bind to $HOST:$PORT");
        }
        Ok(())
    }
}

pub struct PlanValidator {
    rules: Vec<Box<dyn PlanRule>>,
}

impl PlanValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<Box<dyn PlanRule>>) -> Self {
        Self { rules }
    }

    pub fn validate(&self, plan: &BuildPlan) -> Result<()> {
        for rule in &self.rules {
            if let Err(e) = rule.validate(plan) {
                anyhow::bail!("[{}] {}", rule.name(), e);
            }
        }
        Ok(())
    }
}

impl Default for PlanValidator {
    fn default() -> Self {
        Self {
            rules: vec![
                Box::new(RequiredPhasesRule),
                Box::new(DependenciesBeforeSourceRule),
                Box::new(FailFastRule),
                Box::new(PrivilegeDropRule),
                Box::new(SupervisorRule),
                Box::new(PortFromEnvRule),
            ],
        }
    }
}
