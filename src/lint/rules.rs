//! Lint rules
//!
//! | Rule                         | Severity | Checks                                            |
//! |------------------------------|----------|---------------------------------------------------|
//! | `source-before-deps`         | error    | whole-tree `COPY` ahead of the dependency install |
//! | `missing-supervisor`         | error    | no tini / dumb-init / `asgipack launch` as PID 1   |
//! | `hardcoded-port`             | error    | literal `--port 8080` instead of `$PORT`          |
//! | `runs-as-root`               | warning  | final stage never switches to a non-root `USER`   |
//! | `unfrozen-install`           | warning  | install may re-resolve instead of using the lock  |
//! | `dev-dependencies-installed` | warning  | dev groups or dev requirement files installed     |
//! | `venv-ownership`             | warning  | venv not owned by the runtime user                |
//! | `shell-form-cmd`             | warning  | signals go to `/bin/sh` instead of the server     |
//! | `apt-cache-not-cleared`      | info     | apt lists left in the layer                       |

use super::{Finding, LintTarget, Severity};
use crate::dockerfile::{CommandForm, Instruction, Located};
use regex::Regex;
use std::sync::OnceLock;

pub trait LintRule: Send + Sync {
    fn id(&self) -> &'static str;
    fn check(&self, target: &LintTarget<'_>) -> Vec<Finding>;
}

/// Every built-in rule
pub fn all() -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(SourceBeforeDepsRule),
        Box::new(MissingSupervisorRule),
        Box::new(HardcodedPortRule),
        Box::new(RunsAsRootRule),
        Box::new(UnfrozenInstallRule),
        Box::new(DevDependenciesRule),
        Box::new(VenvOwnershipRule),
        Box::new(ShellFormCmdRule),
        Box::new(AptCacheRule),
    ]
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("valid regex"))
}

fn install_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"\b(?:pip3?|uv pip) install\b|\buv sync\b|\bpoetry install\b|\bpipenv (?:install|sync)\b",
    )
}

fn literal_port_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"(?:--port[= ]+\d+\b)|(?:(?:--bind|-b)[= ]+\S*:\d+\b)",
    )
}

/// Files that may be copied ahead of the install step without breaking caching
fn is_dependency_input(source: &str) -> bool {
    let name = source.rsplit('/').next().unwrap_or(source);
    let in_requirements_dir = source
        .split('/')
        .rev()
        .skip(1)
        .any(|dir| dir.starts_with("requirements"));
    matches!(
        name,
        "pyproject.toml" | "uv.lock" | "poetry.lock" | "Pipfile" | "Pipfile.lock" | "setup.cfg"
    ) || ((name.starts_with("requirements") || name.starts_with("constraints") || in_requirements_dir)
        && name.ends_with(".txt"))
        || name.starts_with(".python-version")
}

fn run_text(located: &Located) -> Option<String> {
    match &located.instruction {
        Instruction::Run { command, .. } => Some(command.text()),
        _ => None,
    }
}

fn cmd_and_entrypoint(stage: &[Located]) -> (Option<&Located>, Option<&Located>) {
    let cmd = stage
        .iter()
        .rev()
        .find(|l| matches!(l.instruction, Instruction::Cmd { .. }));
    let entrypoint = stage
        .iter()
        .rev()
        .find(|l| matches!(l.instruction, Instruction::Entrypoint { .. }));
    (cmd, entrypoint)
}

fn command_of(located: &Located) -> Option<&CommandForm> {
    match &located.instruction {
        Instruction::Cmd { command } | Instruction::Entrypoint { command } => Some(command),
        _ => None,
    }
}

fn is_root(user: &str) -> bool {
    let name = user.split(':').next().unwrap_or(user).trim();
    name == "root" || name == "0"
}

pub struct SourceBeforeDepsRule;

impl LintRule for SourceBeforeDepsRule {
    fn id(&self) -> &'static str {
        "source-before-deps"
    }

    fn check(&self, target: &LintTarget<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for stage in target.stages() {
            let last_install = stage
                .iter()
                .rev()
                .find(|l| run_text(l).map_or(false, |t| install_re().is_match(&t)));
            let Some(install) = last_install else {
                continue;
            };
            let early_copy = stage.iter().find(|l| {
                l.line < install.line
                    && matches!(&l.instruction, Instruction::Copy { from: None, sources, .. }
                        if sources.iter().any(|s| !is_dependency_input(s)))
            });
            if let Some(copy) = early_copy {
                findings.push(Finding::new(
                    self.id(),
                    Severity::Error,
                    copy.line,
                    format!(
                        "application files copied before the dependency install on line {}; any source change invalidates the install layer",
                        install.line
                    ),
                ));
            }
        }
        findings
    }
}

pub struct MissingSupervisorRule;

impl MissingSupervisorRule {
    fn is_supervisor(command: &CommandForm) -> bool {
        let CommandForm::Exec(args) = command else {
            return false;
        };
        let program = args
            .first()
            .map(|p| p.rsplit('/').next().unwrap_or(p))
            .unwrap_or_default();
        match program {
            "tini" | "tini-static" | "dumb-init" => true,
            "asgipack" => args.get(1).map_or(false, |a| a == "launch"),
            _ => false,
        }
    }
}

impl LintRule for MissingSupervisorRule {
    fn id(&self) -> &'static str {
        "missing-supervisor"
    }

    fn check(&self, target: &LintTarget<'_>) -> Vec<Finding> {
        let stage = target.final_stage();
        let (cmd, entrypoint) = cmd_and_entrypoint(stage);
        let supervised = entrypoint
            .and_then(command_of)
            .map_or(false, Self::is_supervisor)
            || (entrypoint.is_none() && cmd.and_then(command_of).map_or(false, Self::is_supervisor));
        if supervised {
            return Vec::new();
        }
        let line = entrypoint
            .or(cmd)
            .or(stage.first())
            .map(|l| l.line)
            .unwrap_or(1);
        vec![Finding::new(
            self.id(),
            Severity::Error,
            line,
            "the server runs as PID 1 without an init supervisor; use ENTRYPOINT [\"/usr/bin/tini\", \"--\"] so signals are forwarded and zombies reaped".to_string(),
        )]
    }
}

pub struct HardcodedPortRule;

impl LintRule for HardcodedPortRule {
    fn id(&self) -> &'static str {
        "hardcoded-port"
    }

    fn check(&self, target: &LintTarget<'_>) -> Vec<Finding> {
        let (cmd, entrypoint) = cmd_and_entrypoint(target.final_stage());
        [entrypoint, cmd]
            .into_iter()
            .flatten()
            .filter_map(|l| {
                let text = command_of(l)?.text();
                let literal = literal_port_re().find(&text)?;
                Some(Finding::new(
                    self.id(),
                    Severity::Error,
                    l.line,
                    format!(
                        "'{}' ignores the PORT environment variable; bind to \"$PORT\"",
                        literal.as_str()
                    ),
                ))
            })
            .collect()
    }
}

pub struct RunsAsRootRule;

impl LintRule for RunsAsRootRule {
    fn id(&self) -> &'static str {
        "runs-as-root"
    }

    fn check(&self, target: &LintTarget<'_>) -> Vec<Finding> {
        let stage = target.final_stage();
        let last_user = stage.iter().rev().find_map(|l| match &l.instruction {
            Instruction::User { user } => Some((l.line, user.as_str())),
            _ => None,
        });
        match last_user {
            Some((_, user)) if !is_root(user) => Vec::new(),
            Some((line, user)) => vec![Finding::new(
                self.id(),
                Severity::Warning,
                line,
                format!("final USER is '{}'; the service runs with root privileges", user),
            )],
            None => vec![Finding::new(
                self.id(),
                Severity::Warning,
                stage.first().map(|l| l.line).unwrap_or(1),
                "no USER instruction; the service runs as root".to_string(),
            )],
        }
    }
}

pub struct UnfrozenInstallRule;

impl LintRule for UnfrozenInstallRule {
    fn id(&self) -> &'static str {
        "unfrozen-install"
    }

    fn check(&self, target: &LintTarget<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for located in target.instructions() {
            let Some(text) = run_text(located) else {
                continue;
            };
            let problem = if text.contains("uv sync") && !text.contains("--locked") {
                if text.contains("--frozen") {
                    Some("uv sync --frozen installs a stale uv.lock without checking it; use --locked")
                } else {
                    Some("uv sync without --locked may re-resolve dependencies")
                }
            } else if text.contains("poetry lock") || text.contains("poetry update") {
                Some("regenerating the poetry lock during the build defeats the committed lock")
            } else if text.contains("pipenv install") && !text.contains("--deploy") {
                Some("pipenv install without --deploy ignores a stale Pipfile.lock")
            } else {
                None
            };
            if let Some(message) = problem {
                findings.push(Finding::new(
                    self.id(),
                    Severity::Warning,
                    located.line,
                    message.to_string(),
                ));
            }
        }
        findings
    }
}

fn dev_requirements_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"-r\s+\S*requirements[-_.]?(?:dev|test)\S*\.txt")
}

pub struct DevDependenciesRule;

impl LintRule for DevDependenciesRule {
    fn id(&self) -> &'static str {
        "dev-dependencies-installed"
    }

    fn check(&self, target: &LintTarget<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for located in target.instructions() {
            let Some(text) = run_text(located) else {
                continue;
            };
            let uv_dev = text.contains("uv sync")
                && !(text.contains("--no-dev") || text.contains("--only-group"));
            let poetry_dev = text.contains("poetry install")
                && !(text.contains("--only main")
                    || text.contains("--only=main")
                    || text.contains("--without dev")
                    || text.contains("--without=dev")
                    || text.contains("--no-dev"));
            let pipenv_dev = text.contains("pipenv install") && text.contains("--dev");
            let pip_dev = dev_requirements_re().is_match(&text);
            if uv_dev || poetry_dev || pipenv_dev || pip_dev {
                findings.push(Finding::new(
                    self.id(),
                    Severity::Warning,
                    located.line,
                    "development dependencies are installed into the production image".to_string(),
                ));
            }
        }
        findings
    }
}

fn venv_create_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?:python3?|uv) (?:-m )?venv\s+(?:--\S+\s+)*(/\S+)")
}

fn chown_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"chown\s+(?:-R|--recursive)\s+\S+((?:\s+/[^\s&;|]+)+)")
}

pub struct VenvOwnershipRule;

impl VenvOwnershipRule {
    /// `(line, path)` of each venv the stage creates or points its resolver at
    fn venvs(stage: &[Located]) -> Vec<(usize, String)> {
        let mut venvs = Vec::new();
        for located in stage {
            match &located.instruction {
                Instruction::Run { command, .. } => {
                    for caps in venv_create_re().captures_iter(&command.text()) {
                        venvs.push((located.line, caps[1].to_string()));
                    }
                }
                Instruction::Env { vars } => {
                    for (key, value) in vars {
                        let is_venv_var = key == "VIRTUAL_ENV" || key == "UV_PROJECT_ENVIRONMENT";
                        if is_venv_var && value.starts_with('/') && value != "/usr/local" {
                            venvs.push((located.line, value.clone()));
                        }
                    }
                }
                _ => {}
            }
        }
        venvs.dedup_by(|a, b| a.1 == b.1);
        venvs
    }

    fn covered(stage: &[Located], venv: &str) -> bool {
        stage.iter().any(|l| {
            run_text(l).map_or(false, |text| {
                chown_re().captures_iter(&text).any(|caps| {
                    caps[1].split_whitespace().any(|path| {
                        let path = path.trim_end_matches('/');
                        venv == path || venv.starts_with(&format!("{}/", path))
                    })
                })
            })
        })
    }
}

impl LintRule for VenvOwnershipRule {
    fn id(&self) -> &'static str {
        "venv-ownership"
    }

    fn check(&self, target: &LintTarget<'_>) -> Vec<Finding> {
        let stage = target.final_stage();
        let drops_privileges = stage.iter().rev().find_map(|l| match &l.instruction {
            Instruction::User { user } => Some(!is_root(user)),
            _ => None,
        });
        if drops_privileges != Some(true) {
            return Vec::new();
        }
        Self::venvs(stage)
            .into_iter()
            .filter(|(_, venv)| !Self::covered(stage, venv))
            .map(|(line, venv)| {
                Finding::new(
                    self.id(),
                    Severity::Warning,
                    line,
                    format!(
                        "venv {} is owned by root while the service runs unprivileged; chown -R it to the runtime user",
                        venv
                    ),
                )
            })
            .collect()
    }
}

pub struct ShellFormCmdRule;

impl LintRule for ShellFormCmdRule {
    fn id(&self) -> &'static str {
        "shell-form-cmd"
    }

    fn check(&self, target: &LintTarget<'_>) -> Vec<Finding> {
        let (cmd, entrypoint) = cmd_and_entrypoint(target.final_stage());
        let mut findings = Vec::new();
        for located in [entrypoint, cmd].into_iter().flatten() {
            let Some(command) = command_of(located) else {
                continue;
            };
            let keyword = located.instruction.keyword();
            match command {
                CommandForm::Shell(_) => findings.push(Finding::new(
                    self.id(),
                    Severity::Warning,
                    located.line,
                    format!(
                        "shell-form {} runs under /bin/sh, which does not forward SIGTERM; use exec form",
                        keyword
                    ),
                )),
                CommandForm::Exec(args) => {
                    let is_sh = matches!(args.first().map(String::as_str), Some("sh" | "/bin/sh" | "bash" | "/bin/bash"));
                    let script = args.get(2).map(|s| s.trim_start()).unwrap_or_default();
                    if is_sh && args.get(1).map_or(false, |a| a == "-c") && !script.starts_with("exec ") {
                        findings.push(Finding::new(
                            self.id(),
                            Severity::Warning,
                            located.line,
                            format!(
                                "{} script does not start with 'exec'; the shell stays between the supervisor and the server",
                                keyword
                            ),
                        ));
                    }
                }
            }
        }
        findings
    }
}

pub struct AptCacheRule;

impl LintRule for AptCacheRule {
    fn id(&self) -> &'static str {
        "apt-cache-not-cleared"
    }

    fn check(&self, target: &LintTarget<'_>) -> Vec<Finding> {
        target
            .instructions()
            .iter()
            .filter(|l| {
                run_text(l).map_or(false, |text| {
                    text.contains("apt-get install") && !text.contains("/var/lib/apt/lists")
                })
            })
            .map(|l| {
                Finding::new(
                    self.id(),
                    Severity::Info,
                    l.line,
                    "apt-get install without 'rm -rf /var/lib/apt/lists/*' leaves package indexes in the layer".to_string(),
                )
            })
            .collect()
    }
}
