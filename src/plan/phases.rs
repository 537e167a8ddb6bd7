//! Instruction generation for the three plan phases

use super::resolver::{InstallContext, InstallStrategy};
use super::{PhaseKind, PlanPhase, RunAs};
use crate::config::AsgipackConfig;
use crate::dockerfile::{CommandForm, Instruction};
use crate::knobs::Supervisor;

/// OS packages every image gets for building native wheels and fetching over TLS
const BASE_PACKAGES: &[&str] = &["build-essential", "ca-certificates", "curl"];

/// OS packages for the base phase, in install order without duplicates
pub fn os_packages(supervisor: Supervisor, extra: &[String]) -> Vec<String> {
    let mut candidates: Vec<&str> = BASE_PACKAGES.to_vec();
    candidates.extend(supervisor.package());
    candidates.extend(extra.iter().map(String::as_str));

    let mut packages: Vec<String> = Vec::new();
    for package in candidates {
        let package = package.trim();
        if !package.is_empty() && !packages.iter().any(|p| p == package) {
            packages.push(package.to_string());
        }
    }
    packages
}

pub fn base_phase(base_image: &str, supervisor: Supervisor, extra: &[String]) -> PlanPhase {
    let mut phase = PlanPhase::new(PhaseKind::Base);
    phase.push(Instruction::From {
        image: base_image.to_string(),
        alias: None,
    });
    phase.push(Instruction::env(vec![
        ("PYTHONDONTWRITEBYTECODE", "1"),
        ("PYTHONUNBUFFERED", "1"),
    ]));
    phase.push(Instruction::run(format!(
        "apt-get update && apt-get install -y --no-install-recommends {} && rm -rf /var/lib/apt/lists/*",
        os_packages(supervisor, extra).join(" ")
    )));
    phase
}

/// Everything up to and including the install step; reads only manifest-level inputs
pub fn dependencies_phase(ctx: &InstallContext<'_>, strategy: &dyn InstallStrategy) -> PlanPhase {
    let mut phase = PlanPhase::new(PhaseKind::Dependencies);
    phase.push(Instruction::Workdir {
        path: ctx.workdir().to_string(),
    });
    for instruction in strategy.setup(ctx) {
        phase.push(instruction);
    }
    for copy in install_copies(&ctx.manifest.install_inputs()) {
        phase.push(copy);
    }
    phase.push(Instruction::run_cached(
        &strategy.cache_dirs(),
        strategy.install_command(ctx),
    ));
    phase
}

/// One `COPY` per parent directory so nested inputs keep their relative path
///
/// `COPY a b ./` flattens every source to its base name, which breaks `-r dir/x.txt`.
pub fn install_copies(inputs: &[String]) -> Vec<Instruction> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for input in inputs {
        let dir = match input.rsplit_once('/') {
            Some((dir, _)) => format!("./{}/", dir),
            None => "./".to_string(),
        };
        match groups.iter_mut().find(|(d, _)| *d == dir) {
            Some((_, sources)) => sources.push(input.clone()),
            None => groups.push((dir, vec![input.clone()])),
        }
    }
    groups
        .into_iter()
        .map(|(dest, sources)| Instruction::copy(sources, dest))
        .collect()
}

/// Exec-form `sh -c` launcher that reads the bind address from the environment
pub fn server_command(server: &str, app: &str) -> CommandForm {
    CommandForm::sh(format!(
        "exec {} {} --host \"$HOST\" --port \"$PORT\"",
        server, app
    ))
}

pub fn runtime_phase(
    config: &AsgipackConfig,
    run_as: Option<&RunAs>,
    venv: Option<&str>,
) -> PlanPhase {
    let workdir = config.image.workdir.trim_end_matches('/');
    let runtime = &config.runtime;
    let mut phase = PlanPhase::new(PhaseKind::Runtime);

    match run_as {
        Some(run_as) => {
            phase.push(Instruction::run(format!(
                "groupadd --gid {uid} {user} && useradd --uid {uid} --gid {uid} --no-create-home --shell /usr/sbin/nologin {user}",
                uid = run_as.uid,
                user = run_as.user
            )));
            phase.push(Instruction::Copy {
                from: None,
                chown: Some(format!("{}:{}", run_as.uid, run_as.uid)),
                sources: vec![".".to_string()],
                dest: workdir.to_string(),
            });
            let mut chown = format!(
                "chown -R {user}:{user} {workdir}",
                user = run_as.user,
                workdir = workdir
            );
            if let Some(venv) = venv.filter(|v| !is_within(v, workdir)) {
                chown.push_str(&format!(
                    " && chown -R {user}:{user} {venv}",
                    user = run_as.user,
                    venv = venv
                ));
            }
            phase.push(Instruction::run(chown));
            phase.push(Instruction::User {
                user: run_as.uid.to_string(),
            });
        }
        None => phase.push(Instruction::copy(vec![".".to_string()], workdir)),
    }

    let mut env = vec![
        ("HOST".to_string(), runtime.host.clone()),
        ("PORT".to_string(), runtime.port.to_string()),
    ];
    if let Some(ref path) = runtime.credentials_path {
        env.push((runtime.credentials_env.clone(), path.clone()));
    }
    phase.push(Instruction::env(env));
    phase.push(Instruction::Expose {
        port: runtime.port.to_string(),
    });

    if let Some(entrypoint) = runtime.supervisor.entrypoint() {
        phase.push(Instruction::Entrypoint {
            command: CommandForm::Exec(entrypoint),
        });
    }
    phase.push(Instruction::Cmd {
        command: server_command(&runtime.server, &runtime.app),
    });
    phase
}

fn is_within(path: &str, dir: &str) -> bool {
    path == dir || path.starts_with(&format!("{}/", dir))
}
