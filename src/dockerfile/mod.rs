//! Typed Dockerfile instructions shared by the plan renderer and the linter

mod parser;
mod render;

pub use parser::{parse, DockerfileParseError};
pub use render::render;

use serde::Serialize;

/// Argument form of `RUN`, `ENTRYPOINT` and `CMD`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "form", content = "value", rename_all = "lowercase")]
pub enum CommandForm {
    /// JSON array, executed without a shell
    Exec(Vec<String>),
    /// Plain string, wrapped in `/bin/sh -c`
    Shell(String),
}

impl CommandForm {
    /// Exec form for a `sh -c` script; keeps `$VAR` expansion without making the shell PID 1
    /// when the script starts with `exec`
    pub fn sh(script: impl Into<String>) -> Self {
        CommandForm::Exec(vec!["sh".to_string(), "-c".to_string(), script.into()])
    }

    /// Full command text, used for pattern matching
    pub fn text(&self) -> String {
        match self {
            CommandForm::Exec(args) => args.join(" "),
            CommandForm::Shell(s) => s.clone(),
        }
    }

    /// First program the form runs (`/bin/sh` for shell form)
    pub fn program(&self) -> Option<&str> {
        match self {
            CommandForm::Exec(args) => args.first().map(String::as_str),
            CommandForm::Shell(_) => Some("/bin/sh"),
        }
    }

    pub fn is_shell(&self) -> bool {
        matches!(self, CommandForm::Shell(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "instruction", rename_all = "lowercase")]
pub enum Instruction {
    From {
        image: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        alias: Option<String>,
    },
    Arg {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    Env {
        vars: Vec<(String, String)>,
    },
    Workdir {
        path: String,
    },
    Run {
        /// `--mount=...` and other flags, without the leading `--`
        #[serde(skip_serializing_if = "Vec::is_empty")]
        flags: Vec<String>,
        command: CommandForm,
    },
    /// `COPY` (and `ADD`, which the parser folds in)
    Copy {
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        chown: Option<String>,
        sources: Vec<String>,
        dest: String,
    },
    User {
        user: String,
    },
    Expose {
        port: String,
    },
    Entrypoint {
        command: CommandForm,
    },
    Cmd {
        command: CommandForm,
    },
    Other {
        keyword: String,
        args: String,
    },
}

impl Instruction {
    pub fn run(command: impl Into<String>) -> Self {
        Instruction::Run {
            flags: Vec::new(),
            command: CommandForm::Shell(command.into()),
        }
    }

    /// `RUN` with `--mount=type=cache` for each target directory
    pub fn run_cached(cache_targets: &[&str], command: impl Into<String>) -> Self {
        Instruction::Run {
            flags: cache_targets
                .iter()
                .map(|target| format!("mount=type=cache,target={}", target))
                .collect(),
            command: CommandForm::Shell(command.into()),
        }
    }

    pub fn env<K: Into<String>, V: Into<String>>(pairs: Vec<(K, V)>) -> Self {
        Instruction::Env {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn copy(sources: Vec<String>, dest: impl Into<String>) -> Self {
        Instruction::Copy {
            from: None,
            chown: None,
            sources,
            dest: dest.into(),
        }
    }

    /// Upper-case keyword of this instruction
    pub fn keyword(&self) -> &str {
        match self {
            Instruction::From { .. } => "FROM",
            Instruction::Arg { .. } => "ARG",
            Instruction::Env { .. } => "ENV",
            Instruction::Workdir { .. } => "WORKDIR",
            Instruction::Run { .. } => "RUN",
            Instruction::Copy { .. } => "COPY",
            Instruction::User { .. } => "USER",
            Instruction::Expose { .. } => "EXPOSE",
            Instruction::Entrypoint { .. } => "ENTRYPOINT",
            Instruction::Cmd { .. } => "CMD",
            Instruction::Other { keyword, .. } => keyword,
        }
    }
}

/// An instruction together with the 1-based line it starts on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Located {
    pub line: usize,
    #[serde(flatten)]
    pub instruction: Instruction,
}
