use super::{CommandForm, Instruction};
use std::fmt;

/// Column at which chained `&&` commands are broken onto continuation lines
const WRAP_WIDTH: usize = 80;

/// Renders instructions as Dockerfile text, one instruction per line
pub fn render(instructions: &[Instruction]) -> String {
    let mut out = String::new();
    for instruction in instructions {
        out.push_str(&instruction.to_string());
        out.push('\n');
    }
    out
}

impl fmt::Display for CommandForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandForm::Exec(args) => {
                let quoted = args
                    .iter()
                    .map(serde_json::to_string)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| fmt::Error)?;
                // Docker's own style puts a space after each comma
                write!(f, "[{}]", quoted.join(", "))
            }
            CommandForm::Shell(script) => write!(f, "{}", wrap_chain(script)),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::From { image, alias } => match alias {
                Some(alias) => write!(f, "FROM {} AS {}", image, alias),
                None => write!(f, "FROM {}", image),
            },
            Instruction::Arg { name, default } => match default {
                Some(default) => write!(f, "ARG {}={}", name, quote(default)),
                None => write!(f, "ARG {}", name),
            },
            Instruction::Env { vars } => {
                let pairs: Vec<String> = vars
                    .iter()
                    .map(|(key, value)| format!("{}={}", key, quote(value)))
                    .collect();
                write!(f, "ENV {}", pairs.join(" "))
            }
            Instruction::Workdir { path } => write!(f, "WORKDIR {}", path),
            Instruction::Run { flags, command } => {
                write!(f, "RUN ")?;
                for flag in flags {
                    write!(f, "--{} ", flag)?;
                }
                write!(f, "{}", command)
            }
            Instruction::Copy {
                from,
                chown,
                sources,
                dest,
            } => {
                write!(f, "COPY ")?;
                if let Some(from) = from {
                    write!(f, "--from={} ", from)?;
                }
                if let Some(chown) = chown {
                    write!(f, "--chown={} ", chown)?;
                }
                write!(f, "{} {}", sources.join(" "), dest)
            }
            Instruction::User { user } => write!(f, "USER {}", user),
            Instruction::Expose { port } => write!(f, "EXPOSE {}", port),
            Instruction::Entrypoint { command } => write!(f, "ENTRYPOINT {}", command),
            Instruction::Cmd { command } => write!(f, "CMD {}", command),
            Instruction::Other { keyword, args } => write!(f, "{} {}", keyword, args),
        }
    }
}

fn quote(value: &str) -> String {
    if value.is_empty() || value.contains(char::is_whitespace) || value.contains('"') {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

/// Breaks a long `a && b && c` chain into one command per continuation line
fn wrap_chain(script: &str) -> String {
    if script.len() <= WRAP_WIDTH || !script.contains(" && ") {
        return script.to_string();
    }
    script
        .split(" && ")
        .collect::<Vec<_>>()
        .join(" \\\n    && ")
}
