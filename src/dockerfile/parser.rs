//! Line-oriented Dockerfile parser
//!
//! Handles comments, parser directives, `\` continuations, exec-form JSON arrays,
//! `ENV` in both `KEY=value` and legacy `KEY value` forms, and `COPY`/`ADD`/`RUN` flags.
//! Heredocs are not supported.

use super::{CommandForm, Instruction, Located};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DockerfileParseError {
    #[error("line {line}: {keyword} requires arguments")]
    MissingArguments { line: usize, keyword: String },

    #[error("line {line}: {message}")]
    Invalid { line: usize, message: String },

    #[error("Dockerfile has no FROM instruction")]
    NoFrom,
}

/// Parses Dockerfile text into instructions tagged with their starting line
pub fn parse(content: &str) -> Result<Vec<Located>, DockerfileParseError> {
    let mut instructions = Vec::new();
    for (line, text) in logical_lines(content) {
        let (keyword, args) = match text.split_once(char::is_whitespace) {
            Some((k, rest)) => (k.to_uppercase(), rest.trim().to_string()),
            None => (text.to_uppercase(), String::new()),
        };
        if args.is_empty() {
            return Err(DockerfileParseError::MissingArguments { line, keyword });
        }
        let instruction = parse_instruction(line, &keyword, &args)?;
        instructions.push(Located { line, instruction });
    }

    if !instructions
        .iter()
        .any(|l| matches!(l.instruction, Instruction::From { .. }))
    {
        return Err(DockerfileParseError::NoFrom);
    }
    Ok(instructions)
}

/// Joins continuation lines; each entry carries the 1-based line it started on
fn logical_lines(content: &str) -> Vec<(usize, String)> {
    let mut result = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in content.lines().enumerate() {
        let trimmed = raw.trim();
        // Comment lines inside a continuation are dropped without ending it
        if trimmed.starts_with('#') || (trimmed.is_empty() && pending.is_none()) {
            continue;
        }

        let (start, mut buffer) = pending.take().unwrap_or((idx + 1, String::new()));
        match trimmed.strip_suffix('\\') {
            Some(body) => {
                buffer.push_str(body.trim_end());
                buffer.push(' ');
                pending = Some((start, buffer));
            }
            None => {
                buffer.push_str(trimmed);
                let joined = buffer.trim().to_string();
                if !joined.is_empty() {
                    result.push((start, joined));
                }
            }
        }
    }

    if let Some((start, buffer)) = pending {
        let joined = buffer.trim().to_string();
        if !joined.is_empty() {
            result.push((start, joined));
        }
    }
    result
}

fn parse_instruction(
    line: usize,
    keyword: &str,
    args: &str,
) -> Result<Instruction, DockerfileParseError> {
    let instruction = match keyword {
        "FROM" => {
            let (_, rest) = take_flags(args);
            let tokens: Vec<&str> = rest.split_whitespace().collect();
            let alias = match tokens.as_slice() {
                [_, as_kw, alias, ..] if as_kw.eq_ignore_ascii_case("as") => {
                    Some(alias.to_string())
                }
                _ => None,
            };
            Instruction::From {
                image: tokens.first().map(|s| s.to_string()).unwrap_or_default(),
                alias,
            }
        }
        "ARG" => match args.split_once('=') {
            Some((name, default)) => Instruction::Arg {
                name: name.trim().to_string(),
                default: Some(unquote(default.trim())),
            },
            None => Instruction::Arg {
                name: args.to_string(),
                default: None,
            },
        },
        "ENV" => Instruction::Env {
            vars: parse_env(line, args)?,
        },
        "WORKDIR" => Instruction::Workdir {
            path: unquote(args),
        },
        "RUN" => {
            let (flags, rest) = take_flags(args);
            Instruction::Run {
                flags,
                command: parse_command(line, rest)?,
            }
        }
        "COPY" | "ADD" => {
            let (flags, rest) = take_flags(args);
            let mut paths = if rest.starts_with('[') {
                parse_json_array(line, rest)?
            } else {
                rest.split_whitespace().map(String::from).collect()
            };
            if paths.len() < 2 {
                return Err(DockerfileParseError::Invalid {
                    line,
                    message: format!("{} needs at least one source and a destination", keyword),
                });
            }
            let dest = paths.pop().unwrap_or_default();
            Instruction::Copy {
                from: flag_value(&flags, "from"),
                chown: flag_value(&flags, "chown"),
                sources: paths,
                dest,
            }
        }
        "USER" => Instruction::User {
            user: args.to_string(),
        },
        "EXPOSE" => Instruction::Expose {
            port: args.to_string(),
        },
        "ENTRYPOINT" => Instruction::Entrypoint {
            command: parse_command(line, args)?,
        },
        "CMD" => Instruction::Cmd {
            command: parse_command(line, args)?,
        },
        other => Instruction::Other {
            keyword: other.to_string(),
            args: args.to_string(),
        },
    };
    Ok(instruction)
}

/// Splits leading `--flag[=value]` tokens off an argument string
fn take_flags(args: &str) -> (Vec<String>, &str) {
    let mut flags = Vec::new();
    let mut rest = args.trim_start();
    while let Some(stripped) = rest.strip_prefix("--") {
        let end = stripped.find(char::is_whitespace).unwrap_or(stripped.len());
        flags.push(stripped[..end].to_string());
        rest = stripped[end..].trim_start();
    }
    (flags, rest)
}

fn flag_value(flags: &[String], name: &str) -> Option<String> {
    flags.iter().find_map(|flag| {
        flag.split_once('=')
            .filter(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    })
}

fn parse_command(line: usize, args: &str) -> Result<CommandForm, DockerfileParseError> {
    if args.starts_with('[') {
        // Docker falls back to shell form when the array is not valid JSON
        if let Ok(items) = serde_json::from_str::<Vec<String>>(args) {
            return Ok(CommandForm::Exec(items));
        }
        if args.ends_with(']') {
            return Err(DockerfileParseError::Invalid {
                line,
                message: format!("malformed JSON array: {}", args),
            });
        }
    }
    Ok(CommandForm::Shell(args.to_string()))
}

fn parse_json_array(line: usize, args: &str) -> Result<Vec<String>, DockerfileParseError> {
    serde_json::from_str(args).map_err(|e| DockerfileParseError::Invalid {
        line,
        message: format!("malformed JSON array: {}", e),
    })
}

fn parse_env(line: usize, args: &str) -> Result<Vec<(String, String)>, DockerfileParseError> {
    let first = args.split_whitespace().next().unwrap_or_default();
    if !first.contains('=') {
        // Legacy `ENV KEY value with spaces`
        let (key, value) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
        return Ok(vec![(key.to_string(), unquote(value.trim()))]);
    }

    let mut vars = Vec::new();
    for token in split_quoted(args) {
        match token.split_once('=') {
            Some((key, value)) => vars.push((key.to_string(), unquote(value))),
            None => {
                return Err(DockerfileParseError::Invalid {
                    line,
                    message: format!("ENV entry '{}' is not KEY=value", token),
                })
            }
        }
    }
    Ok(vars)
}

/// Whitespace split that keeps double-quoted runs (and escaped spaces) together
fn split_quoted(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn unquote(value: &str) -> String {
    let inner = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')));
    match inner {
        Some(inner) => inner.replace("\\\"", "\""),
        None => value.replace("\\ ", " "),
    }
}
