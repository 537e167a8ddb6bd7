//! PEP 508 requirement strings and `requirements.txt` files

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// One declared third-party dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Requirement {
    /// Name as written in the manifest
    pub name: String,
    /// PEP 503 normalized name, used for lock comparisons
    pub normalized: String,
    /// Version specifier with extras and markers removed (may be empty)
    pub specifier: String,
    /// Direct reference after `@`, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

fn requirement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[[^\]]*\])?\s*(.*)$")
            .expect("valid regex")
    })
}

fn separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-_.]+").expect("valid regex"))
}

/// PEP 503 name normalization: lowercase, runs of `-`, `_`, `.` become a single `-`
pub fn normalize_name(name: &str) -> String {
    separator_re()
        .replace_all(&name.trim().to_lowercase(), "-")
        .into_owned()
}

impl Requirement {
    /// Parses a PEP 508 string such as `uvicorn[standard]>=0.30 ; python_version >= "3.9"`
    pub fn parse(spec: &str) -> Option<Self> {
        let without_marker = spec.split(';').next().unwrap_or("").trim();
        if without_marker.is_empty() {
            return None;
        }
        let caps = requirement_re().captures(without_marker)?;
        let name = caps.get(1)?.as_str().to_string();
        let rest = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");

        let (specifier, url) = match rest.strip_prefix('@') {
            Some(url) => (String::new(), Some(url.trim().to_string())),
            None => (
                rest.trim_start_matches('(')
                    .trim_end_matches(')')
                    .replace(' ', ""),
                None,
            ),
        };

        Some(Self {
            normalized: normalize_name(&name),
            name,
            specifier,
            url,
        })
    }

    /// Whether this requirement selects exactly one artifact
    ///
    /// `==X.Y.Z` (no wildcard, single clause) and `===X` are exact. Direct references are
    /// exact only when they carry a content hash or a full git commit.
    pub fn is_pinned(&self) -> bool {
        if let Some(ref url) = self.url {
            return url.contains("#sha256=") || git_commit_re().is_match(url);
        }
        let spec = self.specifier.as_str();
        if spec.contains(',') {
            return false;
        }
        if let Some(version) = spec.strip_prefix("===") {
            return !version.is_empty();
        }
        match spec.strip_prefix("==") {
            Some(version) => !version.is_empty() && !version.contains('*'),
            None => false,
        }
    }
}

fn git_commit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^git\+.*@[0-9a-f]{40}(?:#.*)?$").expect("valid regex"))
}

/// One meaningful line of a requirements file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequirementLine {
    Requirement(Requirement),
    /// `-r other.txt` / `--requirement other.txt`
    Include(String),
    /// `-c constraints.txt` / `--constraint constraints.txt`
    Constraint(String),
    /// `-e path` editable installs; never reproducible
    Editable(String),
}

/// Parses requirements.txt content, joining continuations and dropping comments and options
pub fn parse_requirements_txt(content: &str) -> Vec<RequirementLine> {
    let mut logical_lines = Vec::new();
    let mut pending = String::new();
    for raw in content.lines() {
        let line = strip_comment(raw);
        if let Some(stripped) = line.trim_end().strip_suffix('\\') {
            pending.push_str(stripped);
            pending.push(' ');
            continue;
        }
        pending.push_str(line);
        logical_lines.push(std::mem::take(&mut pending));
    }
    if !pending.trim().is_empty() {
        logical_lines.push(pending);
    }

    let mut result = Vec::new();
    for line in logical_lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(target) = option_value(line, &["-r", "--requirement"]) {
            result.push(RequirementLine::Include(target));
            continue;
        }
        if let Some(target) = option_value(line, &["-c", "--constraint"]) {
            result.push(RequirementLine::Constraint(target));
            continue;
        }
        if let Some(target) = option_value(line, &["-e", "--editable"]) {
            result.push(RequirementLine::Editable(target));
            continue;
        }
        if line.starts_with('-') {
            continue;
        }
        let requirement_part: String = line
            .split_whitespace()
            .take_while(|token| !token.starts_with("--"))
            .collect::<Vec<_>>()
            .join(" ");
        if let Some(req) = Requirement::parse(&requirement_part) {
            result.push(RequirementLine::Requirement(req));
        }
    }
    result
}

fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    match line.find(" #") {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn option_value(line: &str, flags: &[&str]) -> Option<String> {
    for flag in flags {
        if let Some(rest) = line.strip_prefix(flag) {
            let rest = rest.trim_start_matches('=');
            if rest.starts_with(char::is_whitespace) || line.contains('=') {
                let value = rest.trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}
