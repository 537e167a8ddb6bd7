//! Static checks for hand-written ASGI service Dockerfiles
//!
//! Each rule inspects the parsed instructions and reports findings tagged with the
//! line they start on. Errors are violations that break layer caching, signal handling
//! or runtime port configuration; warnings are weaker guarantees.

pub mod rules;

use crate::dockerfile::{self, DockerfileParseError, Located};
use rules::LintRule;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub rule: &'static str,
    pub severity: Severity,
    pub line: usize,
    pub message: String,
}

impl Finding {
    pub fn new(rule: &'static str, severity: Severity, line: usize, message: String) -> Self {
        Self {
            rule,
            severity,
            line,
            message,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LintReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub findings: Vec<Finding>,
}

impl LintReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }

    pub fn has_rule(&self, rule: &str) -> bool {
        self.findings.iter().any(|f| f.rule == rule)
    }

    /// Errors always fail; warnings fail only in strict mode
    pub fn is_failure(&self, strict: bool) -> bool {
        self.count(Severity::Error) > 0 || (strict && self.count(Severity::Warning) > 0)
    }
}

/// Parsed Dockerfile split into build stages
pub struct LintTarget<'a> {
    instructions: &'a [Located],
}

impl<'a> LintTarget<'a> {
    pub fn new(instructions: &'a [Located]) -> Self {
        Self { instructions }
    }

    pub fn instructions(&self) -> &'a [Located] {
        self.instructions
    }

    /// Instruction runs that each start with `FROM`
    pub fn stages(&self) -> Vec<&'a [Located]> {
        let starts: Vec<usize> = self
            .instructions
            .iter()
            .enumerate()
            .filter(|(_, l)| l.instruction.keyword() == "FROM")
            .map(|(idx, _)| idx)
            .collect();
        starts
            .iter()
            .enumerate()
            .map(|(n, &start)| {
                let end = starts.get(n + 1).copied().unwrap_or(self.instructions.len());
                &self.instructions[start..end]
            })
            .collect()
    }

    /// The stage that becomes the image
    pub fn final_stage(&self) -> &'a [Located] {
        self.stages().last().copied().unwrap_or(self.instructions)
    }
}

pub struct Linter {
    rules: Vec<Box<dyn LintRule>>,
}

impl Linter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<Box<dyn LintRule>>) -> Self {
        Self { rules }
    }

    pub fn lint_instructions(&self, instructions: &[Located]) -> LintReport {
        let target = LintTarget::new(instructions);
        let mut findings: Vec<Finding> = self
            .rules
            .iter()
            .flat_map(|rule| rule.check(&target))
            .collect();
        findings.sort_by(|a, b| a.line.cmp(&b.line).then(b.severity.cmp(&a.severity)));
        LintReport {
            path: None,
            findings,
        }
    }

    pub fn lint(&self, content: &str) -> Result<LintReport, DockerfileParseError> {
        let instructions = dockerfile::parse(content)?;
        Ok(self.lint_instructions(&instructions))
    }
}

impl Default for Linter {
    fn default() -> Self {
        Self {
            rules: rules::all(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stages() {
        let parsed = dockerfile::parse(
            "FROM python:3.12 AS build\nRUN pip wheel -r requirements.txt\nFROM python:3.12-slim\nUSER 1000\n",
        )
        .unwrap();
        let target = LintTarget::new(&parsed);
        assert_eq!(target.stages().len(), 2);
        assert_eq!(target.final_stage().len(), 2);
        assert_eq!(target.final_stage()[0].line, 3);
    }

    #[test]
    fn test_is_failure() {
        let mut report = LintReport::default();
        assert!(!report.is_failure(true));
        report.findings.push(Finding::new(
            "runs-as-root",
            Severity::Warning,
            1,
            "root".to_string(),
        ));
        assert!(!report.is_failure(false));
        assert!(report.is_failure(true));
        report.findings.push(Finding::new(
            "hardcoded-port",
            Severity::Error,
            2,
            "port".to_string(),
        ));
        assert!(report.is_failure(false));
        assert_eq!(report.count(Severity::Error), 1);
    }

    #[test]
    fn test_findings_sorted_by_line() {
        let report = Linter::new()
            .lint("FROM python:3.12-slim\nCOPY . .\nRUN pip install -r requirements.txt\nCMD uvicorn main:app --port 8000\n")
            .unwrap();
        let lines: Vec<usize> = report.findings.iter().map(|f| f.line).collect();
        let mut sorted = lines.clone();
        sorted.sort();
        assert_eq!(lines, sorted);
    }
}
