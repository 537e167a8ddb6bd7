//! Output formatting for plans, lock checks and lint reports
//!
//! JSON and YAML are the machine-readable forms; the human form uses the same
//! box-drawing layout for every report. `Dockerfile` is only meaningful for plans.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::lint::{LintReport, Severity};
use crate::manifest::{LockError, LockReport};
use crate::plan::BuildPlan;

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";
const BRANCH: &str = "\u{251C}\u{2500}";
const LAST: &str = "\u{2514}\u{2500}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// YAML format
    Yaml,
    /// Human-readable formatted text
    Human,
    /// Plain Dockerfile text (plans only)
    Dockerfile,
}

/// Serialized result of `lock-check`
#[derive(Debug, Serialize)]
struct LockCheckOutput<'a> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a LockReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> LockCheckOutput<'a> {
    fn new(result: &'a std::result::Result<LockReport, LockError>) -> Self {
        match result {
            Ok(report) => Self {
                ok: true,
                report: Some(report),
                error: None,
            },
            Err(e) => Self {
                ok: false,
                report: None,
                error: Some(e.to_string()),
            },
        }
    }
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_plan(&self, plan: &BuildPlan) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(plan).context("Failed to serialize build plan to JSON")
            }
            OutputFormat::Yaml => {
                serde_yaml::to_string(plan).context("Failed to serialize build plan to YAML")
            }
            OutputFormat::Human => Ok(self.format_plan_human(plan)),
            OutputFormat::Dockerfile => Ok(plan.to_dockerfile()),
        }
    }

    pub fn format_lock_check(
        &self,
        result: &std::result::Result<LockReport, LockError>,
    ) -> Result<String> {
        let output = LockCheckOutput::new(result);
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&output)
                .context("Failed to serialize lock check to JSON"),
            OutputFormat::Yaml => {
                serde_yaml::to_string(&output).context("Failed to serialize lock check to YAML")
            }
            OutputFormat::Human => Ok(self.format_lock_check_human(result)),
            OutputFormat::Dockerfile => bail!("Dockerfile output is only available for 'plan'"),
        }
    }

    pub fn format_lint(&self, report: &LintReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report)
                .context("Failed to serialize lint report to JSON"),
            OutputFormat::Yaml => {
                serde_yaml::to_string(report).context("Failed to serialize lint report to YAML")
            }
            OutputFormat::Human => Ok(self.format_lint_human(report)),
            OutputFormat::Dockerfile => bail!("Dockerfile output is only available for 'plan'"),
        }
    }

    pub fn format_config(&self, config: &BTreeMap<String, String>) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(config).context("Failed to serialize config to JSON")
            }
            OutputFormat::Yaml => {
                serde_yaml::to_string(config).context("Failed to serialize config to YAML")
            }
            OutputFormat::Human | OutputFormat::Dockerfile => {
                let mut output = String::from("Configuration\n");
                output.push_str(RULE);
                output.push('\n');
                for (key, value) in config {
                    output.push_str(&format!("{:<28}{}\n", key, value));
                }
                Ok(output)
            }
        }
    }

    fn format_plan_human(&self, plan: &BuildPlan) -> String {
        let meta = &plan.metadata;
        let mut output = String::new();

        if plan.warnings.is_empty() {
            output.push_str("\u{2713} Build Plan\n");
        } else {
            output.push_str("\u{26A0} Build Plan (with warnings)\n");
        }
        output.push_str(RULE);
        output.push_str("\n\n");

        if let Some(ref name) = meta.project_name {
            output.push_str(&format!("Project:     {}\n", name));
        }
        output.push_str(&format!("Base Image:  {}\n", meta.base_image));
        output.push_str(&format!("Resolver:    {}\n", meta.resolver.name()));
        output.push_str(&format!("Isolation:   {}\n", meta.isolation.name()));
        if let Some(ref venv) = meta.venv_path {
            output.push_str(&format!("Venv:        {}\n", venv));
        }
        output.push_str(&format!("Supervisor:  {}\n", meta.supervisor.name()));
        match meta.run_as {
            Some(ref run_as) => {
                output.push_str(&format!("Runs As:     {} (uid {})\n", run_as.user, run_as.uid))
            }
            None => output.push_str("Runs As:     root\n"),
        }
        output.push_str(&format!("App:         {} (default port {})\n\n", meta.app, meta.port));

        output.push_str("Install Inputs:\n");
        push_tree(&mut output, &meta.install_inputs);
        output.push('\n');

        for phase in &plan.phases {
            output.push_str(&format!("Phase {}:\n", phase.kind));
            let lines: Vec<String> = phase
                .instructions
                .iter()
                .map(|i| summarize(&i.to_string()))
                .collect();
            push_tree(&mut output, &lines);
            output.push('\n');
        }

        if !plan.warnings.is_empty() {
            output.push_str("Warnings:\n");
            push_tree(&mut output, &plan.warnings);
        }

        output
    }

    fn format_lock_check_human(&self, result: &std::result::Result<LockReport, LockError>) -> String {
        let mut output = String::new();
        match result {
            Ok(report) => {
                output.push_str("\u{2713} Frozen install check passed\n");
                output.push_str(RULE);
                output.push_str("\n\n");
                output.push_str(&format!("Resolver:  {}\n", report.resolver.name()));
                output.push_str(&format!("{} {}\n", BRANCH, report.manifest_file));
                match report.lock_file {
                    Some(ref lock) => {
                        output.push_str(&format!("{} {}\n", BRANCH, lock));
                        output.push_str(&format!(
                            "{} {} declared, {} locked\n",
                            LAST, report.declared, report.locked
                        ));
                    }
                    None => output.push_str(&format!(
                        "{} {} declared, {} pinned\n",
                        LAST, report.declared, report.locked
                    )),
                }
                if !report.unverified.is_empty() {
                    output.push_str("\nNot verified against the lock:\n");
                    push_tree(&mut output, &report.unverified);
                }
            }
            Err(e) => {
                output.push_str("\u{2717} Frozen install would fail\n");
                output.push_str(RULE);
                output.push_str("\n\n");
                output.push_str(&format!("{}\n", e));
            }
        }
        output
    }

    fn format_lint_human(&self, report: &LintReport) -> String {
        let mut output = String::new();
        let target = report.path.as_deref().unwrap_or("Dockerfile");

        if report.findings.is_empty() {
            output.push_str(&format!("\u{2713} {}: no issues found\n", target));
            return output;
        }

        let errors = report.count(Severity::Error);
        let marker = if errors > 0 { "\u{2717}" } else { "\u{26A0}" };
        output.push_str(&format!("{} {}\n", marker, target));
        output.push_str(RULE);
        output.push_str("\n\n");

        for (i, finding) in report.findings.iter().enumerate() {
            let connector = if i + 1 == report.findings.len() {
                LAST
            } else {
                BRANCH
            };
            output.push_str(&format!(
                "{} line {:<4} {:<8} [{}] {}\n",
                connector, finding.line, finding.severity, finding.rule, finding.message
            ));
        }

        output.push_str(&format!(
            "\n{} error(s), {} warning(s), {} info\n",
            errors,
            report.count(Severity::Warning),
            report.count(Severity::Info)
        ));
        output
    }
}

fn push_tree<S: AsRef<str>>(output: &mut String, items: &[S]) {
    if items.is_empty() {
        output.push_str(&format!("{} (none)\n", LAST));
        return;
    }
    for (i, item) in items.iter().enumerate() {
        let connector = if i + 1 == items.len() { LAST } else { BRANCH };
        output.push_str(&format!("{} {}\n", connector, item.as_ref()));
    }
}

/// First line of a rendered instruction, shortened for the tree view
fn summarize(rendered: &str) -> String {
    let first = rendered.lines().next().unwrap_or_default().trim_end_matches(" \\");
    if first.chars().count() > 72 {
        let short: String = first.chars().take(69).collect();
        format!("{}...", short)
    } else if rendered.lines().count() > 1 {
        format!("{} ...", first)
    } else {
        first.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AsgipackConfig;
    use crate::fs::MockFileSystem;
    use crate::lint::Finding;
    use crate::manifest;
    use crate::plan::PlanBuilder;
    use std::path::PathBuf;

    fn sample_plan() -> BuildPlan {
        let fs = MockFileSystem::new();
        fs.add_file(
            "pyproject.toml",
            "[project]\nname = \"rsvp\"\ndependencies = [\"fastapi>=0.110\", \"uvicorn>=0.29\"]\n",
        );
        fs.add_file("uv.lock", "version = 1\n");
        fs.add_file(".dockerignore", ".git\n");
        let manifest = manifest::detect(&fs, fs.root(), None).unwrap();
        let config = AsgipackConfig::default();
        PlanBuilder::new(&config, &manifest).build().unwrap()
    }

    fn sample_lint_report() -> LintReport {
        LintReport {
            path: Some("Dockerfile".to_string()),
            findings: vec![
                Finding::new(
                    "hardcoded-port",
                    Severity::Error,
                    9,
                    "port 8000 is fixed at build time".to_string(),
                ),
                Finding::new(
                    "apt-cache",
                    Severity::Info,
                    3,
                    "apt lists are not removed".to_string(),
                ),
            ],
        }
    }

    #[test]
    fn test_plan_json_is_valid() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let output = formatter.format_plan(&sample_plan()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["metadata"]["resolver"], "uv");
        assert_eq!(value["phases"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_plan_yaml_is_valid() {
        let formatter = OutputFormatter::new(OutputFormat::Yaml);
        let output = formatter.format_plan(&sample_plan()).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&output).unwrap();
        assert!(value.get("phases").is_some());
    }

    #[test]
    fn test_plan_dockerfile_output() {
        let formatter = OutputFormatter::new(OutputFormat::Dockerfile);
        let output = formatter.format_plan(&sample_plan()).unwrap();
        assert!(output.starts_with("# syntax=docker/dockerfile:1"));
        assert!(output.contains("FROM python:3.12-slim"));
    }

    #[test]
    fn test_plan_human_output() {
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let output = formatter.format_plan(&sample_plan()).unwrap();
        assert!(output.contains("\u{2713} Build Plan"));
        assert!(output.contains("Project:     rsvp"));
        assert!(output.contains("Phase dependencies:"));
        assert!(output.contains("pyproject.toml"));
    }

    #[test]
    fn test_lock_check_failure_json() {
        let result: std::result::Result<LockReport, LockError> =
            Err(LockError::Missing(PathBuf::from("/srv/app/uv.lock")));
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let output = formatter.format_lock_check(&result).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["ok"], false);
        assert!(value["error"].as_str().unwrap().contains("uv.lock"));
    }

    #[test]
    fn test_lock_check_success_human() {
        let result: std::result::Result<LockReport, LockError> = Ok(LockReport {
            resolver: crate::knobs::Resolver::Uv,
            manifest_file: "pyproject.toml".to_string(),
            lock_file: Some("uv.lock".to_string()),
            declared: 2,
            locked: 14,
            unverified: vec!["fastapi ~=0".to_string()],
        });
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let output = formatter.format_lock_check(&result).unwrap();
        assert!(output.contains("passed"));
        assert!(output.contains("2 declared, 14 locked"));
        assert!(output.contains("Not verified against the lock:"));
        assert!(output.contains("fastapi ~=0"));
    }

    #[test]
    fn test_lint_human_output() {
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let output = formatter.format_lint(&sample_lint_report()).unwrap();
        assert!(output.starts_with("\u{2717} Dockerfile"));
        assert!(output.contains("[hardcoded-port]"));
        assert!(output.contains("1 error(s), 0 warning(s), 1 info"));
    }

    #[test]
    fn test_lint_clean_human_output() {
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let output = formatter.format_lint(&LintReport::default()).unwrap();
        assert!(output.contains("no issues found"));
    }

    #[test]
    fn test_lint_json_output() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let output = formatter.format_lint(&sample_lint_report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["findings"][0]["severity"], "error");
    }

    #[test]
    fn test_dockerfile_format_rejected_for_reports() {
        let formatter = OutputFormatter::new(OutputFormat::Dockerfile);
        assert!(formatter.format_lint(&sample_lint_report()).is_err());
    }

    #[test]
    fn test_config_output() {
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let output = formatter
            .format_config(&AsgipackConfig::default().to_display_map())
            .unwrap();
        assert!(output.contains("runtime.supervisor"));
    }

    #[test]
    fn test_summarize_long_line() {
        let long = format!("RUN {}", "x".repeat(100));
        assert!(summarize(&long).ends_with("..."));
        assert_eq!(summarize("USER 1000"), "USER 1000");
        assert_eq!(summarize("RUN a \\\n    && b"), "RUN a ...");
    }
}
