//! `pyproject.toml` reading for PEP 621 and Poetry projects

use super::requirement::{normalize_name, Requirement};
use toml::Value;

/// Production-relevant view of a pyproject file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PyProject {
    pub name: Option<String>,
    /// `[project].dependencies` plus `[tool.poetry.dependencies]` (minus `python`)
    pub dependencies: Vec<Requirement>,
    /// `[project.optional-dependencies]`, all extras flattened
    pub optional_dependencies: Vec<Requirement>,
    pub requires_python: Option<String>,
    pub is_poetry: bool,
}

impl PyProject {
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        let doc: Value = toml::from_str(content)?;
        let mut project = PyProject::default();

        if let Some(table) = doc.get("project") {
            project.name = table.get("name").and_then(Value::as_str).map(String::from);
            project.requires_python = table
                .get("requires-python")
                .and_then(Value::as_str)
                .map(String::from);
            if let Some(deps) = table.get("dependencies").and_then(Value::as_array) {
                project.dependencies.extend(
                    deps.iter()
                        .filter_map(Value::as_str)
                        .filter_map(Requirement::parse),
                );
            }
            if let Some(extras) = table.get("optional-dependencies").and_then(Value::as_table) {
                for deps in extras.values().filter_map(Value::as_array) {
                    project.optional_dependencies.extend(
                        deps.iter()
                            .filter_map(Value::as_str)
                            .filter_map(Requirement::parse),
                    );
                }
            }
        }

        if let Some(poetry) = doc.get("tool").and_then(|t| t.get("poetry")) {
            project.is_poetry = true;
            if project.name.is_none() {
                project.name = poetry.get("name").and_then(Value::as_str).map(String::from);
            }
            if let Some(deps) = poetry.get("dependencies").and_then(Value::as_table) {
                for (name, spec) in deps {
                    if name == "python" {
                        if project.requires_python.is_none() {
                            project.requires_python = spec.as_str().map(String::from);
                        }
                        continue;
                    }
                    let normalized = normalize_name(name);
                    if project.dependencies.iter().any(|d| d.normalized == normalized) {
                        continue;
                    }
                    project.dependencies.push(Requirement {
                        name: name.clone(),
                        normalized,
                        specifier: poetry_specifier(spec),
                        url: None,
                    });
                }
            }
        }

        Ok(project)
    }

    /// Whether the file describes an installable project rather than only tool settings
    pub fn declares_project(&self) -> bool {
        self.name.is_some() || !self.dependencies.is_empty()
    }

    /// `major.minor` of the lowest Python the project accepts, e.g. `>=3.11,<4` gives `3.11`
    pub fn python_version(&self) -> Option<String> {
        self.requires_python.as_deref().and_then(normalize_python_version)
    }
}

fn poetry_specifier(spec: &Value) -> String {
    match spec {
        Value::String(s) => s.clone(),
        Value::Table(t) => t
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

/// Reduces a version constraint or `.python-version` entry to `major.minor`
pub fn normalize_python_version(version_str: &str) -> Option<String> {
    let first_clause = version_str.split(',').next().unwrap_or("");
    let ver = first_clause
        .trim()
        .trim_start_matches(">=")
        .trim_start_matches("==")
        .trim_start_matches('^')
        .trim_start_matches("~=")
        .trim_start_matches('~')
        .trim_start_matches("python")
        .trim()
        .split('.')
        .take(2)
        .collect::<Vec<_>>()
        .join(".");

    let valid = ver.split('.').count() == 2
        && ver.split('.').all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));
    if valid {
        Some(ver)
    } else {
        None
    }
}
