//! Frozen-install verification
//!
//! A frozen install refuses to re-resolve. This module predicts, before any image is
//! built, whether `uv sync --locked` / `poetry install` with the committed lock would
//! install exactly the declared dependency set, and for requirement lists whether every
//! entry is an exact pin.
//!
//! uv records the specifier of every root requirement, so a changed specifier makes the
//! lock stale. Poetry only records a content hash of the pyproject; instead of recomputing
//! it, each locked version is matched against its declared constraint, and constraints
//! that cannot be evaluated are reported as unverified.

use super::requirement::normalize_name;
use super::version;
use super::{ManifestError, ProjectManifest};
use crate::fs::FileSystem;
use crate::knobs::Resolver;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use thiserror::Error;
use toml::Value;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock file {0:?} is missing; a frozen install cannot proceed without it")]
    Missing(PathBuf),

    #[error("Lock file {path:?} is malformed: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error(
        "Lock file {path:?} is out of date with {manifest}: missing [{}], not declared [{}], changed [{}]",
        .missing.join(", "),
        .unexpected.join(", "),
        .changed.join(", ")
    )]
    Inconsistent {
        path: PathBuf,
        manifest: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
        /// Declared constraints the lock no longer matches
        changed: Vec<String>,
    },

    #[error("{manifest} has requirements without an exact pin: {}", .unpinned.join(", "))]
    Unpinned {
        manifest: String,
        unpinned: Vec<String>,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Parsed `uv.lock` or `poetry.lock`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LockFile {
    /// Normalized package name to locked version
    pub packages: BTreeMap<String, String>,
    /// Dependencies the lock recorded for the project itself, with their normalized
    /// specifiers (uv only)
    pub root_requires: Option<BTreeMap<String, BTreeSet<String>>>,
    /// `[metadata] content-hash` (Poetry only)
    pub content_hash: Option<String>,
}

impl LockFile {
    /// Parses either lock format; both are TOML with `[[package]]` tables
    pub fn parse(content: &str, project_name: Option<&str>) -> Result<Self, String> {
        let doc: Value = toml::from_str(content).map_err(|e| e.to_string())?;
        let mut lock = LockFile::default();
        let project = project_name.map(normalize_name);

        let packages: &[Value] = match doc.get("package") {
            Some(Value::Array(items)) => items.as_slice(),
            Some(_) => return Err("'package' must be an array of tables".to_string()),
            None => &[],
        };

        for (index, package) in packages.iter().enumerate() {
            let name = package
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("package[{}] has no name", index))?;
            let normalized = normalize_name(name);
            let version = package
                .get("version")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            if is_root_package(package, &normalized, project.as_deref()) {
                lock.root_requires = package
                    .get("metadata")
                    .and_then(|m| m.get("requires-dist"))
                    .and_then(Value::as_array)
                    .map(|deps| root_requirements(deps));
            }
            lock.packages.insert(normalized, version);
        }

        lock.content_hash = doc
            .get("metadata")
            .and_then(|m| m.get("content-hash"))
            .and_then(Value::as_str)
            .map(String::from);

        Ok(lock)
    }

    pub fn contains(&self, normalized_name: &str) -> bool {
        self.packages.contains_key(normalized_name)
    }
}

fn root_requirements(deps: &[Value]) -> BTreeMap<String, BTreeSet<String>> {
    let mut recorded: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for dep in deps {
        let Some(name) = dep.get("name").and_then(Value::as_str) else {
            continue;
        };
        let specifier = dep.get("specifier").and_then(Value::as_str).unwrap_or_default();
        recorded
            .entry(normalize_name(name))
            .or_default()
            .insert(normalize_specifier(specifier));
    }
    recorded
}

/// Whitespace-free, clause-sorted form of a PEP 440 specifier
pub fn normalize_specifier(specifier: &str) -> String {
    let mut clauses: Vec<String> = specifier
        .split(',')
        .map(|c| c.split_whitespace().collect::<String>())
        .filter(|c| !c.is_empty())
        .collect();
    clauses.sort();
    clauses.join(",")
}

fn is_root_package(package: &Value, normalized: &str, project: Option<&str>) -> bool {
    let local_source = package
        .get("source")
        .and_then(Value::as_table)
        .map_or(false, |source| {
            ["editable", "virtual"]
                .iter()
                .any(|kind| source.get(*kind).and_then(Value::as_str) == Some("."))
        });
    local_source || project == Some(normalized)
}

/// Outcome of a successful frozen check
#[derive(Debug, Clone, Serialize)]
pub struct LockReport {
    pub resolver: Resolver,
    pub manifest_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_file: Option<String>,
    /// Declared dependencies that were checked
    pub declared: usize,
    /// Packages pinned by the lock (or pinned requirement lines for pip)
    pub locked: usize,
    /// Declared constraints that could not be checked against the lock
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unverified: Vec<String>,
}

/// Checks that a frozen install of `manifest` would succeed
pub fn verify_frozen(
    fs: &dyn FileSystem,
    manifest: &ProjectManifest,
) -> Result<LockReport, LockError> {
    match manifest.resolver {
        Resolver::Uv | Resolver::Poetry => verify_lockfile(fs, manifest),
        Resolver::Pip => verify_pins(manifest),
    }
}

fn verify_lockfile(
    fs: &dyn FileSystem,
    manifest: &ProjectManifest,
) -> Result<LockReport, LockError> {
    let lock_name = manifest.resolver.lock_file().unwrap_or_default();
    let path = manifest.project_dir.join(lock_name);
    if !fs.is_file(&path) {
        return Err(LockError::Missing(path));
    }

    let content = fs
        .read_to_string(&path)
        .map_err(|e| ManifestError::Read {
            path: path.clone(),
            message: e.to_string(),
        })?;
    let lock = LockFile::parse(&content, manifest.project_name.as_deref()).map_err(|message| {
        LockError::Malformed {
            path: path.clone(),
            message,
        }
    })?;
    debug!("{:?} pins {} packages", path, lock.packages.len());

    let declared: BTreeSet<String> = manifest
        .dependencies
        .iter()
        .map(|d| d.normalized.clone())
        .collect();

    let mut missing: BTreeSet<String> = declared
        .iter()
        .filter(|name| !lock.contains(name))
        .cloned()
        .collect();

    let mut unexpected = BTreeSet::new();
    let mut changed = Vec::new();
    let mut unverified = Vec::new();
    match lock.root_requires {
        Some(ref recorded) => {
            let optional: BTreeSet<String> = manifest
                .optional_dependencies
                .iter()
                .map(|d| d.normalized.clone())
                .collect();
            missing.extend(declared.iter().filter(|name| !recorded.contains_key(*name)).cloned());
            unexpected.extend(
                recorded
                    .keys()
                    .filter(|name| !declared.contains(*name) && !optional.contains(*name))
                    .cloned(),
            );
            for req in manifest.dependencies.iter().filter(|r| r.url.is_none()) {
                let Some(specifiers) = recorded.get(&req.normalized) else {
                    continue;
                };
                let specifier = normalize_specifier(&req.specifier);
                if !specifiers.contains(&specifier) {
                    let locked: Vec<&str> = specifiers.iter().map(|s| display_specifier(s)).collect();
                    changed.push(format!(
                        "{} {} (locked for {})",
                        req.name,
                        display_specifier(&specifier),
                        locked.join(" | ")
                    ));
                }
            }
        }
        None => {
            if let Some(ref hash) = lock.content_hash {
                debug!("Not recomputing content-hash {}; matching locked versions instead", hash);
            }
            for req in manifest.dependencies.iter().filter(|r| r.url.is_none()) {
                let Some(locked) = lock.packages.get(&req.normalized) else {
                    continue;
                };
                match version::satisfies(locked, &req.specifier) {
                    Some(true) => {}
                    Some(false) => changed.push(format!(
                        "{} {} (locked at {})",
                        req.name,
                        display_specifier(&req.specifier),
                        locked
                    )),
                    None => unverified.push(format!("{} {}", req.name, req.specifier)),
                }
            }
        }
    }

    if !missing.is_empty() || !unexpected.is_empty() || !changed.is_empty() {
        warn!(
            "Lock file {:?} is stale: {} missing, {} unexpected, {} changed",
            path,
            missing.len(),
            unexpected.len(),
            changed.len()
        );
        return Err(LockError::Inconsistent {
            path,
            manifest: manifest.manifest_file.clone(),
            missing: missing.into_iter().collect(),
            unexpected: unexpected.into_iter().collect(),
            changed,
        });
    }
    if !unverified.is_empty() {
        warn!(
            "Could not check {} constraint(s) against {:?}: {}",
            unverified.len(),
            path,
            unverified.join(", ")
        );
    }

    Ok(LockReport {
        resolver: manifest.resolver,
        manifest_file: manifest.manifest_file.clone(),
        lock_file: Some(lock_name.to_string()),
        declared: declared.len(),
        locked: lock.packages.len(),
        unverified,
    })
}

fn display_specifier(specifier: &str) -> &str {
    if specifier.is_empty() {
        "*"
    } else {
        specifier
    }
}

fn verify_pins(manifest: &ProjectManifest) -> Result<LockReport, LockError> {
    let mut unpinned: Vec<String> = manifest
        .dependencies
        .iter()
        .filter(|req| !req.is_pinned())
        .map(|req| {
            if req.specifier.is_empty() {
                req.name.clone()
            } else {
                format!("{}{}", req.name, req.specifier)
            }
        })
        .collect();
    unpinned.extend(manifest.editables.iter().map(|e| format!("-e {}", e)));

    if !unpinned.is_empty() {
        return Err(LockError::Unpinned {
            manifest: manifest.manifest_file.clone(),
            unpinned,
        });
    }

    Ok(LockReport {
        resolver: Resolver::Pip,
        manifest_file: manifest.manifest_file.clone(),
        lock_file: None,
        declared: manifest.dependencies.len(),
        locked: manifest.dependencies.len(),
        unverified: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;
    use crate::manifest::detect;

    const PYPROJECT: &str = r#"
[project]
name = "rsvp"
version = "1.0.0"
dependencies = ["fastapi>=0.110", "uvicorn>=0.30", "gspread>=6"]
"#;

    const UV_LOCK: &str = r#"
version = 1
requires-python = ">=3.11"

[[package]]
name = "fastapi"
version = "0.110.0"
source = { registry = "https://pypi.org/simple" }

[[package]]
name = "gspread"
version = "6.1.2"
source = { registry = "https://pypi.org/simple" }

[[package]]
name = "rsvp"
version = "1.0.0"
source = { virtual = "." }
dependencies = [
    { name = "fastapi" },
    { name = "gspread" },
    { name = "uvicorn" },
]

[package.metadata]
requires-dist = [
    { name = "fastapi", specifier = ">=0.110" },
    { name = "gspread", specifier = ">=6" },
    { name = "uvicorn", specifier = ">=0.30" },
]

[[package]]
name = "uvicorn"
version = "0.30.1"
source = { registry = "https://pypi.org/simple" }
"#;

    fn uv_project(pyproject: &str, lock: Option<&str>) -> (MockFileSystem, ProjectManifest) {
        let fs = MockFileSystem::new();
        fs.add_file("pyproject.toml", pyproject);
        if let Some(lock) = lock {
            fs.add_file("uv.lock", lock);
        }
        let manifest = detect(&fs, fs.root(), Some(Resolver::Uv)).unwrap();
        (fs, manifest)
    }

    #[test]
    fn test_parse_uv_lock() {
        let lock = LockFile::parse(UV_LOCK, Some("rsvp")).unwrap();
        assert_eq!(lock.packages.len(), 4);
        assert_eq!(lock.packages.get("uvicorn").unwrap(), "0.30.1");
        let root = lock.root_requires.unwrap();
        assert!(root["gspread"].contains(">=6"));
        assert_eq!(root.len(), 3);
    }

    #[test]
    fn test_parse_poetry_lock() {
        let lock = LockFile::parse(
            r#"
[[package]]
name = "Google-Auth"
version = "2.29.0"
description = "Google Authentication Library"
optional = false

[metadata]
lock-version = "2.0"
python-versions = "^3.12"
content-hash = "0f3c"
"#,
            Some("rsvp"),
        )
        .unwrap();
        assert!(lock.contains("google-auth"));
        assert_eq!(lock.content_hash.as_deref(), Some("0f3c"));
        assert!(lock.root_requires.is_none());
    }

    #[test]
    fn test_parse_malformed_lock() {
        assert!(LockFile::parse("package = \"nope\"", None).is_err());
        assert!(LockFile::parse("[[package]]\nversion = \"1\"\n", None).is_err());
        assert!(LockFile::parse("[[package]\n", None).is_err());
    }

    #[test]
    fn test_consistent_uv_lock() {
        let (fs, manifest) = uv_project(PYPROJECT, Some(UV_LOCK));
        let report = verify_frozen(&fs, &manifest).unwrap();
        assert_eq!(report.declared, 3);
        assert_eq!(report.locked, 4);
        assert_eq!(report.lock_file.as_deref(), Some("uv.lock"));
    }

    #[test]
    fn test_missing_lock_fails() {
        let (fs, manifest) = uv_project(PYPROJECT, None);
        let err = verify_frozen(&fs, &manifest).unwrap_err();
        assert!(matches!(err, LockError::Missing(_)));
    }

    #[test]
    fn test_new_dependency_makes_lock_stale() {
        let pyproject = PYPROJECT.replace(
            "\"gspread>=6\"]",
            "\"gspread>=6\", \"google-auth>=2.29\"]",
        );
        let (fs, manifest) = uv_project(&pyproject, Some(UV_LOCK));
        match verify_frozen(&fs, &manifest).unwrap_err() {
            LockError::Inconsistent {
                missing,
                unexpected,
                ..
            } => {
                assert_eq!(missing, vec!["google-auth"]);
                assert!(unexpected.is_empty());
            }
            other => panic!("Expected Inconsistent, got {:?}", other),
        }
    }

    #[test]
    fn test_removed_dependency_makes_lock_stale() {
        let pyproject = PYPROJECT.replace(", \"gspread>=6\"", "");
        let (fs, manifest) = uv_project(&pyproject, Some(UV_LOCK));
        match verify_frozen(&fs, &manifest).unwrap_err() {
            LockError::Inconsistent { unexpected, .. } => {
                assert_eq!(unexpected, vec!["gspread"]);
            }
            other => panic!("Expected Inconsistent, got {:?}", other),
        }
    }

    #[test]
    fn test_changed_specifier_makes_uv_lock_stale() {
        let pyproject = PYPROJECT.replace("fastapi>=0.110", "fastapi>=0.120");
        let (fs, manifest) = uv_project(&pyproject, Some(UV_LOCK));
        match verify_frozen(&fs, &manifest).unwrap_err() {
            LockError::Inconsistent {
                missing,
                unexpected,
                changed,
                ..
            } => {
                assert!(missing.is_empty());
                assert!(unexpected.is_empty());
                assert_eq!(changed, vec!["fastapi >=0.120 (locked for >=0.110)"]);
            }
            other => panic!("Expected Inconsistent, got {:?}", other),
        }
    }

    #[test]
    fn test_specifier_spacing_and_order_ignored() {
        let pyproject = PYPROJECT.replace("\"gspread>=6\"", "\"gspread <7, >= 6\"");
        let lock = UV_LOCK.replace(
            "{ name = \"gspread\", specifier = \">=6\" }",
            "{ name = \"gspread\", specifier = \">=6,<7\" }",
        );
        let (fs, manifest) = uv_project(&pyproject, Some(&lock));
        assert!(verify_frozen(&fs, &manifest).is_ok());
    }

    const POETRY_PYPROJECT: &str = r#"
[tool.poetry]
name = "rsvp"
version = "1.0.0"

[tool.poetry.dependencies]
python = "^3.12"
fastapi = "^0.110"
gspread = { version = ">=6,<7", extras = [] }
shared = { path = "../shared" }
"#;

    const POETRY_LOCK: &str = r#"
[[package]]
name = "fastapi"
version = "0.110.0"

[[package]]
name = "gspread"
version = "6.1.2"

[[package]]
name = "shared"
version = "0.1.0"

[metadata]
lock-version = "2.0"
content-hash = "0f3c"
"#;

    fn poetry_project(pyproject: &str) -> (MockFileSystem, ProjectManifest) {
        let fs = MockFileSystem::new();
        fs.add_file("pyproject.toml", pyproject);
        fs.add_file("poetry.lock", POETRY_LOCK);
        let manifest = detect(&fs, fs.root(), None).unwrap();
        (fs, manifest)
    }

    #[test]
    fn test_consistent_poetry_lock() {
        let (fs, manifest) = poetry_project(POETRY_PYPROJECT);
        assert_eq!(manifest.resolver, Resolver::Poetry);
        let report = verify_frozen(&fs, &manifest).unwrap();
        assert_eq!(report.declared, 3);
        assert!(report.unverified.is_empty());
    }

    #[test]
    fn test_poetry_constraint_outside_locked_version() {
        let (fs, manifest) = poetry_project(&POETRY_PYPROJECT.replace("^0.110", "^0.120"));
        match verify_frozen(&fs, &manifest).unwrap_err() {
            LockError::Inconsistent { changed, .. } => {
                assert_eq!(changed, vec!["fastapi ^0.120 (locked at 0.110.0)"]);
            }
            other => panic!("Expected Inconsistent, got {:?}", other),
        }
    }

    #[test]
    fn test_poetry_unevaluable_constraint_is_reported() {
        let (fs, manifest) = poetry_project(&POETRY_PYPROJECT.replace("^0.110", "~=0"));
        let report = verify_frozen(&fs, &manifest).unwrap();
        assert_eq!(report.unverified, vec!["fastapi ~=0"]);
    }

    #[test]
    fn test_corrupted_lock_is_malformed() {
        let (fs, manifest) = uv_project(PYPROJECT, Some("[[package]\nname = "));
        let err = verify_frozen(&fs, &manifest).unwrap_err();
        assert!(matches!(err, LockError::Malformed { .. }));
    }

    #[test]
    fn test_pip_pins() {
        let fs = MockFileSystem::new();
        fs.add_file("requirements.txt", "fastapi==0.110.0\nuvicorn==0.30.1\n");
        let manifest = detect(&fs, fs.root(), None).unwrap();
        let report = verify_frozen(&fs, &manifest).unwrap();
        assert_eq!(report.resolver, Resolver::Pip);
        assert_eq!(report.declared, 2);
    }

    #[test]
    fn test_pip_unpinned() {
        let fs = MockFileSystem::new();
        fs.add_file(
            "requirements.txt",
            "fastapi==0.110.0\nuvicorn>=0.30\ngspread\n-e ./shared\n",
        );
        let manifest = detect(&fs, fs.root(), None).unwrap();
        match verify_frozen(&fs, &manifest).unwrap_err() {
            LockError::Unpinned { unpinned, .. } => {
                assert_eq!(unpinned, vec!["uvicorn>=0.30", "gspread", "-e ./shared"]);
            }
            other => panic!("Expected Unpinned, got {:?}", other),
        }
    }

    #[test]
    fn test_error_messages() {
        let err = LockError::Inconsistent {
            path: PathBuf::from("uv.lock"),
            manifest: "pyproject.toml".to_string(),
            missing: vec!["a".to_string(), "b".to_string()],
            unexpected: vec![],
            changed: vec!["fastapi >=0.120 (locked for >=0.110)".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("missing [a, b]"));
        assert!(message.contains("changed [fastapi >=0.120 (locked for >=0.110)]"));
        assert!(message.contains("pyproject.toml"));
    }
}
