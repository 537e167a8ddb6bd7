//! Dependency manifest detection for Python projects
//!
//! Looks at the project directory to decide which resolver installs the dependency set
//! and collects the declared production dependencies:
//!
//! | Files present                           | Resolver |
//! |-----------------------------------------|----------|
//! | `uv.lock`                               | uv       |
//! | `poetry.lock` or `[tool.poetry]`        | Poetry   |
//! | `pyproject.toml` (no lock)              | uv       |
//! | `requirements.txt` only                 | pip      |
//!
//! A `pyproject.toml` without a lock still maps to uv so the frozen install fails loudly
//! instead of silently resolving fresh versions.

pub mod lock;
pub mod pyproject;
pub mod requirement;
pub mod version;

use crate::fs::FileSystem;
use crate::knobs::Resolver;
use pyproject::{normalize_python_version, PyProject};
use requirement::{parse_requirements_txt, Requirement, RequirementLine};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub use lock::{verify_frozen, LockError, LockFile, LockReport};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("No pyproject.toml or requirements.txt found in {0:?}")]
    NotFound(PathBuf),

    #[error("{resolver} expects {path:?}, which does not exist")]
    MissingFile { resolver: Resolver, path: PathBuf },

    #[error("Failed to read {path:?}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Failed to parse {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Declared dependency set of a project, plus where it came from
#[derive(Debug, Clone, Serialize)]
pub struct ProjectManifest {
    pub project_dir: PathBuf,
    pub resolver: Resolver,
    /// Path of the manifest relative to the project dir
    pub manifest_file: String,
    /// Lock file relative to the project dir, when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    pub dependencies: Vec<Requirement>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub optional_dependencies: Vec<Requirement>,
    /// Requirement and constraint files pulled in through `-r` / `-c`, relative to the
    /// project dir
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub included_files: Vec<String>,
    /// Editable (`-e`) entries of a requirements file
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub editables: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python_version: Option<String>,
    /// Whether the build context has a `.dockerignore`
    pub has_dockerignore: bool,
}

impl ProjectManifest {
    /// Files that must be present in the image before the install step runs
    pub fn install_inputs(&self) -> Vec<String> {
        let mut files = vec![self.manifest_file.clone()];
        files.extend(self.included_files.iter().cloned());
        if let Some(ref lock) = self.lock_file {
            files.push(lock.clone());
        }
        files
    }

    pub fn has_lock(&self) -> bool {
        self.lock_file.is_some()
    }
}

/// Detects the resolver and reads the manifest; `forced` skips detection
pub fn detect(
    fs: &dyn FileSystem,
    project_dir: &Path,
    forced: Option<Resolver>,
) -> Result<ProjectManifest, ManifestError> {
    let pyproject_path = project_dir.join("pyproject.toml");
    let requirements_path = project_dir.join("requirements.txt");

    let pyproject = if fs.is_file(&pyproject_path) {
        let content = read(fs, &pyproject_path)?;
        Some(PyProject::parse(&content).map_err(|e| ManifestError::Parse {
            path: pyproject_path.clone(),
            message: e.to_string(),
        })?)
    } else {
        None
    };

    let resolver = match forced {
        Some(resolver) => resolver,
        None => detect_resolver(fs, project_dir, pyproject.as_ref())?,
    };
    debug!("Resolver for {:?}: {}", project_dir, resolver);

    let has_dockerignore = fs.is_file(&project_dir.join(".dockerignore"));
    let python_version = read_python_version_file(fs, project_dir)
        .or_else(|| pyproject.as_ref().and_then(PyProject::python_version));

    let manifest = match resolver {
        Resolver::Uv | Resolver::Poetry => {
            let pyproject = pyproject.ok_or_else(|| ManifestError::MissingFile {
                resolver,
                path: pyproject_path.clone(),
            })?;
            let lock_name = resolver.lock_file().unwrap_or_default();
            let lock_file = fs
                .is_file(&project_dir.join(lock_name))
                .then(|| lock_name.to_string());
            ProjectManifest {
                project_dir: project_dir.to_path_buf(),
                resolver,
                manifest_file: "pyproject.toml".to_string(),
                lock_file,
                project_name: pyproject.name,
                dependencies: pyproject.dependencies,
                optional_dependencies: pyproject.optional_dependencies,
                included_files: Vec::new(),
                editables: Vec::new(),
                python_version,
                has_dockerignore,
            }
        }
        Resolver::Pip => {
            if !fs.is_file(&requirements_path) {
                return Err(ManifestError::MissingFile {
                    resolver,
                    path: requirements_path,
                });
            }
            let mut collected = CollectedRequirements::default();
            collect_requirements(fs, project_dir, "requirements.txt", &mut collected)?;
            ProjectManifest {
                project_dir: project_dir.to_path_buf(),
                resolver,
                manifest_file: "requirements.txt".to_string(),
                lock_file: None,
                project_name: pyproject.and_then(|p| p.name),
                dependencies: collected.requirements,
                optional_dependencies: Vec::new(),
                included_files: collected.files.into_iter().skip(1).collect(),
                editables: collected.editables,
                python_version,
                has_dockerignore,
            }
        }
    };

    info!(
        "Detected {} project with {} declared dependencies",
        manifest.resolver,
        manifest.dependencies.len()
    );
    Ok(manifest)
}

fn detect_resolver(
    fs: &dyn FileSystem,
    project_dir: &Path,
    pyproject: Option<&PyProject>,
) -> Result<Resolver, ManifestError> {
    if fs.is_file(&project_dir.join("uv.lock")) {
        return Ok(Resolver::Uv);
    }
    if fs.is_file(&project_dir.join("poetry.lock")) || pyproject.map_or(false, |p| p.is_poetry) {
        return Ok(Resolver::Poetry);
    }
    if pyproject.map_or(false, PyProject::declares_project) {
        return Ok(Resolver::Uv);
    }
    if fs.is_file(&project_dir.join("requirements.txt")) {
        return Ok(Resolver::Pip);
    }
    if pyproject.is_some() {
        return Ok(Resolver::Uv);
    }
    Err(ManifestError::NotFound(project_dir.to_path_buf()))
}

#[derive(Default)]
struct CollectedRequirements {
    requirements: Vec<Requirement>,
    editables: Vec<String>,
    /// Visited files in order, relative to the project dir
    files: Vec<String>,
}

fn collect_requirements(
    fs: &dyn FileSystem,
    project_dir: &Path,
    rel_path: &str,
    collected: &mut CollectedRequirements,
) -> Result<(), ManifestError> {
    let rel_path = normalize_relative(rel_path);
    if collected.files.contains(&rel_path) {
        return Ok(());
    }
    collected.files.push(rel_path.clone());

    let path = project_dir.join(&rel_path);
    if !fs.is_file(&path) {
        return Err(ManifestError::MissingFile {
            resolver: Resolver::Pip,
            path,
        });
    }
    let content = read(fs, &path)?;
    let base = Path::new(&rel_path)
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_default();

    let mut seen: HashSet<String> = collected
        .requirements
        .iter()
        .map(|r| r.normalized.clone())
        .collect();
    for line in parse_requirements_txt(&content) {
        match line {
            RequirementLine::Requirement(req) => {
                if seen.insert(req.normalized.clone()) {
                    collected.requirements.push(req);
                }
            }
            RequirementLine::Include(target) => {
                let nested = base.join(target);
                collect_requirements(fs, project_dir, &nested.to_string_lossy(), collected)?;
                seen.extend(collected.requirements.iter().map(|r| r.normalized.clone()));
            }
            RequirementLine::Constraint(target) => {
                let constraint = normalize_relative(&base.join(target).to_string_lossy());
                if !fs.is_file(&project_dir.join(&constraint)) {
                    return Err(ManifestError::MissingFile {
                        resolver: Resolver::Pip,
                        path: project_dir.join(constraint),
                    });
                }
                if !collected.files.contains(&constraint) {
                    collected.files.push(constraint);
                }
            }
            RequirementLine::Editable(target) => collected.editables.push(target),
        }
    }
    Ok(())
}

fn normalize_relative(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn read_python_version_file(fs: &dyn FileSystem, project_dir: &Path) -> Option<String> {
    for name in [".python-version", "runtime.txt"] {
        let path = project_dir.join(name);
        if let Ok(content) = fs.read_to_string(&path) {
            let first = content.lines().next().unwrap_or("").trim();
            if let Some(version) = normalize_python_version(first.trim_start_matches("python-")) {
                return Some(version);
            }
        }
    }
    None
}

fn read(fs: &dyn FileSystem, path: &Path) -> Result<String, ManifestError> {
    fs.read_to_string(path).map_err(|e| ManifestError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
