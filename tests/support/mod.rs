use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

#[allow(dead_code)]
pub fn asgipack_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.join("asgipack")
}

#[allow(dead_code)]
pub fn dockerfile_fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/dockerfiles")
        .join(name)
}

/// Runs the binary with ASGIPACK_* and logging variables cleared
#[allow(dead_code)]
pub fn run_asgipack(args: &[&str]) -> Output {
    asgipack_command()
        .args(args)
        .output()
        .expect("Failed to execute asgipack")
}

#[allow(dead_code)]
pub fn asgipack_command() -> Command {
    let mut command = Command::new(asgipack_binary());
    for (key, _) in std::env::vars() {
        if key.starts_with("ASGIPACK_") || key == "RUST_LOG" {
            command.env_remove(&key);
        }
    }
    command
}

#[allow(dead_code)]
pub const PYPROJECT: &str = r#"[project]
name = "rsvp"
version = "1.0.0"
requires-python = ">=3.12"
dependencies = ["fastapi>=0.110", "uvicorn>=0.30", "gspread>=6"]
"#;

#[allow(dead_code)]
pub const UV_LOCK: &str = r#"version = 1
requires-python = ">=3.12"

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

/// Writes a uv project (`lock` optional) with a small FastAPI app
#[allow(dead_code)]
pub fn write_uv_project(dir: &Path, pyproject: &str, lock: Option<&str>) {
    fs::write(dir.join("pyproject.toml"), pyproject).unwrap();
    if let Some(lock) = lock {
        fs::write(dir.join("uv.lock"), lock).unwrap();
    }
    fs::write(dir.join(".dockerignore"), ".venv\n.git\n__pycache__\n").unwrap();
    fs::write(
        dir.join("main.py"),
        "from fastapi import FastAPI\n\napp = FastAPI()\n",
    )
    .unwrap();
}
