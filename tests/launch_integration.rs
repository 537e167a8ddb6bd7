//! Init supervisor integration tests
//!
//! `asgipack launch` reaps with `waitpid(-1)`, so it is only exercised as a separate
//! process here, never inside the test harness.

mod support;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serial_test::serial;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use support::asgipack_command;
use tempfile::TempDir;

fn launch(dir: &TempDir, port: Option<&str>, args: &[&str]) -> Command {
    let mut command = asgipack_command();
    command
        .current_dir(dir.path())
        .env_remove("HOST")
        .env_remove("PORT")
        .env_remove("GOOGLE_APPLICATION_CREDENTIALS")
        .arg("launch")
        .args(args);
    if let Some(port) = port {
        command.env("PORT", port);
    }
    command
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> ExitStatus {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() > deadline {
            child.kill().ok();
            panic!("asgipack launch did not exit within {:?}", timeout);
        }
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn test_exit_code_is_propagated() {
    let dir = TempDir::new().unwrap();
    let status = launch(&dir, None, &["--", "sh", "-c", "exit 3"])
        .stdout(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(3));
}

#[test]
fn test_child_sees_resolved_port() {
    let dir = TempDir::new().unwrap();
    let output = launch(&dir, Some("9090"), &["--", "sh", "-c", "echo \"$HOST:$PORT\""])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "0.0.0.0:9090");
}

#[test]
fn test_default_server_command_gets_port_argument() {
    let dir = TempDir::new().unwrap();
    let output = launch(
        &dir,
        Some("9090"),
        &["--server", "echo", "--app", "rsvp.api:app"],
    )
    .output()
    .unwrap();
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "rsvp.api:app --host 0.0.0.0 --port 9090"
    );
}

#[test]
fn test_default_port_from_config_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("asgipack.toml"), "[runtime]\nport = 8181\n").unwrap();
    let output = launch(&dir, None, &["--", "sh", "-c", "echo \"$PORT\""])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "8181");
}

#[test]
fn test_invalid_port_fails_before_spawn() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("started");
    let script = format!("touch {}", marker.display());
    let output = launch(&dir, Some("eighty"), &["--", "sh", "-c", &script])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("PORT"));
    assert!(!marker.exists());
}

#[test]
fn test_unreadable_credentials_fail_startup() {
    let dir = TempDir::new().unwrap();
    let output = launch(&dir, None, &["--", "true"])
        .env("GOOGLE_APPLICATION_CREDENTIALS", dir.path().join("missing.json"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("GOOGLE_APPLICATION_CREDENTIALS"));
}

#[test]
fn test_missing_program_exits_127() {
    let dir = TempDir::new().unwrap();
    let status = launch(&dir, None, &["--", "/nonexistent/asgi-server"])
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(127));
}

#[test]
#[serial]
fn test_sigterm_is_forwarded_for_clean_shutdown() {
    let dir = TempDir::new().unwrap();
    let mut child = launch(
        &dir,
        None,
        &[
            "--",
            "sh",
            "-c",
            "trap 'exit 0' TERM; while true; do sleep 0.1; done",
        ],
    )
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .spawn()
    .unwrap();

    thread::sleep(Duration::from_millis(500));
    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).unwrap();

    let status = wait_with_timeout(&mut child, Duration::from_secs(10));
    assert_eq!(status.code(), Some(0));
}

#[test]
#[serial]
fn test_child_ignoring_sigterm_is_killed_after_grace_period() {
    let dir = TempDir::new().unwrap();
    let mut child = launch(
        &dir,
        None,
        &[
            "--grace-period",
            "1",
            "--",
            "sh",
            "-c",
            "trap '' TERM; while true; do sleep 0.1; done",
        ],
    )
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .spawn()
    .unwrap();

    thread::sleep(Duration::from_millis(500));
    let sent = Instant::now();
    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).unwrap();

    let status = wait_with_timeout(&mut child, Duration::from_secs(10));
    assert_eq!(status.code(), Some(137));
    assert!(sent.elapsed() >= Duration::from_millis(900));
}

#[test]
#[serial]
fn test_process_group_receives_forwarded_signal() {
    let dir = TempDir::new().unwrap();
    let mut child = launch(
        &dir,
        None,
        &[
            "--process-group",
            "--",
            "sh",
            "-c",
            "trap 'exit 0' INT; while true; do sleep 0.1; done",
        ],
    )
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .spawn()
    .unwrap();

    thread::sleep(Duration::from_millis(500));
    kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).unwrap();

    let status = wait_with_timeout(&mut child, Duration::from_secs(10));
    assert_eq!(status.code(), Some(0));
}
