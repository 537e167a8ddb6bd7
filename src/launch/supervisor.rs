//! Minimal init process for one ASGI server
//!
//! Signal streams are registered before the child is spawned so nothing sent during
//! startup is lost. Forwarded signals go to the child, or to its whole process group
//! when it runs in one. A terminating signal arms the grace timer; if the child is
//! still alive when it fires, it is killed. Every `SIGCHLD` reaps all exited
//! descendants, and the supervisor returns once its own child is among them.

use super::command::LaunchCommand;
use super::env::{LaunchEnv, LaunchError};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// Time between the first terminating signal and `SIGKILL`
    pub grace_period: Duration,
    /// Run the child in its own process group and signal the whole group
    pub process_group: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(10),
            process_group: false,
        }
    }
}

/// How the supervised child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit status to report: the child's code, or `128 + signal`
    pub code: i32,
    /// Signal that killed the child, if any
    pub signal: Option<i32>,
}

impl ExitOutcome {
    pub fn from_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(Self { code, signal: None }),
            WaitStatus::Signaled(_, sig, _) => Some(Self {
                code: 128 + sig as i32,
                signal: Some(sig as i32),
            }),
            _ => None,
        }
    }
}

/// Signals that start the grace period in addition to being forwarded
pub fn is_terminating(sig: Signal) -> bool {
    matches!(sig, Signal::SIGTERM | Signal::SIGINT | Signal::SIGQUIT)
}

struct SignalSet {
    term: tokio::signal::unix::Signal,
    int: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
    hup: tokio::signal::unix::Signal,
    usr1: tokio::signal::unix::Signal,
    usr2: tokio::signal::unix::Signal,
    child: tokio::signal::unix::Signal,
}

enum Event {
    Forward(Signal),
    Child,
}

impl SignalSet {
    fn register() -> Result<Self, LaunchError> {
        let listen = |kind: SignalKind| signal(kind).map_err(LaunchError::Signals);
        Ok(Self {
            term: listen(SignalKind::terminate())?,
            int: listen(SignalKind::interrupt())?,
            quit: listen(SignalKind::quit())?,
            hup: listen(SignalKind::hangup())?,
            usr1: listen(SignalKind::user_defined1())?,
            usr2: listen(SignalKind::user_defined2())?,
            child: listen(SignalKind::child())?,
        })
    }

    async fn next(&mut self) -> Event {
        tokio::select! {
            _ = self.child.recv() => Event::Child,
            _ = self.term.recv() => Event::Forward(Signal::SIGTERM),
            _ = self.int.recv() => Event::Forward(Signal::SIGINT),
            _ = self.quit.recv() => Event::Forward(Signal::SIGQUIT),
            _ = self.hup.recv() => Event::Forward(Signal::SIGHUP),
            _ = self.usr1.recv() => Event::Forward(Signal::SIGUSR1),
            _ = self.usr2.recv() => Event::Forward(Signal::SIGUSR2),
        }
    }
}

/// Registers as child subreaper so orphaned grandchildren are reparented to us
#[cfg(target_os = "linux")]
fn become_subreaper() {
    if nix::unistd::getpid().as_raw() == 1 {
        return;
    }
    match nix::sys::prctl::set_child_subreaper(true) {
        Ok(()) => debug!("Registered as child subreaper"),
        Err(e) => warn!("Could not register as child subreaper: {}", e),
    }
}

#[cfg(not(target_os = "linux"))]
fn become_subreaper() {}

/// Reaps every exited child; returns the main child's outcome if it was among them
fn reap(main: Pid) -> Option<ExitOutcome> {
    let mut outcome = None;
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(status) => {
                if status.pid() == Some(main) {
                    outcome = ExitOutcome::from_status(status).or(outcome);
                } else {
                    debug!("Reaped orphaned process: {:?}", status);
                }
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => break,
            Err(e) => {
                warn!("waitpid failed: {}", e);
                break;
            }
        }
    }
    outcome
}

fn send(target: Pid, sig: Signal) {
    match kill(target, sig) {
        Ok(()) => debug!("Sent {} to {}", sig, target),
        Err(Errno::ESRCH) => debug!("{} already gone, {} not delivered", target, sig),
        Err(e) => warn!("Failed to send {} to {}: {}", sig, target, e),
    }
}

/// Spawns `command` and supervises it until it exits
pub async fn supervise(
    command: &LaunchCommand,
    env: &LaunchEnv,
    options: &SupervisorOptions,
) -> Result<ExitOutcome, LaunchError> {
    let mut signals = SignalSet::register()?;
    become_subreaper();

    let child = command
        .to_command(env, options.process_group)
        .spawn()
        .map_err(|source| LaunchError::Spawn {
            program: command.program.clone(),
            source,
        })?;
    // Reaping goes through waitpid(-1), so only the pid of the std handle is kept
    let pid = Pid::from_raw(child.id() as i32);

    let target = if options.process_group {
        Pid::from_raw(-pid.as_raw())
    } else {
        pid
    };
    info!("Started {} (pid {})", command, pid);

    let mut deadline: Option<Instant> = None;
    loop {
        if let Some(outcome) = reap(pid) {
            info!("Child {} exited with status {}", pid, outcome.code);
            return Ok(outcome);
        }

        let grace = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            event = signals.next() => match event {
                Event::Child => {}
                Event::Forward(sig) => {
                    info!("Forwarding {} to {}", sig, target);
                    send(target, sig);
                    if is_terminating(sig) && deadline.is_none() {
                        debug!("Grace period of {:?} started", options.grace_period);
                        deadline = Some(Instant::now() + options.grace_period);
                    }
                }
            },
            _ = grace => {
                warn!(
                    "Child {} still running {:?} after shutdown signal, sending SIGKILL",
                    pid, options.grace_period
                );
                send(target, Signal::SIGKILL);
                deadline = None;
            }
        }
    }
}
