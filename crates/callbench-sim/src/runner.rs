//! Peer process runner: spawns caller and callee in the background and
//! waits for them.
//!
//! Each role is bound to its own [`ExecutionTarget`]. The runner never looks
//! at peer output; the command text redirects it into a per-run log.

use std::process::Child;
use std::time::{Duration, Instant};

use callbench_common::models::PeerRole;
use callbench_common::{CallbenchError, Result};

use crate::exec::ExecutionTarget;

/// How long a timed-out peer gets between SIGTERM and SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A running peer. Consumed by [`PeerProcessRunner::wait`].
#[derive(Debug)]
pub struct PeerProcessHandle {
    role: PeerRole,
    child: Child,
    started_at: Instant,
}

impl PeerProcessHandle {
    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }
}

/// Terminal status of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerExit {
    pub role: PeerRole,
    /// Exit code, `None` when the process died from a signal.
    pub code: Option<i32>,
    pub elapsed: Duration,
}

impl PeerExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub struct PeerProcessRunner {
    caller: Box<dyn ExecutionTarget>,
    callee: Box<dyn ExecutionTarget>,
    timeout: Option<Duration>,
}

impl PeerProcessRunner {
    pub fn new(caller: Box<dyn ExecutionTarget>, callee: Box<dyn ExecutionTarget>) -> Self {
        Self {
            caller,
            callee,
            timeout: None,
        }
    }

    /// Bounds every [`wait`](Self::wait); peers still running afterwards are killed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn target(&self, role: PeerRole) -> &dyn ExecutionTarget {
        match role {
            PeerRole::Caller => self.caller.as_ref(),
            PeerRole::Callee => self.callee.as_ref(),
        }
    }

    /// Starts `command` on the role's target without blocking.
    pub fn spawn_background(&self, command: &str, role: PeerRole) -> Result<PeerProcessHandle> {
        let target = self.target(role);
        let child = target.run_background(command)?;
        tracing::info!(%role, pid = child.id(), target_label = target.label(), "peer started");
        Ok(PeerProcessHandle {
            role,
            child,
            started_at: Instant::now(),
        })
    }

    /// Blocks until the peer exits (or the timeout elapses).
    pub fn wait(&self, handle: PeerProcessHandle) -> Result<PeerExit> {
        let PeerProcessHandle {
            role,
            mut child,
            started_at,
        } = handle;

        let status = match self.timeout {
            None => child.wait()?,
            Some(timeout) => match wait_until(&mut child, started_at + timeout)? {
                Some(status) => status,
                None => {
                    tracing::warn!(%role, ?timeout, "peer did not exit in time, terminating");
                    terminate(&mut child);
                    return Err(CallbenchError::PeerTimeout { role, timeout });
                }
            },
        };

        let exit = PeerExit {
            role,
            code: status.code(),
            elapsed: started_at.elapsed(),
        };
        if exit.success() {
            tracing::info!(%role, elapsed_s = exit.elapsed.as_secs_f64(), "peer exited");
        } else {
            tracing::warn!(%role, code = ?exit.code, "peer exited with failure");
        }
        Ok(exit)
    }

    /// Terminates a peer whose session has already failed.
    pub fn abort(&self, handle: PeerProcessHandle) {
        let PeerProcessHandle {
            role, mut child, ..
        } = handle;
        tracing::warn!(%role, pid = child.id(), "aborting peer");
        terminate(&mut child);
    }
}

/// Polls `child` until it exits or `deadline` passes.
fn wait_until(child: &mut Child, deadline: Instant) -> Result<Option<std::process::ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// SIGTERM first so `sudo`/`ssh` wrappers can relay it, then SIGKILL.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        let pid = child.id() as libc::pid_t;
        // SAFETY: `pid` is our own child which has not been reaped yet, so the
        // id cannot have been recycled. A failed kill is harmless.
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
        if let Ok(Some(_)) = wait_until(child, Instant::now() + TERM_GRACE) {
            return;
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}
