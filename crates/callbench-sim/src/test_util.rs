use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};

use callbench_common::{CallbenchError, Result};

use crate::profile::ImpairmentProfile;
use crate::sequencer::ImpairmentSink;

/// Monotonically increasing counter for generating unique test resource names.
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Check whether we have sufficient privileges (root/sudo) and tools (`ip`)
/// available to create network namespaces. Returns `false` if the test
/// environment cannot support namespace-based impairment tests.
pub fn check_privileges() -> bool {
    match Command::new("sudo").args(["-n", "ip", "netns"]).output() {
        Ok(o) => o.status.success(),
        Err(_) => false,
    }
}

/// Unique namespace name with the given prefix, at most 15 characters.
pub fn unique_ns_name(prefix: &str) -> String {
    let seq = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = format!("{}_{:x}_{}", prefix, std::process::id() % 0xFFFF, seq);
    name.truncate(15);
    name
}

/// A throwaway network namespace, deleted on drop.
pub struct ScratchNamespace {
    pub name: String,
}

impl ScratchNamespace {
    pub fn new(name: &str) -> std::io::Result<Self> {
        let _ = Command::new("sudo")
            .args(["ip", "netns", "del", name])
            .output();
        let output = Command::new("sudo")
            .args(["ip", "netns", "add", name])
            .output()?;
        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "Failed to create netns: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let _ = Command::new("sudo")
            .args(["ip", "netns", "exec", name, "ip", "link", "set", "lo", "up"])
            .output();
        Ok(Self {
            name: name.to_string(),
        })
    }
}

impl Drop for ScratchNamespace {
    fn drop(&mut self) {
        let _ = Command::new("sudo")
            .args(["ip", "netns", "del", &self.name])
            .status();
    }
}

// ── Recording sink ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Apply(ImpairmentProfile),
    Undo(ImpairmentProfile),
}

impl SinkEvent {
    pub fn is_apply(&self) -> bool {
        matches!(self, SinkEvent::Apply(_))
    }
}

/// In-memory sink that records every call. `fail_apply_at` / `fail_undo_at`
/// make the n-th (0-based) apply or undo fail after being recorded.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<SinkEvent>,
    pub fail_apply_at: Option<usize>,
    pub fail_undo_at: Option<usize>,
    applies: usize,
    undos: usize,
}

impl RecordingSink {
    /// A sink whose `n`th apply (zero-based) fails after being recorded.
    pub fn failing_apply_at(n: usize) -> Self {
        Self {
            fail_apply_at: Some(n),
            ..Self::default()
        }
    }

    /// A sink whose `n`th undo (zero-based) fails after being recorded.
    pub fn failing_undo_at(n: usize) -> Self {
        Self {
            fail_undo_at: Some(n),
            ..Self::default()
        }
    }

    /// True when no profile remains installed.
    pub fn is_clean(&self) -> bool {
        let applied = self.events.iter().filter(|e| e.is_apply()).count();
        applied == self.events.len() - applied
    }
}

impl ImpairmentSink for RecordingSink {
    fn apply(&mut self, profile: &ImpairmentProfile) -> Result<()> {
        self.events.push(SinkEvent::Apply(profile.clone()));
        let n = self.applies;
        self.applies += 1;
        if self.fail_apply_at == Some(n) {
            return Err(CallbenchError::external("tc", "injected apply failure"));
        }
        Ok(())
    }

    fn undo(&mut self, profile: &ImpairmentProfile) -> Result<()> {
        self.events.push(SinkEvent::Undo(profile.clone()));
        let n = self.undos;
        self.undos += 1;
        if self.fail_undo_at == Some(n) {
            return Err(CallbenchError::external("tc", "injected undo failure"));
        }
        Ok(())
    }
}
