//! Where commands run: locally, inside a network namespace, or on a remote
//! peer over SSH.
//!
//! Commands are shell snippets (`sh -c`), so redirections and `&&` chains in
//! them behave the same on every target.

use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use callbench_common::{CallbenchError, Result};

/// Captured result of a synchronous command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turns a non-zero exit into an [`CallbenchError::ExternalTool`].
    pub fn check(self, tool: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(CallbenchError::external(
                tool,
                format!("exit {:?}: {}", self.code, self.stderr.trim()),
            ))
        }
    }

    fn from_output(out: std::process::Output) -> Self {
        Self {
            code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        }
    }
}

/// A place peer-side commands can be executed.
pub trait ExecutionTarget: Send {
    /// Human-readable name used in logs and errors.
    fn label(&self) -> &str;

    /// Runs `command` to completion and captures its output.
    fn run_sync(&self, command: &str) -> Result<CommandOutput>;

    /// Starts `command` without waiting for it, in a new process group so a
    /// terminal interrupt reaches only the harness.
    fn run_background(&self, command: &str) -> Result<Child>;

    /// Copies `path` from this target to the same path locally.
    /// A no-op for local targets.
    fn fetch_artifact(&self, path: &Path) -> Result<()>;

    fn is_remote(&self) -> bool {
        false
    }
}

// ── Local ───────────────────────────────────────────────────────────

/// Runs commands on this host, optionally wrapped in `ip netns exec`.
#[derive(Debug, Clone)]
pub struct LocalTarget {
    label: String,
    wrapper: Vec<String>,
}

impl LocalTarget {
    pub fn new() -> Self {
        Self {
            label: "local".into(),
            wrapper: Vec::new(),
        }
    }

    /// Runs as root on this host.
    pub fn privileged() -> Self {
        Self {
            label: "local:root".into(),
            wrapper: vec!["sudo".to_string()],
        }
    }

    /// Runs as root inside network namespace `ns`.
    pub fn in_namespace(ns: &str) -> Self {
        Self {
            label: format!("netns:{ns}"),
            wrapper: ["sudo", "ip", "netns", "exec", ns]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Runs inside network namespace `ns`, dropping back to `user`.
    pub fn in_namespace_as(ns: &str, user: &str) -> Self {
        let mut target = Self::in_namespace(ns);
        target.label = format!("netns:{ns}:{user}");
        target
            .wrapper
            .extend(["sudo", "-u", user].iter().map(|s| s.to_string()));
        target
    }

    fn command(&self, snippet: &str) -> Command {
        let mut cmd = match self.wrapper.split_first() {
            Some((program, args)) => {
                let mut cmd = Command::new(program);
                cmd.args(args).arg("sh");
                cmd
            }
            None => Command::new("sh"),
        };
        cmd.arg("-c").arg(snippet);
        cmd
    }
}

impl Default for LocalTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTarget for LocalTarget {
    fn label(&self) -> &str {
        &self.label
    }

    fn run_sync(&self, command: &str) -> Result<CommandOutput> {
        tracing::debug!(target_label = %self.label, cmd = %command, "exec");
        let out = self.command(command).stdin(Stdio::null()).output()?;
        Ok(CommandOutput::from_output(out))
    }

    fn run_background(&self, command: &str) -> Result<Child> {
        tracing::debug!(target_label = %self.label, cmd = %command, "exec (background)");
        Ok(self
            .command(command)
            .stdin(Stdio::null())
            .process_group(0)
            .spawn()?)
    }

    fn fetch_artifact(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

// ── SSH ─────────────────────────────────────────────────────────────

/// `ssh` exits with 255 when the connection itself failed.
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Runs commands on a remote peer via `ssh host 'cd workdir && …'`.
#[derive(Debug, Clone)]
pub struct SshTarget {
    label: String,
    host: String,
    workdir: String,
}

impl SshTarget {
    pub fn new(host: &str, workdir: &str) -> Self {
        Self {
            label: format!("ssh:{host}"),
            host: host.to_string(),
            workdir: workdir.to_string(),
        }
    }

    fn command(&self, snippet: &str) -> Command {
        let remote = format!("cd {} && {}", shell_quote(&self.workdir), snippet);
        let mut cmd = Command::new("ssh");
        cmd.args(["-o", "BatchMode=yes"]).arg(&self.host).arg(remote);
        cmd
    }
}

impl ExecutionTarget for SshTarget {
    fn label(&self) -> &str {
        &self.label
    }

    fn run_sync(&self, command: &str) -> Result<CommandOutput> {
        tracing::debug!(target_label = %self.label, cmd = %command, "exec");
        let out = self
            .command(command)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CallbenchError::transport(&self.host, e.to_string()))?;
        let out = CommandOutput::from_output(out);
        if out.code == Some(SSH_TRANSPORT_FAILURE) {
            return Err(CallbenchError::transport(&self.host, out.stderr.trim()));
        }
        Ok(out)
    }

    fn run_background(&self, command: &str) -> Result<Child> {
        tracing::debug!(target_label = %self.label, cmd = %command, "exec (background)");
        self.command(command)
            .stdin(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| CallbenchError::transport(&self.host, e.to_string()))
    }

    fn fetch_artifact(&self, path: &Path) -> Result<()> {
        let remote = path.to_string_lossy();
        // Relative paths are relative to the remote workdir.
        let source = if path.is_absolute() {
            format!("{}:{}", self.host, remote)
        } else {
            format!("{}:{}/{}", self.host, self.workdir, remote)
        };
        tracing::debug!(%source, "fetching artifact");
        let out = Command::new("scp")
            .args(["-q", "-o", "BatchMode=yes"])
            .arg(&source)
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CallbenchError::transport(&self.host, e.to_string()))?;
        if !out.status.success() {
            return Err(CallbenchError::transport(
                &self.host,
                format!(
                    "scp {source} failed: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                ),
            ));
        }
        Ok(())
    }

    fn is_remote(&self) -> bool {
        true
    }
}

/// Single-quotes `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Login name of the invoking user, resolved once at startup.
pub fn current_user() -> Result<String> {
    if let Ok(user) = std::env::var("SUDO_USER").or_else(|_| std::env::var("USER")) {
        if !user.is_empty() {
            return Ok(user);
        }
    }
    let out = LocalTarget::new().run_sync("whoami")?.check("whoami")?;
    Ok(out.stdout.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_leaves_plain_words_alone() {
        assert_eq!(shell_quote("out/a_b.pcm"), "out/a_b.pcm");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn local_run_sync_captures_output() {
        let out = LocalTarget::new()
            .run_sync("echo hello && echo oops >&2")
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.stderr, "oops\n");
    }

    #[test]
    fn nonzero_exit_becomes_external_tool_error() {
        let out = LocalTarget::new().run_sync("exit 3").unwrap();
        assert_eq!(out.code, Some(3));
        let err = out.check("tc").unwrap_err();
        assert!(matches!(err, CallbenchError::ExternalTool { ref tool, .. } if tool == "tc"));
    }

    #[test]
    fn background_commands_lead_their_own_group() {
        let mut child = LocalTarget::new().run_background("sleep 5").unwrap();
        let pid = child.id() as libc::pid_t;
        // SAFETY: plain queries on our own unreaped child.
        let (group, ours) = unsafe { (libc::getpgid(pid), libc::getpgrp()) };
        assert_eq!(group, pid);
        assert_ne!(group, ours);
        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn namespace_wrapper_prefixes_sudo() {
        let t = LocalTarget::in_namespace_as("client1", "alice");
        assert_eq!(t.label(), "netns:client1:alice");
        let cmd = t.command("true");
        assert_eq!(cmd.get_program(), "sudo");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            ["ip", "netns", "exec", "client1", "sudo", "-u", "alice", "sh", "-c", "true"]
        );
    }

    #[test]
    fn ssh_command_changes_into_workdir() {
        let t = SshTarget::new("peer.example", "suite dir");
        assert!(t.is_remote());
        let cmd = t.command("ls");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args.last().unwrap(), "cd 'suite dir' && ls");
    }
}
