//! Error taxonomy shared by every callbench crate.
//!
//! Every variant aborts only the session that produced it. The outer driver
//! decides whether to continue with the next session.

use std::time::Duration;

use thiserror::Error;

use crate::models::PeerRole;

#[derive(Debug, Error)]
pub enum CallbenchError {
    /// Session lifecycle misuse (e.g. `start()` while a session is open).
    #[error("illegal session state: {0}")]
    IllegalState(String),

    /// Invalid combination of impairment conditions.
    #[error("invalid conditions: {0}")]
    Validation(String),

    /// The connection broker was unreachable or reported failure.
    #[error("connection broker error: {0}")]
    Provider(String),

    /// `tc`, a rater, or another local tool exited non-zero or produced
    /// unparseable output.
    #[error("external tool `{tool}` failed: {detail}")]
    ExternalTool { tool: String, detail: String },

    /// Executing a command on a remote peer failed.
    #[error("transport to {target} failed: {detail}")]
    Transport { target: String, detail: String },

    /// No two samples satisfy the pairing rule.
    #[error("no suitable sample pair: {0}")]
    NoSuitablePair(String),

    /// A peer process did not exit in time and was killed.
    #[error("{role} peer did not exit within {timeout:?}")]
    PeerTimeout { role: PeerRole, timeout: Duration },

    #[error("config error: {0}")]
    Config(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CallbenchError {
    pub fn external(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        CallbenchError::ExternalTool {
            tool: tool.into(),
            detail: detail.into(),
        }
    }

    pub fn transport(target: impl Into<String>, detail: impl Into<String>) -> Self {
        CallbenchError::Transport {
            target: target.into(),
            detail: detail.into(),
        }
    }

    /// Provider failures are the only ones the CLI reflects in its exit status.
    pub fn is_provider(&self) -> bool {
        matches!(self, CallbenchError::Provider(_))
    }
}

pub type Result<T, E = CallbenchError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failing_tool() {
        let err = CallbenchError::external("tc", "RTNETLINK answers: File exists");
        assert_eq!(
            err.to_string(),
            "external tool `tc` failed: RTNETLINK answers: File exists"
        );
    }

    #[test]
    fn only_provider_errors_are_provider() {
        assert!(CallbenchError::Provider("not ok".into()).is_provider());
        assert!(!CallbenchError::Validation("x".into()).is_provider());
        assert!(!CallbenchError::transport("peer", "ssh exited 255").is_provider());
    }
}
