//! Impairment profiles and the builder that accumulates them.
//!
//! A profile is an ordered list of `tc netem` directives plus an optional
//! token-bucket rate cap. Directives keep the order they were added in, which
//! is also the order they appear on the `tc` command line.

use std::fmt;
use std::sync::LazyLock;

use callbench_common::{CallbenchError, Result};
use regex::Regex;

/// `tbf` burst buffer in bytes.
pub const TBF_BUFFER: u32 = 1600;
/// `tbf` queue limit in bytes.
pub const TBF_LIMIT: u32 = 3000;

static RATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)\d+(\.\d+)?([kmgt]?bit|[kmgt]?bps)$").expect("static regex")
});

// ── Directives ──────────────────────────────────────────────────────

/// One `tc netem` parameter group.
#[derive(Debug, Clone, PartialEq)]
pub enum NetemDirective {
    Loss {
        percent: f64,
        correlation: f64,
    },
    Delay {
        ms: u32,
        jitter_ms: u32,
        correlation: f64,
    },
    Reorder {
        percent: f64,
        correlation: f64,
    },
    Duplicate {
        percent: f64,
        correlation: f64,
    },
}

impl NetemDirective {
    /// Short label appended to the session name.
    pub fn tag(&self) -> String {
        match self {
            NetemDirective::Loss {
                percent,
                correlation,
            } => format!("loss{percent}-{correlation}"),
            NetemDirective::Delay {
                ms,
                jitter_ms,
                correlation,
            } => format!("delay{ms}-{jitter_ms}-{correlation}"),
            NetemDirective::Reorder {
                percent,
                correlation,
            } => format!("reorder{percent}-{correlation}"),
            NetemDirective::Duplicate {
                percent,
                correlation,
            } => format!("dup{percent}-{correlation}"),
        }
    }

    fn validate(&self) -> Result<()> {
        let (what, values): (&str, [f64; 2]) = match self {
            NetemDirective::Loss {
                percent,
                correlation,
            } => ("loss", [*percent, *correlation]),
            NetemDirective::Delay { correlation, .. } => ("delay", [0.0, *correlation]),
            NetemDirective::Reorder {
                percent,
                correlation,
            } => ("reorder", [*percent, *correlation]),
            NetemDirective::Duplicate {
                percent,
                correlation,
            } => ("duplicate", [*percent, *correlation]),
        };
        if values.iter().any(|v| !(0.0..=100.0).contains(v)) {
            return Err(CallbenchError::Validation(format!(
                "{what} percentages must be within 0..=100, got {values:?}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for NetemDirective {
    /// Renders the directive as `tc netem` arguments.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetemDirective::Loss {
                percent,
                correlation,
            } => write!(f, "loss {percent}% {correlation}%"),
            NetemDirective::Delay {
                ms,
                jitter_ms,
                correlation,
            } => write!(
                f,
                "delay {ms}ms {jitter_ms}ms {correlation}% distribution normal"
            ),
            NetemDirective::Reorder {
                percent,
                correlation,
            } => write!(f, "reorder {percent}% {correlation}%"),
            NetemDirective::Duplicate {
                percent,
                correlation,
            } => write!(f, "duplicate {percent}% {correlation}%"),
        }
    }
}

/// Token-bucket cap layered under netem as a child qdisc.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandwidthCap {
    /// `tc` rate string, e.g. `20kbit`.
    pub rate: String,
    pub buffer: u32,
    pub limit: u32,
}

impl BandwidthCap {
    pub fn new(rate: &str) -> Result<Self> {
        let rate = rate.trim();
        if !RATE_RE.is_match(rate) {
            return Err(CallbenchError::Validation(format!(
                "invalid rate {rate:?}, expected e.g. 20kbit"
            )));
        }
        Ok(Self {
            rate: rate.to_string(),
            buffer: TBF_BUFFER,
            limit: TBF_LIMIT,
        })
    }

    pub fn tag(&self) -> String {
        format!("rate{}", self.rate)
    }
}

// ── Profile ─────────────────────────────────────────────────────────

/// `tc` commands that install and remove one profile on an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionPair {
    pub apply: String,
    pub undo: String,
}

/// One immutable network condition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImpairmentProfile {
    directives: Vec<NetemDirective>,
    bandwidth: Option<BandwidthCap>,
}

impl ImpairmentProfile {
    /// True for a profile that leaves the link untouched.
    pub fn is_empty(&self) -> bool {
        self.directives.is_empty() && self.bandwidth.is_none()
    }

    pub fn directives(&self) -> &[NetemDirective] {
        &self.directives
    }

    pub fn bandwidth(&self) -> Option<&BandwidthCap> {
        self.bandwidth.as_ref()
    }

    /// Space-separated netem arguments in insertion order.
    pub fn netem_args(&self) -> String {
        self.directives
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Renders the apply/undo commands for `dev`, or `None` for an empty profile.
    ///
    /// With a rate cap the netem root and its `tbf` child are created in one
    /// composite command and torn down together by deleting the root.
    pub fn instructions(&self, dev: &str) -> Option<InstructionPair> {
        if self.is_empty() {
            return None;
        }
        let netem = format!("tc qdisc add dev {dev} root handle 1:0 netem {}", self.netem_args());
        let apply = match &self.bandwidth {
            Some(cap) => format!(
                "{} && tc qdisc add dev {dev} parent 1:1 handle 10: tbf rate {} buffer {} limit {}",
                netem.trim_end(),
                cap.rate,
                cap.buffer,
                cap.limit
            ),
            None => format!("tc qdisc add dev {dev} root netem {}", self.netem_args()),
        };
        Some(InstructionPair {
            apply,
            undo: format!("tc qdisc del dev {dev} root"),
        })
    }
}

// ── Builder ─────────────────────────────────────────────────────────

/// Accumulates directives for the segment currently being described.
///
/// Every call consumes the builder and hands back the updated one.
#[derive(Debug, Clone, Default)]
pub struct ProfileBuilder {
    directives: Vec<NetemDirective>,
    bandwidth: Option<BandwidthCap>,
}

impl ProfileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty() && self.bandwidth.is_none()
    }

    /// Adds a directive after validating it against this segment.
    pub fn with(mut self, directive: NetemDirective) -> Result<Self> {
        directive.validate()?;
        if matches!(directive, NetemDirective::Reorder { .. }) && !self.has_delay() {
            return Err(CallbenchError::Validation(
                "reordering requires a delay earlier in the same segment".into(),
            ));
        }
        self.directives.push(directive);
        Ok(self)
    }

    pub fn loss(self, percent: f64, correlation: f64) -> Result<Self> {
        self.with(NetemDirective::Loss {
            percent,
            correlation,
        })
    }

    pub fn delay(self, ms: u32, jitter_ms: u32, correlation: f64) -> Result<Self> {
        self.with(NetemDirective::Delay {
            ms,
            jitter_ms,
            correlation,
        })
    }

    pub fn reordering(self, percent: f64, correlation: f64) -> Result<Self> {
        self.with(NetemDirective::Reorder {
            percent,
            correlation,
        })
    }

    pub fn duplication(self, percent: f64, correlation: f64) -> Result<Self> {
        self.with(NetemDirective::Duplicate {
            percent,
            correlation,
        })
    }

    /// Caps the segment's bandwidth. Only one cap per segment.
    pub fn rate_control(mut self, cap: BandwidthCap) -> Result<Self> {
        if let Some(existing) = &self.bandwidth {
            return Err(CallbenchError::Validation(format!(
                "segment already rate-limited to {}",
                existing.rate
            )));
        }
        self.bandwidth = Some(cap);
        Ok(self)
    }

    /// Freezes the accumulated directives into a profile.
    pub fn emit(self) -> ImpairmentProfile {
        ImpairmentProfile {
            directives: self.directives,
            bandwidth: self.bandwidth,
        }
    }

    fn has_delay(&self) -> bool {
        self.directives
            .iter()
            .any(|d| matches!(d, NetemDirective::Delay { .. }))
    }
}
