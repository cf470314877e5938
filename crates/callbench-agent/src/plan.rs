//! Run plan (`plan.toml`): which sessions to run, how often, and with which
//! sample pairing.
//!
//! ```toml
//! iterations = 2
//! one_way = "alternate"
//!
//! [[sessions]]
//! alias = "3GOutage"
//! network_type = "3g"
//! conditions = [
//!     { op = "loss", percent = 3, correlation = 10 },
//!     { op = "rate", rate = "64kbit" },
//!     { op = "after", secs = 3 },
//!     { op = "loss", percent = 20 },
//!     { op = "rate", rate = "8kbit" },
//! ]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use callbench_common::models::NetworkType;
use callbench_common::{CallbenchError, Result};

use crate::config::CONFIG_VERSION;
use crate::samples::{PairingPreference, SampleLength};
use crate::session::SessionSpec;

/// One condition call, in file order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Loss {
        #[serde(default = "defaults::loss_percent")]
        percent: f64,
        #[serde(default)]
        correlation: f64,
    },
    Delay {
        #[serde(default = "defaults::delay_ms")]
        ms: u32,
        #[serde(default = "defaults::delay_jitter_ms")]
        jitter_ms: u32,
        #[serde(default = "defaults::delay_correlation")]
        correlation: f64,
    },
    Reorder {
        #[serde(default = "defaults::reorder_percent")]
        percent: f64,
        #[serde(default = "defaults::reorder_correlation")]
        correlation: f64,
    },
    Duplicate {
        #[serde(default = "defaults::duplicate_percent")]
        percent: f64,
        #[serde(default)]
        correlation: f64,
    },
    Rate {
        #[serde(default = "defaults::rate")]
        rate: String,
    },
    After {
        secs: f64,
    },
}

/// Argument defaults of the condition calls.
pub mod defaults {
    pub fn loss_percent() -> f64 {
        30.0
    }
    pub fn delay_ms() -> u32 {
        300
    }
    pub fn delay_jitter_ms() -> u32 {
        10
    }
    pub fn delay_correlation() -> f64 {
        5.0
    }
    pub fn reorder_percent() -> f64 {
        30.0
    }
    pub fn reorder_correlation() -> f64 {
        25.0
    }
    pub fn duplicate_percent() -> f64 {
        30.0
    }
    pub fn rate() -> String {
        "10kbit".into()
    }
}

impl Condition {
    /// Feeds this condition into `spec`.
    pub fn apply_to(&self, spec: SessionSpec) -> Result<SessionSpec> {
        match self {
            Condition::Loss {
                percent,
                correlation,
            } => spec.loss(*percent, *correlation),
            Condition::Delay {
                ms,
                jitter_ms,
                correlation,
            } => spec.delay(*ms, *jitter_ms, *correlation),
            Condition::Reorder {
                percent,
                correlation,
            } => spec.reordering(*percent, *correlation),
            Condition::Duplicate {
                percent,
                correlation,
            } => spec.duplication(*percent, *correlation),
            Condition::Rate { rate } => spec.rate_control(rate),
            Condition::After { secs } => {
                let hold = Duration::try_from_secs_f64(*secs).map_err(|_| {
                    CallbenchError::Validation(format!("invalid hold of {secs} seconds"))
                })?;
                Ok(spec.after(hold))
            }
        }
    }
}

/// When the callee plays silence instead of a second sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OneWayMode {
    #[default]
    Never,
    Always,
    /// One-way on even iterations, two-way on odd ones.
    Alternate,
}

impl OneWayMode {
    pub fn for_iteration(self, i: usize) -> bool {
        match self {
            OneWayMode::Never => false,
            OneWayMode::Always => true,
            OneWayMode::Alternate => i % 2 == 0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionPlanInput {
    pub alias: Option<String>,
    pub network_type: Option<NetworkType>,
    pub conditions: Vec<Condition>,
    pub caller_sample: Option<PathBuf>,
    pub callee_sample: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunPlanInput {
    pub version: u32,
    pub iterations: Option<usize>,
    pub one_way: OneWayMode,
    pub sample_length: Option<SampleLength>,
    /// Subset of configured entries; empty means all.
    pub entries: Vec<String>,
    pub sessions: Vec<SessionPlanInput>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionPlan {
    pub alias: Option<String>,
    pub network_type: Option<NetworkType>,
    pub conditions: Vec<Condition>,
    pub samples: Option<(PathBuf, PathBuf)>,
}

impl SessionPlan {
    /// Builds the spec for this session, validating every condition.
    pub fn to_spec(&self) -> Result<SessionSpec> {
        let mut spec = SessionSpec::new();
        if let Some(t) = self.network_type {
            spec = spec.network_type(t);
        }
        if let Some(alias) = &self.alias {
            spec = spec.network_alias(alias);
        }
        for c in &self.conditions {
            spec = c.apply_to(spec)?;
        }
        if let Some((caller, callee)) = &self.samples {
            spec = spec.samples(caller.clone(), callee.clone());
        }
        Ok(spec)
    }
}

#[derive(Debug, Clone)]
pub struct RunPlan {
    pub iterations: usize,
    pub one_way: OneWayMode,
    pub sample_length: SampleLength,
    pub entries: Vec<String>,
    pub sessions: Vec<SessionPlan>,
}

impl RunPlan {
    pub fn pairing_for(&self, iteration: usize) -> PairingPreference {
        PairingPreference {
            length: self.sample_length,
            one_way: self.one_way.for_iteration(iteration),
        }
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        let parsed: RunPlanInput = toml::from_str(input)
            .map_err(|e| CallbenchError::Config(format!("invalid plan TOML: {e}")))?;
        parsed.resolve()
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CallbenchError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }
}

impl RunPlanInput {
    pub fn resolve(self) -> Result<RunPlan> {
        if self.version != 0 && self.version != CONFIG_VERSION {
            return Err(CallbenchError::Config(format!(
                "unsupported plan version {}",
                self.version
            )));
        }
        if self.sessions.is_empty() {
            return Err(CallbenchError::Config("plan has no sessions".into()));
        }

        let mut sessions = Vec::with_capacity(self.sessions.len());
        for (i, s) in self.sessions.into_iter().enumerate() {
            let samples = match (s.caller_sample, s.callee_sample) {
                (Some(a), Some(b)) => Some((a, b)),
                (None, None) => None,
                _ => {
                    return Err(CallbenchError::Config(format!(
                        "session {i}: caller_sample and callee_sample go together"
                    )))
                }
            };
            let plan = SessionPlan {
                alias: s.alias.filter(|a| !a.trim().is_empty()),
                network_type: s.network_type,
                conditions: s.conditions,
                samples,
            };
            // Surface reorder-without-delay and bad rates before anything runs.
            plan.to_spec()
                .map_err(|e| CallbenchError::Config(format!("session {i}: {e}")))?;
            sessions.push(plan);
        }

        Ok(RunPlan {
            iterations: self.iterations.unwrap_or(1).max(1),
            one_way: self.one_way,
            sample_length: self.sample_length.unwrap_or_default(),
            entries: self.entries,
            sessions,
        })
    }
}
