//! Quality scoring via external rating tools.

use std::path::{Path, PathBuf};

use callbench_common::models::{ScoreDimension, ScoreSet};
use callbench_common::{CallbenchError, Result};
use callbench_sim::exec::{shell_quote, ExecutionTarget};

use crate::config::{RaterConfig, ScoringConfig};

/// Files handed to the raters for one session.
#[derive(Debug, Clone, Copy)]
pub struct ScoreRequest<'a> {
    /// The sample the caller sent.
    pub reference: &'a Path,
    /// The caller's capture before sending, when the client wrote one.
    pub preprocessed: Option<&'a Path>,
    /// What the callee received.
    pub degraded: &'a Path,
}

pub trait ScoringFacility: Send {
    fn score(&mut self, request: &ScoreRequest<'_>) -> Result<ScoreSet>;
}

/// Splits rater output on whitespace and commas. NaN and infinities are
/// rejected along with unparseable tokens.
pub fn parse_scores(text: &str) -> Result<Vec<f64>> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(|t| match t.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            Ok(_) => Err(CallbenchError::external(
                "rate",
                format!("non-finite score {t:?}"),
            )),
            Err(_) => Err(CallbenchError::external(
                "rate",
                format!("unparseable score {t:?}"),
            )),
        })
        .collect()
}

/// Runs the rating commands through an [`ExecutionTarget`], appending
/// their stderr to `rate_errors.log`.
pub struct CommandScorer {
    target: Box<dyn ExecutionTarget>,
    rate_command: String,
    raters: Vec<RaterConfig>,
    errors_log: PathBuf,
}

impl CommandScorer {
    pub fn new(target: Box<dyn ExecutionTarget>, cfg: &ScoringConfig, errors_log: &Path) -> Self {
        Self {
            target,
            rate_command: cfg.rate_command.clone(),
            raters: cfg.raters.clone(),
            errors_log: errors_log.to_path_buf(),
        }
    }

    fn rate(&self, tool: &str, program: &str, files: &[&Path], expect: usize) -> Result<Vec<f64>> {
        let mut cmd = program.to_string();
        for f in files {
            cmd.push(' ');
            cmd.push_str(&shell_quote(&f.to_string_lossy()));
        }
        cmd.push_str(" 2>> ");
        cmd.push_str(&shell_quote(&self.errors_log.to_string_lossy()));

        let out = self.target.run_sync(&cmd)?;
        if !out.success() {
            return Err(CallbenchError::external(
                tool,
                format!(
                    "exit {:?}, see {}",
                    out.code,
                    self.errors_log.display()
                ),
            ));
        }
        let scores = parse_scores(&out.stdout).map_err(|e| match e {
            CallbenchError::ExternalTool { detail, .. } => CallbenchError::external(tool, detail),
            other => other,
        })?;
        if scores.len() < expect {
            return Err(CallbenchError::external(
                tool,
                format!("expected {expect} scores, got {:?}", out.stdout.trim()),
            ));
        }
        Ok(scores)
    }
}

impl ScoringFacility for CommandScorer {
    fn score(&mut self, req: &ScoreRequest<'_>) -> Result<ScoreSet> {
        let mut scores = ScoreSet::new();

        let short = self.rate("rate", &self.rate_command, &[req.reference, req.degraded], 1)?;
        scores.insert(ScoreDimension::Combined, short[0]);

        if let Some(prep) = req.preprocessed {
            let full = self.rate(
                "rate",
                &self.rate_command,
                &[req.reference, prep, req.degraded],
                2,
            )?;
            scores.insert(ScoreDimension::Preprocess, full[0]);
            scores.insert(ScoreDimension::Output, full[1]);
        }

        for rater in &self.raters {
            let Some(dim) = ScoreDimension::from_rater_id(rater.id) else {
                continue;
            };
            let tool = format!("rater{}", rater.id);
            let v = self.rate(&tool, &rater.command, &[req.reference, req.degraded], 1)?;
            scores.insert(dim, v[0]);
        }

        tracing::info!(
            degraded = %req.degraded.display(),
            scores = ?scores.iter().map(|(d, v)| format!("{d}={v}")).collect::<Vec<_>>(),
            "session scored"
        );
        Ok(scores)
    }
}
