//! Multi-session driver: wires a controller from the harness config and
//! runs a plan (iterations × entries × sessions), collecting failures.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use callbench_common::ledger::MetricsLedger;
use callbench_common::{CallbenchError, Result};
use callbench_sim::exec::{current_user, ExecutionTarget, LocalTarget, SshTarget};
use callbench_sim::impairment::TcNetemSink;
use callbench_sim::runner::PeerProcessRunner;
use callbench_sim::topology::{default_route_interface, validate_interface};

use crate::broker;
use crate::config::{EntryConfig, HarnessConfig};
use crate::plan::RunPlan;
use crate::samples::SamplePool;
use crate::scoring::CommandScorer;
use crate::session::{ControllerParts, SessionController};

/// Builds the production controller: `tc` and the caller inside the
/// configured namespace, the callee locally or over SSH.
pub fn build_controller(cfg: &HarnessConfig, interface: Option<&str>) -> Result<SessionController> {
    let user = match &cfg.run_as {
        Some(u) => u.clone(),
        None => current_user()?,
    };

    let (caller_target, tc_target): (Box<dyn ExecutionTarget>, Box<dyn ExecutionTarget>) =
        match &cfg.namespace {
            Some(ns) => (
                Box::new(LocalTarget::in_namespace_as(ns, &user)),
                Box::new(LocalTarget::in_namespace(ns)),
            ),
            None => (Box::new(LocalTarget::new()), Box::new(LocalTarget::privileged())),
        };
    let callee_target: Box<dyn ExecutionTarget> = match &cfg.callee.remote {
        Some(remote) => Box::new(SshTarget::new(&remote.host, &remote.workdir)),
        None => Box::new(LocalTarget::new()),
    };

    let interface = match interface.map(str::to_string).or_else(|| cfg.interface.clone()) {
        Some(i) => i,
        None => default_route_interface(tc_target.as_ref())?,
    };
    validate_interface(&interface)?;

    let callee_interface = match &cfg.callee.interface {
        Some(i) => Some(validate_interface(i)?.to_string()),
        None => match default_route_interface(callee_target.as_ref()) {
            Ok(i) => Some(i),
            Err(e) => {
                tracing::warn!(error = %e, "callee interface unknown, callee counters disabled");
                None
            }
        },
    };

    tracing::info!(
        interface = %interface,
        namespace = ?cfg.namespace,
        user = %user,
        callee = callee_target.label(),
        "harness ready"
    );

    let mut runner = PeerProcessRunner::new(caller_target, callee_target);
    if let Some(t) = cfg.peer_timeout {
        runner = runner.with_timeout(t);
    }

    let parts = ControllerParts {
        broker: broker::from_config(&cfg.broker)?,
        sink: Box::new(TcNetemSink::new(tc_target, &interface)),
        runner,
        scorer: Box::new(CommandScorer::new(
            Box::new(LocalTarget::new()),
            &cfg.scoring,
            &cfg.paths.rate_errors(),
        )),
        samples: SamplePool::scan(&cfg.paths.samples, &cfg.paths.silence)?
            .with_max_attempts(cfg.max_pair_attempts),
        ledger: MetricsLedger::open(&cfg.paths.ledger)?,
        paths: cfg.paths.clone(),
        caller_interface: Some(interface),
        callee_interface,
    };
    Ok(SessionController::new(parts))
}

// ── Run summary ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub iteration: usize,
    pub entry: String,
    pub session: String,
    pub error: String,
    pub provider: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<SessionFailure>,
    pub interrupted: bool,
}

impl RunSummary {
    /// True when the broker failed at least once; the CLI exits non-zero.
    pub fn has_provider_failure(&self) -> bool {
        self.failures.iter().any(|f| f.provider)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} of {} sessions succeeded{}",
            self.succeeded,
            self.attempted,
            if self.interrupted { " (interrupted)" } else { "" }
        )?;
        if self.failures.is_empty() {
            return Ok(());
        }
        writeln!(f, "{} failed:", self.failures.len())?;
        for fail in &self.failures {
            writeln!(
                f,
                "  [iter {}] {} / {}: {}",
                fail.iteration, fail.entry, fail.session, fail.error
            )?;
        }
        Ok(())
    }
}

fn selected_entries<'a>(cfg: &'a HarnessConfig, plan: &RunPlan) -> Result<Vec<&'a EntryConfig>> {
    let entries: Vec<&EntryConfig> = if plan.entries.is_empty() {
        cfg.entries.iter().collect()
    } else {
        plan.entries
            .iter()
            .map(|id| {
                cfg.entry(id)
                    .ok_or_else(|| CallbenchError::Config(format!("plan names unknown entry {id:?}")))
            })
            .collect::<Result<_>>()?
    };
    if entries.is_empty() {
        return Err(CallbenchError::Config("no entries to run".into()));
    }
    Ok(entries)
}

/// Stop requests from the signal handler.
///
/// Repeated interrupts only count: the driver always returns through the
/// controller so netem is undone before the process exits.
#[derive(Debug, Default)]
pub struct StopFlag(AtomicUsize);

impl StopFlag {
    /// Records a request. True only for the first one.
    pub fn request(&self) -> bool {
        self.0.fetch_add(1, Ordering::SeqCst) == 0
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst) > 0
    }
}

/// Runs every session of `plan` for every entry, `plan.iterations` times.
///
/// One sample couple is drawn per iteration and shared by all its sessions
/// so entries are compared on the same audio. Session failures are
/// recorded and the run continues; `stop` is checked between sessions.
pub fn run_plan(
    ctl: &mut SessionController,
    cfg: &HarnessConfig,
    plan: &RunPlan,
    stop: &StopFlag,
) -> Result<RunSummary> {
    let entries = selected_entries(cfg, plan)?;
    let mut summary = RunSummary::default();

    'outer: for iteration in 0..plan.iterations {
        let pairing = plan.pairing_for(iteration);
        let couple = ctl.samples().choose_couple(pairing)?;
        tracing::info!(
            iteration,
            one_way = pairing.one_way,
            caller = %couple.caller.display(),
            callee = %couple.callee.display(),
            "iteration starting"
        );

        for entry in &entries {
            ctl.set_entry((*entry).clone());
            for session in &plan.sessions {
                if stop.is_requested() {
                    summary.interrupted = true;
                    break 'outer;
                }
                let mut spec = session.to_spec()?.pairing(pairing);
                if !spec.has_samples() {
                    spec = spec.samples(couple.caller.clone(), couple.callee.clone());
                }
                let label = session.alias.clone().unwrap_or_else(|| spec.name());

                summary.attempted += 1;
                match ctl.execute(spec) {
                    Ok(outcome) => {
                        summary.succeeded += 1;
                        tracing::info!(
                            session = %label,
                            distorted = %outcome.row.distorted,
                            "session complete"
                        );
                    }
                    Err(e) => summary.failures.push(SessionFailure {
                        iteration,
                        entry: entry.id.clone(),
                        session: label,
                        provider: e.is_provider(),
                        error: e.to_string(),
                    }),
                }
            }
        }
    }

    if summary.interrupted {
        tracing::warn!("stop requested, remaining sessions skipped");
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_failures() {
        let s = RunSummary {
            attempted: 3,
            succeeded: 2,
            failures: vec![SessionFailure {
                iteration: 0,
                entry: "stable".into(),
                session: "3G1".into(),
                error: "connection broker error: token revoked".into(),
                provider: true,
            }],
            interrupted: false,
        };
        assert!(s.has_provider_failure());
        let text = s.to_string();
        assert!(text.starts_with("2 of 3 sessions succeeded\n"));
        assert!(text.contains("[iter 0] stable / 3G1: connection broker error"));
    }

    #[test]
    fn only_first_stop_request_is_fresh() {
        let stop = StopFlag::default();
        assert!(!stop.is_requested());
        assert!(stop.request());
        assert!(!stop.request());
        assert!(!stop.request());
        assert!(stop.is_requested());
    }

    #[test]
    fn unknown_plan_entry_is_config_error() {
        let cfg = HarnessConfig::from_toml_str(
            "[broker]\nbase_url = 'x'\n[[entries]]\nid = 'stable'\n",
        )
        .unwrap();
        let plan = RunPlan::from_toml_str(
            "entries = ['nightly']\n[[sessions]]\nconditions = [{ op = 'loss' }]\n",
        )
        .unwrap();
        assert!(matches!(
            selected_entries(&cfg, &plan),
            Err(CallbenchError::Config(_))
        ));

        let all = RunPlan::from_toml_str("[[sessions]]\nalias = 'WiFi'\n").unwrap();
        assert_eq!(selected_entries(&cfg, &all).unwrap().len(), 1);
    }
}
