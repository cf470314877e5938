//! Session lifecycle: Idle → Open → Executing → Idle.
//!
//! A session is described either through the controller while it is open
//! (`start()`, condition calls, `end()`) or up front as a [`SessionSpec`]
//! handed to [`SessionController::execute`]. Both paths run the same
//! thirteen steps and always leave the controller Idle with no netem rules
//! installed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use callbench_common::aggregate::ScoreReport;
use callbench_common::ids::run_id;
use callbench_common::ledger::MetricsLedger;
use callbench_common::models::{
    MetricsRow, NetworkType, PeerMeasurements, PeerRole, TrafficCounters,
};
use callbench_common::{CallbenchError, Result};
use callbench_sim::exec::shell_quote;
use callbench_sim::profile::{BandwidthCap, NetemDirective};
use callbench_sim::runner::{PeerExit, PeerProcessRunner};
use callbench_sim::sequencer::{ImpairmentSink, NetemSegment, NetemSequencer, SegmentTimeline};
use callbench_sim::topology::read_counters;

use crate::broker::{CallParams, ConnectionBroker};
use crate::config::{EntryConfig, PathsConfig};
use crate::samples::{PairingPreference, SampleCouple, SamplePool};
use crate::scoring::{ScoreRequest, ScoringFacility};
use crate::telemetry::read_timestamps;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Open,
    Executing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Open => write!(f, "open"),
            SessionState::Executing => write!(f, "executing"),
        }
    }
}

// ── Spec ────────────────────────────────────────────────────────────

/// Everything needed to run one session, built by value.
///
/// Each condition appends a tag to the session name, so
/// `loss(10, 0)` then `delay(100, 10, 5)` then `rate_control("20kbit")`
/// is named `loss10-0,delay100-10-5,rate20kbit`.
#[derive(Debug, Default)]
pub struct SessionSpec {
    tags: Vec<String>,
    alias: Option<String>,
    network_type: Option<NetworkType>,
    timeline: SegmentTimeline,
    samples: Option<SampleCouple>,
    pairing: PairingPreference,
}

impl SessionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loss(self, percent: f64, correlation: f64) -> Result<Self> {
        self.directive(NetemDirective::Loss {
            percent,
            correlation,
        })
    }

    pub fn delay(self, ms: u32, jitter_ms: u32, correlation: f64) -> Result<Self> {
        self.directive(NetemDirective::Delay {
            ms,
            jitter_ms,
            correlation,
        })
    }

    pub fn reordering(self, percent: f64, correlation: f64) -> Result<Self> {
        self.directive(NetemDirective::Reorder {
            percent,
            correlation,
        })
    }

    pub fn duplication(self, percent: f64, correlation: f64) -> Result<Self> {
        self.directive(NetemDirective::Duplicate {
            percent,
            correlation,
        })
    }

    pub fn rate_control(mut self, rate: &str) -> Result<Self> {
        let cap = BandwidthCap::new(rate)?;
        let tag = cap.tag();
        self.timeline.update(|b| b.rate_control(cap))?;
        self.tags.push(tag);
        Ok(self)
    }

    pub fn network_type(mut self, network: NetworkType) -> Self {
        self.tags.push(format!("net{network}"));
        self.network_type = Some(network);
        self
    }

    /// Short label used as the ledger's network column.
    pub fn network_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    /// Closes the current segment; it stays active for `hold`.
    pub fn after(mut self, hold: Duration) -> Self {
        self.tags.push(format!("after{}", hold.as_secs_f64()));
        self.timeline.after(hold);
        self
    }

    /// Uses these files instead of drawing a couple at `end()`.
    pub fn samples(mut self, caller: PathBuf, callee: PathBuf) -> Self {
        self.samples = Some(SampleCouple { caller, callee });
        self
    }

    pub fn pairing(mut self, pairing: PairingPreference) -> Self {
        self.pairing = pairing;
        self
    }

    pub fn name(&self) -> String {
        self.tags.join(",")
    }

    pub fn has_samples(&self) -> bool {
        self.samples.is_some()
    }

    fn directive(mut self, directive: NetemDirective) -> Result<Self> {
        let tag = directive.tag();
        self.timeline.update(|b| b.with(directive))?;
        self.tags.push(tag);
        Ok(self)
    }

    fn seal(self) -> (SealedSession, Vec<NetemSegment>) {
        let name = self.name();
        let sealed = SealedSession {
            network: self.alias.unwrap_or_else(|| name.clone()),
            name,
            network_type: self.network_type,
            samples: self.samples,
            pairing: self.pairing,
        };
        (sealed, self.timeline.finish())
    }
}

struct SealedSession {
    name: String,
    network: String,
    network_type: Option<NetworkType>,
    samples: Option<SampleCouple>,
    pairing: PairingPreference,
}

// ── Artifacts ───────────────────────────────────────────────────────

/// Per-run file names. Each output is named after the sample it receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFiles {
    pub caller_preprocessed: PathBuf,
    pub caller_output: PathBuf,
    pub callee_preprocessed: PathBuf,
    pub callee_output: PathBuf,
}

impl SessionFiles {
    pub fn new(paths: &PathsConfig, entry: &str, couple: &SampleCouple, name: &str, run: u32) -> Self {
        let caller_sample = file_name(&couple.caller);
        let callee_sample = file_name(&couple.callee);
        let file = |sample: &str| format!("{entry}_{sample}_{name}_{run}.pcm");
        Self {
            caller_preprocessed: paths.preprocessed.join(file(&caller_sample)),
            caller_output: paths.out.join(file(&callee_sample)),
            callee_preprocessed: paths.preprocessed.join(file(&callee_sample)),
            callee_output: paths.out.join(file(&caller_sample)),
        }
    }

    pub fn log_for(output: &Path) -> PathBuf {
        let mut s = output.as_os_str().to_owned();
        s.push(".log");
        PathBuf::from(s)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Arguments for one peer's client invocation.
pub struct PeerInvocation<'a> {
    pub entry: &'a EntryConfig,
    pub role: PeerRole,
    pub endpoint: &'a str,
    pub tag: &'a str,
    pub key: &'a str,
    pub input: &'a Path,
    pub preprocessed: &'a Path,
    pub output: &'a Path,
    pub config: &'a Path,
    pub network_type: Option<NetworkType>,
}

impl PeerInvocation<'_> {
    /// `[LD_PRELOAD=lib] bin addr tag -k key -i in -p prep -o out -c cfg -r role [-t code] > out.log 2>&1`
    pub fn command(&self) -> String {
        let q = |p: &Path| shell_quote(&p.to_string_lossy());
        let mut cmd = String::new();
        if let Some(lib) = &self.entry.preload {
            cmd.push_str(&format!("LD_PRELOAD={} ", shell_quote(lib)));
        }
        cmd.push_str(&format!(
            "{} {} {} -k {} -i {} -p {} -o {} -c {} -r {}",
            self.entry.binary,
            shell_quote(self.endpoint),
            shell_quote(self.tag),
            shell_quote(self.key),
            q(self.input),
            q(self.preprocessed),
            q(self.output),
            q(self.config),
            self.role,
        ));
        if let Some(t) = self.network_type {
            cmd.push_str(&format!(" -t {}", t.code()));
        }
        cmd.push_str(&format!(" > {} 2>&1", q(&SessionFiles::log_for(self.output))));
        cmd
    }
}

// ── Controller ──────────────────────────────────────────────────────

/// Collaborators a controller drives.
pub struct ControllerParts {
    pub broker: Box<dyn ConnectionBroker>,
    pub sink: Box<dyn ImpairmentSink>,
    pub runner: PeerProcessRunner,
    pub scorer: Box<dyn ScoringFacility>,
    pub samples: SamplePool,
    pub ledger: MetricsLedger,
    pub paths: PathsConfig,
    /// Device whose counters are snapshotted on the caller side. `None`
    /// skips caller counters.
    pub caller_interface: Option<String>,
    pub callee_interface: Option<String>,
}

/// Result of a completed session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub name: String,
    pub row: MetricsRow,
    pub files: SessionFiles,
    pub caller_exit: PeerExit,
    pub callee_exit: PeerExit,
}

pub struct SessionController {
    state: SessionState,
    open: Option<SessionSpec>,
    entry: Option<EntryConfig>,
    broker: Box<dyn ConnectionBroker>,
    sink: Box<dyn ImpairmentSink>,
    runner: PeerProcessRunner,
    scorer: Box<dyn ScoringFacility>,
    samples: SamplePool,
    ledger: MetricsLedger,
    paths: PathsConfig,
    caller_interface: Option<String>,
    callee_interface: Option<String>,
}

impl SessionController {
    pub fn new(parts: ControllerParts) -> Self {
        Self {
            state: SessionState::Idle,
            open: None,
            entry: None,
            broker: parts.broker,
            sink: parts.sink,
            runner: parts.runner,
            scorer: parts.scorer,
            samples: parts.samples,
            ledger: parts.ledger,
            paths: parts.paths,
            caller_interface: parts.caller_interface,
            callee_interface: parts.callee_interface,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn samples(&self) -> &SamplePool {
        &self.samples
    }

    pub fn ledger(&self) -> &MetricsLedger {
        &self.ledger
    }

    /// Selects the implementation version the next sessions run.
    pub fn set_entry(&mut self, entry: EntryConfig) -> &mut Self {
        tracing::debug!(entry = %entry.id, "entry selected");
        self.entry = Some(entry);
        self
    }

    pub fn start(&mut self) -> Result<&mut Self> {
        if self.state != SessionState::Idle {
            return Err(CallbenchError::IllegalState(format!(
                "start() while a session is {}",
                self.state
            )));
        }
        self.open = Some(SessionSpec::new());
        self.state = SessionState::Open;
        Ok(self)
    }

    /// Drops the open session without running it.
    pub fn abort(&mut self) {
        if self.state == SessionState::Open {
            tracing::info!("open session discarded");
        }
        self.open = None;
        self.state = SessionState::Idle;
    }

    pub fn loss(&mut self, percent: f64, correlation: f64) -> Result<&mut Self> {
        self.update("loss", |s| s.loss(percent, correlation))
    }

    pub fn delay(&mut self, ms: u32, jitter_ms: u32, correlation: f64) -> Result<&mut Self> {
        self.update("delay", |s| s.delay(ms, jitter_ms, correlation))
    }

    pub fn reordering(&mut self, percent: f64, correlation: f64) -> Result<&mut Self> {
        self.update("reordering", |s| s.reordering(percent, correlation))
    }

    pub fn duplication(&mut self, percent: f64, correlation: f64) -> Result<&mut Self> {
        self.update("duplication", |s| s.duplication(percent, correlation))
    }

    pub fn rate_control(&mut self, rate: &str) -> Result<&mut Self> {
        self.update("rate_control", |s| s.rate_control(rate))
    }

    pub fn network_type(&mut self, network: NetworkType) -> Result<&mut Self> {
        self.update("network_type", |s| Ok(s.network_type(network)))
    }

    pub fn network_alias(&mut self, alias: &str) -> Result<&mut Self> {
        self.update("network_alias", |s| Ok(s.network_alias(alias)))
    }

    pub fn after(&mut self, hold: Duration) -> Result<&mut Self> {
        self.update("after", |s| Ok(s.after(hold)))
    }

    pub fn samples_for(&mut self, caller: PathBuf, callee: PathBuf) -> Result<&mut Self> {
        self.update("samples", |s| Ok(s.samples(caller, callee)))
    }

    /// Draws a caller/callee couple now instead of at `end()`.
    pub fn choose_couple(&mut self, pairing: PairingPreference) -> Result<&mut Self> {
        if self.state != SessionState::Open {
            return Err(self.not_open("choose_couple"));
        }
        match self.samples.choose_couple(pairing) {
            Ok(c) => self.update("choose_couple", |s| {
                Ok(s.pairing(pairing).samples(c.caller, c.callee))
            }),
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    /// Runs the open session. The controller is Idle afterwards, whatever
    /// the outcome.
    pub fn end(&mut self) -> Result<SessionOutcome> {
        if self.state != SessionState::Open {
            return Err(self.not_open("end"));
        }
        let spec = self.open.take().unwrap_or_default();
        self.run(spec)
    }

    /// Runs a prepared spec without going through `start()`.
    pub fn execute(&mut self, spec: SessionSpec) -> Result<SessionOutcome> {
        if self.state != SessionState::Idle {
            return Err(CallbenchError::IllegalState(format!(
                "execute() while a session is {}",
                self.state
            )));
        }
        self.run(spec)
    }

    /// Consumes the controller and aggregates everything in the ledger.
    pub fn close_and_report(self) -> Result<ScoreReport> {
        if self.state != SessionState::Idle {
            tracing::warn!(state = %self.state, "closing with an unfinished session");
        }
        let rows = self.ledger.rows()?.collect::<Result<Vec<_>>>()?;
        tracing::info!(rows = rows.len(), ledger = %self.ledger.path().display(), "building report");
        Ok(ScoreReport::from_rows(&rows))
    }

    fn not_open(&self, op: &str) -> CallbenchError {
        CallbenchError::IllegalState(format!("{op}() requires an open session, state is {}", self.state))
    }

    fn update<F>(&mut self, op: &str, f: F) -> Result<&mut Self>
    where
        F: FnOnce(SessionSpec) -> Result<SessionSpec>,
    {
        if self.state != SessionState::Open {
            return Err(self.not_open(op));
        }
        let spec = self.open.take().unwrap_or_default();
        match f(spec) {
            Ok(spec) => {
                self.open = Some(spec);
                Ok(self)
            }
            Err(e) => {
                tracing::warn!(op, error = %e, "session aborted");
                self.state = SessionState::Idle;
                Err(e)
            }
        }
    }

    fn run(&mut self, spec: SessionSpec) -> Result<SessionOutcome> {
        self.state = SessionState::Executing;
        let (session, segments) = spec.seal();
        let mut sequencer = NetemSequencer::new(segments);

        let result = match self.entry.clone() {
            Some(entry) => {
                let span = tracing::info_span!("session", entry = %entry.id, name = %session.name);
                let _guard = span.enter();
                self.run_steps(&session, &entry, &mut sequencer)
            }
            None => Err(CallbenchError::IllegalState(
                "no entry selected, call set_entry() first".into(),
            )),
        };
        if let Err(e) = &result {
            tracing::error!(session = %session.name, error = %e, "session failed");
            sequencer.cleanup(self.sink.as_mut());
        }
        self.state = SessionState::Idle;
        result
    }

    fn run_steps(
        &mut self,
        session: &SealedSession,
        entry: &EntryConfig,
        sequencer: &mut NetemSequencer,
    ) -> Result<SessionOutcome> {
        // 1. Call parameters.
        let params = self.broker.fetch()?;
        let endpoint = params.primary_endpoint()?.clone();
        let address = endpoint.address();

        // 2. Samples.
        let couple = match &session.samples {
            Some(c) => c.clone(),
            None => self.samples.choose_couple(session.pairing)?,
        };
        let files = SessionFiles::new(&self.paths, &entry.id, &couple, &session.name, run_id());
        tracing::info!(
            caller = %couple.caller.display(),
            callee = %couple.callee.display(),
            "session starting"
        );

        // 3. Counters before.
        let before = self.snapshot_counters()?;

        // 4. Codec config for both peers.
        self.write_call_config(&params)?;

        let config = self.paths.call_config();
        let caller_cmd = PeerInvocation {
            entry,
            role: PeerRole::Caller,
            endpoint: &address,
            tag: &endpoint.peer_tags.caller,
            key: &params.encryption_key,
            input: &couple.caller,
            preprocessed: &files.caller_preprocessed,
            output: &files.caller_output,
            config: &config,
            network_type: session.network_type,
        }
        .command();
        let callee_cmd = PeerInvocation {
            entry,
            role: PeerRole::Callee,
            endpoint: &address,
            tag: &endpoint.peer_tags.callee,
            key: &params.encryption_key,
            input: &couple.callee,
            preprocessed: &files.callee_preprocessed,
            output: &files.callee_output,
            config: &config,
            network_type: session.network_type,
        }
        .command();

        // 5–9. Netem timeline around the two peers.
        let (caller_exit, callee_exit) = self.drive_peers(sequencer, &caller_cmd, &callee_cmd)?;

        // 10–11. Counters after, artifacts, lifecycle markers.
        let after = self.snapshot_counters()?;
        let callee_target = self.runner.target(PeerRole::Callee);
        let callee_log = SessionFiles::log_for(&files.callee_output);
        if callee_target.is_remote() {
            callee_target.fetch_artifact(&files.callee_output)?;
            callee_target.fetch_artifact(&callee_log)?;
        }
        let caller = PeerMeasurements {
            traffic: delta(before[0], after[0]),
            timestamps: read_timestamps(&SessionFiles::log_for(&files.caller_output)),
        };
        let callee = PeerMeasurements {
            traffic: delta(before[1], after[1]),
            timestamps: read_timestamps(&callee_log),
        };

        // 12. Scores.
        let preprocessed = files
            .caller_preprocessed
            .exists()
            .then_some(files.caller_preprocessed.as_path());
        let scores = self.scorer.score(&ScoreRequest {
            reference: &couple.caller,
            preprocessed,
            degraded: &files.callee_output,
        })?;

        // 13. Ledger.
        let row = MetricsRow {
            entry: entry.id.clone(),
            sample: file_name(&couple.caller),
            network: session.network.clone(),
            distorted: file_name(&files.callee_output),
            scores,
            caller,
            callee,
        };
        self.ledger.append(&row)?;
        tracing::info!(network = %row.network, "session recorded");

        Ok(SessionOutcome {
            name: session.name.clone(),
            row,
            files,
            caller_exit,
            callee_exit,
        })
    }

    fn drive_peers(
        &mut self,
        sequencer: &mut NetemSequencer,
        caller_cmd: &str,
        callee_cmd: &str,
    ) -> Result<(PeerExit, PeerExit)> {
        let sink = self.sink.as_mut();
        let runner = &self.runner;

        sequencer.start(sink)?;

        let caller = runner.spawn_background(caller_cmd, PeerRole::Caller)?;
        let callee = match runner.spawn_background(callee_cmd, PeerRole::Callee) {
            Ok(h) => h,
            Err(e) => {
                runner.abort(caller);
                return Err(e);
            }
        };

        if let Err(e) = sequencer.run_holds(sink) {
            runner.abort(caller);
            runner.abort(callee);
            return Err(e);
        }

        let caller_exit = runner.wait(caller);
        let callee_exit = runner.wait(callee);
        let (caller_exit, callee_exit) = (caller_exit?, callee_exit?);

        sequencer.finish(sink)?;
        Ok((caller_exit, callee_exit))
    }

    fn snapshot_counters(&self) -> Result<[Option<TrafficCounters>; 2]> {
        let read = |role: PeerRole, iface: &Option<String>| -> Result<Option<TrafficCounters>> {
            match iface {
                Some(i) => Ok(Some(read_counters(self.runner.target(role), i)?)),
                None => Ok(None),
            }
        };
        Ok([
            read(PeerRole::Caller, &self.caller_interface)?,
            read(PeerRole::Callee, &self.callee_interface)?,
        ])
    }

    fn write_call_config(&self, params: &CallParams) -> Result<()> {
        let json = params.config_json()?;
        std::fs::create_dir_all(&self.paths.out)?;
        std::fs::create_dir_all(&self.paths.preprocessed)?;
        let path = self.paths.call_config();
        std::fs::write(&path, &json)?;

        let callee = self.runner.target(PeerRole::Callee);
        if callee.is_remote() {
            let q = |p: &Path| shell_quote(&p.to_string_lossy());
            let cmd = format!(
                "mkdir -p {} {} && printf '%s\\n' {} > {}",
                q(&self.paths.out),
                q(&self.paths.preprocessed),
                shell_quote(&json),
                q(&path)
            );
            callee.run_sync(&cmd)?.check("printf")?;
        }
        tracing::debug!(path = %path.display(), "call config written");
        Ok(())
    }
}

fn delta(before: Option<TrafficCounters>, after: Option<TrafficCounters>) -> Option<TrafficCounters> {
    Some(after?.since(&before?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> EntryConfig {
        EntryConfig {
            id: "stable".into(),
            binary: "bin/tgvoipcall".into(),
            preload: Some("lib/libtgvoip-stable.so".into()),
        }
    }

    #[test]
    fn name_concatenates_tags() {
        let spec = SessionSpec::new()
            .loss(10.0, 0.0)
            .unwrap()
            .delay(100, 10, 5.0)
            .unwrap()
            .rate_control("20kbit")
            .unwrap();
        assert_eq!(spec.name(), "loss10-0,delay100-10-5,rate20kbit");

        let (sealed, segments) = spec.seal();
        assert_eq!(sealed.network, "loss10-0,delay100-10-5,rate20kbit");
        assert_eq!(segments.len(), 1);
        let pair = segments[0].profile.instructions("v-peer1").unwrap();
        assert_eq!(
            pair.apply,
            "tc qdisc add dev v-peer1 root handle 1:0 netem loss 10% 0% \
             delay 100ms 10ms 5% distribution normal && \
             tc qdisc add dev v-peer1 parent 1:1 handle 10: tbf rate 20kbit buffer 1600 limit 3000"
        );
        assert_eq!(pair.undo, "tc qdisc del dev v-peer1 root");
    }

    #[test]
    fn after_and_network_tags() {
        let spec = SessionSpec::new()
            .network_type(NetworkType::ThreeG)
            .network_alias("3GOutage")
            .loss(3.0, 10.0)
            .unwrap()
            .after(Duration::from_secs(3))
            .loss(20.0, 0.0)
            .unwrap();
        assert_eq!(spec.name(), "net3g,loss3-10,after3,loss20-0");
        let (sealed, segments) = spec.seal();
        assert_eq!(sealed.network, "3GOutage");
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn files_are_named_after_received_sample() {
        let couple = SampleCouple {
            caller: "samples/sample5_a.pcm".into(),
            callee: "samples/sample7_b.pcm".into(),
        };
        let f = SessionFiles::new(&PathsConfig::default(), "stable", &couple, "loss1-0", 1234567);
        assert_eq!(
            f.callee_output,
            PathBuf::from("out/stable_sample5_a.pcm_loss1-0_1234567.pcm")
        );
        assert_eq!(
            f.caller_preprocessed,
            PathBuf::from("preprocessed/stable_sample5_a.pcm_loss1-0_1234567.pcm")
        );
        assert_eq!(
            SessionFiles::log_for(&f.caller_output),
            PathBuf::from("out/stable_sample7_b.pcm_loss1-0_1234567.pcm.log")
        );
    }

    #[test]
    fn peer_command_line() {
        let e = entry();
        let cmd = PeerInvocation {
            entry: &e,
            role: PeerRole::Caller,
            endpoint: "1.2.3.4:553",
            tag: "c0",
            key: "a1b2",
            input: Path::new("samples/sample5_a.pcm"),
            preprocessed: Path::new("preprocessed/p.pcm"),
            output: Path::new("out/o.pcm"),
            config: Path::new("out/config.json"),
            network_type: Some(NetworkType::Hspa),
        }
        .command();
        assert_eq!(
            cmd,
            "LD_PRELOAD=lib/libtgvoip-stable.so bin/tgvoipcall 1.2.3.4:553 c0 -k a1b2 \
             -i samples/sample5_a.pcm -p preprocessed/p.pcm -o out/o.pcm -c out/config.json \
             -r caller -t 4 > out/o.pcm.log 2>&1"
        );
    }

    #[test]
    fn counter_delta_needs_both_snapshots() {
        let a = TrafficCounters {
            rx_bytes: 10,
            ..Default::default()
        };
        let b = TrafficCounters {
            rx_bytes: 25,
            ..Default::default()
        };
        assert_eq!(delta(Some(a), Some(b)).unwrap().rx_bytes, 15);
        assert_eq!(delta(None, Some(b)), None);
    }
}
