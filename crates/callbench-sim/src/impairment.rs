//! `tc netem` sink: turns [`ImpairmentProfile`]s into `tc` commands on one
//! device.

use callbench_common::Result;

use crate::exec::ExecutionTarget;
use crate::profile::ImpairmentProfile;
use crate::sequencer::ImpairmentSink;

/// Applies profiles with `tc` on `device` through `target`.
///
/// The first apply in the sink's lifetime deletes whatever root qdisc a
/// previous (possibly crashed) run left behind.
pub struct TcNetemSink {
    target: Box<dyn ExecutionTarget>,
    device: String,
    cleared: bool,
}

impl TcNetemSink {
    pub fn new(target: Box<dyn ExecutionTarget>, device: &str) -> Self {
        Self {
            target,
            device: device.to_string(),
            cleared: false,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    fn clear_stale(&mut self) {
        if self.cleared {
            return;
        }
        let cmd = format!("tc qdisc del dev {} root", self.device);
        match self.target.run_sync(&cmd) {
            Ok(out) if out.success() => {
                tracing::info!(device = %self.device, "removed stale root qdisc")
            }
            // "No such file or directory" when nothing was installed.
            Ok(_) => {}
            Err(e) => tracing::warn!(device = %self.device, error = %e, "could not clear qdisc"),
        }
        self.cleared = true;
    }
}

impl ImpairmentSink for TcNetemSink {
    fn apply(&mut self, profile: &ImpairmentProfile) -> Result<()> {
        self.clear_stale();
        let Some(pair) = profile.instructions(&self.device) else {
            return Ok(());
        };
        tracing::info!(device = %self.device, cmd = %pair.apply, "applying netem");
        self.target.run_sync(&pair.apply)?.check("tc")?;
        Ok(())
    }

    fn undo(&mut self, profile: &ImpairmentProfile) -> Result<()> {
        let Some(pair) = profile.instructions(&self.device) else {
            return Ok(());
        };
        tracing::info!(device = %self.device, cmd = %pair.undo, "removing netem");
        self.target.run_sync(&pair.undo)?.check("tc")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::process::Child;
    use std::sync::{Arc, Mutex};

    use callbench_common::CallbenchError;

    use crate::exec::{CommandOutput, LocalTarget};
    use crate::profile::{BandwidthCap, ProfileBuilder};
    use crate::test_util::{check_privileges, unique_ns_name, ScratchNamespace};

    /// Records commands and answers each with a fixed exit code.
    struct ScriptedTarget {
        log: Arc<Mutex<Vec<String>>>,
        code: i32,
    }

    impl ExecutionTarget for ScriptedTarget {
        fn label(&self) -> &str {
            "scripted"
        }

        fn run_sync(&self, command: &str) -> Result<CommandOutput> {
            self.log.lock().unwrap().push(command.to_string());
            Ok(CommandOutput {
                code: Some(self.code),
                stdout: String::new(),
                stderr: "RTNETLINK answers: Operation not permitted".into(),
            })
        }

        fn run_background(&self, _command: &str) -> Result<Child> {
            unreachable!()
        }

        fn fetch_artifact(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn scripted(code: i32) -> (TcNetemSink, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let target = ScriptedTarget {
            log: log.clone(),
            code,
        };
        (TcNetemSink::new(Box::new(target), "eth9"), log)
    }

    #[test]
    fn first_apply_clears_once() {
        let (mut sink, log) = scripted(0);
        let p = ProfileBuilder::new().loss(10.0, 0.0).unwrap().emit();
        sink.apply(&p).unwrap();
        sink.undo(&p).unwrap();
        sink.apply(&p).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            [
                "tc qdisc del dev eth9 root",
                "tc qdisc add dev eth9 root netem loss 10% 0%",
                "tc qdisc del dev eth9 root",
                "tc qdisc add dev eth9 root netem loss 10% 0%",
            ]
        );
    }

    #[test]
    fn empty_profile_only_clears() {
        let (mut sink, log) = scripted(0);
        let p = ProfileBuilder::new().emit();
        sink.apply(&p).unwrap();
        sink.undo(&p).unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn tc_failure_is_external_tool_error() {
        let (mut sink, _log) = scripted(2);
        let p = ProfileBuilder::new()
            .rate_control(BandwidthCap::new("20kbit").unwrap())
            .unwrap()
            .emit();
        let err = sink.apply(&p).unwrap_err();
        assert!(matches!(err, CallbenchError::ExternalTool { ref tool, .. } if tool == "tc"));
    }

    #[test]
    fn applies_real_netem_in_namespace() {
        if !check_privileges() {
            eprintln!("Skipping test, insufficient privileges or missing tools");
            return;
        }
        let name = unique_ns_name("cb_tc");
        let _ns = ScratchNamespace::new(&name).expect("Failed to create namespace");
        let mut sink = TcNetemSink::new(Box::new(LocalTarget::in_namespace(&name)), "lo");

        let p = ProfileBuilder::new()
            .delay(20, 0, 0.0)
            .unwrap()
            .rate_control(BandwidthCap::new("1mbit").unwrap())
            .unwrap()
            .emit();
        if let Err(e) = sink.apply(&p) {
            if e.to_string().contains("qdisc kind is unknown") {
                eprintln!("Skipping test, netem qdisc not available");
                return;
            }
            panic!("Failed to apply netem: {e}");
        }

        let shown = LocalTarget::in_namespace(&name)
            .run_sync("tc qdisc show dev lo")
            .unwrap();
        assert!(shown.stdout.contains("netem"), "{}", shown.stdout);
        assert!(shown.stdout.contains("tbf"), "{}", shown.stdout);

        sink.undo(&p).unwrap();
        let shown = LocalTarget::in_namespace(&name)
            .run_sync("tc qdisc show dev lo")
            .unwrap();
        assert!(!shown.stdout.contains("netem"));
    }
}
