//! Timed sequences of impairment profiles.
//!
//! A [`SegmentTimeline`] is filled while a session is open: conditions go
//! into the current segment, and `after(hold)` closes it. When the session
//! ends, whatever is still open becomes the final segment, which has no hold
//! and stays active until both peers are done.
//!
//! The [`NetemSequencer`] then plays the segments against an
//! [`ImpairmentSink`]: apply the first, then repeatedly sleep, undo, and
//! apply the next. Applies and undos strictly alternate.

use std::collections::VecDeque;
use std::time::Duration;

use callbench_common::Result;

use crate::profile::{ImpairmentProfile, ProfileBuilder};

/// Installs and removes profiles on some link.
pub trait ImpairmentSink: Send {
    fn apply(&mut self, profile: &ImpairmentProfile) -> Result<()>;
    fn undo(&mut self, profile: &ImpairmentProfile) -> Result<()>;
}

/// One profile and how long it stays active. `hold == None` marks the
/// final segment.
#[derive(Debug, Clone, PartialEq)]
pub struct NetemSegment {
    pub profile: ImpairmentProfile,
    pub hold: Option<Duration>,
}

impl NetemSegment {
    pub fn is_final(&self) -> bool {
        self.hold.is_none()
    }
}

// ── Timeline ────────────────────────────────────────────────────────

/// Segments being described for a session that is still open.
#[derive(Debug, Default)]
pub struct SegmentTimeline {
    closed: Vec<NetemSegment>,
    open: ProfileBuilder,
}

impl SegmentTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the open segment's builder through `f`.
    pub fn update<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(ProfileBuilder) -> Result<ProfileBuilder>,
    {
        let builder = std::mem::take(&mut self.open);
        self.open = f(builder)?;
        Ok(())
    }

    /// Closes the open segment with `hold` and starts a fresh one.
    pub fn after(&mut self, hold: Duration) {
        let profile = std::mem::take(&mut self.open).emit();
        self.closed.push(NetemSegment {
            profile,
            hold: Some(hold),
        });
    }

    /// Number of segments closed so far.
    pub fn closed_len(&self) -> usize {
        self.closed.len()
    }

    /// Appends the open profile as the final segment.
    pub fn finish(mut self) -> Vec<NetemSegment> {
        self.closed.push(NetemSegment {
            profile: self.open.emit(),
            hold: None,
        });
        self.closed
    }
}

// ── Sequencer ───────────────────────────────────────────────────────

#[derive(Debug)]
pub struct NetemSequencer {
    pending: VecDeque<NetemSegment>,
    active: Option<NetemSegment>,
}

impl NetemSequencer {
    pub fn new(segments: Vec<NetemSegment>) -> Self {
        Self {
            pending: segments.into(),
            active: None,
        }
    }

    pub fn active(&self) -> Option<&NetemSegment> {
        self.active.as_ref()
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// Applies the first segment.
    pub fn start(&mut self, sink: &mut dyn ImpairmentSink) -> Result<()> {
        self.activate_next(sink).map(|_| ())
    }

    /// Waits out the active hold, then swaps in the next segment.
    ///
    /// Returns `false` without sleeping once the active segment is final.
    pub fn step(&mut self, sink: &mut dyn ImpairmentSink) -> Result<bool> {
        let hold = match &self.active {
            Some(NetemSegment {
                hold: Some(hold), ..
            }) if !self.pending.is_empty() => *hold,
            _ => return Ok(false),
        };
        tracing::debug!(hold_ms = hold.as_millis() as u64, "holding segment");
        std::thread::sleep(hold);

        self.undo_active(sink)?;
        self.activate_next(sink)
    }

    /// Steps through every held segment.
    pub fn run_holds(&mut self, sink: &mut dyn ImpairmentSink) -> Result<()> {
        while self.step(sink)? {}
        Ok(())
    }

    /// Undoes the active segment, if any.
    pub fn finish(&mut self, sink: &mut dyn ImpairmentSink) -> Result<()> {
        self.undo_active(sink)
    }

    /// Best-effort undo after a failure elsewhere. Never fails.
    pub fn cleanup(&mut self, sink: &mut dyn ImpairmentSink) {
        if let Some(segment) = self.active.take() {
            if let Err(e) = sink.undo(&segment.profile) {
                tracing::warn!(error = %e, "netem cleanup failed");
            }
        }
        self.pending.clear();
    }

    fn undo_active(&mut self, sink: &mut dyn ImpairmentSink) -> Result<()> {
        if let Some(segment) = &self.active {
            sink.undo(&segment.profile)?;
            self.active = None;
        }
        Ok(())
    }

    fn activate_next(&mut self, sink: &mut dyn ImpairmentSink) -> Result<bool> {
        let Some(next) = self.pending.pop_front() else {
            return Ok(false);
        };
        // Recorded before applying so cleanup also covers a half-applied profile.
        let segment = self.active.insert(next);
        tracing::debug!(
            netem = %segment.profile.netem_args(),
            final_segment = segment.is_final(),
            "applying segment"
        );
        sink.apply(&segment.profile)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{RecordingSink, SinkEvent};

    fn timeline_of_three() -> Vec<NetemSegment> {
        let mut tl = SegmentTimeline::new();
        tl.update(|b| b.loss(10.0, 0.0)).unwrap();
        tl.after(Duration::from_millis(5));
        tl.update(|b| b.delay(100, 10, 5.0)).unwrap();
        tl.after(Duration::from_millis(5));
        tl.update(|b| b.duplication(1.0, 0.0)).unwrap();
        tl.finish()
    }

    #[test]
    fn finish_appends_open_profile_as_final() {
        let segs = timeline_of_three();
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[0].hold, Some(Duration::from_millis(5)));
        assert!(segs[2].is_final());
        assert_eq!(segs[2].profile.netem_args(), "duplicate 1% 0%");
    }

    #[test]
    fn timeline_without_after_is_one_final_segment() {
        let mut tl = SegmentTimeline::new();
        tl.update(|b| b.loss(5.0, 0.0)).unwrap();
        let segs = tl.finish();
        assert_eq!(segs.len(), 1);
        assert!(segs[0].is_final());
    }

    #[test]
    fn rejected_directive_surfaces_validation_error() {
        let mut tl = SegmentTimeline::new();
        tl.update(|b| b.delay(50, 0, 0.0)).unwrap();
        tl.after(Duration::ZERO);
        // The delay belongs to the previous segment.
        assert!(tl.update(|b| b.reordering(10.0, 0.0)).is_err());
    }

    #[test]
    fn plays_segments_undo_then_apply() {
        let mut sink = RecordingSink::default();
        let mut seq = NetemSequencer::new(timeline_of_three());
        seq.start(&mut sink).unwrap();
        seq.run_holds(&mut sink).unwrap();
        assert!(seq.active().unwrap().is_final());
        seq.finish(&mut sink).unwrap();

        let kinds: Vec<_> = sink.events.iter().map(SinkEvent::is_apply).collect();
        assert_eq!(kinds, [true, false, true, false, true, false]);
        assert!(seq.active().is_none());
    }

    #[test]
    fn failed_apply_is_still_cleaned_up() {
        let mut sink = RecordingSink::failing_apply_at(1);
        let mut seq = NetemSequencer::new(timeline_of_three());
        seq.start(&mut sink).unwrap();
        assert!(seq.run_holds(&mut sink).is_err());
        seq.cleanup(&mut sink);

        let kinds: Vec<_> = sink.events.iter().map(SinkEvent::is_apply).collect();
        // apply, undo, apply (fails), cleanup undo
        assert_eq!(kinds, [true, false, true, false]);
        assert!(seq.active().is_none());
        assert_eq!(seq.remaining(), 0);
    }

    #[test]
    fn failed_undo_is_retried_by_cleanup() {
        let mut sink = RecordingSink::failing_undo_at(0);
        let mut seq = NetemSequencer::new(timeline_of_three());
        seq.start(&mut sink).unwrap();
        assert!(seq.run_holds(&mut sink).is_err());
        // The failed undo keeps the segment active for cleanup.
        assert!(seq.active().is_some());
        seq.cleanup(&mut sink);

        let kinds: Vec<_> = sink.events.iter().map(SinkEvent::is_apply).collect();
        assert_eq!(kinds, [true, false, false]);
        assert!(seq.active().is_none());
    }

    #[test]
    fn cleanup_on_idle_sequencer_does_nothing() {
        let mut sink = RecordingSink::default();
        let mut seq = NetemSequencer::new(Vec::new());
        seq.start(&mut sink).unwrap();
        seq.cleanup(&mut sink);
        assert!(sink.events.is_empty());
    }
}
