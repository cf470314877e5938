//! Network impairment and peer execution for callbench.
//!
//! Provides `tc netem` profile building, timed segment sequencing, command
//! execution on local, namespaced, or SSH targets, and peer process
//! management for caller/callee pairs.

pub mod exec;
pub mod impairment;
pub mod profile;
pub mod runner;
pub mod sequencer;
pub mod topology;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;
