//! callbench session orchestration.
//!
//! - [`session`]: the Idle → Open → Executing controller and session specs
//! - [`driver`]: controller wiring and multi-session plan execution
//! - [`broker`], [`scoring`], [`samples`], [`telemetry`]: the collaborators a
//!   session drives
//! - [`config`], [`plan`]: TOML harness config and run plans

pub mod broker;
pub mod config;
pub mod driver;
pub mod plan;
pub mod samples;
pub mod scoring;
pub mod session;
pub mod telemetry;
