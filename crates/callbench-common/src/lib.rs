//! Shared types for callbench.
//!
//! This crate contains:
//! - **Errors**: the session error taxonomy used by every crate
//! - **Models**: ledger rows, traffic counters, score dimensions
//! - **Ledger**: append-only CSV store of completed sessions
//! - **Aggregation**: ranked per-entry and per-network score reports
//! - **IDs**: run ids and broker nonces

pub mod aggregate;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod models;

pub use error::{CallbenchError, Result};
