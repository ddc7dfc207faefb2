//! numu Simulation Harness
//!
//! Deterministic end-to-end testing of the reconstruction core: a seeded
//! oracle generates events whose truth is known, the assembler reconstructs
//! them, and each scenario checks the result against that truth.
//!
//! # Core Principle: One Seed, One Run
//!
//! All randomness (vertices, directions, lengths, smearing) comes from a
//! single ChaCha stream seeded with a `u64`, so any failure is reproducible
//! from its seed alone.
//!
//! # Usage
//!
//! ```ignore
//! use numu_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_events(50).run(ScenarioId::CrtTiming);
//! assert!(result.passed);
//! ```

mod exporter;
mod oracle;
mod runner;
pub mod scenarios;

pub use exporter::RowExport;
pub use oracle::{GeneratedTruth, MuonTopology, NeutrinoEventSpec, Oracle, MUON_TRACK_ID, PROTON_TRACK_ID};
pub use runner::{ScenarioResult, ScenarioRunner};
