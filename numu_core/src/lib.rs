//! numu Core - Muon-Neutrino Event Reconstruction and Cross-Detector Matching
//!
//! Turns one event's raw records into reconstructed interaction candidates:
//! 1. **Kinematics**: range and multiple-scattering momentum, dE/dx particle identity
//! 2. **External matching**: CRT hits/tracks and light flashes per track
//! 3. **Truth association**: energy-weighted hit completeness and interaction matching
//! 4. **Selection**: particle-flow slices, primary tracks, cuts and weights

pub mod config;
pub mod error;
pub mod metrics;
pub mod numu_assembler;
pub mod numu_crt;
pub mod numu_flash;
pub mod numu_geometry;
pub mod numu_kinematics;
pub mod numu_slice;
pub mod numu_truth;
pub mod output;
pub mod select;

// Re-export key types for convenience
pub use config::SelectionConfig;
pub use error::RecoError;
pub use metrics::{CutFlow, CutStage, RunContext};
pub use numu_assembler::{Assembler, ProcessedEvent, RecoEvent, RecoInteraction, SelectedInteraction};
pub use numu_crt::{CrtMatch, CrtMatchConfig};
pub use numu_flash::{FlashMatch, FlashMatchConfig, FlashMatchMethod};
pub use numu_geometry::{point_in_volumes, GeometryConfig, TrackTopology, Volume};
pub use numu_kinematics::{Hypothesis, KinematicsConfig, RecoTrack, TrackKinematics, TrackSource};
pub use numu_slice::{RecoParticle, RecoSlice, SliceConfig, SliceState};
pub use numu_truth::{InteractionMode, TrackMode, TrackTruthMatch, TruthConfig, TruthMatch};
pub use output::{OutputRow, UNFILLED};
