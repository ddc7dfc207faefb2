//! NuMu Run Metrics
//! ================
//!
//! Scalar accumulators that outlive a single event:
//! - **Event counters**: processed events and events with a kept interaction
//! - **Cut flow**: how many interactions survive each selection stage, per
//!   truth mode
//!
//! The context is passed explicitly to the assembler; per-worker contexts
//! can be combined with [`RunContext::merge`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::numu_truth::InteractionMode;

/// Selection stages in the order they are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CutStage {
    Reconstructed,
    Matched,
    HasTrack,
    Contained,
}

impl CutStage {
    pub const ALL: [CutStage; 4] = [
        CutStage::Reconstructed,
        CutStage::Matched,
        CutStage::HasTrack,
        CutStage::Contained,
    ];

    fn index(self) -> usize {
        match self {
            CutStage::Reconstructed => 0,
            CutStage::Matched => 1,
            CutStage::HasTrack => 2,
            CutStage::Contained => 3,
        }
    }
}

/// Per-mode count of interactions surviving each stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CutFlow {
    counts: HashMap<InteractionMode, [u64; 4]>,
}

impl CutFlow {
    /// Record an interaction of `mode` that survived every stage up to and
    /// including `last_passed`. Also counted under `InteractionMode::All`.
    pub fn record(&mut self, mode: InteractionMode, last_passed: CutStage) {
        for m in [mode, InteractionMode::All] {
            let row = self.counts.entry(m).or_insert([0; 4]);
            for slot in row.iter_mut().take(last_passed.index() + 1) {
                *slot += 1;
            }
            if mode == InteractionMode::All {
                break;
            }
        }
    }

    /// Interactions of `mode` that survived `stage`.
    pub fn count(&self, mode: InteractionMode, stage: CutStage) -> u64 {
        self.counts.get(&mode).map(|row| row[stage.index()]).unwrap_or(0)
    }

    pub fn merge(&mut self, other: &CutFlow) {
        for (mode, row) in &other.counts {
            let mine = self.counts.entry(*mode).or_insert([0; 4]);
            for (a, b) in mine.iter_mut().zip(row) {
                *a += b;
            }
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub events_processed: u64,
    /// Events with at least one kept interaction
    pub events_selected: u64,
    pub interactions_reconstructed: u64,
    pub interactions_kept: u64,
    pub cut_flow: CutFlow,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: &RunContext) {
        self.events_processed += other.events_processed;
        self.events_selected += other.events_selected;
        self.interactions_reconstructed += other.interactions_reconstructed;
        self.interactions_kept += other.interactions_kept;
        self.cut_flow.merge(&other.cut_flow);
    }

    /// Fraction of processed events that were selected.
    pub fn selection_efficiency(&self) -> f64 {
        if self.events_processed == 0 {
            0.0
        } else {
            self.events_selected as f64 / self.events_processed as f64
        }
    }

    pub fn log_summary(&self) {
        info!(
            "Processed {} events, selected {} ({:.1}%), kept {}/{} interactions",
            self.events_processed,
            self.events_selected,
            100.0 * self.selection_efficiency(),
            self.interactions_kept,
            self.interactions_reconstructed
        );
        for stage in CutStage::ALL {
            info!("  {:?}: {}", stage, self.cut_flow.count(InteractionMode::All, stage));
        }
    }
}
