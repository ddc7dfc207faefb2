//! Scenario runner - pushes oracle events through the assembler and checks
//! the outcome against what the oracle generated.

use numu_core::{Assembler, OutputRow, RunContext, SelectionConfig};
use numu_records::{EventSource, MemorySource};
use tracing::{debug, info};

use crate::oracle::{GeneratedTruth, MuonTopology, NeutrinoEventSpec, Oracle};
use crate::scenarios::ScenarioId;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether every event satisfied the scenario's checks
    pub passed: bool,

    /// Counters accumulated over the run
    pub context: RunContext,

    /// Output rows of every kept interaction
    pub rows: Vec<OutputRow>,

    /// Failure message if any
    pub failure_reason: Option<String>,
}

/// Runs reconstruction scenarios.
pub struct ScenarioRunner {
    /// Oracle seed
    seed: u64,

    /// Events generated per scenario
    num_events: usize,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self { seed, num_events: 20 }
    }

    /// Sets the number of events per scenario.
    pub fn with_events(mut self, n: usize) -> Self {
        self.num_events = n.max(1);
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let mut result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            context: RunContext::new(),
            rows: Vec::new(),
            failure_reason: None,
        };
        match self.execute(scenario, &mut result) {
            Ok(()) => result.passed = true,
            Err(reason) => result.failure_reason = Some(reason),
        }
        result
    }

    fn config_for(scenario: ScenarioId) -> SelectionConfig {
        let mut config = SelectionConfig::default();
        match scenario {
            ScenarioId::CrtTiming => config.crt.crt_hit_time_window = 5.0,
            ScenarioId::ContainmentCut => {
                config.require_track = true;
                config.require_contained = true;
            }
            _ => {}
        }
        config
    }

    fn spec_for(scenario: ScenarioId) -> NeutrinoEventSpec {
        match scenario {
            ScenarioId::TruthCompleteness => NeutrinoEventSpec {
                muon_completion: 0.8,
                ..NeutrinoEventSpec::default()
            },
            ScenarioId::CrtTiming => NeutrinoEventSpec {
                t0: Some(1.5),
                crt_hit_offsets: vec![0.1, 50.0],
                ..NeutrinoEventSpec::default()
            },
            ScenarioId::ContainmentCut => NeutrinoEventSpec {
                topology: MuonTopology::Exiting,
                ..NeutrinoEventSpec::default()
            },
            _ => NeutrinoEventSpec::default(),
        }
    }

    fn execute(&self, scenario: ScenarioId, result: &mut ScenarioResult) -> Result<(), String> {
        let assembler = Assembler::new(Self::config_for(scenario)).map_err(|e| e.to_string())?;
        let spec = Self::spec_for(scenario);
        let mut oracle = Oracle::new(self.seed);

        if scenario == ScenarioId::EmptyEvent {
            let mut source = MemorySource::new((0..self.num_events).map(|_| oracle.truth_only_event()));
            while let Some(event) = source.next_event() {
                let i = source.events_read();
                let ev = event.map_err(|e| format!("event {}: {}", i, e))?;
                let out = assembler.process_event(&ev, &mut result.context);
                if !out.reco_event.reco.is_empty() {
                    return Err(format!("event {}: reco interactions without particles", i));
                }
                if out.reco_event.truth.len() != 1 {
                    return Err(format!("event {}: expected one truth interaction", i));
                }
            }
            return Ok(());
        }

        for i in 0..self.num_events {
            match scenario {
                ScenarioId::CosmicRejection => {
                    let cosmic = oracle.cosmic_event();
                    let out = assembler.process_event(&cosmic, &mut result.context);
                    if !out.reco_event.reco.is_empty() {
                        return Err(format!("event {}: clear cosmic became an interaction", i));
                    }
                    let (ev, _) = oracle.neutrino_event(&spec);
                    let out = assembler.process_event(&ev, &mut result.context);
                    if out.reco_event.reco.len() != 1 {
                        return Err(format!("event {}: neutrino slice lost", i));
                    }
                    result.rows.extend(out.selected.iter().map(OutputRow::from_selected));
                }
                _ => {
                    let (ev, truth) = oracle.neutrino_event(&spec);
                    let out = assembler.process_event(&ev, &mut result.context);
                    let interaction = out
                        .reco_event
                        .reco
                        .first()
                        .ok_or_else(|| format!("event {}: no interaction", i))?;
                    let primary = interaction
                        .primary_track
                        .as_ref()
                        .ok_or_else(|| format!("event {}: no primary track", i))?;
                    Self::check_primary(scenario, i, primary, &truth, out.selected.len())?;
                    result.rows.extend(out.selected.iter().map(OutputRow::from_selected));
                }
            }
        }

        debug!(
            "{}: {} events, {} interactions kept",
            scenario.name(),
            result.context.events_processed,
            result.context.interactions_kept
        );
        Ok(())
    }

    fn check_primary(
        scenario: ScenarioId,
        i: usize,
        primary: &numu_core::RecoTrack,
        truth: &GeneratedTruth,
        kept: usize,
    ) -> Result<(), String> {
        match scenario {
            ScenarioId::ContainedMuon => {
                if !primary.is_contained() {
                    return Err(format!("event {}: contained muon flagged uncontained", i));
                }
                if !primary.crt_matches.is_empty() || !primary.flash_matches.is_empty() {
                    return Err(format!("event {}: external matches without external data", i));
                }
                if primary.momentum.is_none() || primary.momentum != primary.range_momentum {
                    return Err(format!("event {}: momentum is not the range estimate", i));
                }
                if let Some(length) = primary.length {
                    if (length - truth.muon_length).abs() > 0.05 * truth.muon_length {
                        return Err(format!("event {}: length {:.1} vs true {:.1}", i, length, truth.muon_length));
                    }
                }
            }
            ScenarioId::TruthCompleteness => {
                let m = primary
                    .truth
                    .matched()
                    .ok_or_else(|| format!("event {}: primary track unmatched", i))?;
                if m.match_pdg != 13 || (m.completion - truth.muon_completion).abs() > 1e-9 {
                    return Err(format!(
                        "event {}: matched pdg {} completion {:.3}",
                        i, m.match_pdg, m.completion
                    ));
                }
            }
            ScenarioId::CrtTiming => {
                let hits: Vec<_> = primary.crt_matches.iter().filter(|m| m.has_hit_match()).collect();
                if hits.len() != 1 {
                    return Err(format!("event {}: {} CRT hit matches", i, hits.len()));
                }
                let dt = hits[0].match_time - primary.t0.unwrap_or(0.0);
                if (dt - 0.1).abs() > 1e-9 {
                    return Err(format!("event {}: matched CRT hit at {:+.2}us", i, dt));
                }
            }
            ScenarioId::ContainmentCut => {
                if primary.is_contained() {
                    return Err(format!("event {}: exiting muon flagged contained", i));
                }
                if kept != 0 {
                    return Err(format!("event {}: exiting interaction survived the cut", i));
                }
            }
            ScenarioId::EmptyEvent | ScenarioId::CosmicRejection => {}
        }
        Ok(())
    }
}
