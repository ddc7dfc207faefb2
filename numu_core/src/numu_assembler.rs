//! The "ASSEMBLER" - Per-Event Reconstruction Pipeline
//!
//! Runs every component over one event, in dependency order:
//! 1. Particle-flow particles
//! 2. Track kinematics, then CRT / flash / truth annotations per track
//! 3. Slices and primary tracks
//! 4. Truth interactions and truth-only tracks
//! 5. Reconstructed interactions with their truth match
//! 6. Selection cuts and weights
//!
//! A failed cut only drops that interaction. The run context is the only
//! state that outlives the event.

use nalgebra::Vector3;
use numu_records::{EventRecords, HitRecord, TruthRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::SelectionConfig;
use crate::error::RecoError;
use crate::metrics::{CutStage, RunContext};
use crate::numu_crt::{filter_hits_in_flash_range, match_track_to_crt};
use crate::numu_flash::match_track_to_flashes;
use crate::numu_kinematics::{tpc_t0s, RecoTrack, TrackKinematics};
use crate::numu_slice::{reco_particles, reco_slices, select_slices, RecoSlice, SliceState};
use crate::numu_truth::{match_interaction_to_truth, InteractionMode, TruthIndex, TruthMatch};

// ============================================================================
// EVENT PRODUCTS
// ============================================================================

/// A candidate neutrino interaction, reconstructed or from truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoInteraction {
    pub slice: RecoSlice,
    /// Interaction vertex (cm)
    pub position: Option<Vector3<f64>>,
    /// Vertex inside the fiducial volumes
    pub is_fiducial: bool,
    /// Neutrino energy estimate (GeV)
    pub nu_energy: Option<f64>,
    pub truth_match: TruthMatch,
    pub multiplicity: usize,
    pub primary_track: Option<RecoTrack>,
}

/// Everything reconstructed for one event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoEvent {
    /// Every reconstructed track, in record order
    pub tracks: Vec<RecoTrack>,
    /// Truth-only tracks keyed by simulation track id
    pub true_tracks: HashMap<i32, RecoTrack>,
    pub reco: Vec<RecoInteraction>,
    pub truth: Vec<RecoInteraction>,
}

/// An interaction that passed every enabled cut.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedInteraction {
    pub run: u32,
    pub subrun: u32,
    pub event: u64,
    /// Index into `RecoEvent::reco`
    pub reco_index: usize,
    pub weight: f64,
    pub interaction: RecoInteraction,
}

/// Output of one `process_event` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedEvent {
    pub reco_event: RecoEvent,
    pub selected: Vec<SelectedInteraction>,
}

// ============================================================================
// ASSEMBLER
// ============================================================================

pub struct Assembler {
    config: SelectionConfig,
    kinematics: TrackKinematics,
}

impl Assembler {
    /// Validate the configuration and build the calculators.
    pub fn new(config: SelectionConfig) -> Result<Self, RecoError> {
        config.validate()?;
        let kinematics = TrackKinematics::new(config.kinematics.clone())?;
        Ok(Self { config, kinematics })
    }

    /// Reconstruct one event and apply the selection.
    pub fn process_event(&self, records: &EventRecords, ctx: &mut RunContext) -> ProcessedEvent {
        let cfg = &self.config;
        let direction_length = cfg.kinematics.direction_length;
        let truth_index = records.has_truth().then(|| TruthIndex::new(records));

        // Particles and tracks
        let particles = reco_particles(&records.particles);
        let crt_hits = filter_hits_in_flash_range(&records.crt_hits, &records.flashes, &cfg.crt);
        let hits: HashMap<usize, &HitRecord> = records.hits.iter().map(|h| (h.id, h)).collect();

        let mut tracks = Vec::with_capacity(records.tracks.len());
        for record in &records.tracks {
            if record.trajectory.len() < 2 {
                debug!("Skipping track {} with {} trajectory points", record.id, record.trajectory.len());
                continue;
            }
            let mut track = self.kinematics.build(record, &cfg.geometry);
            track.crt_matches = match_track_to_crt(&track, &crt_hits, &records.crt_tracks, &cfg.crt);
            track.flash_matches = match_track_to_flashes(&track, &records.flashes, &cfg.flash);
            track.tpc_t0s = tpc_t0s(
                &track.topology,
                record.hit_ids.iter().filter_map(|id| hits.get(id).copied()),
            );
            if let Some(index) = &truth_index {
                track.truth = index.match_track_to_truth(&record.hit_ids);
            }
            tracks.push((record.id, track));
        }
        let track_map: HashMap<usize, RecoTrack> = tracks.iter().cloned().collect();

        // Truth
        let (truth, true_tracks) = match &truth_index {
            Some(index) => (
                index.truth_interactions(&cfg.geometry, direction_length, &cfg.truth),
                index.true_tracks(&cfg.geometry, direction_length, &cfg.truth),
            ),
            None => (Vec::new(), HashMap::new()),
        };

        // Slices → reconstructed interactions
        let mut reco = Vec::new();
        for mut slice in select_slices(reco_slices(&particles, &track_map)) {
            let state = SliceState::resolve(&slice, &cfg.slice);
            if !state.is_retained() {
                continue;
            }
            slice.primary_track_index = state.primary_track_index();
            debug!("Slice {:?} -> {:?}", slice.primary_index, state);
            reco.push(self.build_interaction(slice, &truth));
        }

        // Selection
        let mut selected = Vec::new();
        for (i, interaction) in reco.iter().enumerate() {
            ctx.interactions_reconstructed += 1;
            let last_passed = self.last_passed_cut(interaction);
            ctx.cut_flow.record(interaction.truth_match.mode, last_passed);
            if last_passed != CutStage::Contained {
                debug!("Interaction {} failed after {:?}", i, last_passed);
                continue;
            }
            let weight = self.weight(interaction, &records.truths);
            if cfg.verbose {
                info!(
                    "Event {}:{}:{} keeps interaction {} (mode {:?}, weight {:.3})",
                    records.run, records.subrun, records.event, i, interaction.truth_match.mode, weight
                );
            }
            selected.push(SelectedInteraction {
                run: records.run,
                subrun: records.subrun,
                event: records.event,
                reco_index: i,
                weight,
                interaction: interaction.clone(),
            });
        }

        ctx.events_processed += 1;
        ctx.interactions_kept += selected.len() as u64;
        if !selected.is_empty() {
            ctx.events_selected += 1;
        }
        debug!(
            "Event {}: {} tracks, {} reco / {} truth interactions, {} kept",
            records.event,
            tracks.len(),
            reco.len(),
            truth.len(),
            selected.len()
        );

        ProcessedEvent {
            reco_event: RecoEvent {
                tracks: tracks.into_iter().map(|(_, t)| t).collect(),
                true_tracks,
                reco,
                truth,
            },
            selected,
        }
    }

    fn build_interaction(&self, mut slice: RecoSlice, truth: &[RecoInteraction]) -> RecoInteraction {
        let position = slice
            .primary()
            .and_then(|p| p.vertices.first().copied())
            .or_else(|| slice.primary_track().and_then(|t| t.start));

        if let Some(vertex) = position {
            for track in slice.tracks.values_mut() {
                track.dist_to_vertex = track.start.map(|s| (s - vertex).norm());
            }
        }

        let primary_track = slice.primary_track().cloned();
        let nu_energy = primary_track.as_ref().and_then(|p| p.energy).map(|e| {
            let mut keys: Vec<usize> = slice
                .tracks
                .keys()
                .copied()
                .filter(|k| Some(*k) != slice.primary_track_index)
                .collect();
            keys.sort_unstable();
            e + keys
                .iter()
                .filter_map(|k| slice.tracks.get(k).and_then(|t| t.kinetic_energy()))
                .sum::<f64>()
        });

        let truth_match =
            match_interaction_to_truth(position.as_ref(), primary_track.as_ref(), truth, &self.config.truth);

        RecoInteraction {
            multiplicity: slice.tracks.len(),
            slice,
            position,
            is_fiducial: position.is_some_and(|v| self.config.geometry.contained_in_fv(&v)),
            nu_energy,
            truth_match,
            primary_track,
        }
    }

    /// Last selection stage the interaction survives.
    fn last_passed_cut(&self, interaction: &RecoInteraction) -> CutStage {
        let cfg = &self.config;
        if cfg.require_matched && !interaction.truth_match.has_match {
            return CutStage::Reconstructed;
        }
        if cfg.require_track && interaction.primary_track.is_none() {
            return CutStage::Matched;
        }
        if cfg.require_contained && !interaction.primary_track.as_ref().is_some_and(|t| t.is_contained()) {
            return CutStage::HasTrack;
        }
        CutStage::Contained
    }

    /// Constant × uniform weights of the vertex-matched truth × cosmic weight.
    ///
    /// A nearest truth vertex beyond the vertex tolerance contributes no
    /// uniform weights.
    fn weight(&self, interaction: &RecoInteraction, truths: &[TruthRecord]) -> f64 {
        let cfg = &self.config;
        let mut weight = cfg.constant_weight;
        let m = &interaction.truth_match;
        let matched_truth = m
            .mctruth_vertex_id
            .filter(|_| m.vertex_matched(cfg.truth.track_match_containment_cut))
            .and_then(|id| truths.iter().find(|t| t.index == id));
        if let Some(truth) = matched_truth {
            for key in &cfg.uniform_weights {
                if let Some(w) = truth.weights.get(key).and_then(|w| w.first()) {
                    weight *= w;
                }
            }
        }
        if interaction.truth_match.mode == InteractionMode::Cosmic {
            weight *= cfg.cosmic_weight;
        }
        weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use numu_records::{Current, NeutrinoRecord, Origin, PfParticleRecord, TrackRecord};

    fn straight(from: [f64; 3], to: [f64; 3], n: usize) -> Vec<[f64; 3]> {
        (0..=n)
            .map(|i| {
                let t = i as f64 / n as f64;
                [
                    from[0] + (to[0] - from[0]) * t,
                    from[1] + (to[1] - from[1]) * t,
                    from[2] + (to[2] - from[2]) * t,
                ]
            })
            .collect()
    }

    fn neutrino_event() -> EventRecords {
        let mut ev = EventRecords::new(1, 2, 3);
        ev.particles = vec![
            PfParticleRecord {
                id: 0,
                pdg: 14,
                parent: None,
                daughters: vec![1, 2],
                is_clear_cosmic: false,
                is_neutrino: true,
                nu_score: 0.9,
                vertices: vec![[-100.0, 0.0, 100.0]],
                track_id: None,
            },
            PfParticleRecord {
                id: 1,
                pdg: 13,
                parent: Some(0),
                daughters: vec![],
                is_clear_cosmic: false,
                is_neutrino: false,
                nu_score: 0.0,
                vertices: vec![],
                track_id: Some(10),
            },
            PfParticleRecord {
                id: 2,
                pdg: 2212,
                parent: Some(0),
                daughters: vec![],
                is_clear_cosmic: false,
                is_neutrino: false,
                nu_score: 0.0,
                vertices: vec![],
                track_id: Some(11),
            },
        ];
        ev.tracks = vec![
            TrackRecord {
                id: 10,
                trajectory: straight([-100.0, 0.0, 100.0], [-100.0, 0.0, 250.0], 60),
                calo: vec![],
                hit_ids: vec![],
                t0: None,
            },
            TrackRecord {
                id: 11,
                trajectory: straight([-100.0, 0.0, 100.0], [-80.0, 0.0, 110.0], 10),
                calo: vec![],
                hit_ids: vec![],
                t0: None,
            },
        ];
        ev
    }

    #[test]
    fn test_process_event_builds_interaction() {
        let assembler = Assembler::new(SelectionConfig::default()).unwrap();
        let mut ctx = RunContext::new();
        let out = assembler.process_event(&neutrino_event(), &mut ctx);

        assert_eq!(out.reco_event.tracks.len(), 2);
        assert_eq!(out.reco_event.reco.len(), 1);
        let interaction = &out.reco_event.reco[0];
        assert_eq!(interaction.multiplicity, 2);
        assert_eq!(interaction.slice.primary_track_index, Some(1));
        assert_eq!(interaction.position, Some(Vector3::new(-100.0, 0.0, 100.0)));
        assert!(interaction.is_fiducial);
        let primary = interaction.primary_track.as_ref().unwrap();
        assert!(primary.dist_to_vertex.unwrap() < 1e-9);
        assert!(interaction.nu_energy.unwrap() >= primary.energy.unwrap());
        assert!(!interaction.truth_match.has_match);

        assert_eq!(out.selected.len(), 1);
        assert_eq!(out.selected[0].weight, 1.0);
        assert_eq!(ctx.events_processed, 1);
        assert_eq!(ctx.events_selected, 1);
    }

    #[test]
    fn test_require_matched_drops_untruthed() {
        let cfg = SelectionConfig {
            require_matched: true,
            ..SelectionConfig::default()
        };
        let assembler = Assembler::new(cfg).unwrap();
        let mut ctx = RunContext::new();
        let out = assembler.process_event(&neutrino_event(), &mut ctx);
        assert_eq!(out.reco_event.reco.len(), 1);
        assert!(out.selected.is_empty());
        assert_eq!(ctx.events_selected, 0);
        assert_eq!(ctx.cut_flow.count(InteractionMode::All, CutStage::Matched), 0);
    }

    #[test]
    fn test_weights_from_vertex_matched_truth() {
        let mut ev = neutrino_event();
        let mut weights = HashMap::new();
        weights.insert("flux".to_string(), vec![1.5, 0.2]);
        weights.insert("xsec".to_string(), vec![2.0]);
        ev.truths = vec![TruthRecord {
            index: 0,
            origin: Origin::BeamNeutrino,
            neutrino: Some(NeutrinoRecord {
                pdg: 14,
                vertex: [-101.0, 0.0, 100.0],
                energy: 0.8,
                current: Current::Charged,
            }),
            weights,
        }];
        let cfg = SelectionConfig {
            constant_weight: 2.0,
            uniform_weights: vec!["flux".into(), "xsec".into(), "missing".into()],
            ..SelectionConfig::default()
        };
        let assembler = Assembler::new(cfg).unwrap();
        let out = assembler.process_event(&ev, &mut RunContext::new());

        assert_eq!(out.reco_event.truth.len(), 1);
        let sel = &out.selected[0];
        assert!(sel.interaction.truth_match.has_match);
        assert_eq!(sel.interaction.truth_match.mode, InteractionMode::ChargedCurrent);
        assert!((sel.weight - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_vertex_outside_fiducial_volume() {
        let mut ev = neutrino_event();
        ev.particles[0].vertices = vec![[-100.0, 0.0, 470.0]];
        let assembler = Assembler::new(SelectionConfig::default()).unwrap();
        let out = assembler.process_event(&ev, &mut RunContext::new());

        let interaction = &out.reco_event.reco[0];
        let vertex = interaction.position.unwrap();
        assert!(crate::numu_geometry::point_in_volumes(
            &vertex,
            &assembler.config.geometry.containment_volumes
        ));
        assert!(!interaction.is_fiducial);
    }

    #[test]
    fn test_far_truth_vertex_contributes_no_weight() {
        let mut ev = neutrino_event();
        let mut weights = HashMap::new();
        weights.insert("flux".to_string(), vec![1.5]);
        ev.truths = vec![TruthRecord {
            index: 0,
            origin: Origin::BeamNeutrino,
            neutrino: Some(NeutrinoRecord {
                pdg: 14,
                vertex: [100.0, 100.0, 400.0],
                energy: 0.8,
                current: Current::Charged,
            }),
            weights,
        }];
        let cfg = SelectionConfig {
            uniform_weights: vec!["flux".into()],
            ..SelectionConfig::default()
        };
        let assembler = Assembler::new(cfg).unwrap();
        let out = assembler.process_event(&ev, &mut RunContext::new());

        let sel = &out.selected[0];
        let m = &sel.interaction.truth_match;
        assert!(!m.has_match);
        assert_eq!(m.mctruth_vertex_id, Some(0));
        assert_eq!(sel.weight, 1.0);
    }

    #[test]
    fn test_crossing_track_gets_tpc_times() {
        let mut ev = neutrino_event();
        ev.tracks[0].trajectory = straight([-100.0, 0.0, 100.0], [50.0, 0.0, 250.0], 60);
        ev.tracks[0].hit_ids = vec![0, 1, 2, 3];
        ev.hits = [((0, 0), 9.0), ((0, 0), 6.5), ((0, 1), 7.25), ((0, 1), 8.0)]
            .into_iter()
            .enumerate()
            .map(|(id, (tpc, peak_time))| HitRecord {
                id,
                peak_time,
                tpc: Some(tpc),
                truth: vec![],
            })
            .collect();
        let assembler = Assembler::new(SelectionConfig::default()).unwrap();
        let out = assembler.process_event(&ev, &mut RunContext::new());

        let muon = &out.reco_event.tracks[0];
        assert!(muon.topology.crosses_tpc);
        assert_eq!(muon.tpc_t0s, vec![6.5, 7.25]);
        assert!(out.reco_event.tracks[1].tpc_t0s.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cfg = SelectionConfig {
            require_contained: true,
            ..SelectionConfig::default()
        };
        assert!(Assembler::new(cfg).is_err());
    }
}
