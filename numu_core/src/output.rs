//! Flat output rows.
//!
//! The only place where absent values turn into sentinels: `UNFILLED` for
//! numbers, `-1` for indices, `-1.5` for a missing PID minimum.

use serde::{Deserialize, Serialize};

use crate::numu_assembler::SelectedInteraction;
use crate::numu_kinematics::{Hypothesis, RecoTrack};

/// Marker for an absent numeric value.
pub const UNFILLED: f64 = -99999.0;
/// Marker for an absent integer code.
pub const UNFILLED_INT: i32 = -99999;
/// Marker for an absent index.
pub const NO_INDEX: i64 = -1;
/// Marker for a missing PID chi-square minimum.
pub const NO_MIN_CHI2: f64 = -1.5;

fn num(v: Option<f64>) -> f64 {
    v.unwrap_or(UNFILLED)
}

fn index(v: Option<usize>) -> i64 {
    v.and_then(|i| i64::try_from(i).ok()).unwrap_or(NO_INDEX)
}

/// One kept interaction, flattened for tabular analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRow {
    pub run: u32,
    pub subrun: u32,
    pub event: u64,
    pub reco_index: i64,
    pub weight: f64,

    // Interaction
    pub vertex_x: f64,
    pub vertex_y: f64,
    pub vertex_z: f64,
    pub nu_energy: f64,
    pub multiplicity: u32,
    pub vertex_is_fiducial: bool,

    // Interaction truth match
    pub has_match: bool,
    pub mode: i32,
    pub tmode: i32,
    pub mctruth_vertex_id: i64,
    pub event_vertex_id: i64,
    pub mctruth_track_id: i64,
    pub event_track_id: i64,
    pub truth_vertex_distance: f64,
    pub is_misreconstructed: bool,

    // Primary track
    pub primary_track_index: i64,
    pub track_length: f64,
    pub track_costh: f64,
    pub track_momentum: f64,
    pub track_energy: f64,
    pub track_range_momentum: f64,
    pub track_range_momentum_muon: f64,
    pub track_mcs_momentum_fwd: f64,
    pub track_mcs_momentum_bwd: f64,
    pub track_mcs_uncertainty: f64,
    pub track_mcs_muon_momentum: f64,
    pub track_mcs_is_backward: bool,
    pub track_chi2_proton: f64,
    pub track_chi2_kaon: f64,
    pub track_chi2_pion: f64,
    pub track_chi2_muon: f64,
    pub track_min_chi2: f64,
    pub track_pid_n_dof: i32,
    pub track_pdgid: i32,
    pub track_is_muon: bool,
    pub track_contained_in_cryo: bool,
    pub track_contained_in_tpc: bool,
    pub track_crosses_tpc: bool,
    pub track_is_contained: bool,
    pub track_start_x: f64,
    pub track_start_y: f64,
    pub track_start_z: f64,
    pub track_end_x: f64,
    pub track_end_y: f64,
    pub track_end_z: f64,
    pub track_dist_to_vertex: f64,
    pub track_deposited_energy_max: f64,
    pub track_deposited_energy_avg: f64,
    pub track_deposited_energy_med: f64,
    pub track_stopping_chi2_start: f64,
    pub track_stopping_chi2_end: f64,
    pub track_tpc_t0s: Vec<f64>,

    // Primary track truth match
    pub track_has_truth_match: bool,
    pub track_mcparticle_id: i32,
    pub track_completion: f64,
    pub track_match_pdg: i32,
    pub track_mctruth_origin: i32,
    pub track_mctruth_ccnc: i32,
    pub track_mctruth_has_neutrino: bool,

    // Primary track external matches (closest first)
    pub n_crt_matches: u32,
    pub crt_has_hit_match: bool,
    pub crt_has_track_match: bool,
    pub crt_hit_distance: f64,
    pub crt_match_time: f64,
    pub n_flash_matches: u32,
    pub flash_match_time: f64,
    pub flash_match_time_first: f64,
    pub flash_match_time_width: f64,
    pub flash_match_pe: f64,
}

impl OutputRow {
    pub fn from_selected(selected: &SelectedInteraction) -> Self {
        let interaction = &selected.interaction;
        let m = &interaction.truth_match;
        let vertex = interaction.position;
        let track = interaction.primary_track.as_ref();

        let mut row = Self {
            run: selected.run,
            subrun: selected.subrun,
            event: selected.event,
            reco_index: index(Some(selected.reco_index)),
            weight: selected.weight,
            vertex_x: num(vertex.map(|v| v.x)),
            vertex_y: num(vertex.map(|v| v.y)),
            vertex_z: num(vertex.map(|v| v.z)),
            nu_energy: num(interaction.nu_energy),
            multiplicity: u32::try_from(interaction.multiplicity).unwrap_or(u32::MAX),
            vertex_is_fiducial: interaction.is_fiducial,
            has_match: m.has_match,
            mode: m.mode.code(),
            tmode: m.tmode.code(),
            mctruth_vertex_id: index(m.mctruth_vertex_id),
            event_vertex_id: index(m.event_vertex_id),
            mctruth_track_id: index(m.mctruth_track_id),
            event_track_id: index(m.event_track_id),
            truth_vertex_distance: num(m.truth_vertex_distance),
            is_misreconstructed: m.is_misreconstructed,
            primary_track_index: index(interaction.slice.primary_track_index),
            ..Self::empty_track()
        };
        if let Some(track) = track {
            row.fill_track(track);
        }
        row
    }

    /// Header fields zeroed, every track field unfilled.
    fn empty_track() -> Self {
        Self {
            run: 0,
            subrun: 0,
            event: 0,
            reco_index: NO_INDEX,
            weight: 0.0,
            vertex_x: UNFILLED,
            vertex_y: UNFILLED,
            vertex_z: UNFILLED,
            nu_energy: UNFILLED,
            multiplicity: 0,
            vertex_is_fiducial: false,
            has_match: false,
            mode: UNFILLED_INT,
            tmode: UNFILLED_INT,
            mctruth_vertex_id: NO_INDEX,
            event_vertex_id: NO_INDEX,
            mctruth_track_id: NO_INDEX,
            event_track_id: NO_INDEX,
            truth_vertex_distance: UNFILLED,
            is_misreconstructed: false,
            primary_track_index: NO_INDEX,
            track_length: UNFILLED,
            track_costh: UNFILLED,
            track_momentum: UNFILLED,
            track_energy: UNFILLED,
            track_range_momentum: UNFILLED,
            track_range_momentum_muon: UNFILLED,
            track_mcs_momentum_fwd: UNFILLED,
            track_mcs_momentum_bwd: UNFILLED,
            track_mcs_uncertainty: UNFILLED,
            track_mcs_muon_momentum: UNFILLED,
            track_mcs_is_backward: false,
            track_chi2_proton: UNFILLED,
            track_chi2_kaon: UNFILLED,
            track_chi2_pion: UNFILLED,
            track_chi2_muon: UNFILLED,
            track_min_chi2: NO_MIN_CHI2,
            track_pid_n_dof: UNFILLED_INT,
            track_pdgid: UNFILLED_INT,
            track_is_muon: false,
            track_contained_in_cryo: false,
            track_contained_in_tpc: false,
            track_crosses_tpc: false,
            track_is_contained: false,
            track_start_x: UNFILLED,
            track_start_y: UNFILLED,
            track_start_z: UNFILLED,
            track_end_x: UNFILLED,
            track_end_y: UNFILLED,
            track_end_z: UNFILLED,
            track_dist_to_vertex: UNFILLED,
            track_deposited_energy_max: UNFILLED,
            track_deposited_energy_avg: UNFILLED,
            track_deposited_energy_med: UNFILLED,
            track_stopping_chi2_start: UNFILLED,
            track_stopping_chi2_end: UNFILLED,
            track_tpc_t0s: Vec::new(),
            track_has_truth_match: false,
            track_mcparticle_id: UNFILLED_INT,
            track_completion: UNFILLED,
            track_match_pdg: UNFILLED_INT,
            track_mctruth_origin: UNFILLED_INT,
            track_mctruth_ccnc: UNFILLED_INT,
            track_mctruth_has_neutrino: false,
            n_crt_matches: 0,
            crt_has_hit_match: false,
            crt_has_track_match: false,
            crt_hit_distance: UNFILLED,
            crt_match_time: UNFILLED,
            n_flash_matches: 0,
            flash_match_time: UNFILLED,
            flash_match_time_first: UNFILLED,
            flash_match_time_width: UNFILLED,
            flash_match_pe: UNFILLED,
        }
    }

    fn fill_track(&mut self, t: &RecoTrack) {
        self.track_length = num(t.length);
        self.track_costh = num(t.costh);
        self.track_momentum = num(t.momentum);
        self.track_energy = num(t.energy);
        self.track_range_momentum = num(t.range_momentum);
        self.track_range_momentum_muon = num(t.range_momentum_muon);
        self.track_mcs_momentum_fwd = num(t.mcs.map(|m| m.forward.momentum));
        self.track_mcs_momentum_bwd = num(t.mcs.map(|m| m.backward.momentum));
        self.track_mcs_uncertainty = num(t.mcs.map(|m| m.preferred().uncertainty));
        self.track_mcs_muon_momentum = num(t.mcs_muon.map(|m| m.preferred().momentum));
        self.track_mcs_is_backward = t.mcs_is_backward;

        if let Some(pid) = &t.pid {
            self.track_chi2_proton = pid.chi2(Hypothesis::Proton);
            self.track_chi2_kaon = pid.chi2(Hypothesis::Kaon);
            self.track_chi2_pion = pid.chi2(Hypothesis::Pion);
            self.track_chi2_muon = pid.chi2(Hypothesis::Muon);
            self.track_min_chi2 = pid.min_chi2;
            self.track_pid_n_dof = i32::try_from(pid.n_dof).unwrap_or(i32::MAX);
        }
        self.track_pdgid = t.pdgid.unwrap_or(UNFILLED_INT);
        self.track_is_muon = t.is_muon;

        self.track_contained_in_cryo = t.topology.contained_in_cryo;
        self.track_contained_in_tpc = t.topology.contained_in_tpc;
        self.track_crosses_tpc = t.topology.crosses_tpc;
        self.track_is_contained = t.topology.is_contained;

        self.track_start_x = num(t.start.map(|p| p.x));
        self.track_start_y = num(t.start.map(|p| p.y));
        self.track_start_z = num(t.start.map(|p| p.z));
        self.track_end_x = num(t.end.map(|p| p.x));
        self.track_end_y = num(t.end.map(|p| p.y));
        self.track_end_z = num(t.end.map(|p| p.z));
        self.track_dist_to_vertex = num(t.dist_to_vertex);

        self.track_deposited_energy_max = num(t.deposited_energy_max);
        self.track_deposited_energy_avg = num(t.deposited_energy_avg);
        self.track_deposited_energy_med = num(t.deposited_energy_med);
        self.track_stopping_chi2_start = num(t.stopping_chi2_start);
        self.track_stopping_chi2_end = num(t.stopping_chi2_end);
        self.track_tpc_t0s = t.tpc_t0s.clone();

        if let Some(m) = t.truth.matched() {
            self.track_has_truth_match = true;
            self.track_mcparticle_id = m.mcparticle_id;
            self.track_completion = m.completion;
            self.track_match_pdg = m.match_pdg;
            self.track_mctruth_origin = m.mctruth_origin.code();
            self.track_mctruth_ccnc = m.mctruth_ccnc.map(|c| c.code()).unwrap_or(UNFILLED_INT);
            self.track_mctruth_has_neutrino = m.mctruth_has_neutrino;
        }

        self.n_crt_matches = u32::try_from(t.crt_matches.len()).unwrap_or(u32::MAX);
        if let Some(crt) = t.crt_matches.first() {
            self.crt_has_hit_match = crt.has_hit_match();
            self.crt_has_track_match = crt.has_track_match();
            self.crt_hit_distance = num(crt.hit_distance);
            self.crt_match_time = crt.match_time;
        }
        self.n_flash_matches = u32::try_from(t.flash_matches.len()).unwrap_or(u32::MAX);
        if let Some(flash) = t.flash_matches.first() {
            self.flash_match_time = flash.match_time;
            self.flash_match_time_first = flash.match_time_first;
            self.flash_match_time_width = flash.match_time_width;
            self.flash_match_pe = flash.pe;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numu_assembler::RecoInteraction;
    use crate::numu_kinematics::TrackSource;
    use crate::numu_slice::RecoSlice;
    use crate::numu_truth::TruthMatch;
    use nalgebra::Vector3;

    fn selected(primary_track: Option<RecoTrack>) -> SelectedInteraction {
        SelectedInteraction {
            run: 1,
            subrun: 0,
            event: 42,
            reco_index: 0,
            weight: 1.0,
            interaction: RecoInteraction {
                slice: RecoSlice::default(),
                position: Some(Vector3::new(1.0, 2.0, 3.0)),
                is_fiducial: true,
                nu_energy: None,
                truth_match: TruthMatch::unmatched(),
                multiplicity: 0,
                primary_track,
            },
        }
    }

    #[test]
    fn test_absent_values_become_sentinels() {
        let row = OutputRow::from_selected(&selected(None));
        assert_eq!(row.event, 42);
        assert_eq!(row.vertex_z, 3.0);
        assert_eq!(row.nu_energy, UNFILLED);
        assert_eq!(row.primary_track_index, NO_INDEX);
        assert_eq!(row.mctruth_vertex_id, NO_INDEX);
        assert_eq!(row.track_min_chi2, NO_MIN_CHI2);
        assert_eq!(row.track_length, UNFILLED);
        assert_eq!(row.track_mcparticle_id, UNFILLED_INT);
        assert_eq!(row.mode, 3);
        assert!(row.vertex_is_fiducial);
        assert!(row.track_tpc_t0s.is_empty());
    }

    #[test]
    fn test_track_without_pid_keeps_min_chi2_sentinel() {
        let mut track = RecoTrack::empty(TrackSource::Reco(4));
        track.length = Some(12.5);
        track.pdgid = Some(13);
        let row = OutputRow::from_selected(&selected(Some(track)));
        assert_eq!(row.track_length, 12.5);
        assert_eq!(row.track_pdgid, 13);
        assert_eq!(row.track_min_chi2, NO_MIN_CHI2);
        assert_eq!(row.n_crt_matches, 0);
        assert_eq!(row.crt_match_time, UNFILLED);
    }

    #[test]
    fn test_crossing_track_times_are_carried() {
        let mut track = RecoTrack::empty(TrackSource::Reco(4));
        track.topology.crosses_tpc = true;
        track.tpc_t0s = vec![12.0, 12.4];
        let row = OutputRow::from_selected(&selected(Some(track)));
        assert!(row.track_crosses_tpc);
        assert_eq!(row.track_tpc_t0s, vec![12.0, 12.4]);
    }

    #[test]
    fn test_row_serializes_to_json() {
        let row = OutputRow::from_selected(&selected(None));
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["event_track_id"], -1);
        assert_eq!(json["track_energy"], -99999.0);
    }
}
