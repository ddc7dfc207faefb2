//! The "KINEMATICS" Engine - Momentum, Particle Identity and Topology
//!
//! Turns a raw 3-D track into a `RecoTrack` feature record:
//! 1. Range momentum (CSDA table / proton range law), contained tracks only
//! 2. Multiple Coulomb scattering (MCS) momentum, forward and backward
//! 3. dE/dx chi-square particle identification per hypothesis
//! 4. Best-estimate momentum and energy
//! 5. Deposited-energy summaries and stopping (Bragg peak) chi-square
//!
//! External-detector and truth annotations are attached later by the
//! assembler; this module only fills what the track itself determines.

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use numu_records::{CaloPoint, HitRecord, TrackRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::RecoError;
use crate::numu_crt::CrtMatch;
use crate::numu_flash::FlashMatch;
use crate::numu_geometry::{GeometryConfig, TrackTopology};
use crate::numu_truth::TrackTruthMatch;
use crate::select::{cmp_f64, select_min_by};

/// Muon mass (GeV)
pub const MUON_MASS: f64 = 0.105_658;
/// Charged pion mass (GeV)
pub const PION_MASS: f64 = 0.139_570;
/// Charged kaon mass (GeV)
pub const KAON_MASS: f64 = 0.493_677;
/// Proton mass (GeV)
pub const PROTON_MASS: f64 = 0.938_272;

/// Liquid argon density (g/cm³)
const LAR_DENSITY: f64 = 1.396;
/// Liquid argon radiation length (cm)
const LAR_RADIATION_LENGTH: f64 = 14.0;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the kinematics calculators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KinematicsConfig {
    /// MCS segment length (default: 14 cm, one radiation length)
    pub mcs_segment_length: f64,

    /// MCS momentum scan range and step (GeV)
    pub mcs_min_momentum: f64,
    pub mcs_max_momentum: f64,
    pub mcs_momentum_step: f64,

    /// Angular resolution added in quadrature to the Highland width (rad)
    pub mcs_angular_resolution: f64,

    /// Energy loss assumed along the track during the MCS fit (MeV/cm)
    pub mcs_energy_loss: f64,

    /// Calorimetry samples beyond this residual range are not used for PID (cm)
    pub pid_max_residual_range: f64,

    /// Length near each end used for the stopping chi-square (cm)
    pub stopping_fit_length: f64,

    /// Minimum samples for a stopping chi-square
    pub stopping_min_points: usize,

    /// Length near each end used to estimate the end directions (cm)
    pub direction_length: f64,
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            mcs_segment_length: 14.0,
            mcs_min_momentum: 0.01,
            mcs_max_momentum: 7.5,
            mcs_momentum_step: 0.01,
            mcs_angular_resolution: 0.003,
            mcs_energy_loss: 2.1,
            pid_max_residual_range: 26.0,
            stopping_fit_length: 30.0,
            stopping_min_points: 5,
            direction_length: 10.0,
        }
    }
}

impl KinematicsConfig {
    pub fn validate(&self) -> Result<(), RecoError> {
        if !(self.mcs_segment_length > 0.0) {
            return Err(RecoError::config("mcs_segment_length must be positive"));
        }
        if !(self.mcs_momentum_step > 0.0) || !(self.mcs_min_momentum > 0.0) || self.mcs_max_momentum < self.mcs_min_momentum {
            return Err(RecoError::config("MCS momentum scan range is empty"));
        }
        Ok(())
    }
}

// ============================================================================
// PARTICLE HYPOTHESES
// ============================================================================

/// Particle-identity hypotheses scored by the dE/dx chi-square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hypothesis {
    Proton,
    Kaon,
    Pion,
    Muon,
}

impl Hypothesis {
    pub const ALL: [Hypothesis; 4] = [Hypothesis::Proton, Hypothesis::Kaon, Hypothesis::Pion, Hypothesis::Muon];

    pub fn pdg(self) -> i32 {
        match self {
            Hypothesis::Proton => 2212,
            Hypothesis::Kaon => 321,
            Hypothesis::Pion => 211,
            Hypothesis::Muon => 13,
        }
    }

    pub fn mass(self) -> f64 {
        match self {
            Hypothesis::Proton => PROTON_MASS,
            Hypothesis::Kaon => KAON_MASS,
            Hypothesis::Pion => PION_MASS,
            Hypothesis::Muon => MUON_MASS,
        }
    }

    /// Reference dE/dx (MeV/cm) at a residual range (cm): `A · R^-b`.
    pub fn reference_dedx(self, residual_range: f64) -> f64 {
        let (a, b) = match self {
            Hypothesis::Proton => (17.0, 0.42),
            Hypothesis::Kaon => (14.0, 0.41),
            Hypothesis::Pion => (9.0, 0.37),
            Hypothesis::Muon => (8.0, 0.37),
        };
        a * residual_range.powf(-b)
    }
}

/// Mass for a PDG code, muon mass for anything unknown.
pub fn mass_for_pdg(pdg: i32) -> f64 {
    match pdg.abs() {
        11 => 0.000_511,
        13 => MUON_MASS,
        211 => PION_MASS,
        321 => KAON_MASS,
        2212 => PROTON_MASS,
        2112 => 0.939_565,
        _ => MUON_MASS,
    }
}

// ============================================================================
// RANGE MOMENTUM
// ============================================================================

/// Monotonic range → kinetic energy calibration.
#[derive(Debug, Clone)]
pub struct RangeTable {
    /// Range (cm), strictly increasing
    range: Vec<f64>,
    /// Kinetic energy (MeV)
    kinetic_energy: Vec<f64>,
}

impl RangeTable {
    pub fn new(
        name: &'static str,
        range: Vec<f64>,
        kinetic_energy: Vec<f64>,
    ) -> Result<Self, RecoError> {
        let increasing = |v: &[f64]| v.windows(2).all(|w| w[1] > w[0]);
        if range.len() != kinetic_energy.len() || range.len() < 2 || !increasing(&range) || !increasing(&kinetic_energy) {
            return Err(RecoError::NonMonotonicCalibration(name));
        }
        Ok(Self { range, kinetic_energy })
    }

    /// Liquid argon muon CSDA range table.
    pub fn muon_csda() -> Result<Self, RecoError> {
        const KE_MEV: [f64; 22] = [
            0.0, 10.0, 14.0, 20.0, 30.0, 40.0, 80.0, 100.0, 140.0, 200.0, 300.0, 400.0, 800.0,
            1000.0, 1400.0, 2000.0, 3000.0, 4000.0, 8000.0, 10000.0, 14000.0, 20000.0,
        ];
        const RANGE_G_CM2: [f64; 22] = [
            0.0, 0.9833, 1.786, 3.321, 6.598, 10.58, 30.84, 42.50, 67.32, 106.3, 172.5, 238.5,
            493.4, 616.3, 855.2, 1202.0, 1758.0, 2297.0, 4359.0, 5354.0, 7298.0, 10130.0,
        ];
        Self::new(
            "muon_csda",
            RANGE_G_CM2.iter().map(|r| r / LAR_DENSITY).collect(),
            KE_MEV.to_vec(),
        )
    }

    /// Kinetic energy (MeV) for a range (cm), linear interpolation clamped
    /// to the table.
    pub fn kinetic_energy(&self, range: f64) -> f64 {
        let last = self.range.len() - 1;
        if range <= self.range[0] {
            return self.kinetic_energy[0];
        }
        if range >= self.range[last] {
            return self.kinetic_energy[last];
        }
        let i = self.range.partition_point(|&r| r <= range);
        let (r0, r1) = (self.range[i - 1], self.range[i]);
        let (e0, e1) = (self.kinetic_energy[i - 1], self.kinetic_energy[i]);
        e0 + (e1 - e0) * (range - r0) / (r1 - r0)
    }
}

/// Momentum (GeV) from kinetic energy (GeV) and mass.
#[inline]
pub fn momentum_from_kinetic(ke: f64, mass: f64) -> f64 {
    (ke * ke + 2.0 * ke * mass).sqrt()
}

/// Proton range law, KE (MeV) from range (cm).
fn proton_kinetic_energy(range: f64) -> f64 {
    29.9317 * range.max(0.0).powf(0.586304)
}

// ============================================================================
// MCS FIT
// ============================================================================

/// Result of one MCS likelihood scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct McsFit {
    pub momentum: f64,
    pub uncertainty: f64,
    /// Negative log-likelihood at the best momentum
    pub nll: f64,
}

/// Forward and backward MCS fits of one track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct McsResult {
    pub forward: McsFit,
    pub backward: McsFit,
}

impl McsResult {
    /// True when the backward fit describes the track better.
    pub fn is_backward(&self) -> bool {
        self.backward.nll < self.forward.nll
    }

    /// The fit from the preferred direction.
    pub fn preferred(&self) -> &McsFit {
        if self.is_backward() {
            &self.backward
        } else {
            &self.forward
        }
    }
}

/// One kink between consecutive segments.
#[derive(Debug, Clone, Copy)]
struct Scatter {
    theta_x: f64,
    theta_y: f64,
    /// Length of the segment preceding the kink (cm)
    segment_length: f64,
    /// Path length to the middle of that segment (cm)
    path_to_segment: f64,
}

/// Principal axis of a point cloud, oriented first → last.
fn principal_direction(points: &[Vector3<f64>]) -> Option<Vector3<f64>> {
    let (first, last) = (points.first()?, points.last()?);
    let chord = last - first;
    if points.len() < 2 || chord.norm() == 0.0 {
        return None;
    }
    let mean = points.iter().fold(Vector3::zeros(), |acc, p| acc + p) / points.len() as f64;
    let mut cov = Matrix3::zeros();
    for p in points {
        let d = p - mean;
        cov += d * d.transpose();
    }
    let eig = SymmetricEigen::new(cov);
    let axis: Vector3<f64> = eig.eigenvectors.column(eig.eigenvalues.imax()).clone_owned();
    let axis = if axis.dot(&chord) < 0.0 { -axis } else { axis };
    Some(axis.normalize())
}

/// Cut a trajectory into segments of roughly `segment_length`, returning
/// (direction, length) of each.
fn segment_directions(points: &[Vector3<f64>], segment_length: f64) -> Vec<(Vector3<f64>, f64)> {
    let mut segments = Vec::new();
    let Some(first) = points.first() else {
        return segments;
    };
    let mut current = vec![*first];
    let mut acc = 0.0;
    for pair in points.windows(2) {
        acc += (pair[1] - pair[0]).norm();
        current.push(pair[1]);
        if acc >= segment_length {
            if let Some(dir) = principal_direction(&current) {
                segments.push((dir, acc));
            }
            current = vec![pair[1]];
            acc = 0.0;
        }
    }
    if acc >= 0.5 * segment_length {
        if let Some(dir) = principal_direction(&current) {
            segments.push((dir, acc));
        }
    }
    segments
}

/// Projected deflection angles between consecutive segments.
fn scatters(segments: &[(Vector3<f64>, f64)]) -> Vec<Scatter> {
    let mut out = Vec::with_capacity(segments.len().saturating_sub(1));
    let mut path = 0.0;
    for pair in segments.windows(2) {
        let (d1, len) = pair[0];
        let d2 = pair[1].0;
        let helper = if d1.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
        let u = d1.cross(&helper).normalize();
        let v = d1.cross(&u);
        let along = d2.dot(&d1);
        out.push(Scatter {
            theta_x: d2.dot(&u).atan2(along),
            theta_y: d2.dot(&v).atan2(along),
            segment_length: len,
            path_to_segment: path + 0.5 * len,
        });
        path += len;
    }
    out
}

/// Highland scattering width (rad).
fn highland(p: f64, beta: f64, length: f64) -> f64 {
    let x = (length / LAR_RADIATION_LENGTH).max(1e-6);
    0.0136 / (beta * p) * x.sqrt() * (1.0 + 0.038 * x.ln())
}

// ============================================================================
// PID
// ============================================================================

/// dE/dx chi-square scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidScores {
    pub chi2_proton: f64,
    pub chi2_kaon: f64,
    pub chi2_pion: f64,
    pub chi2_muon: f64,
    /// Samples used
    pub n_dof: usize,
    pub best: Hypothesis,
    pub min_chi2: f64,
}

impl PidScores {
    pub fn chi2(&self, hypothesis: Hypothesis) -> f64 {
        match hypothesis {
            Hypothesis::Proton => self.chi2_proton,
            Hypothesis::Kaon => self.chi2_kaon,
            Hypothesis::Pion => self.chi2_pion,
            Hypothesis::Muon => self.chi2_muon,
        }
    }
}

// ============================================================================
// RECO TRACK
// ============================================================================

/// Where a `RecoTrack` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackSource {
    /// Reconstructed 3-D track id
    Reco(usize),
    /// Simulated particle track id
    Truth(i32),
}

/// Feature record of one track.
///
/// Values the track cannot determine stay `None`; they become sentinels
/// only in the flat output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoTrack {
    pub source: TrackSource,

    pub deposited_energy_max: Option<f64>,
    pub deposited_energy_avg: Option<f64>,
    pub deposited_energy_med: Option<f64>,

    /// Range momentum under the selected hypothesis
    pub range_momentum: Option<f64>,
    pub range_momentum_muon: Option<f64>,

    /// MCS fits under the selected hypothesis and under the muon hypothesis
    pub mcs: Option<McsResult>,
    pub mcs_muon: Option<McsResult>,
    pub mcs_is_backward: bool,

    /// Best-estimate momentum and energy (GeV)
    pub momentum: Option<f64>,
    pub energy: Option<f64>,

    pub pid: Option<PidScores>,
    pub pdgid: Option<i32>,
    pub is_muon: bool,

    pub length: Option<f64>,
    /// Cosine of the start→end direction to the z axis
    pub costh: Option<f64>,
    pub topology: TrackTopology,

    pub start: Option<Vector3<f64>>,
    pub end: Option<Vector3<f64>>,
    /// Unit direction leaving the start point
    pub start_dir: Option<Vector3<f64>>,
    /// Unit direction arriving at the end point
    pub end_dir: Option<Vector3<f64>>,
    pub dist_to_vertex: Option<f64>,

    /// Track time (µs)
    pub t0: Option<f64>,

    pub stopping_chi2_start: Option<f64>,
    pub stopping_chi2_end: Option<f64>,

    /// Per-TPC track time of a TPC-crossing track (µs), in TPC order
    pub tpc_t0s: Vec<f64>,

    pub truth: TrackTruthMatch,
    pub crt_matches: Vec<CrtMatch>,
    pub flash_matches: Vec<FlashMatch>,
}

impl RecoTrack {
    /// An empty record for the given source.
    pub fn empty(source: TrackSource) -> Self {
        Self {
            source,
            deposited_energy_max: None,
            deposited_energy_avg: None,
            deposited_energy_med: None,
            range_momentum: None,
            range_momentum_muon: None,
            mcs: None,
            mcs_muon: None,
            mcs_is_backward: false,
            momentum: None,
            energy: None,
            pid: None,
            pdgid: None,
            is_muon: false,
            length: None,
            costh: None,
            topology: TrackTopology::default(),
            start: None,
            end: None,
            start_dir: None,
            end_dir: None,
            dist_to_vertex: None,
            t0: None,
            stopping_chi2_start: None,
            stopping_chi2_end: None,
            tpc_t0s: Vec::new(),
            truth: TrackTruthMatch::Unmatched,
            crt_matches: Vec::new(),
            flash_matches: Vec::new(),
        }
    }

    /// Whether the track passed the containment-volume test.
    #[inline]
    pub fn is_contained(&self) -> bool {
        self.topology.is_contained
    }

    /// Kinetic energy for the selected identity.
    pub fn kinetic_energy(&self) -> Option<f64> {
        let mass = mass_for_pdg(self.pdgid.unwrap_or(13));
        self.energy.map(|e| (e - mass).max(0.0))
    }

    /// Fill the geometric fields from a trajectory.
    pub fn fill_geometry(&mut self, trajectory: &[Vector3<f64>], geometry: &GeometryConfig, direction_length: f64) {
        let (Some(start), Some(end)) = (trajectory.first(), trajectory.last()) else {
            return;
        };
        self.start = Some(*start);
        self.end = Some(*end);
        self.length = Some(trajectory_length(trajectory));
        let chord = end - start;
        if chord.norm() > 0.0 {
            self.costh = Some(chord.normalize().z);
        }
        self.start_dir = end_direction(trajectory.iter(), direction_length);
        self.end_dir = end_direction(trajectory.iter().rev(), direction_length).map(|d| -d);
        self.topology = geometry.track_topology(trajectory);
    }
}

/// Earliest hit time of each TPC a crossing track was read out on.
///
/// The drift time vanishes where the track passes a TPC's anode plane, so
/// the earliest hit of each TPC is that TPC's estimate of the track time.
/// Hits without a TPC tag are ignored. Empty unless the track crosses TPCs.
pub fn tpc_t0s<'a>(topology: &TrackTopology, hits: impl IntoIterator<Item = &'a HitRecord>) -> Vec<f64> {
    if !topology.crosses_tpc {
        return Vec::new();
    }
    let mut earliest: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for hit in hits {
        let Some(tpc) = hit.tpc else {
            continue;
        };
        if !hit.peak_time.is_finite() {
            continue;
        }
        earliest
            .entry(tpc)
            .and_modify(|t| *t = t.min(hit.peak_time))
            .or_insert(hit.peak_time);
    }
    earliest.into_values().collect()
}

/// Total path length of a trajectory.
pub fn trajectory_length(trajectory: &[Vector3<f64>]) -> f64 {
    trajectory.windows(2).map(|w| (w[1] - w[0]).norm()).sum()
}

/// Direction from the first point to the point `length` along the path.
fn end_direction<'a>(mut points: impl Iterator<Item = &'a Vector3<f64>>, length: f64) -> Option<Vector3<f64>> {
    let first = *points.next()?;
    let mut prev = first;
    let mut acc = 0.0;
    let mut reach = first;
    for p in points {
        acc += (p - prev).norm();
        prev = *p;
        reach = *p;
        if acc >= length {
            break;
        }
    }
    let d = reach - first;
    if d.norm() > 0.0 {
        Some(d.normalize())
    } else {
        None
    }
}

// ============================================================================
// CALCULATOR
// ============================================================================

/// Builds `RecoTrack`s from raw tracks.
#[derive(Debug, Clone)]
pub struct TrackKinematics {
    config: KinematicsConfig,
    muon_table: RangeTable,
}

impl TrackKinematics {
    pub fn new(config: KinematicsConfig) -> Result<Self, RecoError> {
        config.validate()?;
        Ok(Self {
            config,
            muon_table: RangeTable::muon_csda()?,
        })
    }

    /// Range momentum (GeV) of a track of `length` cm under `hypothesis`.
    pub fn range_momentum(&self, length: f64, hypothesis: Hypothesis) -> f64 {
        let ke_mev = match hypothesis {
            Hypothesis::Muon | Hypothesis::Pion => self.muon_table.kinetic_energy(length),
            Hypothesis::Proton | Hypothesis::Kaon => proton_kinetic_energy(length),
        };
        momentum_from_kinetic(ke_mev / 1000.0, hypothesis.mass())
    }

    /// Negative log-likelihood of the scatters at initial momentum `p0`.
    ///
    /// `None` when the particle would range out before the last segment.
    fn mcs_nll(&self, scatters: &[Scatter], p0: f64, mass: f64) -> Option<f64> {
        let e0 = (p0 * p0 + mass * mass).sqrt();
        let res2 = self.config.mcs_angular_resolution.powi(2);
        let mut nll = 0.0;
        for s in scatters {
            let e = e0 - self.config.mcs_energy_loss * s.path_to_segment / 1000.0;
            if e <= mass {
                return None;
            }
            let p = (e * e - mass * mass).sqrt();
            let theta0 = highland(p, p / e, s.segment_length);
            let sigma2 = theta0 * theta0 + res2;
            nll += sigma2.ln() + (s.theta_x.powi(2) + s.theta_y.powi(2)) / (2.0 * sigma2);
        }
        Some(nll)
    }

    /// Scan the momentum grid for one direction.
    fn mcs_scan(&self, points: &[Vector3<f64>], mass: f64) -> Option<McsFit> {
        let segments = segment_directions(points, self.config.mcs_segment_length);
        let scatters = scatters(&segments);
        if scatters.is_empty() {
            return None;
        }

        let cfg = &self.config;
        let n = ((cfg.mcs_max_momentum - cfg.mcs_min_momentum) / cfg.mcs_momentum_step).round() as usize + 1;
        let scan: Vec<(f64, f64)> = (0..n)
            .map(|i| cfg.mcs_min_momentum + i as f64 * cfg.mcs_momentum_step)
            .filter_map(|p| self.mcs_nll(&scatters, p, mass).map(|nll| (p, nll)))
            .collect();

        let ((best_p, _), best_nll) = select_min_by(scan.iter().copied(), |(_, nll)| Some(*nll))?;

        let within: Vec<f64> = scan
            .iter()
            .filter(|(_, nll)| *nll <= best_nll + 0.5)
            .map(|(p, _)| *p)
            .collect();
        let lo = within.iter().copied().fold(best_p, f64::min);
        let hi = within.iter().copied().fold(best_p, f64::max);

        Some(McsFit {
            momentum: best_p,
            uncertainty: (0.5 * (hi - lo)).max(0.5 * cfg.mcs_momentum_step),
            nll: best_nll,
        })
    }

    /// Forward and backward MCS fits under `mass`.
    pub fn mcs_fit(&self, trajectory: &[Vector3<f64>], mass: f64) -> Option<McsResult> {
        let forward = self.mcs_scan(trajectory, mass)?;
        let reversed: Vec<Vector3<f64>> = trajectory.iter().rev().copied().collect();
        let backward = self.mcs_scan(&reversed, mass)?;
        Some(McsResult { forward, backward })
    }

    /// dE/dx chi-square for every hypothesis.
    ///
    /// The first and last samples are skipped, as are samples with an
    /// unphysical dE/dx or beyond the template's residual-range reach.
    pub fn pid_chi2(&self, calo: &[CaloPoint]) -> Option<PidScores> {
        if calo.len() < 3 {
            return None;
        }
        let usable: Vec<&CaloPoint> = calo[1..calo.len() - 1]
            .iter()
            .filter(|c| c.dedx > 0.0 && c.dedx <= 1000.0)
            .filter(|c| c.residual_range > 0.0 && c.residual_range <= self.config.pid_max_residual_range)
            .collect();
        if usable.is_empty() {
            return None;
        }

        let chi2_of = |hyp: Hypothesis| -> f64 {
            let sum: f64 = usable
                .iter()
                .map(|c| {
                    let template = hyp.reference_dedx(c.residual_range);
                    let err = c.dedx * (0.04231 + 0.0001783 * c.dedx * c.dedx);
                    let sigma2 = err * err + (0.1 * template).powi(2);
                    (c.dedx - template).powi(2) / sigma2
                })
                .sum();
            sum / usable.len() as f64
        };

        let scored: Vec<(Hypothesis, f64)> = Hypothesis::ALL.iter().map(|&h| (h, chi2_of(h))).collect();
        let ((best, _), min_chi2) = select_min_by(scored.iter().copied(), |(_, c)| Some(*c))?;
        let get = |h: Hypothesis| scored.iter().find(|(x, _)| *x == h).map(|(_, c)| *c).unwrap_or(f64::NAN);

        Some(PidScores {
            chi2_proton: get(Hypothesis::Proton),
            chi2_kaon: get(Hypothesis::Kaon),
            chi2_pion: get(Hypothesis::Pion),
            chi2_muon: get(Hypothesis::Muon),
            n_dof: usable.len(),
            best,
            min_chi2,
        })
    }

    /// Flat-fit over power-law-fit chi-square of dE/dx near one end.
    ///
    /// `distance` maps a sample to its distance from the end being tested.
    pub fn stopping_chi2(&self, calo: &[CaloPoint], distance: impl Fn(&CaloPoint) -> f64) -> Option<f64> {
        let pts: Vec<(f64, f64)> = calo
            .iter()
            .map(|c| (distance(c), c.dedx))
            .filter(|(d, y)| *d > 0.0 && *d <= self.config.stopping_fit_length && *y > 0.0)
            .collect();
        if pts.len() < self.config.stopping_min_points {
            return None;
        }
        let n = pts.len() as f64;

        let mean = pts.iter().map(|(_, y)| y).sum::<f64>() / n;
        let chi2_flat: f64 = pts.iter().map(|(_, y)| (y - mean).powi(2)).sum();

        // ln y = a + b ln d
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(sx, sy), (d, y)| (sx + d.ln(), sy + y.ln()));
        let (mx, my) = (sx / n, sy / n);
        let (sxx, sxy) = pts.iter().fold((0.0, 0.0), |(sxx, sxy), (d, y)| {
            let dx = d.ln() - mx;
            (sxx + dx * dx, sxy + dx * (y.ln() - my))
        });
        let b = if sxx > 0.0 { sxy / sxx } else { 0.0 };
        let a = my - b * mx;
        let chi2_pow: f64 = pts
            .iter()
            .map(|(d, y)| (y - (a + b * d.ln()).exp()).powi(2))
            .sum();

        Some(chi2_flat / chi2_pow.max(1e-9))
    }

    /// Build the kinematic part of a `RecoTrack`.
    pub fn build(&self, record: &TrackRecord, geometry: &GeometryConfig) -> RecoTrack {
        let trajectory: Vec<Vector3<f64>> = record.trajectory.iter().map(|p| Vector3::from(*p)).collect();
        let mut track = RecoTrack::empty(TrackSource::Reco(record.id));
        track.t0 = record.t0;
        track.fill_geometry(&trajectory, geometry, self.config.direction_length);

        // Deposited energy per sample
        let mut deposits: Vec<f64> = record.calo.iter().map(|c| c.dedx * c.pitch).collect();
        if !deposits.is_empty() {
            deposits.sort_by(|a, b| cmp_f64(*a, *b));
            let n = deposits.len();
            track.deposited_energy_max = deposits.last().copied();
            track.deposited_energy_avg = Some(deposits.iter().sum::<f64>() / n as f64);
            track.deposited_energy_med = Some(if n % 2 == 1 {
                deposits[n / 2]
            } else {
                0.5 * (deposits[n / 2 - 1] + deposits[n / 2])
            });
        }

        // Identity
        track.pid = self.pid_chi2(&record.calo);
        let hypothesis = track.pid.map(|p| p.best).unwrap_or(Hypothesis::Muon);
        track.pdgid = Some(hypothesis.pdg());
        track.is_muon = hypothesis == Hypothesis::Muon;

        // Range momentum, contained only
        let length = track.length.unwrap_or(0.0);
        if track.is_contained() {
            track.range_momentum = Some(self.range_momentum(length, hypothesis));
            track.range_momentum_muon = Some(self.range_momentum(length, Hypothesis::Muon));
        }

        // MCS
        track.mcs_muon = self.mcs_fit(&trajectory, MUON_MASS);
        track.mcs = if hypothesis == Hypothesis::Muon {
            track.mcs_muon
        } else {
            self.mcs_fit(&trajectory, hypothesis.mass())
        };
        track.mcs_is_backward = track.mcs.map(|m| m.is_backward()).unwrap_or(false);

        // Best estimate
        track.momentum = if track.is_contained() {
            track.range_momentum
        } else {
            track.mcs.map(|m| m.preferred().momentum)
        };
        track.energy = track.momentum.map(|p| (p * p + hypothesis.mass().powi(2)).sqrt());

        // Bragg peak at either end
        track.stopping_chi2_end = self.stopping_chi2(&record.calo, |c| c.residual_range);
        track.stopping_chi2_start = self.stopping_chi2(&record.calo, |c| length - c.residual_range);

        track
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

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

    /// Calorimetry of a stopping particle following `hyp`'s template.
    fn bragg(hyp: Hypothesis, length: f64, n: usize) -> Vec<CaloPoint> {
        (0..n)
            .map(|i| {
                let rr = length * (n - i) as f64 / n as f64;
                CaloPoint {
                    dedx: hyp.reference_dedx(rr),
                    residual_range: rr,
                    pitch: 0.3,
                }
            })
            .collect()
    }

    #[test]
    fn test_range_table_monotonic() {
        let table = RangeTable::muon_csda().unwrap();
        assert_relative_eq!(table.kinetic_energy(0.0), 0.0);
        let mut last = 0.0;
        for r in [1.0, 10.0, 50.0, 100.0, 300.0, 1000.0] {
            let ke = table.kinetic_energy(r);
            assert!(ke > last);
            last = ke;
        }
    }

    #[test]
    fn test_range_table_rejects_non_monotonic() {
        let err = RangeTable::new("bad", vec![0.0, 2.0, 1.0], vec![0.0, 1.0, 2.0]);
        assert_eq!(err.unwrap_err(), RecoError::NonMonotonicCalibration("bad"));
    }

    #[test]
    fn test_muon_range_momentum_one_metre() {
        let kin = TrackKinematics::new(KinematicsConfig::default()).unwrap();
        // A 1 m muon in argon carries roughly 0.34 GeV/c
        let p = kin.range_momentum(100.0, Hypothesis::Muon);
        assert!(p > 0.30 && p < 0.38, "p = {}", p);
    }

    #[test]
    fn test_pid_selects_proton_profile() {
        let kin = TrackKinematics::new(KinematicsConfig::default()).unwrap();
        let scores = kin.pid_chi2(&bragg(Hypothesis::Proton, 25.0, 40)).unwrap();
        assert_eq!(scores.best, Hypothesis::Proton);
        assert!(scores.chi2_proton < scores.chi2_muon);
        assert_relative_eq!(scores.min_chi2, scores.chi2_proton);
    }

    #[test]
    fn test_pid_selects_muon_profile() {
        let kin = TrackKinematics::new(KinematicsConfig::default()).unwrap();
        let scores = kin.pid_chi2(&bragg(Hypothesis::Muon, 25.0, 40)).unwrap();
        assert_eq!(scores.best, Hypothesis::Muon);
        assert_eq!(scores.n_dof, 38);
    }

    #[test]
    fn test_pid_without_samples() {
        let kin = TrackKinematics::new(KinematicsConfig::default()).unwrap();
        assert!(kin.pid_chi2(&[]).is_none());
    }

    #[test]
    fn test_contained_track_uses_range_momentum() {
        let kin = TrackKinematics::new(KinematicsConfig::default()).unwrap();
        let geo = GeometryConfig::default();
        let record = TrackRecord {
            id: 3,
            trajectory: straight([-150.0, 0.0, 50.0], [-150.0, 0.0, 250.0], 100),
            calo: bragg(Hypothesis::Muon, 200.0, 100),
            hit_ids: vec![],
            t0: None,
        };
        let track = kin.build(&record, &geo);
        assert!(track.is_contained());
        assert_relative_eq!(track.length.unwrap(), 200.0, epsilon = 1e-9);
        assert_eq!(track.momentum, track.range_momentum);
        assert_eq!(track.pdgid, Some(13));
        assert_relative_eq!(track.costh.unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_uncontained_track_uses_mcs() {
        let kin = TrackKinematics::new(KinematicsConfig::default()).unwrap();
        let geo = GeometryConfig::default();
        // Zig-zag that leaves the detector through the downstream face
        let traj: Vec<[f64; 3]> = (0..=120)
            .map(|i| {
                let z = 300.0 + i as f64 * 2.5;
                let wiggle = if (i / 7) % 2 == 0 { 0.4 } else { -0.4 };
                [-100.0 + wiggle, wiggle, z]
            })
            .collect();
        let record = TrackRecord {
            id: 1,
            trajectory: traj,
            calo: vec![],
            hit_ids: vec![],
            t0: None,
        };
        let track = kin.build(&record, &geo);
        assert!(!track.is_contained());
        assert!(track.range_momentum.is_none());
        let mcs = track.mcs.expect("long track has an MCS fit");
        assert_eq!(track.momentum, Some(mcs.preferred().momentum));
        assert_eq!(track.mcs_is_backward, mcs.is_backward());
    }

    #[test]
    fn test_short_track_has_no_mcs() {
        let kin = TrackKinematics::new(KinematicsConfig::default()).unwrap();
        let traj: Vec<Vector3<f64>> = straight([0.0, 0.0, 0.0], [0.0, 0.0, 10.0], 5)
            .into_iter()
            .map(Vector3::from)
            .collect();
        assert!(kin.mcs_fit(&traj, MUON_MASS).is_none());
    }

    #[test]
    fn test_deposited_energy_summaries() {
        let kin = TrackKinematics::new(KinematicsConfig::default()).unwrap();
        let geo = GeometryConfig::default();
        let calo = [1.0, 4.0, 2.0, 3.0]
            .iter()
            .map(|&e| CaloPoint { dedx: e, residual_range: 10.0, pitch: 1.0 })
            .collect();
        let record = TrackRecord {
            id: 0,
            trajectory: straight([0.0, 0.0, 100.0], [0.0, 0.0, 120.0], 4),
            calo,
            hit_ids: vec![],
            t0: None,
        };
        let track = kin.build(&record, &geo);
        assert_eq!(track.deposited_energy_max, Some(4.0));
        assert_relative_eq!(track.deposited_energy_avg.unwrap(), 2.5);
        assert_relative_eq!(track.deposited_energy_med.unwrap(), 2.5);
    }

    #[test]
    fn test_stopping_chi2_flags_bragg_end() {
        let kin = TrackKinematics::new(KinematicsConfig::default()).unwrap();
        let calo = bragg(Hypothesis::Proton, 60.0, 60);
        let end = kin.stopping_chi2(&calo, |c| c.residual_range).unwrap();
        let start = kin.stopping_chi2(&calo, |c| 60.0 - c.residual_range).unwrap();
        assert!(end > 10.0, "end ratio {}", end);
        assert!(end > start);
    }

    fn tagged_hit(id: usize, tpc: Option<(usize, usize)>, peak_time: f64) -> HitRecord {
        HitRecord {
            id,
            peak_time,
            tpc,
            truth: vec![],
        }
    }

    #[test]
    fn test_tpc_t0s_earliest_hit_per_tpc() {
        let crossing = TrackTopology {
            crosses_tpc: true,
            ..TrackTopology::default()
        };
        let hits = vec![
            tagged_hit(0, Some((0, 1)), 7.5),
            tagged_hit(1, Some((0, 0)), 5.0),
            tagged_hit(2, Some((0, 0)), 3.0),
            tagged_hit(3, None, 0.5),
            tagged_hit(4, Some((0, 1)), 4.0),
        ];
        assert_eq!(tpc_t0s(&crossing, &hits), vec![3.0, 4.0]);
        assert!(tpc_t0s(&TrackTopology::default(), &hits).is_empty());
    }

    #[test]
    fn test_pid_chi2_by_hypothesis() {
        let kin = TrackKinematics::new(KinematicsConfig::default()).unwrap();
        let scores = kin.pid_chi2(&bragg(Hypothesis::Muon, 80.0, 80)).unwrap();
        assert_eq!(scores.chi2(scores.best), scores.min_chi2);
        assert_eq!(scores.chi2(Hypothesis::Kaon), scores.chi2_kaon);
    }
}
