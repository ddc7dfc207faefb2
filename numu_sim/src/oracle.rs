//! Ground truth oracle for synthetic events.
//!
//! The Oracle generates internally consistent event records:
//! - Truth records, simulated particles and their hit deposits
//! - The matching reconstructed tracks, particle-flow nodes and calorimetry
//! - Optional CRT hits and light flashes at known times
//!
//! Every random draw comes from one seeded ChaCha stream, so a seed fully
//! determines the events.

use nalgebra::Vector3;
use numu_core::Hypothesis;
use numu_records::{
    CaloPoint, CrtHitRecord, Current, EventRecords, FlashRecord, HitRecord, HitTruthShare, McParticleRecord,
    NeutrinoRecord, Origin, PfParticleRecord, TrackRecord, TruthRecord,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, NormalError};
use std::collections::HashMap;

/// Energy a minimum-ionising muon loses per cm in argon (MeV)
const MIP_DEDX: f64 = 2.1;
const MUON_MASS: f64 = 0.105_658;
const PROTON_MASS: f64 = 0.938_272;

/// Simulation track ids of the generated particles
pub const MUON_TRACK_ID: i32 = 1;
pub const PROTON_TRACK_ID: i32 = 2;

/// Hits recorded per generated particle
const HITS_PER_PARTICLE: usize = 100;

/// How the primary muon leaves the interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuonTopology {
    /// Stops well inside the containment volume
    Contained,
    /// Ends past the downstream containment boundary
    Exiting,
}

/// Knobs for one generated neutrino event.
#[derive(Debug, Clone)]
pub struct NeutrinoEventSpec {
    pub topology: MuonTopology,
    /// Fraction of the muon's hits that end up on its reconstructed track
    pub muon_completion: f64,
    /// Track and beam time (µs)
    pub t0: Option<f64>,
    /// CRT hit times relative to t0 (µs), placed on the muon's backward extension
    pub crt_hit_offsets: Vec<f64>,
    pub with_flash: bool,
}

impl Default for NeutrinoEventSpec {
    fn default() -> Self {
        Self {
            topology: MuonTopology::Contained,
            muon_completion: 1.0,
            t0: None,
            crt_hit_offsets: Vec::new(),
            with_flash: false,
        }
    }
}

/// What the oracle knows about an event it generated.
#[derive(Debug, Clone)]
pub struct GeneratedTruth {
    pub vertex: Vector3<f64>,
    pub muon_length: f64,
    pub muon_momentum: f64,
    pub muon_completion: f64,
}

/// The Oracle - generates events with known truth.
pub struct Oracle {
    seed: u64,
    rng: ChaCha8Rng,
    next_event: u64,
    /// Per-coordinate smearing of reconstructed trajectories (cm)
    noise: Option<Normal<f64>>,
}

impl Oracle {
    /// Creates a new Oracle with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            next_event: 0,
            noise: Normal::new(0.0, 0.05).ok(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Sets the trajectory smearing; zero disables it.
    pub fn set_position_noise(&mut self, std_dev: f64) -> Result<(), NormalError> {
        self.noise = if std_dev == 0.0 {
            None
        } else {
            Some(Normal::new(0.0, std_dev)?)
        };
        Ok(())
    }

    fn new_event(&mut self) -> EventRecords {
        self.next_event += 1;
        EventRecords::new(1, 0, self.next_event)
    }

    fn smear(&mut self, p: Vector3<f64>) -> [f64; 3] {
        match self.noise {
            Some(n) => [
                p.x + n.sample(&mut self.rng),
                p.y + n.sample(&mut self.rng),
                p.z + n.sample(&mut self.rng),
            ],
            None => [p.x, p.y, p.z],
        }
    }

    /// Random unit vector within `max_angle` of +z.
    fn forward_direction(&mut self, max_angle: f64) -> Vector3<f64> {
        let theta = self.rng.gen_range(0.0..max_angle);
        let phi = self.rng.gen_range(0.0..std::f64::consts::TAU);
        Vector3::new(theta.sin() * phi.cos(), theta.sin() * phi.sin(), theta.cos())
    }

    /// A beam neutrino CC interaction producing a muon and a short proton.
    pub fn neutrino_event(&mut self, spec: &NeutrinoEventSpec) -> (EventRecords, GeneratedTruth) {
        let mut ev = self.new_event();

        let (vertex, muon_dir, muon_length) = match spec.topology {
            MuonTopology::Contained => {
                let v = Vector3::new(
                    self.rng.gen_range(-120.0..-60.0),
                    self.rng.gen_range(-80.0..80.0),
                    self.rng.gen_range(50.0..150.0),
                );
                let dir = self.forward_direction(0.3);
                (v, dir, self.rng.gen_range(60.0..150.0))
            }
            MuonTopology::Exiting => {
                let v = Vector3::new(
                    self.rng.gen_range(-120.0..-60.0),
                    self.rng.gen_range(-80.0..80.0),
                    self.rng.gen_range(300.0..380.0),
                );
                // Straight downstream, ending past the containment face
                (v, Vector3::z(), 498.0 - v.z)
            }
        };
        let proton_dir = Vector3::new(1.0, 0.0, 1.0).normalize();
        let proton_length: f64 = self.rng.gen_range(4.0..12.0);

        let muon_ke = MIP_DEDX * muon_length / 1000.0;
        let muon_e = muon_ke + MUON_MASS;
        let muon_p = (muon_e * muon_e - MUON_MASS * MUON_MASS).sqrt();
        let proton_e = PROTON_MASS + 29.9317 * proton_length.powf(0.586304) / 1000.0;
        let proton_p = (proton_e * proton_e - PROTON_MASS * PROTON_MASS).sqrt();

        let muon_path = line(vertex, muon_dir, muon_length, 1.0);
        let proton_path = line(vertex, proton_dir, proton_length, 0.5);

        // Truth
        ev.truths.push(TruthRecord {
            index: 0,
            origin: Origin::BeamNeutrino,
            neutrino: Some(NeutrinoRecord {
                pdg: 14,
                vertex: [vertex.x, vertex.y, vertex.z],
                energy: muon_e + proton_e - PROTON_MASS,
                current: Current::Charged,
            }),
            weights: HashMap::from([("flux".to_string(), vec![1.0])]),
        });
        ev.mc_particles.push(mc_particle(MUON_TRACK_ID, 13, muon_dir * muon_p, muon_e, &muon_path));
        ev.mc_particles.push(mc_particle(PROTON_TRACK_ID, 2212, proton_dir * proton_p, proton_e, &proton_path));

        // Hits: muon 0..100, proton 100..200
        for i in 0..2 * HITS_PER_PARTICLE {
            let particle_id = if i < HITS_PER_PARTICLE { MUON_TRACK_ID } else { PROTON_TRACK_ID };
            ev.hits.push(HitRecord {
                id: i,
                peak_time: i as f64,
                tpc: None,
                truth: vec![HitTruthShare { particle_id, energy: 0.5 }],
            });
        }
        let muon_hits = (spec.muon_completion.clamp(0.0, 1.0) * HITS_PER_PARTICLE as f64).round() as usize;

        // Reconstruction
        let muon_traj: Vec<[f64; 3]> = muon_path.iter().map(|p| self.smear(*p)).collect();
        let proton_traj: Vec<[f64; 3]> = proton_path.iter().map(|p| self.smear(*p)).collect();
        let muon_calo = match spec.topology {
            MuonTopology::Contained => bragg(Hypothesis::Muon, muon_length, muon_path.len()),
            MuonTopology::Exiting => flat_mip(muon_path.len()),
        };
        ev.tracks.push(TrackRecord {
            id: 10,
            trajectory: muon_traj,
            calo: muon_calo,
            hit_ids: (0..muon_hits).collect(),
            t0: spec.t0,
        });
        ev.tracks.push(TrackRecord {
            id: 11,
            trajectory: proton_traj,
            calo: bragg(Hypothesis::Proton, proton_length, proton_path.len()),
            hit_ids: (HITS_PER_PARTICLE..2 * HITS_PER_PARTICLE).collect(),
            t0: spec.t0,
        });
        ev.particles = vec![
            pf_node(0, 14, None, vec![1, 2], None, Some(vertex)),
            pf_node(1, 13, Some(0), vec![], Some(10), None),
            pf_node(2, 2212, Some(0), vec![], Some(11), None),
        ];

        // External detectors
        if let Some(t0) = spec.t0 {
            let crt_position = vertex - muon_dir * 30.0;
            for offset in &spec.crt_hit_offsets {
                ev.crt_hits.push(CrtHitRecord {
                    position: [crt_position.x, crt_position.y, crt_position.z],
                    time: t0 + offset,
                    pe: 120.0,
                });
            }
            if spec.with_flash {
                ev.flashes.push(FlashRecord {
                    time: t0,
                    time_first: t0 - 0.02,
                    time_width: 0.15,
                    pe: 400.0,
                    center: [vertex.x, vertex.y, vertex.z],
                });
            }
        }

        let truth = GeneratedTruth {
            vertex,
            muon_length,
            muon_momentum: muon_p,
            muon_completion: muon_hits as f64 / HITS_PER_PARTICLE as f64,
        };
        (ev, truth)
    }

    /// A clear-cosmic through-going muon.
    pub fn cosmic_event(&mut self) -> EventRecords {
        let mut ev = self.new_event();
        let x = self.rng.gen_range(50.0..150.0);
        let z = self.rng.gen_range(100.0..400.0);
        let path = line(Vector3::new(x, 199.0, z), -Vector3::y(), 398.0, 2.0);
        let trajectory = path.iter().map(|p| self.smear(*p)).collect();

        ev.truths.push(TruthRecord {
            index: 0,
            origin: Origin::CosmicRay,
            neutrino: None,
            weights: HashMap::new(),
        });
        ev.mc_particles.push(mc_particle(MUON_TRACK_ID, 13, Vector3::new(0.0, -3.0, 0.0), 3.002, &path));
        ev.tracks.push(TrackRecord {
            id: 20,
            trajectory,
            calo: flat_mip(path.len()),
            hit_ids: vec![],
            t0: None,
        });
        let mut node = pf_node(0, 13, None, vec![], Some(20), None);
        node.is_clear_cosmic = true;
        ev.particles = vec![node];
        ev
    }

    /// Truth neutrino with nothing reconstructed.
    pub fn truth_only_event(&mut self) -> EventRecords {
        let mut ev = self.new_event();
        let vertex = [
            self.rng.gen_range(-150.0..150.0),
            self.rng.gen_range(-150.0..150.0),
            self.rng.gen_range(50.0..450.0),
        ];
        ev.truths.push(TruthRecord {
            index: 0,
            origin: Origin::BeamNeutrino,
            neutrino: Some(NeutrinoRecord {
                pdg: 14,
                vertex,
                energy: self.rng.gen_range(0.3..3.0),
                current: Current::Neutral,
            }),
            weights: HashMap::new(),
        });
        ev
    }
}

/// Points from `start` along `dir` every `step` cm up to `length`.
fn line(start: Vector3<f64>, dir: Vector3<f64>, length: f64, step: f64) -> Vec<Vector3<f64>> {
    let n = (length / step).ceil().max(1.0) as usize;
    (0..=n).map(|i| start + dir * (length * i as f64 / n as f64)).collect()
}

/// Calorimetry following a stopping particle's template.
fn bragg(hypothesis: Hypothesis, length: f64, n: usize) -> Vec<CaloPoint> {
    (0..n)
        .map(|i| {
            let rr = length * (n - i) as f64 / n as f64;
            CaloPoint {
                dedx: hypothesis.reference_dedx(rr),
                residual_range: rr,
                pitch: 0.3,
            }
        })
        .collect()
}

/// Calorimetry of a through-going MIP (residual range beyond the PID reach).
fn flat_mip(n: usize) -> Vec<CaloPoint> {
    (0..n)
        .map(|i| CaloPoint {
            dedx: MIP_DEDX,
            residual_range: 100.0 + i as f64,
            pitch: 0.3,
        })
        .collect()
}

fn mc_particle(track_id: i32, pdg: i32, p: Vector3<f64>, e: f64, path: &[Vector3<f64>]) -> McParticleRecord {
    McParticleRecord {
        track_id,
        pdg,
        mother: 0,
        truth_index: 0,
        momentum: [p.x, p.y, p.z, e],
        trajectory: path.iter().map(|q| [q.x, q.y, q.z]).collect(),
    }
}

fn pf_node(
    id: usize,
    pdg: i32,
    parent: Option<usize>,
    daughters: Vec<usize>,
    track_id: Option<usize>,
    vertex: Option<Vector3<f64>>,
) -> PfParticleRecord {
    PfParticleRecord {
        id,
        pdg,
        parent,
        daughters,
        is_clear_cosmic: false,
        is_neutrino: pdg == 14,
        nu_score: if pdg == 14 { 0.9 } else { 0.0 },
        vertices: vertex.map(|v| vec![[v.x, v.y, v.z]]).unwrap_or_default(),
        track_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_deterministic() {
        let spec = NeutrinoEventSpec::default();
        let (a, _) = Oracle::new(7).neutrino_event(&spec);
        let (b, _) = Oracle::new(7).neutrino_event(&spec);
        assert_eq!(a, b);

        let (c, _) = Oracle::new(8).neutrino_event(&spec);
        assert_ne!(a.tracks[0].trajectory, c.tracks[0].trajectory);
    }

    #[test]
    fn test_neutrino_event_shape() {
        let spec = NeutrinoEventSpec {
            muon_completion: 0.8,
            t0: Some(1.0),
            crt_hit_offsets: vec![0.1, 50.0],
            with_flash: true,
            ..NeutrinoEventSpec::default()
        };
        let (ev, truth) = Oracle::new(1).neutrino_event(&spec);
        assert_eq!(ev.tracks.len(), 2);
        assert_eq!(ev.tracks[0].hit_ids.len(), 80);
        assert_eq!(ev.crt_hits.len(), 2);
        assert_eq!(ev.flashes.len(), 1);
        assert!((truth.muon_completion - 0.8).abs() < 1e-12);
        assert!(truth.muon_momentum > 0.0);
    }

    #[test]
    fn test_cosmic_event_flagged() {
        let ev = Oracle::new(3).cosmic_event();
        assert!(ev.particles[0].is_clear_cosmic);
        assert_eq!(ev.truths[0].origin, Origin::CosmicRay);
    }

    #[test]
    fn test_noise_disable() {
        let mut oracle = Oracle::new(5);
        oracle.set_position_noise(0.0).unwrap();
        let (ev, truth) = oracle.neutrino_event(&NeutrinoEventSpec::default());
        let first = ev.tracks[0].trajectory[0];
        assert_eq!(first, [truth.vertex.x, truth.vertex.y, truth.vertex.z]);
    }
}
