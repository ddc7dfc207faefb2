//! Property tests over randomly generated geometry, hits and oracle events.

use nalgebra::Vector3;
use numu_core::numu_truth::TruthIndex;
use numu_core::select::select_min_by;
use numu_core::{point_in_volumes, Assembler, GeometryConfig, RunContext, SelectionConfig, Volume};
use numu_records::{EventRecords, HitRecord, HitTruthShare};
use numu_sim::{MuonTopology, NeutrinoEventSpec, Oracle};
use proptest::prelude::*;

fn volume() -> impl Strategy<Value = Volume> {
    (
        prop::array::uniform3(-100.0..100.0f64),
        prop::array::uniform3(0.0..50.0f64),
    )
        .prop_map(|(min, size)| Volume::new(min, [min[0] + size[0], min[1] + size[1], min[2] + size[2]]))
}

fn point() -> impl Strategy<Value = Vector3<f64>> {
    prop::array::uniform3(-150.0..150.0f64).prop_map(Vector3::from)
}

proptest! {
    #[test]
    fn point_in_volumes_matches_any_box(p in point(), volumes in prop::collection::vec(volume(), 0..5)) {
        let expected = volumes.iter().any(|v| {
            (0..3).all(|i| p[i] >= v.min[i] && p[i] <= v.max[i])
        });
        prop_assert_eq!(point_in_volumes(&p, &volumes), expected);
    }

    #[test]
    fn topology_flags_are_consistent(points in prop::collection::vec(
        prop::array::uniform3(-220.0..220.0f64).prop_map(|[x, y, z]| Vector3::new(x, y, z + 250.0)),
        2..20,
    )) {
        let geo = GeometryConfig::default();
        let topo = geo.track_topology(&points);
        if topo.crosses_tpc {
            prop_assert_ne!(geo.tpc_of(&points[0]), geo.tpc_of(&points[points.len() - 1]));
        }
        if topo.is_contained {
            prop_assert!(points.iter().all(|p| point_in_volumes(p, &geo.containment_volumes)));
        }
        if topo.contained_in_tpc {
            prop_assert!(topo.contained_in_cryo);
        }
    }

    #[test]
    fn completion_is_a_fraction(
        shares in prop::collection::vec((0i32..4, 0.0..5.0f64), 1..60),
        take in 0usize..60,
        particle in 0i32..4,
    ) {
        let mut ev = EventRecords::default();
        ev.hits = shares
            .iter()
            .enumerate()
            .map(|(id, &(particle_id, energy))| HitRecord {
                id,
                peak_time: 0.0,
                tpc: None,
                truth: vec![HitTruthShare { particle_id, energy }],
            })
            .collect();
        let index = TruthIndex::new(&ev);
        let track_hits: Vec<usize> = (0..take.min(shares.len())).collect();
        let all_hits: Vec<usize> = (0..shares.len()).collect();

        let c = index.track_completion(particle, &track_hits);
        prop_assert!((0.0..=1.0).contains(&c));

        let total: f64 = shares.iter().filter(|(p, _)| *p == particle).map(|(_, e)| e).sum();
        if total > 0.0 {
            prop_assert!((index.track_completion(particle, &all_hits) - 1.0).abs() < 1e-9);
        }
        if !shares[..track_hits.len()].iter().any(|(p, _)| *p == particle) {
            prop_assert_eq!(c, 0.0);
        }
        prop_assert_eq!(
            index.match_track_to_truth(&track_hits),
            index.match_track_to_truth(&track_hits)
        );
    }

    #[test]
    fn select_min_finds_first_minimum(values in prop::collection::vec(-10.0..10.0f64, 1..30)) {
        let (index, best) = select_min_by(values.iter().enumerate(), |(_, v)| Some(**v)).unwrap();
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        prop_assert_eq!(best, min);
        prop_assert_eq!(index.0, values.iter().position(|v| *v == min).unwrap());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn momentum_follows_containment(seed in any::<u64>(), exiting in any::<bool>()) {
        let spec = NeutrinoEventSpec {
            topology: if exiting { MuonTopology::Exiting } else { MuonTopology::Contained },
            ..NeutrinoEventSpec::default()
        };
        let (ev, _) = Oracle::new(seed).neutrino_event(&spec);
        let assembler = Assembler::new(SelectionConfig::default()).unwrap();
        let out = assembler.process_event(&ev, &mut RunContext::new());

        for track in &out.reco_event.tracks {
            if track.is_contained() {
                prop_assert_eq!(track.momentum, track.range_momentum);
            } else {
                prop_assert_eq!(track.momentum, track.mcs.map(|m| m.preferred().momentum));
            }
        }
    }
}
