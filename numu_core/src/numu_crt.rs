//! The "CRT" Engine - External Veto/Timing Detector Matching
//!
//! Associates TPC tracks with cosmic-ray tagger signals:
//! - Hits: closest approach of the hit to the track extrapolated outwards
//!   from either end
//! - Tracks: direction agreement plus endpoint distance to the CRT track line
//!
//! Both are gated in time when the track carries its own time estimate.
//! An event without CRT data simply yields no matches.

use nalgebra::Vector3;
use numu_records::{CrtHitRecord, CrtTrackRecord, FlashRecord};
use serde::{Deserialize, Serialize};

use crate::error::RecoError;
use crate::numu_kinematics::RecoTrack;
use crate::select::cmp_f64;

/// Configuration for CRT matching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrtMatchConfig {
    /// Only keep hits in time with at least one flash
    pub crt_hit_in_flash_range: bool,

    /// Hit/flash coincidence half-width (µs)
    pub crt_to_flash_time_width: f64,

    /// Maximum hit distance to the extrapolated track (cm)
    pub crt_hit_distance: f64,

    /// Hit/track and CRT-track/track coincidence half-width (µs)
    pub crt_hit_time_window: f64,

    /// Maximum opening angle between CRT and TPC tracks (rad)
    pub crt_track_max_angle: f64,

    /// Maximum mean distance of the TPC endpoints to the CRT track line (cm)
    pub crt_track_distance: f64,
}

impl Default for CrtMatchConfig {
    fn default() -> Self {
        Self {
            crt_hit_in_flash_range: false,
            crt_to_flash_time_width: 1.0,
            crt_hit_distance: 35.0,
            crt_hit_time_window: 5.0,
            crt_track_max_angle: 0.2,
            crt_track_distance: 30.0,
        }
    }
}

impl CrtMatchConfig {
    pub fn validate(&self) -> Result<(), RecoError> {
        let windows = [
            ("crt_to_flash_time_width", self.crt_to_flash_time_width),
            ("crt_hit_distance", self.crt_hit_distance),
            ("crt_hit_time_window", self.crt_hit_time_window),
            ("crt_track_max_angle", self.crt_track_max_angle),
            ("crt_track_distance", self.crt_track_distance),
        ];
        for (name, value) in windows {
            if !(value > 0.0) {
                return Err(RecoError::config(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }
}

/// One CRT signal associated with a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrtMatch {
    pub track: Option<CrtTrackRecord>,
    pub hit: Option<CrtHitRecord>,
    /// Distance of the hit to the extrapolated track (cm)
    pub hit_distance: Option<f64>,
    /// Time of the matched signal (µs)
    pub match_time: f64,
}

impl CrtMatch {
    pub fn has_track_match(&self) -> bool {
        self.track.is_some()
    }

    pub fn has_hit_match(&self) -> bool {
        self.hit.is_some()
    }
}

/// Event-level temporal pass: keep hits within `crt_to_flash_time_width` of
/// some flash. A no-op unless `crt_hit_in_flash_range` is set.
pub fn filter_hits_in_flash_range(
    hits: &[CrtHitRecord],
    flashes: &[FlashRecord],
    config: &CrtMatchConfig,
) -> Vec<CrtHitRecord> {
    if !config.crt_hit_in_flash_range {
        return hits.to_vec();
    }
    hits.iter()
        .filter(|h| flashes.iter().any(|f| (h.time - f.time).abs() <= config.crt_to_flash_time_width))
        .copied()
        .collect()
}

/// Distance from `point` to the ray leaving `origin` along unit `direction`.
fn ray_distance(point: &Vector3<f64>, origin: &Vector3<f64>, direction: &Vector3<f64>) -> f64 {
    let d = point - origin;
    let along = d.dot(direction);
    if along <= 0.0 {
        d.norm()
    } else {
        (d - direction * along).norm()
    }
}

/// Distance from `point` to the infinite line through `a` and `b`.
fn line_distance(point: &Vector3<f64>, a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let axis = b - a;
    if axis.norm() == 0.0 {
        return (point - a).norm();
    }
    (point - a).cross(&axis.normalize()).norm()
}

/// Closest approach of a CRT hit to the track extrapolated from either end.
pub fn hit_distance(track: &RecoTrack, hit: &CrtHitRecord) -> Option<f64> {
    let p = Vector3::from(hit.position);
    let from_start = track.start.map(|s| match track.start_dir {
        Some(dir) => ray_distance(&p, &s, &-dir),
        None => (p - s).norm(),
    });
    let from_end = track.end.map(|e| match track.end_dir {
        Some(dir) => ray_distance(&p, &e, &dir),
        None => (p - e).norm(),
    });
    match (from_start, from_end) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn in_time(track: &RecoTrack, time: f64, window: f64) -> bool {
    track.t0.map(|t0| (time - t0).abs() <= window).unwrap_or(true)
}

/// Match one track against the event's CRT hits and tracks.
///
/// One `CrtMatch` per matched signal, closest in time first, then closest
/// in space.
pub fn match_track_to_crt(
    track: &RecoTrack,
    hits: &[CrtHitRecord],
    crt_tracks: &[CrtTrackRecord],
    config: &CrtMatchConfig,
) -> Vec<CrtMatch> {
    let mut scored: Vec<(CrtMatch, f64)> = Vec::new();

    for hit in hits {
        let Some(distance) = hit_distance(track, hit) else {
            continue;
        };
        if distance < config.crt_hit_distance && in_time(track, hit.time, config.crt_hit_time_window) {
            scored.push((
                CrtMatch {
                    track: None,
                    hit: Some(*hit),
                    hit_distance: Some(distance),
                    match_time: hit.time,
                },
                distance,
            ));
        }
    }

    if let (Some(start), Some(end)) = (track.start, track.end) {
        let chord = end - start;
        for crt in crt_tracks {
            let (a, b) = (Vector3::from(crt.start), Vector3::from(crt.end));
            let axis = b - a;
            if chord.norm() == 0.0 || axis.norm() == 0.0 {
                continue;
            }
            let cos = chord.normalize().dot(&axis.normalize()).abs().min(1.0);
            let distance = 0.5 * (line_distance(&start, &a, &b) + line_distance(&end, &a, &b));
            if cos.acos() < config.crt_track_max_angle
                && distance < config.crt_track_distance
                && in_time(track, crt.time, config.crt_hit_time_window)
            {
                scored.push((
                    CrtMatch {
                        track: Some(*crt),
                        hit: None,
                        hit_distance: None,
                        match_time: crt.time,
                    },
                    distance,
                ));
            }
        }
    }

    let t0 = track.t0.unwrap_or(0.0);
    scored.sort_by(|(a, da), (b, db)| {
        cmp_f64((a.match_time - t0).abs(), (b.match_time - t0).abs()).then(cmp_f64(*da, *db))
    });
    scored.into_iter().map(|(m, _)| m).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numu_kinematics::TrackSource;
    use approx::assert_relative_eq;

    /// Vertical through-going track at x = -100, z = 200.
    fn vertical_track(t0: Option<f64>) -> RecoTrack {
        let mut t = RecoTrack::empty(TrackSource::Reco(0));
        t.start = Some(Vector3::new(-100.0, 150.0, 200.0));
        t.end = Some(Vector3::new(-100.0, -150.0, 200.0));
        t.start_dir = Some(Vector3::new(0.0, -1.0, 0.0));
        t.end_dir = Some(Vector3::new(0.0, -1.0, 0.0));
        t.t0 = t0;
        t
    }

    fn crt_hit(y: f64, time: f64) -> CrtHitRecord {
        CrtHitRecord {
            position: [-95.0, y, 200.0],
            time,
            pe: 100.0,
        }
    }

    #[test]
    fn test_no_crt_data_no_matches() {
        let track = vertical_track(Some(0.0));
        assert!(match_track_to_crt(&track, &[], &[], &CrtMatchConfig::default()).is_empty());
    }

    #[test]
    fn test_hit_distance_uses_outward_extrapolation() {
        let track = vertical_track(None);
        // Above the start, along the backwards extension
        let d = hit_distance(&track, &crt_hit(400.0, 0.0)).unwrap();
        assert_relative_eq!(d, 5.0, epsilon = 1e-9);
        // Beside the middle of the track: not on either ray, falls back to endpoint distance
        let d = hit_distance(&track, &crt_hit(0.0, 0.0)).unwrap();
        assert!(d > 100.0);
    }

    #[test]
    fn test_hit_time_window() {
        let track = vertical_track(Some(10.0));
        let cfg = CrtMatchConfig {
            crt_hit_time_window: 5.0,
            ..CrtMatchConfig::default()
        };
        let hits = [crt_hit(400.0, 10.1), crt_hit(-400.0, 60.0)];
        let matches = match_track_to_crt(&track, &hits, &[], &cfg);
        assert_eq!(matches.len(), 1);
        assert!(matches[0].has_hit_match());
        assert!(!matches[0].has_track_match());
        assert_relative_eq!(matches[0].match_time, 10.1);
    }

    #[test]
    fn test_untimed_track_skips_time_gate() {
        let track = vertical_track(None);
        let hits = [crt_hit(400.0, 10.1), crt_hit(-400.0, 60.0)];
        let matches = match_track_to_crt(&track, &hits, &[], &CrtMatchConfig::default());
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn test_far_hit_rejected() {
        let track = vertical_track(Some(0.0));
        let hit = CrtHitRecord {
            position: [150.0, 400.0, 200.0],
            time: 0.0,
            pe: 50.0,
        };
        assert!(match_track_to_crt(&track, &[hit], &[], &CrtMatchConfig::default()).is_empty());
    }

    #[test]
    fn test_crt_track_match_sign_agnostic() {
        let track = vertical_track(Some(1.0));
        // Same line, opposite orientation, shifted by 3 cm
        let crt = CrtTrackRecord {
            start: [-97.0, -400.0, 200.0],
            end: [-97.0, 400.0, 200.0],
            time: 1.5,
        };
        let matches = match_track_to_crt(&track, &[], &[crt], &CrtMatchConfig::default());
        assert_eq!(matches.len(), 1);
        assert!(matches[0].has_track_match());
        assert!(!matches[0].has_hit_match());
    }

    #[test]
    fn test_crt_track_wrong_angle() {
        let track = vertical_track(None);
        let crt = CrtTrackRecord {
            start: [-400.0, 0.0, 200.0],
            end: [400.0, 0.0, 200.0],
            time: 0.0,
        };
        assert!(match_track_to_crt(&track, &[], &[crt], &CrtMatchConfig::default()).is_empty());
    }

    #[test]
    fn test_matches_ordered_by_time() {
        let track = vertical_track(Some(0.0));
        let hits = [crt_hit(400.0, 3.0), crt_hit(-400.0, -1.0)];
        let matches = match_track_to_crt(&track, &hits, &[], &CrtMatchConfig::default());
        let times: Vec<f64> = matches.iter().map(|m| m.match_time).collect();
        assert_eq!(times, vec![-1.0, 3.0]);
    }

    #[test]
    fn test_flash_range_filter() {
        let hits = [crt_hit(0.0, 0.5), crt_hit(0.0, 20.0)];
        let flashes = [FlashRecord {
            time: 0.0,
            time_first: -0.1,
            time_width: 0.2,
            pe: 300.0,
            center: [0.0; 3],
        }];
        let mut cfg = CrtMatchConfig::default();
        assert_eq!(filter_hits_in_flash_range(&hits, &flashes, &cfg).len(), 2);

        cfg.crt_hit_in_flash_range = true;
        let kept = filter_hits_in_flash_range(&hits, &flashes, &cfg);
        assert_eq!(kept.len(), 1);
        assert_relative_eq!(kept[0].time, 0.5);
        assert!(filter_hits_in_flash_range(&hits, &[], &cfg).is_empty());
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let cfg = CrtMatchConfig {
            crt_hit_time_window: 0.0,
            ..CrtMatchConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
