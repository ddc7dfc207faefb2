//! Light-flash matching.
//!
//! A flash matches a track when its time falls inside a window around
//! either the track's own time estimate or a fixed beam reference time.
//! Every matching flash is kept, in input order.

use nalgebra::Vector2;
use numu_records::FlashRecord;
use serde::{Deserialize, Serialize};

use crate::error::RecoError;
use crate::numu_kinematics::RecoTrack;

/// Which reference time a flash is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FlashMatchMethod {
    /// The track's own t0; tracks without one match nothing
    #[default]
    TrackTime,
    /// The configured beam reference time
    SimpleTime,
}

/// Configuration for flash matching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashMatchConfig {
    pub method: FlashMatchMethod,

    /// Half-width of the match window (µs)
    pub flash_match_time_difference: f64,

    /// Beam arrival time for `SimpleTime` (µs)
    pub beam_reference_time: f64,

    /// Transverse beam centre [x, y] (cm)
    pub beam_center: [f64; 2],
}

impl Default for FlashMatchConfig {
    fn default() -> Self {
        Self {
            method: FlashMatchMethod::TrackTime,
            flash_match_time_difference: 2.0,
            beam_reference_time: 0.0,
            beam_center: [0.0, 0.0],
        }
    }
}

impl FlashMatchConfig {
    pub fn validate(&self) -> Result<(), RecoError> {
        if !(self.flash_match_time_difference > 0.0) {
            return Err(RecoError::config("flash_match_time_difference must be positive"));
        }
        Ok(())
    }
}

/// A flash in time with a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashMatch {
    pub match_time: f64,
    pub match_time_first: f64,
    pub match_time_width: f64,
    pub pe: f64,
    /// Transverse distance of the flash centre from the beam centre (cm)
    pub beam_center_distance: f64,
}

impl FlashMatch {
    fn from_flash(flash: &FlashRecord, beam_center: [f64; 2]) -> Self {
        let center = Vector2::new(flash.center[0], flash.center[1]);
        Self {
            match_time: flash.time,
            match_time_first: flash.time_first,
            match_time_width: flash.time_width,
            pe: flash.pe,
            beam_center_distance: (center - Vector2::from(beam_center)).norm(),
        }
    }
}

/// All flashes in time with the track under the configured method.
pub fn match_track_to_flashes(
    track: &RecoTrack,
    flashes: &[FlashRecord],
    config: &FlashMatchConfig,
) -> Vec<FlashMatch> {
    let reference = match config.method {
        FlashMatchMethod::TrackTime => match track.t0 {
            Some(t0) => t0,
            None => return Vec::new(),
        },
        FlashMatchMethod::SimpleTime => config.beam_reference_time,
    };
    flashes
        .iter()
        .filter(|f| (f.time - reference).abs() <= config.flash_match_time_difference)
        .map(|f| FlashMatch::from_flash(f, config.beam_center))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numu_kinematics::TrackSource;
    use approx::assert_relative_eq;

    fn flash(time: f64) -> FlashRecord {
        FlashRecord {
            time,
            time_first: time - 0.05,
            time_width: 0.3,
            pe: 250.0,
            center: [30.0, 40.0, 250.0],
        }
    }

    fn track_at(t0: Option<f64>) -> RecoTrack {
        let mut t = RecoTrack::empty(TrackSource::Reco(0));
        t.t0 = t0;
        t
    }

    #[test]
    fn test_track_time_keeps_all_in_window() {
        let flashes = [flash(0.5), flash(9.0), flash(1.5), flash(1.5)];
        let matches = match_track_to_flashes(&track_at(Some(1.0)), &flashes, &FlashMatchConfig::default());
        // No deduplication, input order kept
        let times: Vec<f64> = matches.iter().map(|m| m.match_time).collect();
        assert_eq!(times, vec![0.5, 1.5, 1.5]);
        assert_relative_eq!(matches[0].match_time_first, 0.45);
        assert_relative_eq!(matches[0].beam_center_distance, 50.0);
    }

    #[test]
    fn test_track_time_without_t0() {
        let matches = match_track_to_flashes(&track_at(None), &[flash(0.0)], &FlashMatchConfig::default());
        assert!(matches.is_empty());
    }

    #[test]
    fn test_simple_time_uses_beam_reference() {
        let cfg = FlashMatchConfig {
            method: FlashMatchMethod::SimpleTime,
            beam_reference_time: 5.0,
            ..FlashMatchConfig::default()
        };
        let flashes = [flash(0.0), flash(4.0)];
        let matches = match_track_to_flashes(&track_at(None), &flashes, &cfg);
        assert_eq!(matches.len(), 1);
        assert_relative_eq!(matches[0].match_time, 4.0);
    }

    #[test]
    fn test_no_flashes() {
        assert!(match_track_to_flashes(&track_at(Some(0.0)), &[], &FlashMatchConfig::default()).is_empty());
    }
}
