//! Selection configuration.
//!
//! One struct aggregates every component's settings. All fields have
//! defaults, so a partial JSON document is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::error::RecoError;
use crate::numu_crt::CrtMatchConfig;
use crate::numu_flash::FlashMatchConfig;
use crate::numu_geometry::GeometryConfig;
use crate::numu_kinematics::KinematicsConfig;
use crate::numu_slice::SliceConfig;
use crate::numu_truth::TruthConfig;

/// Full configuration of the reconstruction and selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub geometry: GeometryConfig,
    pub kinematics: KinematicsConfig,
    pub crt: CrtMatchConfig,
    pub flash: FlashMatchConfig,
    pub truth: TruthConfig,
    pub slice: SliceConfig,

    /// Log every kept interaction at INFO
    pub verbose: bool,

    /// Weight applied to every kept interaction
    pub constant_weight: f64,

    /// Weight calculators whose first universe multiplies the event weight
    pub uniform_weights: Vec<String>,

    /// Extra weight for cosmic-classified interactions
    pub cosmic_weight: f64,

    /// Keep only interactions with a truth match
    pub require_matched: bool,

    /// Keep only interactions with a primary track
    pub require_track: bool,

    /// Keep only interactions whose primary track is contained
    pub require_contained: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            geometry: GeometryConfig::default(),
            kinematics: KinematicsConfig::default(),
            crt: CrtMatchConfig::default(),
            flash: FlashMatchConfig::default(),
            truth: TruthConfig::default(),
            slice: SliceConfig::default(),
            verbose: false,
            constant_weight: 1.0,
            uniform_weights: Vec::new(),
            cosmic_weight: 1.0,
            require_matched: false,
            require_track: false,
            require_contained: false,
        }
    }
}

impl SelectionConfig {
    /// Check every component before any event is processed.
    pub fn validate(&self) -> Result<(), RecoError> {
        self.geometry.validate()?;
        self.kinematics.validate()?;
        self.crt.validate()?;
        self.flash.validate()?;
        self.truth.validate()?;
        self.slice.validate()?;

        if !self.constant_weight.is_finite() || !self.cosmic_weight.is_finite() {
            return Err(RecoError::config("event weights must be finite"));
        }
        if self.require_contained && !self.require_track {
            return Err(RecoError::config("require_contained needs require_track"));
        }
        Ok(())
    }

    /// Parse a JSON document, then validate it.
    pub fn from_json(text: &str) -> Result<Self, RecoError> {
        let config: SelectionConfig =
            serde_json::from_str(text).map_err(|e| RecoError::config(format!("unreadable configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SelectionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_contained_without_track_rejected() {
        let cfg = SelectionConfig {
            require_contained: true,
            ..SelectionConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(RecoError::Config(_))));
    }

    #[test]
    fn test_partial_json() {
        let cfg = SelectionConfig::from_json(
            r#"{"require_track": true, "require_contained": true, "crt": {"crt_hit_time_window": 3.0}}"#,
        )
        .unwrap();
        assert!(cfg.require_contained);
        assert_eq!(cfg.crt.crt_hit_time_window, 3.0);
        assert_eq!(cfg.crt.crt_hit_distance, CrtMatchConfig::default().crt_hit_distance);
    }

    #[test]
    fn test_bad_json() {
        assert!(SelectionConfig::from_json("{not json").is_err());
    }
}
