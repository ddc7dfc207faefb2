//! End-to-end reconstruction scenarios.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SCN-001: contained muon, no external detector data
    ContainedMuon,

    /// SCN-002: 80% of the muon's hits on its track
    TruthCompleteness,

    /// SCN-003: truth interaction, nothing reconstructed
    EmptyEvent,

    /// SCN-004: CRT hits in and out of the coincidence window
    CrtTiming,

    /// SCN-005: containment cut on exiting muons
    ContainmentCut,

    /// SCN-006: clear cosmics mixed with neutrinos
    CosmicRejection,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::ContainedMuon,
            ScenarioId::TruthCompleteness,
            ScenarioId::EmptyEvent,
            ScenarioId::CrtTiming,
            ScenarioId::ContainmentCut,
            ScenarioId::CosmicRejection,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::ContainedMuon => "contained_muon",
            ScenarioId::TruthCompleteness => "truth_completeness",
            ScenarioId::EmptyEvent => "empty_event",
            ScenarioId::CrtTiming => "crt_timing",
            ScenarioId::ContainmentCut => "containment_cut",
            ScenarioId::CosmicRejection => "cosmic_rejection",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::ContainedMuon => "Contained muons take range momentum and carry no CRT/flash matches",
            ScenarioId::TruthCompleteness => "Track holding 80 of 100 muon hits matches with completion 0.8",
            ScenarioId::EmptyEvent => "No particle-flow candidates: no reco interactions, truth still built",
            ScenarioId::CrtTiming => "CRT hits at +0.1us and +50us with a 5us window: only the first matches",
            ScenarioId::ContainmentCut => "require_contained drops every exiting primary track",
            ScenarioId::CosmicRejection => "Clear-cosmic slices never become interactions",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "contained_muon" | "containedmuon" | "scn-001" => Ok(ScenarioId::ContainedMuon),
            "truth_completeness" | "truthcompleteness" | "scn-002" => Ok(ScenarioId::TruthCompleteness),
            "empty_event" | "emptyevent" | "scn-003" => Ok(ScenarioId::EmptyEvent),
            "crt_timing" | "crttiming" | "scn-004" => Ok(ScenarioId::CrtTiming),
            "containment_cut" | "containmentcut" | "scn-005" => Ok(ScenarioId::ContainmentCut),
            "cosmic_rejection" | "cosmicrejection" | "scn-006" => Ok(ScenarioId::CosmicRejection),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>(), Ok(id));
        }
        assert_eq!("SCN-004".parse::<ScenarioId>(), Ok(ScenarioId::CrtTiming));
        assert!("nope".parse::<ScenarioId>().is_err());
    }
}
