use serde::{Deserialize, Serialize};

/// Brief the Navigator writes when routing *to* a step.
///
/// Workers read the brief for their step at hydration time, giving them the
/// objective, focus areas, and warnings the Navigator chose for them.
/// Stored at `RUN_BASE/nav/<step_id>-brief.json`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NextStepBrief {
    #[serde(default)]
    pub objective: String,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    /// Pointers into prior artifacts worth re-reading.
    #[serde(default)]
    pub context_pointers: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl NextStepBrief {
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            ..Self::default()
        }
    }
}
