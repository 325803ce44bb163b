use crate::error::{Error, Result};
use crate::stub::StubStepEngine;
use crate::StepEngine;

/// Create a step engine by id.
///
/// Concrete LLM backends register here; the stub reference engine is the
/// only one shipped with the core.
pub fn get_step_engine(engine_id: &str) -> Result<Box<dyn StepEngine>> {
    match engine_id {
        "stub-step" => Ok(Box::new(StubStepEngine::new())),
        other => Err(Error::UnknownEngine(other.to_string())),
    }
}

/// Available engines with a one-line description each.
pub fn list_available_engines() -> Vec<(&'static str, &'static str)> {
    vec![(
        "stub-step",
        "Lifecycle-capable stub engine (no LLM calls; for CI and dry runs)",
    )]
}
