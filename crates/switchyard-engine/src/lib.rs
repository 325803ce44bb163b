//! Step-engine abstraction for pluggable LLM backends.
//!
//! Engines execute one step of a flow and produce a [`StepResult`] plus
//! events. Lifecycle-capable engines additionally split execution into
//! three phases: work ("the grind"), finalize (JIT handoff extraction
//! while context is hot), and route (a fresh routing decision), which the
//! orchestrator drives when available.
//!
//! Two artifact conventions are required of every engine:
//!
//! 1. a JSONL transcript of all LLM events at
//!    `RUN_BASE/llm/<step_id>-<agent>-<engine>.jsonl`, and
//! 2. a JSON receipt mirroring the envelope at
//!    `RUN_BASE/receipts/<step_id>-<agent>.json` with engine-local fields
//!    (mode, provider, model, tokens, duration, context truncation).

mod context;
mod error;
mod factory;
mod prompt;
mod receipt;
mod result;
mod stub;
mod tools;

pub use context::{RoutingContext, StepContext};
pub use error::{Error, Result};
pub use factory::{get_step_engine, list_available_engines};
pub use prompt::{build_prompt, prompt_hash, BuiltPrompt};
pub use receipt::{
    read_receipt, read_receipt_field, receipt_path, transcript_path, update_receipt_routing,
    write_receipt, ReceiptFields,
};
pub use result::{FinalizationResult, StepResult};
pub use stub::StubStepEngine;
pub use tools::tools_for_step;

use switchyard_types::{HandoffEnvelope, RoutingSignal, RunEvent};

/// Abstract step executor.
///
/// `run_step` is the single-phase entry point every engine must provide.
/// Engines that support explicit lifecycle phases return themselves from
/// `as_lifecycle`; the orchestrator dispatches on that interface rather
/// than downcasting concrete types.
pub trait StepEngine: Send + Sync + std::fmt::Debug {
    /// Stable engine identifier (e.g. "stub-step").
    fn engine_id(&self) -> &str;

    /// Execute a step in one phase, returning the result and any events
    /// observed during execution.
    fn run_step(&self, ctx: &StepContext) -> Result<(StepResult, Vec<RunEvent>)>;

    /// Lifecycle-capable view of this engine, when supported.
    fn as_lifecycle(&self) -> Option<&dyn LifecycleCapableEngine> {
        None
    }
}

/// Extended engine interface with explicit lifecycle phases.
pub trait LifecycleCapableEngine: StepEngine {
    /// Phase 1, work: do the actual task. Returns the step result, events, and
    /// a work summary carried into finalization.
    fn run_worker(&self, ctx: &StepContext) -> Result<(StepResult, Vec<RunEvent>, String)>;

    /// Phase 2, JIT finalization: produce the handoff envelope while the
    /// working context is still hot.
    fn finalize_step(
        &self,
        ctx: &StepContext,
        step_result: &StepResult,
        work_summary: &str,
    ) -> Result<FinalizationResult>;

    /// Phase 3, routing: a fresh session derives a routing signal from
    /// the handoff. The orchestrator may ignore this signal when the
    /// unified driver runs in deterministic-only mode.
    fn route_step(&self, ctx: &StepContext, handoff: &HandoffEnvelope) -> Result<RoutingSignal>;
}
