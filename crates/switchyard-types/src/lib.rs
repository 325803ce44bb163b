//! Core type definitions for the switchyard runtime.
//!
//! This crate provides the foundational data types shared across the
//! orchestrator: run specifications and summaries, the append-only event
//! contract, routing signals with their audit trail, handoff envelopes, and
//! the durable run-state program counter with detour support.
//!
//! All types serialize through serde with forward-compatible defaults:
//! unknown fields are tolerated on read, and fields added after a run was
//! written deserialize to their documented defaults.

mod audit;
mod brief;
mod handoff;
mod ids;
mod routing;
mod runs;
mod state;

pub use audit::{
    AssumptionEntry, AssumptionStatus, ConfidenceLevel, DecisionLogEntry, ObservationEntry,
    ObservationPriority, ObservationType, StationOpinion, StationOpinionKind,
};
pub use brief::NextStepBrief;
pub use handoff::HandoffEnvelope;
pub use ids::{generate_event_id, generate_run_id, is_run_id};
pub use routing::{
    DecisionMetrics, DecisionType, EdgeOption, Elimination, LlmReasoning, MicroloopContext,
    RoutingCandidate, RoutingDecision, RoutingExplanation, RoutingFactor, RoutingMode,
    RoutingSignal, SkipJustification, WhyNowJustification, DEFAULT_MAX_ITERATIONS,
};
pub use runs::{RunEvent, RunSpec, RunStatus, RunSummary, SdlcStatus};
pub use state::{InjectedNodeSpec, InterruptionFrame, ResumePoint, RunState};

/// Stable identifier for a run (`run-YYYYMMDD-HHMMSS-xxxxxx`).
pub type RunId = String;

/// Identifier for an execution backend (e.g. "stub-step", "claude-step").
pub type BackendId = String;
