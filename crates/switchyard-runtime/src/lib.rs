//! Stepwise orchestration runtime.
//!
//! Owns the step loop and everything that decides what runs next:
//!
//! - [`StepwiseOrchestrator`] drives flows step by step against the
//!   durable store, with graceful stop/pause and crash-safe resume.
//! - [`route_step`] is the unified routing driver: fast-path →
//!   deterministic → Navigator → envelope fallback → escalate, with one
//!   auditable [`RoutingOutcome`] per step.
//! - The navigator integration primitives apply detours, validate
//!   EXTEND_GRAPH proposals against the station library, and walk
//!   multi-step sidequests via the interruption/resume stacks.
//! - [`ParallelExecutor`] fans a step out into branches and joins them
//!   under configurable strategies.

mod candidates;
mod driver;
mod error;
mod integration;
mod navigator;
mod orchestrator;
mod parallel;
mod resolver;
mod runner;
mod stall;
mod stop;

pub use candidates::{
    compare_claim_vs_evidence, generate_routing_candidates, ForensicRecommendation,
    ForensicVerdict,
};
pub use driver::{route_step, RouteRequest, RoutingOutcome, RoutingSource};
pub use error::{Error, Result};
pub use integration::{
    apply_detour_request, apply_extend_graph_request, check_and_handle_detour_completion,
    emit_graph_patch_suggested_event, get_current_detour_depth, rewrite_pause_to_detour,
    MAX_DETOUR_DEPTH,
};
pub use navigator::{
    DetourRequest, NavigationOrchestrator, Navigator, NavigatorInput, NavigatorOutput,
    NavigatorSignals, ProposedEdge, ProposedNode, RouteIntent, RouteProposal, ScriptedNavigator,
    SignalLevel,
};
pub use orchestrator::StepwiseOrchestrator;
pub use parallel::{
    join_results, AggregateStatus, BranchResult, ExecutionPolicy, FailurePolicy, ForkConfig,
    ForkResult, IsolationMode, JoinConfig, JoinStrategy, ParallelExecutor,
};
pub use resolver::{resolve_node, sequential_next, ResolvedNode};
pub use runner::{
    attach_file_changes, run_step_with_engine, step_execution_events, ChangeScanner,
    FsSnapshotScanner, NullScanner, StepRunResult,
};
pub use stall::{
    compute_error_signature, progress_signature, ProgressEvidence, ProgressTracker, StallAnalysis,
    STALL_THRESHOLD,
};
pub use stop::StopRegistry;
