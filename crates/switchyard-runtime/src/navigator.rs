//! Navigator seam: a cheap LLM call that runs after each step to choose
//! among routing candidates and propose detours or graph extensions.
//!
//! Traditional tooling does the heavy lifting (graph checks, forensics,
//! stall detection); the Navigator receives a compact pre-digested packet
//! and makes the call. The kernel validates everything it proposes.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use switchyard_types::{NextStepBrief, RoutingCandidate};

use crate::error::{Error, Result};
use crate::stall::StallAnalysis;

/// Navigator route intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteIntent {
    Advance,
    Loop,
    Terminate,
    /// Inject a catalog sidequest before continuing.
    Detour,
    /// Wait for a human. Rewritten to Detour under autopilot when a
    /// clarifier sidequest is available.
    Pause,
    /// Inject a run-local node that is not in the flow graph.
    ExtendGraph,
}

/// Coarse signal strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalLevel {
    Low,
    Medium,
    High,
}

impl Default for SignalLevel {
    fn default() -> Self {
        SignalLevel::Low
    }
}

/// Soft signals accompanying a navigation decision.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NavigatorSignals {
    #[serde(default)]
    pub needs_human: bool,
    #[serde(default)]
    pub uncertainty: SignalLevel,
    #[serde(default)]
    pub stall_suspected: bool,
}

/// The route the Navigator proposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteProposal {
    pub intent: RouteIntent,
    #[serde(default)]
    pub target_node: Option<String>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl RouteProposal {
    pub fn advance(target_node: Option<String>, reasoning: impl Into<String>) -> Self {
        Self {
            intent: RouteIntent::Advance,
            target_node,
            reasoning: reasoning.into(),
            confidence: 1.0,
        }
    }
}

/// Request to run a catalog sidequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetourRequest {
    pub sidequest_id: String,
    #[serde(default)]
    pub objective: String,
    #[serde(default = "default_detour_priority")]
    pub priority: i32,
}

fn default_detour_priority() -> i32 {
    50
}

/// Node half of an EXTEND_GRAPH proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedNode {
    pub template_id: String,
    #[serde(default)]
    pub station_id: Option<String>,
    #[serde(default)]
    pub objective: String,
}

/// Edge (and optional node) the Navigator proposes to inject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedEdge {
    pub from_node: String,
    pub to_node: String,
    /// Why the flow needs this edge.
    #[serde(default)]
    pub why: String,
    #[serde(default = "default_edge_type")]
    pub edge_type: String,
    #[serde(default = "default_edge_priority")]
    pub priority: i32,
    /// Whether execution should return to the interrupted node afterwards.
    #[serde(default)]
    pub is_return: bool,
    #[serde(default)]
    pub proposed_node: Option<ProposedNode>,
}

fn default_edge_type() -> String {
    "injection".to_string()
}

fn default_edge_priority() -> i32 {
    50
}

/// Full Navigator output for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigatorOutput {
    pub route: RouteProposal,
    #[serde(default)]
    pub next_step_brief: NextStepBrief,
    #[serde(default)]
    pub signals: NavigatorSignals,
    #[serde(default)]
    pub detour_request: Option<DetourRequest>,
    #[serde(default)]
    pub proposed_edge: Option<ProposedEdge>,
    /// Candidate the Navigator picked from the presented set.
    #[serde(default)]
    pub chosen_candidate_id: Option<String>,
}

impl NavigatorOutput {
    pub fn advance(target_node: Option<String>, reasoning: impl Into<String>) -> Self {
        Self {
            route: RouteProposal::advance(target_node, reasoning),
            next_step_brief: NextStepBrief::default(),
            signals: NavigatorSignals::default(),
            detour_request: None,
            proposed_edge: None,
            chosen_candidate_id: None,
        }
    }
}

/// Pre-digested packet handed to the Navigator.
#[derive(Debug, Clone)]
pub struct NavigatorInput<'a> {
    pub run_id: &'a str,
    pub flow_key: &'a str,
    pub current_node: &'a str,
    pub iteration: u32,
    pub step_status: &'a str,
    pub verification_passed: bool,
    /// The bounded menu the Navigator chooses from.
    pub candidates: &'a [RoutingCandidate],
    pub file_changes_summary: Option<&'a str>,
    pub stall: Option<&'a StallAnalysis>,
    pub previous_summary: Option<&'a str>,
    pub no_human_mid_flow: bool,
}

/// The LLM seam. Concrete backends live outside the core; tests use
/// [`ScriptedNavigator`].
pub trait Navigator: Send + Sync {
    fn navigate(&self, input: &NavigatorInput<'_>) -> Result<NavigatorOutput>;
}

/// Navigator plus the catalogs its proposals are validated against.
///
/// The routing driver consults this bundle: the sidequest catalog bounds
/// detours, the station library bounds EXTEND_GRAPH targets.
pub struct NavigationOrchestrator {
    pub navigator: Box<dyn Navigator>,
    pub sidequest_catalog: switchyard_catalog::SidequestCatalog,
    pub station_library: switchyard_catalog::StationLibrary,
}

/// Test double returning queued outputs, then a default advance.
#[derive(Default)]
pub struct ScriptedNavigator {
    outputs: Mutex<VecDeque<NavigatorOutput>>,
    fail_always: bool,
}

impl ScriptedNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(self, output: NavigatorOutput) -> Self {
        self.outputs
            .lock()
            .expect("scripted outputs poisoned")
            .push_back(output);
        self
    }

    /// A navigator that always errors, for fallback-path tests.
    pub fn failing() -> Self {
        Self {
            outputs: Mutex::new(VecDeque::new()),
            fail_always: true,
        }
    }
}

impl Navigator for ScriptedNavigator {
    fn navigate(&self, input: &NavigatorInput<'_>) -> Result<NavigatorOutput> {
        if self.fail_always {
            return Err(Error::Navigation("scripted navigator failure".into()));
        }
        let mut outputs = self.outputs.lock().expect("scripted outputs poisoned");
        Ok(outputs.pop_front().unwrap_or_else(|| {
            let default_target = input
                .candidates
                .iter()
                .find(|c| c.is_default)
                .and_then(|c| c.target_node.clone());
            NavigatorOutput::advance(default_target, "scripted default: take default candidate")
        }))
    }
}
