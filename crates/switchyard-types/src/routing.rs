use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Safety fuse for microloops. Loop exit is steered by the critic status and
/// stall detection; this cap only prevents infinite loops.
pub const DEFAULT_MAX_ITERATIONS: u32 = 50;

/// Routing decision types for stepwise execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingDecision {
    Advance,
    Loop,
    Terminate,
    Branch,
    Skip,
}

impl RoutingDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingDecision::Advance => "advance",
            RoutingDecision::Loop => "loop",
            RoutingDecision::Terminate => "terminate",
            RoutingDecision::Branch => "branch",
            RoutingDecision::Skip => "skip",
        }
    }
}

impl Default for RoutingDecision {
    fn default() -> Self {
        RoutingDecision::Advance
    }
}

/// How a routing decision was made, for auditability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    /// Step output specified next_step_id directly.
    Explicit,
    /// Microloop termination (VERIFIED, max_iterations).
    ExitCondition,
    /// Single outgoing edge or edge with condition=true.
    Deterministic,
    /// Edge conditions evaluated against step context.
    Cel,
    /// LLM chose among valid edges.
    LlmTiebreaker,
    /// LLM performed deeper analysis.
    LlmAnalysis,
    /// Routing failed.
    Error,
}

/// Routing mode controlling Navigator involvement.
///
/// - `DeterministicOnly`: no LLM routing calls; used for CI, debugging, and
///   reproducibility.
/// - `Assist` (default): candidates are generated deterministically and the
///   Navigator chooses among them.
/// - `Authoritative`: the Navigator may additionally propose EXTEND_GRAPH
///   and detours more freely; invariants and stack rules still apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    DeterministicOnly,
    Assist,
    Authoritative,
}

impl Default for RoutingMode {
    fn default() -> Self {
        RoutingMode::Assist
    }
}

/// High-friction justification required when a routing decision is `skip`.
///
/// Skipping is subtractive (it removes expected verification), so all three
/// fields must be non-empty before the driver will honor the decision.
/// Detouring is additive and stays cheap by design.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SkipJustification {
    /// Why this node is being skipped.
    pub skip_reason: String,
    /// Why this node is not needed to satisfy the flow's exit criteria.
    pub why_not_needed_for_exit: String,
    /// What replaces this node's verification.
    pub replacement_assurance: String,
}

impl SkipJustification {
    /// A skip decision is only valid when every field is filled in.
    pub fn is_complete(&self) -> bool {
        !self.skip_reason.trim().is_empty()
            && !self.why_not_needed_for_exit.trim().is_empty()
            && !self.replacement_assurance.trim().is_empty()
    }
}

/// Structured justification for routing deviations (detours, injections).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WhyNowJustification {
    /// What triggered this deviation.
    pub trigger: String,
    /// How the deviation serves the flow's charter goal.
    pub relevance_to_charter: String,
    #[serde(default)]
    pub analysis: Option<String>,
    #[serde(default)]
    pub alternatives_considered: Vec<String>,
    #[serde(default)]
    pub expected_outcome: Option<String>,
}

/// A factor considered during LLM routing analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingFactor {
    pub name: String,
    /// "strongly_favors", "favors", "neutral", "against", "strongly_against".
    pub impact: String,
    #[serde(default)]
    pub evidence: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    0.5
}

/// An edge option considered during routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeOption {
    pub edge_id: String,
    pub target_node: String,
    #[serde(default = "default_edge_type")]
    pub edge_type: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub evaluated_result: Option<bool>,
    #[serde(default)]
    pub score: Option<f64>,
}

fn default_edge_type() -> String {
    "sequence".to_string()
}

fn default_priority() -> i32 {
    50
}

/// Record of why an edge was eliminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Elimination {
    pub edge_id: String,
    /// condition_false, priority_lower, exit_condition_met, ...
    pub reason_code: String,
    #[serde(default)]
    pub detail: String,
}

/// Structured output from LLM routing analysis.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LlmReasoning {
    #[serde(default)]
    pub model_used: String,
    #[serde(default)]
    pub prompt_hash: String,
    #[serde(default)]
    pub response_time_ms: u64,
    #[serde(default)]
    pub factors_considered: Vec<RoutingFactor>,
    #[serde(default)]
    pub option_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub primary_justification: String,
    #[serde(default)]
    pub risks_identified: Vec<BTreeMap<String, String>>,
    #[serde(default)]
    pub assumptions_made: Vec<String>,
}

/// Context for microloop routing decisions.
///
/// `max_iterations` is a safety fuse, not a steering mechanism. Loop exit is
/// driven by the critic's status, `can_further_iteration_help`, and stall
/// detection; the high default keeps the fuse from terminating loops early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicroloopContext {
    #[serde(default = "default_iteration")]
    pub iteration: u32,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub loop_target: String,
    #[serde(default)]
    pub exit_status: String,
    #[serde(default = "default_true")]
    pub can_further_iteration_help: bool,
    #[serde(default)]
    pub status_history: Vec<String>,
}

fn default_iteration() -> u32 {
    1
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_true() -> bool {
    true
}

impl Default for MicroloopContext {
    fn default() -> Self {
        Self {
            iteration: 1,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            loop_target: String::new(),
            exit_status: String::new(),
            can_further_iteration_help: true,
            status_history: Vec::new(),
        }
    }
}

/// Metrics about the routing decision process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecisionMetrics {
    #[serde(default)]
    pub total_time_ms: u64,
    #[serde(default)]
    pub edges_total: u32,
    #[serde(default)]
    pub edges_eliminated: u32,
    #[serde(default)]
    pub llm_calls: u32,
    #[serde(default)]
    pub cel_evaluations: u32,
}

/// Structured explanation of a routing decision for auditability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingExplanation {
    pub decision_type: DecisionType,
    pub selected_target: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning_summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_edges: Vec<EdgeOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elimination_log: Vec<Elimination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_reasoning: Option<LlmReasoning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub microloop_context: Option<MicroloopContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<DecisionMetrics>,
}

fn default_confidence() -> f64 {
    1.0
}

impl RoutingExplanation {
    pub fn new(decision_type: DecisionType, selected_target: impl Into<String>) -> Self {
        Self {
            decision_type,
            selected_target: selected_target.into(),
            timestamp: Utc::now(),
            confidence: 1.0,
            reasoning_summary: String::new(),
            available_edges: Vec::new(),
            elimination_log: Vec::new(),
            llm_reasoning: None,
            microloop_context: None,
            metrics: None,
        }
    }
}

/// A single routing option in the candidate set presented to the Navigator.
///
/// Candidates are the bounded menu the Navigator chooses from; it is not
/// expected to invent targets outside this set except via explicit
/// DETOUR/EXTEND_GRAPH intents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingCandidate {
    pub candidate_id: String,
    /// "advance", "loop", "terminate", "detour", ...
    pub action: String,
    #[serde(default)]
    pub target_node: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Which generator produced this candidate ("edge", "sidequest", ...).
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub is_default: bool,
}

/// Normalized routing decision signal for stepwise flow execution.
///
/// Encapsulates the judgment about where to go next in a flow as a
/// structured, machine-readable record instead of fragile receipt-field
/// parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingSignal {
    pub decision: RoutingDecision,
    #[serde(default)]
    pub next_step_id: Option<String>,
    /// Named route identifier (for branch routing).
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub needs_human: bool,
    /// Flow key for macro-routing (flow transitions).
    #[serde(default)]
    pub next_flow: Option<String>,
    #[serde(default)]
    pub loop_count: u32,
    #[serde(default)]
    pub exit_condition_met: bool,
    /// Candidate the Navigator selected, for the audit trail.
    #[serde(default)]
    pub chosen_candidate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<RoutingExplanation>,
    /// Required when `decision` is `Skip`; the driver rejects skips with an
    /// absent or incomplete justification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_justification: Option<SkipJustification>,
}

impl RoutingSignal {
    pub fn advance(next_step_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            decision: RoutingDecision::Advance,
            next_step_id,
            reason: reason.into(),
            ..Self::default()
        }
    }

    pub fn terminate(reason: impl Into<String>) -> Self {
        Self {
            decision: RoutingDecision::Terminate,
            reason: reason.into(),
            exit_condition_met: true,
            ..Self::default()
        }
    }

    pub fn looping(loop_target: impl Into<String>, loop_count: u32, reason: impl Into<String>) -> Self {
        Self {
            decision: RoutingDecision::Loop,
            next_step_id: Some(loop_target.into()),
            reason: reason.into(),
            loop_count,
            ..Self::default()
        }
    }

    /// Whether a skip decision carries its mandatory justification.
    pub fn skip_is_justified(&self) -> bool {
        if self.decision != RoutingDecision::Skip {
            return true;
        }
        self.skip_justification
            .as_ref()
            .is_some_and(SkipJustification::is_complete)
    }

    /// Fold the explanation into a loose JSON blob for envelope audit.
    pub fn audit_blob(&self) -> Option<Value> {
        self.explanation
            .as_ref()
            .and_then(|e| serde_json::to_value(e).ok())
    }
}

impl Default for RoutingSignal {
    fn default() -> Self {
        Self {
            decision: RoutingDecision::Advance,
            next_step_id: None,
            route: None,
            reason: String::new(),
            confidence: 1.0,
            needs_human: false,
            next_flow: None,
            loop_count: 0,
            exit_condition_met: false,
            chosen_candidate_id: None,
            explanation: None,
            skip_justification: None,
        }
    }
}
