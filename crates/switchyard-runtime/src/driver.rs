//! Unified routing driver.
//!
//! `route_step` is the single entry point for deciding what runs after a
//! completed step. Strategies are tried in strict priority order (fast
//! path, deterministic fallback, Navigator, envelope fallback, escalate)
//! and every outcome carries the `routing_source` that actually decided,
//! so the audit trail never hides a silent fallback.

use std::fs;
use std::path::Path;

use serde_json::json;

use switchyard_catalog::{FlowDefinition, RoutingKind, StepDefinition, TriggerContext};
use switchyard_engine::StepResult;
use switchyard_types::{
    HandoffEnvelope, RoutingCandidate, RoutingDecision, RoutingMode, RoutingSignal, RunEvent,
    RunSpec, RunState,
};

use crate::candidates::{compare_claim_vs_evidence, generate_routing_candidates};
use crate::integration::{
    apply_detour_request, apply_extend_graph_request, emit_graph_patch_suggested_event,
    rewrite_pause_to_detour,
};
use crate::navigator::{NavigatorInput, RouteIntent};
use crate::stall::{ProgressEvidence, StallAnalysis};
use crate::NavigationOrchestrator;

/// Which strategy produced a routing outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingSource {
    FastPath,
    Deterministic,
    Navigator,
    NavigatorDetour,
    NavigatorExtendGraph,
    EnvelopeFallback,
    Escalate,
}

impl RoutingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingSource::FastPath => "fast_path",
            RoutingSource::Deterministic => "deterministic",
            RoutingSource::Navigator => "navigator",
            RoutingSource::NavigatorDetour => "navigator:detour",
            RoutingSource::NavigatorExtendGraph => "navigator:extend_graph",
            RoutingSource::EnvelopeFallback => "envelope_fallback",
            RoutingSource::Escalate => "escalate",
        }
    }
}

/// Unified return type for all routing strategies.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingOutcome {
    pub decision: RoutingDecision,
    /// Next node to execute, or `None` when the flow is complete.
    pub next_step_id: Option<String>,
    pub reason: String,
    pub confidence: f64,
    pub needs_human: bool,
    pub routing_source: RoutingSource,
    pub chosen_candidate_id: Option<String>,
    /// Relative path to the candidate-set artifact, when one was written.
    pub candidate_set_path: Option<String>,
    pub candidates: Vec<RoutingCandidate>,
    pub loop_iteration: u32,
    pub exit_condition_met: bool,
    pub signal: Option<RoutingSignal>,
}

impl RoutingOutcome {
    fn new(
        decision: RoutingDecision,
        next_step_id: Option<String>,
        reason: impl Into<String>,
        source: RoutingSource,
    ) -> Self {
        Self {
            decision,
            next_step_id,
            reason: reason.into(),
            confidence: 1.0,
            needs_human: false,
            routing_source: source,
            chosen_candidate_id: None,
            candidate_set_path: None,
            candidates: Vec::new(),
            loop_iteration: 0,
            exit_condition_met: false,
            signal: None,
        }
    }
}

/// Inputs to one routing decision.
pub struct RouteRequest<'a> {
    pub step: &'a StepDefinition,
    pub step_result: &'a StepResult,
    pub run_state: &'a mut RunState,
    /// Iterations already taken for this step's microloop.
    pub iteration: u32,
    pub routing_mode: RoutingMode,
    pub run_id: &'a str,
    pub flow_key: &'a str,
    pub flow_def: Option<&'a FlowDefinition>,
    pub spec: Option<&'a RunSpec>,
    pub run_base: Option<&'a Path>,
    pub navigation: Option<&'a NavigationOrchestrator>,
    /// Envelope of this step's previous completion (for forensics).
    pub previous_envelope: Option<&'a HandoffEnvelope>,
    pub progress: Option<&'a ProgressEvidence>,
    pub stall: Option<&'a StallAnalysis>,
    /// Signal produced by the engine's own route phase, for the envelope
    /// fallback strategy.
    pub envelope_signal: Option<&'a RoutingSignal>,
    /// Sink for events emitted during routing (graph patches, detours).
    pub emit_event: Option<&'a dyn Fn(RunEvent)>,
}

/// Decide the next node after a completed step.
pub fn route_step(req: &mut RouteRequest<'_>) -> RoutingOutcome {
    if let Some(outcome) = try_fast_path(req) {
        return outcome;
    }

    if req.routing_mode == RoutingMode::DeterministicOnly {
        if let Some(outcome) = try_deterministic(req) {
            return outcome;
        }
    }

    if let Some(outcome) = try_navigator(req) {
        return outcome;
    }

    if let Some(outcome) = try_envelope_fallback(req) {
        return outcome;
    }

    escalate(req)
}

// ---------------------------------------------------------------------------
// Strategy 1: fast path
// ---------------------------------------------------------------------------

fn try_fast_path(req: &RouteRequest<'_>) -> Option<RoutingOutcome> {
    // Explicit next from the step result: trust the caller.
    if let Some(next) = &req.step_result.next_step_id {
        let mut outcome = RoutingOutcome::new(
            RoutingDecision::Advance,
            Some(next.clone()),
            "explicit_next_step_id",
            RoutingSource::FastPath,
        );
        outcome.loop_iteration = req.iteration;
        return Some(outcome);
    }

    // A failed step never rides an edge silently; later strategies (and
    // ultimately escalate) own that case.
    if req.step_result.is_failed() {
        return None;
    }

    let routing = &req.step.routing;
    match routing.kind {
        RoutingKind::Microloop => Some(route_microloop(req)),
        RoutingKind::Linear => match &routing.next {
            Some(next) => Some(RoutingOutcome::new(
                RoutingDecision::Advance,
                Some(next.clone()),
                "single unconditional edge",
                RoutingSource::FastPath,
            )),
            None => {
                let mut outcome = RoutingOutcome::new(
                    RoutingDecision::Terminate,
                    None,
                    "terminal step",
                    RoutingSource::FastPath,
                );
                outcome.exit_condition_met = true;
                Some(outcome)
            }
        },
        RoutingKind::Branch => None,
    }
}

fn route_microloop(req: &RouteRequest<'_>) -> RoutingOutcome {
    let routing = &req.step.routing;
    let status = &req.step_result.status;
    let exit_target = routing.next.clone();
    let loop_target = routing
        .loop_target
        .clone()
        .unwrap_or_else(|| req.step.id.clone());

    let exit = |reason: String, iteration: u32| {
        let decision = if exit_target.is_some() {
            RoutingDecision::Advance
        } else {
            RoutingDecision::Terminate
        };
        let mut outcome =
            RoutingOutcome::new(decision, exit_target.clone(), reason, RoutingSource::FastPath);
        outcome.exit_condition_met = true;
        outcome.loop_iteration = iteration;
        outcome
    };

    // Primary exit: the critic declared success.
    if routing.loop_success_values.iter().any(|v| v == status) {
        return exit(
            format!("exit condition met: {status}"),
            req.iteration,
        );
    }

    // The critic says more iterations will not help.
    let critic_gave_up = req
        .envelope_signal
        .and_then(|s| s.explanation.as_ref())
        .and_then(|e| e.microloop_context.as_ref())
        .is_some_and(|mc| !mc.can_further_iteration_help);
    if critic_gave_up {
        return exit(
            "critic reports further iteration cannot help".to_string(),
            req.iteration,
        );
    }

    // Stall detection: same progress signature across consecutive loops.
    if let Some(stall) = req.stall.filter(|s| s.stalled) {
        return exit(
            format!(
                "progress stalled: signature {} repeated {} times",
                stall.signature, stall.consecutive
            ),
            req.iteration,
        );
    }

    // Safety fuse only. Steering belongs to the conditions above.
    if req.iteration + 1 >= routing.max_iterations {
        return exit(
            format!("max_iterations fuse tripped at {}", routing.max_iterations),
            req.iteration,
        );
    }

    let mut outcome = RoutingOutcome::new(
        RoutingDecision::Loop,
        Some(loop_target.clone()),
        format!("critic status {status}; looping to {loop_target}"),
        RoutingSource::FastPath,
    );
    outcome.loop_iteration = req.iteration + 1;
    outcome
}

// ---------------------------------------------------------------------------
// Strategy 2: deterministic fallback (DETERMINISTIC_ONLY)
// ---------------------------------------------------------------------------

fn try_deterministic(req: &RouteRequest<'_>) -> Option<RoutingOutcome> {
    let routing = &req.step.routing;
    if routing.kind != RoutingKind::Branch {
        return None;
    }

    let truthy: Vec<(&String, &String)> = routing
        .branches
        .iter()
        .filter(|(_, condition)| evaluate_condition(condition, req.step_result))
        .collect();

    match truthy.as_slice() {
        [] => {
            let mut outcome = escalate_outcome(format!(
                "no branch condition matched for step {} (status={})",
                req.step.id, req.step_result.status
            ));
            outcome.routing_source = RoutingSource::Escalate;
            Some(outcome)
        }
        [(target, condition)] => {
            let mut outcome = RoutingOutcome::new(
                RoutingDecision::Branch,
                Some((*target).clone()),
                format!("condition matched: {condition}"),
                RoutingSource::Deterministic,
            );
            outcome.confidence = 1.0;
            Some(outcome)
        }
        multiple => {
            let (target, condition) = multiple[0];
            let eliminated: Vec<&str> = multiple[1..]
                .iter()
                .map(|(t, _)| t.as_str())
                .collect();
            Some(RoutingOutcome::new(
                RoutingDecision::Branch,
                Some(target.clone()),
                format!(
                    "multiple conditions matched; took '{condition}' by priority (eliminated: {})",
                    eliminated.join(", ")
                ),
                RoutingSource::Deterministic,
            ))
        }
    }
}

/// Minimal condition language over the step result:
/// `status == 'X'`, `status != 'X'`, `failed`, `always`.
fn evaluate_condition(condition: &str, result: &StepResult) -> bool {
    let condition = condition.trim();
    if condition.is_empty() || condition == "always" || condition == "true" {
        return true;
    }
    if condition == "failed" {
        return result.is_failed();
    }
    if let Some(rest) = condition.strip_prefix("status ==") {
        return unquote(rest) == result.status;
    }
    if let Some(rest) = condition.strip_prefix("status !=") {
        return unquote(rest) != result.status;
    }
    log::debug!("Unrecognized edge condition '{condition}'; treating as false");
    false
}

fn unquote(s: &str) -> &str {
    s.trim().trim_matches(|c| c == '\'' || c == '"')
}

// ---------------------------------------------------------------------------
// Strategy 3: Navigator
// ---------------------------------------------------------------------------

fn try_navigator(req: &mut RouteRequest<'_>) -> Option<RoutingOutcome> {
    if !matches!(
        req.routing_mode,
        RoutingMode::Assist | RoutingMode::Authoritative
    ) {
        return None;
    }
    let navigation = req.navigation?;
    let (spec, run_base) = match (req.flow_def, req.spec, req.run_base) {
        (Some(_flow_def), Some(s), Some(r)) => (s, r),
        _ => {
            log::debug!(
                "Navigator skipped for step {}: missing flow_def/spec/run_base",
                req.step.id
            );
            return None;
        }
    };

    match route_via_navigator(req, navigation, spec, run_base) {
        Ok(outcome) => outcome,
        Err(err) => {
            log::warn!(
                "Navigator routing failed ({err_type}) for step {step} (run={run}, flow={flow}): {err}",
                err_type = error_type_name(&err),
                step = req.step.id,
                run = req.run_id,
                flow = req.flow_key,
            );
            None
        }
    }
}

fn error_type_name(err: &crate::Error) -> &'static str {
    match err {
        crate::Error::Store(_) => "StoreError",
        crate::Error::Catalog(_) => "CatalogError",
        crate::Error::Engine(_) => "EngineError",
        crate::Error::Io(_) => "IoError",
        crate::Error::UnknownFlow(_) => "UnknownFlow",
        crate::Error::NoSavedState(_) => "NoSavedState",
        crate::Error::Navigation(_) => "NavigationError",
    }
}

fn route_via_navigator(
    req: &mut RouteRequest<'_>,
    navigation: &NavigationOrchestrator,
    spec: &RunSpec,
    run_base: &Path,
) -> crate::Result<Option<RoutingOutcome>> {
    let status_ok = req
        .step
        .routing
        .loop_success_values
        .iter()
        .any(|v| v == &req.step_result.status)
        || req.step_result.status == "succeeded";

    let trigger_ctx = TriggerContext {
        verification_passed: status_ok,
        stall_detected: req.stall.is_some_and(|s| s.stalled),
        needs_clarification: false,
        iteration: req.iteration,
    };
    let applicable = navigation
        .sidequest_catalog
        .get_applicable_sidequests(&trigger_ctx, req.run_id);

    let forensic = compare_claim_vs_evidence(req.previous_envelope, req.progress);
    let candidates = generate_routing_candidates(
        req.step,
        req.step_result,
        req.iteration,
        &applicable,
        Some(&forensic),
    );

    let input = NavigatorInput {
        run_id: req.run_id,
        flow_key: req.flow_key,
        current_node: &req.step.id,
        iteration: req.iteration,
        step_status: &req.step_result.status,
        verification_passed: status_ok,
        candidates: &candidates,
        file_changes_summary: req.progress.map(|p| p.files_summary.as_str()),
        stall: req.stall,
        previous_summary: req.previous_envelope.map(|e| e.summary.as_str()),
        no_human_mid_flow: spec.no_human_mid_flow,
    };

    let mut nav_output = navigation.navigator.navigate(&input)?;

    if spec.no_human_mid_flow {
        nav_output = rewrite_pause_to_detour(nav_output, &navigation.sidequest_catalog);
    }

    // Persist the candidate set before acting on the choice.
    let candidate_set_path = persist_candidate_set(run_base, &req.step.id, &candidates);

    let reasoning = nav_output.route.reasoning.clone();
    let confidence = nav_output.route.confidence;
    let chosen_candidate_id = nav_output.chosen_candidate_id.clone();

    let mut outcome = match nav_output.route.intent {
        RouteIntent::Detour => {
            let first_node = apply_detour_request(
                &nav_output,
                req.run_state,
                &navigation.sidequest_catalog,
                &req.step.id,
            );
            let Some(first_node) = first_node else {
                // Depth cap or unknown sidequest. The candidate set
                // remains; let the next strategy decide.
                return Ok(None);
            };
            let sidequest_id = nav_output
                .detour_request
                .as_ref()
                .map(|d| d.sidequest_id.clone())
                .unwrap_or_default();
            if let Some(emit) = req.emit_event {
                emit(
                    RunEvent::new(req.run_id, "detour_taken", req.flow_key)
                        .with_step(&req.step.id)
                        .payload_entry("sidequest_id", json!(sidequest_id))
                        .payload_entry("first_node", json!(first_node)),
                );
                emit(
                    RunEvent::new(req.run_id, "sidequest_start", req.flow_key)
                        .with_step(&first_node)
                        .payload_entry("sidequest_id", json!(sidequest_id)),
                );
            }
            RoutingOutcome::new(
                RoutingDecision::Branch,
                Some(first_node),
                format!("Detour: {reasoning}"),
                RoutingSource::NavigatorDetour,
            )
        }
        RouteIntent::ExtendGraph => {
            let target = apply_extend_graph_request(
                &nav_output,
                req.run_state,
                &req.step.id,
                &navigation.station_library,
            );
            let Some(target) = target else {
                // Unknown station: rejected with no state change.
                return Ok(None);
            };
            if let (Some(emit), Some(edge)) = (req.emit_event, nav_output.proposed_edge.as_ref()) {
                emit_graph_patch_suggested_event(req.run_id, req.flow_key, &req.step.id, edge, emit);
            }
            RoutingOutcome::new(
                RoutingDecision::Branch,
                Some(target),
                format!("Extend graph: {reasoning}"),
                RoutingSource::NavigatorExtendGraph,
            )
        }
        RouteIntent::Pause => {
            let mut outcome = RoutingOutcome::new(
                RoutingDecision::Advance,
                None,
                format!("Navigator paused: {reasoning}"),
                RoutingSource::Navigator,
            );
            outcome.needs_human = true;
            outcome
        }
        RouteIntent::Terminate => {
            let mut outcome = RoutingOutcome::new(
                RoutingDecision::Terminate,
                None,
                reasoning.clone(),
                RoutingSource::Navigator,
            );
            outcome.exit_condition_met = true;
            outcome
        }
        RouteIntent::Loop => {
            let target = nav_output
                .route
                .target_node
                .clone()
                .or_else(|| req.step.routing.loop_target.clone())
                .unwrap_or_else(|| req.step.id.clone());
            let mut outcome = RoutingOutcome::new(
                RoutingDecision::Loop,
                Some(target),
                reasoning.clone(),
                RoutingSource::Navigator,
            );
            outcome.loop_iteration = req.iteration + 1;
            outcome
        }
        RouteIntent::Advance => {
            let target = nav_output.route.target_node.clone().or_else(|| {
                candidates
                    .iter()
                    .find(|c| c.is_default && c.action == "advance")
                    .and_then(|c| c.target_node.clone())
            });
            RoutingOutcome::new(
                RoutingDecision::Advance,
                target,
                reasoning.clone(),
                RoutingSource::Navigator,
            )
        }
    };

    outcome.confidence = confidence;
    outcome.needs_human = outcome.needs_human || nav_output.signals.needs_human;
    outcome.chosen_candidate_id = chosen_candidate_id;
    outcome.candidate_set_path = candidate_set_path.clone();
    outcome.loop_iteration = outcome.loop_iteration.max(req.iteration);
    outcome.candidates = candidates;

    // Routing augmentation goes to a sibling artifact; the envelope file
    // itself is immutable once written.
    write_routing_augmentation(run_base, &req.step.id, &outcome);

    Ok(Some(outcome))
}

fn persist_candidate_set(
    run_base: &Path,
    step_id: &str,
    candidates: &[RoutingCandidate],
) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }
    let routing_dir = run_base.join("routing");
    if let Err(err) = fs::create_dir_all(&routing_dir) {
        log::warn!("Failed to create routing dir: {err}");
        return None;
    }
    let relative = format!("routing/candidates_step_{step_id}.json");
    let artifact = json!({
        "step_id": step_id,
        "candidate_count": candidates.len(),
        "candidates": candidates,
    });
    let path = routing_dir.join(format!("candidates_step_{step_id}.json"));
    match serde_json::to_string_pretty(&artifact)
        .map_err(std::io::Error::other)
        .and_then(|content| fs::write(&path, content))
    {
        Ok(()) => Some(relative),
        Err(err) => {
            log::warn!("Failed to write routing candidates artifact: {err}");
            None
        }
    }
}

fn write_routing_augmentation(run_base: &Path, step_id: &str, outcome: &RoutingOutcome) {
    let handoff_dir = run_base.join("handoff");
    if let Err(err) = fs::create_dir_all(&handoff_dir) {
        log::warn!("Failed to create handoff dir for routing draft: {err}");
        return;
    }
    let draft = json!({
        "decision": outcome.decision.as_str(),
        "next_step_id": outcome.next_step_id,
        "reason": outcome.reason,
        "confidence": outcome.confidence,
        "needs_human": outcome.needs_human,
        "chosen_candidate_id": outcome.chosen_candidate_id,
        "candidate_count": outcome.candidates.len(),
        "candidate_ids": outcome.candidates.iter().map(|c| c.candidate_id.clone()).collect::<Vec<_>>(),
        "candidate_set_path": outcome.candidate_set_path,
        "routing_source": outcome.routing_source.as_str(),
    });
    let path = handoff_dir.join(format!("{step_id}.routing.json"));
    if let Err(err) = serde_json::to_string_pretty(&draft)
        .map_err(std::io::Error::other)
        .and_then(|content| fs::write(&path, content))
    {
        log::warn!("Failed to write routing augmentation draft: {err}");
    }
}

// ---------------------------------------------------------------------------
// Strategy 4: envelope fallback
// ---------------------------------------------------------------------------

fn try_envelope_fallback(req: &RouteRequest<'_>) -> Option<RoutingOutcome> {
    let signal = req.envelope_signal?;

    // Skip is high-friction: an incomplete justification voids the signal.
    if !signal.skip_is_justified() {
        log::warn!(
            "Envelope signal for step {} rejected: skip decision without complete justification",
            req.step.id
        );
        return None;
    }

    // A signal with no destination and no terminal intent decides nothing.
    if signal.next_step_id.is_none() && signal.decision != RoutingDecision::Terminate {
        return None;
    }

    let mut outcome = RoutingOutcome::new(
        signal.decision,
        signal.next_step_id.clone(),
        if signal.reason.is_empty() {
            "engine routing signal".to_string()
        } else {
            signal.reason.clone()
        },
        RoutingSource::EnvelopeFallback,
    );
    outcome.confidence = signal.confidence;
    outcome.needs_human = signal.needs_human;
    outcome.exit_condition_met = signal.exit_condition_met;
    outcome.signal = Some(signal.clone());
    Some(outcome)
}

// ---------------------------------------------------------------------------
// Strategy 5: escalate
// ---------------------------------------------------------------------------

fn escalate(req: &RouteRequest<'_>) -> RoutingOutcome {
    escalate_outcome(format!(
        "no routing strategy produced a decision for step {} (status={}); human input required",
        req.step.id, req.step_result.status
    ))
}

fn escalate_outcome(reason: String) -> RoutingOutcome {
    let mut outcome =
        RoutingOutcome::new(RoutingDecision::Advance, None, reason, RoutingSource::Escalate);
    outcome.needs_human = true;
    outcome.confidence = 0.0;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use switchyard_catalog::{SidequestCatalog, StationLibrary, StepRouting};
    use switchyard_types::SkipJustification;
    use tempfile::TempDir;

    use crate::navigator::{NavigatorOutput, ScriptedNavigator};

    fn step(id: &str, routing: StepRouting) -> StepDefinition {
        StepDefinition {
            id: id.into(),
            index: 1,
            role: String::new(),
            agents: vec!["tester".into()],
            routing,
            teaching_notes: None,
        }
    }

    fn result(status: &str) -> StepResult {
        StepResult {
            step_id: "test_step".into(),
            status: status.into(),
            ..StepResult::default()
        }
    }

    fn base_request<'a>(
        step: &'a StepDefinition,
        step_result: &'a StepResult,
        run_state: &'a mut RunState,
        mode: RoutingMode,
    ) -> RouteRequest<'a> {
        RouteRequest {
            step,
            step_result,
            run_state,
            iteration: 0,
            routing_mode: mode,
            run_id: "test-run",
            flow_key: "build",
            flow_def: None,
            spec: None,
            run_base: None,
            navigation: None,
            previous_envelope: None,
            progress: None,
            stall: None,
            envelope_signal: None,
            emit_event: None,
        }
    }

    fn navigation(navigator: ScriptedNavigator) -> NavigationOrchestrator {
        NavigationOrchestrator {
            navigator: Box::new(navigator),
            sidequest_catalog: SidequestCatalog::builtin(),
            station_library: StationLibrary::builtin(),
        }
    }

    #[test]
    fn test_explicit_next_takes_fast_path() {
        let step = step("test_step", StepRouting::linear(Some("other")));
        let mut res = result("VERIFIED");
        res.next_step_id = Some("fast_next".into());
        let mut state = RunState::new("test-run", "build");

        let outcome = route_step(&mut base_request(&step, &res, &mut state, RoutingMode::Assist));
        assert_eq!(outcome.routing_source, RoutingSource::FastPath);
        assert_eq!(outcome.next_step_id.as_deref(), Some("fast_next"));
        assert_eq!(outcome.decision, RoutingDecision::Advance);
    }

    #[test]
    fn test_terminal_step_terminates() {
        let step = step("last", StepRouting::linear(None));
        let res = result("succeeded");
        let mut state = RunState::new("test-run", "build");

        let outcome = route_step(&mut base_request(&step, &res, &mut state, RoutingMode::Assist));
        assert_eq!(outcome.decision, RoutingDecision::Terminate);
        assert!(outcome.next_step_id.is_none());
        assert!(outcome.exit_condition_met);
    }

    #[test]
    fn test_microloop_loops_until_verified() {
        let step = step(
            "critique_reqs",
            StepRouting::microloop("author_reqs", Some("bdd_author"), 3),
        );
        let mut state = RunState::new("test-run", "signal");

        let res = result("UNVERIFIED");
        let outcome = route_step(&mut base_request(&step, &res, &mut state, RoutingMode::Assist));
        assert_eq!(outcome.decision, RoutingDecision::Loop);
        assert_eq!(outcome.next_step_id.as_deref(), Some("author_reqs"));
        assert_eq!(outcome.loop_iteration, 1);

        let res = result("VERIFIED");
        let outcome = route_step(&mut base_request(&step, &res, &mut state, RoutingMode::Assist));
        assert_eq!(outcome.decision, RoutingDecision::Advance);
        assert_eq!(outcome.next_step_id.as_deref(), Some("bdd_author"));
        assert!(outcome.exit_condition_met);
    }

    #[test]
    fn test_microloop_max_iterations_fuse() {
        let step = step(
            "critique_reqs",
            StepRouting::microloop("author_reqs", Some("bdd_author"), 3),
        );
        let res = result("UNVERIFIED");
        let mut state = RunState::new("test-run", "signal");

        let mut req = base_request(&step, &res, &mut state, RoutingMode::Assist);
        req.iteration = 2;
        let outcome = route_step(&mut req);
        assert_eq!(outcome.decision, RoutingDecision::Advance);
        assert!(outcome.reason.contains("max_iterations"));
        assert!(outcome.exit_condition_met);
    }

    #[test]
    fn test_microloop_stall_exits() {
        let step = step(
            "critique_reqs",
            StepRouting::microloop("author_reqs", Some("bdd_author"), 50),
        );
        let res = result("UNVERIFIED");
        let mut state = RunState::new("test-run", "signal");
        let stall = StallAnalysis {
            stalled: true,
            consecutive: 3,
            signature: "abcd1234".into(),
        };

        let mut req = base_request(&step, &res, &mut state, RoutingMode::Assist);
        req.stall = Some(&stall);
        let outcome = route_step(&mut req);
        assert!(outcome.exit_condition_met);
        assert!(outcome.reason.contains("stalled"));
    }

    #[test]
    fn test_deterministic_branch_single_match() {
        let mut routing = StepRouting::default();
        routing.kind = RoutingKind::Branch;
        routing.branches = BTreeMap::from([
            ("happy_path".to_string(), "status == 'VERIFIED'".to_string()),
            ("remediate".to_string(), "status == 'UNVERIFIED'".to_string()),
        ]);
        let step = step("branch_step", routing);
        let res = result("VERIFIED");
        let mut state = RunState::new("test-run", "build");

        let outcome = route_step(&mut base_request(
            &step,
            &res,
            &mut state,
            RoutingMode::DeterministicOnly,
        ));
        assert_eq!(outcome.routing_source, RoutingSource::Deterministic);
        assert_eq!(outcome.next_step_id.as_deref(), Some("happy_path"));
    }

    #[test]
    fn test_deterministic_branch_no_match_escalates() {
        let mut routing = StepRouting::default();
        routing.kind = RoutingKind::Branch;
        routing.branches =
            BTreeMap::from([("happy_path".to_string(), "status == 'VERIFIED'".to_string())]);
        let step = step("branch_step", routing);
        let res = result("BLOCKED");
        let mut state = RunState::new("test-run", "build");

        let outcome = route_step(&mut base_request(
            &step,
            &res,
            &mut state,
            RoutingMode::DeterministicOnly,
        ));
        assert_eq!(outcome.routing_source, RoutingSource::Escalate);
        assert!(outcome.needs_human);
    }

    #[test]
    fn test_deterministic_only_never_calls_navigator() {
        let mut routing = StepRouting::default();
        routing.kind = RoutingKind::Branch;
        routing.branches =
            BTreeMap::from([("next".to_string(), "always".to_string())]);
        let step = step("branch_step", routing);
        let res = result("VERIFIED");
        let mut state = RunState::new("test-run", "build");

        // A navigator that would error if consulted.
        let nav = navigation(ScriptedNavigator::failing());
        let dir = TempDir::new().unwrap();
        let spec = RunSpec::new(vec!["build".into()]);
        let flow = FlowDefinition {
            key: "build".into(),
            title: String::new(),
            steps: vec![],
        };

        let mut req = base_request(&step, &res, &mut state, RoutingMode::DeterministicOnly);
        req.navigation = Some(&nav);
        req.flow_def = Some(&flow);
        req.spec = Some(&spec);
        req.run_base = Some(dir.path());

        let outcome = route_step(&mut req);
        assert!(!outcome.routing_source.as_str().contains("navigator"));
    }

    #[test]
    fn test_navigator_error_falls_through() {
        let mut routing = StepRouting::default();
        routing.kind = RoutingKind::Branch;
        let step = step("branch_step", routing);
        let res = result("VERIFIED");
        let mut state = RunState::new("test-run", "build");

        let nav = navigation(ScriptedNavigator::failing());
        let dir = TempDir::new().unwrap();
        let spec = RunSpec::new(vec!["build".into()]);
        let flow = FlowDefinition {
            key: "build".into(),
            title: String::new(),
            steps: vec![],
        };

        let mut req = base_request(&step, &res, &mut state, RoutingMode::Assist);
        req.navigation = Some(&nav);
        req.flow_def = Some(&flow);
        req.spec = Some(&spec);
        req.run_base = Some(dir.path());

        let outcome = route_step(&mut req);
        assert!(matches!(
            outcome.routing_source,
            RoutingSource::Deterministic
                | RoutingSource::EnvelopeFallback
                | RoutingSource::Escalate
                | RoutingSource::FastPath
        ));
    }

    #[test]
    fn test_navigator_chooses_candidate() {
        let mut routing = StepRouting::default();
        routing.kind = RoutingKind::Branch;
        routing.branches = BTreeMap::from([
            ("implement".to_string(), "status == 'VERIFIED'".to_string()),
            ("replan".to_string(), "status == 'UNVERIFIED'".to_string()),
        ]);
        let step = step("branch_step", routing);
        let res = result("VERIFIED");
        let mut state = RunState::new("test-run", "build");

        let mut output = NavigatorOutput::advance(Some("implement".into()), "navigator_decision");
        output.chosen_candidate_id = Some("branch_implement".into());
        let nav = navigation(ScriptedNavigator::new().with_output(output));

        let dir = TempDir::new().unwrap();
        let spec = RunSpec::new(vec!["build".into()]);
        let flow = FlowDefinition {
            key: "build".into(),
            title: String::new(),
            steps: vec![],
        };

        let mut req = base_request(&step, &res, &mut state, RoutingMode::Assist);
        req.navigation = Some(&nav);
        req.flow_def = Some(&flow);
        req.spec = Some(&spec);
        req.run_base = Some(dir.path());

        let outcome = route_step(&mut req);
        assert_eq!(outcome.routing_source, RoutingSource::Navigator);
        assert_eq!(outcome.next_step_id.as_deref(), Some("implement"));
        assert_eq!(outcome.chosen_candidate_id.as_deref(), Some("branch_implement"));

        // Candidate set artifact persisted.
        let artifact = dir.path().join("routing").join("candidates_step_branch_step.json");
        assert!(artifact.exists());
        assert_eq!(
            outcome.candidate_set_path.as_deref(),
            Some("routing/candidates_step_branch_step.json")
        );
    }

    #[test]
    fn test_envelope_fallback_adopts_signal() {
        let mut routing = StepRouting::default();
        routing.kind = RoutingKind::Branch;
        let step = step("branch_step", routing);
        let res = result("VERIFIED");
        let mut state = RunState::new("test-run", "build");

        let signal = RoutingSignal::advance(Some("engine_choice".into()), "engine route phase");
        let mut req = base_request(&step, &res, &mut state, RoutingMode::Assist);
        req.envelope_signal = Some(&signal);

        let outcome = route_step(&mut req);
        assert_eq!(outcome.routing_source, RoutingSource::EnvelopeFallback);
        assert_eq!(outcome.next_step_id.as_deref(), Some("engine_choice"));
    }

    #[test]
    fn test_unjustified_skip_falls_to_escalate() {
        let mut routing = StepRouting::default();
        routing.kind = RoutingKind::Branch;
        let step = step("branch_step", routing);
        let res = result("VERIFIED");
        let mut state = RunState::new("test-run", "build");

        let signal = RoutingSignal {
            decision: RoutingDecision::Skip,
            next_step_id: Some("after_skipped".into()),
            skip_justification: Some(SkipJustification {
                skip_reason: "redundant".into(),
                why_not_needed_for_exit: String::new(),
                replacement_assurance: "covered elsewhere".into(),
            }),
            ..RoutingSignal::default()
        };
        let mut req = base_request(&step, &res, &mut state, RoutingMode::Assist);
        req.envelope_signal = Some(&signal);

        let outcome = route_step(&mut req);
        assert_eq!(outcome.routing_source, RoutingSource::Escalate);
        assert!(outcome.needs_human);
    }

    #[test]
    fn test_justified_skip_is_adopted() {
        let mut routing = StepRouting::default();
        routing.kind = RoutingKind::Branch;
        let step = step("branch_step", routing);
        let res = result("VERIFIED");
        let mut state = RunState::new("test-run", "build");

        let signal = RoutingSignal {
            decision: RoutingDecision::Skip,
            next_step_id: Some("after_skipped".into()),
            skip_justification: Some(SkipJustification {
                skip_reason: "contract suite already covers this node".into(),
                why_not_needed_for_exit: "exit criteria require only the contract gate".into(),
                replacement_assurance: "gate step re-verifies the same surface".into(),
            }),
            ..RoutingSignal::default()
        };
        let mut req = base_request(&step, &res, &mut state, RoutingMode::Assist);
        req.envelope_signal = Some(&signal);

        let outcome = route_step(&mut req);
        assert_eq!(outcome.routing_source, RoutingSource::EnvelopeFallback);
        assert_eq!(outcome.decision, RoutingDecision::Skip);
    }

    #[test]
    fn test_escalate_is_last_resort() {
        let mut routing = StepRouting::default();
        routing.kind = RoutingKind::Branch;
        let step = step("branch_step", routing);
        let res = result("BLOCKED");
        let mut state = RunState::new("test-run", "build");

        let outcome = route_step(&mut base_request(&step, &res, &mut state, RoutingMode::Assist));
        assert_eq!(outcome.routing_source, RoutingSource::Escalate);
        assert!(outcome.needs_human);
        assert!(outcome.next_step_id.is_none());
    }
}
