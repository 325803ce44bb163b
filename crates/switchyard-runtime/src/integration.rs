//! Navigator integration primitives.
//!
//! Small, pure functions the routing driver uses to apply Navigator
//! intents to the run state: PAUSE rewriting, detour and EXTEND_GRAPH
//! application, detour completion, and depth accounting. The kernel
//! enforces the constraints here; the Navigator only proposes.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{json, Value};

use switchyard_catalog::{ReturnMode, SidequestCatalog, StationLibrary};
use switchyard_types::{InjectedNodeSpec, InterruptionFrame, RunEvent, RunState};

use crate::navigator::{DetourRequest, NavigatorOutput, ProposedEdge, RouteIntent};

/// Maximum nested detour depth. Prevents runaway sidequests.
pub const MAX_DETOUR_DEPTH: usize = 10;

/// Current depth of nested detours.
pub fn get_current_detour_depth(run_state: &RunState) -> usize {
    run_state.interruption_depth()
}

/// Rewrite a PAUSE intent into a DETOUR targeting the clarifier sidequest.
///
/// Used under autopilot (`no_human_mid_flow`): instead of blocking on a
/// human, the run detours into the clarifier to resolve the ambiguity
/// itself. Without a clarifier in the catalog, the PAUSE passes through
/// unchanged; non-PAUSE intents always pass through.
pub fn rewrite_pause_to_detour(
    mut nav_output: NavigatorOutput,
    catalog: &SidequestCatalog,
) -> NavigatorOutput {
    if nav_output.route.intent != RouteIntent::Pause {
        return nav_output;
    }
    let Some(clarifier) = catalog.get_sidequest("clarifier") else {
        return nav_output;
    };

    let objective = clarifier
        .objective_template
        .clone()
        .unwrap_or_else(|| "Clarify the open question blocking this step".to_string());

    nav_output.route.intent = RouteIntent::Detour;
    nav_output.detour_request = Some(DetourRequest {
        sidequest_id: clarifier.sidequest_id.clone(),
        objective,
        priority: clarifier.priority,
    });
    nav_output.signals.needs_human = false;
    nav_output.route.reasoning = format!(
        "{} (rewritten to detour: no_human_mid_flow)",
        nav_output.route.reasoning
    );
    nav_output
}

/// Apply a DETOUR request: register every sidequest step as an injected
/// node, push the interruption and resume stacks, and return the first
/// injected node id.
///
/// Returns `None`, without mutating state, when the sidequest is unknown
/// or the detour depth cap is reached.
pub fn apply_detour_request(
    nav_output: &NavigatorOutput,
    run_state: &mut RunState,
    catalog: &SidequestCatalog,
    current_node: &str,
) -> Option<String> {
    let request = nav_output.detour_request.as_ref()?;

    if get_current_detour_depth(run_state) >= MAX_DETOUR_DEPTH {
        log::warn!(
            "Detour '{}' rejected: depth cap {} reached for run {}",
            request.sidequest_id,
            MAX_DETOUR_DEPTH,
            run_state.run_id
        );
        return None;
    }

    let Some(sidequest) = catalog.get_sidequest(&request.sidequest_id) else {
        log::warn!("Detour rejected: unknown sidequest '{}'", request.sidequest_id);
        return None;
    };

    let steps = sidequest.effective_steps();
    if steps.is_empty() {
        log::warn!(
            "Detour rejected: sidequest '{}' has no executable steps",
            request.sidequest_id
        );
        return None;
    }
    let total_steps = steps.len();

    for (index, step) in steps.iter().enumerate() {
        run_state.register_injected_node(InjectedNodeSpec {
            node_id: format!("sq-{}-{}", sidequest.sidequest_id, index),
            station_id: step.template_id.clone(),
            template_id: Some(step.template_id.clone()),
            agent_key: None,
            role: format!("sidequest:{}", sidequest.sidequest_id),
            params: BTreeMap::new(),
            sidequest_origin: Some(sidequest.sidequest_id.clone()),
            sequence_index: index,
            total_in_sequence: total_steps,
        });
    }

    let mut saved_context = BTreeMap::new();
    saved_context.insert(
        "sidequest_id".to_string(),
        Value::String(sidequest.sidequest_id.clone()),
    );
    saved_context.insert(
        "detour_reason".to_string(),
        Value::String(nav_output.route.reasoning.clone()),
    );
    run_state.push_resume(current_node, saved_context);

    let mut context_snapshot = BTreeMap::new();
    context_snapshot.insert("objective".to_string(), Value::String(request.objective.clone()));
    run_state.push_interruption(InterruptionFrame {
        reason: format!("Sidequest: {}", sidequest.name),
        interrupted_at: Utc::now(),
        return_node: current_node.to_string(),
        context_snapshot,
        current_step_index: 0,
        total_steps,
        sidequest_id: Some(sidequest.sidequest_id.clone()),
    });

    Some(format!("sq-{}-0", sidequest.sidequest_id))
}

/// Apply an EXTEND_GRAPH request: validate the proposed target against the
/// station library, register a run-local injected node, and push the
/// interruption (and, for returning edges, resume) stacks.
///
/// Unknown stations are rejected with no state mutation; the Navigator
/// observes the rejection implicitly through the unchanged state.
pub fn apply_extend_graph_request(
    nav_output: &NavigatorOutput,
    run_state: &mut RunState,
    current_node: &str,
    station_library: &StationLibrary,
) -> Option<String> {
    let edge = nav_output.proposed_edge.as_ref()?;
    let target = edge.to_node.clone();

    if !station_library.has_station(&target) {
        log::warn!(
            "EXTEND_GRAPH rejected: station '{}' not in library (run {})",
            target,
            run_state.run_id
        );
        return None;
    }

    if get_current_detour_depth(run_state) >= MAX_DETOUR_DEPTH {
        log::warn!(
            "EXTEND_GRAPH to '{}' rejected: depth cap {} reached",
            target,
            MAX_DETOUR_DEPTH
        );
        return None;
    }

    let (template_id, objective) = match &edge.proposed_node {
        Some(node) => (node.template_id.clone(), node.objective.clone()),
        None => (target.clone(), String::new()),
    };

    run_state.register_injected_node(InjectedNodeSpec {
        node_id: target.clone(),
        station_id: target.clone(),
        template_id: Some(template_id),
        agent_key: None,
        role: "extend_graph".to_string(),
        params: BTreeMap::new(),
        sidequest_origin: None,
        sequence_index: 0,
        total_in_sequence: 1,
    });

    if edge.is_return {
        run_state.push_resume(current_node, BTreeMap::new());
    }

    let mut context_snapshot = BTreeMap::new();
    if !objective.is_empty() {
        context_snapshot.insert("objective".to_string(), Value::String(objective));
    }
    run_state.push_interruption(InterruptionFrame {
        reason: format!("EXTEND_GRAPH: {}", edge.why),
        interrupted_at: Utc::now(),
        return_node: current_node.to_string(),
        context_snapshot,
        current_step_index: 0,
        total_steps: 1,
        sidequest_id: None,
    });

    Some(target)
}

/// Build and emit the `graph_patch_suggested` event for a proposed edge.
///
/// The patch list carries the node patch (when a node was proposed) and
/// the edge patch; downstream analysis mines these to learn recurring map
/// gaps.
pub fn emit_graph_patch_suggested_event(
    run_id: &str,
    flow_key: &str,
    step_id: &str,
    proposed_edge: &ProposedEdge,
    append_event_fn: &dyn Fn(RunEvent),
) {
    let mut patch = Vec::new();
    if let Some(node) = &proposed_edge.proposed_node {
        patch.push(json!({
            "op": "add_node",
            "template_id": node.template_id,
            "station_id": node.station_id,
            "objective": node.objective,
        }));
    }
    patch.push(json!({
        "op": "add_edge",
        "from_node": proposed_edge.from_node,
        "to_node": proposed_edge.to_node,
        "edge_type": proposed_edge.edge_type,
        "priority": proposed_edge.priority,
    }));

    let event = RunEvent::new(run_id, "graph_patch_suggested", flow_key)
        .with_step(step_id)
        .payload_entry("patch", Value::Array(patch))
        .payload_entry("reason", Value::String(proposed_edge.why.clone()))
        .payload_entry("from_node", Value::String(proposed_edge.from_node.clone()))
        .payload_entry("to_node", Value::String(proposed_edge.to_node.clone()))
        .payload_entry("is_return", Value::Bool(proposed_edge.is_return))
        .payload_entry("injected_for_run", Value::Bool(true));

    append_event_fn(event);
}

/// Advance a multi-step sidequest or complete the detour.
///
/// With an interruption frame whose cursor has steps remaining, increments
/// the cursor and returns the next injected node id. Otherwise pops both
/// stacks and resolves the return node from the sidequest's return
/// behavior: resume (the saved node), bounce_to (a fixed target), or halt
/// (`None`). Returns `None` when no interruption is active.
pub fn check_and_handle_detour_completion(
    run_state: &mut RunState,
    catalog: &SidequestCatalog,
) -> Option<String> {
    if !run_state.is_interrupted() {
        return None;
    }

    // Multi-step progression: advance the cursor within the frame.
    {
        let frame = run_state.peek_interruption_mut()?;
        if frame.current_step_index + 1 < frame.total_steps {
            if let Some(sidequest_id) = frame.sidequest_id.clone() {
                frame.current_step_index += 1;
                let next_index = frame.current_step_index;
                return Some(format!("sq-{sidequest_id}-{next_index}"));
            }
        }
    }

    // Sidequest complete: pop both stacks and resolve the return target.
    let frame = run_state.pop_interruption()?;
    let resume_point = run_state.pop_resume();

    let sidequest = frame
        .sidequest_id
        .as_deref()
        .and_then(|id| catalog.get_sidequest(id));

    match sidequest.map(|s| &s.return_behavior) {
        Some(behavior) if behavior.mode == ReturnMode::BounceTo => behavior.target_node.clone(),
        Some(behavior) if behavior.mode == ReturnMode::Halt => None,
        _ => Some(
            resume_point
                .map(|p| p.node_id)
                .unwrap_or(frame.return_node),
        ),
    }
}
