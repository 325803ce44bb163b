//! Node resolution: node ids to executable contexts.
//!
//! Handles both regular flow steps and dynamically injected nodes
//! (sidequest steps, EXTEND_GRAPH injections). Injected nodes take
//! precedence over flow steps with the same id.

use switchyard_catalog::{FlowDefinition, StepRouting};
use switchyard_types::{InjectedNodeSpec, RunState};

/// Unified representation for any executable node.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedNode {
    pub node_id: String,
    pub step_id: String,
    pub role: String,
    pub agents: Vec<String>,
    /// Position in the flow, or `None` for injected nodes.
    pub index: Option<usize>,
    pub is_injected: bool,
    pub injected_spec: Option<InjectedNodeSpec>,
    pub routing: Option<StepRouting>,
}

/// Resolve a node id against the flow definition and injected specs.
pub fn resolve_node(
    node_id: &str,
    flow_def: &FlowDefinition,
    run_state: &RunState,
) -> Option<ResolvedNode> {
    if let Some(spec) = run_state.get_injected_node_spec(node_id) {
        return Some(ResolvedNode {
            node_id: node_id.to_string(),
            step_id: node_id.to_string(),
            role: spec.role.clone(),
            agents: vec![spec
                .agent_key
                .clone()
                .unwrap_or_else(|| spec.station_id.clone())],
            index: None,
            is_injected: true,
            injected_spec: Some(spec.clone()),
            routing: None,
        });
    }

    if let Some(step) = flow_def.step(node_id) {
        return Some(ResolvedNode {
            node_id: node_id.to_string(),
            step_id: step.id.clone(),
            role: if step.role.is_empty() {
                step.id.clone()
            } else {
                step.role.clone()
            },
            agents: step.agents.clone(),
            index: Some(step.index),
            is_injected: false,
            injected_spec: None,
            routing: Some(step.routing.clone()),
        });
    }

    log::warn!("Could not resolve node_id: {node_id}");
    None
}

/// Sequential next step in the flow, for fallback advancement.
pub fn sequential_next(current_node_id: &str, flow_def: &FlowDefinition) -> Option<String> {
    let idx = flow_def.step_index(current_node_id)?;
    flow_def.steps.get(idx + 1).map(|s| s.id.clone())
}
