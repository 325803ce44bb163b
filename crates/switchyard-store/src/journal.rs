//! Navigator-event queries over the run journal, consumed by process
//! analysis ("Wisdom") tooling.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use switchyard_types::RunEvent;

/// Event kinds relevant for navigation learning:
/// EXTEND_GRAPH proposals, detours, and stall detections.
pub const NAVIGATOR_EVENT_KINDS: &[&str] = &[
    "graph_patch_suggested",
    "detour_taken",
    "navigation_decision",
    "sidequest_start",
    "sidequest_complete",
    "loop_stall_detected",
];

/// A map gap: somewhere the Navigator wanted an edge the flow lacked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapGap {
    pub flow_key: String,
    pub step_id: Option<String>,
    pub from_node: Option<Value>,
    pub to_node: Option<Value>,
    pub reason: Option<Value>,
    pub patch: Option<Value>,
}

/// Sidequest invocation frequency bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetourFrequency {
    pub sidequest_id: String,
    pub invocation_count: u32,
}

/// A recorded microloop stall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StallRecord {
    pub flow_key: String,
    pub step_id: Option<String>,
    pub consecutive_loops: Option<Value>,
    pub progress_signature: Option<Value>,
}

/// Aggregate of navigator events for one run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NavigatorEventSummary {
    pub map_gaps: Vec<MapGap>,
    pub detours: Vec<DetourFrequency>,
    pub stalls: Vec<StallRecord>,
}

/// Filter a journal to navigator-relevant events.
pub fn filter_navigator_events(events: &[RunEvent], kinds: Option<&[&str]>) -> Vec<RunEvent> {
    let filter: &[&str] = kinds.unwrap_or(NAVIGATOR_EVENT_KINDS);
    events
        .iter()
        .filter(|e| filter.contains(&e.kind.as_str()))
        .cloned()
        .collect()
}

/// Build the aggregate summary from a run's events.
pub fn summarize_navigator_events(events: &[RunEvent]) -> NavigatorEventSummary {
    let mut summary = NavigatorEventSummary::default();
    let mut sidequest_counts: Vec<(String, u32)> = Vec::new();

    for event in filter_navigator_events(events, None) {
        match event.kind.as_str() {
            "graph_patch_suggested" => {
                summary.map_gaps.push(MapGap {
                    flow_key: event.flow_key.clone(),
                    step_id: event.step_id.clone(),
                    from_node: event.payload.get("from_node").cloned(),
                    to_node: event.payload.get("to_node").cloned(),
                    reason: event.payload.get("reason").cloned(),
                    patch: event.payload.get("patch").cloned(),
                });
            }
            "detour_taken" | "sidequest_start" => {
                let sidequest_id = event
                    .payload
                    .get("sidequest_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                match sidequest_counts.iter_mut().find(|(id, _)| *id == sidequest_id) {
                    Some((_, count)) => *count += 1,
                    None => sidequest_counts.push((sidequest_id, 1)),
                }
            }
            "loop_stall_detected" => {
                summary.stalls.push(StallRecord {
                    flow_key: event.flow_key.clone(),
                    step_id: event.step_id.clone(),
                    consecutive_loops: event.payload.get("consecutive_loops").cloned(),
                    progress_signature: event.payload.get("progress_signature").cloned(),
                });
            }
            _ => {}
        }
    }

    summary.detours = sidequest_counts
        .into_iter()
        .map(|(sidequest_id, invocation_count)| DetourFrequency {
            sidequest_id,
            invocation_count,
        })
        .collect();

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: &str, payload: &[(&str, Value)]) -> RunEvent {
        let mut e = RunEvent::new("run-1", kind, "build").with_step("implement");
        for (k, v) in payload {
            e.payload.insert((*k).to_string(), v.clone());
        }
        e
    }

    #[test]
    fn test_summary_counts_detour_frequency() {
        let events = vec![
            event("detour_taken", &[("sidequest_id", json!("clarifier"))]),
            event("sidequest_start", &[("sidequest_id", json!("clarifier"))]),
            event("detour_taken", &[("sidequest_id", json!("test-triage"))]),
            event("step_completed", &[]),
        ];

        let summary = summarize_navigator_events(&events);
        assert_eq!(summary.detours.len(), 2);
        let clarifier = summary
            .detours
            .iter()
            .find(|d| d.sidequest_id == "clarifier")
            .unwrap();
        assert_eq!(clarifier.invocation_count, 2);
    }

    #[test]
    fn test_summary_collects_map_gaps_and_stalls() {
        let events = vec![
            event(
                "graph_patch_suggested",
                &[
                    ("from_node", json!("implement")),
                    ("to_node", json!("security-scanner")),
                    ("reason", json!("security paths touched")),
                ],
            ),
            event(
                "loop_stall_detected",
                &[
                    ("consecutive_loops", json!(3)),
                    ("progress_signature", json!("ab12")),
                ],
            ),
        ];

        let summary = summarize_navigator_events(&events);
        assert_eq!(summary.map_gaps.len(), 1);
        assert_eq!(summary.map_gaps[0].to_node, Some(json!("security-scanner")));
        assert_eq!(summary.stalls.len(), 1);
        assert_eq!(summary.stalls[0].consecutive_loops, Some(json!(3)));
    }

    #[test]
    fn test_filter_respects_custom_kinds() {
        let events = vec![
            event("detour_taken", &[]),
            event("loop_stall_detected", &[]),
        ];
        let filtered = filter_navigator_events(&events, Some(&["loop_stall_detected"]));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].kind, "loop_stall_detected");
    }
}
