//! Builders for common test artifacts.

use serde_json::json;

use switchyard_types::{HandoffEnvelope, RoutingSignal, RunEvent};

/// A succeeded envelope with the critic status recorded the way engines
/// record it.
pub fn envelope(run_id: &str, flow_key: &str, step_id: &str, status: &str) -> HandoffEnvelope {
    let mut envelope = HandoffEnvelope::new(
        step_id,
        flow_key,
        run_id,
        RoutingSignal::advance(None, "fixture"),
        format!("Step {step_id} completed."),
    );
    envelope
        .verification_details
        .insert("status".into(), json!(status));
    envelope.verification_passed = status == "VERIFIED";
    envelope
}

/// A `step_started` event for a step.
pub fn step_started(run_id: &str, flow_key: &str, step_id: &str) -> RunEvent {
    RunEvent::new(run_id, "step_started", flow_key).with_step(step_id)
}

/// A `step_completed` event carrying the step's status.
pub fn step_completed(run_id: &str, flow_key: &str, step_id: &str, status: &str) -> RunEvent {
    RunEvent::new(run_id, "step_completed", flow_key)
        .with_step(step_id)
        .payload_entry("status", json!(status))
}

/// A `run_started` event.
pub fn run_started(run_id: &str, flow_key: &str) -> RunEvent {
    RunEvent::new(run_id, "run_started", flow_key)
}

/// A `run_completed` event.
pub fn run_completed(run_id: &str, flow_key: &str) -> RunEvent {
    RunEvent::new(run_id, "run_completed", flow_key)
}
