//! Receipt and transcript artifact conventions.
//!
//! Receipts mirror the handoff envelope with engine-local execution
//! metadata; the microloop condition-field pattern reads its gate value
//! from them, so the read path stays tolerant of missing files.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use switchyard_context::HistoryTruncationInfo;

use crate::context::RoutingContext;
use crate::error::Result;

/// Transcript path: `RUN_BASE/llm/<step_id>-<agent>-<engine>.jsonl`.
pub fn transcript_path(run_base: &Path, step_id: &str, agent_key: &str, engine: &str) -> PathBuf {
    run_base
        .join("llm")
        .join(format!("{step_id}-{agent_key}-{engine}.jsonl"))
}

/// Receipt path: `RUN_BASE/receipts/<step_id>-<agent>.json`.
pub fn receipt_path(run_base: &Path, step_id: &str, agent_key: &str) -> PathBuf {
    run_base
        .join("receipts")
        .join(format!("{step_id}-{agent_key}.json"))
}

/// Engine-local fields serialized into a receipt.
#[derive(Debug, Clone)]
pub struct ReceiptFields<'a> {
    pub engine: &'a str,
    pub mode: &'a str,
    pub provider: &'a str,
    pub model: &'a str,
    pub step_id: &'a str,
    pub flow_key: &'a str,
    pub run_id: &'a str,
    pub agent_key: &'a str,
    pub status: &'a str,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
    pub transcript_path: Option<&'a Path>,
    pub context_truncation: Option<&'a HistoryTruncationInfo>,
    /// Envelope subset mirrored into the receipt.
    pub handoff: Option<Value>,
    /// Routing-signal subset mirrored into the receipt.
    pub routing_signal: Option<Value>,
}

/// Write a receipt JSON, creating the receipts directory as needed.
pub fn write_receipt(run_base: &Path, fields: &ReceiptFields<'_>) -> Result<PathBuf> {
    let path = receipt_path(run_base, fields.step_id, fields.agent_key);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut receipt = Map::new();
    receipt.insert("engine".into(), fields.engine.into());
    receipt.insert("mode".into(), fields.mode.into());
    receipt.insert("provider".into(), fields.provider.into());
    receipt.insert("model".into(), fields.model.into());
    receipt.insert("step_id".into(), fields.step_id.into());
    receipt.insert("flow_key".into(), fields.flow_key.into());
    receipt.insert("run_id".into(), fields.run_id.into());
    receipt.insert("agent_key".into(), fields.agent_key.into());
    receipt.insert("status".into(), fields.status.into());
    receipt.insert("started_at".into(), serde_json::to_value(fields.started_at)?);
    receipt.insert("completed_at".into(), serde_json::to_value(fields.completed_at)?);
    receipt.insert("duration_ms".into(), fields.duration_ms.into());
    receipt.insert(
        "tokens".into(),
        serde_json::json!({"prompt": 0, "completion": 0, "total": 0}),
    );
    if let Some(t_path) = fields.transcript_path {
        let relative = t_path.strip_prefix(run_base).unwrap_or(t_path);
        receipt.insert("transcript_path".into(), relative.display().to_string().into());
    }
    if let Some(truncation) = fields.context_truncation {
        receipt.insert("context_truncation".into(), serde_json::to_value(truncation)?);
    }
    if let Some(handoff) = &fields.handoff {
        receipt.insert("handoff".into(), handoff.clone());
    }
    if let Some(signal) = &fields.routing_signal {
        receipt.insert("routing_signal".into(), signal.clone());
    }

    fs::write(&path, serde_json::to_string_pretty(&Value::Object(receipt))?)?;
    log::debug!("Wrote receipt to {}", path.display());
    Ok(path)
}

/// Read an entire receipt as JSON, tolerantly.
pub fn read_receipt(run_base: &Path, step_id: &str, agent_key: &str) -> Option<Value> {
    let path = receipt_path(run_base, step_id, agent_key);
    if !path.exists() {
        log::debug!("Receipt not found: {}", path.display());
        return None;
    }
    let content = fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!("Failed to read receipt {}: {}", path.display(), err);
            None
        }
    }
}

/// Read a single top-level field from a receipt, stringified for
/// consistent handling by the microloop condition check.
pub fn read_receipt_field(
    run_base: &Path,
    step_id: &str,
    agent_key: &str,
    field_name: &str,
) -> Option<String> {
    let receipt = read_receipt(run_base, step_id, agent_key)?;
    match receipt.get(field_name)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Update a receipt with the final routing decision.
///
/// Adds a `routing` block with the loop iteration, cap, decision, and
/// reason. Returns false when the receipt is absent or unreadable.
pub fn update_receipt_routing(
    run_base: &Path,
    step_id: &str,
    agent_key: &str,
    routing_ctx: &RoutingContext,
) -> bool {
    let path = receipt_path(run_base, step_id, agent_key);
    let Some(Value::Object(mut receipt)) = read_receipt(run_base, step_id, agent_key) else {
        log::debug!("Receipt not found for routing update: {}", path.display());
        return false;
    };

    receipt.insert(
        "routing".into(),
        serde_json::json!({
            "loop_iteration": routing_ctx.loop_iteration,
            "max_iterations": routing_ctx.max_iterations,
            "decision": routing_ctx.decision,
            "reason": routing_ctx.reason,
        }),
    );

    match serde_json::to_string_pretty(&Value::Object(receipt)) {
        Ok(content) => match fs::write(&path, content) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Failed to update receipt routing: {}", err);
                false
            }
        },
        Err(err) => {
            log::warn!("Failed to serialize receipt routing update: {}", err);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn sample_fields() -> ReceiptFields<'static> {
        ReceiptFields {
            engine: "stub-step",
            mode: "stub",
            provider: "none",
            model: "stub",
            step_id: "critique_reqs",
            flow_key: "signal",
            run_id: "run-x",
            agent_key: "req-critic",
            status: "VERIFIED",
            started_at: Utc::now(),
            completed_at: Utc::now(),
            duration_ms: 42,
            transcript_path: None,
            context_truncation: None,
            handoff: None,
            routing_signal: None,
        }
    }

    #[test]
    fn test_write_then_read_field() {
        let dir = TempDir::new().unwrap();
        let run_base = dir.path();

        write_receipt(run_base, &sample_fields()).unwrap();

        assert_eq!(
            read_receipt_field(run_base, "critique_reqs", "req-critic", "status"),
            Some("VERIFIED".to_string())
        );
        assert_eq!(
            read_receipt_field(run_base, "critique_reqs", "req-critic", "duration_ms"),
            Some("42".to_string())
        );
        assert!(read_receipt_field(run_base, "critique_reqs", "req-critic", "absent").is_none());
        assert!(read_receipt_field(run_base, "other_step", "req-critic", "status").is_none());
    }

    #[test]
    fn test_update_receipt_routing() {
        let dir = TempDir::new().unwrap();
        let run_base = dir.path();
        write_receipt(run_base, &sample_fields()).unwrap();

        let updated = update_receipt_routing(
            run_base,
            "critique_reqs",
            "req-critic",
            &RoutingContext {
                loop_iteration: 2,
                max_iterations: Some(3),
                decision: "loop".into(),
                reason: "critic requested revision".into(),
            },
        );
        assert!(updated);

        let receipt = read_receipt(run_base, "critique_reqs", "req-critic").unwrap();
        assert_eq!(receipt["routing"]["decision"], "loop");
        assert_eq!(receipt["routing"]["loop_iteration"], 2);
    }

    #[test]
    fn test_update_missing_receipt_returns_false() {
        let dir = TempDir::new().unwrap();
        assert!(!update_receipt_routing(
            dir.path(),
            "ghost",
            "nobody",
            &RoutingContext::default(),
        ));
    }
}
