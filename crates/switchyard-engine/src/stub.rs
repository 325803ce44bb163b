//! Stub reference engine: the full lifecycle contract with no LLM calls.
//!
//! Used by CI, tests, and dry runs. Statuses can be scripted per step so
//! microloop and routing behavior is exercisable deterministically.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::json;

use switchyard_context::ContextBudgetResolver;
use switchyard_types::{HandoffEnvelope, RoutingSignal, RunEvent};

use crate::context::StepContext;
use crate::error::Result;
use crate::prompt::{build_prompt, prompt_hash};
use crate::receipt::{transcript_path, write_receipt, ReceiptFields};
use crate::result::{FinalizationResult, StepResult};
use crate::{LifecycleCapableEngine, StepEngine};

const ENGINE_ID: &str = "stub-step";

/// Lifecycle-capable engine that fabricates results without an LLM.
#[derive(Debug)]
pub struct StubStepEngine {
    budget_resolver: ContextBudgetResolver,
    default_status: String,
    /// Scripted status sequences per step id; consumed one per invocation.
    scripts: Mutex<HashMap<String, Vec<String>>>,
    invocations: Mutex<HashMap<String, usize>>,
}

impl StubStepEngine {
    pub fn new() -> Self {
        Self {
            budget_resolver: ContextBudgetResolver::default(),
            default_status: "VERIFIED".to_string(),
            scripts: Mutex::new(HashMap::new()),
            invocations: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_budget_resolver(mut self, resolver: ContextBudgetResolver) -> Self {
        self.budget_resolver = resolver;
        self
    }

    /// Override the status returned for every unscripted step.
    pub fn with_default_status(mut self, status: impl Into<String>) -> Self {
        self.default_status = status.into();
        self
    }

    /// Script a status sequence for a step. The Nth invocation of that
    /// step returns the Nth status; past the end, the last one repeats.
    pub fn with_status_script(self, step_id: impl Into<String>, statuses: Vec<&str>) -> Self {
        self.scripts.lock().expect("script table poisoned").insert(
            step_id.into(),
            statuses.into_iter().map(String::from).collect(),
        );
        self
    }

    /// Number of times a step has been executed.
    pub fn invocation_count(&self, step_id: &str) -> usize {
        self.invocations
            .lock()
            .expect("invocation table poisoned")
            .get(step_id)
            .copied()
            .unwrap_or(0)
    }

    fn next_status(&self, step_id: &str) -> String {
        let mut invocations = self.invocations.lock().expect("invocation table poisoned");
        let call_index = invocations.entry(step_id.to_string()).or_insert(0);
        let current = *call_index;
        *call_index += 1;

        let scripts = self.scripts.lock().expect("script table poisoned");
        match scripts.get(step_id) {
            Some(statuses) if !statuses.is_empty() => statuses
                .get(current)
                .or_else(|| statuses.last())
                .cloned()
                .unwrap_or_else(|| self.default_status.clone()),
            _ => self.default_status.clone(),
        }
    }
}

impl Default for StubStepEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StepEngine for StubStepEngine {
    fn engine_id(&self) -> &str {
        ENGINE_ID
    }

    fn run_step(&self, ctx: &StepContext) -> Result<(StepResult, Vec<RunEvent>)> {
        let (step_result, mut events, work_summary) = self.run_worker(ctx)?;
        let finalization = self.finalize_step(ctx, &step_result, &work_summary)?;
        events.extend(finalization.events);
        Ok((step_result, events))
    }

    fn as_lifecycle(&self) -> Option<&dyn LifecycleCapableEngine> {
        Some(self)
    }
}

impl LifecycleCapableEngine for StubStepEngine {
    fn run_worker(&self, ctx: &StepContext) -> Result<(StepResult, Vec<RunEvent>, String)> {
        let started_at = Utc::now();
        let agent_key = ctx.primary_agent().to_string();
        let run_base = ctx.run_base();

        let t_path = transcript_path(&run_base, &ctx.step_id, &agent_key, ENGINE_ID);
        if let Some(parent) = t_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let transcript = [
            json!({
                "timestamp": started_at,
                "role": "system",
                "content": format!("Executing step {} with agent {}", ctx.step_id, agent_key),
            }),
            json!({
                "timestamp": started_at,
                "role": "user",
                "content": format!("Step role: {}", ctx.step_role),
            }),
            json!({
                "timestamp": Utc::now(),
                "role": "assistant",
                "content": format!(
                    "[STUB] Completed step {}. In production this would contain the model response.",
                    ctx.step_id
                ),
            }),
        ];
        let mut file = fs::File::create(&t_path)?;
        for message in &transcript {
            writeln!(file, "{}", serde_json::to_string(message)?)?;
        }

        let status = self.next_status(&ctx.step_id);
        let mut step_result = StepResult {
            step_id: ctx.step_id.clone(),
            status,
            output: format!("[STUB:{ENGINE_ID}] Step {} completed successfully", ctx.step_id),
            error: None,
            duration_ms: 0,
            artifacts: Default::default(),
            next_step_id: None,
        };
        step_result
            .artifacts
            .insert("transcript_path".into(), t_path.display().to_string());

        let events = vec![RunEvent::new(&ctx.run_id, "log", &ctx.flow_key)
            .with_step(&ctx.step_id)
            .with_agent(&agent_key)
            .payload_entry(
                "message",
                json!(format!("{ENGINE_ID} executed step {}", ctx.step_id)),
            )
            .payload_entry("engine_id", json!(ENGINE_ID))
            .payload_entry("mode", json!("stub"))];

        let work_summary = format!(
            "Step {} ({}) executed in stub mode with status {}.",
            ctx.step_id, ctx.step_role, step_result.status
        );

        Ok((step_result, events, work_summary))
    }

    fn finalize_step(
        &self,
        ctx: &StepContext,
        step_result: &StepResult,
        work_summary: &str,
    ) -> Result<FinalizationResult> {
        let run_base = ctx.run_base();
        let agent_key = ctx.primary_agent().to_string();
        let budgets = self.budget_resolver.resolve(&ctx.flow_key, &ctx.step_id);
        let built = build_prompt(ctx, &budgets);

        let envelope_status = if step_result.is_failed() {
            "failed"
        } else {
            "succeeded"
        };

        let mut envelope = HandoffEnvelope::new(
            &ctx.step_id,
            &ctx.flow_key,
            &ctx.run_id,
            RoutingSignal::advance(None, "pending routing decision"),
            work_summary,
        );
        envelope.status = envelope_status.to_string();
        envelope.error = step_result.error.clone();
        envelope.duration_ms = step_result.duration_ms;
        envelope.prompt_hash = Some(prompt_hash(&built.text));
        envelope.verification_passed = !step_result.is_failed();
        envelope
            .verification_details
            .insert("status".into(), json!(step_result.status));
        for (name, path) in &step_result.artifacts {
            envelope.artifacts.insert(name.clone(), path.clone());
        }

        let now = Utc::now();
        let t_path = transcript_path(&run_base, &ctx.step_id, &agent_key, ENGINE_ID);
        write_receipt(
            &run_base,
            &ReceiptFields {
                engine: ENGINE_ID,
                mode: "stub",
                provider: "none",
                model: "stub",
                step_id: &ctx.step_id,
                flow_key: &ctx.flow_key,
                run_id: &ctx.run_id,
                agent_key: &agent_key,
                status: &step_result.status,
                started_at: now,
                completed_at: now,
                duration_ms: step_result.duration_ms,
                transcript_path: Some(&t_path),
                context_truncation: built.truncation.as_ref(),
                handoff: Some(json!({
                    "step_id": envelope.step_id,
                    "status": envelope.status,
                    "summary": envelope.summary,
                })),
                routing_signal: Some(json!({
                    "decision": envelope.routing_signal.decision.as_str(),
                    "reason": envelope.routing_signal.reason,
                })),
            },
        )?;

        Ok(FinalizationResult {
            envelope,
            events: Vec::new(),
        })
    }

    fn route_step(&self, _ctx: &StepContext, handoff: &HandoffEnvelope) -> Result<RoutingSignal> {
        // The stub has no routing intelligence; it hands the decision back
        // to the driver with the envelope's verdict attached.
        let mut signal = RoutingSignal::advance(None, "stub engine: defer to driver");
        signal.confidence = 0.5;
        signal.exit_condition_met = handoff.status == "failed";
        Ok(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use switchyard_types::RunSpec;
    use tempfile::TempDir;

    fn ctx(runs_dir: &std::path::Path, step_id: &str) -> StepContext {
        StepContext {
            repo_root: runs_dir.to_path_buf(),
            runs_dir: runs_dir.to_path_buf(),
            run_id: "run-20251208-143022-abc123".into(),
            flow_key: "signal".into(),
            step_id: step_id.into(),
            step_index: 0,
            total_steps: 4,
            spec: RunSpec::new(vec!["signal".into()]),
            flow_title: "Signal Shaping".into(),
            step_role: "Author requirements".into(),
            step_agents: vec!["req-author".into()],
            history: Vec::new(),
            extra: BTreeMap::new(),
            teaching_notes: None,
            routing: None,
            context_pack: None,
        }
    }

    #[test]
    fn test_stub_writes_transcript_and_receipt() {
        let dir = TempDir::new().unwrap();
        let engine = StubStepEngine::new();
        let ctx = ctx(dir.path(), "author_reqs");

        let (result, events) = engine.run_step(&ctx).unwrap();
        assert_eq!(result.status, "VERIFIED");
        assert!(!events.is_empty());

        let run_base = ctx.run_base();
        assert!(transcript_path(&run_base, "author_reqs", "req-author", ENGINE_ID).exists());
        assert!(crate::receipt::receipt_path(&run_base, "author_reqs", "req-author").exists());

        let receipt =
            crate::receipt::read_receipt(&run_base, "author_reqs", "req-author").unwrap();
        assert_eq!(receipt["engine"], ENGINE_ID);
        assert_eq!(receipt["mode"], "stub");
        assert_eq!(receipt["status"], "VERIFIED");
    }

    #[test]
    fn test_status_script_sequences() {
        let dir = TempDir::new().unwrap();
        let engine = StubStepEngine::new()
            .with_status_script("critique_reqs", vec!["UNVERIFIED", "UNVERIFIED", "VERIFIED"]);
        let ctx = ctx(dir.path(), "critique_reqs");

        let statuses: Vec<String> = (0..4)
            .map(|_| engine.run_worker(&ctx).unwrap().0.status)
            .collect();
        assert_eq!(statuses, vec!["UNVERIFIED", "UNVERIFIED", "VERIFIED", "VERIFIED"]);
        assert_eq!(engine.invocation_count("critique_reqs"), 4);
    }

    #[test]
    fn test_finalize_builds_envelope_with_prompt_hash() {
        let dir = TempDir::new().unwrap();
        let engine = StubStepEngine::new();
        let ctx = ctx(dir.path(), "author_reqs");

        let (result, _, summary) = engine.run_worker(&ctx).unwrap();
        let finalization = engine.finalize_step(&ctx, &result, &summary).unwrap();

        let envelope = finalization.envelope;
        assert_eq!(envelope.step_id, "author_reqs");
        assert_eq!(envelope.status, "succeeded");
        assert!(envelope.prompt_hash.is_some());
        assert!(envelope.verification_passed);
        assert_eq!(envelope.verification_details["status"], "VERIFIED");
    }
}
