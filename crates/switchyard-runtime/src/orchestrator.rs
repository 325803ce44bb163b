//! The stepwise orchestrator: owns the outer step loop.
//!
//! Per step: resolve the node (injected nodes win), hydrate the context
//! pack, invoke the engine (three-phase when lifecycle-capable), persist
//! the envelope and events through the atomic commit protocol, route via
//! the unified driver, and advance the cursor, possibly into a sidequest,
//! back through a microloop, or out of the flow entirely.
//!
//! Stops are cooperative and take effect at step boundaries only. A crash
//! mid-step never advances the cursor; resume re-runs the interrupted step
//! cleanly.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use switchyard_catalog::{FlowDefinition, FlowRegistry, SidequestCatalog};
use switchyard_context::{build_context_pack, HistoryItem, PackRequest};
use switchyard_engine::{RoutingContext, StepContext, StepEngine};
use switchyard_store::{RunStatePatch, Store};
use switchyard_types::{
    generate_run_id, HandoffEnvelope, RoutingDecision, RoutingMode, RoutingSignal, RunEvent,
    RunId, RunSpec, RunState, RunStatus, RunSummary, SdlcStatus,
};

use crate::driver::{route_step, RouteRequest, RoutingOutcome, RoutingSource};
use crate::error::{Error, Result};
use crate::integration::check_and_handle_detour_completion;
use crate::navigator::NavigationOrchestrator;
use crate::resolver::{resolve_node, ResolvedNode};
use crate::runner::{
    attach_file_changes, run_step_with_engine, step_execution_events, ChangeScanner,
    FsSnapshotScanner, StepRunResult,
};
use crate::stall::{progress_signature, ProgressTracker};
use crate::stop::StopRegistry;

/// Orchestrates stepwise execution of flows against a durable store.
pub struct StepwiseOrchestrator {
    engine: Box<dyn StepEngine>,
    store: Arc<Store>,
    registry: FlowRegistry,
    navigation: Option<NavigationOrchestrator>,
    sidequest_catalog: SidequestCatalog,
    routing_mode: RoutingMode,
    stops: Arc<StopRegistry>,
    repo_root: PathBuf,
}

impl StepwiseOrchestrator {
    pub fn new(engine: Box<dyn StepEngine>, store: Arc<Store>, registry: FlowRegistry) -> Self {
        Self {
            engine,
            store,
            registry,
            navigation: None,
            sidequest_catalog: SidequestCatalog::builtin(),
            routing_mode: RoutingMode::Assist,
            stops: Arc::new(StopRegistry::new()),
            repo_root: PathBuf::from("."),
        }
    }

    pub fn with_navigation(mut self, navigation: NavigationOrchestrator) -> Self {
        self.sidequest_catalog = navigation.sidequest_catalog.clone();
        self.navigation = Some(navigation);
        self
    }

    pub fn with_routing_mode(mut self, mode: RoutingMode) -> Self {
        self.routing_mode = mode;
        self
    }

    pub fn with_sidequest_catalog(mut self, catalog: SidequestCatalog) -> Self {
        self.sidequest_catalog = catalog;
        self
    }

    pub fn with_repo_root(mut self, repo_root: impl Into<PathBuf>) -> Self {
        self.repo_root = repo_root.into();
        self
    }

    /// Share a stop registry with external stop surfaces.
    pub fn with_stop_registry(mut self, stops: Arc<StopRegistry>) -> Self {
        self.stops = stops;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Shared stop registry, for wiring external stop surfaces.
    pub fn stop_registry(&self) -> Arc<StopRegistry> {
        Arc::clone(&self.stops)
    }

    pub fn request_stop(&self, run_id: &str) -> bool {
        self.stops.request_stop(run_id)
    }

    pub fn clear_stop_request(&self, run_id: &str) {
        self.stops.clear_stop_request(run_id);
    }

    pub fn is_stop_requested(&self, run_id: &str) -> bool {
        self.stops.is_stop_requested(run_id)
    }

    /// Execute every flow in the spec under one run id.
    ///
    /// A stop or pause between flows leaves the run `partial`: cleanly
    /// interrupted, distinct from failed.
    pub fn run(&self, spec: &RunSpec) -> Result<RunId> {
        let run_id = generate_run_id();
        self.initialize_run(&run_id, spec)?;

        let total_flows = spec.flow_keys.len();
        for (index, flow_key) in spec.flow_keys.iter().enumerate() {
            let status = self.execute_flow(&run_id, flow_key, spec, (index + 1) as u32, false)?;
            match status {
                RunStatus::Succeeded => continue,
                RunStatus::Stopped | RunStatus::Paused => {
                    let flows_remain = index + 1 < total_flows;
                    if flows_remain {
                        self.update_summary_status(&run_id, RunStatus::Partial, SdlcStatus::Partial)?;
                    }
                    self.stops.release(&run_id);
                    return Ok(run_id);
                }
                other => {
                    log::warn!("Flow '{flow_key}' ended with status {}", other.as_str());
                    self.stops.release(&run_id);
                    return Ok(run_id);
                }
            }
        }

        self.store.finalize_run_success(&run_id, SdlcStatus::Ok)?;
        self.stops.release(&run_id);
        Ok(run_id)
    }

    /// Execute a single flow step by step, creating or resuming the run.
    ///
    /// Returns the run id; terminal status is visible in the summary and
    /// the run state.
    pub fn run_stepwise_flow(
        &self,
        flow_key: &str,
        spec: &RunSpec,
        resume: bool,
        run_id: Option<RunId>,
    ) -> Result<RunId> {
        let run_id = run_id.unwrap_or_else(generate_run_id);

        if !resume {
            self.initialize_run(&run_id, spec)?;
        }

        let status = self.execute_flow(&run_id, flow_key, spec, 1, resume)?;
        if status == RunStatus::Succeeded {
            self.store.finalize_run_success(&run_id, SdlcStatus::Ok)?;
        }
        self.stops.release(&run_id);
        Ok(run_id)
    }

    fn initialize_run(&self, run_id: &str, spec: &RunSpec) -> Result<()> {
        self.store.create_run_dir(run_id)?;
        self.store.write_spec(run_id, spec)?;
        self.store
            .write_summary(run_id, &RunSummary::new(run_id.to_string(), spec.clone()))?;
        Ok(())
    }

    fn update_summary_status(
        &self,
        run_id: &str,
        status: RunStatus,
        sdlc: SdlcStatus,
    ) -> Result<()> {
        let mut patch = Map::new();
        patch.insert("status".into(), Value::String(status.as_str().into()));
        patch.insert("sdlc_status".into(), Value::String(sdlc.as_str().into()));
        patch.insert(
            "updated_at".into(),
            serde_json::to_value(chrono::Utc::now()).expect("timestamp serializes"),
        );
        self.store.update_summary(run_id, &patch)?;
        Ok(())
    }

    fn execute_flow(
        &self,
        run_id: &str,
        flow_key: &str,
        spec: &RunSpec,
        flow_index: u32,
        resume: bool,
    ) -> Result<RunStatus> {
        let flow_def = self
            .registry
            .get_flow(flow_key)
            .ok_or_else(|| Error::UnknownFlow(flow_key.to_string()))?;

        let mut state = if resume {
            let state = self
                .store
                .read_run_state(run_id)
                .ok_or_else(|| Error::NoSavedState(run_id.to_string()))?;
            self.stops.clear_stop_request(run_id);
            self.store.append_event(
                run_id,
                RunEvent::new(run_id, "run_resumed", flow_key)
                    .payload_entry("current_step_id", json!(state.current_step_id))
                    .payload_entry("step_index", json!(state.step_index)),
            );
            state
        } else {
            let prior = self.store.read_run_state(run_id);
            let mut state = RunState::new(run_id.to_string(), flow_key.to_string());
            state.current_flow_index = flow_index;
            state.current_step_id = flow_def.steps.first().map(|s| s.id.clone());

            // Multi-flow runs carry the transition history across flows.
            if let Some(prior) = prior {
                state.flow_transition_history = prior.flow_transition_history;
                if !prior.flow_key.is_empty() && prior.flow_key != flow_key {
                    let mut record = BTreeMap::new();
                    record.insert("from_flow".to_string(), json!(prior.flow_key));
                    record.insert("to_flow".to_string(), json!(flow_key));
                    record.insert("at".to_string(), json!(chrono::Utc::now()));
                    state.flow_transition_history.push(record);
                    self.store.append_event(
                        run_id,
                        RunEvent::new(run_id, "macro_route", flow_key)
                            .payload_entry("from_flow", json!(prior.flow_key))
                            .payload_entry("to_flow", json!(flow_key))
                            .payload_entry("reason", json!("flow sequence advance")),
                    );
                }
            }

            self.store.write_run_state(run_id, &state)?;
            self.store.append_event(
                run_id,
                RunEvent::new(run_id, "run_started", flow_key)
                    .payload_entry("spec", serde_json::to_value(spec).unwrap_or(Value::Null)),
            );
            state
        };

        if flow_def.steps.is_empty() {
            return Ok(RunStatus::Succeeded);
        }

        state.status = RunStatus::Running;
        self.update_summary_status(run_id, RunStatus::Running, SdlcStatus::Unknown)?;
        {
            let mut patch = Map::new();
            patch.insert(
                "started_at".into(),
                serde_json::to_value(chrono::Utc::now()).expect("timestamp serializes"),
            );
            // Ignore the patch when started_at was already set by a prior
            // flow; last-writer-wins is fine for resume.
            let _ = self.store.update_summary(run_id, &patch);
        }

        let mut tracker = ProgressTracker::new();
        let step_order = flow_def.step_order();

        let final_status = loop {
            let Some(node_id) = state.current_step_id.clone() else {
                break RunStatus::Succeeded;
            };

            // Stops apply at step boundaries, never mid-step.
            if self.stops.is_stop_requested(run_id) {
                self.store.append_event(
                    run_id,
                    RunEvent::new(run_id, "run_stopped", flow_key)
                        .with_step(&node_id)
                        .payload_entry("step_index", json!(state.step_index)),
                );
                state.status = RunStatus::Stopped;
                self.store.write_run_state(run_id, &state)?;
                self.update_summary_status(run_id, RunStatus::Stopped, SdlcStatus::Partial)?;
                break RunStatus::Stopped;
            }

            let Some(node) = resolve_node(&node_id, flow_def, &state) else {
                log::error!("Next step {node_id} not found in flow {flow_key}; failing run");
                self.store.append_event(
                    run_id,
                    RunEvent::new(run_id, "run_failed", flow_key)
                        .with_step(&node_id)
                        .payload_entry("error", json!(format!("unresolvable node: {node_id}"))),
                );
                state.status = RunStatus::Failed;
                self.store.write_run_state(run_id, &state)?;
                self.update_summary_status(run_id, RunStatus::Failed, SdlcStatus::Error)?;
                break RunStatus::Failed;
            };

            let status = self.execute_step(
                run_id, flow_key, flow_def, spec, &mut state, &node, &step_order, &mut tracker,
            )?;

            if let Some(terminal) = status {
                break terminal;
            }
        };

        if final_status == RunStatus::Succeeded {
            let mut patch = RunStatePatch::new();
            patch.insert("current_step_id".into(), Value::Null);
            patch.insert("status".into(), Value::String("succeeded".into()));
            self.store.update_run_state(run_id, &patch)?;
        }

        Ok(final_status)
    }

    /// Execute one resolved node. Returns `Some(status)` when the flow
    /// reached a terminal condition, `None` to continue looping.
    #[allow(clippy::too_many_arguments)]
    fn execute_step(
        &self,
        run_id: &str,
        flow_key: &str,
        flow_def: &FlowDefinition,
        spec: &RunSpec,
        state: &mut RunState,
        node: &ResolvedNode,
        step_order: &BTreeMap<String, usize>,
        tracker: &mut ProgressTracker,
    ) -> Result<Option<RunStatus>> {
        let node_id = node.node_id.clone();
        let run_base = self.store.paths(run_id).flow_base(flow_key);

        let iteration_key = node
            .routing
            .as_ref()
            .and_then(|r| r.loop_target.clone())
            .unwrap_or_else(|| node_id.clone());
        let iteration = state.loop_state.get(&iteration_key).copied().unwrap_or(0);

        // Hydrate: history from committed envelopes plus the context pack.
        let history = build_history(state, flow_def, step_order, &node_id);
        let teaching_notes = flow_def.step(&node_id).and_then(|s| s.teaching_notes.clone());
        let pack = build_context_pack(&PackRequest {
            run_id,
            flow_key,
            step_id: &node_id,
            run_base: &run_base,
            repo_root: Some(&self.repo_root),
            teaching_notes: teaching_notes.as_ref(),
            run_state: Some(state),
            step_order,
        });

        let ctx = StepContext {
            repo_root: self.repo_root.clone(),
            runs_dir: self.store.runs_dir().to_path_buf(),
            run_id: run_id.to_string(),
            flow_key: flow_key.to_string(),
            step_id: node_id.clone(),
            step_index: node.index.unwrap_or(state.step_index),
            total_steps: flow_def.steps.len(),
            spec: spec.clone(),
            flow_title: flow_def.title.clone(),
            step_role: node.role.clone(),
            step_agents: node.agents.clone(),
            history,
            extra: BTreeMap::new(),
            teaching_notes,
            routing: Some(RoutingContext {
                loop_iteration: iteration,
                max_iterations: node.routing.as_ref().map(|r| r.max_iterations),
                decision: "pending".into(),
                reason: String::new(),
            }),
            context_pack: Some(pack),
        };

        self.store.append_event(
            run_id,
            RunEvent::new(run_id, "step_started", flow_key)
                .with_step(&node_id)
                .payload_entry("iteration", json!(iteration))
                .payload_entry("is_injected", json!(node.is_injected)),
        );

        // Invoke the engine; failures become failed StepResults, not
        // panics; routing decides what happens next.
        let mut scanner: Box<dyn ChangeScanner> = Box::new(FsSnapshotScanner::new());
        let run = run_step_with_engine(&ctx, self.engine.as_ref(), scanner.as_mut());

        for event in &run.events {
            self.store.append_event(run_id, event.clone());
        }
        for event in step_execution_events(
            run_id,
            flow_key,
            &node_id,
            state.step_index,
            iteration,
            &run,
        ) {
            self.store.append_event(run_id, event);
        }
        self.store.append_event(
            run_id,
            RunEvent::new(run_id, "step_completed", flow_key)
                .with_step(&node_id)
                .payload_entry("status", json!(run.step_result.status))
                .payload_entry("duration_ms", json!(run.duration_ms)),
        );

        // Stall accounting feeds both the driver and the journal.
        let evidence = run.progress_evidence.clone().unwrap_or_default();
        let signature = progress_signature(&evidence, run.step_result.error.as_deref());
        let stall = tracker.record(&node_id, signature);
        if stall.stalled {
            self.store.append_event(
                run_id,
                RunEvent::new(run_id, "loop_stall_detected", flow_key)
                    .with_step(&node_id)
                    .payload_entry("consecutive_loops", json!(stall.consecutive))
                    .payload_entry("progress_signature", json!(stall.signature)),
            );
        }

        // The envelope: from finalization, or synthesized for single-phase
        // engines and hard failures.
        let mut envelope = run.envelope.clone().unwrap_or_else(|| {
            synthesize_envelope(run_id, flow_key, &node_id, &run)
        });
        if let Some(evidence) = &run.progress_evidence {
            attach_file_changes(&mut envelope, evidence);
        }

        let previous_envelope = state.handoff_envelopes.get(&node_id).cloned();

        // Route. Injected nodes advance through the detour machinery; flow
        // nodes go through the full driver.
        let detour_depth_before = state.interruption_depth();
        let outcome = if node.is_injected {
            let next = check_and_handle_detour_completion(state, &self.sidequest_catalog);
            if state.interruption_depth() < detour_depth_before {
                if let Some(origin) = node
                    .injected_spec
                    .as_ref()
                    .and_then(|s| s.sidequest_origin.clone())
                {
                    self.store.append_event(
                        run_id,
                        RunEvent::new(run_id, "sidequest_complete", flow_key)
                            .with_step(&node_id)
                            .payload_entry("sidequest_id", json!(origin)),
                    );
                }
            }
            let mut outcome = RoutingOutcome {
                decision: RoutingDecision::Advance,
                next_step_id: next,
                reason: "sidequest progression".into(),
                confidence: 1.0,
                needs_human: false,
                routing_source: RoutingSource::FastPath,
                chosen_candidate_id: None,
                candidate_set_path: None,
                candidates: Vec::new(),
                loop_iteration: iteration,
                exit_condition_met: false,
                signal: None,
            };
            if outcome.next_step_id.is_none() {
                outcome.reason = "sidequest halted or flow complete".into();
            }
            outcome
        } else {
            let step_def = flow_def
                .step(&node_id)
                .expect("non-injected node resolved from flow definition");
            let store = Arc::clone(&self.store);
            let run_id_owned = run_id.to_string();
            let emit = move |event: RunEvent| store.append_event(&run_id_owned, event);
            let mut request = RouteRequest {
                step: step_def,
                step_result: &run.step_result,
                run_state: state,
                iteration,
                routing_mode: self.routing_mode,
                run_id,
                flow_key,
                flow_def: Some(flow_def),
                spec: Some(spec),
                run_base: Some(&run_base),
                navigation: self.navigation.as_ref(),
                previous_envelope: previous_envelope.as_ref(),
                progress: run.progress_evidence.as_ref(),
                stall: Some(&stall),
                envelope_signal: run.routing_signal.as_ref(),
                emit_event: Some(&emit),
            };
            route_step(&mut request)
        };

        // Fold the final routing decision into the envelope's signal.
        envelope.routing_signal = outcome_signal(&outcome, run.routing_signal.as_ref());
        envelope.routing_audit = envelope.routing_signal.audit_blob();

        // Microloop bookkeeping: a loop decision increments the counter
        // for the loop target.
        if outcome.decision == RoutingDecision::Loop {
            if let Some(target) = &outcome.next_step_id {
                *state.loop_state.entry(target.clone()).or_insert(0) += 1;
            }
        }

        state.mark_node_completed(&node_id);
        state.step_index += 1;

        let next_step = outcome.next_step_id.clone();
        let pausing = outcome.needs_human;
        if pausing {
            // Keep the cursor on this step so a resumed run re-routes it.
            state.current_step_id = Some(node_id.clone());
            state.status = RunStatus::Paused;
        } else {
            state.current_step_id = next_step.clone();
        }

        // Atomic commit: envelope first, then the state that references
        // it. The patch carries every field this step mutated.
        let patch = state_patch(state)?;
        *state = self
            .store
            .commit_step_completion(run_id, flow_key, &envelope, &patch)?;

        self.store.append_event(
            run_id,
            RunEvent::new(run_id, "step_routed", flow_key)
                .with_step(&node_id)
                .payload_entry("next_step_id", json!(next_step))
                .payload_entry("reason", json!(outcome.reason))
                .payload_entry("routing_source", json!(outcome.routing_source.as_str()))
                .payload_entry("chosen_candidate_id", json!(outcome.chosen_candidate_id)),
        );

        if pausing {
            self.update_summary_status(run_id, RunStatus::Paused, SdlcStatus::Unknown)?;
            return Ok(Some(RunStatus::Paused));
        }
        if next_step.is_none() {
            return Ok(Some(RunStatus::Succeeded));
        }
        Ok(None)
    }
}

fn build_history(
    state: &RunState,
    flow_def: &FlowDefinition,
    step_order: &BTreeMap<String, usize>,
    current_step_id: &str,
) -> Vec<HistoryItem> {
    let mut items: Vec<(&String, &HandoffEnvelope)> = state
        .handoff_envelopes
        .iter()
        .filter(|(step_id, _)| step_id.as_str() != current_step_id)
        .collect();
    items.sort_by_key(|(step_id, _)| step_order.get(*step_id).copied().unwrap_or(usize::MAX));

    items
        .into_iter()
        .map(|(step_id, envelope)| {
            let step = flow_def.step(step_id);
            HistoryItem {
                step_id: step_id.clone(),
                agent_key: step
                    .and_then(|s| s.agents.first().cloned())
                    .unwrap_or_default(),
                role: step.map(|s| s.role.clone()).unwrap_or_default(),
                status: envelope
                    .verification_details
                    .get("status")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&envelope.status)
                    .to_string(),
                output: envelope.summary.clone(),
                error: envelope.error.clone(),
            }
        })
        .collect()
}

fn synthesize_envelope(
    run_id: &str,
    flow_key: &str,
    step_id: &str,
    run: &StepRunResult,
) -> HandoffEnvelope {
    let mut envelope = HandoffEnvelope::new(
        step_id,
        flow_key,
        run_id,
        RoutingSignal::advance(None, "pending routing decision"),
        run.step_result.output.clone(),
    );
    envelope.status = if run.step_result.is_failed() {
        "failed".into()
    } else {
        "succeeded".into()
    };
    envelope.error = run.step_result.error.clone();
    envelope.duration_ms = run.duration_ms;
    envelope.verification_passed = !run.step_result.is_failed();
    envelope
        .verification_details
        .insert("status".into(), json!(run.step_result.status));
    envelope
}

fn outcome_signal(outcome: &RoutingOutcome, engine_signal: Option<&RoutingSignal>) -> RoutingSignal {
    if let Some(signal) = &outcome.signal {
        return signal.clone();
    }
    let mut signal = engine_signal.cloned().unwrap_or_default();
    signal.decision = outcome.decision;
    signal.next_step_id = outcome.next_step_id.clone();
    signal.reason = outcome.reason.clone();
    signal.confidence = outcome.confidence;
    signal.needs_human = outcome.needs_human;
    signal.loop_count = outcome.loop_iteration;
    signal.exit_condition_met = outcome.exit_condition_met;
    signal.chosen_candidate_id = outcome.chosen_candidate_id.clone();
    signal
}

fn state_patch(state: &RunState) -> Result<RunStatePatch> {
    let value = serde_json::to_value(state).map_err(switchyard_store::Error::from)?;
    let Value::Object(map) = value else {
        return Ok(RunStatePatch::new());
    };
    let mut patch = RunStatePatch::new();
    for key in [
        "current_step_id",
        "step_index",
        "status",
        "loop_state",
        "current_flow_index",
        "flow_transition_history",
        "interruption_stack",
        "resume_stack",
        "injected_nodes",
        "injected_node_specs",
        "completed_nodes",
    ] {
        if let Some(value) = map.get(key) {
            patch.insert(key.to_string(), value.clone());
        }
    }
    Ok(patch)
}
