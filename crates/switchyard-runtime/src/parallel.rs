//! Parallel step execution for fork/join patterns.
//!
//! A forkable step fans out into N branches over scoped threads, then
//! joins the branch results under a configurable strategy. Statuses
//! aggregate over the lattice BLOCKED < PARTIAL < UNVERIFIED < VERIFIED.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use switchyard_engine::{StepContext, StepEngine};
use switchyard_types::RunEvent;

fn fork_id() -> String {
    format!("fork-{}", Uuid::new_v4().simple())
}

/// How to execute parallel branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPolicy {
    /// All branches at once.
    Concurrent,
    /// In batches of `batch_size`.
    Batch,
}

/// How to handle failures across branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Run all branches regardless of failures.
    ContinueAll,
    /// Stop scheduling new branches on the first failure.
    FailFast,
    /// Continue but mark the fork partial.
    BestEffort,
}

/// Context isolation between branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    Shared,
    Isolated,
}

/// How to aggregate parallel results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
    AllComplete,
    AllVerified,
    AnyVerified,
    FirstComplete,
    Quorum,
}

/// How the final status is derived from branch statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    Worst,
    Best,
    Majority,
}

/// Ordering of the verification status lattice.
fn status_rank(status: &str) -> u8 {
    match status {
        "BLOCKED" => 0,
        "PARTIAL" => 1,
        "UNVERIFIED" => 2,
        "VERIFIED" => 3,
        // Plain execution statuses map into the lattice conservatively.
        "failed" => 0,
        "succeeded" => 3,
        _ => 2,
    }
}

/// Configuration for the fork side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkConfig {
    /// Node ids to execute in parallel.
    pub targets: Vec<String>,
    #[serde(default = "default_execution_policy")]
    pub execution_policy: ExecutionPolicy,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_isolation")]
    pub isolation: IsolationMode,
    #[serde(default = "default_failure_policy")]
    pub failure_policy: FailurePolicy,
}

fn default_execution_policy() -> ExecutionPolicy {
    ExecutionPolicy::Concurrent
}

fn default_batch_size() -> usize {
    4
}

fn default_isolation() -> IsolationMode {
    IsolationMode::Isolated
}

fn default_failure_policy() -> FailurePolicy {
    FailurePolicy::ContinueAll
}

/// Configuration for the join side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinConfig {
    #[serde(default = "default_join_strategy")]
    pub strategy: JoinStrategy,
    #[serde(default)]
    pub quorum_count: Option<usize>,
    #[serde(default = "default_merge")]
    pub merge_artifacts: bool,
    #[serde(default = "default_aggregate")]
    pub aggregate_status: AggregateStatus,
}

fn default_join_strategy() -> JoinStrategy {
    JoinStrategy::AllComplete
}

fn default_merge() -> bool {
    true
}

fn default_aggregate() -> AggregateStatus {
    AggregateStatus::Worst
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            strategy: default_join_strategy(),
            quorum_count: None,
            merge_artifacts: true,
            aggregate_status: default_aggregate(),
        }
    }
}

/// Result from a single parallel branch.
#[derive(Debug, Clone)]
pub struct BranchResult {
    pub step_id: String,
    pub status: String,
    pub summary: String,
    pub artifacts: BTreeMap<String, String>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Aggregated result from a fork.
#[derive(Debug, Clone)]
pub struct ForkResult {
    pub fork_id: String,
    pub branch_results: Vec<BranchResult>,
    pub aggregate_status: String,
    pub total_duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub merged_artifacts: BTreeMap<String, String>,
    pub join_strategy_used: JoinStrategy,
    pub failed_branches: Vec<String>,
    pub skipped_branches: Vec<String>,
    /// Whether the join strategy's requirement was satisfied.
    pub join_satisfied: bool,
}

/// Executor for fork/join over scoped threads.
///
/// The engine contract is synchronous, so each branch occupies one thread
/// for the duration of its engine call.
pub struct ParallelExecutor<'e> {
    engine: &'e dyn StepEngine,
}

impl<'e> ParallelExecutor<'e> {
    pub fn new(engine: &'e dyn StepEngine) -> Self {
        Self { engine }
    }

    /// Execute the fork synchronously and join the results.
    ///
    /// `contexts` supplies one StepContext per target, in order.
    pub fn execute_fork(
        &self,
        fork_config: &ForkConfig,
        contexts: Vec<StepContext>,
        join_config: &JoinConfig,
    ) -> (ForkResult, Vec<RunEvent>) {
        let started_at = Utc::now();
        let fork_id = fork_id();
        let mut events = Vec::new();

        if let Some(ctx) = contexts.first() {
            events.push(
                RunEvent::new(&ctx.run_id, "fork_started", &ctx.flow_key)
                    .payload_entry("fork_id", json!(fork_id))
                    .payload_entry("targets", json!(fork_config.targets))
                    .payload_entry("execution_policy", json!(fork_config.execution_policy)),
            );
        }

        let batch_size = match fork_config.execution_policy {
            ExecutionPolicy::Concurrent => contexts.len().max(1),
            ExecutionPolicy::Batch => fork_config.batch_size.max(1),
        };

        let mut branch_results: Vec<BranchResult> = Vec::new();
        let mut skipped: Vec<String> = Vec::new();
        let mut fail_seen = false;

        for batch in contexts.chunks(batch_size) {
            if fail_seen && fork_config.failure_policy == FailurePolicy::FailFast {
                skipped.extend(batch.iter().map(|c| c.step_id.clone()));
                continue;
            }

            let batch_results: Vec<BranchResult> = std::thread::scope(|scope| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|ctx| scope.spawn(move || self.run_branch(ctx)))
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().expect("branch thread panicked"))
                    .collect()
            });

            fail_seen |= batch_results.iter().any(|r| r.error.is_some());
            branch_results.extend(batch_results);
        }

        let completed_at = Utc::now();
        let result = join_results(
            fork_id,
            branch_results,
            skipped,
            join_config,
            started_at,
            completed_at,
        );

        if let Some(ctx) = contexts.first() {
            events.push(
                RunEvent::new(&ctx.run_id, "fork_completed", &ctx.flow_key)
                    .payload_entry("fork_id", json!(result.fork_id))
                    .payload_entry("aggregate_status", json!(result.aggregate_status))
                    .payload_entry("join_satisfied", json!(result.join_satisfied))
                    .payload_entry(
                        "failed_branches",
                        json!(result.failed_branches),
                    ),
            );
        }

        (result, events)
    }

    fn run_branch(&self, ctx: &StepContext) -> BranchResult {
        let timer = std::time::Instant::now();
        match self.engine.run_step(ctx) {
            Ok((result, _events)) => BranchResult {
                step_id: ctx.step_id.clone(),
                status: result.status,
                summary: result.output,
                artifacts: result.artifacts,
                duration_ms: timer.elapsed().as_millis() as u64,
                error: result.error,
            },
            Err(err) => BranchResult {
                step_id: ctx.step_id.clone(),
                status: "BLOCKED".into(),
                summary: String::new(),
                artifacts: BTreeMap::new(),
                duration_ms: timer.elapsed().as_millis() as u64,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Join branch results under the configured strategy.
pub fn join_results(
    fork_id: String,
    branch_results: Vec<BranchResult>,
    skipped_branches: Vec<String>,
    join_config: &JoinConfig,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
) -> ForkResult {
    let verified_count = branch_results
        .iter()
        .filter(|r| r.status == "VERIFIED" || r.status == "succeeded")
        .count();
    let failed_branches: Vec<String> = branch_results
        .iter()
        .filter(|r| r.error.is_some() || r.status == "BLOCKED" || r.status == "failed")
        .map(|r| r.step_id.clone())
        .collect();

    let join_satisfied = match join_config.strategy {
        JoinStrategy::AllComplete => skipped_branches.is_empty(),
        JoinStrategy::AllVerified => verified_count == branch_results.len() && !branch_results.is_empty(),
        JoinStrategy::AnyVerified => verified_count > 0,
        JoinStrategy::FirstComplete => !branch_results.is_empty(),
        JoinStrategy::Quorum => {
            let needed = join_config
                .quorum_count
                .unwrap_or(branch_results.len() / 2 + 1);
            verified_count >= needed
        }
    };

    let aggregate_status = aggregate(&branch_results, join_config.aggregate_status);

    let mut merged_artifacts = BTreeMap::new();
    if join_config.merge_artifacts {
        for result in &branch_results {
            for (name, path) in &result.artifacts {
                merged_artifacts.insert(format!("{}/{}", result.step_id, name), path.clone());
            }
        }
    }

    let total_duration_ms = branch_results.iter().map(|r| r.duration_ms).max().unwrap_or(0);

    ForkResult {
        fork_id,
        branch_results,
        aggregate_status,
        total_duration_ms,
        started_at,
        completed_at,
        merged_artifacts,
        join_strategy_used: join_config.strategy,
        failed_branches,
        skipped_branches,
        join_satisfied,
    }
}

fn aggregate(results: &[BranchResult], mode: AggregateStatus) -> String {
    if results.is_empty() {
        return "BLOCKED".to_string();
    }
    match mode {
        AggregateStatus::Worst => results
            .iter()
            .min_by_key(|r| status_rank(&r.status))
            .map(|r| normalize_status(&r.status))
            .unwrap_or_else(|| "BLOCKED".into()),
        AggregateStatus::Best => results
            .iter()
            .max_by_key(|r| status_rank(&r.status))
            .map(|r| normalize_status(&r.status))
            .unwrap_or_else(|| "BLOCKED".into()),
        AggregateStatus::Majority => {
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for result in results {
                *counts.entry(normalize_status(&result.status)).or_insert(0) += 1;
            }
            counts
                .into_iter()
                .max_by_key(|(_, count)| *count)
                .map(|(status, _)| status)
                .unwrap_or_else(|| "BLOCKED".into())
        }
    }
}

fn normalize_status(status: &str) -> String {
    match status {
        "succeeded" => "VERIFIED".to_string(),
        "failed" => "BLOCKED".to_string(),
        other => other.to_string(),
    }
}
