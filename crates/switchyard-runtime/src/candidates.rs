//! Candidate-set generation with forensic priority shaping.
//!
//! Routing candidates are the bounded menu presented to the Navigator:
//! edges out of the current node plus applicable sidequests. Before the
//! menu is handed over, the previous envelope's claims are compared with
//! file-change evidence, and priorities shift when claims and evidence
//! disagree.

use switchyard_catalog::{RoutingKind, SidequestDefinition, StepDefinition};
use switchyard_engine::StepResult;
use switchyard_types::{HandoffEnvelope, RoutingCandidate};

use crate::stall::ProgressEvidence;

/// What the forensic comparison recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForensicRecommendation {
    Advance,
    Loop,
    Escalate,
}

/// Verdict from comparing an envelope's claims against observed evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct ForensicVerdict {
    pub recommendation: ForensicRecommendation,
    pub confidence: f64,
    /// Discrepancy markers, e.g. "verified_claim_without_changes".
    pub flags: Vec<String>,
}

impl Default for ForensicVerdict {
    fn default() -> Self {
        Self {
            recommendation: ForensicRecommendation::Advance,
            confidence: 0.9,
            flags: Vec::new(),
        }
    }
}

/// Compare what the step claimed against what the diff scan observed.
///
/// The file-change evidence is authoritative: a VERIFIED claim from a step
/// that produced no observable changes is suspect, and advancing on it is
/// down-ranked.
pub fn compare_claim_vs_evidence(
    envelope: Option<&HandoffEnvelope>,
    evidence: Option<&ProgressEvidence>,
) -> ForensicVerdict {
    let mut verdict = ForensicVerdict::default();

    let Some(envelope) = envelope else {
        return verdict;
    };

    let claimed_verified = envelope.verification_passed
        || envelope
            .verification_details
            .get("status")
            .and_then(|v| v.as_str())
            .is_some_and(|s| s == "VERIFIED");

    if let Some(evidence) = evidence {
        if claimed_verified && !evidence.has_changes && envelope.status != "failed" {
            verdict
                .flags
                .push("verified_claim_without_changes".to_string());
            verdict.recommendation = ForensicRecommendation::Loop;
            verdict.confidence = 0.6;
        }
    }

    if envelope.status == "failed" {
        verdict.recommendation = ForensicRecommendation::Escalate;
        verdict.confidence = 0.7;
        verdict.flags.push("step_reported_failure".to_string());
    }

    verdict
}

/// Penalty applied to advance candidates when forensics recommend looping.
const ADVANCE_DOWNRANK: i32 = 30;

/// Enumerate routing candidates for the current node.
///
/// Edge candidates come from the step's routing config; detour candidates
/// from the applicable sidequests. Priorities are shaped by the critic
/// status and the forensic verdict, and the result is sorted priority
/// descending so the first candidate is the strongest default.
pub fn generate_routing_candidates(
    step: &StepDefinition,
    step_result: &StepResult,
    iteration: u32,
    sidequests: &[&SidequestDefinition],
    forensic: Option<&ForensicVerdict>,
) -> Vec<RoutingCandidate> {
    let mut candidates = Vec::new();
    let status_ok = step
        .routing
        .loop_success_values
        .iter()
        .any(|v| v == &step_result.status)
        || step_result.status == "succeeded";

    match step.routing.kind {
        RoutingKind::Linear => match &step.routing.next {
            Some(next) => candidates.push(RoutingCandidate {
                candidate_id: format!("advance_{next}"),
                action: "advance".into(),
                target_node: Some(next.clone()),
                reason: "single outgoing edge".into(),
                priority: 80,
                source: "edge".into(),
                is_default: true,
            }),
            None => candidates.push(RoutingCandidate {
                candidate_id: "terminate".into(),
                action: "terminate".into(),
                target_node: None,
                reason: "terminal step".into(),
                priority: 80,
                source: "edge".into(),
                is_default: true,
            }),
        },
        RoutingKind::Microloop => {
            if let Some(target) = &step.routing.loop_target {
                candidates.push(RoutingCandidate {
                    candidate_id: format!("loop_{target}"),
                    action: "loop".into(),
                    target_node: Some(target.clone()),
                    reason: format!("critic status {} requests revision", step_result.status),
                    priority: if status_ok { 30 } else { 85 },
                    source: "edge".into(),
                    is_default: !status_ok,
                });
            }
            match &step.routing.next {
                Some(next) => candidates.push(RoutingCandidate {
                    candidate_id: format!("advance_{next}"),
                    action: "advance".into(),
                    target_node: Some(next.clone()),
                    reason: "loop exit condition met".into(),
                    priority: if status_ok { 85 } else { 30 },
                    source: "edge".into(),
                    is_default: status_ok,
                }),
                None => candidates.push(RoutingCandidate {
                    candidate_id: "terminate".into(),
                    action: "terminate".into(),
                    target_node: None,
                    reason: "loop exit with no next step".into(),
                    priority: if status_ok { 85 } else { 30 },
                    source: "edge".into(),
                    is_default: status_ok,
                }),
            }
        }
        RoutingKind::Branch => {
            for (target, condition) in &step.routing.branches {
                candidates.push(RoutingCandidate {
                    candidate_id: format!("branch_{target}"),
                    action: "advance".into(),
                    target_node: Some(target.clone()),
                    reason: format!("branch edge: {condition}"),
                    priority: 60,
                    source: "edge".into(),
                    is_default: false,
                });
            }
        }
    }

    for sidequest in sidequests {
        candidates.push(RoutingCandidate {
            candidate_id: format!("detour_{}", sidequest.sidequest_id),
            action: "detour".into(),
            target_node: None,
            reason: sidequest.description.clone(),
            priority: sidequest.priority,
            source: "sidequest".into(),
            is_default: false,
        });
    }

    if let Some(verdict) = forensic {
        if verdict.recommendation == ForensicRecommendation::Loop {
            for candidate in candidates.iter_mut().filter(|c| c.action == "advance") {
                candidate.priority -= ADVANCE_DOWNRANK;
                candidate.reason = format!(
                    "{} (down-ranked: {})",
                    candidate.reason,
                    verdict.flags.join(", ")
                );
            }
        }
    }

    log::debug!(
        "Generated {} routing candidates for step {} (iteration {})",
        candidates.len(),
        step.id,
        iteration
    );

    candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_catalog::{SidequestCatalog, StepRouting, TriggerContext};
    use switchyard_types::RoutingSignal;

    fn step(routing: StepRouting) -> StepDefinition {
        StepDefinition {
            id: "critique_reqs".into(),
            index: 2,
            role: "Critique requirements".into(),
            agents: vec!["req-critic".into()],
            routing,
            teaching_notes: None,
        }
    }

    fn result(status: &str) -> StepResult {
        StepResult {
            step_id: "critique_reqs".into(),
            status: status.into(),
            ..StepResult::default()
        }
    }

    #[test]
    fn test_microloop_unverified_defaults_to_loop() {
        let step = step(StepRouting::microloop("author_reqs", Some("bdd_author"), 3));
        let candidates =
            generate_routing_candidates(&step, &result("UNVERIFIED"), 1, &[], None);

        let default = candidates.iter().find(|c| c.is_default).unwrap();
        assert_eq!(default.action, "loop");
        assert_eq!(default.target_node.as_deref(), Some("author_reqs"));
        assert_eq!(candidates[0].candidate_id, default.candidate_id);
    }

    #[test]
    fn test_microloop_verified_defaults_to_advance() {
        let step = step(StepRouting::microloop("author_reqs", Some("bdd_author"), 3));
        let candidates = generate_routing_candidates(&step, &result("VERIFIED"), 2, &[], None);

        let default = candidates.iter().find(|c| c.is_default).unwrap();
        assert_eq!(default.action, "advance");
        assert_eq!(default.target_node.as_deref(), Some("bdd_author"));
    }

    #[test]
    fn test_sidequests_become_detour_candidates() {
        let catalog = SidequestCatalog::builtin();
        let ctx = TriggerContext {
            verification_passed: false,
            ..TriggerContext::default()
        };
        let applicable = catalog.get_applicable_sidequests(&ctx, "run-x");

        let step = step(StepRouting::linear(Some("next_step")));
        let candidates =
            generate_routing_candidates(&step, &result("UNVERIFIED"), 1, &applicable, None);
        assert!(candidates.iter().any(|c| c.candidate_id == "detour_env-doctor"));
        assert!(candidates
            .iter()
            .filter(|c| c.action == "detour")
            .all(|c| c.source == "sidequest"));
    }

    #[test]
    fn test_forensic_verdict_downranks_advance() {
        let mut envelope = HandoffEnvelope::new(
            "critique_reqs",
            "signal",
            "run-x",
            RoutingSignal::default(),
            "claims verified",
        );
        envelope.verification_passed = true;

        let evidence = ProgressEvidence {
            has_changes: false,
            ..ProgressEvidence::default()
        };
        let verdict = compare_claim_vs_evidence(Some(&envelope), Some(&evidence));
        assert_eq!(verdict.recommendation, ForensicRecommendation::Loop);
        assert!(verdict.flags.contains(&"verified_claim_without_changes".to_string()));

        let step = step(StepRouting::linear(Some("next_step")));
        let candidates =
            generate_routing_candidates(&step, &result("VERIFIED"), 1, &[], Some(&verdict));
        let advance = candidates.iter().find(|c| c.action == "advance").unwrap();
        assert_eq!(advance.priority, 50);
        assert!(advance.reason.contains("down-ranked"));
    }

    #[test]
    fn test_forensic_accepts_claim_with_evidence() {
        let mut envelope = HandoffEnvelope::new(
            "s",
            "f",
            "run-x",
            RoutingSignal::default(),
            "verified with changes",
        );
        envelope.verification_passed = true;
        let evidence = ProgressEvidence {
            has_changes: true,
            file_count: 3,
            ..ProgressEvidence::default()
        };
        let verdict = compare_claim_vs_evidence(Some(&envelope), Some(&evidence));
        assert_eq!(verdict.recommendation, ForensicRecommendation::Advance);
        assert!(verdict.flags.is_empty());
    }

    #[test]
    fn test_terminal_step_offers_terminate() {
        let step = step(StepRouting::linear(None));
        let candidates = generate_routing_candidates(&step, &result("succeeded"), 0, &[], None);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].action, "terminate");
        assert!(candidates[0].is_default);
    }
}
