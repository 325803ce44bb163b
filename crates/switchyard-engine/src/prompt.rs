//! Prompt assembly for step execution.
//!
//! Builds the worker prompt from the step context: role, teaching notes,
//! output-location instructions, the Navigator brief, and the
//! priority-selected history under the resolved character budgets.

use sha2::{Digest, Sha256};

use switchyard_context::{select_history, HistoryTruncationInfo, ResolvedBudgets};

use crate::context::StepContext;

/// A built prompt plus the truncation record for the receipt.
#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub text: String,
    pub truncation: Option<HistoryTruncationInfo>,
}

/// Stable hash of a prompt for reproducibility tracking.
pub fn prompt_hash(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

/// Assemble the prompt for a step.
pub fn build_prompt(ctx: &StepContext, budgets: &ResolvedBudgets) -> BuiltPrompt {
    let mut lines: Vec<String> = Vec::new();

    lines.push(format!("# {} (step {} of {})", ctx.flow_title, ctx.step_index + 1, ctx.total_steps));
    lines.push(String::new());
    lines.push(format!("## Step: {}", ctx.step_id));
    if !ctx.step_role.is_empty() {
        lines.push(ctx.step_role.clone());
    }
    lines.push(String::new());

    if let Some(tn) = &ctx.teaching_notes {
        if !tn.inputs.is_empty() {
            lines.push("## Inputs".into());
            lines.push("Read these upstream artifacts first:".into());
            for input in &tn.inputs {
                lines.push(format!("- {input}"));
            }
            lines.push(String::new());
        }
        if !tn.outputs.is_empty() {
            lines.push("## Expected Outputs".into());
            lines.push("Produce the following files/artifacts:".into());
            for output in &tn.outputs {
                lines.push(format!("- {output}"));
            }
            lines.push(String::new());
        }
        if !tn.emphasizes.is_empty() {
            lines.push("## Key Behaviors".into());
            lines.push("Focus on these patterns and behaviors:".into());
            for emphasis in &tn.emphasizes {
                lines.push(format!("- {emphasis}"));
            }
            lines.push(String::new());
        }
        if !tn.constraints.is_empty() {
            lines.push("## Constraints".into());
            lines.push("Observe these limitations:".into());
            for constraint in &tn.constraints {
                lines.push(format!("- {constraint}"));
            }
            lines.push(String::new());
        }
    }

    if let Some(brief) = ctx.context_pack.as_ref().and_then(|p| p.navigator_brief.as_ref()) {
        lines.push("## Navigator Brief".into());
        lines.push(format!("Objective: {}", brief.objective));
        for focus in &brief.focus_areas {
            lines.push(format!("- Focus: {focus}"));
        }
        for warning in &brief.warnings {
            lines.push(format!("- Warning: {warning}"));
        }
        lines.push(String::new());
    }

    lines.push("## Output Location".into());
    lines.push(format!("Write outputs to: {}/", ctx.run_base().display()));
    lines.push("Follow RUN_BASE conventions for all artifacts.".into());
    lines.push(String::new());

    let mut truncation = None;
    if !ctx.history.is_empty() {
        lines.push("## Previous Steps Context".into());
        lines.push("The following steps have already been completed:".into());
        lines.push(String::new());

        let selection = select_history(&ctx.history, budgets);
        lines.push(selection.render());
        truncation = Some(selection.info);
    }

    BuiltPrompt {
        text: lines.join("\n"),
        truncation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use switchyard_context::HistoryItem;
    use switchyard_types::RunSpec;

    fn ctx_with_history(history: Vec<HistoryItem>) -> StepContext {
        StepContext {
            repo_root: "/tmp/repo".into(),
            runs_dir: "/tmp/runs".into(),
            run_id: "run-x".into(),
            flow_key: "build".into(),
            step_id: "final_step".into(),
            step_index: 3,
            total_steps: 4,
            spec: RunSpec::new(vec!["build".into()]),
            flow_title: "Build".into(),
            step_role: "Test step".into(),
            step_agents: vec!["test-agent".into()],
            history,
            extra: BTreeMap::new(),
            teaching_notes: None,
            routing: None,
            context_pack: None,
        }
    }

    #[test]
    fn test_history_appears_in_chronological_order() {
        let history = vec![
            HistoryItem {
                step_id: "step_1".into(),
                agent_key: "risk-analyst".into(),
                status: "succeeded".into(),
                output: "Risk analysis".into(),
                ..HistoryItem::default()
            },
            HistoryItem {
                step_id: "step_2".into(),
                agent_key: "code-implementer".into(),
                status: "succeeded".into(),
                output: "Implementation".into(),
                ..HistoryItem::default()
            },
            HistoryItem {
                step_id: "step_3".into(),
                agent_key: "code-critic".into(),
                status: "succeeded".into(),
                output: "Critique".into(),
                ..HistoryItem::default()
            },
        ];
        let built = build_prompt(&ctx_with_history(history), &ResolvedBudgets::default());

        let pos_1 = built.text.find("step_1").unwrap();
        let pos_2 = built.text.find("step_2").unwrap();
        let pos_3 = built.text.find("step_3").unwrap();
        assert!(pos_1 < pos_2 && pos_2 < pos_3);
        assert!(!built.truncation.unwrap().truncated);
    }

    #[test]
    fn test_prompt_hash_is_stable() {
        assert_eq!(prompt_hash("same input"), prompt_hash("same input"));
        assert_ne!(prompt_hash("a"), prompt_hash("b"));
        assert_eq!(prompt_hash("x").len(), 16);
    }

    #[test]
    fn test_empty_history_omits_section() {
        let built = build_prompt(&ctx_with_history(vec![]), &ResolvedBudgets::default());
        assert!(!built.text.contains("Previous Steps Context"));
        assert!(built.truncation.is_none());
    }
}
