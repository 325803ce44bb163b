use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What happens once a sidequest's last step completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnMode {
    /// Return to the node the run detoured from.
    Resume,
    /// Jump to a fixed target node instead.
    BounceTo,
    /// Stop the flow.
    Halt,
}

impl Default for ReturnMode {
    fn default() -> Self {
        ReturnMode::Resume
    }
}

/// Return behavior for a sidequest.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReturnBehavior {
    #[serde(default)]
    pub mode: ReturnMode,
    /// Required for `bounce_to`.
    #[serde(default)]
    pub target_node: Option<String>,
}

/// One step of a multi-step sidequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidequestStep {
    /// Station/template to execute for this step.
    pub template_id: String,
    #[serde(default)]
    pub step_id: Option<String>,
}

/// Conditions under which a sidequest is offered to the Navigator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SidequestTriggers {
    #[serde(default)]
    pub on_verification_failed: bool,
    #[serde(default)]
    pub on_stall: bool,
    #[serde(default)]
    pub on_clarification_needed: bool,
    /// Offered regardless of trigger context.
    #[serde(default)]
    pub always: bool,
}

/// Snapshot of step outcome used to evaluate sidequest triggers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TriggerContext {
    pub verification_passed: bool,
    pub stall_detected: bool,
    pub needs_clarification: bool,
    pub iteration: u32,
}

/// A named detour pattern: what to execute and how to come back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidequestDefinition {
    pub sidequest_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Station for single-step sidequests (and the fallback when `steps`
    /// is empty).
    #[serde(default)]
    pub station_id: Option<String>,
    /// Objective template with `{{...}}` placeholders.
    #[serde(default)]
    pub objective_template: Option<String>,
    /// Ordered steps for multi-step sidequests.
    #[serde(default)]
    pub steps: Vec<SidequestStep>,
    #[serde(default)]
    pub return_behavior: ReturnBehavior,
    #[serde(default)]
    pub triggers: SidequestTriggers,
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// "low", "medium", "high": rough cost signal for the Navigator.
    #[serde(default)]
    pub cost_hint: Option<String>,
}

fn default_priority() -> i32 {
    50
}

impl SidequestDefinition {
    pub fn single_step(sidequest_id: &str, name: &str, station_id: &str) -> Self {
        Self {
            sidequest_id: sidequest_id.to_string(),
            name: name.to_string(),
            description: String::new(),
            station_id: Some(station_id.to_string()),
            objective_template: None,
            steps: Vec::new(),
            return_behavior: ReturnBehavior::default(),
            triggers: SidequestTriggers::default(),
            priority: default_priority(),
            cost_hint: None,
        }
    }

    /// The executable step sequence. A sidequest with no explicit steps is
    /// a single-step sidequest running its station.
    pub fn effective_steps(&self) -> Vec<SidequestStep> {
        if !self.steps.is_empty() {
            return self.steps.clone();
        }
        match &self.station_id {
            Some(station_id) => vec![SidequestStep {
                template_id: station_id.clone(),
                step_id: None,
            }],
            None => Vec::new(),
        }
    }

    pub fn total_steps(&self) -> usize {
        self.effective_steps().len().max(1)
    }

    fn is_applicable(&self, ctx: &TriggerContext) -> bool {
        if self.triggers.always {
            return true;
        }
        (self.triggers.on_verification_failed && !ctx.verification_passed)
            || (self.triggers.on_stall && ctx.stall_detected)
            || (self.triggers.on_clarification_needed && ctx.needs_clarification)
    }
}

/// Catalog of sidequests: the bounded detour menu offered to the Navigator.
#[derive(Debug, Clone, Default)]
pub struct SidequestCatalog {
    sidequests: BTreeMap<String, SidequestDefinition>,
}

impl SidequestCatalog {
    pub fn new(sidequests: Vec<SidequestDefinition>) -> Self {
        Self {
            sidequests: sidequests
                .into_iter()
                .map(|s| (s.sidequest_id.clone(), s))
                .collect(),
        }
    }

    /// Load every `*.json` sidequest definition in a directory.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut sidequests = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            let sidequest: SidequestDefinition = serde_json::from_str(&content)
                .map_err(|e| Error::Parse(format!("{}: {}", path.display(), e)))?;
            sidequests.push(sidequest);
        }
        Ok(Self::new(sidequests))
    }

    /// Default catalog shipped with the runtime.
    pub fn builtin() -> Self {
        let mut clarifier =
            SidequestDefinition::single_step("clarifier", "Clarifier", "clarifier");
        clarifier.description = "Resolve ambiguity or missing requirements".into();
        clarifier.objective_template = Some("Clarify: {{issue}}".into());
        clarifier.priority = 70;
        clarifier.cost_hint = Some("low".into());
        clarifier.triggers.on_clarification_needed = true;

        let mut env_doctor =
            SidequestDefinition::single_step("env-doctor", "Environment Doctor", "fixer");
        env_doctor.description = "Diagnose and repair environment issues".into();
        env_doctor.triggers.on_verification_failed = true;

        let test_triage = SidequestDefinition {
            sidequest_id: "test-triage".into(),
            name: "Test Triage".into(),
            description: "Analyze repeated test failures and fix the cause".into(),
            station_id: Some("test-critic".into()),
            objective_template: Some("Triage: {{issue}}".into()),
            steps: vec![
                SidequestStep {
                    template_id: "test-critic".into(),
                    step_id: Some("step-1".into()),
                },
                SidequestStep {
                    template_id: "fixer".into(),
                    step_id: Some("step-2".into()),
                },
            ],
            return_behavior: ReturnBehavior::default(),
            triggers: SidequestTriggers {
                on_stall: true,
                on_verification_failed: true,
                ..SidequestTriggers::default()
            },
            priority: 60,
            cost_hint: Some("medium".into()),
        };

        let deep_analysis = SidequestDefinition {
            sidequest_id: "deep-analysis".into(),
            name: "Deep Analysis".into(),
            description: "Multi-step architecture analysis detour".into(),
            station_id: None,
            objective_template: None,
            steps: vec![
                SidequestStep {
                    template_id: "context-loader".into(),
                    step_id: Some("step-1".into()),
                },
                SidequestStep {
                    template_id: "architecture-critic".into(),
                    step_id: Some("step-2".into()),
                },
                SidequestStep {
                    template_id: "plan-writer".into(),
                    step_id: Some("step-3".into()),
                },
            ],
            return_behavior: ReturnBehavior::default(),
            triggers: SidequestTriggers {
                on_stall: true,
                ..SidequestTriggers::default()
            },
            priority: 40,
            cost_hint: Some("high".into()),
        };

        Self::new(vec![clarifier, env_doctor, test_triage, deep_analysis])
    }

    pub fn get_sidequest(&self, sidequest_id: &str) -> Option<&SidequestDefinition> {
        self.sidequests.get(sidequest_id)
    }

    pub fn has_sidequest(&self, sidequest_id: &str) -> bool {
        self.sidequests.contains_key(sidequest_id)
    }

    /// Sidequests whose triggers match the step outcome, highest priority
    /// first.
    pub fn get_applicable_sidequests(
        &self,
        ctx: &TriggerContext,
        run_id: &str,
    ) -> Vec<&SidequestDefinition> {
        let mut applicable: Vec<&SidequestDefinition> = self
            .sidequests
            .values()
            .filter(|s| s.is_applicable(ctx))
            .collect();
        applicable.sort_by(|a, b| b.priority.cmp(&a.priority));
        log::debug!(
            "{} applicable sidequest(s) for run '{}'",
            applicable.len(),
            run_id
        );
        applicable
    }

    pub fn sidequest_ids(&self) -> Vec<&str> {
        self.sidequests.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_steps_for_single_step_sidequest() {
        let sq = SidequestDefinition::single_step("clarifier", "Clarifier", "clarifier");
        let steps = sq.effective_steps();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].template_id, "clarifier");
        assert_eq!(sq.total_steps(), 1);
    }

    #[test]
    fn test_builtin_deep_analysis_is_multi_step() {
        let catalog = SidequestCatalog::builtin();
        let sq = catalog.get_sidequest("deep-analysis").unwrap();
        assert_eq!(sq.total_steps(), 3);
        assert_eq!(sq.effective_steps()[1].template_id, "architecture-critic");
    }

    #[test]
    fn test_trigger_evaluation() {
        let catalog = SidequestCatalog::builtin();
        let ctx = TriggerContext {
            verification_passed: false,
            stall_detected: false,
            needs_clarification: false,
            iteration: 1,
        };
        let applicable = catalog.get_applicable_sidequests(&ctx, "run-x");
        assert!(applicable.iter().any(|s| s.sidequest_id == "env-doctor"));
        assert!(applicable.iter().any(|s| s.sidequest_id == "test-triage"));
        assert!(!applicable.iter().any(|s| s.sidequest_id == "clarifier"));
    }

    #[test]
    fn test_applicable_ordering_by_priority() {
        let ctx = TriggerContext {
            verification_passed: false,
            stall_detected: true,
            needs_clarification: true,
            iteration: 2,
        };
        let catalog = SidequestCatalog::builtin();
        let applicable = catalog.get_applicable_sidequests(&ctx, "run-x");
        let priorities: Vec<i32> = applicable.iter().map(|s| s.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(priorities, sorted);
    }

    #[test]
    fn test_return_behavior_defaults_to_resume() {
        let behavior: ReturnBehavior = serde_json::from_str("{}").unwrap();
        assert_eq!(behavior.mode, ReturnMode::Resume);
        assert!(behavior.target_node.is_none());
    }
}
