use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default success values that exit a microloop.
pub fn default_loop_success_values() -> Vec<String> {
    vec!["VERIFIED".to_string()]
}

fn default_max_iterations() -> u32 {
    50
}

/// How a step routes once it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingKind {
    /// Single unconditional edge to `next` (or terminal when absent).
    Linear,
    /// Back-edge to `loop_target` gated by a critic's condition field.
    Microloop,
    /// Multiple conditional edges; the driver or Navigator picks one.
    Branch,
}

impl Default for RoutingKind {
    fn default() -> Self {
        RoutingKind::Linear
    }
}

/// Routing configuration attached to a step definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRouting {
    #[serde(default)]
    pub kind: RoutingKind,
    /// Next step for linear routing; `None` marks a terminal step.
    #[serde(default)]
    pub next: Option<String>,
    /// Step to loop back to for microloop routing.
    #[serde(default)]
    pub loop_target: Option<String>,
    /// Receipt/envelope field whose value gates the loop exit.
    #[serde(default)]
    pub loop_condition_field: Option<String>,
    #[serde(default = "default_loop_success_values")]
    pub loop_success_values: Vec<String>,
    /// Safety fuse only; stall detection is the steering mechanism.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Conditional edges for branch routing: target -> condition expression.
    #[serde(default)]
    pub branches: BTreeMap<String, String>,
}

impl Default for StepRouting {
    fn default() -> Self {
        Self {
            kind: RoutingKind::Linear,
            next: None,
            loop_target: None,
            loop_condition_field: None,
            loop_success_values: default_loop_success_values(),
            max_iterations: default_max_iterations(),
            branches: BTreeMap::new(),
        }
    }
}

impl StepRouting {
    pub fn linear(next: Option<&str>) -> Self {
        Self {
            next: next.map(String::from),
            ..Self::default()
        }
    }

    pub fn microloop(loop_target: &str, next: Option<&str>, max_iterations: u32) -> Self {
        Self {
            kind: RoutingKind::Microloop,
            next: next.map(String::from),
            loop_target: Some(loop_target.to_string()),
            loop_condition_field: Some("status".to_string()),
            max_iterations,
            ..Self::default()
        }
    }
}

/// Teaching metadata scoping a step's inputs and expectations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TeachingNotes {
    /// Upstream artifact specs ("RUN_BASE/plan/adr.md", absolute, or
    /// repo-relative paths).
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Files/artifacts the step is expected to produce.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Patterns and behaviors to focus on.
    #[serde(default)]
    pub emphasizes: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// One step of a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub routing: StepRouting,
    #[serde(default)]
    pub teaching_notes: Option<TeachingNotes>,
}

/// An ordered flow of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub key: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl FlowDefinition {
    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    /// Step ordering map (step_id -> position) for chronological sorting.
    pub fn step_order(&self) -> BTreeMap<String, usize> {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect()
    }
}

/// Read-only catalog of flows.
#[derive(Debug, Clone, Default)]
pub struct FlowRegistry {
    flows: BTreeMap<String, FlowDefinition>,
}

impl FlowRegistry {
    pub fn new(flows: Vec<FlowDefinition>) -> Self {
        Self {
            flows: flows.into_iter().map(|f| (f.key.clone(), f)).collect(),
        }
    }

    /// Load every `*.json` flow definition in a directory.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut flows = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            let flow: FlowDefinition = serde_json::from_str(&content)
                .map_err(|e| Error::Parse(format!("{}: {}", path.display(), e)))?;
            flows.push(flow);
        }
        Ok(Self::new(flows))
    }

    /// Built-in registry carrying the requirements-authoring flow used by
    /// stub runs and the test suites.
    pub fn builtin() -> Self {
        let signal = FlowDefinition {
            key: "signal".to_string(),
            title: "Signal Shaping".to_string(),
            steps: vec![
                StepDefinition {
                    id: "normalize_signal".into(),
                    index: 0,
                    role: "Normalize the incoming problem signal".into(),
                    agents: vec!["signal-normalizer".into()],
                    routing: StepRouting::linear(Some("author_reqs")),
                    teaching_notes: None,
                },
                StepDefinition {
                    id: "author_reqs".into(),
                    index: 1,
                    role: "Author requirements".into(),
                    agents: vec!["req-author".into()],
                    routing: StepRouting::linear(Some("critique_reqs")),
                    teaching_notes: Some(TeachingNotes {
                        outputs: vec!["requirements.md".into()],
                        ..TeachingNotes::default()
                    }),
                },
                StepDefinition {
                    id: "critique_reqs".into(),
                    index: 2,
                    role: "Critique requirements".into(),
                    agents: vec!["req-critic".into()],
                    routing: StepRouting::microloop("author_reqs", Some("bdd_author"), 3),
                    teaching_notes: None,
                },
                StepDefinition {
                    id: "bdd_author".into(),
                    index: 3,
                    role: "Author BDD scenarios".into(),
                    agents: vec!["bdd-author".into()],
                    routing: StepRouting::linear(None),
                    teaching_notes: Some(TeachingNotes {
                        inputs: vec!["RUN_BASE/requirements.md".into()],
                        outputs: vec!["bdd_scenarios.md".into()],
                        ..TeachingNotes::default()
                    }),
                },
            ],
        };
        Self::new(vec![signal])
    }

    pub fn get_flow(&self, flow_key: &str) -> Option<&FlowDefinition> {
        self.flows.get(flow_key)
    }

    pub fn require_flow(&self, flow_key: &str) -> Result<&FlowDefinition> {
        self.get_flow(flow_key)
            .ok_or_else(|| Error::UnknownFlow(flow_key.to_string()))
    }

    pub fn flow_keys(&self) -> Vec<&str> {
        self.flows.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_signal_flow_shape() {
        let registry = FlowRegistry::builtin();
        let flow = registry.get_flow("signal").unwrap();
        assert_eq!(flow.steps.len(), 4);
        assert_eq!(flow.steps[0].id, "normalize_signal");

        let critique = flow.step("critique_reqs").unwrap();
        assert_eq!(critique.routing.kind, RoutingKind::Microloop);
        assert_eq!(critique.routing.loop_target.as_deref(), Some("author_reqs"));
        assert_eq!(critique.routing.max_iterations, 3);
        assert_eq!(critique.routing.loop_success_values, vec!["VERIFIED"]);

        let terminal = flow.step("bdd_author").unwrap();
        assert!(terminal.routing.next.is_none());
    }

    #[test]
    fn test_unknown_flow_errors() {
        let registry = FlowRegistry::builtin();
        assert!(matches!(
            registry.require_flow("nope"),
            Err(Error::UnknownFlow(_))
        ));
    }

    #[test]
    fn test_from_dir_loads_json_flows() {
        let dir = tempfile::TempDir::new().unwrap();
        let flow = FlowDefinition {
            key: "demo".into(),
            title: "Demo".into(),
            steps: vec![StepDefinition {
                id: "only".into(),
                index: 0,
                role: "solo".into(),
                agents: vec![],
                routing: StepRouting::linear(None),
                teaching_notes: None,
            }],
        };
        std::fs::write(
            dir.path().join("demo.json"),
            serde_json::to_string_pretty(&flow).unwrap(),
        )
        .unwrap();

        let registry = FlowRegistry::from_dir(dir.path()).unwrap();
        assert_eq!(registry.get_flow("demo").unwrap().steps.len(), 1);
    }

    #[test]
    fn test_routing_defaults() {
        let routing: StepRouting = serde_json::from_str("{}").unwrap();
        assert_eq!(routing.kind, RoutingKind::Linear);
        assert_eq!(routing.max_iterations, 50);
        assert_eq!(routing.loop_success_values, vec!["VERIFIED"]);
    }
}
