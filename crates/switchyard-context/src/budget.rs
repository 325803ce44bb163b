use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::compute_model_budgets;

/// Sanity floor for any resolved budget value.
pub const BUDGET_MIN_CHARS: u64 = 10_000;
/// Sanity ceiling for any resolved budget value.
pub const BUDGET_MAX_CHARS: u64 = 600_000;
/// Values above this are treated as misconfiguration, not intent.
pub const BUDGET_WARN_THRESHOLD: u64 = 5_000_000;

/// Global defaults for a 200k-token model.
const DEFAULT_TOTAL: u64 = 200_000;
const DEFAULT_RECENT: u64 = 60_000;
const DEFAULT_OLDER: u64 = 20_000;

/// Clamp a budget value into the sanity bounds, logging when adjusted.
pub fn clamp_budget_value(value: u64, label: &str) -> u64 {
    if value > BUDGET_WARN_THRESHOLD {
        log::warn!(
            "Budget value for {label} is suspiciously large ({value} chars); clamping to {BUDGET_MAX_CHARS}"
        );
        return BUDGET_MAX_CHARS;
    }
    if value > BUDGET_MAX_CHARS {
        log::warn!("Budget value for {label} ({value}) exceeds maximum; clamping to {BUDGET_MAX_CHARS}");
        return BUDGET_MAX_CHARS;
    }
    if value < BUDGET_MIN_CHARS {
        log::warn!("Budget value for {label} ({value}) is below minimum; clamping to {BUDGET_MIN_CHARS}");
        return BUDGET_MIN_CHARS;
    }
    value
}

/// Partial budget override: any subset of the three values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BudgetOverride {
    #[serde(default)]
    pub context_budget_chars: Option<u64>,
    #[serde(default)]
    pub history_max_recent_chars: Option<u64>,
    #[serde(default)]
    pub history_max_older_chars: Option<u64>,
}

/// Budget configuration with per-flow and per-step overrides.
///
/// Step override keys are `"<flow>/<step>"`. The optional `profile_model`
/// names a model whose window drives the profile tier of the cascade.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContextBudgetConfig {
    #[serde(default)]
    pub global: BudgetOverride,
    #[serde(default)]
    pub profile_model: Option<String>,
    #[serde(default)]
    pub flows: BTreeMap<String, BudgetOverride>,
    #[serde(default)]
    pub steps: BTreeMap<String, BudgetOverride>,
}

impl ContextBudgetConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

/// Effective budgets for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBudgets {
    /// Total history budget in characters.
    pub context_budget_chars: u64,
    /// Per-item cap for the most recent step (and CRITICAL items).
    pub history_max_recent_chars: u64,
    /// Per-item cap for older steps.
    pub history_max_older_chars: u64,
}

impl Default for ResolvedBudgets {
    fn default() -> Self {
        Self {
            context_budget_chars: DEFAULT_TOTAL,
            history_max_recent_chars: DEFAULT_RECENT,
            history_max_older_chars: DEFAULT_OLDER,
        }
    }
}

/// Resolves effective budgets through the step → flow → profile → global
/// cascade, then clamps into sanity bounds and enforces the relational
/// constraints (`recent ≤ total`, `older ≤ total`).
#[derive(Debug, Clone, Default)]
pub struct ContextBudgetResolver {
    config: ContextBudgetConfig,
}

impl ContextBudgetResolver {
    pub fn new(config: ContextBudgetConfig) -> Self {
        Self { config }
    }

    pub fn resolve(&self, flow_key: &str, step_id: &str) -> ResolvedBudgets {
        let step_key = format!("{flow_key}/{step_id}");
        let step = self.config.steps.get(&step_key).copied().unwrap_or_default();
        let flow = self.config.flows.get(flow_key).copied().unwrap_or_default();
        let global = self.config.global;

        let profile = self
            .config
            .profile_model
            .as_deref()
            .map(|model| compute_model_budgets(model, None));

        let total = step
            .context_budget_chars
            .or(flow.context_budget_chars)
            .or(profile.map(|p| p.context_budget_chars))
            .or(global.context_budget_chars)
            .unwrap_or(DEFAULT_TOTAL);
        let recent = step
            .history_max_recent_chars
            .or(flow.history_max_recent_chars)
            .or(profile.map(|p| p.history_max_recent_chars))
            .or(global.history_max_recent_chars)
            .unwrap_or(DEFAULT_RECENT);
        let older = step
            .history_max_older_chars
            .or(flow.history_max_older_chars)
            .or(profile.map(|p| p.history_max_older_chars))
            .or(global.history_max_older_chars)
            .unwrap_or(DEFAULT_OLDER);

        let total = clamp_budget_value(total, "context_budget_chars");
        let mut recent = clamp_budget_value(recent, "history_max_recent_chars");
        let mut older = clamp_budget_value(older, "history_max_older_chars");

        // Relational constraints hold after clamping.
        recent = recent.min(total);
        older = older.min(total);

        ResolvedBudgets {
            context_budget_chars: total,
            history_max_recent_chars: recent,
            history_max_older_chars: older,
        }
    }
}
