//! Model context-window registry for fraction-based budget computation.

use std::collections::BTreeMap;

/// Specification for a model's context window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub model_id: &'static str,
    pub context_tokens: u64,
    pub description: &'static str,
}

impl ModelSpec {
    /// Approximate character count (4 chars per token).
    pub fn context_chars(&self) -> u64 {
        self.context_tokens * 4
    }
}

/// Fraction-based budget configuration relative to the context window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetFractions {
    /// Share of the window for the whole history section.
    pub history_total: f64,
    /// Share for the most recent step.
    pub history_recent: f64,
    /// Share per older step.
    pub history_older: f64,
}

impl Default for BudgetFractions {
    fn default() -> Self {
        Self {
            history_total: 0.25,
            history_recent: 0.075,
            history_older: 0.025,
        }
    }
}

const BUILTIN_MODELS: &[ModelSpec] = &[
    ModelSpec {
        model_id: "claude-sonnet-4-5-20250929",
        context_tokens: 200_000,
        description: "Claude Sonnet 4.5",
    },
    ModelSpec {
        model_id: "claude-haiku-4-5-20251001",
        context_tokens: 200_000,
        description: "Claude Haiku 4.5",
    },
    ModelSpec {
        model_id: "claude-opus-4-5-20251101",
        context_tokens: 200_000,
        description: "Claude Opus 4.5",
    },
    ModelSpec {
        model_id: "gemini-3-pro-preview",
        context_tokens: 1_048_576,
        description: "Gemini 3 Pro",
    },
    ModelSpec {
        model_id: "gemini-3-flash-preview",
        context_tokens: 1_048_576,
        description: "Gemini 3 Flash",
    },
];

/// Get a model spec by id.
pub fn get_model_spec(model_id: &str) -> Option<&'static ModelSpec> {
    BUILTIN_MODELS.iter().find(|m| m.model_id == model_id)
}

/// All known model specs, keyed by id.
pub fn list_known_models() -> BTreeMap<&'static str, &'static ModelSpec> {
    BUILTIN_MODELS.iter().map(|m| (m.model_id, m)).collect()
}

/// Budget values computed for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelBudgets {
    pub context_budget_chars: u64,
    pub history_max_recent_chars: u64,
    pub history_max_older_chars: u64,
}

/// Compute budget values for a model id using window fractions.
///
/// Unknown models fall back to the hardcoded defaults for a 200k-token
/// window.
pub fn compute_model_budgets(model_id: &str, fractions: Option<BudgetFractions>) -> ModelBudgets {
    let Some(model) = get_model_spec(model_id) else {
        return ModelBudgets {
            context_budget_chars: 200_000,
            history_max_recent_chars: 60_000,
            history_max_older_chars: 10_000,
        };
    };

    let f = fractions.unwrap_or_default();
    let context_chars = model.context_chars() as f64;
    ModelBudgets {
        context_budget_chars: (context_chars * f.history_total) as u64,
        history_max_recent_chars: (context_chars * f.history_recent) as u64,
        history_max_older_chars: (context_chars * f.history_older) as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_models_available() {
        let models = list_known_models();
        assert!(models.contains_key("claude-sonnet-4-5-20250929"));
        assert!(models.contains_key("gemini-3-flash-preview"));

        let claude = get_model_spec("claude-sonnet-4-5-20250929").unwrap();
        assert_eq!(claude.context_tokens, 200_000);
        assert_eq!(claude.context_chars(), claude.context_tokens * 4);
    }

    #[test]
    fn test_budget_computation_for_200k_model() {
        let budgets = compute_model_budgets("claude-sonnet-4-5-20250929", None);
        assert_eq!(budgets.context_budget_chars, 200_000);
        assert_eq!(budgets.history_max_recent_chars, 60_000);
        assert_eq!(budgets.history_max_older_chars, 20_000);
    }

    #[test]
    fn test_budget_computation_for_1m_model() {
        let budgets = compute_model_budgets("gemini-3-flash-preview", None);
        assert_eq!(budgets.context_budget_chars, 1_048_576);
    }

    #[test]
    fn test_unknown_model_falls_back_to_defaults() {
        let budgets = compute_model_budgets("unknown-model-xyz", None);
        assert_eq!(budgets.context_budget_chars, 200_000);
        assert_eq!(budgets.history_max_recent_chars, 60_000);
        assert_eq!(budgets.history_max_older_chars, 10_000);
    }
}
