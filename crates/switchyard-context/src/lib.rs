//! Context-pack and budget subsystem.
//!
//! Hydrates a step for execution: resolves upstream artifacts, loads prior
//! handoff envelopes and the Navigator brief, and selects history under
//! character budgets resolved through a step → flow → profile → global
//! cascade. Selection is priority-aware (CRITICAL outputs survive before
//! LOW ones) while the final output order stays chronological.

mod budget;
mod error;
mod models;
mod pack;
mod priority;

pub use budget::{
    clamp_budget_value, BudgetOverride, ContextBudgetConfig, ContextBudgetResolver,
    ResolvedBudgets, BUDGET_MAX_CHARS, BUDGET_MIN_CHARS, BUDGET_WARN_THRESHOLD,
};
pub use error::{Error, Result};
pub use models::{
    compute_model_budgets, get_model_spec, list_known_models, BudgetFractions, ModelBudgets,
    ModelSpec,
};
pub use pack::{
    build_context_pack, load_navigator_brief, load_previous_envelopes, resolve_upstream_artifacts,
    ContextPack, PackRequest,
};
pub use priority::{
    classify_history_item, select_history, HistoryItem, HistoryPriority, HistorySelection,
    HistoryTruncationInfo, RenderedHistoryEntry,
};
