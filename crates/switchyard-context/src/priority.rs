//! Priority-aware history selection under character budgets.
//!
//! Prior step outputs are classified by agent/role, selected highest
//! priority first while the running character total stays within budget,
//! and emitted in chronological order regardless of the selection order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::budget::ResolvedBudgets;

/// Relative value of a prior step's output when context is tight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HistoryPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl HistoryPriority {
    pub fn label(&self) -> &'static str {
        match self {
            HistoryPriority::Low => "LOW",
            HistoryPriority::Medium => "MEDIUM",
            HistoryPriority::High => "HIGH",
            HistoryPriority::Critical => "CRITICAL",
        }
    }
}

/// Classify a prior step by its agent key and role.
///
/// Implementation, verification, and merge-decision outputs are CRITICAL;
/// critique and test outputs are HIGH; documentation and reporting are LOW;
/// everything else is MEDIUM.
pub fn classify_history_item(agent_key: &str, role: &str) -> HistoryPriority {
    let haystack = format!("{} {}", agent_key.to_lowercase(), role.to_lowercase());

    const CRITICAL_MARKERS: &[&str] = &["implement", "verif", "merge"];
    const HIGH_MARKERS: &[&str] = &["critic", "critique", "test"];
    const LOW_MARKERS: &[&str] = &["doc", "report"];

    if CRITICAL_MARKERS.iter().any(|m| haystack.contains(m)) {
        return HistoryPriority::Critical;
    }
    if HIGH_MARKERS.iter().any(|m| haystack.contains(m)) {
        return HistoryPriority::High;
    }
    if LOW_MARKERS.iter().any(|m| haystack.contains(m)) {
        return HistoryPriority::Low;
    }
    HistoryPriority::Medium
}

/// A prior step's outcome, as carried in the orchestrator's history list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HistoryItem {
    pub step_id: String,
    #[serde(default)]
    pub agent_key: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// One selected history entry, rendered for prompt inclusion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedHistoryEntry {
    /// Position in the original chronological history.
    pub original_index: usize,
    pub priority: HistoryPriority,
    pub text: String,
}

/// Metadata about history truncation during selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTruncationInfo {
    pub steps_included: usize,
    pub steps_total: usize,
    pub chars_used: u64,
    pub budget_chars: u64,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default = "default_true")]
    pub priority_aware: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_distribution: Option<BTreeMap<String, usize>>,
}

fn default_true() -> bool {
    true
}

impl HistoryTruncationInfo {
    /// Machine-readable truncation note, empty when nothing was omitted.
    pub fn truncation_note(&self) -> String {
        if !self.truncated {
            return String::new();
        }
        let omitted = self.steps_total - self.steps_included;
        let mut note = format!(
            "[CONTEXT_TRUNCATED] Included {} of {} history steps ({} omitted, budget: {}/{} chars)",
            self.steps_included,
            self.steps_total,
            omitted,
            format_thousands(self.chars_used),
            format_thousands(self.budget_chars),
        );
        if self.priority_aware {
            if let Some(dist) = &self.priority_distribution {
                note.push_str(&format!(
                    " [Priority: CRITICAL={}, HIGH={}, MEDIUM={}, LOW={}]",
                    dist.get("CRITICAL").copied().unwrap_or(0),
                    dist.get("HIGH").copied().unwrap_or(0),
                    dist.get("MEDIUM").copied().unwrap_or(0),
                    dist.get("LOW").copied().unwrap_or(0),
                ));
            }
        }
        note
    }
}

/// Result of history selection: entries in chronological order plus the
/// truncation record engines embed into their receipts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySelection {
    pub entries: Vec<RenderedHistoryEntry>,
    pub info: HistoryTruncationInfo,
}

impl HistorySelection {
    /// Joined history text with the truncation header prepended when steps
    /// were dropped.
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        if self.info.truncated {
            lines.push(format!("{}\n", self.info.truncation_note()));
        }
        for entry in &self.entries {
            lines.push(entry.text.clone());
        }
        lines.join("\n")
    }
}

/// Select history items under the resolved budgets.
///
/// Items are visited in priority-descending order (chronological index
/// breaks ties), each item's output truncated to the recent cap for the
/// most-recent step and CRITICAL items or the older cap otherwise, and
/// included only while the running total stays within the overall budget.
/// The returned entries are re-sorted chronologically.
pub fn select_history(items: &[HistoryItem], budgets: &ResolvedBudgets) -> HistorySelection {
    let total_steps = items.len();
    let most_recent_idx = total_steps.checked_sub(1);

    // Priority-descending visit order; stable on chronological index.
    let mut order: Vec<(HistoryPriority, usize)> = items
        .iter()
        .enumerate()
        .map(|(idx, item)| (classify_history_item(&item.agent_key, &item.role), idx))
        .collect();
    order.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut included: Vec<RenderedHistoryEntry> = Vec::new();
    let mut priority_counts: BTreeMap<String, usize> = BTreeMap::from([
        ("CRITICAL".to_string(), 0),
        ("HIGH".to_string(), 0),
        ("MEDIUM".to_string(), 0),
        ("LOW".to_string(), 0),
    ]);
    let mut chars_used: u64 = 0;

    for (priority, idx) in order {
        let item = &items[idx];
        let is_most_recent = Some(idx) == most_recent_idx;

        let cap = if priority >= HistoryPriority::Critical || is_most_recent {
            budgets.history_max_recent_chars
        } else {
            budgets.history_max_older_chars
        };
        let max_chars = cap as usize;

        let text = render_item(item, max_chars);
        let step_chars = text.len() as u64;

        if chars_used + step_chars > budgets.context_budget_chars {
            // Over budget: drop this item and keep looking for smaller,
            // lower-priority ones that may still fit.
            continue;
        }

        chars_used += step_chars;
        *priority_counts.entry(priority.label().to_string()).or_insert(0) += 1;
        included.push(RenderedHistoryEntry {
            original_index: idx,
            priority,
            text,
        });
    }

    // Chronological output order regardless of selection order.
    included.sort_by_key(|e| e.original_index);

    let steps_included = included.len();
    let truncated = steps_included < total_steps;
    let info = HistoryTruncationInfo {
        steps_included,
        steps_total: total_steps,
        chars_used,
        budget_chars: budgets.context_budget_chars,
        truncated,
        priority_aware: true,
        priority_distribution: Some(priority_counts),
    };

    HistorySelection {
        entries: included,
        info,
    }
}

fn render_item(item: &HistoryItem, max_output_chars: usize) -> String {
    let status_marker = if item.status == "succeeded" || item.status == "VERIFIED" {
        "[OK]"
    } else {
        "[FAIL]"
    };

    let mut lines = vec![format!("### Step: {} {}", item.step_id, status_marker)];

    if !item.output.is_empty() {
        let mut output = item.output.clone();
        if output.len() > max_output_chars {
            output = truncate_chars(&output, max_output_chars);
            output.push_str("... (truncated)");
        }
        lines.push(format!("Output: {output}"));
    }

    if let Some(error) = &item.error {
        let mut error = error.clone();
        const MAX_ERROR: usize = 200;
        if error.len() > MAX_ERROR {
            error = truncate_chars(&error, MAX_ERROR);
            error.push_str("... (truncated)");
        }
        lines.push(format!("Error: {error}"));
    }

    lines.push(String::new());
    lines.join("\n")
}

fn truncate_chars(s: &str, max: usize) -> String {
    let mut end = max.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

fn format_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(step_id: &str, agent_key: &str, output: &str) -> HistoryItem {
        HistoryItem {
            step_id: step_id.into(),
            agent_key: agent_key.into(),
            role: String::new(),
            status: "succeeded".into(),
            output: output.into(),
            error: None,
        }
    }

    fn budgets(total: u64, recent: u64, older: u64) -> ResolvedBudgets {
        ResolvedBudgets {
            context_budget_chars: total,
            history_max_recent_chars: recent,
            history_max_older_chars: older,
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify_history_item("code-implementer", ""), HistoryPriority::Critical);
        assert_eq!(classify_history_item("merge-decider", ""), HistoryPriority::Critical);
        assert_eq!(classify_history_item("", "verification sweep"), HistoryPriority::Critical);
        assert_eq!(classify_history_item("code-critic", ""), HistoryPriority::High);
        assert_eq!(classify_history_item("test-runner", ""), HistoryPriority::High);
        assert_eq!(classify_history_item("doc-writer", ""), HistoryPriority::Low);
        assert_eq!(classify_history_item("gh-reporter", ""), HistoryPriority::Low);
        assert_eq!(classify_history_item("risk-analyst", ""), HistoryPriority::Medium);
    }

    #[test]
    fn test_all_items_fit_when_under_budget() {
        let items = vec![
            item("s1", "risk-analyst", "aaaa"),
            item("s2", "code-implementer", "bbbb"),
        ];
        let selection = select_history(&items, &budgets(200_000, 60_000, 20_000));
        assert_eq!(selection.info.steps_included, 2);
        assert!(!selection.info.truncated);
        assert!(selection.info.truncation_note().is_empty());
    }

    #[test]
    fn test_critical_kept_over_low_when_tight() {
        // Budget only fits ~2 of the 4 rendered blocks.
        let items = vec![
            item("s1", "gh-reporter", &"A".repeat(10_000)),
            item("s2", "code-implementer", &"B".repeat(10_000)),
            item("s3", "doc-writer", &"C".repeat(10_000)),
            item("s4", "merge-decider", &"D".repeat(10_000)),
        ];
        let selection = select_history(&items, &budgets(25_000, 60_000, 20_000));

        let included_steps: Vec<&str> = selection
            .entries
            .iter()
            .map(|e| items[e.original_index].step_id.as_str())
            .collect();
        assert!(included_steps.contains(&"s2"));
        assert!(included_steps.contains(&"s4"));

        let dist = selection.info.priority_distribution.as_ref().unwrap();
        assert!(dist["CRITICAL"] >= dist["LOW"]);
    }

    #[test]
    fn test_output_order_is_chronological() {
        let items = vec![
            item("step_1", "risk-analyst", "Risk analysis"),
            item("step_2", "code-implementer", "Implementation"),
            item("step_3", "code-critic", "Critique"),
        ];
        let selection = select_history(&items, &budgets(200_000, 60_000, 20_000));
        let rendered = selection.render();

        let pos_1 = rendered.find("step_1").unwrap();
        let pos_2 = rendered.find("step_2").unwrap();
        let pos_3 = rendered.find("step_3").unwrap();
        assert!(pos_1 < pos_2 && pos_2 < pos_3);
    }

    #[test]
    fn test_no_item_pushes_total_over_budget() {
        let items: Vec<HistoryItem> = (0..10)
            .map(|i| item(&format!("s{i}"), "worker", &"X".repeat(15_000)))
            .collect();
        let total = 50_000;
        let selection = select_history(&items, &budgets(total, 60_000, 20_000));
        assert!(selection.info.chars_used <= total);
        assert!(selection.info.truncated);
    }

    #[test]
    fn test_truncation_note_format() {
        let info = HistoryTruncationInfo {
            steps_included: 7,
            steps_total: 19,
            chars_used: 200_000,
            budget_chars: 200_000,
            truncated: true,
            priority_aware: true,
            priority_distribution: Some(BTreeMap::from([
                ("CRITICAL".to_string(), 2),
                ("HIGH".to_string(), 2),
                ("MEDIUM".to_string(), 3),
                ("LOW".to_string(), 0),
            ])),
        };
        let note = info.truncation_note();
        assert!(note.contains("[CONTEXT_TRUNCATED]"));
        assert!(note.contains("7 of 19"));
        assert!(note.contains("12 omitted"));
        assert!(note.contains("200,000/200,000"));
        assert!(note.contains("[Priority: CRITICAL=2, HIGH=2, MEDIUM=3, LOW=0]"));
    }

    #[test]
    fn test_per_item_truncation_uses_older_cap_for_older_steps() {
        let items = vec![
            item("old_step", "worker", &"Z".repeat(30_000)),
            item("recent_step", "worker", "short"),
        ];
        let selection = select_history(&items, &budgets(200_000, 60_000, 10_000));

        let old_entry = selection
            .entries
            .iter()
            .find(|e| e.original_index == 0)
            .unwrap();
        assert!(old_entry.text.contains("... (truncated)"));
        assert!(old_entry.text.len() < 11_000);

        let recent_entry = selection
            .entries
            .iter()
            .find(|e| e.original_index == 1)
            .unwrap();
        assert!(!recent_entry.text.contains("... (truncated)"));
    }
}
