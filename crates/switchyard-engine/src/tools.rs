//! Tool allow-list heuristics.
//!
//! Analysis-shaped steps get read-only tools; build-shaped steps get the
//! full set. Matching is substring-based over the step id and role.

const ANALYSIS_STEP_PATTERNS: &[&str] = &["critique", "review", "analy", "assess", "audit", "triage"];
const BUILD_STEP_PATTERNS: &[&str] = &["implement", "build", "fix", "author", "write", "normalize"];

const ANALYSIS_TOOLS: &[&str] = &["Read", "Grep", "Glob"];
const FULL_TOOLS: &[&str] = &["Read", "Grep", "Glob", "Write", "Edit", "Bash"];

/// Determine which tools a step may use, from its id and role.
pub fn tools_for_step(step_id: &str, step_role: &str) -> Vec<&'static str> {
    let haystack = format!("{} {}", step_id.to_lowercase(), step_role.to_lowercase());

    if ANALYSIS_STEP_PATTERNS.iter().any(|p| haystack.contains(p)) {
        return ANALYSIS_TOOLS.to_vec();
    }
    if BUILD_STEP_PATTERNS.iter().any(|p| haystack.contains(p)) {
        return FULL_TOOLS.to_vec();
    }
    FULL_TOOLS.to_vec()
}
