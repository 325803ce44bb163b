//! Stall detection for microloops.
//!
//! Each iteration produces a progress signature: a hash of the observed
//! file changes plus a normalized error signature. When the same signature
//! repeats across consecutive iterations, the loop is burning API calls
//! without moving; the signature, not `max_iterations`, is the intended
//! loop-steering mechanism.

use std::collections::HashMap;

use serde_json::json;
use sha2::{Digest, Sha256};

/// Consecutive identical signatures required before a stall fires.
pub const STALL_THRESHOLD: usize = 3;

/// Evidence of progress captured after step execution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgressEvidence {
    pub file_count: usize,
    pub line_count: usize,
    pub files_summary: String,
    pub has_changes: bool,
    /// (path, status) pairs, truncated to 20 entries for payload size.
    pub files: Vec<(String, String)>,
}

impl ProgressEvidence {
    pub fn to_payload(&self) -> serde_json::Value {
        json!({
            "file_count": self.file_count,
            "line_count": self.line_count,
            "files_summary": self.files_summary,
            "has_changes": self.has_changes,
        })
    }
}

/// Normalize an error message into a stable signature.
///
/// Digits and whitespace runs are collapsed so that line numbers, retry
/// counters, and timestamps don't make identical failures look distinct.
pub fn compute_error_signature(error: &str) -> String {
    let mut normalized = String::with_capacity(error.len().min(256));
    let mut last_space = false;
    for c in error.to_lowercase().chars() {
        if c.is_ascii_digit() {
            continue;
        }
        if c.is_whitespace() {
            if !last_space {
                normalized.push(' ');
            }
            last_space = true;
        } else {
            normalized.push(c);
            last_space = false;
        }
        if normalized.len() >= 256 {
            break;
        }
    }
    short_hash(normalized.trim())
}

/// Combined progress signature: file-change evidence plus error signature.
pub fn progress_signature(evidence: &ProgressEvidence, error: Option<&str>) -> String {
    let error_sig = error.map(compute_error_signature).unwrap_or_default();
    let mut material = String::new();
    material.push_str(&evidence.files_summary);
    material.push('|');
    material.push_str(&evidence.file_count.to_string());
    material.push('|');
    for (path, status) in &evidence.files {
        material.push_str(path);
        material.push(':');
        material.push_str(status);
        material.push(',');
    }
    material.push('|');
    material.push_str(&error_sig);
    short_hash(&material)
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Outcome of stall analysis for one step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StallAnalysis {
    pub stalled: bool,
    /// Consecutive iterations sharing the trailing signature.
    pub consecutive: usize,
    pub signature: String,
}

/// Tracks per-step progress signatures across microloop iterations.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    signatures: HashMap<String, Vec<String>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an iteration's signature and return the current analysis.
    pub fn record(&mut self, step_id: &str, signature: String) -> StallAnalysis {
        let history = self.signatures.entry(step_id.to_string()).or_default();
        history.push(signature);
        analyze(history, STALL_THRESHOLD)
    }

    pub fn analysis_for(&self, step_id: &str) -> StallAnalysis {
        match self.signatures.get(step_id) {
            Some(history) => analyze(history, STALL_THRESHOLD),
            None => StallAnalysis::default(),
        }
    }
}

fn analyze(history: &[String], threshold: usize) -> StallAnalysis {
    let Some(last) = history.last() else {
        return StallAnalysis::default();
    };
    let consecutive = history
        .iter()
        .rev()
        .take_while(|sig| *sig == last)
        .count();
    StallAnalysis {
        stalled: consecutive >= threshold,
        consecutive,
        signature: last.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence(summary: &str, has_changes: bool) -> ProgressEvidence {
        ProgressEvidence {
            file_count: usize::from(has_changes),
            line_count: 0,
            files_summary: summary.to_string(),
            has_changes,
            files: Vec::new(),
        }
    }

    #[test]
    fn test_error_signature_ignores_digits() {
        let a = compute_error_signature("assertion failed at line 42: expected 7");
        let b = compute_error_signature("assertion failed at line 98: expected 3");
        assert_eq!(a, b);

        let c = compute_error_signature("connection refused");
        assert_ne!(a, c);
    }

    #[test]
    fn test_progress_signature_changes_with_evidence() {
        let sig_a = progress_signature(&evidence("no changes", false), Some("test failed"));
        let sig_b = progress_signature(&evidence("2 files changed", true), Some("test failed"));
        assert_ne!(sig_a, sig_b);
    }

    #[test]
    fn test_stall_fires_after_threshold() {
        let mut tracker = ProgressTracker::new();
        let sig = progress_signature(&evidence("no changes", false), Some("same error"));

        let first = tracker.record("critique_reqs", sig.clone());
        assert!(!first.stalled);
        let second = tracker.record("critique_reqs", sig.clone());
        assert!(!second.stalled);
        assert_eq!(second.consecutive, 2);

        let third = tracker.record("critique_reqs", sig);
        assert!(third.stalled);
        assert_eq!(third.consecutive, 3);
    }

    #[test]
    fn test_progress_resets_stall_count() {
        let mut tracker = ProgressTracker::new();
        let stuck = progress_signature(&evidence("no changes", false), Some("err"));
        tracker.record("s", stuck.clone());
        tracker.record("s", stuck.clone());

        let moved = progress_signature(&evidence("1 file changed", true), None);
        let analysis = tracker.record("s", moved);
        assert!(!analysis.stalled);
        assert_eq!(analysis.consecutive, 1);
    }
}
