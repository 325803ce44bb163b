//! Durable run-state store for the switchyard orchestrator.
//!
//! The storage layout mirrors the stable on-disk integration surface:
//!
//! ```text
//! runs/
//!   <run_id>/
//!     meta.json          # RunSummary (replaced atomically)
//!     spec.json          # RunSpec (written once)
//!     run_state.json     # RunState (replaced atomically after each commit)
//!     events.jsonl       # RunEvents (append-only, one JSON object per line)
//!     <flow_key>/
//!       handoff/<step_id>.json   # HandoffEnvelope (immutable once written)
//!       llm/ receipts/ nav/ routing/
//! ```
//!
//! The [`Store`] is an explicit handle: it owns the per-run lock registry
//! and the per-run sequence counters, so tests can scope their own store
//! instead of sharing process-wide state. Locks are in-process only; the
//! design explicitly rejects cross-process claims.

mod atomic;
mod error;
mod journal;
mod paths;
mod store;

pub use error::{Error, Result};
pub use journal::{NavigatorEventSummary, NAVIGATOR_EVENT_KINDS};
pub use paths::RunPaths;
pub use store::{RunStatePatch, Store, SummaryPatch};
