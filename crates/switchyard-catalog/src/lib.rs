//! Read-only catalogs consumed by the orchestrator.
//!
//! Three catalogs live here:
//!
//! - [`FlowRegistry`]: the flows a run can execute, as ordered step lists with
//!   routing configuration and teaching notes.
//! - [`StationLibrary`]: executable stations; the validation surface for
//!   EXTEND_GRAPH proposals.
//! - [`SidequestCatalog`]: named detour patterns with triggers, step
//!   sequences, and return behavior.
//!
//! Catalog values are immutable after load. Hot reload means building a new
//! catalog and swapping the handle; nothing mutates in place.

mod error;
mod flow;
mod sidequest;
mod station;

pub use error::{Error, Result};
pub use flow::{FlowDefinition, FlowRegistry, RoutingKind, StepDefinition, StepRouting, TeachingNotes};
pub use sidequest::{
    ReturnBehavior, ReturnMode, SidequestCatalog, SidequestDefinition, SidequestStep,
    SidequestTriggers, TriggerContext,
};
pub use station::{StationLibrary, StationSpec};
