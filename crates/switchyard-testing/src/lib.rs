//! Testing infrastructure for switchyard integration tests.
//!
//! - `RunWorld`: fluent interface for declarative run-directory setup
//! - `fixtures`: envelope/event/state builders with sensible defaults

pub mod fixtures;
pub mod world;

pub use world::RunWorld;
