//! Per-entity FETCH → TRANSFORM → LOAD loop and the run summary it produces.

pub mod orchestrator;
pub mod outcome;
pub mod plan;
pub mod summary;
