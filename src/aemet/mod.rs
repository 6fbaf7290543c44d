//! AEMET OpenData specifics: endpoint templates and the two-stage
//! "pointer then payload" resolution.

pub mod endpoints;
pub mod error;
pub mod resolver;
