pub mod error;
pub mod fetcher;
pub mod retry;
pub mod transport;

use crate::types::source::Source;
use std::fmt;

/// Identifies which entity and which upstream source a request belongs to.
///
/// Carried through every fetch so that retries, terminal failures and missing
/// pointers are logged and reported with the same context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchContext {
    pub entity_id: i64,
    pub source: Source,
}

impl FetchContext {
    pub fn new(entity_id: i64, source: Source) -> Self {
        Self { entity_id, source }
    }
}

impl fmt::Display for FetchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - entity {}", self.source, self.entity_id)
    }
}
