use serde::Serialize;

/// A place being monitored: a city or municipality with its upstream identifiers.
///
/// Entities are read once per run from the catalog and are not modified while
/// the run is in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entity {
    /// Stable key owned by the catalog.
    pub entity_id: i64,
    /// Municipality code used by the forecast endpoint.
    pub postal_code: String,
    /// Station identifier used by the daily observation endpoint.
    pub station_code: String,
}

impl Entity {
    pub fn new(entity_id: i64, postal_code: impl Into<String>, station_code: impl Into<String>) -> Self {
        Self {
            entity_id,
            postal_code: postal_code.into(),
            station_code: station_code.into(),
        }
    }
}
