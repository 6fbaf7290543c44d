//! Traits the pipeline persists through and reads its entities from.

use crate::store::error::StoreError;
use crate::types::entity::Entity;
use crate::types::records::{ForecastRecord, ObservationRecord};
use serde::Deserialize;

/// What a forecast upsert does when a row for `(entity_id, date)` already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Replace every forecast column with the new values.
    #[default]
    Overwrite,
    /// Leave the stored forecast untouched.
    KeepExisting,
}

/// Idempotent writes keyed by `(entity_id, date)`, grouped in explicit transactions.
///
/// Upserting the same record twice leaves the stored row unchanged after the second call.
pub trait Repository {
    fn begin(&mut self) -> Result<(), StoreError>;
    fn upsert_observation(&mut self, record: &ObservationRecord) -> Result<(), StoreError>;
    fn upsert_forecast(&mut self, record: &ForecastRecord) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Source of the entities to monitor.
pub trait EntityCatalog {
    fn list_entities(&self) -> Result<Vec<Entity>, StoreError>;
    fn find_entity(&self, entity_id: i64) -> Result<Option<Entity>, StoreError>;
}
