use crate::types::entity::Entity;
use crate::types::records::{ForecastRecord, ObservationRecord};
use chrono::NaiveDate;
use serde::Serialize;

/// What a run would write for one entity, computed without touching the store.
///
/// A `None` record means that source could not be fetched or had nothing usable;
/// the reason is in the log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnosis {
    pub entity: Entity,
    pub observation_date: Option<NaiveDate>,
    pub observation: Option<ObservationRecord>,
    pub forecast: Option<ForecastRecord>,
}
