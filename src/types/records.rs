//! Flat, fixed-shape records produced by the normalizer and handed to the repository.
//!
//! Every measured quantity is an `Option`: `None` means the upstream reported nothing
//! usable (a null, a missing key or the `"Ip"` trace sentinel). It is never zero.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

/// One calendar day of measured weather for an entity.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct ObservationRecord {
    pub entity_id: i64,
    pub date: NaiveDate,                // caller supplied, not read from the payload
    pub precipitation: Option<f64>,     // prec, mm rounded to 2 places
    pub temperature_avg: Option<i64>,   // tmed
    pub temperature_max: Option<i64>,   // tmax
    pub temperature_min: Option<i64>,   // tmin
    pub humidity_avg: Option<i64>,      // hrMedia
    pub humidity_max: Option<i64>,      // hrMax
    pub humidity_min: Option<i64>,      // hrMin
}

/// Tomorrow's forecast for an entity, aggregated from the hourly series.
///
/// The average fields are rounded to whole units while max/min keep the precision of
/// the hourly values. `precipitations`, `prob_precipitation` and `prob_storm` are the
/// upstream structures passed through untouched and persisted as JSON text.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct ForecastRecord {
    pub entity_id: i64,
    pub date: NaiveDate,
    pub temperature_avg: Option<i64>,
    pub temperature_max: Option<f64>,
    pub temperature_min: Option<f64>,
    pub humidity_avg: Option<i64>,
    pub humidity_max: Option<f64>,
    pub humidity_min: Option<f64>,
    pub precipitations: Option<Value>,
    pub prob_precipitation: Option<Value>,
    pub prob_storm: Option<Value>,
}
