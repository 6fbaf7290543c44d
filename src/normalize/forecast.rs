use crate::normalize::number::{parse_decimal_exact, round_half_even};
use crate::types::records::ForecastRecord;
use chrono::{Days, NaiveDate};
use log::debug;
use serde_json::Value;

/// Index of tomorrow in the forecast's `"dia"` array (0 is today).
const TOMORROW: usize = 1;

/// Max, min and rounded mean of an hourly series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesStats {
    pub max: f64,
    pub min: f64,
    pub avg: i64,
}

impl SeriesStats {
    /// Returns `None` for an empty series instead of failing the reduction.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        Some(Self {
            max,
            min,
            avg: round_half_even(mean),
        })
    }
}

/// Reads the `value` of each `{ "periodo", "value" }` pair in an hourly series.
/// Entries without a numeric value are skipped.
fn hourly_values(day: &Value, key: &str) -> Vec<f64> {
    let Some(series) = day.get(key).and_then(Value::as_array) else {
        return Vec::new();
    };
    series
        .iter()
        .filter_map(|entry| {
            let value = parse_decimal_exact(entry.get("value"));
            if value.is_none() {
                debug!("Skipping {} entry without numeric value: {}", key, entry);
            }
            value
        })
        .collect()
}

fn passthrough(day: &Value, key: &str) -> Option<Value> {
    day.get(key).filter(|v| !v.is_null()).cloned()
}

/// Converts the hourly municipal forecast into tomorrow's [`ForecastRecord`].
///
/// The payload must be a non-empty array whose first element holds
/// `prediccion.dia`, with at least today's and tomorrow's entries. The record is
/// dated `today + 1`, where `today` is the run's invocation date, not the payload's
/// `elaborado` timestamp.
///
/// # Examples
///
/// ```
/// use aemet_etl::normalize_forecast;
/// use chrono::NaiveDate;
/// use serde_json::json;
///
/// let today = NaiveDate::from_ymd_opt(2024, 5, 30).unwrap();
/// let raw = json!([{ "prediccion": { "dia": [
///     {},
///     { "temperatura": [
///         { "periodo": "00", "value": "5" },
///         { "periodo": "01", "value": "15" },
///         { "periodo": "02", "value": "10" }
///     ] }
/// ] } }]);
///
/// let record = normalize_forecast(Some(&raw), 23, today).unwrap();
/// assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 5, 31).unwrap());
/// assert_eq!(record.temperature_max, Some(15.0));
/// assert_eq!(record.temperature_min, Some(5.0));
/// assert_eq!(record.temperature_avg, Some(10));
/// assert_eq!(record.humidity_avg, None);
/// ```
pub fn normalize_forecast(
    raw: Option<&Value>,
    entity_id: i64,
    today: NaiveDate,
) -> Option<ForecastRecord> {
    let forecast = raw?.as_array()?.first()?.get("prediccion")?;
    let days = forecast.get("dia")?.as_array()?;
    let tomorrow = days.get(TOMORROW)?;
    let date = today.checked_add_days(Days::new(1))?;

    let temperature = SeriesStats::from_values(&hourly_values(tomorrow, "temperatura"));
    let humidity = SeriesStats::from_values(&hourly_values(tomorrow, "humedadRelativa"));

    Some(ForecastRecord {
        entity_id,
        date,
        temperature_avg: temperature.map(|s| s.avg),
        temperature_max: temperature.map(|s| s.max),
        temperature_min: temperature.map(|s| s.min),
        humidity_avg: humidity.map(|s| s.avg),
        humidity_max: humidity.map(|s| s.max),
        humidity_min: humidity.map(|s| s.min),
        precipitations: passthrough(tomorrow, "precipitacion"),
        prob_precipitation: passthrough(tomorrow, "probPrecipitacion"),
        prob_storm: passthrough(tomorrow, "probTormenta"),
    })
}
