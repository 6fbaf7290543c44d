use crate::normalize::number::{normalize_integer, normalize_number, normalize_temperature};
use crate::types::records::ObservationRecord;
use chrono::NaiveDate;
use serde_json::Value;

/// Converts the daily climatological payload into an [`ObservationRecord`].
///
/// The payload is expected to be a non-empty array whose first element is the day's
/// reading for the station. `date` is stamped as given; it is not read from the payload.
///
/// Returns `None` when the payload is missing, is not an array, is empty, or its first
/// element is not an object.
///
/// # Examples
///
/// ```
/// use aemet_etl::normalize_observation;
/// use chrono::NaiveDate;
/// use serde_json::json;
///
/// let date = NaiveDate::from_ymd_opt(2024, 5, 30).unwrap();
/// let raw = json!([{ "prec": "Ip", "tmed": "10,5", "hrMedia": "71" }]);
///
/// let record = normalize_observation(Some(&raw), 23, date).unwrap();
/// assert_eq!(record.precipitation, None);
/// assert_eq!(record.temperature_avg, Some(10));
/// assert_eq!(record.humidity_avg, Some(71));
/// assert!(normalize_observation(Some(&json!([])), 23, date).is_none());
/// ```
pub fn normalize_observation(
    raw: Option<&Value>,
    entity_id: i64,
    date: NaiveDate,
) -> Option<ObservationRecord> {
    let reading = raw?.as_array()?.first()?.as_object()?;

    Some(ObservationRecord {
        entity_id,
        date,
        precipitation: normalize_number(reading.get("prec")),
        temperature_avg: normalize_temperature(reading.get("tmed")),
        temperature_max: normalize_temperature(reading.get("tmax")),
        temperature_min: normalize_temperature(reading.get("tmin")),
        humidity_avg: normalize_integer(reading.get("hrMedia")),
        humidity_max: normalize_integer(reading.get("hrMax")),
        humidity_min: normalize_integer(reading.get("hrMin")),
    })
}
