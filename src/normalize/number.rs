//! Locale-aware numeric parsing shared by both normalizers.
//!
//! AEMET serialises most measurements as strings with a comma decimal separator
//! (`"10,5"`) and uses the sentinel `"Ip"` for trace precipitation. Both the sentinel
//! and null/missing values map to `None`, never to zero.

use log::warn;
use serde_json::Value;

/// Trace amount ("inapreciable"): present upstream, but not a measurable number.
pub const TRACE_SENTINEL: &str = "Ip";

/// Parses a decimal without rounding. Accepts JSON numbers and comma or period strings.
pub fn parse_decimal_exact(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s == TRACE_SENTINEL {
                return None;
            }
            match s.replace(',', ".").parse::<f64>() {
                Ok(v) if v.is_finite() => Some(v),
                _ => {
                    warn!("Ignoring non-numeric value '{}'", s);
                    None
                }
            }
        }
        _ => None,
    }
}

/// Parses a decimal and rounds it to 2 places.
///
/// # Examples
///
/// ```
/// use aemet_etl::normalize_number;
/// use serde_json::json;
///
/// assert_eq!(normalize_number(Some(&json!("3,1415"))), Some(3.14));
/// assert_eq!(normalize_number(Some(&json!("Ip"))), None);
/// assert_eq!(normalize_number(Some(&json!(null))), None);
/// assert_eq!(normalize_number(None), None);
/// ```
pub fn normalize_number(value: Option<&Value>) -> Option<f64> {
    parse_decimal_exact(value).map(|v| round_places(v, 2))
}

/// Whole-degree temperature: the 2-place value rounded half to even.
pub fn normalize_temperature(value: Option<&Value>) -> Option<i64> {
    normalize_number(value).map(round_half_even)
}

/// Integer quantities such as relative humidity.
pub fn normalize_integer(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(round_half_even)),
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(v) => Some(v),
            Err(_) => parse_decimal_exact(value).map(round_half_even),
        },
        _ => None,
    }
}

/// Rounds to the nearest integer, ties to even (`10.5 -> 10`, `11.5 -> 12`).
pub fn round_half_even(v: f64) -> i64 {
    v.round_ties_even() as i64
}

pub fn round_places(v: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (v * factor).round_ties_even() / factor
}
