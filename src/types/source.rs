//! Defines the two independent upstream sources an entity is ingested from.

use std::fmt;

/// One of the two upstream data families fetched for every entity.
///
/// The variant doubles as the query-type label attached to fetch logs and errors,
/// so a failed request can always be traced back to the side it belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// Measured daily summary from a weather station.
    Observation,
    /// Next-day hourly forecast for a municipality.
    Forecast,
}

impl Source {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Source::Observation => "OBSERVATION",
            Source::Forecast => "FORECAST",
        }
    }

    /// Prefix used for raw payload dumps, e.g. `OBSERVATION-12-2024-05-30.json`.
    pub(crate) fn file_name(&self, entity_id: i64, date: chrono::NaiveDate) -> String {
        format!("{}-{}-{}.json", self.label(), entity_id, date.format("%Y-%m-%d"))
    }
}

/// Formats a `Source` using its upper-case log label.
///
/// # Examples
///
/// ```
/// use aemet_etl::Source;
///
/// assert_eq!(Source::Observation.to_string(), "OBSERVATION");
/// assert_eq!(format!("{}", Source::Forecast), "FORECAST");
/// ```
impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
