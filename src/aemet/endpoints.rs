//! Pure URL construction for the two endpoint families.

use chrono::NaiveDate;

pub const DEFAULT_BASE_URL: &str = "https://opendata.aemet.es/opendata/api";

/// Daily climatological values for one station, over a single UTC day.
///
/// # Examples
///
/// ```
/// use aemet_etl::build_observation_endpoint;
/// use chrono::NaiveDate;
///
/// let url = build_observation_endpoint(
///     "https://opendata.aemet.es/opendata/api",
///     "3195",
///     NaiveDate::from_ymd_opt(2024, 5, 30).unwrap(),
/// );
/// assert_eq!(
///     url,
///     "https://opendata.aemet.es/opendata/api/valores/climatologicos/diarios/datos/\
///      fechaini/2024-05-30T00:00:00UTC/fechafin/2024-05-30T23:59:59UTC/estacion/3195"
/// );
/// ```
pub fn build_observation_endpoint(base_url: &str, station_code: &str, date: NaiveDate) -> String {
    let start = date.format("%Y-%m-%dT00:00:00UTC");
    let end = date.format("%Y-%m-%dT23:59:59UTC");
    format!(
        "{}/valores/climatologicos/diarios/datos/fechaini/{}/fechafin/{}/estacion/{}",
        base_url.trim_end_matches('/'),
        start,
        end,
        station_code
    )
}

/// Hourly municipal forecast covering today and the next days.
pub fn build_forecast_endpoint(base_url: &str, postal_code: &str) -> String {
    format!(
        "{}/prediccion/especifica/municipio/horaria/{}",
        base_url.trim_end_matches('/'),
        postal_code
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forecast_endpoint() {
        assert_eq!(
            build_forecast_endpoint(DEFAULT_BASE_URL, "28079"),
            "https://opendata.aemet.es/opendata/api/prediccion/especifica/municipio/horaria/28079"
        );
    }

    #[test]
    fn test_trailing_slash_in_base_url() {
        let date = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let url = build_observation_endpoint("http://localhost:8080/api/", "B228", date);
        assert_eq!(
            url,
            "http://localhost:8080/api/valores/climatologicos/diarios/datos/fechaini/2023-01-02T00:00:00UTC/fechafin/2023-01-02T23:59:59UTC/estacion/B228"
        );
    }
}
