//! SQLite store holding the entity catalog and one weather row per (entity, date).
//!
//! Observation and forecast values live side by side in `weather_data`; each upsert
//! only touches its own columns, so the two sources can arrive on different days.

use crate::store::error::StoreError;
use crate::store::repository::{ConflictPolicy, EntityCatalog, Repository};
use crate::types::entity::Entity;
use crate::types::records::{ForecastRecord, ObservationRecord};
use chrono::NaiveDate;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::path::Path;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS cities (
        city_id      INTEGER PRIMARY KEY,
        postal_code  TEXT NOT NULL,
        station_code TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS weather_data (
        city_id                   INTEGER NOT NULL,
        date                      TEXT NOT NULL,
        observation_present       INTEGER NOT NULL DEFAULT 0,
        temperature_measured_avg  INTEGER,
        temperature_measured_max  INTEGER,
        temperature_measured_min  INTEGER,
        humidity_measured_avg     INTEGER,
        humidity_measured_max     INTEGER,
        humidity_measured_min     INTEGER,
        precipitation             REAL,
        forecast_present          INTEGER NOT NULL DEFAULT 0,
        temperature_predicted_avg INTEGER,
        temperature_predicted_max REAL,
        temperature_predicted_min REAL,
        humidity_predicted_avg    INTEGER,
        humidity_predicted_max    REAL,
        humidity_predicted_min    REAL,
        precipitations            TEXT,
        prob_precipitation        TEXT,
        prob_storm                TEXT,
        PRIMARY KEY (city_id, date)
    );";

const UPSERT_OBSERVATION: &str = "INSERT INTO weather_data (
        city_id, date, observation_present,
        temperature_measured_avg, temperature_measured_max, temperature_measured_min,
        humidity_measured_avg, humidity_measured_max, humidity_measured_min,
        precipitation
    ) VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
    ON CONFLICT (city_id, date) DO UPDATE SET
        observation_present = 1,
        temperature_measured_avg = excluded.temperature_measured_avg,
        temperature_measured_max = excluded.temperature_measured_max,
        temperature_measured_min = excluded.temperature_measured_min,
        humidity_measured_avg = excluded.humidity_measured_avg,
        humidity_measured_max = excluded.humidity_measured_max,
        humidity_measured_min = excluded.humidity_measured_min,
        precipitation = excluded.precipitation";

const INSERT_FORECAST: &str = "INSERT INTO weather_data (
        city_id, date, forecast_present,
        temperature_predicted_avg, temperature_predicted_max, temperature_predicted_min,
        humidity_predicted_avg, humidity_predicted_max, humidity_predicted_min,
        precipitations, prob_precipitation, prob_storm
    ) VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
    ON CONFLICT (city_id, date) DO UPDATE SET
        forecast_present = 1,
        temperature_predicted_avg = excluded.temperature_predicted_avg,
        temperature_predicted_max = excluded.temperature_predicted_max,
        temperature_predicted_min = excluded.temperature_predicted_min,
        humidity_predicted_avg = excluded.humidity_predicted_avg,
        humidity_predicted_max = excluded.humidity_predicted_max,
        humidity_predicted_min = excluded.humidity_predicted_min,
        precipitations = excluded.precipitations,
        prob_precipitation = excluded.prob_precipitation,
        prob_storm = excluded.prob_storm";

/// Appended to [`INSERT_FORECAST`] under [`ConflictPolicy::KeepExisting`].
const KEEP_EXISTING_FORECAST: &str = " WHERE weather_data.forecast_present = 0";

/// SQLite-backed [`Repository`] and [`EntityCatalog`].
///
/// The connection is held for the whole run; the pipeline commits once per entity.
pub struct SqliteStore {
    conn: Connection,
    forecast_conflict: ConflictPolicy,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::CreateDir(parent.to_path_buf(), e))?;
        }
        let conn =
            Connection::open(path).map_err(|e| StoreError::Open(path.to_path_buf(), e))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            forecast_conflict: ConflictPolicy::default(),
        })
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.forecast_conflict = policy;
        self
    }

    /// Register or update an entity in the catalog.
    pub fn add_entity(&self, entity: &Entity) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO cities (city_id, postal_code, station_code) VALUES (?1, ?2, ?3)
             ON CONFLICT (city_id) DO UPDATE SET
                postal_code = excluded.postal_code,
                station_code = excluded.station_code",
            params![entity.entity_id, entity.postal_code, entity.station_code],
        )?;
        Ok(())
    }

    /// The stored observation for `(entity_id, date)`, if one was ever written.
    pub fn observation(
        &self,
        entity_id: i64,
        date: NaiveDate,
    ) -> Result<Option<ObservationRecord>, StoreError> {
        let record = self
            .conn
            .query_row(
                "SELECT temperature_measured_avg, temperature_measured_max, temperature_measured_min,
                        humidity_measured_avg, humidity_measured_max, humidity_measured_min,
                        precipitation
                 FROM weather_data
                 WHERE city_id = ?1 AND date = ?2 AND observation_present = 1",
                params![entity_id, date],
                |row| {
                    Ok(ObservationRecord {
                        entity_id,
                        date,
                        temperature_avg: row.get(0)?,
                        temperature_max: row.get(1)?,
                        temperature_min: row.get(2)?,
                        humidity_avg: row.get(3)?,
                        humidity_max: row.get(4)?,
                        humidity_min: row.get(5)?,
                        precipitation: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// The stored forecast for `(entity_id, date)`, if one was ever written.
    pub fn forecast(
        &self,
        entity_id: i64,
        date: NaiveDate,
    ) -> Result<Option<ForecastRecord>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT temperature_predicted_avg, temperature_predicted_max, temperature_predicted_min,
                        humidity_predicted_avg, humidity_predicted_max, humidity_predicted_min,
                        precipitations, prob_precipitation, prob_storm
                 FROM weather_data
                 WHERE city_id = ?1 AND date = ?2 AND forecast_present = 1",
                params![entity_id, date],
                StoredForecast::from_row,
            )
            .optional()?;

        row.map(|stored| stored.into_record(entity_id, date)).transpose()
    }

    pub fn count_weather_rows(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM weather_data", [], |row| row.get(0))?)
    }
}

/// Raw forecast columns before the JSON text is decoded.
struct StoredForecast {
    temperature_avg: Option<i64>,
    temperature_max: Option<f64>,
    temperature_min: Option<f64>,
    humidity_avg: Option<i64>,
    humidity_max: Option<f64>,
    humidity_min: Option<f64>,
    precipitations: Option<String>,
    prob_precipitation: Option<String>,
    prob_storm: Option<String>,
}

impl StoredForecast {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            temperature_avg: row.get(0)?,
            temperature_max: row.get(1)?,
            temperature_min: row.get(2)?,
            humidity_avg: row.get(3)?,
            humidity_max: row.get(4)?,
            humidity_min: row.get(5)?,
            precipitations: row.get(6)?,
            prob_precipitation: row.get(7)?,
            prob_storm: row.get(8)?,
        })
    }

    fn into_record(self, entity_id: i64, date: NaiveDate) -> Result<ForecastRecord, StoreError> {
        let decode = |text: Option<String>| -> Result<Option<Value>, StoreError> {
            text.map(|t| serde_json::from_str(&t))
                .transpose()
                .map_err(|source| StoreError::CorruptJson { entity_id, source })
        };
        Ok(ForecastRecord {
            entity_id,
            date,
            temperature_avg: self.temperature_avg,
            temperature_max: self.temperature_max,
            temperature_min: self.temperature_min,
            humidity_avg: self.humidity_avg,
            humidity_max: self.humidity_max,
            humidity_min: self.humidity_min,
            precipitations: decode(self.precipitations)?,
            prob_precipitation: decode(self.prob_precipitation)?,
            prob_storm: decode(self.prob_storm)?,
        })
    }
}

fn to_json_text(value: &Option<Value>, entity_id: i64) -> Result<Option<String>, StoreError> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|source| StoreError::Serialise { entity_id, source })
}

impl Repository for SqliteStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn upsert_observation(&mut self, record: &ObservationRecord) -> Result<(), StoreError> {
        debug!("Upserting observation for entity {} on {}", record.entity_id, record.date);
        self.conn.execute(
            UPSERT_OBSERVATION,
            params![
                record.entity_id,
                record.date,
                record.temperature_avg,
                record.temperature_max,
                record.temperature_min,
                record.humidity_avg,
                record.humidity_max,
                record.humidity_min,
                record.precipitation,
            ],
        )?;
        Ok(())
    }

    fn upsert_forecast(&mut self, record: &ForecastRecord) -> Result<(), StoreError> {
        debug!("Upserting forecast for entity {} on {}", record.entity_id, record.date);
        let sql = match self.forecast_conflict {
            ConflictPolicy::Overwrite => INSERT_FORECAST.to_string(),
            ConflictPolicy::KeepExisting => format!("{}{}", INSERT_FORECAST, KEEP_EXISTING_FORECAST),
        };
        self.conn.execute(
            &sql,
            params![
                record.entity_id,
                record.date,
                record.temperature_avg,
                record.temperature_max,
                record.temperature_min,
                record.humidity_avg,
                record.humidity_max,
                record.humidity_min,
                to_json_text(&record.precipitations, record.entity_id)?,
                to_json_text(&record.prob_precipitation, record.entity_id)?,
                to_json_text(&record.prob_storm, record.entity_id)?,
            ],
        )?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }
}

impl EntityCatalog for SqliteStore {
    fn list_entities(&self) -> Result<Vec<Entity>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT city_id, postal_code, station_code FROM cities ORDER BY city_id")?;
        let rows = stmt.query_map([], entity_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    fn find_entity(&self, entity_id: i64) -> Result<Option<Entity>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT city_id, postal_code, station_code FROM cities WHERE city_id = ?1",
                params![entity_id],
                entity_from_row,
            )
            .optional()?)
    }
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        entity_id: row.get(0)?,
        postal_code: row.get(1)?,
        station_code: row.get(2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 30).unwrap()
    }

    fn observation() -> ObservationRecord {
        ObservationRecord {
            entity_id: 23,
            date: date(),
            precipitation: Some(3.14),
            temperature_avg: Some(10),
            temperature_max: Some(15),
            temperature_min: None,
            humidity_avg: Some(50),
            humidity_max: Some(60),
            humidity_min: Some(40),
        }
    }

    fn forecast() -> ForecastRecord {
        ForecastRecord {
            entity_id: 23,
            date: date(),
            temperature_avg: Some(10),
            temperature_max: Some(15.0),
            temperature_min: Some(5.0),
            humidity_avg: Some(50),
            humidity_max: Some(60.0),
            humidity_min: Some(40.0),
            precipitations: Some(json!([{ "value": "Ip", "periodo": "07" }])),
            prob_precipitation: Some(json!([{ "value": "10", "periodo": "0814" }])),
            prob_storm: None,
        }
    }

    #[test]
    fn test_open_twice_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("weather.db");
        SqliteStore::open(&path).unwrap();
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.count_weather_rows().unwrap(), 0);
    }

    #[test]
    fn test_observation_upsert_is_idempotent() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        store.upsert_observation(&observation()).unwrap();
        let first = store.observation(23, date()).unwrap();
        store.upsert_observation(&observation()).unwrap();
        let second = store.observation(23, date()).unwrap();

        assert_eq!(first, Some(observation()));
        assert_eq!(first, second);
        assert_eq!(store.count_weather_rows().unwrap(), 1);
    }

    #[test]
    fn test_observation_upsert_overwrites() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.upsert_observation(&observation()).unwrap();

        let mut updated = observation();
        updated.precipitation = None;
        updated.temperature_min = Some(-2);
        store.upsert_observation(&updated).unwrap();

        assert_eq!(store.observation(23, date()).unwrap(), Some(updated));
        assert_eq!(store.count_weather_rows().unwrap(), 1);
    }

    #[test]
    fn test_forecast_round_trip_and_overwrite() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.upsert_forecast(&forecast()).unwrap();
        assert_eq!(store.forecast(23, date()).unwrap(), Some(forecast()));

        let mut closer = forecast();
        closer.temperature_max = Some(17.5);
        closer.prob_storm = Some(json!([{ "value": "5", "periodo": "1420" }]));
        store.upsert_forecast(&closer).unwrap();

        assert_eq!(store.forecast(23, date()).unwrap(), Some(closer));
        assert_eq!(store.count_weather_rows().unwrap(), 1);
    }

    #[test]
    fn test_forecast_keep_existing_policy() {
        let mut store = SqliteStore::open_in_memory()
            .unwrap()
            .with_conflict_policy(ConflictPolicy::KeepExisting);
        store.upsert_forecast(&forecast()).unwrap();

        let mut closer = forecast();
        closer.temperature_max = Some(30.0);
        store.upsert_forecast(&closer).unwrap();

        assert_eq!(store.forecast(23, date()).unwrap(), Some(forecast()));
    }

    #[test]
    fn test_keep_existing_still_fills_observation_only_row() {
        let mut store = SqliteStore::open_in_memory()
            .unwrap()
            .with_conflict_policy(ConflictPolicy::KeepExisting);
        store.upsert_observation(&observation()).unwrap();
        store.upsert_forecast(&forecast()).unwrap();

        assert_eq!(store.forecast(23, date()).unwrap(), Some(forecast()));
    }

    #[test]
    fn test_sources_share_a_row_without_clobbering() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.upsert_observation(&observation()).unwrap();
        store.upsert_forecast(&forecast()).unwrap();

        assert_eq!(store.observation(23, date()).unwrap(), Some(observation()));
        assert_eq!(store.forecast(23, date()).unwrap(), Some(forecast()));
        assert_eq!(store.count_weather_rows().unwrap(), 1);
    }

    #[test]
    fn test_forecast_only_row_has_no_observation() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.upsert_forecast(&forecast()).unwrap();
        assert_eq!(store.observation(23, date()).unwrap(), None);
    }

    #[test]
    fn test_rollback_discards_writes() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.begin().unwrap();
        store.upsert_observation(&observation()).unwrap();
        store.rollback().unwrap();

        assert_eq!(store.observation(23, date()).unwrap(), None);
        // Rolling back outside a transaction is a no-op.
        store.rollback().unwrap();
    }

    #[test]
    fn test_commit_persists_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("weather.db");
        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.begin().unwrap();
            store.upsert_forecast(&forecast()).unwrap();
            store.commit().unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.forecast(23, date()).unwrap(), Some(forecast()));
    }

    #[test]
    fn test_catalog() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_entity(&Entity::new(2, "08019", "0076")).unwrap();
        store.add_entity(&Entity::new(1, "28079", "3195")).unwrap();
        store.add_entity(&Entity::new(2, "08019", "0201D")).unwrap();

        let entities = store.list_entities().unwrap();
        assert_eq!(
            entities,
            vec![Entity::new(1, "28079", "3195"), Entity::new(2, "08019", "0201D")]
        );
        assert_eq!(store.find_entity(1).unwrap(), Some(Entity::new(1, "28079", "3195")));
        assert_eq!(store.find_entity(99).unwrap(), None);
    }
}
