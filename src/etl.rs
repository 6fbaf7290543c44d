//! Entry point that wires configuration, the SQLite store, the HTTP stack and the
//! orchestrator together for each command the binary exposes.

use crate::aemet::resolver::IndirectionResolver;
use crate::config::Config;
use crate::error::EtlError;
use crate::fetch::fetcher::RetryingFetcher;
use crate::fetch::transport::{HttpTransport, ReqwestTransport, Sleeper, TokioSleeper};
use crate::normalize::forecast::normalize_forecast;
use crate::normalize::observation::normalize_observation;
use crate::pipeline::orchestrator::EntityOrchestrator;
use crate::pipeline::plan::RunPlan;
use crate::pipeline::summary::RunSummary;
use crate::store::repository::EntityCatalog;
use crate::store::sqlite::SqliteStore;
use crate::types::diagnosis::Diagnosis;
use crate::types::entity::Entity;
use crate::types::source::Source;
use bon::bon;
use chrono::{Days, Local, NaiveDate};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The weather ETL job: reads entities from the catalog, fetches both upstream
/// sources per entity and upserts the normalised records.
///
/// Create one with [`WeatherEtl::new`], which opens the database at
/// `database.path` and talks to AEMET over HTTPS.
///
/// # Examples
///
/// ```rust,no_run
/// # use aemet_etl::{Config, EtlError, WeatherEtl};
/// # #[tokio::main]
/// # async fn main() -> Result<(), EtlError> {
/// let config = Config::load(None)?;
/// let mut etl = WeatherEtl::new(config)?;
///
/// let summary = etl.run_all().call().await?;
/// println!("{}", summary);
/// # Ok(())
/// # }
/// ```
pub struct WeatherEtl {
    config: Config,
    resolver: IndirectionResolver,
    orchestrator: EntityOrchestrator<SqliteStore>,
}

#[bon]
impl WeatherEtl {
    /// Builds the production stack from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`EtlError::Config`] when no API key can be found, [`EtlError::HttpClient`]
    /// if the HTTP client cannot be built and [`EtlError::Store`] if the database cannot
    /// be opened.
    pub fn new(config: Config) -> Result<Self, EtlError> {
        let transport = ReqwestTransport::new(config.api.connect_timeout(), config.api.read_timeout())
            .map_err(EtlError::HttpClient)?;
        let store = SqliteStore::open(&config.database.path)?;
        Self::with_parts(config, Arc::new(transport), Arc::new(TokioSleeper), store)
    }

    /// Builds the job around an explicit transport, sleeper and store.
    pub fn with_parts(
        config: Config,
        transport: Arc<dyn HttpTransport>,
        sleeper: Arc<dyn Sleeper>,
        store: SqliteStore,
    ) -> Result<Self, EtlError> {
        let api_key = config.api_key()?;
        let fetcher = RetryingFetcher::new(transport, sleeper, config.retry.policy());
        let resolver = IndirectionResolver::builder()
            .fetcher(fetcher)
            .api_key(api_key)
            .base_url(config.api.base_url.clone())
            .build();
        let store = store.with_conflict_policy(config.run.forecast_conflict);
        let orchestrator =
            EntityOrchestrator::new(resolver.clone(), store, config.run.inter_entity_delay());

        Ok(Self {
            config,
            resolver,
            orchestrator,
        })
    }

    pub fn store(&self) -> &SqliteStore {
        self.orchestrator.repository()
    }

    /// Runs both sources for every entity in the catalog.
    ///
    /// # Arguments
    ///
    /// * `.today(NaiveDate)`: Optional. Invocation date; defaults to the local date.
    /// * `.retry_rounds(u32)`: Optional. Extra passes over incomplete entities; defaults to `run.retry_rounds`.
    ///
    /// # Errors
    ///
    /// Only a failure to read the catalog is returned as an error. Entities that could
    /// not be fetched or stored are listed in the returned [`RunSummary`].
    #[builder]
    pub async fn run_all(
        &mut self,
        today: Option<NaiveDate>,
        retry_rounds: Option<u32>,
    ) -> Result<RunSummary, EtlError> {
        let today = today.unwrap_or_else(|| Local::now().date_naive());
        let rounds = retry_rounds.unwrap_or(self.config.run.retry_rounds);
        let entities = self.store().list_entities()?;
        let plan = RunPlan::full(today, self.config.run.observation_offset_days);
        info!(
            "Processing {} entities (observation date {:?})",
            entities.len(),
            plan.observation_date
        );

        Ok(self
            .orchestrator
            .run_with_retries(&entities, &plan, rounds)
            .await)
    }

    /// Runs a single entity.
    ///
    /// With `.observation_date(..)` only that day's observation is fetched; with
    /// `.forecast_only(true)` only the forecast is fetched. Without either, both
    /// sources run as in [`WeatherEtl::run_all`].
    ///
    /// # Errors
    ///
    /// * [`EtlError::EntityNotFound`] if `entity_id` is not in the catalog.
    /// * [`EtlError::ConflictingRunModes`] if both modes are requested.
    #[builder]
    pub async fn run_entity(
        &mut self,
        entity_id: i64,
        observation_date: Option<NaiveDate>,
        #[builder(default)] forecast_only: bool,
        today: Option<NaiveDate>,
    ) -> Result<RunSummary, EtlError> {
        let today = today.unwrap_or_else(|| Local::now().date_naive());
        let plan = match (observation_date, forecast_only) {
            (Some(_), true) => return Err(EtlError::ConflictingRunModes),
            (Some(date), false) => RunPlan::observation_only(today, date),
            (None, true) => RunPlan::forecast_only(today),
            (None, false) => RunPlan::full(today, self.config.run.observation_offset_days),
        };
        let entity = self.find(entity_id)?;

        let outcome = self.orchestrator.process_entity(&entity, &plan).await;
        let mut summary = RunSummary::default();
        summary.record(entity.entity_id, &outcome);
        Ok(summary)
    }

    /// Fetches both raw payloads for one entity and writes them, pretty-printed, to
    /// `out_dir` as `OBSERVATION-<id>-<date>.json` and `FORECAST-<id>-<today>.json`.
    ///
    /// A source that cannot be fetched is logged and skipped. Returns the files written.
    ///
    /// # Arguments
    ///
    /// * `.entity_id(i64)`: **Required.**
    /// * `.days_ago(u64)`: Optional. Observation offset; defaults to `run.observation_offset_days`.
    /// * `.out_dir(PathBuf)`: Optional. Defaults to the current directory.
    /// * `.today(NaiveDate)`: Optional. Defaults to the local date.
    #[builder]
    pub async fn fetch_raw(
        &self,
        entity_id: i64,
        days_ago: Option<u64>,
        out_dir: Option<PathBuf>,
        today: Option<NaiveDate>,
    ) -> Result<Vec<PathBuf>, EtlError> {
        let today = today.unwrap_or_else(|| Local::now().date_naive());
        let days_ago = days_ago.unwrap_or(self.config.run.observation_offset_days);
        let out_dir = out_dir.unwrap_or_else(|| PathBuf::from("."));
        let entity = self.find(entity_id)?;
        let mut written = Vec::with_capacity(2);

        match today.checked_sub_days(Days::new(days_ago)) {
            Some(date) => match self.resolver.fetch_observation(&entity, date).await {
                Ok(raw) => {
                    let path = out_dir.join(Source::Observation.file_name(entity_id, date));
                    write_pretty(&path, &raw).await?;
                    written.push(path);
                }
                Err(e) => warn!("Skipping observation dump: {}", e),
            },
            None => warn!("Observation date {} days before {} is out of range", days_ago, today),
        }

        match self.resolver.fetch_forecast(&entity).await {
            Ok(raw) => {
                let path = out_dir.join(Source::Forecast.file_name(entity_id, today));
                write_pretty(&path, &raw).await?;
                written.push(path);
            }
            Err(e) => warn!("Skipping forecast dump: {}", e),
        }
        Ok(written)
    }

    /// Fetches and normalises both sources for one entity, returning the records a
    /// run would write. The store is never written.
    ///
    /// # Arguments
    ///
    /// * `.entity_id(i64)`: **Required.**
    /// * `.days_ago(u64)`: Optional. Observation offset; defaults to `run.observation_offset_days`.
    /// * `.today(NaiveDate)`: Optional. Defaults to the local date.
    ///
    /// # Errors
    ///
    /// [`EtlError::EntityNotFound`] if `entity_id` is not in the catalog. Fetch and
    /// normalisation problems are logged and leave the record out.
    #[builder]
    pub async fn diagnose(
        &self,
        entity_id: i64,
        days_ago: Option<u64>,
        today: Option<NaiveDate>,
    ) -> Result<Diagnosis, EtlError> {
        let today = today.unwrap_or_else(|| Local::now().date_naive());
        let days_ago = days_ago.unwrap_or(self.config.run.observation_offset_days);
        let plan = RunPlan::full(today, days_ago);
        let entity = self.find(entity_id)?;

        let observation = match plan.observation_date {
            Some(date) => match self.resolver.fetch_observation(&entity, date).await {
                Ok(raw) => {
                    let record = normalize_observation(Some(&raw), entity_id, date);
                    if record.is_none() {
                        warn!("Observation payload has no usable reading");
                    }
                    record
                }
                Err(e) => {
                    warn!("Observation fetch failed: {}", e);
                    None
                }
            },
            None => None,
        };
        let forecast = match self.resolver.fetch_forecast(&entity).await {
            Ok(raw) => {
                let record = normalize_forecast(Some(&raw), entity_id, today);
                if record.is_none() {
                    warn!("Forecast payload has no forecast for tomorrow");
                }
                record
            }
            Err(e) => {
                warn!("Forecast fetch failed: {}", e);
                None
            }
        };

        Ok(Diagnosis {
            entity,
            observation_date: plan.observation_date,
            observation,
            forecast,
        })
    }

    /// Registers `entity` in the catalog, replacing codes of an existing id.
    pub fn add_entity(&self, entity: &Entity) -> Result<(), EtlError> {
        self.store().add_entity(entity)?;
        info!(
            "Entity {} registered (postal code {}, station {})",
            entity.entity_id, entity.postal_code, entity.station_code
        );
        Ok(())
    }

    fn find(&self, entity_id: i64) -> Result<Entity, EtlError> {
        self.store()
            .find_entity(entity_id)?
            .ok_or(EtlError::EntityNotFound(entity_id))
    }
}

async fn write_pretty(path: &Path, value: &serde_json::Value) -> Result<(), EtlError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| EtlError::RawDumpJson(path.to_path_buf(), e))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EtlError::RawDump(path.to_path_buf(), e))?;
    }
    tokio::fs::write(path, json)
        .await
        .map_err(|e| EtlError::RawDump(path.to_path_buf(), e))?;
    info!("Wrote {}", path.display());
    Ok(())
}
