use crate::aemet::error::ResolveError;
use crate::aemet::resolver::IndirectionResolver;
use crate::fetch::transport::Sleeper;
use crate::normalize::forecast::normalize_forecast;
use crate::normalize::observation::normalize_observation;
use crate::pipeline::outcome::{EntityOutcome, FailureCause};
use crate::pipeline::plan::RunPlan;
use crate::pipeline::summary::RunSummary;
use crate::store::error::StoreError;
use crate::store::repository::Repository;
use crate::types::entity::Entity;
use crate::types::records::{ForecastRecord, ObservationRecord};
use crate::types::source::Source;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_INTER_ENTITY_DELAY: Duration = Duration::from_secs(10);

/// Drives every entity through FETCH → TRANSFORM → LOAD, one entity at a time.
///
/// The repository connection is held for the whole run and committed once per
/// entity. Between entities the orchestrator waits `inter_entity_delay`, whatever
/// the outcome, to stay under the upstream rate limit.
pub struct EntityOrchestrator<R: Repository> {
    resolver: IndirectionResolver,
    repository: R,
    sleeper: Arc<dyn Sleeper>,
    inter_entity_delay: Duration,
}

/// Records produced by one entity's TRANSFORM stage.
struct Transformed {
    observation: Option<ObservationRecord>,
    forecast: Option<ForecastRecord>,
}

impl<R: Repository> EntityOrchestrator<R> {
    /// Waits between entities go through the resolver's sleeper.
    pub fn new(resolver: IndirectionResolver, repository: R, inter_entity_delay: Duration) -> Self {
        let sleeper = resolver.fetcher().sleeper();
        Self {
            resolver,
            repository,
            sleeper,
            inter_entity_delay,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn into_repository(self) -> R {
        self.repository
    }

    /// Processes `entities` in order and returns who succeeded, who is partial and who failed.
    pub async fn run(&mut self, entities: &[Entity], plan: &RunPlan) -> RunSummary {
        let work: Vec<(Entity, RunPlan)> = entities.iter().map(|e| (e.clone(), *plan)).collect();
        self.run_planned(&work).await
    }

    /// Like [`EntityOrchestrator::run`], then re-drives the partial and failed
    /// entities for up to `rounds` extra passes.
    ///
    /// A partial entity is re-driven for its missing sources only; a side committed
    /// in an earlier round is neither fetched again nor forgotten.
    pub async fn run_with_retries(
        &mut self,
        entities: &[Entity],
        plan: &RunPlan,
        rounds: u32,
    ) -> RunSummary {
        let mut summary = self.run(entities, plan).await;

        for round in 1..=rounds {
            if summary.is_success() {
                break;
            }
            let retry: Vec<(Entity, RunPlan)> = entities
                .iter()
                .filter_map(|entity| {
                    let id = entity.entity_id;
                    if let Some((_, missing)) = summary.partial.iter().find(|(p, _)| *p == id) {
                        Some((entity.clone(), plan.restricted_to(missing)))
                    } else if summary.failed.contains(&id) {
                        Some((entity.clone(), *plan))
                    } else {
                        None
                    }
                })
                .collect();
            info!(
                "Retry round {}/{} for {} entities",
                round,
                rounds,
                retry.len()
            );
            let round_summary = self.run_planned(&retry).await;
            summary.absorb(round_summary);
        }
        summary
    }

    async fn run_planned(&mut self, work: &[(Entity, RunPlan)]) -> RunSummary {
        let mut summary = RunSummary::default();
        for (entity, plan) in work {
            let outcome = self.process_entity(entity, plan).await;
            summary.record(entity.entity_id, &outcome);
            self.sleeper.sleep(self.inter_entity_delay).await;
        }

        if summary.is_success() {
            info!("All {} entities processed successfully", work.len());
        } else {
            warn!(
                "{} of {} entities incomplete: {:?}",
                summary.incomplete_ids().len(),
                work.len(),
                summary.incomplete_ids()
            );
        }
        summary
    }

    /// Runs the three stages for a single entity. Never fails: every problem ends up
    /// in the returned [`EntityOutcome`].
    pub async fn process_entity(&mut self, entity: &Entity, plan: &RunPlan) -> EntityOutcome {
        let (raw_observation, raw_forecast) = self.fetch(entity, plan).await;
        let transformed = Self::transform(entity, plan, raw_observation, raw_forecast);
        let outcome = self.load(entity, plan, transformed);

        match &outcome {
            EntityOutcome::Committed => info!("Entity {} - {}", entity.entity_id, outcome),
            _ => warn!("Entity {} - {}", entity.entity_id, outcome),
        }
        outcome
    }

    async fn fetch(&self, entity: &Entity, plan: &RunPlan) -> (Option<Value>, Option<Value>) {
        let observation = match plan.observation_date {
            Some(date) => self
                .resolver
                .fetch_observation(entity, date)
                .await
                .inspect_err(|e| debug!("{}", describe(e)))
                .ok(),
            None => None,
        };
        let forecast = if plan.forecast {
            self.resolver
                .fetch_forecast(entity)
                .await
                .inspect_err(|e| debug!("{}", describe(e)))
                .ok()
        } else {
            None
        };
        (observation, forecast)
    }

    fn transform(
        entity: &Entity,
        plan: &RunPlan,
        raw_observation: Option<Value>,
        raw_forecast: Option<Value>,
    ) -> Transformed {
        let observation = plan.observation_date.and_then(|date| {
            let record = normalize_observation(raw_observation.as_ref(), entity.entity_id, date);
            if record.is_none() && raw_observation.is_some() {
                warn!(
                    "{} - entity {} - payload has no usable reading",
                    Source::Observation,
                    entity.entity_id
                );
            }
            record
        });
        let forecast = if plan.forecast {
            let record = normalize_forecast(raw_forecast.as_ref(), entity.entity_id, plan.today);
            if record.is_none() && raw_forecast.is_some() {
                warn!(
                    "{} - entity {} - payload has no forecast for tomorrow",
                    Source::Forecast,
                    entity.entity_id
                );
            }
            record
        } else {
            None
        };
        Transformed {
            observation,
            forecast,
        }
    }

    fn load(&mut self, entity: &Entity, plan: &RunPlan, records: Transformed) -> EntityOutcome {
        if records.observation.is_none() && records.forecast.is_none() {
            return EntityOutcome::Failed {
                cause: FailureCause::NoData,
            };
        }

        let written = match self.write(&records) {
            Ok(written) => written,
            Err(e) => {
                error!("Entity {} - database error: {}", entity.entity_id, e);
                if let Err(rollback) = self.repository.rollback() {
                    error!("Entity {} - rollback failed: {}", entity.entity_id, rollback);
                }
                return EntityOutcome::Failed {
                    cause: FailureCause::Persistence(e.to_string()),
                };
            }
        };

        let missing: Vec<Source> = plan
            .requested()
            .into_iter()
            .filter(|source| !written.contains(source))
            .collect();
        if missing.is_empty() {
            EntityOutcome::Committed
        } else {
            EntityOutcome::Partial { missing }
        }
    }

    /// Upserts whatever records exist inside one transaction and commits it.
    fn write(&mut self, records: &Transformed) -> Result<Vec<Source>, StoreError> {
        let mut written = Vec::with_capacity(2);
        self.repository.begin()?;
        if let Some(observation) = &records.observation {
            self.repository.upsert_observation(observation)?;
            written.push(Source::Observation);
        }
        if let Some(forecast) = &records.forecast {
            self.repository.upsert_forecast(forecast)?;
            written.push(Source::Forecast);
        }
        self.repository.commit()?;
        Ok(written)
    }
}

/// `"<stage> failed: <cause>"` on one line.
fn describe(e: &ResolveError) -> String {
    match std::error::Error::source(e) {
        Some(cause) => format!("{}: {}", e, cause),
        None => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aemet::endpoints::{build_forecast_endpoint, build_observation_endpoint};
    use crate::fetch::fetcher::testing::{RecordingSleeper, Scripted, ScriptedTransport};
    use crate::fetch::error::FetchError;
    use crate::fetch::fetcher::RetryingFetcher;
    use crate::fetch::FetchContext;
    use crate::fetch::retry::RetryPolicy;
    use crate::store::sqlite::SqliteStore;
    use chrono::NaiveDate;
    use serde_json::json;

    const BASE: &str = "http://aemet.test/api";
    const DELAY: Duration = Duration::from_secs(10);

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 5).unwrap()
    }

    fn observation_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 30).unwrap()
    }

    fn tomorrow() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 6).unwrap()
    }

    fn plan() -> RunPlan {
        RunPlan::full(today(), 6)
    }

    fn madrid() -> Entity {
        Entity::new(7, "28079", "3195")
    }

    fn barcelona() -> Entity {
        Entity::new(8, "08019", "0076")
    }

    fn observation_url(entity: &Entity) -> String {
        build_observation_endpoint(BASE, &entity.station_code, observation_date())
    }

    fn forecast_url(entity: &Entity) -> String {
        build_forecast_endpoint(BASE, &entity.postal_code)
    }

    fn payload_url(entity: &Entity, source: Source) -> String {
        format!("http://aemet.test/sh/{}/{}", source, entity.entity_id)
    }

    fn pointer(entity: &Entity, source: Source) -> Scripted {
        Scripted::Json(json!({ "estado": 200, "datos": payload_url(entity, source) }).to_string())
    }

    fn observation_payload() -> Scripted {
        Scripted::Json(
            json!([{ "prec": "0,4", "tmed": "10,5", "tmax": "15,2", "tmin": "5,1",
                     "hrMedia": "50", "hrMax": "60", "hrMin": "40" }])
            .to_string(),
        )
    }

    fn forecast_payload() -> Scripted {
        Scripted::Json(
            json!([{ "prediccion": { "dia": [
                {},
                {
                    "temperatura": [{ "periodo": "00", "value": "5" }, { "periodo": "01", "value": "15" }],
                    "humedadRelativa": [{ "periodo": "00", "value": "70" }],
                    "precipitacion": [{ "periodo": "00", "value": "Ip" }]
                }
            ] } }])
            .to_string(),
        )
    }

    /// Scripts both sources of `entity` to succeed once.
    fn healthy(transport: ScriptedTransport, entity: &Entity) -> ScriptedTransport {
        transport
            .script(&observation_url(entity), vec![pointer(entity, Source::Observation)])
            .script(
                &payload_url(entity, Source::Observation),
                vec![observation_payload()],
            )
            .script(&forecast_url(entity), vec![pointer(entity, Source::Forecast)])
            .script(&payload_url(entity, Source::Forecast), vec![forecast_payload()])
    }

    fn orchestrator<R: Repository>(
        transport: ScriptedTransport,
        repository: R,
    ) -> (EntityOrchestrator<R>, Arc<ScriptedTransport>, Arc<RecordingSleeper>) {
        let transport = Arc::new(transport);
        let sleeper = Arc::new(RecordingSleeper::default());
        let policy = RetryPolicy::builder()
            .max_attempts(2)
            .delay(Duration::from_secs(1))
            .build();
        let fetcher = RetryingFetcher::new(transport.clone(), sleeper.clone(), policy);
        let resolver = IndirectionResolver::builder()
            .fetcher(fetcher)
            .api_key("secret")
            .base_url(BASE)
            .build();
        (
            EntityOrchestrator::new(resolver, repository, DELAY),
            transport,
            sleeper,
        )
    }

    /// Delegates to an in-memory store but rejects every forecast write.
    struct ForecastRejectingStore(SqliteStore);

    impl Repository for ForecastRejectingStore {
        fn begin(&mut self) -> Result<(), StoreError> {
            self.0.begin()
        }
        fn upsert_observation(&mut self, record: &ObservationRecord) -> Result<(), StoreError> {
            self.0.upsert_observation(record)
        }
        fn upsert_forecast(&mut self, _record: &ForecastRecord) -> Result<(), StoreError> {
            Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery))
        }
        fn commit(&mut self) -> Result<(), StoreError> {
            self.0.commit()
        }
        fn rollback(&mut self) -> Result<(), StoreError> {
            self.0.rollback()
        }
    }

    #[tokio::test]
    async fn test_both_sources_commit() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (mut orchestrator, _transport, _sleeper) =
            orchestrator(healthy(ScriptedTransport::new(), &madrid()), store);

        let outcome = orchestrator.process_entity(&madrid(), &plan()).await;

        assert_eq!(outcome, EntityOutcome::Committed);
        let store = orchestrator.repository();
        let observation = store.observation(7, observation_date()).unwrap().unwrap();
        assert_eq!(observation.temperature_avg, Some(10));
        assert_eq!(observation.precipitation, Some(0.4));
        let forecast = store.forecast(7, tomorrow()).unwrap().unwrap();
        assert_eq!(forecast.temperature_max, Some(15.0));
        assert_eq!(forecast.temperature_avg, Some(10));
        assert_eq!(forecast.precipitations, Some(json!([{ "periodo": "00", "value": "Ip" }])));
    }

    #[tokio::test]
    async fn test_forecast_failure_is_partial_and_observation_committed() {
        let entity = madrid();
        let transport = ScriptedTransport::new()
            .script(&observation_url(&entity), vec![pointer(&entity, Source::Observation)])
            .script(
                &payload_url(&entity, Source::Observation),
                vec![observation_payload()],
            )
            .script(
                &forecast_url(&entity),
                vec![Scripted::Status(500), Scripted::Status(500)],
            );
        let store = SqliteStore::open_in_memory().unwrap();
        let (mut orchestrator, _transport, _sleeper) = orchestrator(transport, store);

        let summary = orchestrator.run(&[entity], &plan()).await;

        assert_eq!(summary.partial, vec![(7, vec![Source::Forecast])]);
        assert_eq!(summary.incomplete_ids(), vec![7]);
        assert!(!summary.is_success());
        let store = orchestrator.repository();
        assert!(store.observation(7, observation_date()).unwrap().is_some());
        assert!(store.forecast(7, tomorrow()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_data_fails_without_writing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (mut orchestrator, _transport, _sleeper) = orchestrator(ScriptedTransport::new(), store);

        let outcome = orchestrator.process_entity(&madrid(), &plan()).await;

        assert_eq!(
            outcome,
            EntityOutcome::Failed {
                cause: FailureCause::NoData
            }
        );
        assert_eq!(orchestrator.repository().count_weather_rows().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unusable_payload_counts_as_missing() {
        let entity = madrid();
        // A one-day forecast has no "tomorrow".
        let transport = ScriptedTransport::new()
            .script(&observation_url(&entity), vec![pointer(&entity, Source::Observation)])
            .script(
                &payload_url(&entity, Source::Observation),
                vec![observation_payload()],
            )
            .script(&forecast_url(&entity), vec![pointer(&entity, Source::Forecast)])
            .script(
                &payload_url(&entity, Source::Forecast),
                vec![Scripted::Json(json!([{ "prediccion": { "dia": [{}] } }]).to_string())],
            );
        let store = SqliteStore::open_in_memory().unwrap();
        let (mut orchestrator, _transport, _sleeper) = orchestrator(transport, store);

        let outcome = orchestrator.process_entity(&entity, &plan()).await;

        assert_eq!(
            outcome,
            EntityOutcome::Partial {
                missing: vec![Source::Forecast]
            }
        );
    }

    #[tokio::test]
    async fn test_persistence_failure_rolls_back_entity() {
        let store = ForecastRejectingStore(SqliteStore::open_in_memory().unwrap());
        let (mut orchestrator, _transport, _sleeper) =
            orchestrator(healthy(ScriptedTransport::new(), &madrid()), store);

        let outcome = orchestrator.process_entity(&madrid(), &plan()).await;

        assert!(matches!(
            outcome,
            EntityOutcome::Failed {
                cause: FailureCause::Persistence(_)
            }
        ));
        let store = orchestrator.into_repository().0;
        assert!(store.observation(7, observation_date()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_abort_run() {
        let store = ForecastRejectingStore(SqliteStore::open_in_memory().unwrap());
        let transport = healthy(healthy(ScriptedTransport::new(), &madrid()), &barcelona());
        let (mut orchestrator, transport, _sleeper) = orchestrator(transport, store);

        let summary = orchestrator.run(&[madrid(), barcelona()], &plan()).await;

        assert_eq!(summary.failed, vec![7, 8]);
        assert_eq!(transport.calls_to(&forecast_url(&barcelona())), 1);
    }

    #[tokio::test]
    async fn test_sleeps_after_every_entity() {
        let store = SqliteStore::open_in_memory().unwrap();
        let transport = healthy(ScriptedTransport::new(), &madrid());
        let (mut orchestrator, _transport, sleeper) = orchestrator(transport, store);

        // Barcelona is unscripted: every request answers 404, which is not retried.
        let summary = orchestrator.run(&[madrid(), barcelona()], &plan()).await;

        assert_eq!(summary.succeeded, vec![7]);
        assert_eq!(summary.failed, vec![8]);
        assert_eq!(*sleeper.waits.lock().unwrap(), vec![DELAY, DELAY]);
    }

    #[tokio::test]
    async fn test_entities_are_processed_in_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let transport = healthy(healthy(ScriptedTransport::new(), &madrid()), &barcelona());
        let (mut orchestrator, transport, _sleeper) = orchestrator(transport, store);

        orchestrator.run(&[madrid(), barcelona()], &plan()).await;

        let requests = transport.requests.lock().unwrap();
        let urls: Vec<&str> = requests.iter().map(|(url, _, _)| url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                observation_url(&madrid()).as_str(),
                payload_url(&madrid(), Source::Observation).as_str(),
                forecast_url(&madrid()).as_str(),
                payload_url(&madrid(), Source::Forecast).as_str(),
                observation_url(&barcelona()).as_str(),
                payload_url(&barcelona(), Source::Observation).as_str(),
                forecast_url(&barcelona()).as_str(),
                payload_url(&barcelona(), Source::Forecast).as_str(),
            ]
        );
    }

    #[tokio::test]
    async fn test_unrequested_source_is_not_missing() {
        let entity = madrid();
        let transport = ScriptedTransport::new()
            .script(&observation_url(&entity), vec![pointer(&entity, Source::Observation)])
            .script(
                &payload_url(&entity, Source::Observation),
                vec![observation_payload()],
            );
        let store = SqliteStore::open_in_memory().unwrap();
        let (mut orchestrator, transport, _sleeper) = orchestrator(transport, store);
        let plan = RunPlan::observation_only(today(), observation_date());

        let outcome = orchestrator.process_entity(&entity, &plan).await;

        assert_eq!(outcome, EntityOutcome::Committed);
        assert_eq!(transport.calls_to(&forecast_url(&entity)), 0);
    }

    #[tokio::test]
    async fn test_retry_rounds_redrive_only_incomplete() {
        let entity = madrid();
        let transport = healthy(ScriptedTransport::new(), &barcelona())
            .script(
                &observation_url(&entity),
                vec![Scripted::Status(404), pointer(&entity, Source::Observation)],
            )
            .script(
                &payload_url(&entity, Source::Observation),
                vec![observation_payload()],
            )
            .script(
                &forecast_url(&entity),
                vec![Scripted::Status(404), pointer(&entity, Source::Forecast)],
            )
            .script(&payload_url(&entity, Source::Forecast), vec![forecast_payload()]);
        let store = SqliteStore::open_in_memory().unwrap();
        let (mut orchestrator, transport, _sleeper) = orchestrator(transport, store);

        let summary = orchestrator
            .run_with_retries(&[entity.clone(), barcelona()], &plan(), 2)
            .await;

        assert!(summary.is_success());
        assert_eq!(summary.succeeded, vec![8, 7]);
        assert_eq!(transport.calls_to(&observation_url(&barcelona())), 1);
        assert_eq!(transport.calls_to(&observation_url(&entity)), 2);
        let store = orchestrator.repository();
        assert!(store.observation(7, observation_date()).unwrap().is_some());
        assert!(store.forecast(7, tomorrow()).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_retry_rounds_fetch_only_missing_source() {
        let entity = madrid();
        // Round 0 commits the observation and loses the forecast. The observation
        // would fail if it were asked for again in round 1.
        let transport = ScriptedTransport::new()
            .script(
                &observation_url(&entity),
                vec![
                    pointer(&entity, Source::Observation),
                    Scripted::Status(500),
                    Scripted::Status(500),
                ],
            )
            .script(
                &payload_url(&entity, Source::Observation),
                vec![observation_payload()],
            )
            .script(
                &forecast_url(&entity),
                vec![
                    Scripted::Status(500),
                    Scripted::Status(500),
                    pointer(&entity, Source::Forecast),
                ],
            )
            .script(&payload_url(&entity, Source::Forecast), vec![forecast_payload()]);
        let store = SqliteStore::open_in_memory().unwrap();
        let (mut orchestrator, transport, _sleeper) = orchestrator(transport, store);

        let summary = orchestrator
            .run_with_retries(&[entity.clone()], &plan(), 1)
            .await;

        assert!(summary.is_success());
        assert_eq!(summary.succeeded, vec![7]);
        assert_eq!(summary.to_string(), "All entities processed successfully.");
        assert_eq!(transport.calls_to(&observation_url(&entity)), 1);
        let store = orchestrator.repository();
        assert!(store.observation(7, observation_date()).unwrap().is_some());
        assert!(store.forecast(7, tomorrow()).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_redrive_keeps_earlier_partial() {
        let entity = madrid();
        let transport = ScriptedTransport::new()
            .script(&observation_url(&entity), vec![pointer(&entity, Source::Observation)])
            .script(
                &payload_url(&entity, Source::Observation),
                vec![observation_payload()],
            )
            .script(
                &forecast_url(&entity),
                vec![Scripted::Status(404), Scripted::Status(404)],
            );
        let store = SqliteStore::open_in_memory().unwrap();
        let (mut orchestrator, _transport, _sleeper) = orchestrator(transport, store);

        let summary = orchestrator
            .run_with_retries(&[entity.clone()], &plan(), 1)
            .await;

        assert_eq!(summary.partial, vec![(7, vec![Source::Forecast])]);
        assert!(summary.failed.is_empty());
    }

    #[test]
    fn test_describe_prints_cause_once() {
        let err = ResolveError::Pointer(FetchError::Rejected {
            context: FetchContext::new(7, Source::Forecast),
            url: "http://aemet.test/api/x".to_string(),
            status: 401,
        });
        let line = describe(&err);
        assert!(line.starts_with("pointer request failed: "));
        assert_eq!(line.matches("rejected with status 401").count(), 1);
    }
}
