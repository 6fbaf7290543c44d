mod aemet;
mod config;
mod error;
mod etl;
mod fetch;
mod normalize;
mod pipeline;
mod store;
mod types;

pub use error::EtlError;
pub use etl::WeatherEtl;

pub use config::{
    default_config_path, ApiConfig, Config, ConfigError, DatabaseConfig, LoggingConfig,
    RetryConfig, RunConfig, API_KEY_ENV,
};

pub use types::diagnosis::Diagnosis;
pub use types::entity::Entity;
pub use types::records::{ForecastRecord, ObservationRecord};
pub use types::source::Source;

pub use fetch::error::{FetchError, LastStatus};
pub use fetch::fetcher::RetryingFetcher;
pub use fetch::retry::{is_retryable_status, parse_retry_after, RetryPolicy};
pub use fetch::transport::{
    HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, Sleeper, TokioSleeper,
    TransportError, TransportErrorKind,
};
pub use fetch::FetchContext;

pub use aemet::endpoints::{build_forecast_endpoint, build_observation_endpoint, DEFAULT_BASE_URL};
pub use aemet::error::ResolveError;
pub use aemet::resolver::IndirectionResolver;

pub use normalize::forecast::{normalize_forecast, SeriesStats};
pub use normalize::number::{normalize_integer, normalize_number, normalize_temperature};
pub use normalize::observation::normalize_observation;

pub use store::error::StoreError;
pub use store::repository::{ConflictPolicy, EntityCatalog, Repository};
pub use store::sqlite::SqliteStore;

pub use pipeline::orchestrator::EntityOrchestrator;
pub use pipeline::outcome::{EntityOutcome, FailureCause};
pub use pipeline::plan::RunPlan;
pub use pipeline::summary::RunSummary;
