use crate::aemet::endpoints::{build_forecast_endpoint, build_observation_endpoint, DEFAULT_BASE_URL};
use crate::aemet::error::ResolveError;
use crate::fetch::fetcher::RetryingFetcher;
use crate::fetch::FetchContext;
use crate::types::entity::Entity;
use crate::types::source::Source;
use bon::Builder;
use chrono::NaiveDate;
use log::{debug, error};
use serde_json::Value;

const POINTER_FIELD: &str = "datos";
const POINTER_HEADERS: [(&str, &str); 2] =
    [("cache-control", "no-cache"), ("accept", "application/json")];

/// Follows AEMET's two-stage responses.
///
/// The first call, authenticated with the API key, answers with metadata whose
/// `"datos"` field is the URL of the real payload. The second call fetches that URL
/// without the key. Both stages share the fetcher's retry policy.
#[derive(Clone, Builder)]
pub struct IndirectionResolver {
    fetcher: RetryingFetcher,
    #[builder(into)]
    api_key: String,
    #[builder(into, default = DEFAULT_BASE_URL.to_string())]
    base_url: String,
}

impl IndirectionResolver {
    pub fn fetcher(&self) -> &RetryingFetcher {
        &self.fetcher
    }

    /// Requests `endpoint_url`, extracts the `"datos"` pointer and returns the JSON it points to.
    pub async fn resolve_and_fetch(
        &self,
        endpoint_url: &str,
        context: FetchContext,
    ) -> Result<Value, ResolveError> {
        let query = [("api_key", self.api_key.as_str())];
        let metadata = self
            .fetcher
            .fetch(endpoint_url, &POINTER_HEADERS, &query, context)
            .await
            .map_err(ResolveError::Pointer)?;

        let Some(data_url) = metadata.get(POINTER_FIELD).and_then(Value::as_str) else {
            error!("{} - '{}' key missing in response", context, POINTER_FIELD);
            return Err(ResolveError::MissingPointer { context });
        };
        debug!("{} - payload at {}", context, data_url);

        self.fetcher
            .fetch(data_url, &[], &[], context)
            .await
            .map_err(ResolveError::Payload)
    }

    /// Raw daily station readings for `date`.
    pub async fn fetch_observation(
        &self,
        entity: &Entity,
        date: NaiveDate,
    ) -> Result<Value, ResolveError> {
        let endpoint = build_observation_endpoint(&self.base_url, &entity.station_code, date);
        let context = FetchContext::new(entity.entity_id, Source::Observation);
        self.resolve_and_fetch(&endpoint, context).await
    }

    /// Raw hourly municipal forecast.
    pub async fn fetch_forecast(&self, entity: &Entity) -> Result<Value, ResolveError> {
        let endpoint = build_forecast_endpoint(&self.base_url, &entity.postal_code);
        let context = FetchContext::new(entity.entity_id, Source::Forecast);
        self.resolve_and_fetch(&endpoint, context).await
    }
}
