use crate::fetch::error::{FetchError, LastStatus};
use crate::fetch::retry::{is_retryable_status, RetryPolicy};
use crate::fetch::transport::{HttpRequest, HttpTransport, Sleeper};
use crate::fetch::FetchContext;
use chrono::Utc;
use log::{error, warn};
use serde_json::Value;
use std::sync::Arc;

/// GET with bounded retries, returning parsed JSON or a terminal [`FetchError`].
///
/// Retryable failures are HTTP 429/500/502/503/504 and connection-level errors.
/// Any other non-2xx status ends the call immediately. Nothing is raised past this
/// boundary: every failure is a returned value carrying the entity/source context.
#[derive(Clone)]
pub struct RetryingFetcher {
    transport: Arc<dyn HttpTransport>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        sleeper: Arc<dyn Sleeper>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            sleeper,
            policy,
        }
    }

    pub(crate) fn sleeper(&self) -> Arc<dyn Sleeper> {
        Arc::clone(&self.sleeper)
    }

    /// Fetches `url` and parses the body as JSON.
    ///
    /// # Arguments
    ///
    /// * `url` - the full endpoint URL
    /// * `headers` - request headers sent on every attempt
    /// * `query` - query parameters sent on every attempt
    /// * `context` - entity and source the request belongs to, used for logs and errors
    pub async fn fetch(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        query: &[(&str, &str)],
        context: FetchContext,
    ) -> Result<Value, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let request = HttpRequest {
            url,
            headers,
            query,
        };
        let mut last_status = LastStatus::NoResponse;

        for attempt in 1..=max_attempts {
            let (status, retry_after) = match self.transport.get(request).await {
                Ok(response) if (200..300).contains(&response.status) => {
                    return serde_json::from_str(&response.body).map_err(|source| {
                        error!("{} - invalid JSON from {}: {}", context, url, source);
                        FetchError::InvalidJson {
                            context,
                            url: url.to_string(),
                            status: response.status,
                            source,
                        }
                    });
                }
                Ok(response) if is_retryable_status(response.status) => {
                    warn!(
                        "{} - status {}. Attempt {}/{}",
                        context, response.status, attempt, max_attempts
                    );
                    last_status = LastStatus::Http(response.status);
                    (Some(response.status), response.retry_after)
                }
                Ok(response) => {
                    error!(
                        "{} - request to {} rejected with status {}",
                        context, url, response.status
                    );
                    return Err(FetchError::Rejected {
                        context,
                        url: url.to_string(),
                        status: response.status,
                    });
                }
                Err(e) => {
                    warn!("{} - {}. Attempt {}/{}", context, e, attempt, max_attempts);
                    last_status = LastStatus::NoResponse;
                    (None, None)
                }
            };

            if attempt < max_attempts {
                let wait = self
                    .policy
                    .wait_for(status, retry_after.as_deref(), Utc::now());
                self.sleeper.sleep(wait).await;
            }
        }

        error!(
            "{} - giving up on {} after {} attempts ({})",
            context, url, max_attempts, last_status
        );
        Err(FetchError::Exhausted {
            context,
            attempts: max_attempts,
            last_status,
        })
    }
}
