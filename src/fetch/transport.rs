//! The single-attempt HTTP seam and the wait seam used by [`crate::RetryingFetcher`].
//!
//! Both are traits so that the retry loop can be driven by scripted responses and a
//! simulated clock in tests; production uses [`ReqwestTransport`] and [`TokioSleeper`].

use async_trait::async_trait;
use log::debug;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// One GET request, borrowed from the caller.
#[derive(Debug, Clone, Copy)]
pub struct HttpRequest<'a> {
    pub url: &'a str,
    pub headers: &'a [(&'a str, &'a str)],
    pub query: &'a [(&'a str, &'a str)],
}

/// What came back from a single attempt, whatever the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub retry_after: Option<String>,
    pub body: String,
}

/// Connection-level failure: nothing usable came back from the server.
#[derive(Debug, Error)]
#[error("{kind} error for {url}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub url: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Body,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Body => "body",
            TransportErrorKind::Other => "request",
        };
        write!(f, "{}", label)
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Performs exactly one attempt. Non-2xx statuses are returned, not raised.
    async fn get(&self, request: HttpRequest<'_>) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock waiting on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// `reqwest` backed transport with bounded connect and read timeouts per attempt.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()?;
        Ok(Self { client })
    }

    fn classify(url: &str, e: reqwest::Error) -> TransportError {
        let kind = if e.is_timeout() {
            TransportErrorKind::Timeout
        } else if e.is_connect() {
            TransportErrorKind::Connect
        } else if e.is_body() || e.is_decode() {
            TransportErrorKind::Body
        } else {
            TransportErrorKind::Other
        };
        TransportError {
            kind,
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, request: HttpRequest<'_>) -> Result<HttpResponse, TransportError> {
        debug!("GET {}", request.url);
        let mut builder = self.client.get(request.url);
        for (name, value) in request.headers {
            builder = builder.header(*name, *value);
        }
        if !request.query.is_empty() {
            builder = builder.query(request.query);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Self::classify(request.url, e))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        // Payload hosts may declare a non UTF-8 charset; text() decodes it.
        let body = response
            .text()
            .await
            .map_err(|e| Self::classify(request.url, e))?;

        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}
