use crate::fetch::FetchContext;
use std::fmt;
use thiserror::Error;

/// The last thing observed from the server before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastStatus {
    Http(u16),
    NoResponse,
}

impl fmt::Display for LastStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LastStatus::Http(code) => write!(f, "status {}", code),
            LastStatus::NoResponse => write!(f, "no response"),
        }
    }
}

/// Terminal outcome of a [`crate::RetryingFetcher::fetch`] call that did not yield JSON.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{context}: gave up after {attempts} attempts ({last_status})")]
    Exhausted {
        context: FetchContext,
        attempts: u32,
        last_status: LastStatus,
    },

    #[error("{context}: request to {url} rejected with status {status}")]
    Rejected {
        context: FetchContext,
        url: String,
        status: u16,
    },

    #[error("{context}: response from {url} is not valid JSON")]
    InvalidJson {
        context: FetchContext,
        url: String,
        status: u16,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn context(&self) -> FetchContext {
        match self {
            FetchError::Exhausted { context, .. }
            | FetchError::Rejected { context, .. }
            | FetchError::InvalidJson { context, .. } => *context,
        }
    }

    /// HTTP status of the last response, if any response was received at all.
    pub fn last_status(&self) -> LastStatus {
        match self {
            FetchError::Exhausted { last_status, .. } => *last_status,
            FetchError::Rejected { status, .. } => LastStatus::Http(*status),
            FetchError::InvalidJson { status, .. } => LastStatus::Http(*status),
        }
    }
}
