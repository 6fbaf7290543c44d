use crate::fetch::error::FetchError;
use crate::fetch::FetchContext;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("pointer request failed")]
    Pointer(#[source] FetchError),

    // The server answered, but without a usable "datos" link.
    #[error("{context}: response has no 'datos' pointer")]
    MissingPointer { context: FetchContext },

    #[error("payload request failed")]
    Payload(#[source] FetchError),
}

impl ResolveError {
    pub fn context(&self) -> FetchContext {
        match self {
            ResolveError::Pointer(e) | ResolveError::Payload(e) => e.context(),
            ResolveError::MissingPointer { context } => *context,
        }
    }
}
