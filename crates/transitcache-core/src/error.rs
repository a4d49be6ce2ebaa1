use thiserror::Error;

use crate::lifecycle::LifecycleState;

/// Failures of a named cache store operation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid store name: {0}")]
    InvalidName(String),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt store entry: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Failures of an outbound network fetch.
///
/// A non-2xx response is not a fetch error; it comes back as a `Response`.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Network unreachable: {0}")]
    Unreachable(String),
}

#[derive(Error, Debug)]
pub enum RouterError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("Invalid manifest entry {entry}: {source}")]
    InvalidManifestEntry {
        entry: String,
        source: url::ParseError,
    },
}

pub type Result<T, E = RouterError> = std::result::Result<T, E>;
