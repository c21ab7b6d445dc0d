use std::fmt;
use thiserror::Error;

/// Failure to resolve or run an invocation.
///
/// A remote system answering with HTTP 4xx/5xx or a SOAP Fault is *not* an
/// error here: that is reported as `Response { success: false, .. }` so
/// callers can tell "could not try" apart from "tried and the remote said no".
#[derive(Debug, Error)]
pub enum GiError {
    #[error("webservice {0} not found")]
    WebserviceNotFound(String),

    #[error("webservice {webservice:?} is not valid/active")]
    WebserviceInactive { webservice: String },

    #[error("invoker {invoker:?} not found in webservice {webservice:?}")]
    InvokerNotFound { webservice: String, invoker: String },

    #[error("transport type {0:?} not registered")]
    TransportNotRegistered(String),

    #[error("transport execution error in {webservice}.{invoker}: {source}")]
    Transport {
        webservice: String,
        invoker: String,
        #[source]
        source: TransportError,
    },

    #[error("{direction} mapping error in {webservice}.{invoker}: {source}")]
    Mapping {
        direction: MappingDirection,
        webservice: String,
        invoker: String,
        #[source]
        source: MappingError,
    },

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Transport-level failure: the request never produced an HTTP response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid transport config: {0}")]
    InvalidConfig(String),

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to marshal request body: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Request(e) if e.is_timeout())
    }
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("invalid mapping config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingDirection {
    Outbound,
    Inbound,
}

impl fmt::Display for MappingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingDirection::Outbound => f.write_str("outbound"),
            MappingDirection::Inbound => f.write_str("inbound"),
        }
    }
}

/// Errors raised by `WebserviceRepository` implementations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("webservice name {0:?} already exists")]
    NameTaken(String),

    #[error("config serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
