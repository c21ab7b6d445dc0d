//! GenericInterface requester: config-driven outbound REST/SOAP calls.
//!
//! Library crate used by the `gi` binary and the integration tests in `tests/`.

pub mod cache;
pub mod config;
pub mod errors;
pub mod field;
pub mod mapping;
pub mod models;
pub mod service;
pub mod store;
pub mod transport;

pub use errors::GiError;
pub use service::InvocationService;
