//! Wire transports for outbound webservice calls.
//!
//! A transport turns a `Request` plus the webservice's HTTP settings into one
//! HTTP round-trip. The `Err` path is reserved for transport-level failure
//! (DNS, refused connection, timeout, unusable config). Anything the remote
//! side says, including HTTP 4xx/5xx and SOAP Faults, comes back as
//! `Ok(Response { success: false, .. })`.

pub mod auth;
pub mod client;
pub mod rest;
pub mod soap;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::TransportError;
use crate::models::{Payload, TransportHttpConfig};

pub use client::HttpSettings;
pub use rest::RestTransport;
pub use soap::SoapTransport;

/// Registry key of the JSON-over-HTTP transport.
pub const REST: &str = "HTTP::REST";
/// Registry key of the SOAP 1.1 transport.
pub const SOAP: &str = "HTTP::SOAP";

/// One outbound call.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Invoker / operation name.
    pub operation: String,
    pub data: Payload,
    /// Overrides the config-derived HTTP method.
    pub method: Option<String>,
    /// Overrides the config-derived path. May contain `:name` placeholders.
    pub path: Option<String>,
}

impl Request {
    pub fn new(operation: impl Into<String>, data: Payload) -> Self {
        Self {
            operation: operation.into(),
            data,
            method: None,
            path: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into()).filter(|m: &String| !m.is_empty());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into()).filter(|p: &String| !p.is_empty());
        self
    }
}

/// Result of one HTTP round-trip. Check `success` before using `data`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Response {
    pub success: bool,
    pub data: Option<Payload>,
    #[serde(skip)]
    pub raw: Bytes,
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub error: Option<String>,
}

impl Response {
    fn from_http(status: StatusCode, headers: &HeaderMap, raw: Bytes) -> Self {
        let mut flat = HashMap::with_capacity(headers.len());
        for (name, value) in headers {
            // First value wins for repeated headers.
            flat.entry(name.as_str().to_string())
                .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
        Self {
            success: status.is_success(),
            data: None,
            raw,
            status_code: status.as_u16(),
            headers: flat,
            error: None,
        }
    }

    /// Response body as (lossy) UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }

    /// Fill `error` with `HTTP <code>: <body>` for a failed call that has no
    /// more specific explanation yet.
    fn set_http_error(&mut self) {
        if !self.success && self.error.is_none() {
            self.error = Some(format!("HTTP {}: {}", self.status_code, self.text()));
        }
    }
}

/// A wire protocol implementation, selected by `Requester.Transport.Type`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Registry key, e.g. `HTTP::REST`.
    fn kind(&self) -> &str;

    /// Execute `request` against the remote system described by `config`.
    async fn execute(
        &self,
        config: &TransportHttpConfig,
        request: &Request,
    ) -> Result<Response, TransportError>;

    /// Probe connectivity. Any HTTP answer, even 404, counts as reachable.
    async fn test_connection(&self, config: &TransportHttpConfig) -> Result<(), TransportError>;
}

/// Transports by kind. Populated at startup; cheap to clone.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    transports: Arc<DashMap<String, Arc<dyn Transport>>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the REST and SOAP transports.
    pub fn with_defaults(settings: HttpSettings) -> Result<Self, TransportError> {
        let registry = Self::new();
        registry.register(Arc::new(RestTransport::new(settings)?));
        registry.register(Arc::new(SoapTransport::new(settings)?));
        Ok(registry)
    }

    /// Add or replace the transport registered under `transport.kind()`.
    pub fn register(&self, transport: Arc<dyn Transport>) {
        let kind = transport.kind().to_string();
        tracing::debug!(transport = %kind, "registered transport");
        self.transports.insert(kind, transport);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Transport>> {
        self.transports.get(kind).map(|t| Arc::clone(t.value()))
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.transports.iter().map(|e| e.key().clone()).collect();
        kinds.sort();
        kinds
    }
}

/// Insert a header, replacing any previous value for that name.
pub(crate) fn insert_header(
    headers: &mut HeaderMap,
    name: &str,
    value: &str,
) -> Result<(), TransportError> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| TransportError::InvalidConfig(format!("invalid header name {:?}", name)))?;
    let value = HeaderValue::from_str(value).map_err(|_| {
        TransportError::InvalidConfig(format!("invalid value for header {:?}", name.as_str()))
    })?;
    headers.insert(name, value);
    Ok(())
}

/// Apply `AdditionalHeaders` from the config.
pub(crate) fn apply_additional_headers(
    headers: &mut HeaderMap,
    config: &TransportHttpConfig,
) -> Result<(), TransportError> {
    for (name, value) in &config.additional_headers {
        insert_header(headers, name, value)?;
    }
    Ok(())
}
