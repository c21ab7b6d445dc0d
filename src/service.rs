//! Config-driven invocation of remote webservices.
//!
//! ```text
//! resolve config -> check active -> resolve invoker -> resolve transport
//!   -> outbound mapping -> execute -> inbound mapping (if data) -> response
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::ConfigCache;
use crate::errors::{GiError, MappingDirection, RepositoryError, TransportError};
use crate::mapping;
use crate::models::{InvokerConfig, Payload, WebserviceConfig, WebserviceConfigHistory};
use crate::store::WebserviceRepository;
use crate::transport::{soap, HttpSettings, Request, Response, Transport, TransportRegistry};

/// Invoker name reported when a connection test fails.
const CONNECTION_TEST: &str = "TestConnection";

/// Entry point for outbound webservice calls and config management.
///
/// Safe to share behind an `Arc` and call concurrently. Invocations run on the
/// caller's task; the only await point is the HTTP round-trip.
pub struct InvocationService {
    repo: Arc<dyn WebserviceRepository>,
    transports: TransportRegistry,
    cache: ConfigCache,
}

impl InvocationService {
    pub fn new(
        repo: Arc<dyn WebserviceRepository>,
        transports: TransportRegistry,
        cache: ConfigCache,
    ) -> Self {
        Self {
            repo,
            transports,
            cache,
        }
    }

    /// Service with the REST and SOAP transports registered.
    pub fn with_defaults(
        repo: Arc<dyn WebserviceRepository>,
        settings: HttpSettings,
        cache_ttl: Duration,
    ) -> Result<Self, TransportError> {
        Ok(Self::new(
            repo,
            TransportRegistry::with_defaults(settings)?,
            ConfigCache::new(cache_ttl),
        ))
    }

    /// Add or replace a transport. Takes effect for the next invocation.
    pub fn register_transport(&self, transport: Arc<dyn Transport>) {
        self.transports.register(transport);
    }

    pub fn transport(&self, kind: &str) -> Option<Arc<dyn Transport>> {
        self.transports.get(kind)
    }

    pub fn cache(&self) -> &ConfigCache {
        &self.cache
    }

    // -- Invocation --

    /// Call `invoker` of `webservice` with `data`.
    ///
    /// `Ok` carries whatever the remote side answered, including HTTP errors
    /// and SOAP Faults (`success == false`). `Err` means the call could not be
    /// made or its payload could not be mapped.
    pub async fn invoke(
        &self,
        webservice: &str,
        invoker: &str,
        data: Payload,
    ) -> Result<Response, GiError> {
        self.run(webservice, invoker, data, None, None).await
    }

    /// Like `invoke`, but with an explicit path (may contain `:name`
    /// placeholders) and HTTP method. Empty values fall back to the config.
    pub async fn invoke_with_controller(
        &self,
        webservice: &str,
        invoker: &str,
        path: &str,
        method: &str,
        data: Payload,
    ) -> Result<Response, GiError> {
        self.run(webservice, invoker, data, Some(path), Some(method))
            .await
    }

    async fn run(
        &self,
        webservice: &str,
        invoker: &str,
        data: Payload,
        path: Option<&str>,
        method: Option<&str>,
    ) -> Result<Response, GiError> {
        let ws = self.get_webservice(webservice).await?;
        let invoker_config = resolve_invoker(&ws, invoker)?;
        let transport = self.resolve_transport(&ws)?;
        let debug = ws.debug_enabled();

        let data = mapping::apply(&invoker_config.mapping_outbound, data).map_err(|source| {
            GiError::Mapping {
                direction: MappingDirection::Outbound,
                webservice: webservice.to_string(),
                invoker: invoker.to_string(),
                source,
            }
        })?;

        if debug {
            tracing::debug!(
                webservice,
                invoker,
                payload = %serde_json::Value::Object(data.clone()),
                "outbound payload"
            );
        }

        let mut request = Request::new(invoker, data);
        if let Some(path) = path {
            request = request.with_path(path);
        }
        if let Some(method) = method {
            request = request.with_method(method);
        }

        let started = Instant::now();
        let mut response = transport
            .execute(&ws.config.requester.transport.config, &request)
            .await
            .map_err(|source| {
                tracing::warn!(
                    webservice,
                    invoker,
                    transport = transport.kind(),
                    error = %source,
                    "webservice call failed"
                );
                GiError::Transport {
                    webservice: webservice.to_string(),
                    invoker: invoker.to_string(),
                    source,
                }
            })?;

        tracing::info!(
            webservice,
            invoker,
            transport = transport.kind(),
            status = response.status_code,
            success = response.success,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "webservice invoked"
        );

        if let Some(data) = response.data.take() {
            if debug {
                tracing::debug!(
                    webservice,
                    invoker,
                    payload = %serde_json::Value::Object(data.clone()),
                    "inbound payload"
                );
            }
            let mapped = mapping::apply(&invoker_config.mapping_inbound, data).map_err(|source| {
                GiError::Mapping {
                    direction: MappingDirection::Inbound,
                    webservice: webservice.to_string(),
                    invoker: invoker.to_string(),
                    source,
                }
            })?;
            response.data = Some(mapped);
        }

        Ok(response)
    }

    /// SOAP envelope that `invoke` would send, after outbound mapping.
    pub async fn soap_envelope(
        &self,
        webservice: &str,
        invoker: &str,
        data: Payload,
    ) -> Result<String, GiError> {
        let ws = self.get_webservice(webservice).await?;
        let invoker_config = resolve_invoker(&ws, invoker)?;
        let data = mapping::apply(&invoker_config.mapping_outbound, data).map_err(|source| {
            GiError::Mapping {
                direction: MappingDirection::Outbound,
                webservice: webservice.to_string(),
                invoker: invoker.to_string(),
                source,
            }
        })?;
        Ok(soap::build_envelope(
            &ws.config.requester.transport.config,
            &Request::new(invoker, data),
        ))
    }

    /// Probe the remote host of `webservice`. Inactive webservices are
    /// probed too.
    pub async fn test_connection(&self, webservice: &str) -> Result<(), GiError> {
        let ws = self.load_cached(webservice).await?;
        let transport = self.resolve_transport(&ws)?;
        transport
            .test_connection(&ws.config.requester.transport.config)
            .await
            .map_err(|source| GiError::Transport {
                webservice: webservice.to_string(),
                invoker: CONNECTION_TEST.to_string(),
                source,
            })
    }

    fn resolve_transport(&self, ws: &WebserviceConfig) -> Result<Arc<dyn Transport>, GiError> {
        let kind = ws.transport_type();
        self.transports
            .get(kind)
            .ok_or_else(|| GiError::TransportNotRegistered(kind.to_string()))
    }

    // -- Config lookups (cached) --

    /// Load a webservice by name, from cache when fresh. Fails if inactive.
    pub async fn get_webservice(&self, name: &str) -> Result<Arc<WebserviceConfig>, GiError> {
        ensure_active(self.load_cached(name).await?)
    }

    async fn load_cached(&self, name: &str) -> Result<Arc<WebserviceConfig>, GiError> {
        if let Some(ws) = self.cache.get_by_name(name) {
            return Ok(ws);
        }
        let loaded = self.repo.get_by_name(name).await.map_err(|e| match e {
            RepositoryError::NotFound(_) => GiError::WebserviceNotFound(name.to_string()),
            other => GiError::Repository(other),
        })?;
        tracing::debug!(webservice = name, id = loaded.id, "webservice config loaded");
        Ok(self.cache.insert(loaded))
    }

    pub async fn get_webservice_by_id(&self, id: i32) -> Result<Arc<WebserviceConfig>, GiError> {
        let ws = match self.cache.get_by_id(id) {
            Some(ws) => ws,
            None => {
                let loaded = self.repo.get_by_id(id).await.map_err(|e| match e {
                    RepositoryError::NotFound(_) => GiError::WebserviceNotFound(format!("id {}", id)),
                    other => GiError::Repository(other),
                })?;
                self.cache.insert(loaded)
            }
        };
        ensure_active(ws)
    }

    // -- Pass-through repository operations --

    pub async fn list_webservices(&self) -> Result<Vec<WebserviceConfig>, GiError> {
        Ok(self.repo.list().await?)
    }

    pub async fn list_valid_webservices(&self) -> Result<Vec<WebserviceConfig>, GiError> {
        Ok(self.repo.list_valid().await?)
    }

    /// Active webservices that expose at least one invoker.
    pub async fn webservices_for_field(&self) -> Result<Vec<WebserviceConfig>, GiError> {
        let mut all = self.repo.list_valid().await?;
        all.retain(|ws| !ws.config.requester.invoker.is_empty());
        Ok(all)
    }

    pub async fn webservice_exists(&self, name: &str) -> Result<bool, GiError> {
        Ok(self.repo.exists(name).await?)
    }

    pub async fn webservice_exists_excluding(
        &self,
        name: &str,
        exclude_id: i32,
    ) -> Result<bool, GiError> {
        Ok(self.repo.exists_excluding(name, exclude_id).await?)
    }

    pub async fn history(&self, config_id: i32) -> Result<Vec<WebserviceConfigHistory>, GiError> {
        Ok(self.repo.history(config_id).await?)
    }

    pub async fn history_entry(&self, history_id: i64) -> Result<WebserviceConfigHistory, GiError> {
        Ok(self.repo.history_entry(history_id).await?)
    }

    // -- Writes (each clears the config cache) --

    pub async fn create_webservice(
        &self,
        ws: &WebserviceConfig,
        user_id: i32,
    ) -> Result<i32, GiError> {
        let id = self.repo.create(ws, user_id).await?;
        self.cache.invalidate_all();
        tracing::info!(webservice = %ws.name, id, user_id, "webservice created");
        Ok(id)
    }

    pub async fn update_webservice(&self, ws: &WebserviceConfig, user_id: i32) -> Result<(), GiError> {
        self.repo.update(ws, user_id).await?;
        self.cache.invalidate_all();
        tracing::info!(webservice = %ws.name, id = ws.id, user_id, "webservice updated");
        Ok(())
    }

    pub async fn delete_webservice(&self, id: i32) -> Result<(), GiError> {
        self.repo.delete(id).await?;
        self.cache.invalidate_all();
        tracing::info!(id, "webservice deleted");
        Ok(())
    }

    pub async fn restore_from_history(&self, history_id: i64, user_id: i32) -> Result<(), GiError> {
        self.repo.restore_from_history(history_id, user_id).await?;
        self.cache.invalidate_all();
        tracing::info!(history_id, user_id, "webservice restored");
        Ok(())
    }

    pub fn invalidate_cache(&self) {
        self.cache.invalidate_all();
    }
}

fn ensure_active(ws: Arc<WebserviceConfig>) -> Result<Arc<WebserviceConfig>, GiError> {
    if !ws.is_valid() {
        return Err(GiError::WebserviceInactive {
            webservice: ws.name.clone(),
        });
    }
    Ok(ws)
}

fn resolve_invoker<'a>(ws: &'a WebserviceConfig, invoker: &str) -> Result<&'a InvokerConfig, GiError> {
    ws.invoker(invoker).ok_or_else(|| GiError::InvokerNotFound {
        webservice: ws.name.clone(),
        invoker: invoker.to_string(),
    })
}
