//! Autocomplete and display-value lookups for webservice-backed dropdown and
//! multiselect fields.

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::errors::GiError;
use crate::models::{value_to_string, Payload};
use crate::service::InvocationService;

/// Default lifetime of cached search results.
pub const DEFAULT_FIELD_CACHE_TTL: Duration = Duration::from_secs(60);

const ITEM_KEYS: [&str; 6] = ["items", "Items", "results", "Results", "data", "Data"];

#[derive(Debug, Error)]
pub enum FieldError {
    #[error("webservice search failed: {0}")]
    Invoke(#[from] GiError),

    #[error("webservice returned error: {0}")]
    Remote(String),
}

/// One autocomplete suggestion. `value`/`label` duplicate the stored and
/// display values for older front-ends.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AutocompleteResult {
    #[serde(rename = "StoredValue")]
    pub stored_value: String,
    #[serde(rename = "DisplayValue")]
    pub display_value: String,
    #[serde(rename = "Data", skip_serializing_if = "Map::is_empty")]
    pub data: Payload,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub label: String,
}

/// How a field talks to its webservice.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldConfig {
    pub webservice: String,
    pub invoker_search: String,
    pub invoker_get: String,
    /// Response key holding the value to store.
    pub stored_value: String,
    pub displayed_values: Vec<String>,
    pub displayed_values_separator: String,
    pub search_keys: Vec<String>,
    pub autocomplete_min_length: usize,
    pub limit: usize,
    /// Seconds; 0 means the service default.
    pub cache_ttl: u64,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            webservice: String::new(),
            invoker_search: String::new(),
            invoker_get: String::new(),
            stored_value: String::new(),
            displayed_values: Vec::new(),
            displayed_values_separator: " - ".to_string(),
            search_keys: Vec::new(),
            autocomplete_min_length: 3,
            limit: 20,
            cache_ttl: 60,
        }
    }
}

impl FieldConfig {
    /// Build from a dynamic-field config map. Unknown keys are ignored;
    /// missing or non-positive numbers keep their defaults.
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let mut config = Self::default();
        let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);

        if let Some(v) = text("Webservice") {
            config.webservice = v;
        }
        if let Some(v) = text("InvokerSearch") {
            config.invoker_search = v;
        }
        if let Some(v) = text("InvokerGet") {
            config.invoker_get = v;
        }
        if let Some(v) = text("StoredValue") {
            config.stored_value = v;
        }
        if let Some(v) = text("DisplayedValues") {
            config.displayed_values = split_list(&v);
        }
        if let Some(v) = text("DisplayedValuesSeparator").filter(|s| !s.is_empty()) {
            config.displayed_values_separator = v;
        }
        if let Some(v) = text("SearchKeys") {
            config.search_keys = split_list(&v);
        }
        if let Some(n) = positive(map.get("AutocompleteMinLength")) {
            config.autocomplete_min_length = n as usize;
        }
        if let Some(n) = positive(map.get("Limit")) {
            config.limit = n as usize;
        }
        if let Some(n) = positive(map.get("CacheTTL")) {
            config.cache_ttl = n;
        }
        config
    }

    /// Join the configured display fields of `item` with the separator.
    /// Missing, null and empty values are skipped.
    pub fn display_for(&self, item: &Payload) -> String {
        let separator = if self.displayed_values_separator.is_empty() {
            " - "
        } else {
            self.displayed_values_separator.as_str()
        };
        self.displayed_values
            .iter()
            .filter_map(|field| item.get(field))
            .filter(|v| !v.is_null())
            .map(value_to_string)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(separator)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).collect()
}

fn positive(value: Option<&Value>) -> Option<u64> {
    let n: u64 = match value? {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (n > 0).then_some(n)
}

struct CachedResults {
    results: Vec<AutocompleteResult>,
    expires_at: Instant,
}

/// Field lookups on top of an `InvocationService`, with a short-lived search
/// cache keyed by `webservice:invoker:lowercased term`.
pub struct WebserviceFieldService {
    service: Arc<InvocationService>,
    cache: DashMap<String, CachedResults>,
    default_ttl: Duration,
}

impl WebserviceFieldService {
    pub fn new(service: Arc<InvocationService>, default_ttl: Duration) -> Self {
        Self {
            service,
            cache: DashMap::new(),
            default_ttl,
        }
    }

    /// Autocomplete `term`. Terms shorter than the configured minimum return
    /// no results without calling out.
    pub async fn search(
        &self,
        config: &FieldConfig,
        term: &str,
    ) -> Result<Vec<AutocompleteResult>, FieldError> {
        if term.chars().count() < config.autocomplete_min_length {
            return Ok(Vec::new());
        }

        let key = cache_key(&config.webservice, &config.invoker_search, term);
        if let Some(hit) = self.cached(&key) {
            tracing::debug!(webservice = %config.webservice, term, "field search cache hit");
            return Ok(hit);
        }

        let mut request = Payload::new();
        request.insert("SearchTerms".into(), Value::String(term.to_string()));
        request.insert("Limit".into(), Value::from(config.limit as u64));

        let response = self
            .service
            .invoke(&config.webservice, &config.invoker_search, request)
            .await?;
        if !response.success {
            return Err(FieldError::Remote(response.error.unwrap_or_default()));
        }

        let results = parse_search_results(response.data.as_ref(), config);
        let now = Instant::now();
        let expires_at = match config.cache_ttl {
            0 => None,
            secs => now.checked_add(Duration::from_secs(secs)),
        }
        .or_else(|| now.checked_add(self.default_ttl))
        .unwrap_or(now);
        self.cache.insert(
            key,
            CachedResults {
                results: results.clone(),
                expires_at,
            },
        );
        Ok(results)
    }

    /// Human-readable label for `stored`. Never fails: any lookup problem
    /// falls back to the stored value itself.
    pub async fn display_value(&self, config: &FieldConfig, stored: &str) -> String {
        if stored.is_empty() {
            return String::new();
        }
        if config.invoker_get.is_empty() {
            return stored.to_string();
        }

        let mut request = Payload::new();
        request.insert(config.stored_value.clone(), Value::String(stored.to_string()));

        match self
            .service
            .invoke(&config.webservice, &config.invoker_get, request)
            .await
        {
            Ok(response) if response.success => match response.data {
                Some(data) => {
                    let display = config.display_for(&data);
                    if display.is_empty() {
                        stored.to_string()
                    } else {
                        display
                    }
                }
                None => stored.to_string(),
            },
            Ok(response) => {
                tracing::debug!(
                    webservice = %config.webservice,
                    status = response.status_code,
                    "display lookup unsuccessful, using stored value"
                );
                stored.to_string()
            }
            Err(e) => {
                tracing::warn!(webservice = %config.webservice, error = %e, "display lookup failed");
                stored.to_string()
            }
        }
    }

    /// Resolve several stored values concurrently.
    pub async fn display_values(&self, config: &FieldConfig, stored: &[String]) -> HashMap<String, String> {
        let lookups = stored.iter().map(|value| async move {
            (value.clone(), self.display_value(config, value).await)
        });
        join_all(lookups).await.into_iter().collect()
    }

    /// Drop cached search results for one webservice, or all of them.
    pub fn clear_cache(&self, webservice: Option<&str>) {
        match webservice {
            None | Some("") => self.cache.clear(),
            Some(ws) => {
                let prefix = format!("{}:", ws);
                self.cache.retain(|key, _| !key.starts_with(&prefix));
            }
        }
    }

    fn cached(&self, key: &str) -> Option<Vec<AutocompleteResult>> {
        let now = Instant::now();
        let entry = self.cache.get(key)?;
        if now < entry.expires_at {
            return Some(entry.results.clone());
        }
        drop(entry);
        self.cache.remove_if(key, |_, e| now >= e.expires_at);
        None
    }
}

fn cache_key(webservice: &str, invoker: &str, term: &str) -> String {
    format!("{}:{}:{}", webservice, invoker, term.to_lowercase())
}

/// Turn a search response into suggestions. Items come from the first array
/// found under a well-known key, else the whole payload is one item.
pub fn parse_search_results(data: Option<&Payload>, config: &FieldConfig) -> Vec<AutocompleteResult> {
    let Some(data) = data else {
        return Vec::new();
    };

    let single;
    let items: &[Value] = match ITEM_KEYS.iter().find_map(|k| data.get(*k).and_then(Value::as_array)) {
        Some(items) => items,
        None if !data.is_empty() => {
            single = [Value::Object(data.clone())];
            &single
        }
        None => &[],
    };

    let mut results: Vec<AutocompleteResult> = items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|item| {
            let stored = item.get(&config.stored_value).map(value_to_string)?;
            if stored.is_empty() {
                return None;
            }
            let display = config.display_for(item);
            Some(AutocompleteResult {
                value: stored.clone(),
                stored_value: stored,
                label: display.clone(),
                display_value: display,
                data: item.clone(),
            })
        })
        .collect();

    if config.limit > 0 {
        results.truncate(config.limit);
    }
    results
}
