//! JSON-over-HTTP transport (`HTTP::REST`).

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use url::Url;

use super::auth::Auth;
use super::client::{ClientPool, HttpSettings};
use super::{apply_additional_headers, insert_header, Request, Response, Transport, REST};
use crate::errors::TransportError;
use crate::models::{value_to_string, Payload, TransportHttpConfig};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r":(\w+)").unwrap());

const JSON: &str = "application/json";

pub struct RestTransport {
    clients: ClientPool,
}

impl RestTransport {
    pub fn new(settings: HttpSettings) -> Result<Self, TransportError> {
        Ok(Self {
            clients: ClientPool::new(settings)?,
        })
    }

    /// Send a request with caller-supplied headers and body, bypassing
    /// config-driven path/method/auth handling. The body is decoded as a
    /// JSON object whenever it parses as one.
    pub async fn execute_raw(
        &self,
        method: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Vec<u8>,
    ) -> Result<Response, TransportError> {
        let method = parse_method(method)?;
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            insert_header(&mut header_map, name, value)?;
        }

        let mut builder = self
            .clients
            .client_for(&TransportHttpConfig::default())?
            .request(method, url)
            .headers(header_map);
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let resp_headers = resp.headers().clone();
        let raw = resp.bytes().await?;

        let mut response = Response::from_http(status, &resp_headers, raw);
        if !response.raw.is_empty() {
            response.data = serde_json::from_slice::<Payload>(&response.raw).ok();
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for RestTransport {
    fn kind(&self) -> &str {
        REST
    }

    async fn execute(
        &self,
        config: &TransportHttpConfig,
        request: &Request,
    ) -> Result<Response, TransportError> {
        let method_name = determine_method(config, request);
        let method = parse_method(&method_name)?;
        let path = build_path(config, request);
        let raw_url = format!("{}{}", config.host.trim_end_matches('/'), path);
        let mut url = Url::parse(&raw_url)
            .map_err(|e| TransportError::InvalidConfig(format!("invalid URL {:?}: {}", raw_url, e)))?;

        let body = if sends_body(&method) {
            Some(serde_json::to_vec(&request.data)?)
        } else {
            if !request.data.is_empty() {
                set_query(&mut url, &request.data);
            }
            None
        };

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, CONTENT_TYPE.as_str(), JSON)?;
        insert_header(&mut headers, ACCEPT.as_str(), JSON)?;
        apply_additional_headers(&mut headers, config)?;
        Auth::from_config(&config.authentication).apply(&mut headers)?;

        let mut builder = self
            .clients
            .client_for(config)?
            .request(method, url.clone())
            .headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }

        tracing::debug!(method = %method_name, url = %url, operation = %request.operation, "REST request");
        let started = Instant::now();

        let resp = builder.send().await?;
        let status = resp.status();
        let resp_headers = resp.headers().clone();
        let raw = resp.bytes().await?;

        tracing::debug!(
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            bytes = raw.len(),
            "REST response"
        );

        let mut response = Response::from_http(status, &resp_headers, raw);
        let is_json = response
            .headers
            .get(CONTENT_TYPE.as_str())
            .is_some_and(|ct| ct.contains(JSON));
        if is_json && !response.raw.is_empty() {
            response.data = decode_json(&response.raw);
        }
        response.set_http_error();

        Ok(response)
    }

    async fn test_connection(&self, config: &TransportHttpConfig) -> Result<(), TransportError> {
        let mut headers = HeaderMap::new();
        Auth::from_config(&config.authentication).apply(&mut headers)?;

        self.clients
            .client_for(config)?
            .head(&config.host)
            .headers(headers)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        Ok(())
    }
}

/// Request path: explicit path, else the invoker's controller mapping, else
/// `/<operation>`.
pub fn build_path(config: &TransportHttpConfig, request: &Request) -> String {
    if let Some(path) = &request.path {
        return substitute_placeholders(path, &request.data);
    }
    if let Some(mapping) = config.controller(&request.operation) {
        return substitute_placeholders(&mapping.controller, &request.data);
    }
    format!("/{}", request.operation)
}

/// Replace `:name` placeholders with values from `data`. Unknown
/// placeholders are left untouched.
pub fn substitute_placeholders(path: &str, data: &Payload) -> String {
    PLACEHOLDER
        .replace_all(path, |caps: &regex::Captures<'_>| match data.get(&caps[1]) {
            Some(value) => value_to_string(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// HTTP method: explicit method, else controller command, else
/// `DefaultCommand`, else `GET`. Always upper-case.
pub fn determine_method(config: &TransportHttpConfig, request: &Request) -> String {
    if let Some(method) = &request.method {
        return method.to_uppercase();
    }
    if let Some(mapping) = config.controller(&request.operation) {
        if !mapping.command.is_empty() {
            return mapping.command.to_uppercase();
        }
    }
    if !config.default_command.is_empty() {
        return config.default_command.to_uppercase();
    }
    "GET".to_string()
}

fn parse_method(name: &str) -> Result<Method, TransportError> {
    Method::from_bytes(name.to_uppercase().as_bytes())
        .map_err(|_| TransportError::InvalidConfig(format!("invalid HTTP method {:?}", name)))
}

fn sends_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Merge `data` into the query string, overriding same-named parameters
/// already present in the URL.
fn set_query(url: &mut Url, data: &Payload) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !data.contains_key(k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut query = url.query_pairs_mut();
    query.clear();
    query.extend_pairs(kept);
    for (key, value) in data {
        query.append_pair(key, &value_to_string(value));
    }
}

/// Object bodies decode as-is; top-level arrays are wrapped under `items`.
fn decode_json(raw: &[u8]) -> Option<Payload> {
    if let Ok(object) = serde_json::from_slice::<Payload>(raw) {
        return Some(object);
    }
    match serde_json::from_slice::<Vec<Value>>(raw) {
        Ok(items) => {
            let mut wrapped = Payload::new();
            wrapped.insert("items".to_string(), Value::Array(items));
            Some(wrapped)
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ControllerMapping;
    use serde_json::json;

    fn data(v: Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    fn config_with_mapping(controller: &str, command: &str) -> TransportHttpConfig {
        let mut config = TransportHttpConfig::default();
        config.invoker_controller_mapping.insert(
            "TicketGet".into(),
            ControllerMapping {
                controller: controller.into(),
                command: command.into(),
            },
        );
        config
    }

    #[test]
    fn test_placeholder_substitution() {
        let d = data(json!({"id": "7"}));
        assert_eq!(substitute_placeholders("/items/:id", &d), "/items/7");
        assert_eq!(substitute_placeholders("/items/:id/:sub", &d), "/items/7/:sub");

        let d = data(json!({"a": 1, "b": true}));
        assert_eq!(substitute_placeholders("/:b/x/:a", &d), "/true/x/1");
        assert_eq!(substitute_placeholders("/:a/x/:b", &d), "/1/x/true");
    }

    #[test]
    fn test_substitution_is_idempotent() {
        let d = data(json!({"id": 7}));
        let once = substitute_placeholders("/items/:id", &d);
        assert_eq!(substitute_placeholders(&once, &d), once);
    }

    #[test]
    fn test_path_priority() {
        let config = config_with_mapping("/tickets/:id", "GET");
        let d = data(json!({"id": 42}));

        let explicit = Request::new("TicketGet", d.clone()).with_path("/custom/:id");
        assert_eq!(build_path(&config, &explicit), "/custom/42");

        let mapped = Request::new("TicketGet", d.clone());
        assert_eq!(build_path(&config, &mapped), "/tickets/42");

        let unmapped = Request::new("TicketSearch", d);
        assert_eq!(build_path(&config, &unmapped), "/TicketSearch");
    }

    #[test]
    fn test_method_precedence() {
        let mut config = config_with_mapping("/tickets/:id", "put");
        config.default_command = "post".into();

        let explicit = Request::new("TicketGet", Payload::new()).with_method("delete");
        assert_eq!(determine_method(&config, &explicit), "DELETE");

        let mapped = Request::new("TicketGet", Payload::new());
        assert_eq!(determine_method(&config, &mapped), "PUT");

        let defaulted = Request::new("Other", Payload::new());
        assert_eq!(determine_method(&config, &defaulted), "POST");

        let bare = TransportHttpConfig::default();
        assert_eq!(determine_method(&bare, &defaulted), "GET");
    }

    #[test]
    fn test_empty_controller_command_falls_back_to_default() {
        let mut config = config_with_mapping("/tickets", "");
        config.default_command = "PATCH".into();
        let req = Request::new("TicketGet", Payload::new());
        assert_eq!(determine_method(&config, &req), "PATCH");
    }

    #[test]
    fn test_query_merge_overrides_existing_params() {
        let mut url = Url::parse("http://api.local/search?q=old&page=2").unwrap();
        set_query(&mut url, &data(json!({"q": "new", "limit": 5})));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("page".to_string(), "2".to_string()),
                ("limit".to_string(), "5".to_string()),
                ("q".to_string(), "new".to_string()),
            ]
        );
    }

    #[test]
    fn test_decode_json_wraps_arrays() {
        let obj = decode_json(br#"{"id":"999"}"#).unwrap();
        assert_eq!(obj["id"], "999");

        let arr = decode_json(br#"[{"id":1},{"id":2}]"#).unwrap();
        assert_eq!(arr["items"].as_array().unwrap().len(), 2);

        assert!(decode_json(b"not json").is_none());
        assert!(decode_json(b"42").is_none());
    }

    #[test]
    fn test_invalid_method_is_config_error() {
        assert!(matches!(parse_method("GE T"), Err(TransportError::InvalidConfig(_))));
        assert_eq!(parse_method("options").unwrap(), Method::OPTIONS);
    }
}
