use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// `valid_id` value marking a webservice as active.
pub const VALID_ID_ACTIVE: i32 = 1;

/// Namespace used for SOAP operations when the config does not name one.
pub const DEFAULT_SOAP_NAMESPACE: &str = "http://tempuri.org/";

/// A stored webservice definition (`gi_webservice_config` row).
///
/// The config block is persisted as YAML; everything the invocation engine
/// needs to reach the remote system lives under `config.requester`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebserviceConfig {
    #[serde(default)]
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub config: WebserviceConfigData,
    #[serde(default = "default_valid_id")]
    pub valid_id: i32,
    #[serde(default)]
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub create_by: i32,
    #[serde(default)]
    pub change_time: DateTime<Utc>,
    #[serde(default)]
    pub change_by: i32,
}

fn default_valid_id() -> i32 {
    VALID_ID_ACTIVE
}

impl WebserviceConfig {
    /// New, active, not-yet-persisted webservice.
    pub fn new(name: impl Into<String>, config: WebserviceConfigData) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            config,
            valid_id: VALID_ID_ACTIVE,
            create_time: now,
            create_by: 0,
            change_time: now,
            change_by: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid_id == VALID_ID_ACTIVE
    }

    /// Look up a requester invoker by name.
    pub fn invoker(&self, name: &str) -> Option<&InvokerConfig> {
        self.config.requester.invoker.get(name)
    }

    pub fn invoker_names(&self) -> Vec<&str> {
        self.config.requester.invoker.keys().map(String::as_str).collect()
    }

    /// Requester transport type, e.g. `HTTP::REST` or `HTTP::SOAP`.
    pub fn transport_type(&self) -> &str {
        &self.config.requester.transport.kind
    }

    pub fn requester_host(&self) -> &str {
        &self.config.requester.transport.config.host
    }

    /// Whether payload-level debug logging is enabled for this webservice.
    pub fn debug_enabled(&self) -> bool {
        self.config
            .debugger
            .debug_threshold
            .eq_ignore_ascii_case("debug")
    }
}

/// The YAML config block. Key names follow the stored format verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct WebserviceConfigData {
    pub name: String,
    pub description: String,
    pub remote_system: String,
    pub framework_version: String,
    pub debugger: DebuggerConfig,
    /// Inbound side; carried through untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<serde_json::Value>,
    pub requester: RequesterConfig,
}

impl WebserviceConfigData {
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct DebuggerConfig {
    /// debug, info, notice or error
    pub debug_threshold: String,
    pub test_mode: String,
}

/// Outbound side: named invokers sharing one transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct RequesterConfig {
    pub invoker: BTreeMap<String, InvokerConfig>,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct InvokerConfig {
    #[serde(rename = "Type")]
    pub kind: String,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventConfig>,
    pub mapping_inbound: MappingConfig,
    pub mapping_outbound: MappingConfig,
}

/// Event trigger attached to an invoker. Not evaluated by the requester.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct EventConfig {
    pub event: String,
    pub asynchronous: String,
}

/// A data transformation: `Type` selects the engine, `Config` is its
/// engine-specific table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct MappingConfig {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Map<String, serde_json::Value>>,
}

impl MappingConfig {
    pub fn is_configured(&self) -> bool {
        !self.kind.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct TransportConfig {
    #[serde(rename = "Type")]
    pub kind: String,
    pub config: TransportHttpConfig,
}

/// HTTP settings shared by the REST and SOAP transports.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct TransportHttpConfig {
    pub host: String,
    /// GET, POST, PUT, PATCH, DELETE
    pub default_command: String,
    /// Seconds, string-encoded.
    pub timeout: String,

    // ── REST ──
    pub invoker_controller_mapping: BTreeMap<String, ControllerMapping>,
    pub additional_headers: BTreeMap<String, String>,

    // ── SOAP ──
    pub encoding: String,
    pub endpoint: String,
    #[serde(rename = "NameSpace")]
    pub namespace: String,
    #[serde(rename = "SOAPAction")]
    pub soap_action: String,

    pub authentication: AuthConfig,
    #[serde(rename = "SSL")]
    pub ssl: SslConfig,
    pub proxy: ProxyConfig,
}

impl TransportHttpConfig {
    /// Per-request timeout. Fractional seconds are accepted; anything that
    /// is not a positive number yields `None`.
    pub fn timeout(&self) -> Option<Duration> {
        let raw = self.timeout.trim();
        if raw.is_empty() {
            return None;
        }
        let parsed = raw
            .parse::<f64>()
            .ok()
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
        match parsed {
            Some(timeout) => Some(timeout),
            None => {
                tracing::warn!(timeout = %self.timeout, "ignoring unparsable transport timeout");
                None
            }
        }
    }

    pub fn controller(&self, operation: &str) -> Option<&ControllerMapping> {
        self.invoker_controller_mapping.get(operation)
    }

    pub fn soap_namespace(&self) -> &str {
        if self.namespace.is_empty() {
            DEFAULT_SOAP_NAMESPACE
        } else {
            &self.namespace
        }
    }

    /// `Host`, with `Endpoint` appended after exactly one slash when set.
    pub fn soap_endpoint(&self) -> String {
        if self.endpoint.is_empty() {
            return self.host.clone();
        }
        format!(
            "{}/{}",
            self.host.trim_end_matches('/'),
            self.endpoint.trim_start_matches('/')
        )
    }

    /// Explicit `SOAPAction`, else namespace + operation.
    pub fn soap_action_for(&self, operation: &str) -> String {
        if !self.soap_action.is_empty() {
            return self.soap_action.clone();
        }
        format!("{}{}", self.soap_namespace(), operation)
    }
}

/// Maps an invoker to a REST route.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct ControllerMapping {
    /// Path template, may contain `:name` placeholders.
    pub controller: String,
    pub command: String,
}

/// Persisted authentication block. See `transport::auth::Auth` for the
/// resolved form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(rename = "AuthType")]
    pub auth_type: String,

    #[serde(rename = "BasicAuthUser")]
    pub basic_auth_user: String,
    #[serde(rename = "BasicAuthPassword")]
    pub basic_auth_password: String,

    #[serde(rename = "APIKey")]
    pub api_key: String,
    #[serde(rename = "APIKeyHeader")]
    pub api_key_header: String,

    #[serde(rename = "OAuth2TokenURL")]
    pub oauth2_token_url: String,
    #[serde(rename = "OAuth2ClientID")]
    pub oauth2_client_id: String,
    #[serde(rename = "OAuth2ClientSecret")]
    pub oauth2_client_secret: String,
    #[serde(rename = "OAuth2Scope")]
    pub oauth2_scope: String,

    #[serde(rename = "JWTAuthKeyFilePath")]
    pub jwt_key_file_path: String,
    #[serde(rename = "JWTAuthKeyFilePassword")]
    pub jwt_key_file_password: String,
    #[serde(rename = "JWTAuthAlgorithm")]
    pub jwt_algorithm: String,
    #[serde(rename = "JWTAuthCertificateFilePath")]
    pub jwt_certificate_file_path: String,
    #[serde(rename = "JWTAuthTTL")]
    pub jwt_ttl: String,
    #[serde(rename = "JWTAuthPayload")]
    pub jwt_payload: String,
    #[serde(rename = "JWTAuthAdditionalHeaderData")]
    pub jwt_additional_header_data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(default)]
pub struct SslConfig {
    #[serde(rename = "SSLVerifyHostname")]
    pub verify_hostname: String,
    #[serde(rename = "SSLVerifyCert")]
    pub verify_cert: String,
    #[serde(rename = "SSLCAFile")]
    pub ca_file: String,
    #[serde(rename = "SSLCADir")]
    pub ca_dir: String,
    #[serde(rename = "SSLCertFile")]
    pub cert_file: String,
    #[serde(rename = "SSLKeyFile")]
    pub key_file: String,
}

impl SslConfig {
    pub fn is_default(&self) -> bool {
        self.verify_cert != "0"
            && self.verify_hostname != "0"
            && self.ca_file.is_empty()
            && self.ca_dir.is_empty()
            && self.cert_file.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "PascalCase", default)]
pub struct ProxyConfig {
    /// 0 or 1
    pub use_proxy: String,
    pub proxy_host: String,
    pub proxy_port: String,
    pub proxy_user: String,
    pub proxy_password: String,
}

impl ProxyConfig {
    pub fn enabled(&self) -> bool {
        self.use_proxy == "1" && !self.proxy_host.is_empty()
    }

    /// Proxy URL, `http://host[:port]`. A host that already carries a scheme
    /// is used as-is.
    pub fn url(&self) -> String {
        let base = if self.proxy_host.contains("://") {
            self.proxy_host.clone()
        } else {
            format!("http://{}", self.proxy_host)
        };
        if self.proxy_port.is_empty() {
            base
        } else {
            format!("{}:{}", base.trim_end_matches('/'), self.proxy_port)
        }
    }
}

/// A config snapshot taken on create/update/restore.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebserviceConfigHistory {
    pub id: i64,
    pub config_id: i32,
    /// YAML snapshot of the config block.
    pub config: String,
    /// SHA-256 hex of `config`.
    pub config_digest: String,
    pub create_time: DateTime<Utc>,
    pub create_by: i32,
    pub change_time: DateTime<Utc>,
    pub change_by: i32,
}
