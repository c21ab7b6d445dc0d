//! Shared outbound HTTP clients.
//!
//! Every transport owns one pool. The default client serves all configs
//! without SSL or proxy overrides; configs that do carry overrides get a
//! dedicated client built once and memoised by those settings. Clients are
//! never mutated after construction: per-call deadlines go on the request.

use dashmap::DashMap;
use reqwest::Client;
use std::time::Duration;

use crate::errors::TransportError;
use crate::models::{ProxyConfig, SslConfig, TransportHttpConfig};

#[derive(Debug, Clone, Copy)]
pub struct HttpSettings {
    /// Applied when the webservice config carries no `Timeout`.
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    ssl: SslConfig,
    proxy: ProxyConfig,
}

pub struct ClientPool {
    settings: HttpSettings,
    default: Client,
    custom: DashMap<ClientKey, Client>,
}

impl ClientPool {
    pub fn new(settings: HttpSettings) -> Result<Self, TransportError> {
        let default = base_builder(&settings)
            .build()
            .map_err(TransportError::ClientBuild)?;
        Ok(Self {
            settings,
            default,
            custom: DashMap::new(),
        })
    }

    /// Client honouring the SSL and proxy settings of `config`.
    pub fn client_for(&self, config: &TransportHttpConfig) -> Result<Client, TransportError> {
        if config.ssl.is_default() && !config.proxy.enabled() {
            return Ok(self.default.clone());
        }

        let key = ClientKey {
            ssl: config.ssl.clone(),
            proxy: config.proxy.clone(),
        };
        if let Some(client) = self.custom.get(&key) {
            return Ok(client.clone());
        }

        let client = build_custom(&self.settings, &key.ssl, &key.proxy)?;
        tracing::debug!(
            proxy = key.proxy.enabled(),
            verify_cert = %key.ssl.verify_cert,
            "built dedicated HTTP client"
        );
        self.custom.insert(key, client.clone());
        Ok(client)
    }
}

fn base_builder(settings: &HttpSettings) -> reqwest::ClientBuilder {
    Client::builder()
        .use_rustls_tls()
        .pool_max_idle_per_host(32)
        .timeout(settings.timeout)
        .connect_timeout(settings.connect_timeout)
        .user_agent(concat!("generic-interface/", env!("CARGO_PKG_VERSION")))
}

fn build_custom(
    settings: &HttpSettings,
    ssl: &SslConfig,
    proxy: &ProxyConfig,
) -> Result<Client, TransportError> {
    let mut builder = base_builder(settings);

    if ssl.verify_cert == "0" {
        tracing::warn!("SSL certificate verification disabled by webservice config");
        builder = builder.danger_accept_invalid_certs(true);
    }
    if ssl.verify_hostname == "0" {
        tracing::warn!("SSLVerifyHostname=0 is not supported with rustls, hostnames are still verified");
    }
    if !ssl.ca_file.is_empty() {
        let pem = read_file(&ssl.ca_file)?;
        let cert = reqwest::Certificate::from_pem(&pem).map_err(TransportError::ClientBuild)?;
        builder = builder.add_root_certificate(cert);
    }
    if !ssl.ca_dir.is_empty() {
        for path in ca_dir_files(&ssl.ca_dir)? {
            let pem = read_file(&path)?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(TransportError::ClientBuild)?;
            builder = builder.add_root_certificate(cert);
        }
    }
    if !ssl.cert_file.is_empty() {
        let mut pem = read_file(&ssl.cert_file)?;
        if !ssl.key_file.is_empty() {
            pem.push(b'\n');
            pem.extend(read_file(&ssl.key_file)?);
        }
        let identity = reqwest::Identity::from_pem(&pem).map_err(TransportError::ClientBuild)?;
        builder = builder.identity(identity);
    }

    if proxy.enabled() {
        let mut p = reqwest::Proxy::all(proxy.url()).map_err(TransportError::ClientBuild)?;
        if !proxy.proxy_user.is_empty() {
            p = p.basic_auth(&proxy.proxy_user, &proxy.proxy_password);
        }
        builder = builder.proxy(p);
    }

    builder.build().map_err(TransportError::ClientBuild)
}

/// PEM certificates (`*.pem`, `*.crt`) directly inside `dir`, sorted.
fn ca_dir_files(dir: &str) -> Result<Vec<String>, TransportError> {
    let io_err = |source| TransportError::Io {
        path: dir.to_string(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_cert = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pem") || ext.eq_ignore_ascii_case("crt"));
        if is_cert && path.is_file() {
            files.push(path.to_string_lossy().into_owned());
        }
    }
    files.sort();
    Ok(files)
}

fn read_file(path: &str) -> Result<Vec<u8>, TransportError> {
    std::fs::read(path).map_err(|source| TransportError::Io {
        path: path.to_string(),
        source,
    })
}
