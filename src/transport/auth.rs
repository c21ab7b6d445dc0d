use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, AUTHORIZATION};

use crate::errors::TransportError;
use crate::models::AuthConfig;

/// Header used for API keys when the config does not name one.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Resolved authentication for an outbound request.
///
/// Bearer, OAuth2 and JWT are recognised but not implemented: they add no
/// credentials to the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    None,
    Basic { user: String, password: String },
    ApiKey { key: String, header: String },
    Bearer,
    OAuth2,
    Jwt,
}

impl Auth {
    pub fn from_config(config: &AuthConfig) -> Self {
        match config.auth_type.as_str() {
            "" => Auth::None,
            "BasicAuth" if config.basic_auth_user.is_empty() => Auth::None,
            "BasicAuth" => Auth::Basic {
                user: config.basic_auth_user.clone(),
                password: config.basic_auth_password.clone(),
            },
            "APIKey" if config.api_key.is_empty() => Auth::None,
            "APIKey" => Auth::ApiKey {
                key: config.api_key.clone(),
                header: if config.api_key_header.is_empty() {
                    DEFAULT_API_KEY_HEADER.to_string()
                } else {
                    config.api_key_header.clone()
                },
            },
            "Bearer" => Auth::Bearer,
            "OAuth2" => Auth::OAuth2,
            "JWT" => Auth::Jwt,
            other => {
                tracing::warn!(auth_type = other, "unknown authentication type, sending no credentials");
                Auth::None
            }
        }
    }

    /// Write credentials into `headers`, replacing any existing value.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), TransportError> {
        match self {
            Auth::None => Ok(()),
            Auth::Basic { user, password } => {
                let credentials = STANDARD.encode(format!("{}:{}", user, password));
                super::insert_header(headers, AUTHORIZATION.as_str(), &format!("Basic {}", credentials))
            }
            Auth::ApiKey { key, header } => super::insert_header(headers, header, key),
            Auth::Bearer | Auth::OAuth2 | Auth::Jwt => {
                tracing::debug!(auth = ?self, "authentication type not implemented, skipping");
                Ok(())
            }
        }
    }
}
