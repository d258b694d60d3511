//! Outbound HTTP client shared by the provider adapters.
//!
//! One `ApiClient` serves every registered provider: it builds authenticated
//! requests, caches OAuth bearer tokens, retries transport failures and turns
//! provider error envelopes into [`ApiError::Provider`].

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::payments::redact::{redact_body, redact_headers, redact_json};
use crate::payments::token::TokenCache;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// Network failure or timeout; retried before it is surfaced
    #[error("transport error calling {provider}: {message}")]
    Transport { provider: String, message: String },

    /// Authoritative rejection by the provider; never retried
    #[error("{provider} rejected the request (HTTP {status}, {code}): {message}")]
    Provider {
        provider: String,
        status: u16,
        code: String,
        message: String,
    },

    /// Bearer token could not be obtained
    #[error("token acquisition for {provider} failed: {message}")]
    Auth { provider: String, message: String },

    #[error("provider '{0}' is not registered with the API client")]
    UnknownProvider(String),

    #[error("unreadable response from {provider}: {message}")]
    InvalidResponse { provider: String, message: String },
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transport { .. })
    }

    /// Provider error code, when the provider returned one.
    pub fn provider_code(&self) -> Option<&str> {
        match self {
            ApiError::Provider { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }
}

/// How requests to a provider are authenticated.
#[derive(Clone)]
pub enum ProviderAuth {
    None,
    /// Static secret key sent as a bearer token
    Bearer(String),
    /// OAuth2 client-credentials grant; the token is cached until shortly before expiry
    ClientCredentials {
        client_id: String,
        client_secret: String,
        token_path: String,
    },
}

impl std::fmt::Debug for ProviderAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderAuth::None => f.write_str("None"),
            ProviderAuth::Bearer(_) => f.write_str("Bearer([REDACTED])"),
            ProviderAuth::ClientCredentials {
                client_id,
                token_path,
                ..
            } => f
                .debug_struct("ClientCredentials")
                .field("client_id", client_id)
                .field("client_secret", &"[REDACTED]")
                .field("token_path", token_path)
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub name: String,
    pub base_url: String,
    pub auth: ProviderAuth,
}

/// Client-wide transport settings.
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Total attempts for a transport failure, including the first
    pub max_attempts: u32,
    /// Base delay between attempts, doubled each time
    pub retry_backoff: Duration,
    /// Tokens are refreshed this long before the provider expiry
    pub token_safety_margin: Duration,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            token_safety_margin: Duration::from_secs(60),
        }
    }
}

/// Successful (2xx) provider response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

pub struct ApiClient {
    http: Client,
    config: ApiClientConfig,
    providers: HashMap<String, ProviderEndpoint>,
    tokens: TokenCache,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("checkout-backend/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Transport {
                provider: "http-client".to_string(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            tokens: TokenCache::new(config.token_safety_margin),
            config,
            providers: HashMap::new(),
        })
    }

    pub fn with_provider(mut self, endpoint: ProviderEndpoint) -> Self {
        self.providers.insert(endpoint.name.clone(), endpoint);
        self
    }

    /// Send a request to `provider` and return the parsed 2xx body.
    ///
    /// Transport failures are retried up to `max_attempts`; any HTTP response,
    /// including 4xx/5xx, is final.
    pub async fn request(
        &self,
        provider: &str,
        endpoint: &str,
        method: Method,
        body: Option<&Value>,
        headers: &[(&str, String)],
    ) -> Result<ApiResponse, ApiError> {
        let target = self
            .providers
            .get(provider)
            .ok_or_else(|| ApiError::UnknownProvider(provider.to_string()))?;

        let token = self.bearer_token(target).await?;
        let url = format!("{}{}", target.base_url.trim_end_matches('/'), endpoint);

        let logged_body = body.map(redact_json).unwrap_or(Value::Null);
        debug!(
            provider,
            %method,
            endpoint,
            headers = ?redact_headers(headers.iter().map(|(k, v)| (*k, v.as_str()))),
            body = %logged_body,
            "Provider request"
        );

        let response = self
            .send_with_retry(provider, || {
                let mut request = self
                    .http
                    .request(method.clone(), &url)
                    .header("Accept", "application/json");
                if let Some(token) = &token {
                    request = request.bearer_auth(token);
                }
                for (name, value) in headers {
                    request = request.header(*name, value.as_str());
                }
                if let Some(body) = body {
                    request = request.json(body);
                }
                request
            })
            .await?;

        let status = response.status();
        let raw = response.text().await.map_err(|e| ApiError::Transport {
            provider: provider.to_string(),
            message: format!("failed to read response body: {}", e),
        })?;

        debug!(
            provider,
            endpoint,
            status = status.as_u16(),
            body = %redact_body(&raw),
            "Provider response"
        );

        if status == StatusCode::UNAUTHORIZED && matches!(target.auth, ProviderAuth::ClientCredentials { .. }) {
            self.tokens.invalidate(provider).await;
        }

        if !status.is_success() {
            let (code, message) = normalize_error(status, &raw);
            error!(provider, endpoint, status = status.as_u16(), %code, %message, "Provider API error");
            return Err(ApiError::Provider {
                provider: provider.to_string(),
                status: status.as_u16(),
                code,
                message,
            });
        }

        let body = if raw.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&raw).map_err(|e| ApiError::InvalidResponse {
                provider: provider.to_string(),
                message: e.to_string(),
            })?
        };

        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }

    pub async fn get(&self, provider: &str, endpoint: &str) -> Result<ApiResponse, ApiError> {
        self.request(provider, endpoint, Method::GET, None, &[]).await
    }

    pub async fn post(
        &self,
        provider: &str,
        endpoint: &str,
        body: &Value,
    ) -> Result<ApiResponse, ApiError> {
        self.request(provider, endpoint, Method::POST, Some(body), &[])
            .await
    }

    async fn bearer_token(&self, target: &ProviderEndpoint) -> Result<Option<String>, ApiError> {
        match &target.auth {
            ProviderAuth::None => Ok(None),
            ProviderAuth::Bearer(secret) => Ok(Some(secret.clone())),
            ProviderAuth::ClientCredentials {
                client_id,
                client_secret,
                token_path,
            } => self
                .tokens
                .get_or_fetch(&target.name, || {
                    self.fetch_token(target, client_id, client_secret, token_path)
                })
                .await
                .map(Some),
        }
    }

    async fn fetch_token(
        &self,
        target: &ProviderEndpoint,
        client_id: &str,
        client_secret: &str,
        token_path: &str,
    ) -> Result<(String, Duration), ApiError> {
        let url = format!("{}{}", target.base_url.trim_end_matches('/'), token_path);
        debug!(provider = %target.name, "Fetching bearer token");

        let response = self
            .send_with_retry(&target.name, || {
                self.http
                    .post(&url)
                    .basic_auth(client_id, Some(client_secret))
                    .header("Accept", "application/json")
                    .header("Content-Type", "application/x-www-form-urlencoded")
                    .body("grant_type=client_credentials")
            })
            .await
            .map_err(|e| ApiError::Auth {
                provider: target.name.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let raw = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let (code, message) = normalize_error(status, &raw);
            error!(provider = %target.name, status = status.as_u16(), %code, "Token request rejected");
            return Err(ApiError::Auth {
                provider: target.name.clone(),
                message: format!("{}: {}", code, message),
            });
        }

        let token: TokenResponse = serde_json::from_str(&raw).map_err(|e| ApiError::Auth {
            provider: target.name.clone(),
            message: format!("invalid token response: {}", e),
        })?;

        Ok((
            token.access_token,
            Duration::from_secs(token.expires_in.unwrap_or(0)),
        ))
    }

    /// Send the request built by `build`, rebuilding it for every attempt.
    async fn send_with_retry<F>(
        &self,
        provider: &str,
        build: F,
    ) -> Result<reqwest::Response, ApiError>
    where
        F: Fn() -> RequestBuilder,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    last_error = if e.is_timeout() {
                        format!("timed out after {:?}", self.config.timeout)
                    } else {
                        e.to_string()
                    };

                    if attempt < attempts {
                        let backoff = self.config.retry_backoff * 2_u32.pow(attempt - 1);
                        warn!(
                            provider,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %last_error,
                            "Transport error, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        error!(provider, attempts, error = %last_error, "Transport error, giving up");
        Err(ApiError::Transport {
            provider: provider.to_string(),
            message: format!("request failed after {} attempts: {}", attempts, last_error),
        })
    }
}

/// Extract `(code, message)` from the error envelopes providers use.
///
/// Understands `{"error": {"code", "message"}}`, `{"name", "message", "details":
/// [{"issue", "description"}]}` and OAuth `{"error", "error_description"}`; anything
/// else falls back to the HTTP status.
pub fn normalize_error(status: StatusCode, raw: &str) -> (String, String) {
    let fallback_code = status.as_u16().to_string();
    let fallback_message = status
        .canonical_reason()
        .unwrap_or("unexpected status")
        .to_string();

    let Ok(body) = serde_json::from_str::<Value>(raw) else {
        return (fallback_code, fallback_message);
    };

    if let Some(error) = body.get("error").filter(|e| e.is_object()) {
        let code = error
            .get("code")
            .or_else(|| error.get("type"))
            .and_then(Value::as_str)
            .unwrap_or(&fallback_code)
            .to_string();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(&fallback_message)
            .to_string();
        return (code, message);
    }

    if let Some(details) = body
        .get("details")
        .and_then(Value::as_array)
        .and_then(|d| d.first())
    {
        let code = details
            .get("issue")
            .and_then(Value::as_str)
            .or_else(|| body.get("name").and_then(Value::as_str))
            .unwrap_or(&fallback_code)
            .to_string();
        let message = details
            .get("description")
            .and_then(Value::as_str)
            .or_else(|| body.get("message").and_then(Value::as_str))
            .unwrap_or(&fallback_message)
            .to_string();
        return (code, message);
    }

    let code = body
        .get("name")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .unwrap_or(&fallback_code)
        .to_string();
    let message = body
        .get("message")
        .or_else(|| body.get("error_description"))
        .and_then(Value::as_str)
        .unwrap_or(&fallback_message)
        .to_string();
    (code, message)
}
