use anyhow::{anyhow, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::payments::client::ApiClientConfig;
use crate::payments::providers::{BankTransferConfig, CardConfig, DirectDebitConfig, WalletConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    /// In-memory repositories are used when absent
    pub database: Option<DatabaseConfig>,
    /// In-memory session store is used when absent
    pub redis: Option<RedisConfig>,
    pub http: HttpConfig,
    pub card: Option<CardConfig>,
    pub wallet: Option<WalletConfig>,
    pub direct_debit: DirectDebitConfig,
    pub bank_transfer: BankTransferConfig,
    pub security: SecurityConfig,
    pub checkout: CheckoutConfig,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    /// Externally reachable base URL, used for provider return URLs
    pub public_base_url: String,
}

impl ServerConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub token_safety_margin_secs: u64,
}

impl HttpConfig {
    pub fn client_config(&self) -> ApiClientConfig {
        ApiClientConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            max_attempts: self.max_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            token_safety_margin: Duration::from_secs(self.token_safety_margin_secs),
        }
    }
}

#[derive(Clone)]
pub struct SecurityConfig {
    pub csrf_secret: String,
    pub admin_api_token: Option<String>,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("csrf_secret", &"[REDACTED]")
            .field("admin_api_token", &self.admin_api_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub success_url: String,
    pub failure_url: String,
    pub pending_order_ttl_secs: u64,
    /// Orders on hold longer than this are reported by the expiry sweep
    pub hold_alert_after_secs: u64,
}

/// Boolean feature switches resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub card_enabled: bool,
    pub wallet_enabled: bool,
    pub direct_debit_enabled: bool,
    pub bank_transfer_enabled: bool,
    /// Accept webhooks from sources without a configured secret.
    /// Operational risk; rejected in production.
    pub allow_unsigned_webhooks: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            card_enabled: true,
            wallet_enabled: true,
            direct_debit_enabled: true,
            bank_transfer_enabled: true,
            allow_unsigned_webhooks: false,
        }
    }
}

impl Capabilities {
    /// Lookup by field name. Names not declared here are always off.
    pub fn capability(&self, name: &str) -> bool {
        match name {
            "card_enabled" => self.card_enabled,
            "wallet_enabled" => self.wallet_enabled,
            "direct_debit_enabled" => self.direct_debit_enabled,
            "bank_transfer_enabled" => self.bank_transfer_enabled,
            "allow_unsigned_webhooks" => self.allow_unsigned_webhooks,
            _ => false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let server = ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .context("PORT not set")?
                .parse()
                .context("PORT must be a valid number")?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .context("PUBLIC_BASE_URL not set")?
                .trim_end_matches('/')
                .to_string(),
        };

        let database = match optional("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 20)?,
            }),
            None => None,
        };

        let redis = optional("REDIS_URL").map(|url| RedisConfig { url });

        let http = HttpConfig {
            timeout_secs: parse_or("PROVIDER_TIMEOUT_SECS", 30)?,
            max_attempts: parse_or("PROVIDER_MAX_ATTEMPTS", 3)?,
            retry_backoff_ms: parse_or("PROVIDER_RETRY_BACKOFF_MS", 500)?,
            token_safety_margin_secs: parse_or("TOKEN_SAFETY_MARGIN_SECS", 60)?,
        };

        let card = match optional("CARD_SECRET_KEY") {
            Some(secret_key) => Some(CardConfig {
                base_url: env::var("CARD_API_BASE_URL").context("CARD_API_BASE_URL not set")?,
                secret_key,
                webhook_secret: optional("CARD_WEBHOOK_SECRET"),
            }),
            None => None,
        };

        let wallet = match optional("WALLET_CLIENT_ID") {
            Some(client_id) => Some(WalletConfig {
                base_url: env::var("WALLET_API_BASE_URL")
                    .context("WALLET_API_BASE_URL not set")?,
                client_id,
                client_secret: env::var("WALLET_CLIENT_SECRET")
                    .context("WALLET_CLIENT_SECRET not set")?,
                webhook_id: optional("WALLET_WEBHOOK_ID"),
            }),
            None => None,
        };

        let direct_debit = DirectDebitConfig {
            mandate_prefix: optional("DIRECT_DEBIT_MANDATE_PREFIX")
                .unwrap_or_else(|| DirectDebitConfig::default().mandate_prefix),
            creditor_id: optional("DIRECT_DEBIT_CREDITOR_ID"),
            events_secret: optional("DIRECT_DEBIT_EVENTS_SECRET"),
        };

        let bank_transfer = BankTransferConfig {
            reference_prefix: optional("BANK_TRANSFER_REFERENCE_PREFIX")
                .unwrap_or_else(|| BankTransferConfig::default().reference_prefix),
            account_holder: optional("BANK_TRANSFER_ACCOUNT_HOLDER").unwrap_or_default(),
            iban: optional("BANK_TRANSFER_IBAN").unwrap_or_default(),
            events_secret: optional("BANK_TRANSFER_EVENTS_SECRET"),
        };

        let security = SecurityConfig {
            csrf_secret: env::var("CSRF_SECRET").context("CSRF_SECRET not set")?,
            admin_api_token: optional("ADMIN_API_TOKEN"),
        };

        let checkout = CheckoutConfig {
            success_url: optional("CHECKOUT_SUCCESS_URL")
                .unwrap_or_else(|| format!("{}/checkout/success", server.public_base_url)),
            failure_url: optional("CHECKOUT_FAILURE_URL")
                .unwrap_or_else(|| format!("{}/checkout/failure", server.public_base_url)),
            pending_order_ttl_secs: parse_or("PENDING_ORDER_TTL_SECS", 3600)?,
            hold_alert_after_secs: parse_or("HOLD_ALERT_AFTER_SECS", 7 * 24 * 3600)?,
        };

        let defaults = Capabilities::default();
        let capabilities = Capabilities {
            card_enabled: flag_or("CARD_ENABLED", defaults.card_enabled)?,
            wallet_enabled: flag_or("WALLET_ENABLED", defaults.wallet_enabled)?,
            direct_debit_enabled: flag_or("DIRECT_DEBIT_ENABLED", defaults.direct_debit_enabled)?,
            bank_transfer_enabled: flag_or("BANK_TRANSFER_ENABLED", defaults.bank_transfer_enabled)?,
            allow_unsigned_webhooks: flag_or(
                "ALLOW_UNSIGNED_WEBHOOKS",
                defaults.allow_unsigned_webhooks,
            )?,
        };

        let config = Config {
            server,
            database,
            redis,
            http,
            card,
            wallet,
            direct_debit,
            bank_transfer,
            security,
            checkout,
            capabilities,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port < 1024 {
            return Err(anyhow!(
                "Port must be at least 1024, got {}",
                self.server.port
            ));
        }

        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        if !self.server.public_base_url.starts_with("http") {
            return Err(anyhow!(
                "PUBLIC_BASE_URL must be an absolute http(s) URL, got {}",
                self.server.public_base_url
            ));
        }

        if let Some(database) = &self.database {
            if database.max_connections == 0 {
                return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
            }
        }

        if self.http.max_attempts == 0 {
            return Err(anyhow!("PROVIDER_MAX_ATTEMPTS must be greater than 0"));
        }
        if self.http.timeout_secs == 0 {
            return Err(anyhow!("PROVIDER_TIMEOUT_SECS must be greater than 0"));
        }

        if self.security.csrf_secret.len() < 32 {
            return Err(anyhow!("CSRF_SECRET must be at least 32 characters"));
        }

        if self.checkout.pending_order_ttl_secs == 0 {
            return Err(anyhow!("PENDING_ORDER_TTL_SECS must be greater than 0"));
        }

        if self.checkout.hold_alert_after_secs < self.checkout.pending_order_ttl_secs {
            return Err(anyhow!(
                "HOLD_ALERT_AFTER_SECS must not be shorter than PENDING_ORDER_TTL_SECS"
            ));
        }

        if self.server.is_production() {
            if self.database.is_none() {
                return Err(anyhow!("DATABASE_URL is required in production"));
            }
            if self.capabilities.allow_unsigned_webhooks {
                return Err(anyhow!(
                    "ALLOW_UNSIGNED_WEBHOOKS cannot be enabled in production"
                ));
            }
        }

        Ok(())
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        None => Ok(default),
    }
}

fn flag_or(key: &str, default: bool) -> Result<bool> {
    match optional(key) {
        Some(raw) => parse_flag(&raw).ok_or_else(|| anyhow!("{} must be true or false, got {}", key, raw)),
        None => Ok(default),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
