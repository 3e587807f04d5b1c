//! Service configuration read from the environment (`.env` is loaded by the binary).

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::marketplaces::OAuthApp;

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.perplexity.ai";
pub const DEFAULT_LLM_MODEL: &str = "sonar";

#[derive(Debug, Clone)]
pub struct LlmConfig { pub base_url: String, pub api_key: String, pub model: String }

#[derive(Debug, Clone)]
pub struct MailerConfig { pub api_key: String, pub from: String }

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub forecast_cache_ttl: Duration,
    pub report_tick: Duration,
    pub shopify_api_version: String,
    pub llm: Option<LlmConfig>,
    pub mercadolivre: Option<OAuthApp>,
    pub amazon: Option<OAuthApp>,
    pub mailer: Option<MailerConfig>,
    pub nats_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            port: try_load("PORT", "8083")?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: try_load("DATABASE_MAX_CONNECTIONS", "10")?,
            jwt_secret: env::var("SUPABASE_JWT_SECRET").context("SUPABASE_JWT_SECRET must be set")?,
            forecast_cache_ttl: Duration::from_secs(try_load("FORECAST_CACHE_TTL_SECS", "3600")?),
            report_tick: Duration::from_secs(try_load::<u64>("REPORT_TICK_SECS", "300")?.max(1)),
            shopify_api_version: try_load("SHOPIFY_API_VERSION", crate::marketplaces::shopify::DEFAULT_API_VERSION)?,
            llm: optional("LLM_API_KEY").map(|api_key| LlmConfig {
                base_url: optional("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
                api_key,
                model: optional("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            }),
            mercadolivre: oauth_app("MERCADOLIVRE_CLIENT_ID", "MERCADOLIVRE_CLIENT_SECRET"),
            amazon: oauth_app("AMAZON_LWA_CLIENT_ID", "AMAZON_LWA_CLIENT_SECRET"),
            mailer: optional("RESEND_API_KEY").map(|api_key| MailerConfig {
                api_key,
                from: optional("REPORTS_FROM_EMAIL").unwrap_or_else(|| "UNISTOCK <relatorios@unistock.app>".to_string()),
            }),
            nats_url: optional("NATS_URL"),
        })
    }
}

fn optional(key: &str) -> Option<String> { env::var(key).ok().filter(|v| !v.trim().is_empty()) }

fn oauth_app(id_key: &str, secret_key: &str) -> Option<OAuthApp> {
    match (optional(id_key), optional(secret_key)) {
        (Some(client_id), Some(client_secret)) => Some(OAuthApp { client_id, client_secret }),
        (None, None) => None,
        _ => {
            warn!("{id_key} and {secret_key} must be set together, ignoring both");
            None
        }
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = optional(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse().map_err(|e| anyhow::anyhow!("Invalid {key} value '{raw}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_load_default_and_invalid() {
        assert_eq!(try_load::<u16>("UNISTOCK_TEST_UNSET_PORT", "8083").unwrap(), 8083);
        env::set_var("UNISTOCK_TEST_BAD_NUMBER", "abc");
        assert!(try_load::<u32>("UNISTOCK_TEST_BAD_NUMBER", "1").is_err());
    }

    #[test]
    fn test_oauth_app_requires_both_halves() {
        env::set_var("UNISTOCK_TEST_ID", "id");
        assert!(oauth_app("UNISTOCK_TEST_ID", "UNISTOCK_TEST_SECRET_UNSET").is_none());
        env::set_var("UNISTOCK_TEST_SECRET", "secret");
        let app = oauth_app("UNISTOCK_TEST_ID", "UNISTOCK_TEST_SECRET").unwrap();
        assert_eq!(app.client_secret, "secret");
    }
}
