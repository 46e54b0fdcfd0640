use crate::errors::{AppError, Result};
use chrono::FixedOffset;
use std::path::PathBuf;

/// Runtime settings, read once from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub jwt_secret: String,
    pub rate_limit_per_sec: u64,
    pub pix_receiver_key: String,
    pub pix_merchant_name: String,
    pub pix_merchant_city: String,
    pub pix_webhook_secret: String,
    pub document_root: PathBuf,
    pub public_base_url: String,
    pub cep_api_base: String,
    /// Offset used to decide where "today" and "this month" start.
    pub business_offset: FixedOffset,
    pub welcome_credit_cents: i64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = std::env::var("JWT_SECRET")
            .map_err(|_| AppError::ConfigError("JWT_SECRET must be set".to_string()))?;
        if jwt_secret.len() < 16 {
            return Err(AppError::ConfigError(
                "JWT_SECRET must be at least 16 characters".to_string(),
            ));
        }

        let offset_hours: i32 = env_parse("BUSINESS_UTC_OFFSET_HOURS", -3);
        let business_offset = FixedOffset::east_opt(offset_hours * 3600).ok_or_else(|| {
            AppError::ConfigError(format!("Invalid BUSINESS_UTC_OFFSET_HOURS: {}", offset_hours))
        })?;

        let config = Self {
            database_path: env_or("DATABASE_PATH", "luckyybet.db"),
            port: env_parse("PORT", 8080),
            jwt_secret,
            rate_limit_per_sec: env_parse("RATE_LIMIT_PER_SEC", 10),
            pix_receiver_key: env_or("PIX_RECEIVER_KEY", "chave-pix-luckyybet@exemplo.com"),
            pix_merchant_name: env_or("PIX_MERCHANT_NAME", "LuckyYBet"),
            pix_merchant_city: env_or("PIX_MERCHANT_CITY", "SAO PAULO"),
            pix_webhook_secret: env_or("PIX_WEBHOOK_SECRET", ""),
            document_root: PathBuf::from(env_or("DOCUMENT_ROOT", "storage")),
            public_base_url: env_or("PUBLIC_BASE_URL", "http://localhost:8080/files"),
            cep_api_base: env_or("CEP_API_BASE", "https://viacep.com.br"),
            business_offset,
            welcome_credit_cents: env_parse("WELCOME_CREDIT_CENTS", 0),
        };

        if config.pix_webhook_secret.is_empty() {
            tracing::warn!(action = "config_warning", "PIX_WEBHOOK_SECRET is empty; webhook calls will be rejected");
        }

        Ok(config)
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database_path: ":memory:".to_string(),
            port: 0,
            jwt_secret: "test-secret-that-is-long-enough".to_string(),
            rate_limit_per_sec: 1000,
            pix_receiver_key: "chave-pix-luckyybet@exemplo.com".to_string(),
            pix_merchant_name: "LuckyYBet".to_string(),
            pix_merchant_city: "SAO PAULO".to_string(),
            pix_webhook_secret: "webhook-secret".to_string(),
            document_root: std::env::temp_dir().join("luckyybet-test-docs"),
            public_base_url: "http://localhost/files".to_string(),
            cep_api_base: "http://127.0.0.1:9".to_string(),
            business_offset: FixedOffset::west_opt(3 * 3600).expect("valid offset"),
            welcome_credit_cents: 0,
        }
    }
}
