use crate::addons::OfferCatalog;
use crate::errors::AppError;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_GROQ_MODEL: &str = "llama-3.1-8b-instant";
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_TAROT_API_URL: &str = "https://tarotapi.dev";
const DEFAULT_EMAIL_API_URL: &str = "https://api.resend.com/emails";
const DEFAULT_PUBLIC_APP_URL: &str = "http://localhost:5173";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    /// Postgres URL. `None` runs the in-memory lead store.
    pub database_url: Option<String>,
    /// Shared secret expected on payment webhooks.
    pub webhook_secret: Option<String>,
    pub protection_offer_id: Option<String>,
    pub horoscope_offer_id: Option<String>,
    pub groq_api_key: Option<String>,
    pub groq_model: String,
    pub groq_base_url: String,
    pub google_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub tarot_api_url: String,
    /// Ephemeris and geocoding service behind the horoscope add-on.
    pub chart_api_url: Option<String>,
    pub email_api_url: String,
    pub email_api_key: Option<String>,
    pub email_from: Option<String>,
    pub public_app_url: String,
    pub checkout_url: Option<String>,
    pub keep_alive_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: None,
            webhook_secret: None,
            protection_offer_id: None,
            horoscope_offer_id: None,
            groq_api_key: None,
            groq_model: DEFAULT_GROQ_MODEL.to_string(),
            groq_base_url: DEFAULT_GROQ_BASE_URL.to_string(),
            google_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            tarot_api_url: DEFAULT_TAROT_API_URL.to_string(),
            chart_api_url: None,
            email_api_url: DEFAULT_EMAIL_API_URL.to_string(),
            email_api_key: None,
            email_from: None,
            public_app_url: DEFAULT_PUBLIC_APP_URL.to_string(),
            checkout_url: None,
            keep_alive_url: None,
        }
    }
}

/// Reads an optional variable, treating blank values as unset.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Provider keys shorter than this are placeholders, not credentials.
const MIN_API_KEY_LEN: usize = 10;

fn api_key_var(name: &str) -> Option<String> {
    optional_var(name).filter(|key| {
        if key.len() < MIN_API_KEY_LEN {
            tracing::warn!("{} looks invalid (too short), ignoring it", name);
            false
        } else {
            true
        }
    })
}

fn http_url(name: &str, value: String) -> anyhow::Result<String> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(value.trim_end_matches('/').to_string())
}

fn optional_http_url(name: &str) -> anyhow::Result<Option<String>> {
    optional_var(name).map(|v| http_url(name, v)).transpose()
}

fn http_url_or(name: &str, default: &str) -> anyhow::Result<String> {
    http_url(name, optional_var(name).unwrap_or_else(|| default.to_string()))
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            database_url: optional_var("DB_URL")
                .or_else(|| optional_var("DATABASE_URL"))
                .map(|url| {
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })
                .transpose()?,
            webhook_secret: optional_var("WEBHOOK_SECRET"),
            protection_offer_id: optional_var("PROTECTION_OFFER_ID"),
            horoscope_offer_id: optional_var("HOROSCOPE_OFFER_ID"),
            groq_api_key: api_key_var("GROQ_API_KEY"),
            groq_model: optional_var("GROQ_MODEL").unwrap_or_else(|| DEFAULT_GROQ_MODEL.into()),
            groq_base_url: http_url_or("GROQ_BASE_URL", DEFAULT_GROQ_BASE_URL)?,
            google_api_key: api_key_var("GOOGLE_API_KEY"),
            gemini_model: optional_var("GEMINI_MODEL")
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.into()),
            gemini_base_url: http_url_or("GEMINI_BASE_URL", DEFAULT_GEMINI_BASE_URL)?,
            tarot_api_url: http_url_or("TAROT_API_URL", DEFAULT_TAROT_API_URL)?,
            chart_api_url: optional_http_url("CHART_API_URL")?,
            email_api_url: http_url_or("EMAIL_API_URL", DEFAULT_EMAIL_API_URL)?,
            email_api_key: optional_var("EMAIL_API_KEY"),
            email_from: optional_var("EMAIL_FROM"),
            public_app_url: http_url_or("PUBLIC_APP_URL", DEFAULT_PUBLIC_APP_URL)?,
            checkout_url: optional_http_url("CHECKOUT_URL")?,
            keep_alive_url: optional_http_url("KEEP_ALIVE_URL")?,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        match config.database_url {
            Some(ref url) => tracing::debug!("Database URL: {}...", &url[..20.min(url.len())]),
            None => tracing::warn!(
                "DATABASE_URL not set. Leads are kept in memory and lost on restart."
            ),
        }
        if config.webhook_secret.is_none() {
            tracing::warn!("WEBHOOK_SECRET not set. Payment webhooks are not authenticated.");
        }
        if config.groq_api_key.is_none() && config.google_api_key.is_none() {
            tracing::warn!("No reading provider configured. Readings use the built-in template.");
        }
        if config.chart_api_url.is_none() {
            tracing::warn!("CHART_API_URL not set. Horoscope requests will fail.");
        }
        tracing::debug!("Tarot API URL: {}", config.tarot_api_url);
        tracing::debug!("Public app URL: {}", config.public_app_url);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    pub fn offer_catalog(&self) -> OfferCatalog {
        OfferCatalog {
            protection_offer_id: self.protection_offer_id.clone(),
            horoscope_offer_id: self.horoscope_offer_id.clone(),
        }
    }

    /// Link emailed to customers so they can reopen their reading.
    pub fn access_link(&self, email: &str) -> Result<String, AppError> {
        let mut url = Url::parse(&self.public_app_url).map_err(|e| {
            AppError::InternalError(format!("Invalid PUBLIC_APP_URL {}: {}", self.public_app_url, e))
        })?;
        url.query_pairs_mut().append_pair("recover", email);
        Ok(url.to_string())
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(14 * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_url_validation() {
        assert!(http_url("X", "ftp://example.com".into()).is_err());
        assert_eq!(
            http_url("X", "https://example.com/".into()).unwrap(),
            "https://example.com"
        );
    }

    #[test]
    fn test_access_link() {
        let config = Config {
            public_app_url: "https://leitura.example".into(),
            ..Config::default()
        };
        assert_eq!(
            config.access_link("ana@example.com").unwrap(),
            "https://leitura.example/?recover=ana%40example.com"
        );
    }

    #[test]
    fn test_access_link_round_trips_plus_address() {
        let config = Config {
            public_app_url: "https://leitura.example".into(),
            ..Config::default()
        };
        let link = config.access_link("ana+tarot@example.com").unwrap();
        assert_eq!(link, "https://leitura.example/?recover=ana%2Btarot%40example.com");

        let parsed = Url::parse(&link).unwrap();
        let recovered: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        assert_eq!(
            recovered,
            vec![("recover".to_string(), "ana+tarot@example.com".to_string())]
        );
    }

    #[test]
    fn test_access_link_rejects_invalid_base() {
        let config = Config {
            public_app_url: "not a url".into(),
            ..Config::default()
        };
        assert!(config.access_link("ana@example.com").is_err());
    }

    #[test]
    fn test_offer_catalog_from_config() {
        let config = Config {
            protection_offer_id: Some("abc".into()),
            ..Config::default()
        };
        let catalog = config.offer_catalog();
        assert_eq!(catalog.protection_offer_id.as_deref(), Some("abc"));
        assert!(catalog.horoscope_offer_id.is_none());
    }
}
