//! Configuration, read from the environment once at startup.

use secrecy::SecretString;

use crate::error::ConfigError;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// WhatsApp Business Cloud API access token.
    pub whatsapp_token: SecretString,
    /// Phone number id the bot sends from.
    pub phone_number_id: String,
    /// Token the webhook verification handshake must echo.
    pub webhook_verify_token: String,
    /// Optional WhatsApp Flow id for the structured registration form.
    pub registration_flow_id: Option<String>,
    /// Path to the local database file.
    pub db_path: String,
    /// HTTP listen port for webhook + analytics routes.
    pub port: u16,
    /// Object storage endpoint for CSV exports (e.g. Supabase Storage).
    pub storage_url: Option<String>,
    /// Object storage API key.
    pub storage_key: Option<SecretString>,
    /// Bucket name for exports.
    pub storage_bucket: String,
}

impl AppConfig {
    /// Build the config from environment variables.
    ///
    /// Required: `WHATSAPP_TOKEN`, `WHATSAPP_PHONE_NUMBER_ID`,
    /// `WEBHOOK_VERIFY_TOKEN`. Everything else has a default or is optional.
    pub fn from_env() -> Result<Self, ConfigError> {
        let whatsapp_token = require("WHATSAPP_TOKEN")?;
        let phone_number_id = require("WHATSAPP_PHONE_NUMBER_ID")?;
        let webhook_verify_token = require("WEBHOOK_VERIFY_TOKEN")?;

        let port: u16 = std::env::var("REFILOE_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: "REFILOE_PORT".into(),
                message: "must be a port number".into(),
            })?;

        Ok(Self {
            whatsapp_token: SecretString::from(whatsapp_token),
            phone_number_id,
            webhook_verify_token,
            registration_flow_id: std::env::var("WHATSAPP_REGISTRATION_FLOW_ID").ok(),
            db_path: std::env::var("REFILOE_DB_PATH")
                .unwrap_or_else(|_| "./data/refiloe.db".to_string()),
            port,
            storage_url: std::env::var("STORAGE_URL").ok(),
            storage_key: std::env::var("STORAGE_KEY").ok().map(SecretString::from),
            storage_bucket: std::env::var("STORAGE_BUCKET")
                .unwrap_or_else(|_| "exports".to_string()),
        })
    }
}

fn require(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}
