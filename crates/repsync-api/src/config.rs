use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use repsync_core::config::{
    bounded, optional_trimmed, required_trimmed, value_or_default, ConfigError, SyncSettings,
};
use repsync_core::remote::DataApiConfig;
use repsync_core::util::is_http_url;

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// `libsql://`/`https://` for a hosted database, otherwise a local path
    pub relational_url: String,
    pub relational_auth_token: Option<String>,
    pub document_store_url: String,
    pub document_store_api_key: String,
    pub document_store_data_source: String,
    pub document_store_database: String,
    pub cron_secret: Option<String>,
    pub webhook_secret: Option<String>,
    pub service_role_key: Option<String>,
    pub request_timeout: Duration,
    pub sync: SyncSettings,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("relational_url", &self.relational_url)
            .field("relational_auth_token", &redacted(self.relational_auth_token.as_ref()))
            .field("document_store_url", &self.document_store_url)
            .field("document_store_api_key", &"[REDACTED]")
            .field("document_store_data_source", &self.document_store_data_source)
            .field("document_store_database", &self.document_store_database)
            .field("cron_secret", &redacted(self.cron_secret.as_ref()))
            .field("webhook_secret", &redacted(self.webhook_secret.as_ref()))
            .field("service_role_key", &redacted(self.service_role_key.as_ref()))
            .field("request_timeout", &self.request_timeout)
            .field("sync", &self.sync)
            .finish()
    }
}

fn redacted(value: Option<&String>) -> Option<&'static str> {
    value.map(|_| "[REDACTED]")
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "REPSYNC_API_BIND_ADDR", "127.0.0.1:8080");

        let relational_url = required_trimmed(&lookup, "RELATIONAL_DATABASE_URL")?;
        let relational_auth_token = optional_trimmed(&lookup, "RELATIONAL_AUTH_TOKEN");
        if relational_url.starts_with("libsql://") && relational_auth_token.is_none() {
            return Err(ConfigError::MissingVar("RELATIONAL_AUTH_TOKEN"));
        }

        let document_store_url = required_trimmed(&lookup, "DOCUMENT_STORE_URL")?;
        if !is_http_url(&document_store_url) {
            return Err(ConfigError::Invalid(
                "DOCUMENT_STORE_URL must start with http:// or https://".to_string(),
            ));
        }
        let document_store_url = document_store_url.trim_end_matches('/').to_string();
        let document_store_api_key = required_trimmed(&lookup, "DOCUMENT_STORE_API_KEY")?;
        let document_store_data_source =
            value_or_default(&lookup, "DOCUMENT_STORE_DATA_SOURCE", "Cluster0");
        let document_store_database =
            value_or_default(&lookup, "DOCUMENT_STORE_DATABASE", "repsync");

        let cron_secret = optional_trimmed(&lookup, "CRON_SECRET");
        let webhook_secret = optional_trimmed(&lookup, "WEBHOOK_SECRET");
        let service_role_key = optional_trimmed(&lookup, "SERVICE_ROLE_KEY");
        if cron_secret.is_none() && webhook_secret.is_none() && service_role_key.is_none() {
            return Err(ConfigError::Invalid(
                "at least one of CRON_SECRET, WEBHOOK_SECRET or SERVICE_ROLE_KEY must be set"
                    .to_string(),
            ));
        }

        let mut sync = SyncSettings::from_lookup(&lookup)?;
        let cron_cooldown_secs = bounded(&lookup, "CRON_COOLDOWN_SECS", 3_600, 0..=86_400)?;
        sync.cooldown = chrono::Duration::seconds(cron_cooldown_secs);

        let timeout_secs = bounded(&lookup, "REQUEST_TIMEOUT_SECS", 30, 1..=300)?;

        Ok(Self {
            bind_addr,
            relational_url,
            relational_auth_token,
            document_store_url,
            document_store_api_key,
            document_store_data_source,
            document_store_database,
            cron_secret,
            webhook_secret,
            service_role_key,
            request_timeout: Duration::from_secs(timeout_secs.unsigned_abs()),
            sync,
        })
    }

    pub fn data_api(&self) -> DataApiConfig {
        DataApiConfig {
            base_url: self.document_store_url.clone(),
            api_key: self.document_store_api_key.clone(),
            data_source: self.document_store_data_source.clone(),
            database: self.document_store_database.clone(),
            timeout: self.request_timeout,
        }
    }
}
