use log::{debug, warn};
use std::env;
use std::time::Duration;

pub const API_KEY_ENV: &str = "MISTRAL_API_KEY";
pub const CACHE_TTL_ENV: &str = "CACHE_TTL_MS";
pub const PORT_ENV: &str = "PORT";
pub const BASE_URL_ENV: &str = "TONEPICKER_API_BASE_URL";
pub const MODEL_ENV: &str = "TONEPICKER_MODEL";
pub const TIMEOUT_ENV: &str = "TONEPICKER_REQUEST_TIMEOUT_SECS";

const DEFAULT_CACHE_TTL_MS: u64 = 60_000;
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_BASE_URL: &str = "https://api.mistral.ai/v1";
const DEFAULT_MODEL: &str = "mistral-small-latest";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSettings {
    /// Completion service credential. `None` means every cache miss fails
    /// with a configuration error.
    pub api_key: Option<String>,
    pub cache_ttl: Duration,
    pub host: String,
    pub port: u16,
    pub base_url: String,
    pub model: String,
    pub request_timeout: Duration,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            cache_ttl: Duration::from_millis(DEFAULT_CACHE_TTL_MS),
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl AppSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read settings through `lookup`, falling back to defaults for missing,
    /// blank or unparsable values.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let cache_ttl_ms = parse_or(CACHE_TTL_ENV, value(CACHE_TTL_ENV), DEFAULT_CACHE_TTL_MS);
        let timeout_secs = parse_or(TIMEOUT_ENV, value(TIMEOUT_ENV), DEFAULT_TIMEOUT_SECS);
        let port = parse_or(PORT_ENV, value(PORT_ENV), DEFAULT_PORT);

        let base_url = match value(BASE_URL_ENV) {
            Some(url) => {
                debug!("Using base URL from environment variable {}: {}", BASE_URL_ENV, url);
                url
            }
            None => defaults.base_url,
        };

        Self {
            api_key: value(API_KEY_ENV),
            cache_ttl: Duration::from_millis(cache_ttl_ms),
            host: defaults.host,
            port,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: value(MODEL_ENV).unwrap_or(defaults.model),
            request_timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(
                "Ignoring invalid {} value '{}', falling back to {}",
                key, raw, default
            );
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> AppSettings {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let settings = settings_from(&[]);
        assert_eq!(settings, AppSettings::default());
        assert!(!settings.has_api_key());
        assert_eq!(settings.cache_ttl, Duration::from_secs(60));
        assert_eq!(settings.listen_addr(), "0.0.0.0:5000");
    }

    #[test]
    fn test_reads_overrides() {
        let settings = settings_from(&[
            (API_KEY_ENV, " secret "),
            (CACHE_TTL_ENV, "1500"),
            (PORT_ENV, "8080"),
            (BASE_URL_ENV, "http://localhost:11434/v1/"),
            (MODEL_ENV, "mistral-large-latest"),
            (TIMEOUT_ENV, "5"),
        ]);

        assert_eq!(settings.api_key.as_deref(), Some("secret"));
        assert_eq!(settings.cache_ttl, Duration::from_millis(1500));
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.base_url, "http://localhost:11434/v1");
        assert_eq!(settings.model, "mistral-large-latest");
        assert_eq!(settings.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_blank_and_invalid_values_fall_back() {
        let settings = settings_from(&[
            (API_KEY_ENV, "   "),
            (CACHE_TTL_ENV, "soon"),
            (PORT_ENV, "99999"),
            (BASE_URL_ENV, ""),
        ]);

        assert_eq!(settings.api_key, None);
        assert_eq!(settings.cache_ttl, Duration::from_millis(DEFAULT_CACHE_TTL_MS));
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
    }
}
