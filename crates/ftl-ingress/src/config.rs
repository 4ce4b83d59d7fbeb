//! Server configuration.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ftl_core::observability::LogFormat;
use ftl_runtime::configuration::KEY_LEN;
use ftl_runtime::fabric::DEFAULT_EVENT_BUFFER;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:8891";

/// CORS allow lists. Empty origins disable CORS handling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed to call the ingress; `*` allows any.
    #[serde(default)]
    pub allow_origins: Vec<String>,
    /// Request headers a preflight may ask for.
    #[serde(default)]
    pub allow_headers: Vec<String>,
}

impl CorsConfig {
    /// Whether any origin is configured.
    #[must_use]
    pub fn enabled(&self) -> bool {
        !self.allow_origins.is_empty()
    }
}

/// Key sealing stored secrets.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    /// Decodes standard base64 of exactly [`KEY_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for bad base64 or a wrong length.
    pub fn from_base64(text: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(text)
            .map_err(|e| Error::invalid_config(format!("FTL_SECRET_KEY is not base64: {e}")))?;
        let key = <[u8; KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
            Error::invalid_config(format!(
                "FTL_SECRET_KEY must decode to {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    /// The raw key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Configuration for the ingress server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Development mode: pretty logs by default.
    #[serde(default)]
    pub debug: bool,
    /// JSON schema snapshot to serve from at startup.
    #[serde(default)]
    pub schema_path: Option<PathBuf>,
    /// Schema endpoint of another server to follow instead.
    #[serde(skip)]
    pub schema_url: Option<Url>,
    /// CORS settings.
    #[serde(default)]
    pub cors: CorsConfig,
    /// Explicit log format; derived from `debug` when unset.
    #[serde(skip)]
    pub log_format: Option<LogFormat>,
    /// Capacity of schema event channels.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Key for stored secrets; the built-in key when unset.
    #[serde(skip)]
    pub secret_key: Option<SecretKey>,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8891))
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            debug: false,
            schema_path: None,
            schema_url: None,
            cors: CorsConfig::default(),
            log_format: None,
            event_buffer: default_event_buffer(),
            secret_key: None,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// Supported env vars:
    /// - `FTL_BIND` (default `127.0.0.1:8891`)
    /// - `FTL_DEBUG`
    /// - `FTL_SCHEMA_URL` (`http(s)://` schema endpoint to follow, or the path
    ///   of a JSON schema snapshot)
    /// - `FTL_ALLOW_ORIGINS` (comma-separated, or `*`)
    /// - `FTL_ALLOW_HEADERS` (comma-separated)
    /// - `FTL_LOG_FORMAT` (`json` | `pretty`)
    /// - `FTL_EVENT_BUFFER`
    /// - `FTL_SECRET_KEY` (standard base64 of a 16-byte key)
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup` instead of the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a variable is set but cannot be parsed.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = |name: &str| {
            lookup(name).and_then(|v| {
                let trimmed = v.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
        };
        let mut config = Self::default();

        if let Some(bind) = env("FTL_BIND") {
            config.bind = bind.parse().map_err(|e| {
                Error::invalid_config(format!("FTL_BIND must be host:port (got {bind}): {e}"))
            })?;
        }
        if let Some(debug) = env("FTL_DEBUG") {
            config.debug = parse_bool("FTL_DEBUG", &debug)?;
        }
        if let Some(url) = env("FTL_SCHEMA_URL") {
            if url.starts_with("http://") || url.starts_with("https://") {
                config.schema_url = Some(Url::parse(&url).map_err(|e| {
                    Error::invalid_config(format!("FTL_SCHEMA_URL is not a URL (got {url}): {e}"))
                })?);
            } else {
                config.schema_path =
                    Some(PathBuf::from(url.strip_prefix("file://").unwrap_or(&url)));
            }
        }
        if let Some(origins) = env("FTL_ALLOW_ORIGINS") {
            config.cors.allow_origins = parse_list(&origins);
        }
        if let Some(headers) = env("FTL_ALLOW_HEADERS") {
            config.cors.allow_headers = parse_list(&headers);
        }
        if let Some(format) = env("FTL_LOG_FORMAT") {
            config.log_format = Some(
                format
                    .parse()
                    .map_err(|e: ftl_core::Error| Error::invalid_config(format!("FTL_LOG_FORMAT: {e}")))?,
            );
        }
        if let Some(buffer) = env("FTL_EVENT_BUFFER") {
            config.event_buffer = match buffer.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(Error::invalid_config(format!(
                        "FTL_EVENT_BUFFER must be a positive integer (got {buffer})"
                    )));
                }
            };
        }
        if let Some(key) = env("FTL_SECRET_KEY") {
            config.secret_key = Some(SecretKey::from_base64(&key)?);
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks settings that cannot be expressed in the types.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when `*` is mixed with other origins.
    pub fn validate(&self) -> Result<()> {
        let origins = &self.cors.allow_origins;
        if origins.len() > 1 && origins.iter().any(|o| o == "*") {
            return Err(Error::invalid_config(
                "FTL_ALLOW_ORIGINS: '*' must be the only allowed origin",
            ));
        }
        Ok(())
    }

    /// The log format to install.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format.unwrap_or(if self.debug {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        })
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::invalid_config(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_env_with(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_env() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind.to_string(), DEFAULT_BIND);
        assert!(!config.debug);
        assert!(!config.cors.enabled());
        assert_eq!(config.event_buffer, 64);
        assert_eq!(config.log_format(), LogFormat::Json);
    }

    #[test]
    fn env_overrides_apply() {
        let config = load(&[
            ("FTL_BIND", "0.0.0.0:9000"),
            ("FTL_DEBUG", "yes"),
            ("FTL_SCHEMA_URL", "file:///tmp/schema.json"),
            ("FTL_ALLOW_ORIGINS", "http://a.test, http://b.test"),
            ("FTL_ALLOW_HEADERS", "x-one,,x-two"),
            ("FTL_EVENT_BUFFER", "8"),
        ])
        .unwrap();
        assert_eq!(config.bind.port(), 9000);
        assert!(config.debug);
        assert_eq!(config.schema_path, Some(PathBuf::from("/tmp/schema.json")));
        assert!(config.schema_url.is_none());
        assert_eq!(config.cors.allow_origins, ["http://a.test", "http://b.test"]);
        assert_eq!(config.cors.allow_headers, ["x-one", "x-two"]);
        assert_eq!(config.event_buffer, 8);
        assert_eq!(config.log_format(), LogFormat::Pretty);

        let config = load(&[("FTL_DEBUG", "true"), ("FTL_LOG_FORMAT", "json")]).unwrap();
        assert_eq!(config.log_format(), LogFormat::Json);
    }

    #[test]
    fn http_schema_url_is_followed_not_read() {
        let config = load(&[("FTL_SCHEMA_URL", "http://127.0.0.1:8891/schema")]).unwrap();
        assert_eq!(
            config.schema_url.as_ref().map(Url::as_str),
            Some("http://127.0.0.1:8891/schema")
        );
        assert!(config.schema_path.is_none());
        assert!(load(&[("FTL_SCHEMA_URL", "http://")]).is_err());
    }

    #[test]
    fn secret_key_is_decoded_and_hidden() {
        let config = load(&[("FTL_SECRET_KEY", "MDEyMzQ1Njc4OWFiY2RlZg==")]).unwrap();
        let key = config.secret_key.as_ref().unwrap();
        assert_eq!(key.as_bytes(), b"0123456789abcdef");
        assert!(!format!("{config:?}").contains("0123456789"));
        assert!(load(&[]).unwrap().secret_key.is_none());
    }

    #[test]
    fn invalid_values_are_rejected() {
        for vars in [
            [("FTL_BIND", "nowhere")],
            [("FTL_DEBUG", "maybe")],
            [("FTL_EVENT_BUFFER", "0")],
            [("FTL_LOG_FORMAT", "xml")],
            [("FTL_ALLOW_ORIGINS", "*,http://a.test")],
            [("FTL_SECRET_KEY", "not base64!")],
            [("FTL_SECRET_KEY", "c2hvcnQ=")],
        ] {
            let err = load(&vars).unwrap_err();
            assert!(matches!(err, Error::InvalidConfig { .. }), "{vars:?}: {err}");
        }
    }
}
