// ./api/src/config.rs
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MONGODB_URL: &str = "mongodb://localhost:27017";
const DEFAULT_MONGODB_DATABASE: &str = "learnbalochi";
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CONVERTER_URL: &str = "http://converter:8000/convert";
const DEFAULT_TRANSLATOR_URL: &str = "http://translator:9000/v1/chat/completions";
const DEFAULT_TRANSLATOR_MODEL: &str = "balochi-translator";
const DEFAULT_TRANSLATION_LANGUAGE: &str = "Balochi";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
const DEFAULT_ALLOWED_ORIGINS: [&str; 5] = [
    "http://learnbalochi.com",
    "https://learnbalochi.com",
    "http://localhost:4200",
    "http://localhost:4100",
    "http://localhost:8084",
];

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Unknown STORE_BACKEND '{0}' (expected 'memory' or 'mongodb')")]
    UnknownStoreBackend(String),
    #[error("ALLOWED_ORIGINS cannot contain '*' when credentials are allowed")]
    WildcardOrigin,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Memory,
    MongoDb { url: String, database: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub store_backend: StoreBackend,
    pub store_timeout: Duration,
    pub converter_url: String,
    pub translator_url: String,
    pub translator_model: String,
    pub translation_language: String,
    pub upstream_timeout: Duration,
    pub allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    /// Reads `.env` (if present) and then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => info!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => warn!("Ignoring unreadable .env file: {}", e),
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let store_backend = match lookup("STORE_BACKEND")
            .unwrap_or_else(|| "memory".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "mongodb" | "mongo" => StoreBackend::MongoDb {
                url: text("MONGODB_URL", DEFAULT_MONGODB_URL),
                database: text("MONGODB_DATABASE", DEFAULT_MONGODB_DATABASE),
            },
            other => return Err(ConfigError::UnknownStoreBackend(other.to_string())),
        };

        let allowed_origins: Vec<String> = match lookup("ALLOWED_ORIGINS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect(),
        };
        if allowed_origins.iter().any(|origin| origin == "*") {
            return Err(ConfigError::WildcardOrigin);
        }

        Ok(Self {
            port: parsed(&lookup, "PORT", DEFAULT_PORT),
            store_backend,
            store_timeout: Duration::from_secs(parsed_where(
                &lookup,
                "STORE_TIMEOUT_SECS",
                DEFAULT_STORE_TIMEOUT_SECS,
                |secs| *secs > 0,
            )),
            converter_url: text("CONVERTER_URL", DEFAULT_CONVERTER_URL),
            translator_url: text("TRANSLATOR_URL", DEFAULT_TRANSLATOR_URL),
            translator_model: text("TRANSLATOR_MODEL", DEFAULT_TRANSLATOR_MODEL),
            translation_language: text("TRANSLATION_LANGUAGE", DEFAULT_TRANSLATION_LANGUAGE),
            upstream_timeout: Duration::from_secs(parsed_where(
                &lookup,
                "UPSTREAM_TIMEOUT_SECS",
                DEFAULT_UPSTREAM_TIMEOUT_SECS,
                |secs| *secs > 0,
            )),
            allowed_origins,
            max_upload_bytes: parsed(&lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
        })
    }
}

/// Invalid values fall back to the default with a warning.
fn parsed<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display + Copy,
    F: Fn(&str) -> Option<String>,
{
    parsed_where(lookup, key, default, |_| true)
}

/// Like `parsed`, but values failing `valid` also count as invalid.
fn parsed_where<T, F, V>(lookup: &F, key: &str, default: T, valid: V) -> T
where
    T: FromStr + std::fmt::Display + Copy,
    F: Fn(&str) -> Option<String>,
    V: Fn(&T) -> bool,
{
    match lookup(key) {
        Some(raw) => match T::from_str(raw.trim()) {
            Ok(value) if valid(&value) => {
                info!("Using {} = {} from environment.", key, value);
                value
            }
            _ => {
                warn!(
                    "Invalid {} value '{}' in environment variable. Using default {}.",
                    key, raw, default
                );
                default
            }
        },
        None => default,
    }
}
