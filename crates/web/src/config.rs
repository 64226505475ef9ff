//! Web server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `MYSITE_DATABASE_URL` (or `DATABASE_URL`) - `PostgreSQL` connection string,
//!   or `memory:` to run against the in-process demo database
//! - `MYSITE_SESSION_SECRET` - Session secret (min 32 chars, high entropy)
//!
//! ## Optional
//! - `MYSITE_HOST` - Bind address (default: 127.0.0.1)
//! - `MYSITE_PORT` - Listen port (default: 8000)
//! - `SITE_BASE_URL` - Absolute URL used in feeds and the sitemap (default: `http://localhost:8000`)
//! - `MEDIA_ROOT` - Directory for uploaded files (default: `media`)
//! - `EXPORT_CACHE_TTL` - Seconds the JSON exports stay cached (default: 300)
//! - `PAGE_CACHE_TTL` - Seconds cached pages stay valid (default: 120)
//! - `CACHE_BACKEND` - `memory` or `none` (default: memory)
//! - `API_PAGE_SIZE` - REST API page size (default: 10)
//! - `LOG_FORMAT` - `text` or `json` (default: text)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

const MIN_SESSION_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Database URL that selects the in-memory repositories.
pub const MEMORY_DATABASE_URL: &str = "memory:";

static DEFAULT_BASE_URL: LazyLock<Url> =
    LazyLock::new(|| Url::parse("http://localhost:8000/").expect("Invalid default base URL"));

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Which [`crate::cache::CachePort`] backs the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheBackend {
    #[default]
    Memory,
    None,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "moka" => Ok(Self::Memory),
            "none" | "dummy" => Ok(Self::None),
            other => Err(format!("unknown cache backend '{other}' (expected memory or none)")),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}' (expected text or json)")),
        }
    }
}

/// Web server configuration.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL; its path always ends with `/`
    pub base_url: Url,
    /// Session signing secret
    pub session_secret: SecretString,
    /// Directory uploaded files are written to and served from
    pub media_root: PathBuf,
    /// How long the product and user-order exports stay cached
    pub export_cache_ttl: Duration,
    /// How long whole cached pages stay valid
    pub page_cache_ttl: Duration,
    pub cache_backend: CacheBackend,
    /// REST API page size
    pub api_page_size: u32,
    pub log_format: LogFormat,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    pub sentry_environment: Option<String>,
}

impl WebConfig {
    /// Configuration with every optional setting at its default.
    #[must_use]
    pub fn with_defaults(database_url: SecretString, session_secret: SecretString) -> Self {
        Self {
            database_url,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8000,
            base_url: DEFAULT_BASE_URL.clone(),
            session_secret,
            media_root: PathBuf::from("media"),
            export_cache_ttl: Duration::from_secs(300),
            page_cache_ttl: Duration::from_secs(120),
            cache_backend: CacheBackend::Memory,
            api_page_size: 10,
            log_format: LogFormat::Text,
            sentry_dsn: None,
            sentry_environment: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the session secret fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("MYSITE_DATABASE_URL")?;
        let session_secret = get_validated_secret("MYSITE_SESSION_SECRET")?;
        validate_session_secret(&session_secret, "MYSITE_SESSION_SECRET")?;

        let defaults = Self::with_defaults(database_url, session_secret);
        Ok(Self {
            host: get_parsed_env("MYSITE_HOST", defaults.host)?,
            port: get_parsed_env("MYSITE_PORT", defaults.port)?,
            base_url: match get_optional_env("SITE_BASE_URL") {
                Some(raw) => parse_base_url("SITE_BASE_URL", &raw)?,
                None => defaults.base_url.clone(),
            },
            media_root: get_optional_env("MEDIA_ROOT").map_or(defaults.media_root.clone(), PathBuf::from),
            export_cache_ttl: Duration::from_secs(get_parsed_env(
                "EXPORT_CACHE_TTL",
                defaults.export_cache_ttl.as_secs(),
            )?),
            page_cache_ttl: Duration::from_secs(get_parsed_env(
                "PAGE_CACHE_TTL",
                defaults.page_cache_ttl.as_secs(),
            )?),
            cache_backend: get_parsed_env("CACHE_BACKEND", defaults.cache_backend)?,
            api_page_size: get_parsed_env("API_PAGE_SIZE", defaults.api_page_size)
                .and_then(|size| non_zero("API_PAGE_SIZE", size))?,
            log_format: get_parsed_env("LOG_FORMAT", defaults.log_format)?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
            ..defaults
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether the database URL selects the in-memory repositories.
    #[must_use]
    pub fn uses_memory_database(&self) -> bool {
        self.database_url.expose_secret() == MEMORY_DATABASE_URL
    }

    /// Absolute URL for a site path such as `/products/1/`.
    #[must_use]
    pub fn absolute_url(&self, path: &str) -> String {
        self.absolute(path)
            .map_or_else(|_| self.base_url.to_string(), String::from)
    }

    /// Resolve a site path against the base URL, keeping any base path prefix.
    ///
    /// # Errors
    ///
    /// Returns `url::ParseError` if `path` cannot be joined onto the base.
    pub fn absolute(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path.trim_start_matches('/'))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Parse an absolute `http`/`https` base URL. The path gets a trailing `/`
/// so site paths join under it.
fn parse_base_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEnvVar(key.to_string(), reason);
    let mut url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid(format!("{raw} is not an absolute http(s) URL")));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid(format!("{raw} must not carry a query or fragment")));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Parse an optional environment variable, falling back to `default`.
fn get_parsed_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    get_optional_env(key).map_or(Ok(default), |raw| parse_value(key, &raw))
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn non_zero(key: &str, value: u32) -> Result<u32, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}

/// Validate that a session secret meets minimum length requirements.
fn validate_session_secret(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_SESSION_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_SESSION_SECRET_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)]
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    if let Some(pattern) = PLACEHOLDER_PATTERNS.iter().find(|p| lower.contains(*p)) {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!("appears to be a placeholder (contains '{pattern}')"),
        ));
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config() -> WebConfig {
        WebConfig::with_defaults(
            SecretString::from("postgres://localhost/mysite"),
            SecretString::from("x".repeat(32)),
        )
    }

    #[test]
    fn test_shannon_entropy() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("ab") - 1.0).abs() < 0.01);
        assert!(shannon_entropy("aB3$xY9!mK2@nL5#") > 3.3);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let err = validate_secret_strength("changeme-changeme-changeme-123456", "TEST_VAR").unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength(&"ab".repeat(20), "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_valid() {
        assert!(validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "TEST_VAR").is_ok());
    }

    #[test]
    fn test_validate_session_secret_length() {
        assert!(validate_session_secret(&SecretString::from("short"), "S").is_err());
        assert!(validate_session_secret(&SecretString::from("a".repeat(32)), "S").is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = config();
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:8000");
        assert_eq!(config.export_cache_ttl, Duration::from_secs(300));
        assert_eq!(config.page_cache_ttl, Duration::from_secs(120));
        assert_eq!(config.api_page_size, 10);
        assert_eq!(config.cache_backend, CacheBackend::Memory);
        assert!(!config.uses_memory_database());
    }

    #[test]
    fn test_absolute_url() {
        assert_eq!(
            config().absolute_url("/products/3/"),
            "http://localhost:8000/products/3/"
        );
    }

    #[test]
    fn test_base_url_must_be_absolute_http() {
        for raw in [
            "localhost:8000",
            "/products/",
            "ftp://example.com",
            "not a url",
            "https://example.com/?a=1",
        ] {
            let result = parse_base_url("SITE_BASE_URL", raw);
            assert!(matches!(result, Err(ConfigError::InvalidEnvVar(_, _))), "{raw}");
        }
    }

    #[test]
    fn test_base_url_keeps_path_prefix() {
        let mut config = config();
        config.base_url = parse_base_url("SITE_BASE_URL", "https://example.com/shop").unwrap();
        assert_eq!(config.base_url.as_str(), "https://example.com/shop/");
        assert_eq!(
            config.absolute_url("/products/3/"),
            "https://example.com/shop/products/3/"
        );
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value::<u16>("MYSITE_PORT", " 9000 ").unwrap(), 9000);
        assert!(matches!(
            parse_value::<u16>("MYSITE_PORT", "http"),
            Err(ConfigError::InvalidEnvVar(_, _))
        ));
        assert_eq!(
            parse_value::<CacheBackend>("CACHE_BACKEND", "none").unwrap(),
            CacheBackend::None
        );
        assert!(parse_value::<LogFormat>("LOG_FORMAT", "xml").is_err());
        assert!(non_zero("API_PAGE_SIZE", 0).is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let output = format!("{:?}", config());
        assert!(!output.contains("postgres://localhost/mysite"));
        assert!(!output.contains(&"x".repeat(32)));
    }
}
