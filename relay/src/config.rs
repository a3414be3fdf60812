//! Server configuration.
//!
//! Read from a TOML file when one is present (`RELAY_CONFIG`, else `relay.toml`
//! in the working directory), otherwise from environment variables. Provider
//! API keys and the Redis URL missing from the file still fall back to the
//! environment.

use std::env;
use std::fmt::{Debug, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rchat::{
    ChatPolicy, DEFAULT_CACHE_TTL, DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_CONTENT_CHARS,
    DEFAULT_SYSTEM_PROMPT,
};
use rcommon::GenerationOptions;
use rstore::{CacheConfig, StoreConfig};
use serde::Deserialize;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_FALLBACK_MODELS: &[&str] = &[
    "gemini-1.5-flash",
    "gemini-1.5-flash-latest",
    "gemini-1.5-pro",
    "gemini-pro",
    "openai:gpt-4o-mini",
];
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_MAX_TOKENS: u32 = 300;

#[derive(Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins. Empty, or containing `*`, allows any origin.
    pub cors_origins: Vec<String>,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub policy: ChatPolicy,
    pub generation: GenerationOptions,
    pub default_model: String,
    pub fallback_models: Vec<String>,
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub provider_timeout: Duration,
    pub metrics_enabled: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            store: StoreConfig::default(),
            cache: CacheConfig::default(),
            policy: ChatPolicy::default(),
            generation: GenerationOptions::default()
                .with_temperature(DEFAULT_TEMPERATURE)
                .with_max_tokens(DEFAULT_MAX_TOKENS),
            default_model: DEFAULT_MODEL.to_string(),
            fallback_models: default_fallback_models(),
            gemini_api_key: None,
            openai_api_key: None,
            provider_timeout: Duration::from_secs(default_provider_timeout_secs()),
            metrics_enabled: true,
        }
    }
}

impl Debug for RelayConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("cors_origins", &self.cors_origins)
            .field("store", &StoreSummary(&self.store))
            .field("cache", &CacheSummary(&self.cache))
            .field("default_model", &self.default_model)
            .field("fallback_models", &self.fallback_models)
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<redacted>"))
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<redacted>"))
            .field("provider_timeout", &self.provider_timeout)
            .finish_non_exhaustive()
    }
}

/// Hides credentials embedded in a Postgres URL.
struct StoreSummary<'a>(&'a StoreConfig);

impl Debug for StoreSummary<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            StoreConfig::InMemory => f.write_str("InMemory"),
            StoreConfig::Sqlite { path } => write!(f, "Sqlite({})", path.display()),
            StoreConfig::Postgres { .. } => f.write_str("Postgres(<redacted>)"),
        }
    }
}

/// Hides a Redis URL, which may carry a password.
struct CacheSummary<'a>(&'a CacheConfig);

impl Debug for CacheSummary<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            CacheConfig::Redis { .. } => f.write_str("Redis(<redacted>)"),
            other => Debug::fmt(other, f),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    store: StoreSection,
    #[serde(default)]
    chat: ChatSection,
    #[serde(default)]
    models: ModelsSection,
    #[serde(default)]
    providers: ProvidersSection,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    cors_origins: Vec<String>,
    #[serde(default = "default_true")]
    metrics: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            metrics: true,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct StoreSection {
    #[serde(default)]
    backend: Option<String>,
    #[serde(default)]
    sqlite_path: Option<PathBuf>,
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    cache: Option<String>,
    #[serde(default)]
    redis_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatSection {
    #[serde(default = "default_system_prompt")]
    system_prompt: String,
    #[serde(default = "default_history_limit")]
    history_limit: usize,
    #[serde(default = "default_cache_ttl_secs")]
    cache_ttl_secs: u64,
    #[serde(default = "default_max_content_chars")]
    max_content_chars: usize,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            history_limit: default_history_limit(),
            cache_ttl_secs: default_cache_ttl_secs(),
            max_content_chars: default_max_content_chars(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelsSection {
    #[serde(default = "default_model")]
    default: String,
    #[serde(default = "default_fallback_models")]
    fallbacks: Vec<String>,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
}

impl Default for ModelsSection {
    fn default() -> Self {
        Self {
            default: default_model(),
            fallbacks: default_fallback_models(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProvidersSection {
    #[serde(default)]
    gemini_api_key: Option<String>,
    #[serde(default)]
    openai_api_key: Option<String>,
    #[serde(default = "default_provider_timeout_secs")]
    timeout_secs: u64,
}

impl Default for ProvidersSection {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            openai_api_key: None,
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_true() -> bool {
    true
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL.as_secs()
}

fn default_max_content_chars() -> usize {
    DEFAULT_MAX_CONTENT_CHARS
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_fallback_models() -> Vec<String> {
    DEFAULT_FALLBACK_MODELS
        .iter()
        .map(|model| model.to_string())
        .collect()
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_provider_timeout_secs() -> u64 {
    90
}

impl RelayConfig {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(None)
    }

    /// Like [`RelayConfig::load`], with `path` taking precedence over `RELAY_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> anyhow::Result<Self> {
        let lookup = |key: &str| env::var(key).ok();
        if let Some(file_config) = load_from_file(path)? {
            return Self::from_file(file_config, lookup);
        }

        Self::from_lookup(lookup)
    }

    /// Parses a TOML document, consulting `lookup` for secrets the file omits.
    pub fn from_toml_str(
        contents: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let parsed: FileConfig = toml::from_str(contents)
            .map_err(|err| anyhow::anyhow!("Failed to parse config: {}", err))?;
        Self::from_file(parsed, lookup)
    }

    /// Builds a config from environment-style variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let port = match var("PORT") {
            Some(value) => value
                .trim()
                .parse::<u16>()
                .map_err(|err| anyhow::anyhow!("Invalid PORT '{}': {}", value, err))?,
            None => defaults.port,
        };

        let store = store_config(
            var("RELAY_STORE").as_deref(),
            var("DATABASE_URL"),
            var("RELAY_SQLITE_PATH").map(PathBuf::from),
        )?;
        let cache = cache_config(var("RELAY_CACHE").as_deref(), redis_url(&var))?
            .unwrap_or(defaults.cache);

        let mut policy = defaults.policy;
        if let Some(prompt) = var("RELAY_SYSTEM_PROMPT") {
            policy.system_prompt = prompt;
        }
        if let Some(limit) = parse_var::<usize>(&var, "RELAY_HISTORY_LIMIT")? {
            policy.history_limit = limit;
        }
        if let Some(ttl) = parse_var::<u64>(&var, "RELAY_CACHE_TTL_SECS")? {
            policy.cache_ttl = Duration::from_secs(ttl);
        }

        let mut generation = defaults.generation;
        if let Some(temperature) = parse_var::<f32>(&var, "RELAY_TEMPERATURE")? {
            generation = generation.with_temperature(temperature);
        }
        if let Some(max_tokens) = parse_var::<u32>(&var, "RELAY_MAX_TOKENS")? {
            generation = generation.with_max_tokens(max_tokens);
        }

        let provider_timeout = parse_var::<u64>(&var, "RELAY_PROVIDER_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.provider_timeout);

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port,
            cors_origins: var("CORS_ORIGIN")
                .map(|value| split_list(&value))
                .unwrap_or_default(),
            store,
            cache,
            policy,
            generation,
            default_model: var("GEMINI_MODEL").unwrap_or(defaults.default_model),
            fallback_models: var("RELAY_FALLBACK_MODELS")
                .map(|value| split_list(&value))
                .unwrap_or(defaults.fallback_models),
            gemini_api_key: var("GEMINI_API_KEY"),
            openai_api_key: var("OPENAI_API_KEY"),
            provider_timeout,
            metrics_enabled: var("RELAY_METRICS")
                .map(|value| !matches!(value.trim(), "0" | "false" | "off"))
                .unwrap_or(defaults.metrics_enabled),
        })
    }

    fn from_file(
        file: FileConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let store = store_config(
            file.store.backend.as_deref(),
            file.store.database_url,
            file.store.sqlite_path,
        )?;
        let redis = file.store.redis_url.or_else(|| {
            redis_url(&|key: &str| lookup(key).filter(|value| !value.trim().is_empty()))
        });
        let cache = cache_config(file.store.cache.as_deref(), redis)?.unwrap_or_default();

        let policy = ChatPolicy {
            system_prompt: file.chat.system_prompt,
            history_limit: file.chat.history_limit,
            cache_ttl: Duration::from_secs(file.chat.cache_ttl_secs),
            max_content_chars: file.chat.max_content_chars,
            ..ChatPolicy::default()
        };

        let secret = |configured: Option<String>, key: &str| {
            configured
                .or_else(|| lookup(key))
                .filter(|value| !value.trim().is_empty())
        };

        Ok(Self {
            host: file.server.host,
            port: file.server.port,
            cors_origins: file.server.cors_origins,
            store,
            cache,
            policy,
            generation: GenerationOptions::default()
                .with_temperature(file.models.temperature)
                .with_max_tokens(file.models.max_tokens),
            default_model: file.models.default,
            fallback_models: file.models.fallbacks,
            gemini_api_key: secret(file.providers.gemini_api_key, "GEMINI_API_KEY"),
            openai_api_key: secret(file.providers.openai_api_key, "OPENAI_API_KEY"),
            provider_timeout: Duration::from_secs(file.providers.timeout_secs),
            metrics_enabled: file.server.metrics,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.is_empty() || self.cors_origins.iter().any(|origin| origin == "*")
    }
}

/// Picks the durable store. An explicit backend name wins; otherwise a
/// database URL selects Postgres and anything else falls back to SQLite.
fn store_config(
    backend: Option<&str>,
    database_url: Option<String>,
    sqlite_path: Option<PathBuf>,
) -> anyhow::Result<StoreConfig> {
    let sqlite = |path: Option<PathBuf>| match path {
        Some(path) => StoreConfig::Sqlite { path },
        None => StoreConfig::default(),
    };

    match backend.map(|value| value.trim().to_ascii_lowercase()) {
        Some(name) if name == "memory" || name == "in-memory" => Ok(StoreConfig::InMemory),
        Some(name) if name == "sqlite" => Ok(sqlite(sqlite_path)),
        Some(name) if name == "postgres" || name == "postgresql" => match database_url {
            Some(url) => Ok(StoreConfig::Postgres { url }),
            None => Err(anyhow::anyhow!(
                "Store backend 'postgres' requires a database URL"
            )),
        },
        Some(other) => Err(anyhow::anyhow!("Unknown store backend '{}'", other)),
        None => Ok(match database_url {
            Some(url) => StoreConfig::Postgres { url },
            None => sqlite(sqlite_path),
        }),
    }
}

/// An explicit backend name wins; otherwise a Redis URL selects Redis.
fn cache_config(
    backend: Option<&str>,
    redis_url: Option<String>,
) -> anyhow::Result<Option<CacheConfig>> {
    match backend {
        Some(name) => Ok(Some(CacheConfig::parse(name)?.with_redis_url(redis_url))),
        None => Ok(redis_url.map(|url| CacheConfig::Redis { url })),
    }
}

/// `REDIS_URL`, else a URL assembled from `REDIS_HOST` and `REDIS_PORT`.
fn redis_url(var: &impl Fn(&str) -> Option<String>) -> Option<String> {
    if let Some(url) = var("REDIS_URL") {
        return Some(url);
    }

    let host = var("REDIS_HOST");
    let port = var("REDIS_PORT");
    if host.is_none() && port.is_none() {
        return None;
    }
    Some(format!(
        "redis://{}:{}",
        host.as_deref().map_or("localhost", str::trim),
        port.as_deref().map_or("6379", str::trim)
    ))
}

fn parse_var<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("Invalid {} '{}': {}", key, value, err)),
        None => Ok(None),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn load_from_file(explicit: Option<&Path>) -> anyhow::Result<Option<FileConfig>> {
    let config_path = explicit
        .map(|path| path.display().to_string())
        .or_else(|| env::var("RELAY_CONFIG").ok());
    let path = if let Some(path) = config_path {
        Some(path)
    } else if Path::new("relay.toml").exists() {
        Some("relay.toml".to_string())
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(None);
    };

    let contents = fs::read_to_string(&path)
        .map_err(|err| anyhow::anyhow!("Failed to read config {}: {}", path, err))?;
    let parsed: FileConfig = toml::from_str(&contents)
        .map_err(|err| anyhow::anyhow!("Failed to parse config {}: {}", path, err))?;
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_reproduces_service_defaults() {
        let config = RelayConfig::from_lookup(lookup(&[])).expect("config");

        assert_eq!(config.port, 3001);
        assert_eq!(config.default_model, "gemini-1.5-flash");
        assert_eq!(config.policy.history_limit, 10);
        assert_eq!(config.policy.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.policy.max_content_chars, 4000);
        assert_eq!(config.generation.temperature, Some(0.2));
        assert_eq!(config.generation.max_tokens, Some(300));
        assert_eq!(config.cache, CacheConfig::Memory);
        assert!(matches!(config.store, StoreConfig::Sqlite { .. }));
        assert!(config.allows_any_origin());
        assert!(config.gemini_api_key.is_none());
    }

    #[test]
    fn environment_overrides_are_applied() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("PORT", "8081"),
            ("CORS_ORIGIN", "http://localhost:3000, https://chat.example.com"),
            ("DATABASE_URL", "postgres://relay:secret@db/relay"),
            ("RELAY_CACHE", "disabled"),
            ("GEMINI_MODEL", "gemini-1.5-pro"),
            ("RELAY_FALLBACK_MODELS", "gemini-pro,openai:gpt-4o-mini"),
            ("GEMINI_API_KEY", "AIza-test"),
            ("RELAY_HISTORY_LIMIT", "4"),
        ]))
        .expect("config");

        assert_eq!(config.port, 8081);
        assert_eq!(
            config.cors_origins,
            vec!["http://localhost:3000", "https://chat.example.com"]
        );
        assert!(!config.allows_any_origin());
        assert!(matches!(config.store, StoreConfig::Postgres { .. }));
        assert_eq!(config.cache, CacheConfig::Disabled);
        assert_eq!(config.default_model, "gemini-1.5-pro");
        assert_eq!(config.fallback_models, vec!["gemini-pro", "openai:gpt-4o-mini"]);
        assert_eq!(config.gemini_api_key.as_deref(), Some("AIza-test"));
        assert_eq!(config.policy.history_limit, 4);
    }

    #[test]
    fn invalid_port_is_rejected() {
        let error = RelayConfig::from_lookup(lookup(&[("PORT", "eighty")]))
            .expect_err("bad port");
        assert!(error.to_string().contains("PORT"));
    }

    #[test]
    fn toml_file_is_parsed_and_secrets_fall_back_to_environment() {
        let contents = r#"
            [server]
            port = 4000
            cors_origins = ["https://chat.example.com"]

            [store]
            backend = "memory"
            cache = "off"

            [chat]
            history_limit = 6

            [models]
            default = "gemini-1.5-pro"
            fallbacks = ["gemini-pro"]
        "#;

        let config = RelayConfig::from_toml_str(contents, lookup(&[("OPENAI_API_KEY", "sk-env")]))
            .expect("config");

        assert_eq!(config.port, 4000);
        assert_eq!(config.store, StoreConfig::InMemory);
        assert_eq!(config.cache, CacheConfig::Disabled);
        assert_eq!(config.policy.history_limit, 6);
        assert_eq!(config.policy.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.default_model, "gemini-1.5-pro");
        assert_eq!(config.fallback_models, vec!["gemini-pro"]);
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-env"));
        assert!(config.gemini_api_key.is_none());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "AIzaSyDsecret"),
            ("DATABASE_URL", "postgres://relay:hunter2@db/relay"),
            ("REDIS_URL", "redis://:swordfish@cache:6379"),
        ]))
        .expect("config");

        let rendered = format!("{config:?}");
        assert!(!rendered.contains("AIzaSyDsecret"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("swordfish"));
    }

    #[test]
    fn redis_is_selected_by_url_or_by_name() {
        let config = RelayConfig::from_lookup(lookup(&[("REDIS_URL", "rediss://cache.internal:6380")]))
            .expect("config");
        assert_eq!(
            config.cache,
            CacheConfig::Redis {
                url: "rediss://cache.internal:6380".to_string()
            }
        );

        let config = RelayConfig::from_lookup(lookup(&[
            ("RELAY_CACHE", "redis"),
            ("REDIS_HOST", "cache"),
            ("REDIS_PORT", "6390"),
        ]))
        .expect("config");
        assert_eq!(
            config.cache,
            CacheConfig::Redis {
                url: "redis://cache:6390".to_string()
            }
        );

        let config = RelayConfig::from_lookup(lookup(&[
            ("RELAY_CACHE", "memory"),
            ("REDIS_URL", "redis://cache:6379"),
        ]))
        .expect("config");
        assert_eq!(config.cache, CacheConfig::Memory);

        let contents = r#"
            [store]
            cache = "redis"
        "#;
        let config = RelayConfig::from_toml_str(contents, lookup(&[("REDIS_URL", "redis://env:6379")]))
            .expect("config");
        assert_eq!(
            config.cache,
            CacheConfig::Redis {
                url: "redis://env:6379".to_string()
            }
        );
    }
}
