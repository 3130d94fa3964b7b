//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use axum::http::{HeaderName, Method, StatusCode};
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheConfig, Namespace};

pub use cli::{
    CacheArgs, CacheCommand, CliArgs, Command, ServeArgs, ServeOverrides, StoreOverride,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pagecache";
const ENV_PREFIX: &str = "PAGECACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 8000;
const DEFAULT_ADMIN_PORT: u16 = 8001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_MEMORY_CAPACITY: usize = 1024;
const DEFAULT_REDIS_TIMEOUT_MS: u64 = 500;
pub(crate) const DEFAULT_PAGE_TTL_SECS: u64 = 60 * 15;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
    pub store: StoreSettings,
    pub site: SiteSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Which entry store backs the caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSettings {
    Memory { capacity: NonZeroUsize },
    Redis { url: String, timeout: Duration },
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    /// TTL of the cached recipe listing page.
    pub page_ttl: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cache.vary_headers")
            .with_list_parse_key("cache.cacheable_methods")
            .with_list_parse_key("cache.cacheable_statuses")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Cache(args)) => match &args.command {
            CacheCommand::Ping(store) | CacheCommand::Flush(store) => {
                raw.apply_store_override(store)
            }
        },
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    store: RawStoreSettings,
    site: RawSiteSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(prefix) = overrides.cache_prefix.as_ref() {
            self.cache.prefix = Some(prefix.clone());
        }
        if let Some(version) = overrides.cache_version {
            self.cache.version = Some(version);
        }
        if let Some(seconds) = overrides.cache_default_ttl_seconds {
            self.cache.default_ttl_seconds = Some(seconds);
        }
        if let Some(coalesce) = overrides.cache_coalesce_misses {
            self.cache.coalesce_misses = Some(coalesce);
        }
        if let Some(capacity) = overrides.store_memory_capacity {
            self.store.memory_capacity = Some(capacity);
        }
        if let Some(seconds) = overrides.site_page_ttl_seconds {
            self.site.page_ttl_seconds = Some(seconds);
        }

        self.apply_store_override(&overrides.store);
    }

    fn apply_store_override(&mut self, overrides: &StoreOverride) {
        if let Some(backend) = overrides.store_backend.as_ref() {
            self.store.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.store_redis_url.as_ref() {
            self.store.redis_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            store,
            site,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_config(cache)?;
        let store = build_store_settings(store)?;
        let site = build_site_settings(site)?;

        Ok(Self {
            server,
            logging,
            cache,
            store,
            site,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    let graceful_shutdown = positive_secs(graceful_secs, "server.graceful_shutdown_seconds")?;

    Ok(ServerSettings {
        public_addr,
        admin_addr,
        graceful_shutdown,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_config(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let prefix = cache.prefix.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    let version = cache.version.unwrap_or(defaults.namespace.version());
    let namespace = Namespace::new(prefix, version)
        .map_err(|err| LoadError::invalid("cache.namespace", err.to_string()))?;

    let default_ttl = cache
        .default_ttl_seconds
        .map(|secs| positive_secs(secs, "cache.default_ttl_seconds"))
        .transpose()?;

    let vary_headers = cache
        .vary_headers
        .unwrap_or_default()
        .iter()
        .map(|name| {
            HeaderName::from_str(name.trim()).map_err(|err| {
                LoadError::invalid("cache.vary_headers", format!("`{name}`: {err}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let cacheable_methods = match cache.cacheable_methods {
        Some(methods) => methods
            .iter()
            .map(|name| {
                Method::from_str(&name.trim().to_ascii_uppercase()).map_err(|err| {
                    LoadError::invalid("cache.cacheable_methods", format!("`{name}`: {err}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => defaults.cacheable_methods,
    };
    if cacheable_methods.is_empty() {
        return Err(LoadError::invalid(
            "cache.cacheable_methods",
            "at least one method is required",
        ));
    }

    let cacheable_statuses = match cache.cacheable_statuses {
        Some(codes) => codes
            .into_iter()
            .map(|code| {
                StatusCode::from_u16(code).map_err(|err| {
                    LoadError::invalid("cache.cacheable_statuses", format!("`{code}`: {err}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => defaults.cacheable_statuses,
    };

    let max_body_bytes = cache.max_body_bytes.unwrap_or(defaults.max_body_bytes);
    if max_body_bytes == 0 {
        return Err(LoadError::invalid(
            "cache.max_body_bytes",
            "must be greater than zero",
        ));
    }

    let write_attempts = match cache.write_attempts {
        Some(value) => non_zero_u32(value, "cache.write_attempts")?,
        None => defaults.write_attempts,
    };
    let invalidate_attempts = match cache.invalidate_attempts {
        Some(value) => non_zero_u32(value, "cache.invalidate_attempts")?,
        None => defaults.invalidate_attempts,
    };
    let write_backoff = cache
        .write_backoff_ms
        .map(Duration::from_millis)
        .unwrap_or(defaults.write_backoff);

    Ok(CacheConfig {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        namespace,
        default_ttl,
        vary_on_query: cache.vary_on_query.unwrap_or(defaults.vary_on_query),
        vary_headers,
        cacheable_methods,
        cacheable_statuses,
        max_body_bytes,
        write_attempts,
        write_backoff,
        invalidate_attempts,
        coalesce_misses: cache.coalesce_misses.unwrap_or(defaults.coalesce_misses),
    })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let backend = store
        .backend
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "memory".to_string());

    match backend.as_str() {
        "memory" => {
            let capacity = store.memory_capacity.unwrap_or(DEFAULT_MEMORY_CAPACITY);
            let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
                LoadError::invalid("store.memory_capacity", "must be greater than zero")
            })?;
            Ok(StoreSettings::Memory { capacity })
        }
        "redis" => {
            let url = store
                .redis_url
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    LoadError::invalid("store.redis_url", "required when the backend is redis")
                })?;
            let timeout_ms = store.redis_timeout_ms.unwrap_or(DEFAULT_REDIS_TIMEOUT_MS);
            if timeout_ms == 0 {
                return Err(LoadError::invalid(
                    "store.redis_timeout_ms",
                    "must be greater than zero",
                ));
            }
            Ok(StoreSettings::Redis {
                url,
                timeout: Duration::from_millis(timeout_ms),
            })
        }
        other => Err(LoadError::invalid(
            "store.backend",
            format!("unknown backend `{other}`, expected memory or redis"),
        )),
    }
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let secs = site.page_ttl_seconds.unwrap_or(DEFAULT_PAGE_TTL_SECS);
    Ok(SiteSettings {
        page_ttl: positive_secs(secs, "site.page_ttl_seconds")?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    admin_host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    prefix: Option<String>,
    version: Option<u32>,
    default_ttl_seconds: Option<u64>,
    vary_on_query: Option<bool>,
    vary_headers: Option<Vec<String>>,
    cacheable_methods: Option<Vec<String>>,
    cacheable_statuses: Option<Vec<u16>>,
    max_body_bytes: Option<usize>,
    write_attempts: Option<u32>,
    write_backoff_ms: Option<u64>,
    invalidate_attempts: Option<u32>,
    coalesce_misses: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    backend: Option<String>,
    memory_capacity: Option<usize>,
    redis_url: Option<String>,
    redis_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    page_ttl_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u32, key: &'static str) -> Result<NonZeroU32, LoadError> {
    NonZeroU32::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn positive_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
