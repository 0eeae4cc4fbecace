use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const PORT: &str = "PORT";
    pub const APP_ENV: &str = "APP_ENV";
    pub const DATABASE_URL: &str = "DATABASE_URL";
    /// Default cache ttl in milliseconds.
    pub const CACHE_TTL: &str = "CACHE_TTL";
    pub const CACHE_PREFIX: &str = "CACHE_PREFIX";
    pub const CACHE_CAPACITY: &str = "CACHE_CAPACITY";
    /// Set to 0 to disable the background sweep of expired cache entries.
    pub const CACHE_SWEEP_INTERVAL_SECS: &str = "CACHE_SWEEP_INTERVAL_SECS";
    pub const PDF_EXPIRY_HOURS: &str = "PDF_EXPIRY_HOURS";
    pub const RENDER_POOL_SIZE: &str = "RENDER_POOL_SIZE";
    pub const RENDER_TIMEOUT_SECS: &str = "RENDER_TIMEOUT_SECS";
    pub const CHROMIUM_PATH: &str = "CHROMIUM_PATH";
    pub const BLOB_DIR: &str = "BLOB_DIR";
    /// Externally-reachable base URL used when issuing export links.
    /// Falls back to http://localhost:{PORT} if not set.
    pub const PUBLIC_URL: &str = "PUBLIC_URL";
    /// HMAC key for export links. A random key is generated when unset,
    /// which invalidates outstanding links on restart.
    pub const EXPORT_SIGNING_SECRET: &str = "EXPORT_SIGNING_SECRET";
}

/// Default values
pub mod defaults {
    pub const PORT: u16 = 3000;
    pub const APP_ENV: &str = "development";
    pub const DATABASE_URL: &str = "./.db/notes.db";
    pub const CACHE_TTL_MS: u64 = 30_000;
    pub const CACHE_PREFIX: &str = "notes:";
    pub const CACHE_CAPACITY: usize = 1000;
    pub const CACHE_SWEEP_INTERVAL_SECS: u64 = 60;
    pub const PDF_EXPIRY_HOURS: u64 = 1;
    /// One year
    pub const MAX_PDF_EXPIRY_HOURS: u64 = 24 * 365;
    pub const RENDER_POOL_SIZE: usize = 2;
    pub const RENDER_TIMEOUT_SECS: u64 = 30;
    pub const CHROMIUM_PATH: &str = "chromium";
    pub const BLOB_DIR: &str = "./.blobs";
}

/// Deployment environment, mirrors the accepted APP_ENV values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Staging,
    Production,
    Test,
}

impl AppEnv {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_lowercase().as_str() {
            "dev" | "development" => Ok(AppEnv::Development),
            "staging" => Ok(AppEnv::Staging),
            "prod" | "production" => Ok(AppEnv::Production),
            "test" => Ok(AppEnv::Test),
            other => Err(format!(
                "{} must be one of development, staging, production, test (got '{}')",
                env_vars::APP_ENV,
                other
            )),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, AppEnv::Production)
    }
}

/// Cache Manager settings, shared by every layer.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub default_ttl: Duration,
    pub key_prefix: String,
    pub capacity: usize,
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_millis(defaults::CACHE_TTL_MS),
            key_prefix: defaults::CACHE_PREFIX.to_string(),
            capacity: defaults::CACHE_CAPACITY,
            sweep_interval: Some(Duration::from_secs(defaults::CACHE_SWEEP_INTERVAL_SECS)),
        }
    }
}

/// Export pipeline settings
#[derive(Clone, Debug)]
pub struct ExportConfig {
    /// Lifetime of an issued access link, in hours
    pub expiry_hours: u64,
    pub render_pool_size: usize,
    pub render_timeout: Duration,
    pub chromium_path: PathBuf,
    pub blob_dir: PathBuf,
    pub signing_secret: String,
}

impl ExportConfig {
    pub fn link_ttl(&self) -> Duration {
        Duration::from_secs(self.expiry_hours * 3600)
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub app_env: AppEnv,
    pub database_url: String,
    pub public_url: String,
    pub cache: CacheConfig,
    pub export: ExportConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the config from an arbitrary variable source (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port: u16 = parse_or(&lookup, env_vars::PORT, defaults::PORT)?;
        let app_env = match lookup(env_vars::APP_ENV) {
            Some(raw) => AppEnv::parse(&raw)?,
            None => AppEnv::parse(defaults::APP_ENV)?,
        };

        let capacity: usize = parse_or(&lookup, env_vars::CACHE_CAPACITY, defaults::CACHE_CAPACITY)?;
        if capacity == 0 {
            return Err(format!("{} must be greater than zero", env_vars::CACHE_CAPACITY));
        }
        let ttl_ms: u64 = parse_or(&lookup, env_vars::CACHE_TTL, defaults::CACHE_TTL_MS)?;
        let sweep_secs: u64 = parse_or(
            &lookup,
            env_vars::CACHE_SWEEP_INTERVAL_SECS,
            defaults::CACHE_SWEEP_INTERVAL_SECS,
        )?;

        let expiry_hours: u64 = parse_or(&lookup, env_vars::PDF_EXPIRY_HOURS, defaults::PDF_EXPIRY_HOURS)?;
        if expiry_hours == 0 || expiry_hours > defaults::MAX_PDF_EXPIRY_HOURS {
            return Err(format!(
                "{} must be between 1 and {}",
                env_vars::PDF_EXPIRY_HOURS,
                defaults::MAX_PDF_EXPIRY_HOURS
            ));
        }
        let render_pool_size: usize =
            parse_or(&lookup, env_vars::RENDER_POOL_SIZE, defaults::RENDER_POOL_SIZE)?;
        if render_pool_size == 0 {
            return Err(format!("{} must be greater than zero", env_vars::RENDER_POOL_SIZE));
        }
        let render_timeout_secs: u64 =
            parse_or(&lookup, env_vars::RENDER_TIMEOUT_SECS, defaults::RENDER_TIMEOUT_SECS)?;
        if render_timeout_secs == 0 {
            return Err(format!("{} must be greater than zero", env_vars::RENDER_TIMEOUT_SECS));
        }

        let public_url = lookup(env_vars::PUBLIC_URL)
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://localhost:{}", port));

        let signing_secret = match lookup(env_vars::EXPORT_SIGNING_SECRET).filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None if app_env.is_production() => {
                return Err(format!("{} must be set in production", env_vars::EXPORT_SIGNING_SECRET));
            }
            None => {
                log::warn!(
                    "{} not set - generating a per-process key, export links will not survive a restart",
                    env_vars::EXPORT_SIGNING_SECRET
                );
                format!(
                    "{}{}",
                    uuid::Uuid::new_v4().simple(),
                    uuid::Uuid::new_v4().simple()
                )
            }
        };

        Ok(Self {
            port,
            app_env,
            database_url: lookup(env_vars::DATABASE_URL)
                .unwrap_or_else(|| defaults::DATABASE_URL.to_string()),
            public_url,
            cache: CacheConfig {
                default_ttl: Duration::from_millis(ttl_ms),
                key_prefix: lookup(env_vars::CACHE_PREFIX)
                    .unwrap_or_else(|| defaults::CACHE_PREFIX.to_string()),
                capacity,
                sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            },
            export: ExportConfig {
                expiry_hours,
                render_pool_size,
                render_timeout: Duration::from_secs(render_timeout_secs),
                chromium_path: PathBuf::from(
                    lookup(env_vars::CHROMIUM_PATH)
                        .unwrap_or_else(|| defaults::CHROMIUM_PATH.to_string()),
                ),
                blob_dir: PathBuf::from(
                    lookup(env_vars::BLOB_DIR).unwrap_or_else(|| defaults::BLOB_DIR.to_string()),
                ),
                signing_secret,
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, String>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("{} must be a valid number (got '{}'): {}", name, raw, e)),
        None => Ok(default),
    }
}
