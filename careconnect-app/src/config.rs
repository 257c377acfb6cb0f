//! API configuration and user settings
//!
//! The API origin is chosen at build time: debug builds talk to the local
//! development backend, release builds to the hosted one. Everything else the
//! user may tune lives in `settings.toml` under the config directory and can be
//! overridden with `CARECONNECT_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use careconnect_core::directory::Directory;
use serde::Deserialize;
use strum_macros::{AsRefStr, Display};
use url::Url;

use crate::services::source::DataSourceMode;

pub const DEVELOPMENT_API_BASE: &str = "http://localhost:5000/api";
pub const PRODUCTION_API_BASE: &str = "https://careconnect-z20m.onrender.com/api";

const DEVELOPMENT_TIMEOUT_MS: u64 = 15_000;
const PRODUCTION_TIMEOUT_MS: u64 = 10_000;

pub const SETTINGS_FILE: &str = "settings.toml";
pub const ENV_PREFIX: &str = "CARECONNECT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub const fn current() -> Self {
        if cfg!(debug_assertions) {
            Environment::Development
        } else {
            Environment::Production
        }
    }

    fn timeout(&self) -> Duration {
        match self {
            Environment::Development => Duration::from_millis(DEVELOPMENT_TIMEOUT_MS),
            Environment::Production => Duration::from_millis(PRODUCTION_TIMEOUT_MS),
        }
    }

    fn base_url(&self) -> &'static str {
        match self {
            Environment::Development => DEVELOPMENT_API_BASE,
            Environment::Production => PRODUCTION_API_BASE,
        }
    }
}

/// Request pipeline configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub environment: Environment,
    pub base_url: Url,
    pub timeout: Duration,
    /// Keep a cookie store so the backend can set session cookies
    pub with_credentials: bool,
}

impl ApiConfig {
    pub fn for_environment(environment: Environment) -> Self {
        let base_url = Url::parse(environment.base_url())
            .unwrap_or_else(|_| unreachable!("built-in API base URLs are valid"));
        Self {
            environment,
            base_url,
            timeout: environment.timeout(),
            with_credentials: environment == Environment::Development,
        }
    }

    /// Configuration against an explicit origin, keeping the current
    /// environment's timeout and credential policy.
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("invalid API base url: {base_url}"))?;
        Ok(Self {
            base_url,
            ..Self::default()
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Absolute URL for an API path such as `/auth/login`
    pub fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::for_environment(Environment::current())
    }
}

/// User-tunable settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_level: String,
    pub log_to_file: bool,
    /// Overrides the platform data directory for the persisted session
    pub data_dir: Option<PathBuf>,
    pub data_source: DataSourceMode,
    /// Validate a cached profile against the backend on startup
    pub revalidate_on_startup: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: true,
            data_dir: None,
            data_source: DataSourceMode::RemoteWithFallback,
            revalidate_on_startup: false,
        }
    }
}

impl Settings {
    /// Load from the platform config directory and the environment
    pub fn load() -> Result<Self> {
        let path = Directory::config_directory().map(|dir| dir.join(SETTINGS_FILE));
        Self::load_from(path)
    }

    pub fn load_from(path: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            tracing::debug!("Reading settings from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .context("failed to read settings")?
            .try_deserialize()
            .context("invalid settings")
    }
}
