//! Layered configuration loader.
//!
//! Three layers, later ones win:
//! 1. Defaults (local development backend)
//! 2. File config (`$LIVESYNC_HOME/config.toml`, default `~/.livesync`)
//! 3. Environment overrides (`LIVESYNC_*` variables)
//!
//! ## Example
//!
//! ```no_run
//! use livesync_core::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .with_env_prefix("LIVESYNC")
//!     .load()
//!     .expect("Failed to load config");
//! println!("{}", config.stream_url());
//! ```

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use url::Url;

use crate::error::ConfigError;

/// Fully resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveSyncConfig {
    /// REST base URL; relative request paths are joined onto it.
    pub base_url: String,
    /// Path of the shared SSE endpoint under `base_url`.
    pub stream_path: String,
    /// Per-request timeout. Zero disables the deadline.
    pub request_timeout_ms: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    /// Delay before checking whether a mutating action produced an event.
    pub reconcile_delay_ms: u64,
    /// Detail fetches inside this window are skipped unless forced.
    pub detail_ttl_ms: u64,
    /// How long an entity stays highlighted after an event.
    pub pulse_ms: u64,
    pub max_timeline: usize,
    pub max_live_events: usize,
}

impl Default for LiveSyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:7062".to_string(),
            stream_path: "/api/agui/stream".to_string(),
            request_timeout_ms: 12_000,
            reconnect_base_ms: 500,
            reconnect_max_ms: 5_000,
            reconcile_delay_ms: 500,
            detail_ttl_ms: 10_000,
            pulse_ms: 1_000,
            max_timeline: 200,
            max_live_events: 300,
        }
    }
}

impl LiveSyncConfig {
    pub fn stream_url(&self) -> String {
        self.rest_url(&self.stream_path)
    }

    /// Join a request path onto the base URL. Absolute URLs pass through.
    pub fn rest_url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.base_url).map_err(|source| ConfigError::InvalidUrl {
            url: self.base_url.clone(),
            source,
        })?;
        if self.reconnect_base_ms == 0 {
            return Err(ConfigError::Validation(
                "reconnect_base_ms must be greater than zero".to_string(),
            ));
        }
        if self.reconnect_base_ms > self.reconnect_max_ms {
            return Err(ConfigError::Validation(format!(
                "reconnect_base_ms ({}) exceeds reconnect_max_ms ({})",
                self.reconnect_base_ms, self.reconnect_max_ms
            )));
        }
        if self.max_timeline == 0 || self.max_live_events == 0 {
            return Err(ConfigError::Validation(
                "history caps must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Builder for layered configuration loading.
pub struct ConfigLoader {
    home: Option<PathBuf>,
    env_prefix: String,
    env_vars: Option<Vec<(String, String)>>,
    skip_file: bool,
    skip_env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// By default the home directory is auto-detected, the environment
    /// prefix is `LIVESYNC` and all layers are enabled.
    pub fn new() -> Self {
        Self {
            home: None,
            env_prefix: "LIVESYNC".to_string(),
            env_vars: None,
            skip_file: false,
            skip_env: false,
        }
    }

    /// Set the config directory explicitly.
    ///
    /// If not set, falls back to `$LIVESYNC_HOME`, then `~/.livesync`.
    pub fn with_home(mut self, path: PathBuf) -> Self {
        self.home = Some(path);
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Read overrides from `vars` instead of the process environment.
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars = Some(
            vars.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    pub fn skip_file_layer(mut self) -> Self {
        self.skip_file = true;
        self
    }

    pub fn skip_env_layer(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Load configuration with all enabled layers.
    ///
    /// Precedence: default < file < environment. The merged result is
    /// validated before it is returned.
    pub fn load(self) -> Result<LiveSyncConfig, ConfigError> {
        let env_vars = match self.env_vars {
            Some(vars) => vars,
            None => std::env::vars().collect(),
        };

        let mut config = if self.skip_file {
            LiveSyncConfig::default()
        } else {
            let home = resolve_home(self.home, &env_vars, &self.env_prefix)?;
            load_from_file(&home)?
        };

        if !self.skip_env {
            apply_env_overrides(&mut config, &self.env_prefix, &env_vars)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn resolve_home(
    explicit: Option<PathBuf>,
    env_vars: &[(String, String)],
    prefix: &str,
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let home_var = format!("{prefix}_HOME");
    if let Some((_, path)) = env_vars.iter().find(|(key, _)| *key == home_var) {
        return Ok(PathBuf::from(path));
    }
    dirs::home_dir()
        .map(|home| home.join(".livesync"))
        .ok_or(ConfigError::NoHomeDir)
}

/// Read `config.toml` from `home`. A missing file yields the defaults.
pub fn load_from_file(home: &Path) -> Result<LiveSyncConfig, ConfigError> {
    let path = home.join("config.toml");
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("config.toml not found at {:?}, using defaults", path);
            return Ok(LiveSyncConfig::default());
        }
        Err(source) => return Err(ConfigError::Io { path, source }),
    };
    toml::from_str(&contents).map_err(|source| ConfigError::Toml { path, source })
}

fn apply_env_overrides(
    config: &mut LiveSyncConfig,
    prefix: &str,
    env_vars: &[(String, String)],
) -> Result<(), ConfigError> {
    let lookup = |name: &str| {
        let key = format!("{prefix}_{name}");
        env_vars
            .iter()
            .find(|(candidate, _)| *candidate == key)
            .map(|(_, value)| (key, value.trim().to_string()))
    };

    if let Some((_, value)) = lookup("BASE_URL") {
        config.base_url = value;
    }
    if let Some((_, value)) = lookup("STREAM_PATH") {
        config.stream_path = value;
    }
    for (name, slot) in [
        ("REQUEST_TIMEOUT_MS", &mut config.request_timeout_ms),
        ("RECONNECT_BASE_MS", &mut config.reconnect_base_ms),
        ("RECONNECT_MAX_MS", &mut config.reconnect_max_ms),
    ] {
        if let Some((var, value)) = lookup(name) {
            *slot = value.parse().map_err(|_| ConfigError::InvalidEnvValue {
                var,
                value,
                expected: "non-negative integer (milliseconds)".to_string(),
            })?;
        }
    }
    Ok(())
}
