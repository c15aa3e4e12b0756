//! Engine configuration.
//!
//! Scoped down from a typical server config: no host/port/CORS/auth, since
//! those live outside this engine's boundary. Loadable from a TOML file or
//! built up in code; TOML content may reference `${VAR}` environment
//! variables, expanded before parsing.

use resolve_error::ResolveError;
use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    /// Enable single-flight deduplication of concurrent identical fetches.
    pub single_flight_enabled: bool,

    /// Enable the data loader for batch (federation `_entities`) fetches.
    pub data_loader_enabled: bool,

    /// Subscription client settings.
    pub subscription: SubscriptionConfig,

    /// Streaming (`@defer`/`@stream`) settings.
    pub streaming: StreamingConfig,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            single_flight_enabled: true,
            data_loader_enabled: true,
            subscription: SubscriptionConfig::default(),
            streaming: StreamingConfig::default(),
        }
    }
}

/// Subscription client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// How often the connection event loop re-checks active subscriptions,
    /// in milliseconds.
    pub read_timeout_ms: u64,

    /// Maximum frame size accepted from an upstream connection, in bytes.
    pub read_limit: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 5_000,
            read_limit: 10 * 1024 * 1024,
        }
    }
}

/// Streaming response settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// How often buffered patches are flushed to the client, in milliseconds.
    pub flush_interval_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 500,
        }
    }
}

impl ResolveConfig {
    /// Load configuration from a TOML file, expanding `${VAR}` references
    /// against the process environment first.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the TOML is invalid.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ResolveError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ResolveError::Fetch(resolve_error::FetchError::DataSource(format!(
                "failed to read config file '{}': {e}",
                path.display()
            )))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string, expanding `${VAR}` references
    /// against the process environment first.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ResolveError> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| {
            ResolveError::Fetch(resolve_error::FetchError::DataSource(format!(
                "invalid TOML configuration: {e}"
            )))
        })
    }
}

/// Expand `${VAR}` references in `content` against the process environment.
/// References to variables that aren't set are left untouched.
fn expand_env_vars(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                let is_var_name =
                    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                if is_var_name {
                    if let Ok(value) = std::env::var(name) {
                        out.push_str(&value);
                    } else {
                        out.push_str(&rest[start..start + 2 + end + 1]);
                    }
                } else {
                    out.push_str(&rest[start..start + 2 + end + 1]);
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
