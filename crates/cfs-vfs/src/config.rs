//! Per-share session configuration.
//!
//! The host resolves its own configuration syntax; what arrives here is a set
//! of parametric options (`server`, `export`, `timeout_ms`, `mtls`) layered over
//! the defaults below.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default remote endpoint.
pub const DEFAULT_SERVER: &str = "localhost:9400";
/// Default export root.
pub const DEFAULT_EXPORT: &str = "/";
/// Default RPC timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Errors raised while resolving configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The export root was empty.
    #[error("export root must not be empty")]
    EmptyExport,
    /// The export root was not an absolute path.
    #[error("export root must be absolute: {0}")]
    RelativeExport(String),
    /// An option value could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Option name.
        key: String,
        /// Offending value.
        value: String,
    },
}

/// Absolute remote path under which a session's operations resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExportRoot(String);

impl ExportRoot {
    /// The root as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ExportRoot {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(ConfigError::EmptyExport);
        }
        if !value.starts_with('/') {
            return Err(ConfigError::RelativeExport(value));
        }
        Ok(Self(value))
    }
}

impl From<ExportRoot> for String {
    fn from(root: ExportRoot) -> Self {
        root.0
    }
}

impl fmt::Display for ExportRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection parameters for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Remote endpoint address, e.g. `cfs-node1:9400`.
    pub server: String,
    /// Remote export root.
    pub export: ExportRoot,
    /// Timeout applied to the RPC connection.
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
    /// Whether the transport uses mutual TLS.
    pub mtls: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            export: ExportRoot(DEFAULT_EXPORT.to_string()),
            timeout: DEFAULT_TIMEOUT,
            mtls: true,
        }
    }
}

impl SessionConfig {
    /// Resolve parametric options over the defaults.
    ///
    /// Keys outside this module's namespace are ignored.
    pub fn from_params<'a, I>(params: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (key, value) in params {
            match key {
                "server" => config.server = value.to_string(),
                "export" => config.export = ExportRoot::try_from(value.to_string())?,
                "timeout_ms" => {
                    let ms = value
                        .trim()
                        .parse::<u64>()
                        .map_err(|_| invalid(key, value))?;
                    config.timeout = Duration::from_millis(ms);
                }
                "mtls" => config.mtls = parse_bool(value).ok_or_else(|| invalid(key, value))?,
                _ => {}
            }
        }
        Ok(config)
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Boolean spellings accepted by share configuration files.
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Some(true),
        "no" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Serialize a `Duration` as whole milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
