use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const ENV_HOST: &str = "REMOTE_EXEC_HOST";
pub const ENV_PORT: &str = "REMOTE_EXEC_PORT";
pub const ENV_COMMAND_TIMEOUT: &str = "REMOTE_EXEC_COMMAND_TIMEOUT_SECS";
pub const ENV_IDLE_TIMEOUT: &str = "REMOTE_EXEC_IDLE_TIMEOUT_SECS";
pub const ENV_MAX_MESSAGE: &str = "REMOTE_EXEC_MAX_MESSAGE_BYTES";

pub const DEFAULT_PORT: u16 = 34391;
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

fn parse_var<T>(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = lookup(key)?;
    raw.trim()
        .parse::<T>()
        .inspect_err(|e| warn!("Could not parse {}={:?}: {}", key, raw, e))
        .ok()
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &str) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading config file {path}"))?;
    serde_json::from_str(&raw).context("parsing config JSON")
}

/// Server settings. Read once at startup and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Per-command execution limit
    pub command_timeout_secs: u64,
    /// How long a connection may stay silent before it is dropped
    pub idle_timeout_secs: u64,
    pub max_message_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            command_timeout_secs: 30,
            idle_timeout_secs: 10,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        read_json(path)
    }

    /// Defaults, then the optional JSON file, then `REMOTE_EXEC_*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cfg.apply_overrides(&|key: &str| std::env::var(key).ok());
        Ok(cfg)
    }

    pub fn apply_overrides(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = parse_var(lookup, ENV_PORT) {
            self.port = port;
        }
        if let Some(secs) = parse_var(lookup, ENV_COMMAND_TIMEOUT) {
            self.command_timeout_secs = secs;
        }
        if let Some(secs) = parse_var(lookup, ENV_IDLE_TIMEOUT) {
            self.idle_timeout_secs = secs;
        }
        if let Some(bytes) = parse_var(lookup, ENV_MAX_MESSAGE) {
            self.max_message_bytes = bytes;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("host must not be empty");
        }
        if self.command_timeout_secs == 0 {
            bail!("command_timeout_secs must be greater than zero");
        }
        if self.idle_timeout_secs == 0 {
            bail!("idle_timeout_secs must be greater than zero");
        }
        if self.max_message_bytes == 0 {
            bail!("max_message_bytes must be greater than zero");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_secs: u64,
    /// Unset means wait for as long as the server takes to run the batch
    pub response_timeout_secs: Option<u64>,
    pub max_message_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_secs: 10,
            response_timeout_secs: None,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl ClientConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        read_json(path)
    }

    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cfg.apply_overrides(&|key: &str| std::env::var(key).ok());
        Ok(cfg)
    }

    pub fn apply_overrides(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = parse_var(lookup, ENV_PORT) {
            self.port = port;
        }
        if let Some(bytes) = parse_var(lookup, ENV_MAX_MESSAGE) {
            self.max_message_bytes = bytes;
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_server_defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:34391");
        assert_eq!(cfg.command_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.idle_timeout(), Duration::from_secs(10));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"port": 9999, "command_timeout_secs": 5}}"#).unwrap();

        let cfg = ServerConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.port, 9999);
        assert_eq!(cfg.command_timeout_secs, 5);
        assert_eq!(cfg.idle_timeout_secs, 10);
        assert_eq!(cfg.host, "0.0.0.0");
    }

    #[test]
    fn test_config_missing_file() {
        assert!(ServerConfig::from_file("/nonexistent/path/config.json").is_err());
    }

    #[test]
    fn test_config_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{invalid json").unwrap();
        assert!(ClientConfig::from_file(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = ServerConfig::default();
        cfg.apply_overrides(&lookup_from(&[
            (ENV_HOST, "127.0.0.1"),
            (ENV_PORT, "8080"),
            (ENV_COMMAND_TIMEOUT, "2"),
            (ENV_IDLE_TIMEOUT, "not-a-number"),
        ]));

        assert_eq!(cfg.bind_addr(), "127.0.0.1:8080");
        assert_eq!(cfg.command_timeout_secs, 2);
        // unparsable values are ignored
        assert_eq!(cfg.idle_timeout_secs, 10);
    }

    #[test]
    fn test_client_overrides() {
        let mut cfg = ClientConfig::default();
        cfg.apply_overrides(&lookup_from(&[(ENV_PORT, "4000"), (ENV_MAX_MESSAGE, "2048")]));
        assert_eq!(cfg.server_addr(), "127.0.0.1:4000");
        assert_eq!(cfg.max_message_bytes, 2048);
        assert_eq!(cfg.response_timeout(), None);
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let cfg = ServerConfig {
            command_timeout_secs: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = ServerConfig {
            idle_timeout_secs: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
