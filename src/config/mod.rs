//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files (`[server]`, `[client]`, `[session]`)
//! - Environment variables (`KINET_*`)
//! - CLI arguments (for the `kinet` binary)
//!
//! Every field has a default, so any subset of a file is valid:
//!
//! ```toml
//! [server]
//! port = 7000
//! id_min = 1
//! id_max = 512
//!
//! [session]
//! watchdog_secs = 5.0
//! watchdog_mode = "observe"
//! heartbeat_timeout_secs = 90.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::allocator::{DEFAULT_MAX_SESSION_ID, DEFAULT_MIN_SESSION_ID};
use crate::error::{NetError, Result};
use crate::session::{
    SessionConfig, WatchdogMode, DEFAULT_KEEP_ALIVE_INTERVAL, DEFAULT_WATCHDOG_INTERVAL,
};

/// Default port for both endpoints.
pub const DEFAULT_PORT: u16 = 7000;

/// Default host for both endpoints.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default client connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: f64 = 10.0;

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Listening endpoint
    #[serde(default)]
    pub server: ServerConfig,

    /// Connecting endpoint
    #[serde(default)]
    pub client: ClientConfig,

    /// Settings shared by every session
    #[serde(default)]
    pub session: SessionSettings,
}

impl Config {
    /// Default config file location (`<config dir>/kinet/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("kinet").join("config.toml"))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            NetError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        toml::from_str(&content).map_err(|e| NetError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Resolve the effective configuration.
    ///
    /// Reads `path` if given, else the default path if it exists, else
    /// starts from defaults. Environment overrides are applied last and
    /// the result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(default)?,
                _ => Self::default(),
            },
        };

        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `KINET_*` environment variables on top of `self`.
    pub fn with_env_overrides(self) -> Self {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            let raw = lookup(key)?;
            match raw.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring {}={:?}: not a valid value", key, raw);
                    None
                },
            }
        }

        if let Some(port) = parsed::<u16>(&lookup, "KINET_PORT") {
            self.server.port = port;
            self.client.port = port;
        }
        if let Some(host) = lookup("KINET_HOST") {
            self.server.host.clone_from(&host);
            self.client.host = host;
        }
        if let Some(secs) = parsed::<f64>(&lookup, "KINET_KEEP_ALIVE_SECS") {
            self.server.keep_alive_secs = secs;
            self.client.keep_alive_secs = secs;
        }
        if let Some(secs) = parsed::<f64>(&lookup, "KINET_WATCHDOG_SECS") {
            self.session.watchdog_secs = secs;
        }
        if let Some(secs) = parsed::<f64>(&lookup, "KINET_HEARTBEAT_TIMEOUT_SECS") {
            self.session.heartbeat_timeout_secs = Some(secs);
        }
        if let Some(min) = parsed::<u16>(&lookup, "KINET_ID_MIN") {
            self.server.id_min = min;
        }
        if let Some(max) = parsed::<u16>(&lookup, "KINET_ID_MAX") {
            self.server.id_max = max;
        }

        self
    }

    /// Check every section.
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.client.validate()?;
        self.session.validate()
    }
}

fn positive_secs(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| NetError::Config(format!("{name} must be a positive number of seconds, got {secs}")))
}

/// Server endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on (0 picks a free port)
    pub port: u16,

    /// Lowest allocatable session id
    pub id_min: u16,

    /// Highest allocatable session id
    pub id_max: u16,

    /// Keep-alive interval in seconds
    pub keep_alive_secs: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            id_min: DEFAULT_MIN_SESSION_ID,
            id_max: DEFAULT_MAX_SESSION_ID,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_INTERVAL.as_secs_f64(),
        }
    }
}

impl ServerConfig {
    /// Get the full listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Create with custom port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Bind to all interfaces
    pub fn bind_all(self) -> Self {
        self.with_host("0.0.0.0")
    }

    /// Restrict session ids to `[min, max]`
    pub fn with_id_range(mut self, min: u16, max: u16) -> Self {
        self.id_min = min;
        self.id_max = max;
        self
    }

    /// Set keep-alive interval
    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive_secs = interval.as_secs_f64();
        self
    }

    /// Keep-alive interval as a [`Duration`].
    pub fn keep_alive_interval(&self) -> Result<Duration> {
        positive_secs("server.keep_alive_secs", self.keep_alive_secs)
    }

    /// Validate ranges and intervals
    pub fn validate(&self) -> Result<()> {
        if self.id_min == 0 {
            return Err(NetError::Config(
                "server.id_min must be at least 1 (0 is reserved for clients)".to_string(),
            ));
        }
        if self.id_min > self.id_max {
            return Err(NetError::Config(format!(
                "server.id_min ({}) exceeds server.id_max ({})",
                self.id_min, self.id_max
            )));
        }
        self.keep_alive_interval().map(|_| ())
    }
}

/// Client endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Host to connect to
    pub host: String,

    /// Port to connect to
    pub port: u16,

    /// Keep-alive interval in seconds
    pub keep_alive_secs: f64,

    /// Connect timeout in seconds
    pub connect_timeout_secs: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_INTERVAL.as_secs_f64(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    /// Get the full server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Set port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set keep-alive interval
    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive_secs = interval.as_secs_f64();
        self
    }

    /// Set connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs_f64();
        self
    }

    /// Keep-alive interval as a [`Duration`].
    pub fn keep_alive_interval(&self) -> Result<Duration> {
        positive_secs("client.keep_alive_secs", self.keep_alive_secs)
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Result<Duration> {
        positive_secs("client.connect_timeout_secs", self.connect_timeout_secs)
    }

    /// Validate intervals
    pub fn validate(&self) -> Result<()> {
        self.keep_alive_interval()?;
        self.connect_timeout().map(|_| ())
    }
}

/// Settings applied to every session regardless of role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Watchdog interval in seconds
    pub watchdog_secs: f64,

    /// How the watchdog treats the liveness flag
    pub watchdog_mode: WatchdogMode,

    /// Maximum heartbeat age in seconds for observe mode; derived from the
    /// peer's keep-alive interval when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_timeout_secs: Option<f64>,

    /// Close sessions on unhandled message kinds
    pub close_on_unhandled: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            watchdog_secs: DEFAULT_WATCHDOG_INTERVAL.as_secs_f64(),
            watchdog_mode: WatchdogMode::default(),
            heartbeat_timeout_secs: None,
            close_on_unhandled: false,
        }
    }
}

impl SessionSettings {
    /// Set watchdog interval
    pub fn with_watchdog(mut self, interval: Duration) -> Self {
        self.watchdog_secs = interval.as_secs_f64();
        self
    }

    /// Set watchdog mode
    pub fn with_watchdog_mode(mut self, mode: WatchdogMode) -> Self {
        self.watchdog_mode = mode;
        self
    }

    /// Set a fixed heartbeat timeout
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    /// Close sessions on unhandled message kinds
    pub fn strict(mut self) -> Self {
        self.close_on_unhandled = true;
        self
    }

    /// Watchdog interval as a [`Duration`].
    pub fn watchdog_interval(&self) -> Result<Duration> {
        positive_secs("session.watchdog_secs", self.watchdog_secs)
    }

    /// Configured heartbeat timeout, if any.
    pub fn heartbeat_timeout(&self) -> Result<Option<Duration>> {
        self.heartbeat_timeout_secs
            .map(|secs| positive_secs("session.heartbeat_timeout_secs", secs))
            .transpose()
    }

    /// Validate intervals
    pub fn validate(&self) -> Result<()> {
        self.watchdog_interval()?;
        self.heartbeat_timeout().map(|_| ())
    }

    /// Combine with an endpoint's keep-alive interval.
    pub fn session_config(&self, keep_alive_interval: Duration) -> Result<SessionConfig> {
        Ok(SessionConfig {
            keep_alive_interval,
            watchdog_interval: self.watchdog_interval()?,
            watchdog_mode: self.watchdog_mode,
            close_on_unhandled: self.close_on_unhandled,
            heartbeat_timeout: self.heartbeat_timeout()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.id_min, 1);
        assert_eq!(config.server.id_max, 65535);
        assert_eq!(config.server.keep_alive_secs, 60.0);
        assert_eq!(config.client.keep_alive_secs, 60.0);
        assert_eq!(config.session.watchdog_secs, 10.0);
        assert!(!config.session.close_on_unhandled);
        assert_ok!(config.validate());
    }

    #[test]
    fn test_listen_addr() {
        let config = ServerConfig::default().with_port(9000).bind_all();
        assert_eq!(config.listen_addr(), "0.0.0.0:9000");
        assert_eq!(ClientConfig::default().server_addr(), "127.0.0.1:7000");
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [server]
            port = 9090
            id_min = 10
            id_max = 20

            [client]
            keep_alive_secs = 10

            [session]
            watchdog_secs = 2.5
            watchdog_mode = "consume"
            heartbeat_timeout_secs = 45
            close_on_unhandled = true
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!((config.server.id_min, config.server.id_max), (10, 20));
        assert_eq!(config.client.keep_alive_interval().unwrap(), Duration::from_secs(10));
        assert_eq!(config.session.watchdog_interval().unwrap(), Duration::from_millis(2500));
        assert_eq!(config.session.watchdog_mode, WatchdogMode::Consume);
        assert_eq!(config.session.heartbeat_timeout().unwrap(), Some(Duration::from_secs(45)));
        assert!(config.session.close_on_unhandled);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 4321").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 4321);
        assert_eq!(config.client, ClientConfig::default());
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(Config::from_file(&missing), Err(NetError::Config(_))));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[server\nport = ").unwrap();
        assert!(matches!(Config::from_file(&broken), Err(NetError::Config(_))));
    }

    #[test]
    fn test_load_explicit_path_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nid_min = 9\nid_max = 3\n").unwrap();
        assert!(matches!(Config::load(Some(&path)), Err(NetError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("KINET_PORT", "8123"),
            ("KINET_HOST", "0.0.0.0"),
            ("KINET_KEEP_ALIVE_SECS", "10"),
            ("KINET_WATCHDOG_SECS", "0.5"),
            ("KINET_HEARTBEAT_TIMEOUT_SECS", "30"),
            ("KINET_ID_MIN", "100"),
            ("KINET_ID_MAX", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = Config::default().apply_vars(|key| vars.get(key).map(|v| (*v).to_string()));
        assert_eq!(config.server.port, 8123);
        assert_eq!(config.client.port, 8123);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.client.host, "0.0.0.0");
        assert_eq!(config.server.keep_alive_secs, 10.0);
        assert_eq!(config.client.keep_alive_secs, 10.0);
        assert_eq!(config.session.watchdog_secs, 0.5);
        assert_eq!(config.session.heartbeat_timeout_secs, Some(30.0));
        assert_eq!(config.server.id_min, 100);
        // Unparsable values are ignored.
        assert_eq!(config.server.id_max, 65535);
    }

    #[test]
    fn test_validation() {
        assert_err!(ServerConfig::default().with_id_range(0, 5).validate());
        assert_err!(ServerConfig::default().with_id_range(5, 4).validate());
        assert_ok!(ServerConfig::default().with_id_range(5, 5).validate());

        let mut server = ServerConfig::default();
        server.keep_alive_secs = 0.0;
        assert_err!(server.validate());

        let mut client = ClientConfig::default();
        client.connect_timeout_secs = -1.0;
        assert_err!(client.validate());

        let mut session = SessionSettings::default();
        session.watchdog_secs = f64::NAN;
        assert_err!(session.validate());

        let mut session = SessionSettings::default();
        assert_eq!(session.heartbeat_timeout().unwrap(), None);
        session.heartbeat_timeout_secs = Some(0.0);
        assert_err!(session.validate());
    }

    #[test]
    fn test_session_config() {
        let settings = SessionSettings::default()
            .with_watchdog(Duration::from_secs(3))
            .with_watchdog_mode(WatchdogMode::Consume)
            .with_heartbeat_timeout(Duration::from_secs(30))
            .strict();
        let config = settings.session_config(Duration::from_secs(10)).unwrap();
        assert_eq!(
            config,
            SessionConfig::default()
                .with_keep_alive_interval(Duration::from_secs(10))
                .with_watchdog_interval(Duration::from_secs(3))
                .with_watchdog_mode(WatchdogMode::Consume)
                .with_heartbeat_timeout(Duration::from_secs(30))
                .strict()
        );
    }
}
