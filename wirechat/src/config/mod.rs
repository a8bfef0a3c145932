//! Configuration system for the `WireChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/wirechat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use wirechat_proto::message::UserId;

use crate::connection::{Endpoint, Identity};
use crate::connection::target::DEFAULT_PORT;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    identity: IdentityFileConfig,
    reconnect: ReconnectFileConfig,
    history: HistoryFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    host: Option<String>,
    port: Option<u16>,
    secure: Option<bool>,
}

/// `[identity]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct IdentityFileConfig {
    token: Option<String>,
    user_id: Option<u64>,
    peer: Option<u64>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    max_exponent: Option<u32>,
}

/// `[history]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct HistoryFileConfig {
    limit: Option<u32>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Shortest reconnect delay ever scheduled.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(1);

/// Backoff policy for reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Largest power of two applied to `initial_delay`.
    pub max_exponent: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_exponent: 8,
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Chat server location.
    pub endpoint: Endpoint,
    /// Credential token, if any.
    pub token: Option<String>,
    /// Local user id, if known up front.
    pub user_id: Option<UserId>,
    /// Peer to select after sign-in.
    pub peer: Option<UserId>,
    /// Reconnect backoff policy.
    pub reconnect: ReconnectConfig,
    /// Number of messages requested per history fetch.
    pub history_limit: u32,
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            token: None,
            user_id: None,
            peer: None,
            reconnect: ReconnectConfig::default(),
            history_limit: 50,
            timestamp_format: "%H:%M".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// CLI args and env vars are parsed via `clap`. If `--config` is given
    /// and the file does not exist, returns an error. If no `--config` is
    /// given, the default path (`~/.config/wirechat/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Configuration from CLI args and env vars alone, ignoring any file.
    #[must_use]
    pub fn from_cli(cli: &CliArgs) -> Self {
        Self::resolve(cli, &ConfigFile::default())
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. Kept apart from `load()` so it can be
    /// tested without touching the filesystem.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        let endpoint = Endpoint {
            host: cli
                .host
                .clone()
                .or_else(|| file.server.host.clone())
                .unwrap_or(defaults.endpoint.host),
            port: cli.port.or(file.server.port).unwrap_or(DEFAULT_PORT),
            secure: cli.secure || file.server.secure.unwrap_or(defaults.endpoint.secure),
        };

        Self {
            endpoint,
            token: cli
                .token
                .clone()
                .or_else(|| file.identity.token.clone())
                .filter(|t| !t.is_empty()),
            user_id: cli.user_id.or(file.identity.user_id).map(UserId::new),
            peer: cli.peer.or(file.identity.peer).map(UserId::new),
            reconnect: ReconnectConfig {
                initial_delay: file
                    .reconnect
                    .initial_delay_ms
                    .map_or(defaults.reconnect.initial_delay, Duration::from_millis)
                    .max(MIN_RECONNECT_DELAY),
                max_delay: file
                    .reconnect
                    .max_delay_ms
                    .map_or(defaults.reconnect.max_delay, Duration::from_millis),
                max_exponent: file
                    .reconnect
                    .max_exponent
                    .unwrap_or(defaults.reconnect.max_exponent),
            },
            history_limit: file.history.limit.unwrap_or(defaults.history_limit),
            timestamp_format: cli
                .timestamp_format
                .clone()
                .unwrap_or(defaults.timestamp_format),
        }
    }

    /// Identity to sign in with, if the configuration names one.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        Identity::from_parts(self.token.clone(), self.user_id)
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Resilient real-time chat client")]
pub struct CliArgs {
    /// Chat server host name.
    #[arg(long, env = "WIRECHAT_HOST")]
    pub host: Option<String>,

    /// Chat server port (default: 8080).
    #[arg(long, env = "WIRECHAT_PORT")]
    pub port: Option<u16>,

    /// Connect with TLS (`wss`/`https`).
    #[arg(long)]
    pub secure: bool,

    /// Credential token presented to the server.
    #[arg(long, env = "WIRECHAT_TOKEN")]
    pub token: Option<String>,

    /// Local user id, when signing in without a token.
    #[arg(long, env = "WIRECHAT_USER_ID")]
    pub user_id: Option<u64>,

    /// Peer to open a conversation with on start.
    #[arg(long)]
    pub peer: Option<u64>,

    /// Path to config file (default: `~/.config/wirechat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "WIRECHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/wirechat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("wirechat").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.endpoint, Endpoint::new("localhost"));
        assert_eq!(config.endpoint.port, 8080);
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(30));
        assert_eq!(config.reconnect.max_exponent, 8);
        assert_eq!(config.history_limit, 50);
        assert!(config.identity().is_none());
    }

    #[test]
    fn toml_parsing_full() {
        let toml_str = r#"
[server]
host = "chat.example.com"
port = 9443
secure = true

[identity]
token = "secret"
user_id = 5
peer = 9

[reconnect]
initial_delay_ms = 250
max_delay_ms = 5000
max_exponent = 4

[history]
limit = 20
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let config = ClientConfig::resolve(&CliArgs::default(), &file);

        assert_eq!(
            config.endpoint,
            Endpoint::new("chat.example.com").with_port(9443).with_secure(true)
        );
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.user_id, Some(UserId::new(5)));
        assert_eq!(config.peer, Some(UserId::new(9)));
        assert_eq!(config.reconnect.initial_delay, Duration::from_millis(250));
        assert_eq!(config.reconnect.max_delay, Duration::from_millis(5000));
        assert_eq!(config.reconnect.max_exponent, 4);
        assert_eq!(config.history_limit, 20);

        let identity = config.identity().unwrap();
        assert_eq!(identity.token.as_deref(), Some("secret"));
        assert_eq!(identity.user_id, Some(UserId::new(5)));
    }

    #[test]
    fn toml_parsing_partial() {
        let toml_str = r#"
[server]
host = "custom"
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let config = ClientConfig::resolve(&CliArgs::default(), &file);

        assert_eq!(config.endpoint.host, "custom");
        assert_eq!(config.endpoint.port, 8080);
        assert!(!config.endpoint.secure);
        assert_eq!(config.reconnect, ReconnectConfig::default());
    }

    #[test]
    fn toml_parsing_empty() {
        let file: ConfigFile = toml::from_str("").unwrap();
        let config = ClientConfig::resolve(&CliArgs::default(), &file);
        assert_eq!(config.endpoint.host, "localhost");
        assert!(config.token.is_none());
    }

    #[test]
    fn cli_overrides_file() {
        let toml_str = r#"
[server]
host = "file-host"
port = 7000

[identity]
user_id = 3
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let cli = CliArgs {
            host: Some("cli-host".to_string()),
            user_id: None, // not set on CLI, falls through to file
            token: Some("cli-token".to_string()),
            secure: true,
            ..Default::default()
        };
        let config = ClientConfig::resolve(&cli, &file);

        assert_eq!(config.endpoint.host, "cli-host");
        assert_eq!(config.endpoint.port, 7000);
        assert!(config.endpoint.secure);
        assert_eq!(config.user_id, Some(UserId::new(3)));
        assert_eq!(config.token.as_deref(), Some("cli-token"));
    }

    #[test]
    fn empty_token_counts_as_missing() {
        let cli = CliArgs {
            token: Some(String::new()),
            ..Default::default()
        };
        let config = ClientConfig::resolve(&cli, &ConfigFile::default());
        assert!(config.token.is_none());
    }

    #[test]
    fn zero_initial_delay_is_clamped() {
        let file: ConfigFile = toml::from_str("[reconnect]\ninitial_delay_ms = 0\n").unwrap();
        let config = ClientConfig::resolve(&CliArgs::default(), &file);
        assert_eq!(config.reconnect.initial_delay, MIN_RECONNECT_DELAY);
    }

    #[test]
    fn cli_alone_keeps_identity() {
        let cli = CliArgs {
            user_id: Some(7),
            host: Some("chat".to_string()),
            ..Default::default()
        };
        let config = ClientConfig::from_cli(&cli);
        assert_eq!(config.endpoint.host, "chat");
        assert_eq!(config.identity().unwrap().user_id, Some(UserId::new(7)));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        assert!(load_config_file(None).is_ok());
    }

    #[test]
    fn explicit_missing_config_file_returns_error() {
        let result = load_config_file(Some(std::path::Path::new("/nonexistent/config.toml")));
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
