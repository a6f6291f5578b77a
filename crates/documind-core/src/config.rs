//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/documind/config.toml)
//! 3. Environment variables (DOCUMIND_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable prefix
const ENV_PREFIX: &str = "DOCUMIND";

/// Transport used to stream chat answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChatTransport {
    /// Server-sent events on the ask request itself
    EventStream,
    /// WebSocket subscription plus a separate ask request
    #[default]
    Socket,
}

impl FromStr for ChatTransport {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "event-stream" | "sse" => Ok(ChatTransport::EventStream),
            "socket" | "websocket" | "ws" => Ok(ChatTransport::Socket),
            other => bail!("Unknown chat transport '{}'. Use 'event-stream' or 'socket'.", other),
        }
    }
}

impl fmt::Display for ChatTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatTransport::EventStream => f.write_str("event-stream"),
            ChatTransport::Socket => f.write_str("socket"),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the DocuMind API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Base URL for WebSocket channels (derived from api_url when unset)
    #[serde(default)]
    pub ws_url: Option<String>,

    /// How chat answers are streamed
    #[serde(default)]
    pub chat_transport: ChatTransport,

    /// Seconds without a frame before a channel is considered dead
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Seconds allowed for opening a channel
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Seconds allowed for a plain request/response call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Log file path (logs go to stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: None,
            chat_transport: ChatTransport::default(),
            keepalive_secs: default_keepalive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (DOCUMIND_API_URL, DOCUMIND_WS_URL, ...)
    /// 2. Config file (~/.config/documind/config.toml or DOCUMIND_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring a path given on the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // DOCUMIND_API_URL
        if let Ok(val) = std::env::var(format!("{}_API_URL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.api_url = val;
            }
        }

        // DOCUMIND_WS_URL
        if let Ok(val) = std::env::var(format!("{}_WS_URL", ENV_PREFIX)) {
            self.ws_url = if val.is_empty() { None } else { Some(val) };
        }

        // DOCUMIND_CHAT_TRANSPORT
        if let Ok(val) = std::env::var(format!("{}_CHAT_TRANSPORT", ENV_PREFIX)) {
            self.chat_transport = val.parse()?;
        }

        // DOCUMIND_KEEPALIVE_SECS
        if let Ok(val) = std::env::var(format!("{}_KEEPALIVE_SECS", ENV_PREFIX)) {
            self.keepalive_secs = val
                .parse()
                .with_context(|| format!("Invalid {}_KEEPALIVE_SECS: {}", ENV_PREFIX, val))?;
        }

        // DOCUMIND_CONNECT_TIMEOUT_SECS
        if let Ok(val) = std::env::var(format!("{}_CONNECT_TIMEOUT_SECS", ENV_PREFIX)) {
            self.connect_timeout_secs = val
                .parse()
                .with_context(|| format!("Invalid {}_CONNECT_TIMEOUT_SECS: {}", ENV_PREFIX, val))?;
        }

        // DOCUMIND_REQUEST_TIMEOUT_SECS
        if let Ok(val) = std::env::var(format!("{}_REQUEST_TIMEOUT_SECS", ENV_PREFIX)) {
            self.request_timeout_secs = val
                .parse()
                .with_context(|| format!("Invalid {}_REQUEST_TIMEOUT_SECS: {}", ENV_PREFIX, val))?;
        }

        Ok(())
    }

    /// Reject values the transports cannot work with
    fn validate(&self) -> Result<()> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            bail!("api_url must start with http:// or https:// (got '{}')", self.api_url);
        }
        if let Some(ref ws) = self.ws_url {
            if !(ws.starts_with("ws://") || ws.starts_with("wss://")) {
                bail!("ws_url must start with ws:// or wss:// (got '{}')", ws);
            }
        }
        if self.keepalive_secs == 0 {
            bail!("keepalive_secs must be greater than zero");
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with DOCUMIND_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("documind")
            .join("config.toml")
    }

    /// API base URL without a trailing slash
    pub fn api_base(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    /// WebSocket base URL: explicit ws_url, or api_url with http → ws
    pub fn websocket_base(&self) -> String {
        match self.ws_url {
            Some(ref ws) => ws.trim_end_matches('/').to_string(),
            None => {
                let base = self.api_base();
                match base.strip_prefix("http") {
                    Some(rest) => format!("ws{}", rest),
                    None => base.to_string(),
                }
            }
        }
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_keepalive_secs() -> u64 {
    90
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            // Clear all the vars
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "DOCUMIND_API_URL",
        "DOCUMIND_WS_URL",
        "DOCUMIND_CHAT_TRANSPORT",
        "DOCUMIND_KEEPALIVE_SECS",
        "DOCUMIND_CONNECT_TIMEOUT_SECS",
        "DOCUMIND_REQUEST_TIMEOUT_SECS",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_url, "http://localhost:8000");
        assert!(config.ws_url.is_none());
        assert_eq!(config.chat_transport, ChatTransport::Socket);
        assert_eq!(config.keepalive(), Duration::from_secs(90));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_websocket_base_derived() {
        let mut config = Config::default();
        assert_eq!(config.websocket_base(), "ws://localhost:8000");

        config.api_url = "https://docs.example.com/".to_string();
        assert_eq!(config.websocket_base(), "wss://docs.example.com");

        config.ws_url = Some("ws://push.example.com/".to_string());
        assert_eq!(config.websocket_base(), "ws://push.example.com");
    }

    #[test]
    fn test_chat_transport_parse() {
        assert_eq!("sse".parse::<ChatTransport>().unwrap(), ChatTransport::EventStream);
        assert_eq!("Socket".parse::<ChatTransport>().unwrap(), ChatTransport::Socket);
        assert!("carrier-pigeon".parse::<ChatTransport>().is_err());
    }

    #[test]
    fn test_env_override_api_url() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("DOCUMIND_API_URL", "http://api.internal:9000");
        config.apply_env_overrides().unwrap();

        assert_eq!(config.api_url, "http://api.internal:9000");
    }

    #[test]
    fn test_env_override_transport_and_keepalive() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("DOCUMIND_CHAT_TRANSPORT", "sse");
        env::set_var("DOCUMIND_KEEPALIVE_SECS", "15");
        config.apply_env_overrides().unwrap();

        assert_eq!(config.chat_transport, ChatTransport::EventStream);
        assert_eq!(config.keepalive(), Duration::from_secs(15));

        env::set_var("DOCUMIND_KEEPALIVE_SECS", "soon");
        assert!(config.apply_env_overrides().is_err());
    }

    #[test]
    fn test_env_override_ws_url() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("DOCUMIND_WS_URL", "ws://localhost:8001");
        config.apply_env_overrides().unwrap();
        assert_eq!(config.ws_url, Some("ws://localhost:8001".to_string()));

        // Empty string clears it
        env::set_var("DOCUMIND_WS_URL", "");
        config.apply_env_overrides().unwrap();
        assert!(config.ws_url.is_none());
    }

    #[test]
    fn test_serialization() {
        let _guard = EnvGuard::new(ENV_VARS);

        let config = Config {
            api_url: "http://docs.example.com".to_string(),
            ws_url: None,
            chat_transport: ChatTransport::EventStream,
            keepalive_secs: 45,
            connect_timeout_secs: 5,
            request_timeout_secs: 20,
            log_file: None,
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("api_url"));
        assert!(toml_str.contains("chat_transport = \"event-stream\""));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.api_url, config.api_url);
        assert_eq!(parsed.chat_transport, config.chat_transport);
        assert_eq!(parsed.keepalive_secs, 45);
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            api_url = "https://docs.example.com"
            chat_transport = "event-stream"
            keepalive_secs = 30
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.api_url, "https://docs.example.com");
        assert_eq!(config.chat_transport, ChatTransport::EventStream);
        assert_eq!(config.keepalive_secs, 30);
        assert_eq!(config.connect_timeout_secs, 10);
    }

    #[test]
    fn test_load_rejects_bad_urls() {
        let _guard = EnvGuard::new(ENV_VARS);

        assert!(Config::load_from_str(r#"api_url = "ftp://nope""#).is_err());
        assert!(Config::load_from_str(r#"ws_url = "http://not-a-socket""#).is_err());
        assert!(Config::load_from_str("keepalive_secs = 0").is_err());
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        // Should return defaults when file doesn't exist
        assert_eq!(config.api_url, "http://localhost:8000");
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);

        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.keepalive_secs = 12;
        config.save_to_path(&path).unwrap();

        let reloaded = Config::load_from_path(&path).unwrap();
        assert_eq!(reloaded.keepalive_secs, 12);
    }

    #[test]
    fn test_env_overrides_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            "api_url = \"http://files.local:8000\"\nkeepalive_secs = 20\n",
        )
        .unwrap();

        env::set_var("DOCUMIND_KEEPALIVE_SECS", "45");
        let config = Config::load_from_path(&path).unwrap();

        // File beats defaults, environment beats file
        assert_eq!(config.api_url, "http://files.local:8000");
        assert_eq!(config.keepalive_secs, 45);
        assert_eq!(config.request_timeout_secs, 30);
    }
}
