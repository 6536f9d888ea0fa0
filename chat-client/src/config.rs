use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub login: LoginSettings,
    #[serde(default)]
    pub limits: LimitsSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientSettings {
    /// Prompted for when absent
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoginSettings {
    /// Total login attempts before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// How long to wait for a login response per attempt
    #[serde(default = "default_login_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsSettings {
    /// Receive buffer capacity in bytes; also bounds outbound frames
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Output logs as JSON
    #[serde(default)]
    pub json_logs: bool,
}

fn default_server_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    12345
}

fn default_max_retries() -> u32 {
    3
}

fn default_login_timeout() -> u64 {
    5
}

fn default_buffer_capacity() -> usize {
    chat_proto::DEFAULT_BUFFER_CAPACITY
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_write_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            nickname: None,
            server_addr: default_server_addr(),
            server_port: default_server_port(),
        }
    }
}

impl Default for LoginSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_secs: default_login_timeout(),
        }
    }
}

impl Default for LimitsSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            write_timeout_secs: default_write_timeout(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

impl ClientConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: ClientConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self::default()
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.login.max_retries == 0 {
            anyhow::bail!("login.max_retries must be at least 1");
        }
        if self.limits.buffer_capacity <= chat_proto::HEADER_SIZE {
            anyhow::bail!(
                "limits.buffer_capacity must exceed the {}-byte frame header",
                chat_proto::HEADER_SIZE
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default_config();

        assert_eq!(config.client.nickname, None);
        assert_eq!(config.client.server_port, 12345);
        assert_eq!(config.login.max_retries, 3);
        assert_eq!(config.login.timeout_secs, 5);
        assert_eq!(config.limits.buffer_capacity, 8192);
        assert_eq!(config.logging.log_level, "info");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config = ClientConfig::from_toml(
            r#"
            [client]
            nickname = "alice"
            server_addr = "10.0.0.5"

            [login]
            max_retries = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.client.nickname.as_deref(), Some("alice"));
        assert_eq!(config.client.server_addr, "10.0.0.5");
        assert_eq!(config.client.server_port, 12345);
        assert_eq!(config.login.max_retries, 5);
        assert_eq!(config.login.timeout_secs, 5);
        assert_eq!(config.timeouts.connect_timeout_secs, 10);
        assert!(!config.logging.json_logs);
    }

    #[test]
    fn test_empty_file() {
        let config = ClientConfig::from_toml("").unwrap();
        assert_eq!(config.client.server_addr, "127.0.0.1");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ClientConfig::from_toml("[login]\nmax_retries = 0").is_err());
        assert!(ClientConfig::from_toml("[limits]\nbuffer_capacity = 9").is_err());
        assert!(ClientConfig::from_toml("[client]\nserver_port = \"x\"").is_err());
    }
}
