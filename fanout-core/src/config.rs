use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use fanout_sfu::SfuConfig;
use serde::{Deserialize, Serialize};

use crate::logging::parse_log_level;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub sfu: SfuConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Directory served under `/static`, if any
    pub static_dir: Option<String>,
    /// Cookie carrying the opaque session id
    pub cookie_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            static_dir: None,
            cookie_name: "session-id".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        Self::load_with_env(config_file, env_source())
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path; the file must exist
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    fn load_with_env(config_file: Option<&str>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            builder = builder.add_source(File::with_name(path));
        }

        // FANOUT_SERVER__HTTP_PORT, FANOUT_SFU__RETENTION__IDLE_TTL_SECS, ...
        builder = builder.add_source(env);

        builder.build()?.try_deserialize()
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Check the configuration, collecting every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.host.trim().is_empty() {
            errors.push("server.host must not be empty".to_string());
        }
        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }
        if !is_cookie_token(&self.server.cookie_name) {
            errors.push(format!(
                "server.cookie_name '{}' is not a valid cookie name",
                self.server.cookie_name
            ));
        }
        if let Some(dir) = &self.server.static_dir {
            if dir.trim().is_empty() {
                errors.push("server.static_dir must not be empty when set".to_string());
            }
        }

        if parse_log_level(&self.logging.level).is_err() {
            errors.push(format!("logging.level '{}' is not a valid level", self.logging.level));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            ));
        }

        for url in &self.sfu.ice_servers {
            if !["stun:", "turn:", "turns:"].iter().any(|scheme| url.starts_with(scheme)) {
                errors.push(format!("sfu.ice_servers entry '{url}' must be a stun:, turn: or turns: URL"));
            }
        }

        let retention = &self.sfu.retention;
        if retention.sweep_interval_secs > 0 {
            if retention.terminal_ttl_secs == 0 {
                errors.push("sfu.retention.terminal_ttl_secs must be non-zero".to_string());
            }
            if retention.idle_ttl_secs == 0 {
                errors.push("sfu.retention.idle_ttl_secs must be non-zero".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("FANOUT")
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("sfu.ice_servers")
        .try_parsing(true)
}

/// RFC 6265 cookie-name token
fn is_cookie_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_sfu::SelectionStrategy;
    use std::io::Write;

    fn env_from(vars: &[(&str, &str)]) -> Environment {
        let mut map = config::Map::new();
        for (key, value) in vars {
            map.insert((*key).to_string(), (*value).to_string());
        }
        env_source().source(Some(map))
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.http_port, 8080);
        assert_eq!(config.server.cookie_name, "session-id");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.sfu.retention.sweep_interval_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_address() {
        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                http_port: 9000,
                ..ServerConfig::default()
            },
            ..Config::default()
        };
        assert_eq!(config.http_address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_env_overrides() {
        let env = env_from(&[
            ("FANOUT_SERVER__HTTP_PORT", "9090"),
            ("FANOUT_SFU__SELECTION", "least_loaded"),
            ("FANOUT_SFU__RETENTION__IDLE_TTL_SECS", "42"),
            ("FANOUT_SFU__ICE_SERVERS", "stun:a.example:3478,stun:b.example:3478"),
        ]);
        let config = Config::load_with_env(None, env).unwrap();

        assert_eq!(config.server.http_port, 9090);
        assert_eq!(config.sfu.selection, SelectionStrategy::LeastLoaded);
        assert_eq!(config.sfu.retention.idle_ttl_secs, 42);
        assert_eq!(config.sfu.retention.terminal_ttl_secs, 300);
        assert_eq!(config.sfu.ice_servers.len(), 2);
    }

    #[test]
    fn test_file_then_env() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  http_port: 7000\n  cookie_name: sid\nlogging:\n  format: json\nsfu:\n  keyframe_interval_secs: 5\n"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let env = env_from(&[("FANOUT_SERVER__HTTP_PORT", "7001")]);
        let config = Config::load_with_env(Some(&path), env).unwrap();

        assert_eq!(config.server.http_port, 7001);
        assert_eq!(config.server.cookie_name, "sid");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.sfu.keyframe_interval_secs, 5);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = Config::load_with_env(Some("/nonexistent/fanout.yaml"), env_from(&[]));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_collects_errors() {
        let mut config = Config::default();
        config.server.http_port = 0;
        config.server.cookie_name = "bad name;".to_string();
        config.logging.level = "loud".to_string();
        config.logging.format = "xml".to_string();
        config.sfu.ice_servers = vec!["http://example.com".to_string()];
        config.sfu.retention.terminal_ttl_secs = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 6);
    }

    #[test]
    fn test_cookie_token() {
        assert!(is_cookie_token("session-id"));
        assert!(is_cookie_token("SID_1"));
        assert!(!is_cookie_token(""));
        assert!(!is_cookie_token("a=b"));
        assert!(!is_cookie_token("a b"));
    }
}
