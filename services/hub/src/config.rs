//! Typed configuration document (§6 "Configuration"). Follows the two-struct
//! pattern: [`RawConfig`] deserializes a TOML document with every field
//! optional, [`Config`] fills in defaults and is what the rest of the server
//! reads. `SUPERCHAT_<SECTION>_<KEY>` environment variables override both the
//! file and the defaults.

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub retention: RetentionConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tcp_port: u16,
    /// `0` disables the SSH transport entirely.
    pub ssh_port: u16,
    pub ssh_host_key: Option<String>,
    /// `0` disables the WebSocket transport entirely. Not named by spec.md's
    /// configuration keys (which only call out `tcp_port`/`ssh_port`), added
    /// because the WebSocket listener needs its own bind port distinct from
    /// the raw TCP one (see DESIGN.md).
    pub ws_port: u16,
    pub database_path: String,
}

#[derive(Debug, Clone)]
pub struct LimitsConfig {
    pub max_connections_per_ip: u32,
    pub message_rate_limit: u32,
    pub max_message_length: usize,
    pub max_nickname_length: usize,
    pub session_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub default_retention_hours: u32,
    pub cleanup_interval_minutes: u32,
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub directory_enabled: bool,
    pub public_hostname: Option<String>,
    pub server_name: String,
    pub server_description: String,
    pub max_users: u32,
    /// `host:port` pairs of directories to register with as a client (§4.6
    /// "as client"). Not named by spec.md's configuration keys, which only
    /// cover the host role; a client needs somewhere to dial, so this list
    /// is a supplemental key (see DESIGN.md).
    pub directory_addresses: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                tcp_port: 6666,
                ssh_port: 0,
                ssh_host_key: None,
                ws_port: 0,
                database_path: "postgres://localhost/chathub".to_owned(),
            },
            limits: LimitsConfig {
                max_connections_per_ip: 10,
                message_rate_limit: 10,
                max_message_length: 4096,
                max_nickname_length: 20,
                session_timeout_seconds: 120,
            },
            retention: RetentionConfig {
                default_retention_hours: 168,
                cleanup_interval_minutes: 60,
            },
            discovery: DiscoveryConfig {
                directory_enabled: false,
                public_hostname: None,
                server_name: "chathub".to_owned(),
                server_description: String::new(),
                max_users: 1000,
                directory_addresses: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    server: RawServerConfig,
    #[serde(default)]
    limits: RawLimitsConfig,
    #[serde(default)]
    retention: RawRetentionConfig,
    #[serde(default)]
    discovery: RawDiscoveryConfig,
}

#[derive(Debug, Default, Deserialize)]
struct RawServerConfig {
    tcp_port: Option<u16>,
    ssh_port: Option<u16>,
    ssh_host_key: Option<String>,
    ws_port: Option<u16>,
    database_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLimitsConfig {
    max_connections_per_ip: Option<u32>,
    message_rate_limit: Option<u32>,
    max_message_length: Option<usize>,
    max_nickname_length: Option<usize>,
    session_timeout_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRetentionConfig {
    default_retention_hours: Option<u32>,
    cleanup_interval_minutes: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDiscoveryConfig {
    directory_enabled: Option<bool>,
    public_hostname: Option<String>,
    server_name: Option<String>,
    server_description: Option<String>,
    max_users: Option<u32>,
    #[serde(default)]
    directory_addresses: Vec<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?
        } else {
            RawConfig::default()
        };

        let mut config = Self::from_raw(raw)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            server: ServerConfig {
                tcp_port: raw.server.tcp_port.unwrap_or(defaults.server.tcp_port),
                ssh_port: raw.server.ssh_port.unwrap_or(defaults.server.ssh_port),
                ssh_host_key: raw.server.ssh_host_key.or(defaults.server.ssh_host_key),
                ws_port: raw.server.ws_port.unwrap_or(defaults.server.ws_port),
                database_path: raw
                    .server
                    .database_path
                    .unwrap_or(defaults.server.database_path),
            },
            limits: LimitsConfig {
                max_connections_per_ip: raw
                    .limits
                    .max_connections_per_ip
                    .unwrap_or(defaults.limits.max_connections_per_ip),
                message_rate_limit: raw
                    .limits
                    .message_rate_limit
                    .unwrap_or(defaults.limits.message_rate_limit),
                max_message_length: raw
                    .limits
                    .max_message_length
                    .unwrap_or(defaults.limits.max_message_length),
                max_nickname_length: raw
                    .limits
                    .max_nickname_length
                    .unwrap_or(defaults.limits.max_nickname_length),
                session_timeout_seconds: raw
                    .limits
                    .session_timeout_seconds
                    .unwrap_or(defaults.limits.session_timeout_seconds),
            },
            retention: RetentionConfig {
                default_retention_hours: raw
                    .retention
                    .default_retention_hours
                    .unwrap_or(defaults.retention.default_retention_hours),
                cleanup_interval_minutes: raw
                    .retention
                    .cleanup_interval_minutes
                    .unwrap_or(defaults.retention.cleanup_interval_minutes),
            },
            discovery: DiscoveryConfig {
                directory_enabled: raw
                    .discovery
                    .directory_enabled
                    .unwrap_or(defaults.discovery.directory_enabled),
                public_hostname: raw.discovery.public_hostname.or(defaults.discovery.public_hostname),
                server_name: raw.discovery.server_name.unwrap_or(defaults.discovery.server_name),
                server_description: raw
                    .discovery
                    .server_description
                    .unwrap_or(defaults.discovery.server_description),
                max_users: raw.discovery.max_users.unwrap_or(defaults.discovery.max_users),
                directory_addresses: if raw.discovery.directory_addresses.is_empty() {
                    defaults.discovery.directory_addresses
                } else {
                    raw.discovery.directory_addresses
                },
            },
        })
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("SUPERCHAT_SERVER_TCP_PORT") {
            self.server.tcp_port = v.parse().map_err(|_| ConfigError::Invalid {
                key: "SUPERCHAT_SERVER_TCP_PORT",
                message: v.clone(),
            })?;
        }
        if let Ok(v) = std::env::var("SUPERCHAT_SERVER_SSH_PORT") {
            self.server.ssh_port = v.parse().map_err(|_| ConfigError::Invalid {
                key: "SUPERCHAT_SERVER_SSH_PORT",
                message: v.clone(),
            })?;
        }
        if let Ok(v) = std::env::var("SUPERCHAT_SERVER_WS_PORT") {
            self.server.ws_port = v.parse().map_err(|_| ConfigError::Invalid {
                key: "SUPERCHAT_SERVER_WS_PORT",
                message: v.clone(),
            })?;
        }
        if let Ok(v) = std::env::var("SUPERCHAT_SERVER_DATABASE_PATH") {
            self.server.database_path = v;
        }
        if let Ok(v) = std::env::var("SUPERCHAT_LIMITS_MAX_MESSAGE_LENGTH") {
            self.limits.max_message_length = v.parse().map_err(|_| ConfigError::Invalid {
                key: "SUPERCHAT_LIMITS_MAX_MESSAGE_LENGTH",
                message: v.clone(),
            })?;
        }
        if let Ok(v) = std::env::var("SUPERCHAT_LIMITS_SESSION_TIMEOUT_SECONDS") {
            self.limits.session_timeout_seconds = v.parse().map_err(|_| ConfigError::Invalid {
                key: "SUPERCHAT_LIMITS_SESSION_TIMEOUT_SECONDS",
                message: v.clone(),
            })?;
        }
        if let Ok(v) = std::env::var("SUPERCHAT_DISCOVERY_DIRECTORY_ENABLED") {
            self.discovery.directory_enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("SUPERCHAT_DISCOVERY_PUBLIC_HOSTNAME") {
            self.discovery.public_hostname = Some(v);
        }
        if let Ok(v) = std::env::var("SUPERCHAT_DISCOVERY_DIRECTORY_ADDRESSES") {
            self.discovery.directory_addresses = v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect();
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_message_length == 0 {
            return Err(ConfigError::Invalid {
                key: "limits.max_message_length",
                message: "must be greater than zero".to_owned(),
            });
        }
        if !(1..=8760).contains(&self.retention.default_retention_hours) {
            return Err(ConfigError::Invalid {
                key: "retention.default_retention_hours",
                message: "must be in [1, 8760]".to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn parses_a_partial_toml_document_and_fills_defaults() {
        let raw: RawConfig = toml::from_str(
            r#"
            [server]
            tcp_port = 7777

            [limits]
            max_message_length = 2048
        "#,
        )
        .unwrap();
        let config = Config::from_raw(raw).unwrap();
        assert_eq!(config.server.tcp_port, 7777);
        assert_eq!(config.limits.max_message_length, 2048);
        // Untouched sections keep the built-in defaults.
        assert_eq!(config.retention.default_retention_hours, 168);
    }

    #[test]
    fn rejects_out_of_range_retention() {
        let mut config = Config::default();
        config.retention.default_retention_hours = 0;
        assert!(config.validate().is_err());
    }
}
