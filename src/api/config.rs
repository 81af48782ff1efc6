//! Configuration types for Parlor endpoints
//!
//! [`ServerConfig`] and [`ClientConfig`] carry the host/port, dialect and
//! attachment settings for each role. Both can be persisted as JSON.

use crate::error::{ConfigError, Result};
use crate::network::{DEFAULT_BIND_HOST, DEFAULT_HOST, DEFAULT_PORT};
use crate::protocol::Dialect;
use crate::storage::DEFAULT_ATTACHMENT_DIR;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Whether a broadcast is echoed back to the session that sent it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EchoPolicy {
    /// Everyone but the sender receives the message
    #[default]
    ExcludeSender,
    /// The sender receives its own message too
    IncludeSender,
}

/// Server role configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Port to listen on; 0 picks a random free port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Wire dialect spoken with clients
    #[serde(default)]
    pub dialect: Dialect,

    /// Self-echo policy for client broadcasts
    #[serde(default)]
    pub echo_policy: EchoPolicy,

    /// Directory inbound attachments are written to
    #[serde(default = "default_attachment_dir")]
    pub attachment_dir: PathBuf,

    /// Forward received attachments to the other peers
    #[serde(default = "default_relay_attachments")]
    pub relay_attachments: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            port: DEFAULT_PORT,
            dialect: Dialect::default(),
            echo_policy: EchoPolicy::default(),
            attachment_dir: default_attachment_dir(),
            relay_attachments: true,
        }
    }
}

impl ServerConfig {
    /// Address string the listener binds
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// - `bind_host` must not be empty
    /// - `attachment_dir` must not be empty
    pub fn validate(&self) -> Result<()> {
        if self.bind_host.trim().is_empty() {
            return Err(ConfigError::InvalidAddress {
                address: self.bind_address(),
            }
            .into());
        }
        validate_dir(&self.attachment_dir)
    }

    /// Load a config from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Save this config as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(path, self)
    }
}

/// Client role configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server host
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Wire dialect spoken with the server
    #[serde(default)]
    pub dialect: Dialect,

    /// Directory inbound attachments are written to
    #[serde(default = "default_attachment_dir")]
    pub attachment_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_PORT,
            dialect: Dialect::default(),
            attachment_dir: default_attachment_dir(),
        }
    }
}

impl ClientConfig {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// - `host` must not be empty
    /// - `port` must not be 0
    /// - `attachment_dir` must not be empty
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() || self.port == 0 {
            return Err(ConfigError::InvalidAddress {
                address: format!("{}:{}", self.host, self.port),
            }
            .into());
        }
        validate_dir(&self.attachment_dir)
    }

    /// Load a config from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Save this config as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(path, self)
    }
}

fn default_bind_host() -> String {
    DEFAULT_BIND_HOST.to_string()
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_attachment_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ATTACHMENT_DIR)
}

fn default_relay_attachments() -> bool {
    true
}

fn validate_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Err(ConfigError::InvalidPath {
            path: dir.to_path_buf(),
        }
        .into());
    }
    Ok(())
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let load_failed = |reason: String| ConfigError::LoadFailed {
        path: path.to_path_buf(),
        reason,
    };

    let contents = std::fs::read_to_string(path).map_err(|e| load_failed(e.to_string()))?;
    Ok(serde_json::from_str(&contents).map_err(|e| load_failed(e.to_string()))?)
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| ConfigError::LoadFailed {
        path: path.to_path_buf(),
        reason: format!("Failed to serialize config: {}", e),
    })?;
    std::fs::write(path, json)?;
    Ok(())
}
