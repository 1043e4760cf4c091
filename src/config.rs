//! Authentication settings

use crate::models::{AuthError, AuthResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Settings for the shared stores and per-connection agent clients.
///
/// Every field has a default, so an empty JSON object is a valid config.
/// Unset paths resolve against the environment when used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Agent socket or pipe (default: `$SSH_AUTH_SOCK`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_socket: Option<PathBuf>,

    /// Trust store file (default: `~/.ssh/known_hosts`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts_path: Option<PathBuf>,

    /// Per-request agent timeout in seconds, 0 disables it
    #[serde(default = "default_agent_timeout")]
    pub agent_request_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub use_agent: bool,

    #[serde(default = "default_true")]
    pub use_certificates: bool,

    /// Key directory used as the certificate store (default: `~/.ssh`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_directory: Option<PathBuf>,
}

fn default_agent_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            agent_socket: None,
            known_hosts_path: None,
            agent_request_timeout_secs: default_agent_timeout(),
            use_agent: true,
            use_certificates: true,
            key_directory: None,
        }
    }
}

impl AuthConfig {
    /// Defaults with `agent_socket` taken from `SSH_AUTH_SOCK`.
    pub fn from_env() -> Self {
        Self::default().with_env_defaults()
    }

    /// Parse an override document; missing fields take their defaults.
    pub fn from_json(json: &str) -> AuthResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| AuthError::InvalidConfig {
            message: e.to_string(),
        })?;
        Ok(config.with_env_defaults())
    }

    fn with_env_defaults(mut self) -> Self {
        if self.agent_socket.is_none() {
            self.agent_socket = std::env::var_os("SSH_AUTH_SOCK")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from);
        }
        self
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        match self.agent_request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn known_hosts_path(&self) -> AuthResult<PathBuf> {
        match &self.known_hosts_path {
            Some(path) => Ok(path.clone()),
            None => Ok(ssh_dir()?.join("known_hosts")),
        }
    }

    pub fn key_directory(&self) -> AuthResult<PathBuf> {
        match &self.key_directory {
            Some(path) => Ok(path.clone()),
            None => ssh_dir(),
        }
    }
}

fn ssh_dir() -> AuthResult<PathBuf> {
    let home = dirs::home_dir().ok_or(AuthError::HomeDirNotFound)?;
    Ok(home.join(".ssh"))
}
