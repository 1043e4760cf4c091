use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    // Agent errors
    #[error("SSH agent unavailable: {reason}")]
    AgentUnavailable { reason: String },

    #[error("SSH agent protocol error: {message}")]
    AgentProtocolError { message: String },

    #[error("SSH agent refused the request{}", reason_suffix(.reason_code))]
    AgentRefused { reason_code: Option<u32> },

    // Key and signing errors
    #[error("Unsupported key type: {algorithm}")]
    UnsupportedKeyType { algorithm: String },

    #[error("Invalid key format: {message}")]
    InvalidKeyFormat { message: String },

    #[error("Signing denied: {reason}")]
    SigningDenied { reason: String },

    #[error("Signing provider error: {message}")]
    ProviderError { message: String },

    #[error("Identity revoked: {certificate}")]
    IdentityRevoked { certificate: String },

    // Host verification errors
    #[error("Host key mismatch for {host} ({algorithm}): expected {expected_fingerprint}, got {actual_fingerprint}")]
    HostKeyMismatch {
        host: String,
        algorithm: String,
        expected_fingerprint: String,
        actual_fingerprint: String,
    },

    #[error("Host key rejected for {host} ({algorithm})")]
    HostKeyRejected { host: String, algorithm: String },

    #[error("Malformed known_hosts entry at line {line}: {reason}")]
    MalformedKnownHostsEntry { line: usize, reason: String },

    #[error("Invalid hostname: {message}")]
    InvalidHostname { message: String },

    // Flow errors
    #[error("Operation cancelled: {reason}")]
    OperationCancelled { reason: String },

    #[error("No identity was able to sign ({attempted} attempted)")]
    NoUsableIdentity { attempted: usize },

    // System errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("IO error: {message}")]
    Io { message: String },

    #[error("Home directory not found")]
    HomeDirNotFound,
}

fn reason_suffix(code: &Option<u32>) -> String {
    match code {
        Some(code) => format!(" (reason code {})", code),
        None => String::new(),
    }
}

impl From<std::io::Error> for AuthError {
    fn from(e: std::io::Error) -> Self {
        AuthError::Io {
            message: e.to_string(),
        }
    }
}

impl From<ssh_key::Error> for AuthError {
    fn from(e: ssh_key::Error) -> Self {
        AuthError::InvalidKeyFormat {
            message: e.to_string(),
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

// Serialized as {type, message} for controllers bridging events to a UI
impl serde::Serialize for AuthError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("AuthError", 2)?;
        state.serialize_field("type", &self.error_type())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

impl AuthError {
    pub fn error_type(&self) -> &'static str {
        match self {
            AuthError::AgentUnavailable { .. } => "AgentUnavailable",
            AuthError::AgentProtocolError { .. } => "AgentProtocolError",
            AuthError::AgentRefused { .. } => "AgentRefused",
            AuthError::UnsupportedKeyType { .. } => "UnsupportedKeyType",
            AuthError::InvalidKeyFormat { .. } => "InvalidKeyFormat",
            AuthError::SigningDenied { .. } => "SigningDenied",
            AuthError::ProviderError { .. } => "ProviderError",
            AuthError::IdentityRevoked { .. } => "IdentityRevoked",
            AuthError::HostKeyMismatch { .. } => "HostKeyMismatch",
            AuthError::HostKeyRejected { .. } => "HostKeyRejected",
            AuthError::MalformedKnownHostsEntry { .. } => "MalformedKnownHostsEntry",
            AuthError::InvalidHostname { .. } => "InvalidHostname",
            AuthError::OperationCancelled { .. } => "OperationCancelled",
            AuthError::NoUsableIdentity { .. } => "NoUsableIdentity",
            AuthError::InvalidConfig { .. } => "InvalidConfig",
            AuthError::Io { .. } => "Io",
            AuthError::HomeDirNotFound => "HomeDirNotFound",
        }
    }

    /// Host verification failures stop the connection and are never retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthError::HostKeyMismatch { .. } | AuthError::HostKeyRejected { .. }
        )
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        AuthError::AgentProtocolError {
            message: message.into(),
        }
    }
}
