use crate::models::{AuthError, IdentityInfo};
use serde::Serialize;

/// Phase of one connection's authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthState {
    Idle,
    VerifyingHost,
    EnumeratingIdentities,
    Signing,
    Succeeded,
    Failed,
}

impl AuthState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AuthState::Succeeded | AuthState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    StateChanged,
    HostKeyPrompt,
    IdentitiesListed,
    SignatureReady,
    AuthResult,
}

/// Payload posted by the network thread for the controller.
#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum AuthEvent {
    StateChanged {
        from: AuthState,
        to: AuthState,
    },
    #[serde(rename_all = "camelCase")]
    HostKeyPrompt {
        host: String,
        algorithm: String,
        fingerprint: String,
    },
    IdentitiesListed {
        identities: Vec<IdentityInfo>,
    },
    #[serde(rename_all = "camelCase")]
    SignatureReady {
        identity: IdentityInfo,
        signature_algorithm: String,
    },
    AuthResult {
        success: bool,
        error: Option<AuthError>,
    },
}

impl AuthEvent {
    pub fn kind(&self) -> MessageKind {
        match self {
            AuthEvent::StateChanged { .. } => MessageKind::StateChanged,
            AuthEvent::HostKeyPrompt { .. } => MessageKind::HostKeyPrompt,
            AuthEvent::IdentitiesListed { .. } => MessageKind::IdentitiesListed,
            AuthEvent::SignatureReady { .. } => MessageKind::SignatureReady,
            AuthEvent::AuthResult { .. } => MessageKind::AuthResult,
        }
    }
}

/// Event tagged with the connection it belongs to.
///
/// Deliberately not `Clone`: a message moves from producer to queue to
/// consumer exactly once.
#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub connection_id: u64,
    pub event: AuthEvent,
}

impl Message {
    pub fn new(connection_id: u64, event: AuthEvent) -> Self {
        Self {
            connection_id,
            event,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.event.kind()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
