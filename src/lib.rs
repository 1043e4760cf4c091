//! Authentication core for SSH clients: key agent and certificate-backed
//! identities, known hosts verification, and ordered event delivery from the
//! network thread to a controlling thread.

pub mod config;
pub mod context;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AuthConfig;
pub use context::AuthContext;
pub use models::{
    AuthError, AuthEvent, AuthResult, AuthState, CertificateId, HostKeyRecord, Identity,
    IdentityInfo, IdentitySource, KeyMaterial, KeyType, Message, MessageKind,
};
pub use services::{
    AuthOutcome, AuthenticationCoordinator, CancelHandle, CertificateEvent, CertificateProvider,
    CertificateSelector, CertificateStore, HostDecision, HostKeyPrompt, HostVerification,
    KeyDirectoryProvider, KnownHostsStore, MessageQueue, PinPrompt, SshAgentClient,
};
