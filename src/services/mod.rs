pub mod agent_client;
pub mod agent_protocol;
pub mod certificate_store;
pub mod coordinator;
pub mod key_directory;
pub mod known_hosts;
pub mod message_queue;

#[cfg(windows)]
pub use agent_client::NamedPipeConnector;
#[cfg(unix)]
pub use agent_client::UnixSocketConnector;
pub use agent_client::{AgentConnector, AgentStream, CancelHandle, SshAgentClient};
pub use agent_protocol::{AgentIdentity, AgentRequest, AgentResponse};
pub use certificate_store::{
    CertificateEvent, CertificateProvider, CertificateSelector, CertificateStore,
    PlatformCertificate,
};
pub use coordinator::{AuthOutcome, AuthenticationCoordinator};
pub use key_directory::{KeyDirectoryProvider, PinPrompt};
pub use known_hosts::{HostDecision, HostKeyPrompt, HostVerification, KnownHostsStore};
pub use message_queue::MessageQueue;
