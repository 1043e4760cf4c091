//! Application-level owner of the shared authentication stores.

use crate::config::AuthConfig;
use crate::models::{AuthResult, Message};
use crate::services::{
    AuthenticationCoordinator, CertificateProvider, CertificateStore, KeyDirectoryProvider,
    KnownHostsStore, MessageQueue, SshAgentClient,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Created once at startup. Holds the single known hosts store and the
/// certificate store, and builds one coordinator per connection.
pub struct AuthContext {
    config: AuthConfig,
    known_hosts_path: PathBuf,
    known_hosts: Arc<KnownHostsStore>,
    certificates: Option<Arc<CertificateStore>>,
    next_connection_id: AtomicU64,
}

impl AuthContext {
    /// Load known hosts and, if enabled, use the key directory as the
    /// certificate store.
    pub fn new(config: AuthConfig) -> AuthResult<Self> {
        let provider: Option<Arc<dyn CertificateProvider>> = if config.use_certificates {
            Some(Arc::new(KeyDirectoryProvider::new(config.key_directory()?)))
        } else {
            None
        };
        Self::build(config, provider)
    }

    /// Like [`new`](Self::new), with a caller-supplied certificate provider.
    pub fn with_certificate_provider(
        config: AuthConfig,
        provider: Arc<dyn CertificateProvider>,
    ) -> AuthResult<Self> {
        Self::build(config, Some(provider))
    }

    fn build(config: AuthConfig, provider: Option<Arc<dyn CertificateProvider>>) -> AuthResult<Self> {
        let known_hosts_path = config.known_hosts_path()?;
        let (known_hosts, warnings) = KnownHostsStore::open(&known_hosts_path)?;
        if !warnings.is_empty() {
            log::warn!(
                "[context] {} malformed known_hosts line(s) skipped",
                warnings.len()
            );
        }

        Ok(Self {
            config,
            known_hosts_path,
            known_hosts: Arc::new(known_hosts),
            certificates: provider.map(|p| Arc::new(CertificateStore::new(p))),
            next_connection_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn known_hosts(&self) -> Arc<KnownHostsStore> {
        Arc::clone(&self.known_hosts)
    }

    pub fn known_hosts_path(&self) -> &Path {
        &self.known_hosts_path
    }

    pub fn certificates(&self) -> Option<Arc<CertificateStore>> {
        self.certificates.clone()
    }

    /// Persist accepted host keys; a no-op when nothing changed.
    pub fn save_known_hosts(&self) -> AuthResult<bool> {
        self.known_hosts.save(&self.known_hosts_path)
    }

    /// Agent client for the configured socket, or `None` when the agent is
    /// disabled or no socket is known.
    ///
    /// Must not be called from inside an async context.
    pub fn agent_client(&self) -> AuthResult<Option<SshAgentClient>> {
        if !self.config.use_agent {
            return Ok(None);
        }
        let Some(socket) = self.config.agent_socket.as_ref() else {
            log::info!("[context] No agent socket configured");
            return Ok(None);
        };

        #[cfg(unix)]
        let connector = Arc::new(crate::services::UnixSocketConnector::new(socket));
        #[cfg(windows)]
        let connector = Arc::new(crate::services::NamedPipeConnector::new(
            socket.to_string_lossy(),
        ));

        let client = SshAgentClient::new(connector)?.with_request_timeout(self.config.request_timeout());
        Ok(Some(client))
    }

    /// Coordinator for a new connection, posting to `queue`.
    ///
    /// Must not be called from inside an async context.
    pub fn coordinator(
        &self,
        queue: Arc<MessageQueue<Message>>,
    ) -> AuthResult<AuthenticationCoordinator> {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let mut coordinator =
            AuthenticationCoordinator::new(connection_id, self.known_hosts(), queue);

        if let Some(agent) = self.agent_client()? {
            coordinator = coordinator.with_agent(agent);
        }
        if let Some(store) = self.certificates() {
            coordinator = coordinator.with_certificates(store);
        }
        Ok(coordinator)
    }
}
