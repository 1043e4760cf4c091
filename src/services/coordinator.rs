//! Drives one connection's authentication: host check, identity discovery,
//! then signing, posting every step to the controller's queue.

use crate::models::{
    AuthError, AuthEvent, AuthResult, AuthState, CertificateId, Identity, IdentitySource, Message,
};
use crate::services::agent_client::SshAgentClient;
use crate::services::certificate_store::{CertificateEvent, CertificateSelector, CertificateStore};
use crate::services::known_hosts::{HostDecision, HostKeyPrompt, KnownHostsStore};
use crate::services::message_queue::MessageQueue;
use crate::utils::decode_signature;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};

/// Signature produced for the transport, with the identity that made it.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthOutcome {
    pub identity: Identity,
    pub signature: Vec<u8>,
}

/// Posts a `HostKeyPrompt` event before handing the decision to the UI.
struct AnnouncingPrompt<'a> {
    inner: &'a dyn HostKeyPrompt,
    queue: &'a MessageQueue<Message>,
    connection_id: u64,
}

impl HostKeyPrompt for AnnouncingPrompt<'_> {
    fn on_unknown_host(&self, host: &str, algorithm: &str, fingerprint: &str) -> HostDecision {
        self.queue.push(Message::new(
            self.connection_id,
            AuthEvent::HostKeyPrompt {
                host: host.to_string(),
                algorithm: algorithm.to_string(),
                fingerprint: fingerprint.to_string(),
            },
        ));
        self.inner.on_unknown_host(host, algorithm, fingerprint)
    }
}

pub struct AuthenticationCoordinator {
    connection_id: u64,
    known_hosts: Arc<KnownHostsStore>,
    queue: Arc<MessageQueue<Message>>,
    agent: Option<SshAgentClient>,
    certificates: Option<Arc<CertificateStore>>,
    selector: Option<Box<dyn CertificateSelector + Send>>,
    revocations: Option<broadcast::Receiver<CertificateEvent>>,
    revoked: HashSet<CertificateId>,
    state: AuthState,
}

impl AuthenticationCoordinator {
    pub fn new(
        connection_id: u64,
        known_hosts: Arc<KnownHostsStore>,
        queue: Arc<MessageQueue<Message>>,
    ) -> Self {
        Self {
            connection_id,
            known_hosts,
            queue,
            agent: None,
            certificates: None,
            selector: None,
            revocations: None,
            revoked: HashSet::new(),
            state: AuthState::Idle,
        }
    }

    pub fn with_agent(mut self, agent: SshAgentClient) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Use certificate identities and follow the store's invalidations.
    pub fn with_certificates(mut self, store: Arc<CertificateStore>) -> Self {
        self.revocations = Some(store.subscribe());
        self.certificates = Some(store);
        self
    }

    /// Let the user narrow certificate candidates to one.
    pub fn with_certificate_selector(
        mut self,
        selector: impl CertificateSelector + Send + 'static,
    ) -> Self {
        self.selector = Some(Box::new(selector));
        self
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn queue(&self) -> Arc<MessageQueue<Message>> {
        Arc::clone(&self.queue)
    }

    pub fn agent_mut(&mut self) -> Option<&mut SshAgentClient> {
        self.agent.as_mut()
    }

    /// Run one attempt: verify `host_key` for `host`, then sign `data` with
    /// the first identity that can.
    ///
    /// `host` is the known_hosts name, see [`crate::utils::known_host_name`].
    /// Any failure leaves the coordinator in `Failed`; a host key mismatch is
    /// returned unchanged.
    pub fn authenticate(
        &mut self,
        host: &str,
        algorithm: &str,
        host_key: &[u8],
        data: &[u8],
        prompt: &dyn HostKeyPrompt,
    ) -> AuthResult<AuthOutcome> {
        if self.state != AuthState::Idle {
            self.transition(AuthState::Idle);
        }

        self.transition(AuthState::VerifyingHost);
        if let Err(e) = self.verify_host(host, algorithm, host_key, prompt) {
            return Err(self.fail(e));
        }

        self.transition(AuthState::EnumeratingIdentities);
        let candidates = match self.enumerate() {
            Ok(candidates) => candidates,
            Err(e) => return Err(self.fail(e)),
        };
        self.post(AuthEvent::IdentitiesListed {
            identities: candidates.iter().map(Identity::info).collect(),
        });

        self.transition(AuthState::Signing);
        let mut attempted = 0;
        for identity in candidates {
            attempted += 1;
            match self.sign_with(&identity, data) {
                Ok(signature) => {
                    let signature_algorithm = decode_signature(&signature)
                        .map(|(alg, _)| alg)
                        .unwrap_or_else(|_| "unknown".to_string());
                    log::info!(
                        "[coordinator] #{} signed with {} ({})",
                        self.connection_id,
                        identity.fingerprint(),
                        signature_algorithm
                    );
                    self.post(AuthEvent::SignatureReady {
                        identity: identity.info(),
                        signature_algorithm,
                    });
                    self.transition(AuthState::Succeeded);
                    self.post(AuthEvent::AuthResult {
                        success: true,
                        error: None,
                    });
                    return Ok(AuthOutcome {
                        identity,
                        signature,
                    });
                }
                Err(e @ AuthError::OperationCancelled { .. }) => return Err(self.fail(e)),
                Err(e) => {
                    log::warn!(
                        "[coordinator] #{} identity {} failed: {}",
                        self.connection_id,
                        identity.fingerprint(),
                        e
                    );
                }
            }
        }

        Err(self.fail(AuthError::NoUsableIdentity { attempted }))
    }

    fn verify_host(
        &self,
        host: &str,
        algorithm: &str,
        host_key: &[u8],
        prompt: &dyn HostKeyPrompt,
    ) -> AuthResult<()> {
        let announcing = AnnouncingPrompt {
            inner: prompt,
            queue: &self.queue,
            connection_id: self.connection_id,
        };
        self.known_hosts
            .check_host(host, algorithm, host_key, &announcing)
            .map(|_| ())
    }

    /// Agent identities first, then certificates, each in source order.
    fn enumerate(&mut self) -> AuthResult<Vec<Identity>> {
        let mut candidates = Vec::new();

        if let Some(agent) = self.agent.as_mut() {
            let listed = if agent.is_connected() {
                agent.list_identities()
            } else {
                agent.connect().and_then(|_| agent.list_identities())
            };
            match listed {
                Ok(identities) => candidates.extend(identities),
                Err(e @ AuthError::OperationCancelled { .. }) => return Err(e),
                Err(e) => log::warn!("[coordinator] Skipping agent identities: {}", e),
            }
        }

        if let Some(store) = self.certificates.clone() {
            // The store filters what it has already revoked; only events
            // arriving during this attempt matter from here on
            self.drain_revocations();
            self.revoked.clear();
            match store.enumerate_candidates() {
                Ok(mut certs) => {
                    self.drain_revocations();
                    certs.retain(|identity| !self.is_revoked(identity));
                    if let Some(selector) = self.selector.as_deref() {
                        if !certs.is_empty() {
                            match store.select(&certs, selector) {
                                Ok(index) => certs = vec![certs.swap_remove(index)],
                                Err(e) => {
                                    log::info!("[coordinator] {}", e);
                                    certs.clear();
                                }
                            }
                        }
                    }
                    candidates.extend(certs);
                }
                Err(e) => log::warn!("[coordinator] Skipping certificates: {}", e),
            }
        }

        log::info!(
            "[coordinator] #{} has {} candidate identities",
            self.connection_id,
            candidates.len()
        );
        Ok(candidates)
    }

    fn sign_with(&mut self, identity: &Identity, data: &[u8]) -> AuthResult<Vec<u8>> {
        match identity.source() {
            IdentitySource::Agent => match self.agent.as_mut() {
                Some(agent) => agent.sign_data(identity, data),
                None => Err(AuthError::AgentUnavailable {
                    reason: "no agent configured".to_string(),
                }),
            },
            IdentitySource::Certificate { id } => {
                self.drain_revocations();
                if self.revoked.contains(id) {
                    return Err(AuthError::IdentityRevoked {
                        certificate: id.to_string(),
                    });
                }
                let store = self
                    .certificates
                    .as_ref()
                    .ok_or_else(|| AuthError::ProviderError {
                        message: "no certificate store configured".to_string(),
                    })?;
                store.sign(identity, data)
            }
        }
    }

    fn drain_revocations(&mut self) {
        let Some(receiver) = self.revocations.as_mut() else {
            return;
        };
        loop {
            match receiver.try_recv() {
                Ok(CertificateEvent::Invalidated(id)) => {
                    log::warn!(
                        "[coordinator] #{} dropping revoked certificate {}",
                        self.connection_id,
                        id
                    );
                    self.revoked.insert(id);
                }
                // Missed events are still enforced by the store itself
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    fn is_revoked(&self, identity: &Identity) -> bool {
        identity
            .certificate_id()
            .map(|id| self.revoked.contains(id))
            .unwrap_or(false)
    }

    fn transition(&mut self, to: AuthState) {
        let from = self.state;
        self.state = to;
        log::debug!(
            "[coordinator] #{} {:?} -> {:?}",
            self.connection_id,
            from,
            to
        );
        self.post(AuthEvent::StateChanged { from, to });
    }

    fn fail(&mut self, error: AuthError) -> AuthError {
        if error.is_terminal() {
            log::warn!("[coordinator] #{} {}", self.connection_id, error);
        } else {
            log::info!("[coordinator] #{} failed: {}", self.connection_id, error);
        }
        self.transition(AuthState::Failed);
        self.post(AuthEvent::AuthResult {
            success: false,
            error: Some(error.clone()),
        });
        error
    }

    fn post(&self, event: AuthEvent) {
        self.queue.push(Message::new(self.connection_id, event));
    }
}
