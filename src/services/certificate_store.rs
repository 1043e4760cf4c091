//! Platform-held certificates and the signing provider behind them.

use crate::models::{AuthError, AuthResult, CertificateId, Identity, IdentitySource, KeyMaterial};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// One entry as reported by a platform store.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformCertificate {
    pub id: CertificateId,
    pub subject: String,
    pub public_key_blob: Vec<u8>,
    pub has_private_key: bool,
    pub not_after: Option<SystemTime>,
}

impl PlatformCertificate {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.not_after.map(|t| t <= now).unwrap_or(false)
    }

    fn usable(&self, now: SystemTime) -> bool {
        self.has_private_key && !self.is_expired(now)
    }

    pub fn identity(&self) -> Identity {
        Identity::new(
            self.public_key_blob.clone(),
            self.subject.clone(),
            IdentitySource::Certificate {
                id: self.id.clone(),
            },
        )
    }
}

/// Platform capability: list entries and sign with their private keys.
///
/// `sign` may block on user interaction (PIN, biometric) and imposes no
/// timeout of its own. It returns an SSH signature blob.
pub trait CertificateProvider: Send + Sync {
    fn certificates(&self) -> AuthResult<Vec<PlatformCertificate>>;

    fn sign(&self, id: &CertificateId, data: &[u8]) -> AuthResult<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateEvent {
    /// The platform removed or expired the entry.
    Invalidated(CertificateId),
}

/// Selection boundary: pick one candidate by index, or `None` to cancel.
pub trait CertificateSelector {
    fn on_select_certificate(&self, candidates: &[Identity]) -> Option<usize>;
}

impl<F> CertificateSelector for F
where
    F: Fn(&[Identity]) -> Option<usize>,
{
    fn on_select_certificate(&self, candidates: &[Identity]) -> Option<usize> {
        self(candidates)
    }
}

pub struct CertificateStore {
    provider: Arc<dyn CertificateProvider>,
    events: broadcast::Sender<CertificateEvent>,
    known: Mutex<HashMap<CertificateId, PlatformCertificate>>,
    /// Revoked ids with the key they held, `None` when it was never seen.
    revoked: Mutex<HashMap<CertificateId, Option<Vec<u8>>>>,
}

impl CertificateStore {
    pub fn new(provider: Arc<dyn CertificateProvider>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            provider,
            events,
            known: Mutex::new(HashMap::new()),
            revoked: Mutex::new(HashMap::new()),
        }
    }

    /// Receiver for invalidation events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<CertificateEvent> {
        self.events.subscribe()
    }

    /// Entries with a private key that have not expired or been invalidated,
    /// in provider order.
    ///
    /// An invalidated id that comes back with a different key was re-issued
    /// and is offered again.
    pub fn enumerate_candidates(&self) -> AuthResult<Vec<Identity>> {
        let now = SystemTime::now();
        let certificates = self.provider.certificates()?;

        let usable: Vec<PlatformCertificate> = {
            let mut revoked = self.revoked.lock();
            certificates
                .into_iter()
                .filter(|cert| cert.usable(now))
                .filter(|cert| match revoked.get(&cert.id) {
                    None => true,
                    Some(Some(blob)) if *blob != cert.public_key_blob => {
                        log::info!("[certificates] Certificate re-issued: {}", cert.id);
                        revoked.remove(&cert.id);
                        true
                    }
                    Some(_) => false,
                })
                .collect()
        };

        *self.known.lock() = usable
            .iter()
            .map(|cert| (cert.id.clone(), cert.clone()))
            .collect();

        log::info!("[certificates] {} usable candidate(s)", usable.len());
        Ok(usable.iter().map(PlatformCertificate::identity).collect())
    }

    pub fn get_public_key(&self, id: &CertificateId) -> AuthResult<KeyMaterial> {
        self.ensure_not_revoked(id)?;
        let cached = self.known.lock().get(id).map(|cert| cert.public_key_blob.clone());
        let blob = match cached {
            Some(blob) => blob,
            None => self
                .provider
                .certificates()?
                .into_iter()
                .find(|cert| &cert.id == id)
                .map(|cert| cert.public_key_blob)
                .ok_or_else(|| AuthError::ProviderError {
                    message: format!("certificate {} not found", id),
                })?,
        };
        KeyMaterial::from_blob(&blob)
    }

    /// Sign with a certificate-backed identity.
    pub fn sign(&self, identity: &Identity, data: &[u8]) -> AuthResult<Vec<u8>> {
        let id = identity
            .certificate_id()
            .ok_or_else(|| AuthError::ProviderError {
                message: "identity is not backed by a certificate".to_string(),
            })?;
        self.ensure_not_revoked(id)?;

        log::info!("[certificates] Signing with {}", id);
        let signature = self.provider.sign(id, data)?;

        // The entry may have been revoked while the provider was prompting
        self.ensure_not_revoked(id)?;
        Ok(signature)
    }

    /// Mark an entry invalid and notify subscribers.
    ///
    /// The revocation covers the key last enumerated for `id`; if `id` was
    /// never enumerated it covers any key.
    pub fn invalidate(&self, id: &CertificateId) {
        let blob = self.known.lock().remove(id).map(|cert| cert.public_key_blob);
        let newly = {
            let mut revoked = self.revoked.lock();
            let newly = !revoked.contains_key(id);
            if newly {
                revoked.insert(id.clone(), blob);
            }
            newly
        };
        if newly {
            log::warn!("[certificates] Certificate invalidated: {}", id);
            // No subscribers is fine
            let _ = self.events.send(CertificateEvent::Invalidated(id.clone()));
        }
    }

    /// Re-read the provider and invalidate entries that vanished or expired.
    pub fn refresh(&self) -> AuthResult<Vec<CertificateId>> {
        let now = SystemTime::now();
        let current: HashMap<CertificateId, PlatformCertificate> = self
            .provider
            .certificates()?
            .into_iter()
            .map(|cert| (cert.id.clone(), cert))
            .collect();

        let mut gone: Vec<CertificateId> = self
            .known
            .lock()
            .keys()
            .filter(|id| match current.get(*id) {
                Some(cert) => !cert.usable(now),
                None => true,
            })
            .cloned()
            .collect();
        gone.sort();

        for id in &gone {
            self.invalidate(id);
        }
        Ok(gone)
    }

    pub fn is_revoked(&self, id: &CertificateId) -> bool {
        self.revoked.lock().contains_key(id)
    }

    /// Delegate the choice among `candidates` to `selector`.
    pub fn select(
        &self,
        candidates: &[Identity],
        selector: &dyn CertificateSelector,
    ) -> AuthResult<usize> {
        if candidates.is_empty() {
            return Err(AuthError::NoUsableIdentity { attempted: 0 });
        }
        match selector.on_select_certificate(candidates) {
            Some(index) if index < candidates.len() => Ok(index),
            Some(index) => Err(AuthError::OperationCancelled {
                reason: format!("selected index {} out of range", index),
            }),
            None => Err(AuthError::OperationCancelled {
                reason: "certificate selection cancelled".to_string(),
            }),
        }
    }

    fn ensure_not_revoked(&self, id: &CertificateId) -> AuthResult<()> {
        if self.is_revoked(id) {
            return Err(AuthError::IdentityRevoked {
                certificate: id.to_string(),
            });
        }
        Ok(())
    }
}
