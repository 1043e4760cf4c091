//! Certificate provider backed by an OpenSSH key directory.
//!
//! Each `name.pub` file is one entry; it can sign when the private key
//! `name` sits next to it. Encrypted private keys ask a [`PinPrompt`] for the
//! passphrase on every signature.

use crate::models::{AuthError, AuthResult, CertificateId};
use crate::services::certificate_store::{CertificateProvider, PlatformCertificate};
use crate::utils::encode_signature;
use ed25519_dalek::Signer;
use rsa::{BigUint, Pkcs1v15Sign};
use sha2::{Digest, Sha256};
use ssh_key::private::{Ed25519Keypair, KeypairData, RsaKeypair};
use ssh_key::{PrivateKey, PublicKey};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Asks the user for a key passphrase. `None` means the user declined.
pub trait PinPrompt: Send + Sync {
    fn request_pin(&self, id: &CertificateId, comment: &str) -> Option<String>;
}

impl<F> PinPrompt for F
where
    F: Fn(&CertificateId, &str) -> Option<String> + Send + Sync,
{
    fn request_pin(&self, id: &CertificateId, comment: &str) -> Option<String> {
        self(id, comment)
    }
}

pub struct KeyDirectoryProvider {
    dir: PathBuf,
    pin_prompt: Option<Arc<dyn PinPrompt>>,
}

impl KeyDirectoryProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pin_prompt: None,
        }
    }

    pub fn with_pin_prompt(mut self, prompt: Arc<dyn PinPrompt>) -> Self {
        self.pin_prompt = Some(prompt);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_entry(&self, pub_path: &Path) -> Option<PlatformCertificate> {
        let name = pub_path.file_stem()?.to_str()?;
        let content = fs::read_to_string(pub_path).ok()?;
        let public_key = match PublicKey::from_openssh(&content) {
            Ok(key) => key,
            Err(e) => {
                log::warn!(
                    "[key_directory] Skipping {}: {}",
                    pub_path.display(),
                    e
                );
                return None;
            }
        };
        let public_key_blob = public_key.to_bytes().ok()?;

        Some(PlatformCertificate {
            id: CertificateId::new(name),
            subject: public_key.comment().to_string(),
            public_key_blob,
            has_private_key: self.dir.join(name).is_file(),
            not_after: None,
        })
    }

    fn load_private_key(&self, id: &CertificateId) -> AuthResult<PrivateKey> {
        let name = id.as_str();
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return Err(AuthError::ProviderError {
                message: format!("invalid key name: {}", name),
            });
        }

        let path = self.dir.join(name);
        let content = fs::read_to_string(&path).map_err(|e| AuthError::ProviderError {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        let key = PrivateKey::from_openssh(&content)?;
        if !key.is_encrypted() {
            return Ok(key);
        }

        let prompt = self
            .pin_prompt
            .as_ref()
            .ok_or_else(|| AuthError::SigningDenied {
                reason: format!("{} is encrypted and no passphrase prompt is set", name),
            })?;
        let passphrase = prompt
            .request_pin(id, key.comment())
            .ok_or_else(|| AuthError::SigningDenied {
                reason: "passphrase entry cancelled".to_string(),
            })?;

        key.decrypt(passphrase.as_bytes())
            .map_err(|_| AuthError::SigningDenied {
                reason: format!("incorrect passphrase for {}", name),
            })
    }
}

impl CertificateProvider for KeyDirectoryProvider {
    fn certificates(&self) -> AuthResult<Vec<PlatformCertificate>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_pub = path.extension().map(|ext| ext == "pub").unwrap_or(false);
            let is_cert = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with("-cert.pub"))
                .unwrap_or(false);
            if !is_pub || is_cert {
                continue;
            }
            if let Some(cert) = self.read_entry(&path) {
                entries.push(cert);
            }
        }

        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    fn sign(&self, id: &CertificateId, data: &[u8]) -> AuthResult<Vec<u8>> {
        let key = self.load_private_key(id)?;
        match key.key_data() {
            KeypairData::Ed25519(keypair) => Ok(sign_ed25519(keypair, data)),
            KeypairData::Rsa(keypair) => sign_rsa(keypair, data),
            _ => Err(AuthError::UnsupportedKeyType {
                algorithm: key.algorithm().as_str().to_string(),
            }),
        }
    }
}

fn sign_ed25519(keypair: &Ed25519Keypair, data: &[u8]) -> Vec<u8> {
    let signing_key = ed25519_dalek::SigningKey::from_bytes(&keypair.private.to_bytes());
    let signature = signing_key.sign(data);
    encode_signature("ssh-ed25519", &signature.to_bytes())
}

/// PKCS#1 v1.5 over SHA-256, emitted as `rsa-sha2-256`.
fn sign_rsa(keypair: &RsaKeypair, data: &[u8]) -> AuthResult<Vec<u8>> {
    let uint = |m: &ssh_key::Mpint| BigUint::from_bytes_be(m.as_bytes());
    let private = rsa::RsaPrivateKey::from_components(
        uint(&keypair.public.n),
        uint(&keypair.public.e),
        uint(&keypair.private.d),
        vec![uint(&keypair.private.p), uint(&keypair.private.q)],
    )
    .map_err(|e| AuthError::InvalidKeyFormat {
        message: format!("RSA key: {}", e),
    })?;

    let digest = Sha256::digest(data);
    let signature = private
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|e| AuthError::ProviderError {
            message: format!("RSA signing failed: {}", e),
        })?;
    Ok(encode_signature("rsa-sha2-256", &signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::decode_signature;
    use ed25519_dalek::Verifier;
    use rand::rngs::OsRng;
    use ssh_key::{Algorithm, LineEnding};
    use tempfile::TempDir;

    fn write_key(dir: &Path, name: &str, passphrase: Option<&str>) -> PrivateKey {
        let mut key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        key.set_comment(format!("{}@test", name));

        let stored = match passphrase {
            Some(pw) => key.encrypt(&mut OsRng, pw).unwrap(),
            None => key.clone(),
        };
        fs::write(dir.join(name), stored.to_openssh(LineEnding::LF).unwrap().as_bytes()).unwrap();
        fs::write(
            dir.join(format!("{}.pub", name)),
            key.public_key().to_openssh().unwrap(),
        )
        .unwrap();
        key
    }

    fn verify_ed25519(key: &PrivateKey, data: &[u8], blob: &[u8]) {
        let (algorithm, raw) = decode_signature(blob).unwrap();
        assert_eq!(algorithm, "ssh-ed25519");

        let public = key.public_key().key_data().ed25519().unwrap().0;
        let verifying = ed25519_dalek::VerifyingKey::from_bytes(&public).unwrap();
        let signature = ed25519_dalek::Signature::from_slice(&raw).unwrap();
        verifying.verify(data, &signature).unwrap();
    }

    #[test]
    fn test_lists_pairs_and_public_only_entries() {
        let temp = TempDir::new().unwrap();
        write_key(temp.path(), "id_ed25519", None);
        write_key(temp.path(), "orphan", None);
        fs::remove_file(temp.path().join("orphan")).unwrap();
        fs::write(temp.path().join("config"), "Host *\n").unwrap();
        fs::write(temp.path().join("broken.pub"), "not a key").unwrap();

        let provider = KeyDirectoryProvider::new(temp.path());
        let certs = provider.certificates().unwrap();

        assert_eq!(certs.len(), 2);
        assert_eq!(certs[0].id.as_str(), "id_ed25519");
        assert!(certs[0].has_private_key);
        assert_eq!(certs[0].subject, "id_ed25519@test");
        assert_eq!(certs[1].id.as_str(), "orphan");
        assert!(!certs[1].has_private_key);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp = TempDir::new().unwrap();
        let provider = KeyDirectoryProvider::new(temp.path().join("nope"));
        assert!(provider.certificates().unwrap().is_empty());
    }

    #[test]
    fn test_sign_ed25519_verifies() {
        let temp = TempDir::new().unwrap();
        let key = write_key(temp.path(), "id_ed25519", None);

        let provider = KeyDirectoryProvider::new(temp.path());
        let blob = provider
            .sign(&CertificateId::new("id_ed25519"), b"payload")
            .unwrap();
        verify_ed25519(&key, b"payload", &blob);
    }

    #[test]
    fn test_encrypted_key_uses_prompt() {
        let temp = TempDir::new().unwrap();
        let key = write_key(temp.path(), "locked", Some("hunter2"));
        let id = CertificateId::new("locked");

        let without_prompt = KeyDirectoryProvider::new(temp.path());
        assert_eq!(
            without_prompt.sign(&id, b"x").unwrap_err().error_type(),
            "SigningDenied"
        );

        let declined = KeyDirectoryProvider::new(temp.path())
            .with_pin_prompt(Arc::new(|_: &CertificateId, _: &str| -> Option<String> { None }));
        assert_eq!(declined.sign(&id, b"x").unwrap_err().error_type(), "SigningDenied");

        let wrong = KeyDirectoryProvider::new(temp.path())
            .with_pin_prompt(Arc::new(|_: &CertificateId, _: &str| Some("wrong".to_string())));
        assert_eq!(wrong.sign(&id, b"x").unwrap_err().error_type(), "SigningDenied");

        let right = KeyDirectoryProvider::new(temp.path())
            .with_pin_prompt(Arc::new(|_: &CertificateId, _: &str| {
                Some("hunter2".to_string())
            }));
        let blob = right.sign(&id, b"payload").unwrap();
        verify_ed25519(&key, b"payload", &blob);
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let temp = TempDir::new().unwrap();
        let provider = KeyDirectoryProvider::new(temp.path());
        let err = provider
            .sign(&CertificateId::new("../etc/passwd"), b"x")
            .unwrap_err();
        assert_eq!(err.error_type(), "ProviderError");
    }
}
