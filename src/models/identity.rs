use crate::models::{AuthError, AuthResult};
use crate::utils::{blob_algorithm, fingerprint_sha256};
use serde::{Deserialize, Serialize};
use ssh_key::PublicKey;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Ed25519,
    Rsa,
    Ecdsa,
    Dsa,
    Unknown,
}

impl From<&str> for KeyType {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "ed25519" | "ssh-ed25519" => KeyType::Ed25519,
            "rsa" | "ssh-rsa" => KeyType::Rsa,
            "ecdsa" | "ecdsa-sha2-nistp256" | "ecdsa-sha2-nistp384" | "ecdsa-sha2-nistp521" => {
                KeyType::Ecdsa
            }
            "dsa" | "ssh-dss" => KeyType::Dsa,
            _ => KeyType::Unknown,
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyType::Ed25519 => write!(f, "ed25519"),
            KeyType::Rsa => write!(f, "rsa"),
            KeyType::Ecdsa => write!(f, "ecdsa"),
            KeyType::Dsa => write!(f, "dsa"),
            KeyType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Stable identifier of an entry in a certificate provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificateId(String);

impl CertificateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CertificateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which holder can sign for an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum IdentitySource {
    Agent,
    Certificate { id: CertificateId },
}

/// A public key plus the holder able to sign with its private half.
///
/// Only valid for the enumeration that produced it: an agent may drop the key
/// and a certificate may be revoked before the identity is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    public_key_blob: Vec<u8>,
    comment: String,
    source: IdentitySource,
}

impl Identity {
    pub fn new(public_key_blob: Vec<u8>, comment: impl Into<String>, source: IdentitySource) -> Self {
        Self {
            public_key_blob,
            comment: comment.into(),
            source,
        }
    }

    pub fn public_key_blob(&self) -> &[u8] {
        &self.public_key_blob
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn source(&self) -> &IdentitySource {
        &self.source
    }

    pub fn certificate_id(&self) -> Option<&CertificateId> {
        match &self.source {
            IdentitySource::Certificate { id } => Some(id),
            IdentitySource::Agent => None,
        }
    }

    /// Key algorithm name, read from the blob without a full parse.
    pub fn algorithm(&self) -> Option<String> {
        blob_algorithm(&self.public_key_blob)
    }

    pub fn key_type(&self) -> KeyType {
        self.algorithm()
            .map(|alg| KeyType::from(alg.as_str()))
            .unwrap_or(KeyType::Unknown)
    }

    pub fn fingerprint(&self) -> String {
        fingerprint_sha256(&self.public_key_blob)
    }

    pub fn key_material(&self) -> AuthResult<KeyMaterial> {
        KeyMaterial::from_blob(&self.public_key_blob)
    }

    /// Bit size from the public key, if the key parses.
    pub fn bit_size(&self) -> Option<u32> {
        let pub_key = PublicKey::from_bytes(&self.public_key_blob).ok()?;
        match pub_key.key_data() {
            ssh_key::public::KeyData::Rsa(rsa) => {
                Some((strip_leading_zeros(rsa.n.as_bytes()).len() * 8) as u32)
            }
            ssh_key::public::KeyData::Ed25519(_) => Some(256),
            ssh_key::public::KeyData::Ecdsa(ecdsa) => match ecdsa.curve() {
                ssh_key::EcdsaCurve::NistP256 => Some(256),
                ssh_key::EcdsaCurve::NistP384 => Some(384),
                ssh_key::EcdsaCurve::NistP521 => Some(521),
            },
            _ => None,
        }
    }

    pub fn info(&self) -> IdentityInfo {
        IdentityInfo {
            bit_size: self.bit_size(),
            fingerprint: self.fingerprint(),
            comment: self.comment.clone(),
            key_type: self.algorithm().unwrap_or_else(|| "unknown".to_string()),
            source: self.source.clone(),
        }
    }
}

/// Display summary of an identity, safe to hand to a UI.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdentityInfo {
    pub bit_size: Option<u32>,
    pub fingerprint: String,
    pub comment: String,
    #[serde(rename = "type")]
    pub key_type: String,
    pub source: IdentitySource,
}

/// Public key material extracted from a key blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    Rsa { exponent: Vec<u8>, modulus: Vec<u8> },
    Ed25519 { public: [u8; 32] },
    /// Recognized algorithm without a dedicated decoding; carries the raw blob.
    Generic { algorithm: String, blob: Vec<u8> },
}

const GENERIC_ALGORITHMS: &[&str] = &[
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
];

impl KeyMaterial {
    pub fn from_blob(blob: &[u8]) -> AuthResult<Self> {
        let algorithm = blob_algorithm(blob).ok_or_else(|| AuthError::InvalidKeyFormat {
            message: "key blob has no algorithm name".to_string(),
        })?;

        match algorithm.as_str() {
            "ssh-rsa" | "ssh-ed25519" => {}
            alg if GENERIC_ALGORITHMS.contains(&alg) => {
                return Ok(KeyMaterial::Generic {
                    algorithm,
                    blob: blob.to_vec(),
                })
            }
            _ => return Err(AuthError::UnsupportedKeyType { algorithm }),
        }

        let pub_key = PublicKey::from_bytes(blob)?;
        match pub_key.key_data() {
            ssh_key::public::KeyData::Rsa(rsa) => Ok(KeyMaterial::Rsa {
                exponent: strip_leading_zeros(rsa.e.as_bytes()).to_vec(),
                modulus: strip_leading_zeros(rsa.n.as_bytes()).to_vec(),
            }),
            ssh_key::public::KeyData::Ed25519(ed) => Ok(KeyMaterial::Ed25519 { public: ed.0 }),
            _ => Err(AuthError::UnsupportedKeyType { algorithm }),
        }
    }
}

// mpint encoding prepends a zero byte when the high bit is set
fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}
