//! Common test utilities and helpers

#![allow(dead_code)]

use async_trait::async_trait;
use rand::rngs::OsRng;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256, Sha512};
use ssh_auth_core::services::agent_protocol::{
    read_frame, write_frame, AgentIdentity, AgentRequest, AgentResponse, SSH_AGENT_RSA_SHA2_256,
    SSH_AGENT_RSA_SHA2_512,
};
use ssh_auth_core::services::{AgentConnector, AgentStream};
use ssh_auth_core::utils::{encode_signature, write_string};
use ssh_auth_core::AuthResult;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tempfile::TempDir;
use tokio::io::DuplexStream;

/// Create a temporary directory with a mock .ssh structure
pub struct MockSshDir {
    pub temp_dir: TempDir,
    pub ssh_dir: PathBuf,
}

impl MockSshDir {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let ssh_dir = temp_dir.path().join(".ssh");
        std::fs::create_dir_all(&ssh_dir).expect("Failed to create .ssh dir");
        Self { temp_dir, ssh_dir }
    }

    pub fn path(&self) -> &Path {
        &self.ssh_dir
    }

    pub fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.ssh_dir.join(name);
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    pub fn write_known_hosts(&self, content: &str) -> PathBuf {
        self.write_file("known_hosts", content)
    }

    pub fn known_hosts_path(&self) -> PathBuf {
        self.ssh_dir.join("known_hosts")
    }
}

/// Sample known_hosts content for testing
pub const SAMPLE_KNOWN_HOSTS: &str = r#"github.com ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl
gitlab.com ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAfuCHKVTjquxvt6CM6tdG4SLp1Btn/nOeHHE5UOzRdf
[example.com]:2222 ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIBbfLEjxQsxoGSqjKr3fYsL3MzN2fJqXNqjZzjBjwMv9
"#;

/// Fake RSA host key blob; `seed` varies the modulus.
pub fn rsa_host_key(seed: u8) -> Vec<u8> {
    let mut blob = Vec::new();
    write_string(&mut blob, b"ssh-rsa");
    write_string(&mut blob, &[0x01, 0x00, 0x01]);
    let mut modulus = vec![0x00];
    modulus.extend(std::iter::repeat(0x80 | seed).take(256));
    write_string(&mut blob, &modulus);
    blob
}

pub struct RsaFixture {
    pub private: RsaPrivateKey,
    pub blob: Vec<u8>,
}

/// A 2048-bit RSA key, generated once per test binary.
pub fn rsa_fixture() -> &'static RsaFixture {
    static FIXTURE: OnceLock<RsaFixture> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        let private = RsaPrivateKey::new(&mut OsRng, 2048).expect("Failed to generate RSA key");
        let keypair = ssh_key::private::RsaKeypair::try_from(private.clone())
            .expect("Failed to convert RSA key");
        let blob = ssh_key::PrivateKey::from(keypair)
            .public_key()
            .to_bytes()
            .expect("Failed to encode public key");
        RsaFixture { private, blob }
    })
}

/// How the scripted agent answers requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentBehavior {
    Normal,
    /// Reads sign requests but never answers them.
    HangOnSign,
    /// Closes the channel as soon as a request arrives.
    CloseOnRequest,
}

pub struct MockKey {
    pub comment: String,
    pub blob: Vec<u8>,
    pub private: Option<RsaPrivateKey>,
}

/// In-process agent speaking the framed protocol over `tokio::io::duplex`.
pub struct MockAgent {
    keys: Vec<MockKey>,
    behavior: AgentBehavior,
    sign_requests: AtomicUsize,
    connections: AtomicUsize,
}

impl MockAgent {
    pub fn new(behavior: AgentBehavior) -> Self {
        Self {
            keys: Vec::new(),
            behavior,
            sign_requests: AtomicUsize::new(0),
            connections: AtomicUsize::new(0),
        }
    }

    /// Agent holding the fixture key as `test@host`.
    pub fn with_fixture_key(behavior: AgentBehavior) -> Self {
        let fixture = rsa_fixture();
        Self::new(behavior).with_key(MockKey {
            comment: "test@host".to_string(),
            blob: fixture.blob.clone(),
            private: Some(fixture.private.clone()),
        })
    }

    pub fn with_key(mut self, key: MockKey) -> Self {
        self.keys.push(key);
        self
    }

    pub fn sign_requests(&self) -> usize {
        self.sign_requests.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn answer(&self, request: AgentRequest) -> AgentResponse {
        match request {
            AgentRequest::ListIdentities => AgentResponse::Identities(
                self.keys
                    .iter()
                    .map(|key| AgentIdentity {
                        key_blob: key.blob.clone(),
                        comment: key.comment.clone(),
                    })
                    .collect(),
            ),
            AgentRequest::Sign {
                key_blob,
                data,
                flags,
            } => {
                let private = self
                    .keys
                    .iter()
                    .find(|key| key.blob == key_blob)
                    .and_then(|key| key.private.as_ref());
                match private {
                    Some(private) => rsa_sign(private, &data, flags)
                        .map(AgentResponse::Signature)
                        .unwrap_or(AgentResponse::Failure { reason_code: None }),
                    None => AgentResponse::Failure { reason_code: None },
                }
            }
        }
    }

    async fn serve(self: Arc<Self>, mut stream: DuplexStream) {
        loop {
            let Ok(frame) = read_frame(&mut stream).await else {
                return;
            };
            let Ok(request) = AgentRequest::decode(&frame) else {
                return;
            };

            match (self.behavior, &request) {
                (AgentBehavior::CloseOnRequest, _) => return,
                (AgentBehavior::HangOnSign, AgentRequest::Sign { .. }) => {
                    self.sign_requests.fetch_add(1, Ordering::SeqCst);
                    std::future::pending::<()>().await;
                }
                (_, AgentRequest::Sign { .. }) => {
                    self.sign_requests.fetch_add(1, Ordering::SeqCst);
                }
                _ => {}
            }

            let response = self.answer(request);
            if write_frame(&mut stream, &response.encode()).await.is_err() {
                return;
            }
        }
    }
}

fn rsa_sign(private: &RsaPrivateKey, data: &[u8], flags: u32) -> Option<Vec<u8>> {
    if flags & SSH_AGENT_RSA_SHA2_512 != 0 {
        let digest = Sha512::digest(data);
        let sig = private.sign(Pkcs1v15Sign::new::<Sha512>(), &digest).ok()?;
        Some(encode_signature("rsa-sha2-512", &sig))
    } else if flags & SSH_AGENT_RSA_SHA2_256 != 0 {
        let digest = Sha256::digest(data);
        let sig = private.sign(Pkcs1v15Sign::new::<Sha256>(), &digest).ok()?;
        Some(encode_signature("rsa-sha2-256", &sig))
    } else {
        // Legacy SHA-1 signatures are not offered
        None
    }
}

/// Connector handing out a fresh duplex channel to `agent` per connect.
pub struct DuplexConnector {
    pub agent: Arc<MockAgent>,
}

impl DuplexConnector {
    pub fn new(agent: MockAgent) -> Arc<Self> {
        Arc::new(Self {
            agent: Arc::new(agent),
        })
    }
}

#[async_trait]
impl AgentConnector for DuplexConnector {
    async fn connect(&self) -> AuthResult<Box<dyn AgentStream>> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.agent.connections.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(Arc::clone(&self.agent).serve(server));
        Ok(Box::new(client))
    }

    fn endpoint(&self) -> String {
        "duplex".to_string()
    }
}

/// Write an OpenSSH ed25519 key pair named `name` into `dir`.
pub fn write_ed25519_key(dir: &Path, name: &str) -> ssh_key::PrivateKey {
    let mut key = ssh_key::PrivateKey::random(&mut OsRng, ssh_key::Algorithm::Ed25519)
        .expect("Failed to generate Ed25519 key");
    key.set_comment(format!("{}@cert", name));
    std::fs::write(
        dir.join(name),
        key.to_openssh(ssh_key::LineEnding::LF)
            .expect("Failed to encode key")
            .as_bytes(),
    )
    .expect("Failed to write private key");
    std::fs::write(
        dir.join(format!("{}.pub", name)),
        key.public_key().to_openssh().expect("Failed to encode public key"),
    )
    .expect("Failed to write public key");
    key
}
