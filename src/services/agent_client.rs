use crate::models::{AuthError, AuthResult, Identity, IdentitySource};
use crate::services::agent_protocol::{
    read_frame, write_frame, AgentRequest, AgentResponse, SSH_AGENT_RSA_SHA2_256,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
use std::path::PathBuf;

/// Byte stream to a key agent.
pub trait AgentStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AgentStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Platform capability that opens a channel to the local key agent.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn connect(&self) -> AuthResult<Box<dyn AgentStream>>;

    /// Human-readable endpoint, for logs.
    fn endpoint(&self) -> String;
}

/// Agent reachable over a Unix domain socket.
#[cfg(unix)]
pub struct UnixSocketConnector {
    path: PathBuf,
}

#[cfg(unix)]
impl UnixSocketConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Socket named by `SSH_AUTH_SOCK`.
    pub fn from_env() -> AuthResult<Self> {
        std::env::var("SSH_AUTH_SOCK")
            .map(Self::new)
            .map_err(|_| AuthError::AgentUnavailable {
                reason: "SSH_AUTH_SOCK is not set".to_string(),
            })
    }
}

#[cfg(unix)]
#[async_trait]
impl AgentConnector for UnixSocketConnector {
    async fn connect(&self) -> AuthResult<Box<dyn AgentStream>> {
        let stream = tokio::net::UnixStream::connect(&self.path)
            .await
            .map_err(|e| AuthError::AgentUnavailable {
                reason: format!("{}: {}", self.path.display(), e),
            })?;
        Ok(Box::new(stream))
    }

    fn endpoint(&self) -> String {
        self.path.display().to_string()
    }
}

/// Agent reachable over a Windows named pipe.
#[cfg(windows)]
pub struct NamedPipeConnector {
    name: String,
}

#[cfg(windows)]
impl NamedPipeConnector {
    pub const OPENSSH_PIPE: &'static str = r"\\.\pipe\openssh-ssh-agent";

    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[cfg(windows)]
impl Default for NamedPipeConnector {
    fn default() -> Self {
        Self::new(Self::OPENSSH_PIPE)
    }
}

#[cfg(windows)]
#[async_trait]
impl AgentConnector for NamedPipeConnector {
    async fn connect(&self) -> AuthResult<Box<dyn AgentStream>> {
        let pipe = tokio::net::windows::named_pipe::ClientOptions::new()
            .open(&self.name)
            .map_err(|e| AuthError::AgentUnavailable {
                reason: format!("{}: {}", self.name, e),
            })?;
        Ok(Box::new(pipe))
    }

    fn endpoint(&self) -> String {
        self.name.clone()
    }
}

/// Cancels the agent call in flight, or the next one if none is running.
///
/// Clones share one slot, so a handle taken once keeps working across
/// reconnects. Each cancellation is consumed by the call it aborts.
#[derive(Clone, Default)]
pub struct CancelHandle {
    token: Arc<Mutex<CancellationToken>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.lock().cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.lock().is_cancelled()
    }

    fn token(&self) -> CancellationToken {
        self.token.lock().clone()
    }

    /// Arm a fresh token after a cancellation was delivered.
    fn rearm(&self) {
        let mut token = self.token.lock();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }
}

/// Blocking client for a local key agent.
///
/// Calls block the calling (network) thread on a private current-thread
/// runtime that drives the asynchronous transport. Taking `&mut self` keeps
/// at most one request in flight. The handle from [`cancel_handle`] may be
/// used from any thread to abort the in-flight call.
///
/// Must not be created or dropped from inside an async context.
///
/// [`cancel_handle`]: SshAgentClient::cancel_handle
pub struct SshAgentClient {
    runtime: Runtime,
    connector: Arc<dyn AgentConnector>,
    stream: Option<Box<dyn AgentStream>>,
    cancel: CancelHandle,
    request_timeout: Option<Duration>,
}

impl SshAgentClient {
    pub fn new(connector: Arc<dyn AgentConnector>) -> AuthResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            connector,
            stream: None,
            cancel: CancelHandle::new(),
            request_timeout: None,
        })
    }

    /// Upper bound on one request/response exchange; `None` waits for the
    /// agent or a cancellation.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the channel to the agent.
    pub fn connect(&mut self) -> AuthResult<()> {
        let cancel = self.cancel.token();
        let connector = Arc::clone(&self.connector);
        let result = self.runtime.block_on(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AuthError::OperationCancelled {
                    reason: "agent connect cancelled".to_string(),
                }),
                result = connector.connect() => result,
            }
        });
        if matches!(result, Err(AuthError::OperationCancelled { .. })) {
            self.cancel.rearm();
        }
        let stream = result?;

        log::info!(
            "[agent_client] Connected to agent at {}",
            self.connector.endpoint()
        );
        self.stream = Some(stream);
        Ok(())
    }

    /// Drop the channel; a later call needs `connect` again.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            log::debug!("[agent_client] Agent channel closed");
        }
    }

    /// Snapshot of the identities the agent currently holds.
    pub fn list_identities(&mut self) -> AuthResult<Vec<Identity>> {
        match self.request_reply(&AgentRequest::ListIdentities)? {
            AgentResponse::Identities(list) => {
                log::info!("[agent_client] Agent listed {} identities", list.len());
                Ok(list
                    .into_iter()
                    .map(|entry| Identity::new(entry.key_blob, entry.comment, IdentitySource::Agent))
                    .collect())
            }
            AgentResponse::Failure { reason_code } => {
                // Locked agents answer the list request with a failure
                log::warn!(
                    "[agent_client] Agent refused to list identities (reason {:?}), treating as empty",
                    reason_code
                );
                Ok(Vec::new())
            }
            other => Err(AuthError::protocol(format!(
                "unexpected reply to identity request: {:?}",
                other
            ))),
        }
    }

    /// Ask the agent to sign `data`; RSA keys request `rsa-sha2-256`.
    pub fn sign_data(&mut self, identity: &Identity, data: &[u8]) -> AuthResult<Vec<u8>> {
        let flags = match identity.algorithm().as_deref() {
            Some("ssh-rsa") => SSH_AGENT_RSA_SHA2_256,
            _ => 0,
        };
        self.sign_data_with_flags(identity, data, flags)
    }

    pub fn sign_data_with_flags(
        &mut self,
        identity: &Identity,
        data: &[u8],
        flags: u32,
    ) -> AuthResult<Vec<u8>> {
        let request = AgentRequest::Sign {
            key_blob: identity.public_key_blob().to_vec(),
            data: data.to_vec(),
            flags,
        };

        match self.request_reply(&request)? {
            AgentResponse::Signature(signature) => {
                log::info!(
                    "[agent_client] Agent signed {} bytes with {}",
                    data.len(),
                    identity.fingerprint()
                );
                Ok(signature)
            }
            AgentResponse::Failure { reason_code } => {
                log::warn!(
                    "[agent_client] Agent refused to sign with {}",
                    identity.fingerprint()
                );
                Err(AuthError::AgentRefused { reason_code })
            }
            other => Err(AuthError::protocol(format!(
                "unexpected reply to sign request: {:?}",
                other
            ))),
        }
    }

    /// Send one request frame and wait for exactly one response frame.
    ///
    /// Transport failures, cancellation and timeouts drop the channel since
    /// its framing state is unknown afterwards.
    pub fn request_reply(&mut self, request: &AgentRequest) -> AuthResult<AgentResponse> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| AuthError::AgentUnavailable {
                reason: "not connected".to_string(),
            })?;

        let payload = request.encode();
        let cancel = self.cancel.token();
        let request_timeout = self.request_timeout;

        let result = self.runtime.block_on(async {
            let exchange = async {
                write_frame(&mut **stream, &payload).await?;
                read_frame(&mut **stream).await
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AuthError::OperationCancelled {
                    reason: "agent request cancelled".to_string(),
                }),
                result = with_timeout(request_timeout, exchange) => result,
            }
        });

        match result {
            Ok(frame) => AgentResponse::decode(&frame),
            Err(e) => {
                log::warn!("[agent_client] Agent exchange failed: {}", e);
                self.stream = None;
                if cancel.is_cancelled() {
                    self.cancel.rearm();
                }
                Err(e)
            }
        }
    }
}

async fn with_timeout<F>(limit: Option<Duration>, exchange: F) -> AuthResult<Vec<u8>>
where
    F: std::future::Future<Output = AuthResult<Vec<u8>>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, exchange)
            .await
            .unwrap_or_else(|_| {
                Err(AuthError::OperationCancelled {
                    reason: format!("no agent response within {:?}", limit),
                })
            }),
        None => exchange.await,
    }
}
