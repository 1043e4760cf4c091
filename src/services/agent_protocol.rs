//! Length-framed key agent protocol.
//!
//! Every frame is a 4-byte big-endian length followed by the payload; the
//! first payload byte is the opcode. Opcode values and field encodings follow
//! the OpenSSH agent protocol.

use crate::models::{AuthError, AuthResult};
use crate::utils::{read_string, read_u32, write_string, write_u32};
use byteorder::{BigEndian, WriteBytesExt};
use std::io::{Cursor, ErrorKind};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const SSH_AGENT_FAILURE: u8 = 5;
pub const SSH_AGENT_SUCCESS: u8 = 6;
pub const SSH_AGENTC_REQUEST_IDENTITIES: u8 = 11;
pub const SSH_AGENT_IDENTITIES_ANSWER: u8 = 12;
pub const SSH_AGENTC_SIGN_REQUEST: u8 = 13;
pub const SSH_AGENT_SIGN_RESPONSE: u8 = 14;

/// Sign request flags selecting the RSA signature hash.
pub const SSH_AGENT_RSA_SHA2_256: u32 = 2;
pub const SSH_AGENT_RSA_SHA2_512: u32 = 4;

/// Frames above this size are treated as a protocol violation.
pub const MAX_FRAME_LEN: usize = 256 * 1024;

/// Smallest encoding of one identity: two empty strings.
const MIN_IDENTITY_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentRequest {
    ListIdentities,
    Sign {
        key_blob: Vec<u8>,
        data: Vec<u8>,
        flags: u32,
    },
}

impl AgentRequest {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            AgentRequest::ListIdentities => vec![SSH_AGENTC_REQUEST_IDENTITIES],
            AgentRequest::Sign {
                key_blob,
                data,
                flags,
            } => {
                let mut payload = Vec::with_capacity(13 + key_blob.len() + data.len());
                payload.push(SSH_AGENTC_SIGN_REQUEST);
                write_string(&mut payload, key_blob);
                write_string(&mut payload, data);
                write_u32(&mut payload, *flags);
                payload
            }
        }
    }

    /// Agent-side decoding, used by in-process agents.
    pub fn decode(payload: &[u8]) -> AuthResult<Self> {
        let (&opcode, body) = payload
            .split_first()
            .ok_or_else(|| AuthError::protocol("empty request"))?;
        let mut cursor = Cursor::new(body);

        match opcode {
            SSH_AGENTC_REQUEST_IDENTITIES => Ok(AgentRequest::ListIdentities),
            SSH_AGENTC_SIGN_REQUEST => {
                let key_blob = read_string(&mut cursor)?;
                let data = read_string(&mut cursor)?;
                let flags = read_u32(&mut cursor)?;
                Ok(AgentRequest::Sign {
                    key_blob,
                    data,
                    flags,
                })
            }
            other => Err(AuthError::protocol(format!(
                "unexpected request opcode {}",
                other
            ))),
        }
    }
}

/// One `{key blob, comment}` pair from an identities answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub key_blob: Vec<u8>,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentResponse {
    Identities(Vec<AgentIdentity>),
    Signature(Vec<u8>),
    Success,
    Failure { reason_code: Option<u32> },
}

impl AgentResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        match self {
            AgentResponse::Identities(identities) => {
                payload.push(SSH_AGENT_IDENTITIES_ANSWER);
                write_u32(&mut payload, identities.len() as u32);
                for identity in identities {
                    write_string(&mut payload, &identity.key_blob);
                    write_string(&mut payload, identity.comment.as_bytes());
                }
            }
            AgentResponse::Signature(signature) => {
                payload.push(SSH_AGENT_SIGN_RESPONSE);
                write_string(&mut payload, signature);
            }
            AgentResponse::Success => payload.push(SSH_AGENT_SUCCESS),
            AgentResponse::Failure { reason_code } => {
                payload.push(SSH_AGENT_FAILURE);
                if let Some(code) = reason_code {
                    write_u32(&mut payload, *code);
                }
            }
        }
        payload
    }

    pub fn decode(payload: &[u8]) -> AuthResult<Self> {
        let (&opcode, body) = payload
            .split_first()
            .ok_or_else(|| AuthError::protocol("empty response"))?;
        let mut cursor = Cursor::new(body);

        match opcode {
            SSH_AGENT_IDENTITIES_ANSWER => {
                let count = read_u32(&mut cursor)? as usize;
                let remaining = body.len() - cursor.position() as usize;
                if count > remaining / MIN_IDENTITY_LEN {
                    return Err(AuthError::protocol(format!(
                        "identity count {} does not fit in {} bytes",
                        count, remaining
                    )));
                }

                let mut identities = Vec::with_capacity(count);
                for _ in 0..count {
                    let key_blob = read_string(&mut cursor)?;
                    let comment = read_string(&mut cursor)?;
                    identities.push(AgentIdentity {
                        key_blob,
                        comment: String::from_utf8_lossy(&comment).to_string(),
                    });
                }
                Ok(AgentResponse::Identities(identities))
            }
            SSH_AGENT_SIGN_RESPONSE => {
                let signature = read_string(&mut cursor)?;
                if signature.is_empty() {
                    return Err(AuthError::protocol("empty signature"));
                }
                Ok(AgentResponse::Signature(signature))
            }
            SSH_AGENT_SUCCESS => Ok(AgentResponse::Success),
            SSH_AGENT_FAILURE => {
                let reason_code = if body.len() >= 4 {
                    Some(read_u32(&mut cursor)?)
                } else {
                    None
                };
                Ok(AgentResponse::Failure { reason_code })
            }
            other => Err(AuthError::protocol(format!(
                "unexpected response type: {}",
                other
            ))),
        }
    }
}

/// Write one length-prefixed frame.
pub async fn write_frame<W>(stream: &mut W, payload: &[u8]) -> AuthResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(AuthError::protocol(format!(
            "request of {} bytes exceeds frame limit",
            payload.len()
        )));
    }

    let mut msg = Vec::with_capacity(4 + payload.len());
    WriteBytesExt::write_u32::<BigEndian>(&mut msg, payload.len() as u32)?;
    msg.extend_from_slice(payload);

    stream.write_all(&msg).await.map_err(channel_error)?;
    stream.flush().await.map_err(channel_error)?;
    Ok(())
}

/// Read exactly one length-prefixed frame.
pub async fn read_frame<R>(stream: &mut R) -> AuthResult<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(channel_error)?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(AuthError::protocol("empty frame"));
    }
    if len > MAX_FRAME_LEN {
        return Err(AuthError::protocol(format!(
            "frame length {} exceeds limit of {} bytes",
            len, MAX_FRAME_LEN
        )));
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.map_err(channel_error)?;
    Ok(payload)
}

/// A peer closing the channel cancels the exchange; anything else is IO.
fn channel_error(e: std::io::Error) -> AuthError {
    match e.kind() {
        ErrorKind::UnexpectedEof
        | ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted => AuthError::OperationCancelled {
            reason: format!("agent channel closed: {}", e),
        },
        _ => AuthError::Io {
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_request_is_single_opcode() {
        assert_eq!(AgentRequest::ListIdentities.encode(), vec![11]);
    }

    #[test]
    fn test_sign_request_layout() {
        let request = AgentRequest::Sign {
            key_blob: vec![0xAA],
            data: b"hi".to_vec(),
            flags: SSH_AGENT_RSA_SHA2_256,
        };
        let payload = request.encode();
        assert_eq!(
            payload,
            vec![13, 0, 0, 0, 1, 0xAA, 0, 0, 0, 2, b'h', b'i', 0, 0, 0, 2]
        );
        assert_eq!(AgentRequest::decode(&payload).unwrap(), request);
    }

    #[test]
    fn test_decode_zero_identities() {
        let payload = [SSH_AGENT_IDENTITIES_ANSWER, 0, 0, 0, 0];
        assert_eq!(
            AgentResponse::decode(&payload).unwrap(),
            AgentResponse::Identities(Vec::new())
        );
    }

    #[test]
    fn test_decode_rejects_inflated_identity_count() {
        let payload = [SSH_AGENT_IDENTITIES_ANSWER, 0xFF, 0xFF, 0xFF, 0xFF];
        let err = AgentResponse::decode(&payload).unwrap_err();
        assert_eq!(err.error_type(), "AgentProtocolError");
    }

    #[test]
    fn test_decode_truncated_signature() {
        let payload = [SSH_AGENT_SIGN_RESPONSE, 0, 0, 0, 10, 1, 2];
        let err = AgentResponse::decode(&payload).unwrap_err();
        assert_eq!(err.error_type(), "AgentProtocolError");
    }

    #[test]
    fn test_decode_failure_with_and_without_reason() {
        assert_eq!(
            AgentResponse::decode(&[SSH_AGENT_FAILURE]).unwrap(),
            AgentResponse::Failure { reason_code: None }
        );
        assert_eq!(
            AgentResponse::decode(&[SSH_AGENT_FAILURE, 0, 0, 0, 3]).unwrap(),
            AgentResponse::Failure {
                reason_code: Some(3)
            }
        );
    }

    #[test]
    fn test_decode_unknown_opcode() {
        let err = AgentResponse::decode(&[99]).unwrap_err();
        assert!(err.to_string().contains("unexpected response type: 99"));
    }

    #[tokio::test]
    async fn test_frame_roundtrip_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut client, &[SSH_AGENTC_REQUEST_IDENTITIES])
            .await
            .unwrap();
        let frame = read_frame(&mut server).await.unwrap();
        assert_eq!(frame, vec![SSH_AGENTC_REQUEST_IDENTITIES]);
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_length() {
        let data = ((MAX_FRAME_LEN as u32) + 1).to_be_bytes();
        let mut reader = &data[..];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert_eq!(err.error_type(), "AgentProtocolError");
    }

    #[tokio::test]
    async fn test_read_frame_on_closed_channel_is_cancelled() {
        let (mut client, server) = tokio::io::duplex(64);
        drop(server);
        let err = read_frame(&mut client).await.unwrap_err();
        assert_eq!(err.error_type(), "OperationCancelled");
    }
}
