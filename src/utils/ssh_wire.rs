//! SSH wire primitives shared by the agent codec and key parsing.
//!
//! Strings are a big-endian `u32` length followed by that many bytes.

use crate::models::{AuthError, AuthResult};
use base64::Engine;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};

/// Read one length-prefixed string, bounded by what is left in the cursor.
pub fn read_string(cursor: &mut Cursor<&[u8]>) -> AuthResult<Vec<u8>> {
    let len = read_u32(cursor)? as usize;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(AuthError::protocol(format!(
            "string length {} exceeds remaining {} bytes",
            len, remaining
        )));
    }

    let mut buf = vec![0u8; len];
    cursor
        .read_exact(&mut buf)
        .map_err(|e| AuthError::protocol(e.to_string()))?;
    Ok(buf)
}

pub fn read_u32(cursor: &mut Cursor<&[u8]>) -> AuthResult<u32> {
    cursor
        .read_u32::<BigEndian>()
        .map_err(|e| AuthError::protocol(format!("truncated u32: {}", e)))
}

pub fn write_string(buf: &mut Vec<u8>, data: &[u8]) {
    // Writing into a Vec cannot fail
    let _ = buf.write_u32::<BigEndian>(data.len() as u32);
    buf.extend_from_slice(data);
}

pub fn write_u32(buf: &mut Vec<u8>, value: u32) {
    let _ = buf.write_u32::<BigEndian>(value);
}

/// Algorithm name carried as the first string of a key or signature blob.
pub fn blob_algorithm(blob: &[u8]) -> Option<String> {
    let mut cursor = Cursor::new(blob);
    let name = read_string(&mut cursor).ok()?;
    String::from_utf8(name).ok()
}

/// Encode an SSH signature blob: string algorithm, string signature.
pub fn encode_signature(algorithm: &str, signature: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(8 + algorithm.len() + signature.len());
    write_string(&mut blob, algorithm.as_bytes());
    write_string(&mut blob, signature);
    blob
}

/// Split an SSH signature blob into algorithm name and raw signature bytes.
pub fn decode_signature(blob: &[u8]) -> AuthResult<(String, Vec<u8>)> {
    let mut cursor = Cursor::new(blob);
    let algorithm = read_string(&mut cursor)?;
    let signature = read_string(&mut cursor)?;
    let algorithm = String::from_utf8(algorithm)
        .map_err(|_| AuthError::protocol("signature algorithm is not UTF-8"))?;
    Ok((algorithm, signature))
}

/// OpenSSH-style `SHA256:` fingerprint of a public key blob.
pub fn fingerprint_sha256(blob: &[u8]) -> String {
    let hash = Sha256::digest(blob);
    format!(
        "SHA256:{}",
        base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_string_rejects_overlong_length() {
        let data = [0u8, 0, 0, 9, b'a', b'b'];
        let mut cursor = Cursor::new(&data[..]);
        let err = read_string(&mut cursor).unwrap_err();
        assert_eq!(err.error_type(), "AgentProtocolError");
    }

    #[test]
    fn test_blob_algorithm() {
        let mut blob = Vec::new();
        write_string(&mut blob, b"ssh-ed25519");
        write_string(&mut blob, &[7u8; 32]);
        assert_eq!(blob_algorithm(&blob).as_deref(), Some("ssh-ed25519"));
        assert_eq!(blob_algorithm(&[0, 0]), None);
    }

    #[test]
    fn test_signature_blob_layout() {
        let blob = encode_signature("rsa-sha2-256", &[1, 2, 3]);
        assert_eq!(&blob[..4], &[0, 0, 0, 12]);
        let (alg, sig) = decode_signature(&blob).unwrap();
        assert_eq!(alg, "rsa-sha2-256");
        assert_eq!(sig, vec![1, 2, 3]);
    }

    #[test]
    fn test_fingerprint_has_no_padding() {
        let fp = fingerprint_sha256(b"key");
        assert!(fp.starts_with("SHA256:"));
        assert!(!fp.ends_with('='));
        assert_eq!(fp.len(), "SHA256:".len() + 43);
    }
}
