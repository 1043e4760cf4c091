use crate::utils::fingerprint_sha256;
use serde::Serialize;

/// A trusted key for one (host, algorithm) pair.
///
/// `host` may be a comma-separated list of names as found in known_hosts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostKeyRecord {
    pub host: String,
    pub algorithm: String,
    pub key_blob: Vec<u8>,
}

impl HostKeyRecord {
    pub fn fingerprint(&self) -> String {
        fingerprint_sha256(&self.key_blob)
    }

    pub fn names_host(&self, host: &str) -> bool {
        self.host.split(',').any(|h| h.eq_ignore_ascii_case(host))
    }

    pub fn matches(&self, host: &str, algorithm: &str) -> bool {
        self.algorithm == algorithm && self.names_host(host)
    }
}
