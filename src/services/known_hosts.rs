//! Pinned host keys in the classic `host algorithm base64-key` file format.

use crate::models::{AuthError, AuthResult, HostKeyRecord};
use crate::utils::{blob_algorithm, fingerprint_sha256, validate_hostname};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use std::fs;
use std::io::Write;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Answer to an unknown host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostDecision {
    /// Trust for the lifetime of this store only.
    Accept,
    Reject,
    /// Trust and write to the file on the next save.
    AcceptPermanently,
}

/// Decision boundary for trust-on-first-use; implemented by the UI layer.
pub trait HostKeyPrompt {
    fn on_unknown_host(&self, host: &str, algorithm: &str, fingerprint: &str) -> HostDecision;
}

impl<F> HostKeyPrompt for F
where
    F: Fn(&str, &str, &str) -> HostDecision,
{
    fn on_unknown_host(&self, host: &str, algorithm: &str, fingerprint: &str) -> HostDecision {
        self(host, algorithm, fingerprint)
    }
}

/// Successful outcome of a host check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostVerification {
    /// Key matched a pinned record.
    Trusted,
    /// Host was unknown and the prompt accepted it.
    Added { permanent: bool },
}

#[derive(Debug, Clone)]
enum Line {
    Record {
        record: HostKeyRecord,
        comment: Option<String>,
        persistent: bool,
    },
    /// Comments, hashed entries, markers and unparsable lines, kept as-is.
    Verbatim(String),
}

#[derive(Default)]
struct Inner {
    lines: Vec<Line>,
    dirty: bool,
}

impl Inner {
    // Later lines take precedence over earlier ones naming the same host
    fn find(&self, host: &str, algorithm: &str) -> Option<&HostKeyRecord> {
        self.lines.iter().rev().find_map(|line| match line {
            Line::Record { record, .. } if record.matches(host, algorithm) => Some(record),
            _ => None,
        })
    }

    fn find_mut(&mut self, host: &str, algorithm: &str) -> Option<(&mut HostKeyRecord, &mut bool)> {
        self.lines.iter_mut().rev().find_map(|line| match line {
            Line::Record {
                record, persistent, ..
            } if record.matches(host, algorithm) => Some((record, persistent)),
            _ => None,
        })
    }

    fn render(&self) -> String {
        let mut content = String::new();
        for line in &self.lines {
            match line {
                Line::Record {
                    record,
                    comment,
                    persistent: true,
                } => {
                    content.push_str(&format!(
                        "{} {} {}",
                        record.host,
                        record.algorithm,
                        BASE64.encode(&record.key_blob)
                    ));
                    if let Some(comment) = comment {
                        content.push(' ');
                        content.push_str(comment);
                    }
                    content.push('\n');
                }
                Line::Record { .. } => {}
                Line::Verbatim(text) => {
                    content.push_str(text);
                    content.push('\n');
                }
            }
        }
        content
    }
}

/// In-memory known hosts set, persisted only by an explicit [`save`].
///
/// One instance is shared by the whole application. Every read and write
/// goes through the same mutex, and mutations set a dirty flag that `save`
/// consumes.
///
/// [`save`]: KnownHostsStore::save
#[derive(Default)]
pub struct KnownHostsStore {
    inner: Mutex<Inner>,
}

impl KnownHostsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from `path`, returning it with any malformed-line warnings.
    pub fn open(path: &Path) -> AuthResult<(Self, Vec<AuthError>)> {
        let store = Self::new();
        let warnings = store.load(path)?;
        Ok((store, warnings))
    }

    /// Replace the contents with the records in `path`.
    ///
    /// A missing file yields an empty store. Malformed lines are skipped,
    /// logged and returned as `MalformedKnownHostsEntry` warnings.
    pub fn load(&self, path: &Path) -> AuthResult<Vec<AuthError>> {
        if !path.exists() {
            log::info!(
                "[known_hosts] {} does not exist, starting empty",
                path.display()
            );
            *self.inner.lock() = Inner::default();
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(path).map_err(|e| AuthError::Io {
            message: format!("Failed to read known_hosts: {}", e),
        })?;

        let mut inner = Inner::default();
        let mut warnings = Vec::new();
        let mut record_count = 0;

        for (idx, raw) in content.lines().enumerate() {
            match parse_line(raw) {
                Ok(Some((record, comment))) => {
                    // An exact duplicate replaces the earlier line
                    let duplicate = inner.lines.iter().position(|line| {
                        matches!(line, Line::Record { record: r, .. }
                            if r.host == record.host && r.algorithm == record.algorithm)
                    });
                    match duplicate {
                        Some(pos) => {
                            inner.lines.remove(pos);
                        }
                        None => record_count += 1,
                    }
                    inner.lines.push(Line::Record {
                        record,
                        comment,
                        persistent: true,
                    });
                }
                Ok(None) => inner.lines.push(Line::Verbatim(raw.to_string())),
                Err(reason) => {
                    let warning = AuthError::MalformedKnownHostsEntry {
                        line: idx + 1,
                        reason,
                    };
                    log::warn!("[known_hosts] {}", warning);
                    warnings.push(warning);
                    inner.lines.push(Line::Verbatim(raw.to_string()));
                }
            }
        }

        log::info!(
            "[known_hosts] Loaded {} host key(s) from {}",
            record_count,
            path.display()
        );
        *self.inner.lock() = inner;
        Ok(warnings)
    }

    /// Write the store to `path` if it changed since the last load or save.
    ///
    /// Writes a temporary file in the same directory and renames it over
    /// `path`, so a crash never leaves a truncated file. Returns whether a
    /// write happened.
    pub fn save(&self, path: &Path) -> AuthResult<bool> {
        let mut inner = self.inner.lock();
        if !inner.dirty {
            return Ok(false);
        }

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(inner.render().as_bytes())?;
        tmp.as_file().sync_all()?;

        #[cfg(unix)]
        {
            let perms = fs::Permissions::from_mode(0o644);
            fs::set_permissions(tmp.path(), perms)?;
        }

        tmp.persist(path).map_err(|e| AuthError::Io {
            message: format!("Failed to replace known_hosts: {}", e.error),
        })?;

        inner.dirty = false;
        log::info!("[known_hosts] Saved to {}", path.display());
        Ok(true)
    }

    /// Verify a host key, consulting `prompt` only for unknown hosts.
    ///
    /// A known host presenting a different key fails with `HostKeyMismatch`
    /// and the stored record is left untouched.
    pub fn check_host(
        &self,
        host: &str,
        algorithm: &str,
        key_blob: &[u8],
        prompt: &dyn HostKeyPrompt,
    ) -> AuthResult<HostVerification> {
        ensure_key_algorithm(algorithm, key_blob)?;
        if let Some(verified) = self.compare(host, algorithm, key_blob)? {
            return Ok(verified);
        }
        // Never ask about a name that could not be written back
        validate_hostname(host)?;

        let fingerprint = fingerprint_sha256(key_blob);
        log::info!(
            "[known_hosts] Unknown host {} ({}), fingerprint {}",
            host,
            algorithm,
            fingerprint
        );

        // The prompt may wait on the UI thread, which reads this store,
        // so it runs without the lock held.
        let decision = prompt.on_unknown_host(host, algorithm, &fingerprint);
        let permanent = match decision {
            HostDecision::Reject => {
                log::warn!("[known_hosts] Host key rejected for {}", host);
                return Err(AuthError::HostKeyRejected {
                    host: host.to_string(),
                    algorithm: algorithm.to_string(),
                });
            }
            HostDecision::Accept => false,
            HostDecision::AcceptPermanently => true,
        };

        let mut inner = self.inner.lock();
        // Someone may have pinned this host while the prompt was open
        if let Some(existing) = inner.find(host, algorithm) {
            return if existing.key_blob == key_blob {
                Ok(HostVerification::Trusted)
            } else {
                Err(mismatch(existing, host, key_blob))
            };
        }

        inner.lines.push(Line::Record {
            record: HostKeyRecord {
                host: host.to_string(),
                algorithm: algorithm.to_string(),
                key_blob: key_blob.to_vec(),
            },
            comment: None,
            persistent: permanent,
        });
        inner.dirty = true;
        log::info!(
            "[known_hosts] Added {} ({}){}",
            host,
            algorithm,
            if permanent { "" } else { " for this session" }
        );
        Ok(HostVerification::Added { permanent })
    }

    fn compare(
        &self,
        host: &str,
        algorithm: &str,
        key_blob: &[u8],
    ) -> AuthResult<Option<HostVerification>> {
        let inner = self.inner.lock();
        match inner.find(host, algorithm) {
            Some(record) if record.key_blob == key_blob => {
                log::debug!("[known_hosts] Host key verified for {} ({})", host, algorithm);
                Ok(Some(HostVerification::Trusted))
            }
            Some(record) => {
                let err = mismatch(record, host, key_blob);
                log::warn!("[known_hosts] HOST KEY CHANGED: {}", err);
                Err(err)
            }
            None => Ok(None),
        }
    }

    /// Explicitly overwrite (or insert) the pinned key for a host.
    ///
    /// This is the only path that replaces a mismatching record; callers must
    /// have obtained separate authorization first.
    pub fn replace_host_key(&self, host: &str, algorithm: &str, key_blob: &[u8]) -> AuthResult<()> {
        validate_hostname(host)?;
        ensure_key_algorithm(algorithm, key_blob)?;

        let mut inner = self.inner.lock();
        match inner.find_mut(host, algorithm) {
            Some((record, persistent)) => {
                log::warn!(
                    "[known_hosts] Replacing pinned key for {} ({}): {} -> {}",
                    host,
                    algorithm,
                    record.fingerprint(),
                    fingerprint_sha256(key_blob)
                );
                record.key_blob = key_blob.to_vec();
                *persistent = true;
            }
            None => inner.lines.push(Line::Record {
                record: HostKeyRecord {
                    host: host.to_string(),
                    algorithm: algorithm.to_string(),
                    key_blob: key_blob.to_vec(),
                },
                comment: None,
                persistent: true,
            }),
        }
        inner.dirty = true;
        Ok(())
    }

    /// Remove every record naming `host`; returns how many were removed.
    pub fn remove_host(&self, host: &str) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.lines.len();
        inner.lines.retain(|line| match line {
            Line::Record { record, .. } => !record.names_host(host),
            Line::Verbatim(_) => true,
        });
        let removed = before - inner.lines.len();
        if removed > 0 {
            inner.dirty = true;
            log::info!("[known_hosts] Removed {} entries for {}", removed, host);
        }
        removed
    }

    /// Snapshot of the records `save` writes.
    pub fn records(&self) -> Vec<HostKeyRecord> {
        self.snapshot(true)
    }

    /// Records accepted for this session only; never saved.
    pub fn session_records(&self) -> Vec<HostKeyRecord> {
        self.snapshot(false)
    }

    fn snapshot(&self, persisted: bool) -> Vec<HostKeyRecord> {
        self.inner
            .lock()
            .lines
            .iter()
            .filter_map(|line| match line {
                Line::Record {
                    record, persistent, ..
                } if *persistent == persisted => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn lookup(&self, host: &str, algorithm: &str) -> Option<HostKeyRecord> {
        self.inner.lock().find(host, algorithm).cloned()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }
}

/// The algorithm named inside `key_blob` must be the one it is pinned under,
/// or the saved line would not load again.
fn ensure_key_algorithm(algorithm: &str, key_blob: &[u8]) -> AuthResult<()> {
    match blob_algorithm(key_blob) {
        Some(inner) if inner == algorithm => Ok(()),
        Some(inner) => Err(AuthError::InvalidKeyFormat {
            message: format!("host key is {} but was presented as {}", inner, algorithm),
        }),
        None => Err(AuthError::InvalidKeyFormat {
            message: "host key blob has no algorithm name".to_string(),
        }),
    }
}

fn mismatch(record: &HostKeyRecord, host: &str, key_blob: &[u8]) -> AuthError {
    AuthError::HostKeyMismatch {
        host: host.to_string(),
        algorithm: record.algorithm.clone(),
        expected_fingerprint: record.fingerprint(),
        actual_fingerprint: fingerprint_sha256(key_blob),
    }
}

/// `Ok(None)` for lines kept verbatim, `Err(reason)` for malformed ones.
fn parse_line(raw: &str) -> Result<Option<(HostKeyRecord, Option<String>)>, String> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    // Hashed hostnames and @cert-authority/@revoked markers are not matched,
    // only preserved
    if line.starts_with("|1|") || line.starts_with('@') {
        log::debug!("[known_hosts] Preserving unsupported entry");
        return Ok(None);
    }

    let mut fields = line.split_whitespace();
    let (host, algorithm, encoded) = match (fields.next(), fields.next(), fields.next()) {
        (Some(h), Some(a), Some(k)) => (h, a, k),
        _ => return Err("expected `host algorithm key`".to_string()),
    };
    let comment: Vec<&str> = fields.collect();

    let key_blob = BASE64
        .decode(encoded)
        .map_err(|e| format!("invalid base64 key: {}", e))?;

    match blob_algorithm(&key_blob) {
        Some(inner) if inner == algorithm => {}
        Some(inner) => {
            return Err(format!(
                "key type {} does not match declared {}",
                inner, algorithm
            ))
        }
        None => return Err("key blob has no algorithm name".to_string()),
    }

    Ok(Some((
        HostKeyRecord {
            host: host.to_string(),
            algorithm: algorithm.to_string(),
            key_blob,
        },
        if comment.is_empty() {
            None
        } else {
            Some(comment.join(" "))
        },
    )))
}
