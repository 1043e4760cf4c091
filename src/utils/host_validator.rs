use crate::models::{AuthError, AuthResult};

const DEFAULT_SSH_PORT: u16 = 22;

/// Validate a host name before it is written into known_hosts.
///
/// Whitespace or commas would split the line into extra fields, so only
/// host characters are allowed (letters, digits, `.`, `-`, `_`, and the
/// `[`, `]`, `:` used by IPv6 and `[host]:port` forms).
pub fn validate_hostname(hostname: &str) -> AuthResult<()> {
    if hostname.is_empty() {
        return Err(AuthError::InvalidHostname {
            message: "Hostname cannot be empty".to_string(),
        });
    }

    if hostname.len() > 255 {
        return Err(AuthError::InvalidHostname {
            message: "Hostname too long".to_string(),
        });
    }

    let is_valid = hostname.chars().all(|c| {
        c.is_ascii_alphanumeric()
            || c == '.'
            || c == '-'
            || c == '_'
            || c == ':'
            || c == '['
            || c == ']'
    });

    if !is_valid {
        return Err(AuthError::InvalidHostname {
            message: format!("Hostname contains invalid characters: {}", hostname),
        });
    }

    Ok(())
}

/// Name under which a host is pinned: bare for port 22, `[host]:port` otherwise.
pub fn known_host_name(hostname: &str, port: u16) -> String {
    if port == DEFAULT_SSH_PORT {
        hostname.to_lowercase()
    } else {
        format!("[{}]:{}", hostname.to_lowercase(), port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_hostname_valid() {
        assert!(validate_hostname("example.com").is_ok());
        assert!(validate_hostname("192.168.1.1").is_ok());
        assert!(validate_hostname("my-server").is_ok());
        assert!(validate_hostname("[::1]").is_ok());
        assert!(validate_hostname("[example.com]:2222").is_ok());
    }

    #[test]
    fn test_validate_hostname_invalid() {
        assert!(validate_hostname("").is_err());
        assert!(validate_hostname("host; rm -rf /").is_err());
        assert!(validate_hostname("a.com,b.com").is_err());
        assert!(validate_hostname("evil.com ssh-rsa").is_err());
    }

    #[test]
    fn test_known_host_name() {
        assert_eq!(known_host_name("GitHub.com", 22), "github.com");
        assert_eq!(known_host_name("example.com", 2222), "[example.com]:2222");
    }
}
