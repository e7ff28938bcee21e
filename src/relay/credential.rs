//! Bot credentials and their fingerprints.

use super::error::RejectReason;
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 digest of a bot token, lowercase hex.
///
/// Used as the lock key and as the session-store key so the raw token never
/// has to be written to disk or to the logs.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Digest a raw credential
    #[must_use]
    pub fn of(raw: &str) -> Self {
        Self(format!("{:x}", Sha256::digest(raw.as_bytes())))
    }

    /// Full hex digest
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

/// A bot token together with its fingerprint
#[derive(Clone)]
pub struct Credential {
    token: String,
    fingerprint: Fingerprint,
}

impl Credential {
    /// Wrap a raw bot token.
    ///
    /// # Errors
    ///
    /// Returns `RejectReason::MissingField` if the token is blank.
    pub fn new(token: impl Into<String>) -> Result<Self, RejectReason> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(RejectReason::MissingField("bot_token"));
        }
        let fingerprint = Fingerprint::of(&token);
        Ok(Self { token, fingerprint })
    }

    /// Fingerprint of this credential
    #[must_use]
    pub const fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// The raw token. Only the platform adapter should call this.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw";

    #[test]
    fn test_fingerprint_is_deterministic_sha256() {
        let a = Fingerprint::of(TOKEN);
        let b = Fingerprint::of(TOKEN);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, Fingerprint::of("987654321:other"));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            Fingerprint::of("abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_debug_never_leaks_token() {
        let credential = Credential::new(TOKEN).expect("valid token");
        let debug = format!("{credential:?}");
        assert!(!debug.contains(TOKEN));
        assert!(!debug.contains("AAHdq"));
        assert!(debug.contains(credential.fingerprint().short()));
    }

    #[test]
    fn test_blank_token_rejected() {
        assert_eq!(
            Credential::new("   ").err(),
            Some(RejectReason::MissingField("bot_token"))
        );
    }

    #[test]
    fn test_token_is_trimmed() {
        let credential = Credential::new(format!("  {TOKEN}\n")).expect("valid token");
        assert_eq!(credential.expose(), TOKEN);
        assert_eq!(credential.fingerprint(), &Fingerprint::of(TOKEN));
    }
}
