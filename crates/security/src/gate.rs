//! Static auth gate: one shared token plus a session allowlist.

use crate::allowlist::SessionAllowlist;
use chatrelay_config::AuthConfig;
use chatrelay_core::auth::AuthGate;
use chatrelay_core::message::SessionId;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Strip whitespace and an optional `Bearer ` prefix from a presented token.
pub fn normalize_token(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))
        .map(str::trim)
        .unwrap_or(trimmed)
}

/// Checks the caller's token against a configured one.
///
/// The configured token is kept only as a SHA-256 digest; presented tokens
/// are hashed and compared digest to digest without early exit. An empty
/// configured token disables the check.
pub struct StaticAuthGate {
    token_digest: Option<[u8; 32]>,
    allowlist: SessionAllowlist,
}

impl StaticAuthGate {
    pub fn new(token: &str, allowlist: SessionAllowlist) -> Self {
        let token_digest = (!token.is_empty()).then(|| digest(token));
        Self { token_digest, allowlist }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.token, SessionAllowlist::new(&config.allowlist))
    }

    pub fn requires_token(&self) -> bool {
        self.token_digest.is_some()
    }
}

fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

fn digests_match(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl AuthGate for StaticAuthGate {
    fn is_authorized(&self, supplied_token: Option<&str>) -> bool {
        let Some(expected) = &self.token_digest else {
            return true;
        };
        let ok = supplied_token
            .map(normalize_token)
            .is_some_and(|t| digests_match(expected, &digest(t)));
        if !ok {
            debug!("Rejected request with missing or wrong token");
        }
        ok
    }

    fn is_session_allowed(&self, session: &SessionId) -> bool {
        self.allowlist.allows(session)
    }
}
