//! AuthGate trait: the caller-admission predicates.

use crate::message::SessionId;

/// Pure predicates consulted before any session state is touched.
pub trait AuthGate: Send + Sync {
    /// Whether the supplied shared token is acceptable.
    fn is_authorized(&self, supplied_token: Option<&str>) -> bool;

    /// Whether the session may use the bridge at all.
    fn is_session_allowed(&self, session: &SessionId) -> bool;
}

/// A gate that admits everyone. Used when no credentials are configured and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenGate;

impl AuthGate for OpenGate {
    fn is_authorized(&self, _supplied_token: Option<&str>) -> bool {
        true
    }

    fn is_session_allowed(&self, _session: &SessionId) -> bool {
        true
    }
}
