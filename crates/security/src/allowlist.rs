//! Session allowlist.

use chatrelay_core::message::SessionId;
use std::collections::HashSet;

/// Which sessions may chat.
///
/// Rules:
/// - Empty list → allow all
/// - List contains `"*"` → allow all
/// - Otherwise the session id must be listed
#[derive(Debug, Clone, Default)]
pub struct SessionAllowlist {
    entries: HashSet<String>,
}

impl SessionAllowlist {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|e| e.as_ref().trim().to_string())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.entries.is_empty() || self.entries.contains("*")
    }

    pub fn allows(&self, session: &SessionId) -> bool {
        self.is_open() || self.entries.contains(session.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
