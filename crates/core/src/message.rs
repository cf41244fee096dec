//! Session, message and turn domain types.
//!
//! These are the value objects that flow through the bridge:
//! caller text → sticky facts + history turns → assembled `Message` list →
//! completion client → assistant turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session ids longer than this are truncated.
pub const MAX_SESSION_ID_CHARS: usize = 128;

/// Opaque key of a conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Build a session id from raw text, truncating to [`MAX_SESSION_ID_CHARS`].
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().chars().take(MAX_SESSION_ID_CHARS).collect())
    }

    /// Derive the session id for a request.
    ///
    /// The caller-supplied identifier wins when it is non-blank; otherwise the
    /// network origin is used, and `"anon"` when neither is known.
    pub fn derive(supplied: Option<&str>, remote_addr: Option<&str>) -> Self {
        let supplied = supplied.map(str::trim).filter(|s| !s.is_empty());
        let remote = remote_addr.map(str::trim).filter(|s| !s.is_empty());
        Self::new(supplied.or(remote).unwrap_or("anon"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Persona / system instructions
    System,
    /// The end user (also used for the synthetic sticky header)
    User,
    /// The model
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// One entry of the list sent to the completion client.
///
/// Never persisted on its own: it is a read-time projection of a profile,
/// the sticky facts, the history and the new input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }

    /// Length in characters, the unit of every char budget.
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// An immutable record in a session's history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// `User` or `Assistant`
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), timestamp: Utc::now() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }

    pub fn to_message(&self) -> Message {
        Message { role: self.role, content: self.content.clone() }
    }
}

/// Total character length of a message list.
pub fn total_chars(messages: &[Message]) -> usize {
    messages.iter().map(Message::char_len).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_prefers_supplied_id() {
        let sid = SessionId::derive(Some("  avatar-1  "), Some("10.0.0.1"));
        assert_eq!(sid.as_str(), "avatar-1");
    }

    #[test]
    fn derive_falls_back_to_remote_then_anon() {
        assert_eq!(SessionId::derive(Some("   "), Some("1.2.3.4")).as_str(), "1.2.3.4");
        assert_eq!(SessionId::derive(None, None).as_str(), "anon");
    }

    #[test]
    fn long_ids_are_truncated() {
        let sid = SessionId::new("x".repeat(200));
        assert_eq!(sid.as_str().chars().count(), MAX_SESSION_ID_CHARS);
    }

    #[test]
    fn char_len_counts_characters_not_bytes() {
        let msg = Message::user("こんにちは");
        assert_eq!(msg.char_len(), 5);
        assert_eq!(total_chars(&[msg, Message::assistant("ok")]), 7);
    }

    #[test]
    fn role_parses_wire_names() {
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert!("tool".parse::<Role>().is_err());
    }

    #[test]
    fn message_serializes_lowercase_role() {
        let json = serde_json::to_string(&Message::system("be nice")).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"be nice"}"#);
    }
}
