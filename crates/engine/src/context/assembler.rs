//! Builds the ordered message list for one completion call.
//!
//! Layout: `[system?] [sticky header?] [history...] [new user message]`.
//! History is bounded by turn count and char budget when it is read; a final
//! global pass then removes messages from index 2 while the whole list is
//! still over `max(char_budget, GLOBAL_FLOOR_CHARS)` and longer than three
//! entries. That pass can remove the sticky header or early history.

use chatrelay_core::message::{Message, SessionId, total_chars};
use chatrelay_memory::{HistoryStore, StickyStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// The global trim never targets less than this many characters.
pub const GLOBAL_FLOOR_CHARS: usize = 2000;

/// Messages the global trim always leaves in place.
const MIN_MESSAGES: usize = 3;

/// Index the global trim removes from.
const TRIM_INDEX: usize = 2;

// ── Types ─────────────────────────────────────────────────────────────────

/// The assembled prompt, ready for a completion call.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub messages: Vec<Message>,
    pub metadata: AssemblyMetadata,
}

/// What the assembler included and dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssemblyMetadata {
    pub total_chars: usize,
    pub has_system: bool,
    pub has_sticky_header: bool,
    /// History turns spliced in before the global trim
    pub history_turns: usize,
    /// Messages removed by the global trim
    pub dropped: usize,
}

// ── Assembler ─────────────────────────────────────────────────────────────

pub struct PromptAssembler {
    sticky: Arc<StickyStore>,
    history: Arc<HistoryStore>,
}

impl PromptAssembler {
    pub fn new(sticky: Arc<StickyStore>, history: Arc<HistoryStore>) -> Self {
        Self { sticky, history }
    }

    pub async fn build(
        &self,
        system_text: &str,
        session: &SessionId,
        new_user_text: &str,
        turns: usize,
        char_budget: usize,
        use_memory: bool,
    ) -> AssembledPrompt {
        let mut messages = Vec::new();
        let mut metadata = AssemblyMetadata::default();

        if !system_text.is_empty() {
            messages.push(Message::system(system_text));
            metadata.has_system = true;
        }

        let header = self.sticky.render(session).await;
        if !header.is_empty() {
            messages.push(Message::user(header));
            metadata.has_sticky_header = true;
        }

        if use_memory {
            let recent = self.history.recent(session, turns, char_budget).await;
            metadata.history_turns = recent.len();
            messages.extend(recent.iter().map(|t| t.to_message()));
        }

        messages.push(Message::user(new_user_text));

        metadata.dropped = enforce_global_budget(&mut messages, char_budget);
        metadata.total_chars = total_chars(&messages);

        debug!(
            session = %session,
            messages = messages.len(),
            chars = metadata.total_chars,
            history = metadata.history_turns,
            dropped = metadata.dropped,
            "Prompt assembled"
        );

        AssembledPrompt { messages, metadata }
    }
}

/// Remove messages at index 2 while the list is over budget and has more
/// than three entries. Returns the number removed.
pub fn enforce_global_budget(messages: &mut Vec<Message>, char_budget: usize) -> usize {
    let limit = char_budget.max(GLOBAL_FLOOR_CHARS);
    let mut total = total_chars(messages);
    let mut dropped = 0;
    while total > limit && messages.len() > MIN_MESSAGES {
        let removed = messages.remove(TRIM_INDEX);
        total -= removed.char_len();
        dropped += 1;
    }
    dropped
}
