//! # chatrelay engine
//!
//! The session memory and prompt-assembly engine:
//!
//! - [`profile`] resolves the persona (system text + parameter overrides)
//! - [`context`] assembles the bounded message list
//! - [`postprocess`] cleans upstream replies
//! - [`orchestrator`] runs one chat request end to end

pub mod context;
pub mod orchestrator;
pub mod postprocess;
pub mod profile;

pub use context::{AssembledPrompt, AssemblyMetadata, PromptAssembler};
pub use orchestrator::{
    ChatFailure, ChatMeta, ChatOrchestrator, ChatRequest, ChatResponse, ChatSettings, ClearOutcome,
    ReplyMode,
};
pub use postprocess::clean_reply;
pub use profile::{Profile, ProfileChoice, ProfileResolver, ProfileSource, ResolvedProfile};
