//! The per-request chat flow.
//!
//! ```text
//! received → authorized → sticky updated → profile resolved
//!          → messages assembled → user turn stored → upstream called
//!          → assistant turn stored → responded
//! ```
//!
//! Terminal failures: `Disabled`, `Unauthorized`, `Forbidden`, `EmptyInput`,
//! `Upstream`. Everything before the sticky update is side-effect free, so
//! rejected requests leave no trace in session memory. The user turn is
//! stored before the upstream call and stays there if the call fails.

use crate::context::{AssemblyMetadata, PromptAssembler};
use crate::postprocess::clean_reply;
use crate::profile::ProfileResolver;
use chatrelay_config::AppConfig;
use chatrelay_core::auth::AuthGate;
use chatrelay_core::completion::CompletionClient;
use chatrelay_core::generation::GenerationParams;
use chatrelay_core::message::{Role, SessionId, Turn};
use chatrelay_memory::{HistoryStore, StickyStore};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Speaker names longer than this are cut.
const MAX_SPEAKER_CHARS: usize = 64;

/// One inbound chat call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub session_id: SessionId,
    pub message: String,
    /// Display name used by the echo fallback
    pub speaker: Option<String>,
    pub token: Option<String>,
    pub profile: Option<String>,
    pub use_memory: bool,
    pub use_system: bool,
    pub memory_turns: Option<usize>,
}

impl ChatRequest {
    pub fn new(session_id: SessionId, message: impl Into<String>) -> Self {
        Self {
            session_id,
            message: message.into(),
            speaker: None,
            token: None,
            profile: None,
            use_memory: true,
            use_system: true,
            memory_turns: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyMode {
    Upstream,
    Echo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMeta {
    pub mode: ReplyMode,
    pub session_id: String,
    pub upstream_error: Option<String>,
    pub profile_used: String,
    pub memory_turns: usize,
    pub used_memory: bool,
    pub assembly: AssemblyMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub meta: ChatMeta,
}

/// Caller-visible failures of a chat call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatFailure {
    #[error("bridge is disabled")]
    Disabled,

    #[error("missing or invalid token")]
    Unauthorized,

    #[error("session is not allowlisted")]
    Forbidden,

    #[error("message is empty")]
    EmptyInput,

    #[error("upstream failed: {detail}")]
    Upstream { detail: String },
}

impl ChatFailure {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Disabled => "bridge_disabled",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::EmptyInput => "empty_message",
            Self::Upstream { .. } => "upstream_failed",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::Disabled | Self::Forbidden => 403,
            Self::Unauthorized => 401,
            Self::EmptyInput => 400,
            Self::Upstream { .. } => 502,
        }
    }
}

/// Numeric knobs of the chat flow.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub default_turns: usize,
    pub char_budget: usize,
    pub max_reply_chars: usize,
    pub fallback_echo: bool,
    pub generation: GenerationParams,
}

impl ChatSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_turns: config.memory.turns,
            char_budget: config.memory.max_chars,
            max_reply_chars: config.max_reply_chars,
            fallback_echo: config.fallback_echo,
            generation: config.generation_defaults(),
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// What `/memory/clear` removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClearOutcome {
    /// Durable history rows removed (0 without persistence)
    pub removed: usize,
    pub facts_removed: usize,
}

pub struct ChatOrchestrator {
    enabled: AtomicBool,
    auth: Arc<dyn AuthGate>,
    client: Arc<dyn CompletionClient>,
    sticky: Arc<StickyStore>,
    history: Arc<HistoryStore>,
    profiles: ProfileResolver,
    assembler: PromptAssembler,
    settings: ChatSettings,
}

impl ChatOrchestrator {
    pub fn new(
        auth: Arc<dyn AuthGate>,
        client: Arc<dyn CompletionClient>,
        sticky: Arc<StickyStore>,
        history: Arc<HistoryStore>,
        profiles: ProfileResolver,
        settings: ChatSettings,
    ) -> Self {
        let assembler = PromptAssembler::new(sticky.clone(), history.clone());
        Self {
            enabled: AtomicBool::new(true),
            auth,
            client,
            sticky,
            history,
            profiles,
            assembler,
            settings,
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_authorized(&self, token: Option<&str>) -> bool {
        self.auth.is_authorized(token)
    }

    pub fn sticky(&self) -> &Arc<StickyStore> {
        &self.sticky
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn profiles(&self) -> &ProfileResolver {
        &self.profiles
    }

    pub fn client(&self) -> &Arc<dyn CompletionClient> {
        &self.client
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Run one chat call to completion.
    pub async fn handle(&self, request: ChatRequest) -> Result<ChatResponse, ChatFailure> {
        if !self.is_enabled() {
            return Err(ChatFailure::Disabled);
        }
        if !self.auth.is_authorized(request.token.as_deref()) {
            return Err(ChatFailure::Unauthorized);
        }
        let session = &request.session_id;
        if !self.auth.is_session_allowed(session) {
            return Err(ChatFailure::Forbidden);
        }
        let raw = request.message.trim();
        if raw.is_empty() {
            return Err(ChatFailure::EmptyInput);
        }

        let cleaned = self.sticky.update(session, raw).await;

        let resolved = self
            .profiles
            .resolve(request.profile.as_deref(), !request.use_system);
        let turns = resolved
            .overrides
            .memory_turns
            .or(request.memory_turns)
            .unwrap_or(self.settings.default_turns)
            .max(1);
        let params = self.settings.generation.clone().with_overrides(&resolved.overrides);

        let prompt = self
            .assembler
            .build(
                &resolved.system_text,
                session,
                &cleaned,
                turns,
                self.settings.char_budget,
                request.use_memory,
            )
            .await;

        self.history.append(session, Role::User, &cleaned, turns).await;

        debug!(
            session = %session,
            profile = %resolved.choice.label(),
            turns,
            client = %self.client.name(),
            "Calling upstream"
        );

        let mut meta = ChatMeta {
            mode: ReplyMode::Upstream,
            session_id: session.to_string(),
            upstream_error: None,
            profile_used: resolved.choice.label().to_string(),
            memory_turns: turns,
            used_memory: request.use_memory,
            assembly: prompt.metadata,
        };

        match self.client.complete(&prompt.messages, &params).await {
            Ok(raw_reply) => {
                let reply = clean_reply(&raw_reply, self.settings.max_reply_chars);
                self.history.append(session, Role::Assistant, &reply, turns).await;
                info!(session = %session, chars = reply.chars().count(), "Chat answered");
                Ok(ChatResponse { reply, meta })
            }
            Err(e) => {
                warn!(session = %session, category = e.category(), error = %e, "Upstream call failed");
                if !self.settings.fallback_echo {
                    return Err(ChatFailure::Upstream { detail: e.to_string() });
                }
                let reply = clean_reply(
                    &echo_reply(request.speaker.as_deref(), &cleaned),
                    self.settings.max_reply_chars,
                );
                meta.mode = ReplyMode::Echo;
                meta.upstream_error = Some(e.to_string());
                Ok(ChatResponse { reply, meta })
            }
        }
    }

    /// Recent history for export, bounded by the configured char budget.
    pub async fn export(&self, session: &SessionId, turns: Option<usize>) -> Vec<Turn> {
        let turns = turns.unwrap_or(self.settings.default_turns).max(1);
        self.history.recent(session, turns, self.settings.char_budget).await
    }

    /// Forget a session's history and sticky facts.
    pub async fn clear_session(&self, session: &SessionId) -> ClearOutcome {
        let removed = self.history.clear(session).await;
        let facts_removed = self.sticky.clear(session).await;
        info!(session = %session, removed, facts_removed, "Session memory cleared");
        ClearOutcome { removed, facts_removed }
    }
}

fn echo_reply(speaker: Option<&str>, text: &str) -> String {
    match speaker.map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) => {
            let name: String = name.chars().take(MAX_SPEAKER_CHARS).collect();
            format!("[ECHO] {name}: {text}")
        }
        None => format!("[ECHO] {text}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatrelay_core::auth::OpenGate;
    use chatrelay_core::error::CompletionError;
    use chatrelay_core::message::Message;
    use chatrelay_memory::NoopStore;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Returns scripted replies and records what it was sent.
    struct ScriptedClient {
        replies: Mutex<Vec<Result<String, CompletionError>>>,
        seen: Mutex<Vec<(Vec<Message>, GenerationParams)>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<String, CompletionError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(Vec<Message>, GenerationParams)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            messages: &[Message],
            params: &GenerationParams,
        ) -> Result<String, CompletionError> {
            self.seen.lock().unwrap().push((messages.to_vec(), params.clone()));
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Ok("ok".into())
            } else {
                replies.remove(0)
            }
        }
    }

    struct DenyAll;

    impl AuthGate for DenyAll {
        fn is_authorized(&self, _token: Option<&str>) -> bool {
            false
        }
        fn is_session_allowed(&self, _session: &SessionId) -> bool {
            false
        }
    }

    struct TokenOnly;

    impl AuthGate for TokenOnly {
        fn is_authorized(&self, _token: Option<&str>) -> bool {
            true
        }
        fn is_session_allowed(&self, session: &SessionId) -> bool {
            session.as_str() == "allowed"
        }
    }

    fn orchestrator_with(
        auth: Arc<dyn AuthGate>,
        client: Arc<dyn CompletionClient>,
        profiles: ProfileResolver,
        settings: ChatSettings,
    ) -> ChatOrchestrator {
        ChatOrchestrator::new(
            auth,
            client,
            Arc::new(StickyStore::new(Arc::new(NoopStore), 0)),
            Arc::new(HistoryStore::new(Arc::new(NoopStore), settings.char_budget)),
            profiles,
            settings,
        )
    }

    fn orchestrator(client: Arc<dyn CompletionClient>) -> ChatOrchestrator {
        orchestrator_with(Arc::new(OpenGate), client, ProfileResolver::default(), ChatSettings::default())
    }

    #[tokio::test]
    async fn successful_chat_stores_both_turns() {
        let client = ScriptedClient::new(vec![Ok("Hello!</s>".into())]);
        let orch = orchestrator(client.clone());
        let sid = SessionId::from("s");

        let response = orch.handle(ChatRequest::new(sid.clone(), "  hi  ")).await.unwrap();
        assert_eq!(response.reply, "Hello!");
        assert_eq!(response.meta.mode, ReplyMode::Upstream);
        assert_eq!(response.meta.memory_turns, 8);

        let history = orch.history().snapshot(&sid).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hi");
        assert_eq!(history[1].content, "Hello!");
    }

    #[tokio::test]
    async fn directives_are_stripped_before_storage_and_upstream() {
        let client = ScriptedClient::new(vec![]);
        let orch = orchestrator(client.clone());
        let sid = SessionId::from("s");

        orch.handle(ChatRequest::new(sid.clone(), "[[remember: mood=happy]] hi"))
            .await
            .unwrap();

        let (messages, _) = client.calls().remove(0);
        assert_eq!(messages[0].content, "STATE: mood=happy");
        assert_eq!(messages.last().unwrap().content, "hi");
        assert!(messages.iter().all(|m| !m.content.contains("[[")));
        assert_eq!(orch.history().snapshot(&sid).await[0].content, "hi");
    }

    #[tokio::test]
    async fn disabled_short_circuits_everything() {
        let orch = orchestrator_with(
            Arc::new(DenyAll),
            ScriptedClient::new(vec![]),
            ProfileResolver::default(),
            ChatSettings::default(),
        );
        orch.set_enabled(false);
        let err = orch.handle(ChatRequest::new(SessionId::from("s"), "")).await.unwrap_err();
        assert_eq!(err, ChatFailure::Disabled);
        assert_eq!(err.http_status(), 403);
    }

    #[tokio::test]
    async fn auth_failure_has_no_side_effects() {
        let client = ScriptedClient::new(vec![]);
        let orch = orchestrator_with(
            Arc::new(DenyAll),
            client.clone(),
            ProfileResolver::default(),
            ChatSettings::default(),
        );
        let sid = SessionId::from("s");
        let err = orch
            .handle(ChatRequest::new(sid.clone(), "[[remember: k=v]] hi"))
            .await
            .unwrap_err();
        assert_eq!(err, ChatFailure::Unauthorized);
        assert_eq!(err.code(), "unauthorized");
        assert!(orch.sticky().facts(&sid).await.is_empty());
        assert!(orch.history().snapshot(&sid).await.is_empty());
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn non_allowlisted_session_is_forbidden() {
        let orch = orchestrator_with(
            Arc::new(TokenOnly),
            ScriptedClient::new(vec![]),
            ProfileResolver::default(),
            ChatSettings::default(),
        );
        let sid = SessionId::from("stranger");
        let err = orch
            .handle(ChatRequest::new(sid.clone(), "[[remember: k=v]] hi"))
            .await
            .unwrap_err();
        assert_eq!(err, ChatFailure::Forbidden);
        assert!(orch.sticky().facts(&sid).await.is_empty());

        assert!(orch.handle(ChatRequest::new(SessionId::from("allowed"), "hi")).await.is_ok());
    }

    #[tokio::test]
    async fn blank_message_is_empty_input() {
        let orch = orchestrator(ScriptedClient::new(vec![]));
        let err = orch
            .handle(ChatRequest::new(SessionId::from("s"), "   \n "))
            .await
            .unwrap_err();
        assert_eq!(err, ChatFailure::EmptyInput);
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn upstream_failure_keeps_user_turn_only() {
        let client = ScriptedClient::new(vec![Err(CompletionError::Timeout("25s".into()))]);
        let orch = orchestrator(client);
        let sid = SessionId::from("s");

        let err = orch.handle(ChatRequest::new(sid.clone(), "hello?")).await.unwrap_err();
        assert!(matches!(err, ChatFailure::Upstream { .. }));
        assert_eq!(err.code(), "upstream_failed");

        let recent = orch.history().recent(&sid, 8, 3500).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].role, Role::User);
    }

    #[tokio::test]
    async fn echo_fallback_answers_without_assistant_turn() {
        let settings = ChatSettings { fallback_echo: true, ..ChatSettings::default() };
        let client = ScriptedClient::new(vec![Err(CompletionError::Network("refused".into()))]);
        let orch = orchestrator_with(Arc::new(OpenGate), client, ProfileResolver::default(), settings);
        let sid = SessionId::from("s");

        let response = orch
            .handle(ChatRequest::new(sid.clone(), "ping").with_speaker("Soji"))
            .await
            .unwrap();
        assert_eq!(response.reply, "[ECHO] Soji: ping");
        assert_eq!(response.meta.mode, ReplyMode::Echo);
        assert!(response.meta.upstream_error.unwrap().contains("refused"));
        assert_eq!(orch.history().snapshot(&sid).await.len(), 1);
    }

    #[tokio::test]
    async fn profile_overrides_flow_into_params_and_turns() {
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_value(json!({
            "soji": {
                "system": "You are Soji.",
                "parameters": {"temperature": 0.5, "max_tokens": 64},
                "memory": {"turns": 2}
            }
        }))
        .unwrap();
        let client = ScriptedClient::new(vec![]);
        let orch = orchestrator_with(
            Arc::new(OpenGate),
            client.clone(),
            ProfileResolver::new(&raw, "", ""),
            ChatSettings::default(),
        );

        let mut request = ChatRequest::new(SessionId::from("s"), "hi").with_profile("soji");
        request.memory_turns = Some(6);
        let response = orch.handle(request).await.unwrap();
        assert_eq!(response.meta.memory_turns, 2);
        assert_eq!(response.meta.profile_used, "soji");

        let (messages, params) = client.calls().remove(0);
        assert_eq!(messages[0], Message::system("You are Soji."));
        assert!((params.temperature - 0.5).abs() < f32::EPSILON);
        assert_eq!(params.max_tokens, 64);
        assert!((params.repetition_penalty - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn kill_switch_drops_system_and_overrides() {
        let raw: BTreeMap<String, serde_json::Value> =
            serde_json::from_value(json!({"soji": {"system": "S", "parameters": {"temperature": 0.5}}})).unwrap();
        let client = ScriptedClient::new(vec![]);
        let orch = orchestrator_with(
            Arc::new(OpenGate),
            client.clone(),
            ProfileResolver::new(&raw, "soji", ""),
            ChatSettings::default(),
        );

        let mut request = ChatRequest::new(SessionId::from("s"), "hi").with_profile("soji");
        request.use_system = false;
        orch.handle(request).await.unwrap();

        let (messages, params) = client.calls().remove(0);
        assert!(messages.iter().all(|m| m.role != Role::System));
        assert!((params.temperature - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn request_turns_apply_without_profile_override() {
        let orch = orchestrator(ScriptedClient::new(vec![]));
        let mut request = ChatRequest::new(SessionId::from("s"), "hi");
        request.memory_turns = Some(0);
        let response = orch.handle(request).await.unwrap();
        assert_eq!(response.meta.memory_turns, 1);
    }

    #[tokio::test]
    async fn oversized_request_turns_are_handled() {
        let orch = orchestrator(ScriptedClient::new(vec![]));
        let sid = SessionId::from("s");
        for text in ["one", "two"] {
            let mut request = ChatRequest::new(sid.clone(), text);
            request.memory_turns = Some(usize::MAX);
            let response = orch.handle(request).await.unwrap();
            assert_eq!(response.meta.memory_turns, usize::MAX);
        }
        assert_eq!(orch.export(&sid, Some(usize::MAX)).await.len(), 4);
    }

    #[tokio::test]
    async fn clear_session_forgets_history_and_facts() {
        let orch = orchestrator(ScriptedClient::new(vec![]));
        let sid = SessionId::from("s");
        orch.handle(ChatRequest::new(sid.clone(), "[[state: a=1]] hi")).await.unwrap();

        let outcome = orch.clear_session(&sid).await;
        assert_eq!(outcome, ClearOutcome { removed: 0, facts_removed: 1 });
        assert!(orch.export(&sid, None).await.is_empty());
        assert_eq!(orch.sticky().render(&sid).await, "");
    }

    #[test]
    fn echo_reply_formats() {
        assert_eq!(echo_reply(None, "hi"), "[ECHO] hi");
        assert_eq!(echo_reply(Some("  "), "hi"), "[ECHO] hi");
        assert_eq!(echo_reply(Some("Ana"), "hi"), "[ECHO] Ana: hi");
    }
}
