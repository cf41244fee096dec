//! Route handlers and request-field parsing.
//!
//! Chat bodies are read leniently: an unparseable body is treated as an
//! empty object, and the boolean flags accept JSON booleans or strings.

use crate::SharedState;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use chatrelay_core::completion::CompletionClient;
use chatrelay_core::message::SessionId;
use chatrelay_engine::{ChatFailure, ChatRequest};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{debug, warn};

pub(crate) const SERVICE: &str = "chatrelay";
pub(crate) const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Profile keys listed by `/diag`.
const DIAG_PROFILE_KEYS: usize = 24;

/// Remote IP of the caller, when the listener recorded one.
#[derive(Debug, Clone, Default)]
pub(crate) struct ClientAddr(pub Option<String>);

#[derive(Debug, Default, Deserialize)]
struct ChatPayload {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    speaker: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    auth_token: Option<String>,
    #[serde(default)]
    profile: Option<String>,
    #[serde(default)]
    use_memory: Option<Value>,
    #[serde(default)]
    use_system: Option<Value>,
    #[serde(default)]
    memory_turns: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ClearPayload {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    auth_token: Option<String>,
}

type Params = Query<HashMap<String, String>>;

pub(crate) fn error_response(status: StatusCode, code: &str, detail: Option<String>) -> Response {
    let mut body = json!({ "ok": false, "error": code });
    if let Some(detail) = detail {
        body["detail"] = Value::String(detail);
    }
    (status, Json(body)).into_response()
}

fn failure_response(failure: ChatFailure) -> Response {
    let status = StatusCode::from_u16(failure.http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
    let detail = match &failure {
        ChatFailure::Upstream { detail } => Some(detail.clone()),
        _ => None,
    };
    error_response(status, failure.code(), detail)
}

/// `true` unless the value is `false`, zero, or one of `0/false/off/no`.
fn flag(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_none_or(|n| n != 0.0),
        Some(Value::String(s)) => !is_off(s),
        Some(_) => true,
    }
}

fn is_off(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "0" | "false" | "off" | "no")
}

fn turns(value: Option<&Value>) -> Option<usize> {
    match value? {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn non_blank(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Token from `X-Auth-Token`, then `Authorization`, then the body, then `?token=`.
fn request_token(headers: &HeaderMap, body: [Option<&str>; 2], query: &HashMap<String, String>) -> Option<String> {
    let header_value = |name: header::HeaderName| headers.get(name).and_then(|v| v.to_str().ok());
    non_blank(header_value(header::HeaderName::from_static("x-auth-token")))
        .or_else(|| non_blank(header_value(header::AUTHORIZATION)))
        .or_else(|| body.into_iter().find_map(non_blank))
        .or_else(|| non_blank(query.get("token").map(String::as_str)))
}

/// Rate-limit `/chat` per remote IP and record the address for the handler.
pub(crate) async fn client_middleware(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> Response {
    let addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let key = addr.as_deref().unwrap_or("?");

    if !state.limiter.check(key) {
        warn!(client = %key, "Rate limit exceeded");
        return error_response(StatusCode::TOO_MANY_REQUESTS, "too_many_requests", None);
    }

    req.extensions_mut().insert(ClientAddr(addr));
    next.run(req).await
}

pub(crate) async fn health_handler() -> Json<Value> {
    Json(json!({
        "ok": true,
        "service": SERVICE,
        "version": VERSION,
        "time": chrono::Utc::now().timestamp(),
    }))
}

pub(crate) async fn diag_handler(State(state): State<SharedState>) -> Json<Value> {
    let config = &state.config;
    let orchestrator = &state.orchestrator;
    let generation = &config.generation;
    let profile_keys: Vec<&str> = orchestrator.profiles().keys().take(DIAG_PROFILE_KEYS).collect();

    Json(json!({
        "ok": true,
        "service": SERVICE,
        "version": VERSION,
        "enabled": orchestrator.is_enabled(),
        "flags": {
            "auth_token_set": !config.auth.token.is_empty(),
            "allowlist_size": config.auth.allowlist.len(),
            "api_key_set": !config.upstream.api_key.is_empty(),
            "api_url_set": !config.upstream.api_url.is_empty(),
            "chat_path": config.upstream.chat_path,
            "model_set": !config.upstream.model.is_empty(),
            "fallback_system_set": !config.fallback_system.is_empty(),
            "fallback_echo": config.fallback_echo,
            "default_profile": orchestrator.profiles().default_key(),
            "profile_keys": profile_keys,
            "max_tokens": generation.max_tokens,
            "temperature": generation.temperature,
            "frequency_penalty": generation.frequency_penalty,
            "presence_penalty": generation.presence_penalty,
            "repetition_penalty": generation.repetition_penalty,
            "top_p": generation.top_p,
            "top_k": generation.top_k,
            "min_tokens": generation.min_tokens,
            "stop_set": !generation.stop.is_empty(),
            "memory_turns": config.memory.turns,
            "memory_max_chars": config.memory.max_chars,
            "persist": orchestrator.history().is_persistent(),
            "db_path": orchestrator.history().is_persistent().then_some(&config.memory.db_path),
        },
        "chat_url": config.upstream.chat_url(),
        "upstream_ready": orchestrator.client().is_ready(),
        "memory": {
            "backend": orchestrator.history().backend_name(),
            "sessions": orchestrator.history().session_count(),
        },
    }))
}

pub(crate) async fn chat_handler(
    State(state): State<SharedState>,
    Extension(ClientAddr(addr)): Extension<ClientAddr>,
    Query(query): Params,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload: ChatPayload = serde_json::from_slice(&body).unwrap_or_else(|e| {
        debug!(error = %e, "Unreadable chat body, treating as empty");
        ChatPayload::default()
    });

    let token = request_token(
        &headers,
        [payload.token.as_deref(), payload.auth_token.as_deref()],
        &query,
    );
    let use_system = flag(payload.use_system.as_ref()) && !query.get("sys").is_some_and(|s| is_off(s));

    let request = ChatRequest {
        session_id: SessionId::derive(payload.session_id.as_deref(), addr.as_deref()),
        message: payload.message.unwrap_or_default(),
        speaker: payload.speaker,
        token,
        profile: non_blank(payload.profile.as_deref()).or_else(|| non_blank(query.get("profile").map(String::as_str))),
        use_memory: flag(payload.use_memory.as_ref()),
        use_system,
        memory_turns: turns(payload.memory_turns.as_ref()),
    };

    match state.orchestrator.handle(request).await {
        Ok(response) => Json(json!({
            "ok": true,
            "reply": response.reply,
            "meta": response.meta,
        }))
        .into_response(),
        Err(failure) => failure_response(failure),
    }
}

pub(crate) async fn memory_clear_handler(
    State(state): State<SharedState>,
    Query(query): Params,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload: ClearPayload = serde_json::from_slice(&body).unwrap_or_default();
    let token = request_token(
        &headers,
        [payload.token.as_deref(), payload.auth_token.as_deref()],
        &query,
    );
    if !state.orchestrator.is_authorized(token.as_deref()) {
        return failure_response(ChatFailure::Unauthorized);
    }
    let Some(session_id) = non_blank(payload.session_id.as_deref()) else {
        return error_response(StatusCode::BAD_REQUEST, "session_id_required", None);
    };

    let outcome = state.orchestrator.clear_session(&SessionId::new(session_id)).await;
    Json(json!({
        "ok": true,
        "removed": outcome.removed,
        "facts_removed": outcome.facts_removed,
    }))
    .into_response()
}

pub(crate) async fn memory_export_handler(
    State(state): State<SharedState>,
    Query(query): Params,
    headers: HeaderMap,
) -> Response {
    let token = request_token(&headers, [None, None], &query);
    if !state.orchestrator.is_authorized(token.as_deref()) {
        return failure_response(ChatFailure::Unauthorized);
    }
    let Some(session_id) = non_blank(query.get("session_id").map(String::as_str)) else {
        return error_response(StatusCode::BAD_REQUEST, "session_id_required", None);
    };

    let session = SessionId::new(&session_id);
    let turns = query.get("turns").and_then(|t| t.trim().parse().ok());
    let history = state.orchestrator.export(&session, turns).await;
    Json(json!({
        "ok": true,
        "session_id": session.as_str(),
        "history": history,
    }))
    .into_response()
}

pub(crate) async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "not_found", None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_strings_and_booleans() {
        assert!(flag(None));
        assert!(flag(Some(&json!(true))));
        assert!(!flag(Some(&json!(false))));
        assert!(!flag(Some(&json!("OFF"))));
        assert!(!flag(Some(&json!(" no "))));
        assert!(!flag(Some(&json!("0"))));
        assert!(flag(Some(&json!("yes"))));
        assert!(!flag(Some(&json!(0))));
        assert!(flag(Some(&json!(1))));
    }

    #[test]
    fn turns_accept_numbers_and_numeric_strings() {
        assert_eq!(turns(Some(&json!(3))), Some(3));
        assert_eq!(turns(Some(&json!(" 4 "))), Some(4));
        assert_eq!(turns(Some(&json!(-1))), None);
        assert_eq!(turns(Some(&json!("many"))), None);
        assert_eq!(turns(None), None);
    }

    #[test]
    fn token_lookup_order() {
        let mut headers = HeaderMap::new();
        let mut query = HashMap::new();
        query.insert("token".to_string(), "from-query".to_string());

        assert_eq!(request_token(&headers, [None, None], &query).as_deref(), Some("from-query"));
        assert_eq!(
            request_token(&headers, [None, Some("from-body")], &query).as_deref(),
            Some("from-body")
        );

        headers.insert(header::AUTHORIZATION, "Bearer from-auth".parse().unwrap());
        assert_eq!(
            request_token(&headers, [Some("from-body"), None], &query).as_deref(),
            Some("Bearer from-auth")
        );

        headers.insert("x-auth-token", "from-header".parse().unwrap());
        assert_eq!(
            request_token(&headers, [None, None], &query).as_deref(),
            Some("from-header")
        );
    }

    #[test]
    fn blank_values_are_skipped() {
        let mut headers = HeaderMap::new();
        headers.insert("x-auth-token", "   ".parse().unwrap());
        assert_eq!(
            request_token(&headers, [Some(""), Some("b")], &HashMap::new()).as_deref(),
            Some("b")
        );
    }
}
