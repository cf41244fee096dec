//! Sticky facts: `[[remember: key=value]]` / `[[state: key=value]]`
//! directives embedded in user text, replayed into every later prompt as a
//! `STATE:` header.

use chatrelay_core::message::SessionId;
use chatrelay_core::store::DurableStore;
use dashmap::DashMap;
use regex_lite::Regex;
use std::sync::{Arc, LazyLock};
use tokio::sync::Mutex;
use tracing::{debug, warn};

static DIRECTIVE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\[\[(?:remember|state)\s*:\s*([A-Za-z0-9_]+)\s*=\s*(.*?)\]\]").ok()
});

/// One `key=value` directive found in user text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub key: String,
    pub value: String,
}

/// Split user text into its directives and the text with them removed.
///
/// Matches are collected first; the cleaned string is then built from the
/// gaps between them and trimmed. Malformed directives never match and stay
/// in the text untouched.
pub fn parse_directives(raw: &str) -> (Vec<Directive>, String) {
    let Some(pattern) = DIRECTIVE.as_ref() else {
        return (Vec::new(), raw.trim().to_string());
    };
    let mut directives = Vec::new();
    let mut spans = Vec::new();
    for caps in pattern.captures_iter(raw) {
        let (Some(whole), Some(key), Some(value)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        directives.push(Directive {
            key: key.as_str().to_string(),
            value: value.as_str().trim().to_string(),
        });
        spans.push(whole.range());
    }

    let mut cleaned = String::with_capacity(raw.len());
    let mut cursor = 0;
    for span in spans {
        cleaned.push_str(&raw[cursor..span.start]);
        cursor = span.end;
    }
    cleaned.push_str(&raw[cursor..]);

    (directives, cleaned.trim().to_string())
}

#[derive(Default)]
struct FactTable {
    /// Insertion-ordered; overwrites keep the original position
    facts: Vec<(String, String)>,
    loaded: bool,
}

impl FactTable {
    fn position(&self, key: &str) -> Option<usize> {
        self.facts.iter().position(|(k, _)| k == key)
    }
}

/// Per-session sticky fact tables with optional durable backing.
pub struct StickyStore {
    sessions: DashMap<SessionId, Arc<Mutex<FactTable>>>,
    durable: Arc<dyn DurableStore>,
    /// Distinct keys allowed per session; 0 = unbounded
    max_keys: usize,
}

impl StickyStore {
    pub fn new(durable: Arc<dyn DurableStore>, max_keys: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            durable,
            max_keys,
        }
    }

    fn session(&self, session: &SessionId) -> Arc<Mutex<FactTable>> {
        self.sessions.entry(session.clone()).or_default().value().clone()
    }

    async fn load(&self, session: &SessionId, table: &mut FactTable) {
        if table.loaded {
            return;
        }
        table.loaded = true;
        if !self.durable.is_persistent() {
            return;
        }
        match self.durable.load_facts(session).await {
            Ok(facts) => table.facts = facts,
            Err(e) => warn!(session = %session, "Sticky fact load failed: {e}"),
        }
    }

    /// Apply every directive in `raw` to the session and return the cleaned text.
    ///
    /// Directives apply in order of appearance, so the last one for a key wins.
    pub async fn update(&self, session: &SessionId, raw: &str) -> String {
        let (directives, cleaned) = parse_directives(raw);
        if directives.is_empty() {
            return cleaned;
        }

        let handle = self.session(session);
        let mut table = handle.lock().await;
        self.load(session, &mut table).await;

        for Directive { key, value } in directives {
            match table.position(&key) {
                Some(i) if table.facts[i].1 == value => continue,
                Some(i) => table.facts[i].1 = value.clone(),
                None if self.max_keys > 0 && table.facts.len() >= self.max_keys => {
                    warn!(session = %session, key = %key, limit = self.max_keys, "Sticky key limit reached; ignoring new key");
                    continue;
                }
                None => table.facts.push((key.clone(), value.clone())),
            }
            debug!(session = %session, key = %key, "Sticky fact set");
            if let Err(e) = self.durable.upsert_fact(session, &key, &value).await {
                warn!(session = %session, key = %key, "Durable sticky write failed: {e}");
            }
        }

        cleaned
    }

    /// All facts of the session, in insertion order.
    pub async fn facts(&self, session: &SessionId) -> Vec<(String, String)> {
        let handle = self.session(session);
        let mut table = handle.lock().await;
        self.load(session, &mut table).await;
        table.facts.clone()
    }

    /// `"STATE: k1=v1; k2=v2"`, or `""` when the session has no facts.
    pub async fn render(&self, session: &SessionId) -> String {
        let facts = self.facts(session).await;
        if facts.is_empty() {
            return String::new();
        }
        let pairs: Vec<String> = facts.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("STATE: {}", pairs.join("; "))
    }

    /// Drop every fact of the session. Returns how many were held.
    pub async fn clear(&self, session: &SessionId) -> usize {
        let handle = self.session(session);
        let mut table = handle.lock().await;
        self.load(session, &mut table).await;
        let count = table.facts.len();
        table.facts.clear();
        if let Err(e) = self.durable.clear_facts(session).await {
            warn!(session = %session, "Durable sticky clear failed: {e}");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryStore;
    use crate::noop::NoopStore;

    fn store() -> StickyStore {
        StickyStore::new(Arc::new(NoopStore), 0)
    }

    #[test]
    fn directive_pattern_compiles() {
        assert!(DIRECTIVE.is_some());
    }

    #[test]
    fn parse_strips_directives_and_trims() {
        let (directives, cleaned) = parse_directives("[[remember: mood=happy]] hi");
        assert_eq!(cleaned, "hi");
        assert_eq!(
            directives,
            vec![Directive { key: "mood".into(), value: "happy".into() }]
        );
    }

    #[test]
    fn parse_handles_both_verbs_and_spacing() {
        let (directives, cleaned) =
            parse_directives("a [[state:place = Gale Crater ]] b [[remember : name=Soji]] c");
        assert_eq!(cleaned, "a  b  c");
        assert_eq!(directives[0].key, "place");
        assert_eq!(directives[0].value, "Gale Crater");
        assert_eq!(directives[1].key, "name");
    }

    #[test]
    fn malformed_directives_pass_through() {
        for text in ["[[remember: mood]]", "[[remember: mood=happy]", "[[forget: a=b]]", "[[remember: bad-key=x]]"] {
            let (directives, cleaned) = parse_directives(text);
            assert!(directives.is_empty(), "{text}");
            assert_eq!(cleaned, text);
        }
    }

    #[test]
    fn empty_value_is_accepted() {
        let (directives, cleaned) = parse_directives("[[remember: mood=   ]]");
        assert_eq!(cleaned, "");
        assert_eq!(directives[0].value, "");
    }

    #[tokio::test]
    async fn update_then_render() {
        let s = store();
        let sid = SessionId::from("s");
        assert_eq!(s.update(&sid, "[[remember: mood=happy]] hi").await, "hi");
        assert_eq!(s.render(&sid).await, "STATE: mood=happy");
    }

    #[tokio::test]
    async fn render_is_empty_without_facts() {
        assert_eq!(store().render(&SessionId::from("fresh")).await, "");
    }

    #[tokio::test]
    async fn last_directive_for_a_key_wins_and_order_is_stable() {
        let s = store();
        let sid = SessionId::from("s");
        s.update(&sid, "[[state: a=1]] [[state: b=2]] [[state: a=3]]").await;
        assert_eq!(s.render(&sid).await, "STATE: a=3; b=2");
    }

    #[tokio::test]
    async fn repeated_directive_is_idempotent() {
        let s = store();
        let sid = SessionId::from("s");
        s.update(&sid, "[[remember: mood=happy]]").await;
        let before = s.facts(&sid).await;
        s.update(&sid, "[[remember: mood=happy]] again").await;
        assert_eq!(s.facts(&sid).await, before);
    }

    #[tokio::test]
    async fn sessions_do_not_share_facts() {
        let s = store();
        s.update(&SessionId::from("a"), "[[remember: x=1]]").await;
        assert_eq!(s.render(&SessionId::from("b")).await, "");
    }

    #[tokio::test]
    async fn key_limit_rejects_new_keys_but_allows_overwrites() {
        let s = StickyStore::new(Arc::new(NoopStore), 2);
        let sid = SessionId::from("s");
        s.update(&sid, "[[state: a=1]] [[state: b=2]] [[state: c=3]]").await;
        s.update(&sid, "[[state: a=9]]").await;
        assert_eq!(s.render(&sid).await, "STATE: a=9; b=2");
    }

    #[tokio::test]
    async fn facts_survive_restart_through_durable_store() {
        let disk = InMemoryStore::new();
        let sid = SessionId::from("s");
        StickyStore::new(Arc::new(disk.clone()), 0)
            .update(&sid, "[[remember: name=Soji]]")
            .await;

        let fresh = StickyStore::new(Arc::new(disk.clone()), 0);
        assert_eq!(fresh.render(&sid).await, "STATE: name=Soji");
    }

    #[tokio::test]
    async fn clear_empties_cache_and_store() {
        let disk = InMemoryStore::new();
        let s = StickyStore::new(Arc::new(disk.clone()), 0);
        let sid = SessionId::from("s");
        s.update(&sid, "[[state: a=1]] [[state: b=2]]").await;
        assert_eq!(s.clear(&sid).await, 2);
        assert_eq!(s.render(&sid).await, "");
        assert!(disk.load_facts(&sid).await.unwrap().is_empty());
    }
}
