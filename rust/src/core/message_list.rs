// The conversation: newest-first, at most one entry per id.

use std::collections::HashSet;

use super::kv_store::KeyValueStore;
use super::transport::InboundPayload;
use crate::state::{ChatMessage, MessageOrigin};

pub(crate) const SEED_MESSAGE_ID: &str = "1";
pub(crate) const SEED_MESSAGE_TEXT: &str = "How can I help?";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct MessageList {
    messages: Vec<ChatMessage>,
}

impl MessageList {
    /// Fresh install: just the greeting.
    pub(crate) fn seeded(now: i64) -> Self {
        Self {
            messages: vec![ChatMessage {
                id: SEED_MESSAGE_ID.to_string(),
                text: SEED_MESSAGE_TEXT.to_string(),
                created_at: now,
                origin: MessageOrigin::System,
            }],
        }
    }

    /// Load the last snapshot. Never fails: a missing, unreadable, or corrupt snapshot is
    /// treated as no prior state. The flag is true when the greeting was seeded.
    pub(crate) fn restore(store: &dyn KeyValueStore, key: &str, now: i64) -> (Self, bool) {
        let raw = match store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::info!(key, "no message snapshot; seeding");
                return (Self::seeded(now), true);
            }
            Err(e) => {
                tracing::warn!(
                    key,
                    error = %format!("{e:#}"),
                    "failed to read message snapshot; seeding"
                );
                return (Self::seeded(now), true);
            }
        };
        match Self::from_snapshot(&raw) {
            Ok(list) => {
                tracing::info!(key, count = list.len(), "restored messages");
                (list, false)
            }
            Err(e) => {
                tracing::warn!(
                    key,
                    error = %format!("{e:#}"),
                    "unparseable message snapshot; seeding"
                );
                (Self::seeded(now), true)
            }
        }
    }

    pub(crate) fn from_snapshot(raw: &str) -> anyhow::Result<Self> {
        let parsed: Vec<ChatMessage> = serde_json::from_str(raw)?;
        // Older entries lose to newer ones sharing an id.
        let mut seen: HashSet<String> = HashSet::new();
        let messages = parsed
            .into_iter()
            .filter(|m| seen.insert(m.id.clone()))
            .collect();
        Ok(Self { messages })
    }

    pub(crate) fn to_snapshot(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(&self.messages)?)
    }

    /// Optimistic append of a message typed on this device.
    pub(crate) fn append_local(&mut self, text: String, now: i64) -> ChatMessage {
        let msg = ChatMessage {
            id: self.fresh_id(),
            text,
            created_at: now,
            origin: MessageOrigin::User,
        };
        self.messages.insert(0, msg.clone());
        msg
    }

    /// Replace-then-insert: any entry already holding `incoming.id` is dropped and the payload
    /// becomes the newest message. A remote that streams partial text under one id therefore
    /// shows up as a single, growing bubble.
    pub(crate) fn reconcile(&mut self, incoming: InboundPayload, now: i64) -> ChatMessage {
        self.messages.retain(|m| m.id != incoming.id);
        let msg = ChatMessage {
            id: incoming.id,
            text: incoming.text,
            created_at: now,
            origin: MessageOrigin::System,
        };
        self.messages.insert(0, msg.clone());
        msg
    }

    pub(crate) fn as_slice(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.len()
    }

    pub(crate) fn contains_id(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    fn fresh_id(&self) -> String {
        loop {
            let id = uuid::Uuid::new_v4().to_string();
            if !self.contains_id(&id) {
                return id;
            }
        }
    }
}
