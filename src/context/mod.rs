//! Conversation context store
//!
//! Gives each conversation a bounded, time-boxed memory of recent turns
//! plus a best-effort topic/intent tag used to enrich downstream prompts.
//!
//! Expiry is sliding: the TTL is measured from the last update, so active
//! conversations never expire mid-use. Expired entries are evicted lazily
//! on read; [`ContextStore::sweep_expired`] exists for an external
//! scheduler to reclaim the rest.

pub mod tagging;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use crate::config::ContextConfig;

/// One user/bot exchange within a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub user_message: String,
    pub bot_response: String,
    pub timestamp: DateTime<Utc>,
}

/// Full stored state of one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub turns: Vec<Turn>,
    pub topic: Option<String>,
    pub intent: Option<String>,
}

impl Conversation {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            last_updated: now,
            turns: Vec::new(),
            topic: None,
            intent: None,
        }
    }
}

/// Read-only view handed to handlers and prompt assembly.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshot {
    pub turns: Vec<Turn>,
    pub topic: Option<String>,
    pub intent: Option<String>,
}

/// In-memory store of conversation contexts keyed by opaque UUID.
///
/// All operations take the per-entry lock for their full read-modify-write
/// step, so concurrent requests against the same conversation cannot
/// interleave mid-update.
pub struct ContextStore {
    contexts: DashMap<Uuid, Conversation>,
    ttl: Duration,
    max_turns: usize,
}

impl ContextStore {
    pub fn new(ttl_secs: i64, max_turns: usize) -> Self {
        Self {
            contexts: DashMap::new(),
            ttl: Duration::seconds(ttl_secs),
            max_turns,
        }
    }

    pub fn from_config(config: &ContextConfig) -> Self {
        Self::new(config.ttl_secs, config.max_turns)
    }

    fn is_expired(&self, conversation: &Conversation, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(conversation.last_updated) > self.ttl
    }

    /// Retrieve the context for `id`, evicting it first if its age since
    /// last update exceeds the TTL. Unknown ids return `None`.
    pub fn get(&self, id: &Uuid) -> Option<ContextSnapshot> {
        self.get_at(id, Utc::now())
    }

    pub fn get_at(&self, id: &Uuid, now: DateTime<Utc>) -> Option<ContextSnapshot> {
        // Lazy expiry: the eviction is real, not just a hidden read
        if self
            .contexts
            .remove_if(id, |_, conversation| self.is_expired(conversation, now))
            .is_some()
        {
            return None;
        }

        self.contexts.get(id).map(|entry| ContextSnapshot {
            turns: entry.turns.clone(),
            topic: entry.topic.clone(),
            intent: entry.intent.clone(),
        })
    }

    /// Append a turn, allocating a fresh conversation when `id` is absent
    /// or unknown. Returns the (possibly new) conversation id.
    ///
    /// Past `max_turns` the oldest turn is evicted first. Topic and intent
    /// are re-derived from the new user message; when no rule matches, the
    /// previous tag is kept.
    pub fn record_turn(&self, id: Option<Uuid>, user_message: &str, bot_response: &str) -> Uuid {
        self.record_turn_at(id, user_message, bot_response, Utc::now())
    }

    pub fn record_turn_at(
        &self,
        id: Option<Uuid>,
        user_message: &str,
        bot_response: &str,
        now: DateTime<Utc>,
    ) -> Uuid {
        let id = id
            .filter(|id| self.contexts.contains_key(id))
            .unwrap_or_else(Uuid::new_v4);

        let mut entry = self
            .contexts
            .entry(id)
            .or_insert_with(|| Conversation::new(now));
        let conversation = entry.value_mut();

        conversation.turns.push(Turn {
            user_message: user_message.to_string(),
            bot_response: bot_response.to_string(),
            timestamp: now,
        });
        if conversation.turns.len() > self.max_turns {
            conversation.turns.remove(0);
        }

        // last_updated is monotone non-decreasing even if the clock skews
        if now > conversation.last_updated {
            conversation.last_updated = now;
        }

        if let Some(topic) = tagging::detect_topic(user_message) {
            conversation.topic = Some(topic.to_string());
        }
        if let Some(intent) = tagging::detect_intent(user_message) {
            conversation.intent = Some(intent.to_string());
        }

        id
    }

    /// Evict every context whose age exceeds the TTL; returns the count.
    ///
    /// Invoked by an external scheduler loop, never self-scheduled.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.contexts.len();
        self.contexts
            .retain(|_, conversation| !self.is_expired(conversation, now));
        before - self.contexts.len()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Serialize the whole store for restart continuity.
    ///
    /// Single-process, single-writer only; not an inter-process share.
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot: HashMap<Uuid, Conversation> = self
            .contexts
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let json = serde_json::to_string(&snapshot)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to save contexts to {}", path.display()))?;

        tracing::info!(count = snapshot.len(), path = %path.display(), "contexts saved");
        Ok(())
    }

    /// Load a previously saved store, merging over current entries.
    pub fn load(&self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to load contexts from {}", path.display()))?;
        let saved: HashMap<Uuid, Conversation> = serde_json::from_str(&content)
            .with_context(|| format!("Malformed context snapshot at {}", path.display()))?;

        let count = saved.len();
        for (id, conversation) in saved {
            self.contexts.insert(id, conversation);
        }

        tracing::info!(count, path = %path.display(), "contexts loaded");
        Ok(())
    }
}
