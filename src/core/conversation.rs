//! Conversation tracking for Duologue.
//!
//! Handles:
//! - Per-conversation escalation depth
//! - Follow-up and closing turn synthesis
//! - Conversation completion

use std::collections::HashMap;

use super::types::{Agent, AgentReply, Priority, QueuedItem, ResponseClass};

/// Default escalation cap: one follow-up, then one closing turn.
pub const MAX_CONVERSATION_DEPTH: u32 = 2;

/// Characters of the previous reply carried into a follow-up.
pub const DEFAULT_EXCERPT_CHARS: usize = 200;

/// Display names used when wording follow-ups.
#[derive(Debug, Clone)]
pub struct AgentNames {
    pub a: String,
    pub b: String,
}

impl AgentNames {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
        }
    }

    pub fn of(&self, agent: Agent) -> &str {
        match agent {
            Agent::A => &self.a,
            Agent::B => &self.b,
        }
    }
}

impl Default for AgentNames {
    fn default() -> Self {
        Self::new("Skysent", "Arcadius")
    }
}

/// What happened to a conversation after a reply.
#[derive(Debug)]
pub enum Advance {
    /// Item has no live conversation.
    Untracked,
    /// Depth advanced and a follow-up turn was produced.
    FollowUp(QueuedItem),
    /// Conversation reached its end and was discarded.
    Complete,
}

/// Owns the depth map for every live conversation.
pub struct ConversationOrchestrator {
    depths: HashMap<String, u32>,
    max_depth: u32,
    excerpt_chars: usize,
    names: AgentNames,
}

impl ConversationOrchestrator {
    pub fn new(max_depth: u32, excerpt_chars: usize, names: AgentNames) -> Self {
        Self {
            depths: HashMap::new(),
            max_depth,
            excerpt_chars,
            names,
        }
    }

    /// Open a new conversation at depth 0 and return its id.
    pub fn start(&mut self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.depths.insert(id.clone(), 0);
        id
    }

    pub fn depth(&self, id: &str) -> Option<u32> {
        self.depths.get(id).copied()
    }

    /// Depth of the item's conversation, 0 when it has none.
    pub fn depth_of(&self, item: &QueuedItem) -> u32 {
        item.conversation_id
            .as_deref()
            .and_then(|id| self.depth(id))
            .unwrap_or(0)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.depths.contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.depths.len()
    }

    /// Drop a conversation without producing further turns.
    pub fn discard(&mut self, id: &str) -> bool {
        self.depths.remove(id).is_some()
    }

    /// Record a non-empty reply to `item` and decide the next turn.
    pub fn on_reply(&mut self, item: &QueuedItem, reply: &AgentReply) -> Advance {
        let Some(id) = item.conversation_id.as_deref() else {
            return Advance::Untracked;
        };
        let Some(depth) = self.depths.get(id).copied() else {
            return Advance::Untracked;
        };

        if item.skip_follow_up || depth >= self.max_depth {
            tracing::debug!("Conversation {} complete at depth {}", id, depth);
            self.depths.remove(id);
            return Advance::Complete;
        }

        let next_depth = depth + 1;
        self.depths.insert(id.to_string(), next_depth);

        let closing = next_depth >= self.max_depth;
        let follow_up = self.follow_up(id, reply, closing);
        tracing::debug!(
            "Depth {}: {} responded, {} to {}",
            depth,
            reply.responder,
            if closing { "closing" } else { "follow-up" },
            follow_up.target
        );
        Advance::FollowUp(follow_up)
    }

    fn follow_up(&self, conversation_id: &str, reply: &AgentReply, closing: bool) -> QueuedItem {
        let speaker = self.names.of(reply.responder);
        let listener = self.names.of(reply.responder.other());
        let excerpt = excerpt(&reply.text, self.excerpt_chars);

        let (prompt, priority) = if closing {
            (
                format!("{listener}, {speaker} said: \"{excerpt}...\" Give your final response."),
                Priority::High,
            )
        } else {
            (
                format!("{listener}, {speaker} said: \"{excerpt}...\" Your response?"),
                Priority::Normal,
            )
        };

        QueuedItem::new(prompt, reply.responder_role(), ResponseClass::Conversational)
            .with_target(reply.responder.other())
            .with_priority(priority)
            .with_conversation(conversation_id)
            .with_skip_follow_up(closing)
    }
}

impl Default for ConversationOrchestrator {
    fn default() -> Self {
        Self::new(MAX_CONVERSATION_DEPTH, DEFAULT_EXCERPT_CHARS, AgentNames::default())
    }
}

/// First `max_chars` characters of `text`.
fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
