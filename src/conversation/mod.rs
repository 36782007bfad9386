//! Short-term conversation memory.
//!
//! A conversation is anchored to the platform id of its root message. Every message
//! that resolves to the same root (by reply reference) is appended as a [`Turn`].
//! Histories live only in memory and expire after a fixed period of inactivity;
//! see [`manager::ConversationManager`] for lookup and eviction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::time::{Duration, Instant};

pub mod manager;

pub use manager::{ConversationError, ConversationLease, ConversationManager, IncomingMessage, Resolved};

/// Platform message id (Discord snowflake).
pub type MessageId = u64;

/// Platform user id (Discord snowflake).
pub type UserId = u64;

/// Author role of a turn, as understood by chat-completion APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Bot-authored messages are the assistant side of the conversation; everyone else is a user.
    pub fn from_author(author_is_bot: bool) -> Self {
        if author_is_bot {
            Role::Assistant
        } else {
            Role::User
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected role string (anything other than system, user, assistant).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown conversation role: {0:?}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// One role-tagged utterance. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    role: Role,
    content: String,
    /// Originating platform message. `None` for seeded system turns and for a reply
    /// recorded before it was delivered.
    #[serde(skip_serializing_if = "Option::is_none")]
    source_id: Option<MessageId>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>, source_id: Option<MessageId>) -> Self {
        Self {
            role,
            content: content.into(),
            source_id,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn source_id(&self) -> Option<MessageId> {
        self.source_id
    }
}

/// How a fresh history is seeded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SeedPolicy {
    /// Start with no turns.
    #[default]
    Empty,
    /// Start with a single system turn carrying this prompt.
    SystemPrompt(String),
}

impl SeedPolicy {
    fn seed_turns(&self) -> Vec<Turn> {
        match self {
            SeedPolicy::Empty => Vec::new(),
            SeedPolicy::SystemPrompt(prompt) => vec![Turn::new(Role::System, prompt.clone(), None)],
        }
    }
}

/// Ordered turns of one conversation plus its expiry metadata.
#[derive(Debug)]
pub struct ConversationHistory {
    root_id: MessageId,
    started_by: UserId,
    turns: Vec<Turn>,
    /// Ids of delivered bot replies that belong to this conversation but are not turns.
    linked_ids: Vec<MessageId>,
    last_activity: Instant,
    timeout: Duration,
}

impl ConversationHistory {
    pub fn new(root_id: MessageId, started_by: UserId, timeout: Duration, seed: &SeedPolicy) -> Self {
        Self {
            root_id,
            started_by,
            turns: seed.seed_turns(),
            linked_ids: Vec::new(),
            last_activity: Instant::now(),
            timeout,
        }
    }

    pub fn root_id(&self) -> MessageId {
        self.root_id
    }

    pub fn started_by(&self) -> UserId {
        self.started_by
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Append a turn and mark the conversation active now.
    pub fn append(&mut self, role: Role, content: impl Into<String>, source_id: Option<MessageId>) {
        self.turns.push(Turn::new(role, content, source_id));
        self.touch();
    }

    /// True once more than `timeout` has passed since the last activity.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) > self.timeout
    }

    /// Owned copy of the turns, in conversation order.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    /// Drop all turns except the seed and mark the conversation active now.
    pub fn reset(&mut self, seed: &SeedPolicy) {
        self.turns = seed.seed_turns();
        self.touch();
    }

    /// Delivered bot replies linked to this conversation, oldest first.
    pub fn linked_replies(&self) -> &[MessageId] {
        &self.linked_ids
    }

    /// True when `message_id` is already a turn or a linked reply of this conversation.
    pub fn contains_message(&self, message_id: MessageId) -> bool {
        self.linked_ids.contains(&message_id)
            || self.turns.iter().any(|t| t.source_id() == Some(message_id))
    }

    pub(crate) fn link(&mut self, message_id: MessageId) {
        self.linked_ids.push(message_id);
    }

    fn touch(&mut self) {
        let now = Instant::now();
        if now > self.last_activity {
            self.last_activity = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(timeout: Duration) -> ConversationHistory {
        ConversationHistory::new(1, 42, timeout, &SeedPolicy::Empty)
    }

    #[test]
    fn snapshot_keeps_append_order() {
        let mut h = history(Duration::from_secs(600));
        for i in 0..5u64 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            h.append(role, format!("msg {}", i), Some(100 + i));
        }
        let turns = h.snapshot();
        assert_eq!(turns.len(), 5);
        assert_eq!(h.len(), 5);
        for (i, t) in turns.iter().enumerate() {
            assert_eq!(t.content(), format!("msg {}", i));
            assert_eq!(t.source_id(), Some(100 + i as u64));
        }
    }

    #[test]
    fn snapshot_is_a_copy() {
        let mut h = history(Duration::from_secs(600));
        h.append(Role::User, "Hello, bot!", Some(2));
        let mut snap = h.snapshot();
        snap.clear();
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn seeded_history_starts_with_system_turn() {
        let seed = SeedPolicy::SystemPrompt("be nice".to_string());
        let h = ConversationHistory::new(1, 42, Duration::from_secs(1), &seed);
        let turns = h.snapshot();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role(), Role::System);
        assert_eq!(turns[0].source_id(), None);
    }

    #[test]
    fn expiry_boundary() {
        let h = history(Duration::from_secs(10));
        let start = h.last_activity();
        assert!(!h.is_expired(start));
        assert!(!h.is_expired(start + Duration::from_secs(10)));
        assert!(h.is_expired(start + Duration::from_secs(10) + Duration::from_millis(1)));
    }

    #[test]
    fn zero_timeout_expires_as_soon_as_time_moves() {
        let h = history(Duration::ZERO);
        let start = h.last_activity();
        assert!(!h.is_expired(start));
        assert!(h.is_expired(start + Duration::from_nanos(1)));
    }

    #[test]
    fn huge_timeout_never_expires_in_horizon() {
        let h = history(Duration::from_secs(60 * 60 * 24 * 365));
        let start = h.last_activity();
        assert!(!h.is_expired(start + Duration::from_secs(60 * 60 * 24)));
    }

    #[tokio::test(start_paused = true)]
    async fn append_bumps_activity() {
        let mut h = history(Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;
        h.append(Role::User, "still here", Some(5));
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(!h.is_expired(Instant::now()));
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(h.is_expired(Instant::now()));
    }

    #[test]
    fn reset_returns_to_seed() {
        let seed = SeedPolicy::SystemPrompt("sys".to_string());
        let mut h = ConversationHistory::new(1, 42, Duration::from_secs(60), &seed);
        h.append(Role::User, "a", Some(2));
        h.append(Role::Assistant, "b", None);
        h.reset(&seed);
        assert_eq!(h.len(), 1);
        assert_eq!(h.snapshot()[0].content(), "sys");
    }

    #[test]
    fn role_parsing() {
        assert_eq!("User".parse::<Role>(), Ok(Role::User));
        assert_eq!(" assistant ".parse::<Role>(), Ok(Role::Assistant));
        assert!("moderator".parse::<Role>().is_err());
        assert_eq!(Role::from_author(true), Role::Assistant);
        assert_eq!(Role::from_author(false), Role::User);
    }
}
