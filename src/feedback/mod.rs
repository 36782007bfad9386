//! Thumbs-up/down feedback on bot replies.
//!
//! The tracker remembers which bot messages carry the feedback reactions, so that
//! reactions on any other message are ignored. It is bounded; the oldest tracked
//! replies are forgotten first.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

pub const THUMBS_UP: &str = "👍";
pub const THUMBS_DOWN: &str = "👎";

/// Default number of replies remembered by [`FeedbackTracker::default`].
pub const DEFAULT_TRACKED_REPLIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    ThumbsUp,
    ThumbsDown,
}

impl FeedbackKind {
    pub const ALL: [FeedbackKind; 2] = [FeedbackKind::ThumbsUp, FeedbackKind::ThumbsDown];

    pub fn from_emoji(emoji: &str) -> Option<Self> {
        match emoji {
            THUMBS_UP => Some(FeedbackKind::ThumbsUp),
            THUMBS_DOWN => Some(FeedbackKind::ThumbsDown),
            _ => None,
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            FeedbackKind::ThumbsUp => THUMBS_UP,
            FeedbackKind::ThumbsDown => THUMBS_DOWN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackAction {
    Added,
    Removed,
}

#[derive(Debug, Default)]
struct Tracked {
    conversations: HashMap<u64, u64>,
    order: VecDeque<u64>,
}

/// Bot reply message id → conversation root id.
#[derive(Debug)]
pub struct FeedbackTracker {
    capacity: usize,
    inner: Mutex<Tracked>,
}

impl Default for FeedbackTracker {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TRACKED_REPLIES)
    }
}

impl FeedbackTracker {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Tracked::default()),
        }
    }

    pub fn track(&self, message_id: u64, conversation_id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.conversations.insert(message_id, conversation_id).is_none() {
            inner.order.push_back(message_id);
        }
        while inner.order.len() > self.capacity {
            if let Some(old) = inner.order.pop_front() {
                inner.conversations.remove(&old);
            }
        }
    }

    /// Conversation of a tracked reply, or `None` if the message does not carry feedback reactions.
    pub fn conversation_of(&self, message_id: u64) -> Option<u64> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.conversations.get(&message_id).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emoji_mapping() {
        assert_eq!(FeedbackKind::from_emoji("👍"), Some(FeedbackKind::ThumbsUp));
        assert_eq!(FeedbackKind::from_emoji("👎"), Some(FeedbackKind::ThumbsDown));
        assert_eq!(FeedbackKind::from_emoji("🎉"), None);
        for kind in FeedbackKind::ALL {
            assert_eq!(FeedbackKind::from_emoji(kind.emoji()), Some(kind));
        }
    }

    #[test]
    fn tracker_is_bounded() {
        let t = FeedbackTracker::with_capacity(2);
        t.track(1, 100);
        t.track(2, 100);
        t.track(1, 100);
        assert_eq!(t.len(), 2);
        t.track(3, 200);
        assert_eq!(t.len(), 2);
        assert_eq!(t.conversation_of(1), None);
        assert_eq!(t.conversation_of(2), Some(100));
        assert_eq!(t.conversation_of(3), Some(200));
    }
}
