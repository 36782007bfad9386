//! Outbound messages: chunking to the Discord length limit and feedback reactions.

use crate::feedback::FeedbackKind;
use serenity::builder::CreateMessage;
use serenity::http::Http;
use serenity::model::channel::{Message, ReactionType};
use serenity::model::id::{ChannelId, MessageId};
use tracing::{debug, error, warn};

/// Discord's per-message content limit, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("nothing to send")]
    Empty,
    #[error("Discord API error: {0}")]
    Discord(#[from] serenity::Error),
}

/// Split `content` into chunks of at most `limit` characters, preferring a line break,
/// then a space, as the cut point. Separators at a cut are dropped; blank chunks are skipped.
pub fn split_message(content: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = content;
    while rest.chars().count() > limit {
        let cut = rest.char_indices().nth(limit).map(|(i, _)| i).unwrap_or(rest.len());
        let window = &rest[..cut];
        let (end, next) = match window.rfind('\n').or_else(|| window.rfind(' ')) {
            Some(i) if i > 0 => (i, i + 1),
            _ => (cut, cut),
        };
        let chunk = &rest[..end];
        if !chunk.trim().is_empty() {
            chunks.push(chunk.to_string());
        }
        rest = &rest[next..];
    }
    if !rest.trim().is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// Send `content` to a channel in chunks; the first chunk replies to `reply_to` when given.
/// A failed chunk is logged and skipped. Returns the messages actually sent; an error only
/// if nothing could be sent.
pub async fn send_chunks(
    http: &Http,
    channel_id: ChannelId,
    reply_to: Option<MessageId>,
    content: &str,
) -> Result<Vec<Message>, SendError> {
    let chunks = split_message(content, MAX_MESSAGE_CHARS);
    if chunks.is_empty() {
        return Err(SendError::Empty);
    }
    let total = chunks.len();
    let mut sent = Vec::with_capacity(total);
    let mut last_error = None;
    for (i, chunk) in chunks.into_iter().enumerate() {
        let mut builder = CreateMessage::new().content(chunk);
        if let (0, Some(reference)) = (i, reply_to) {
            builder = builder.reference_message((channel_id, reference));
        }
        match channel_id.send_message(http, builder).await {
            Ok(message) => sent.push(message),
            Err(e) => {
                error!("Discord: failed to send chunk {}/{} to {}: {}", i + 1, total, channel_id, e);
                last_error = Some(e);
            }
        }
    }
    debug!("Discord: sent {}/{} chunk(s) to {}", sent.len(), total, channel_id);
    match (sent.is_empty(), last_error) {
        (true, Some(e)) => Err(SendError::Discord(e)),
        _ => Ok(sent),
    }
}

/// Attach 👍 and 👎 to a reply. Failures are logged only.
pub async fn add_feedback_reactions(http: &Http, message: &Message) {
    for kind in FeedbackKind::ALL {
        let reaction = ReactionType::Unicode(kind.emoji().to_string());
        if let Err(e) = message.react(http, reaction).await {
            warn!("Discord: failed to add {} to message {}: {}", kind.emoji(), message.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_message_is_one_chunk() {
        assert_eq!(split_message("hello", 2000), vec!["hello"]);
        assert!(split_message("   ", 2000).is_empty());
        assert!(split_message("", 2000).is_empty());
    }

    #[test]
    fn hard_split_without_separators() {
        let text = "a".repeat(4500);
        let chunks = split_message(&text, MAX_MESSAGE_CHARS);
        let lens: Vec<usize> = chunks.iter().map(|c| c.chars().count()).collect();
        assert_eq!(lens, vec![2000, 2000, 500]);
    }

    #[test]
    fn prefers_line_breaks() {
        let text = format!("{}\n{}", "a".repeat(8), "b".repeat(8));
        assert_eq!(split_message(&text, 12), vec!["a".repeat(8), "b".repeat(8)]);
    }

    #[test]
    fn falls_back_to_spaces() {
        assert_eq!(split_message("one two three four", 9), vec!["one two", "three", "four"]);
    }

    #[test]
    fn multibyte_chars_are_not_cut() {
        let text = "é".repeat(5);
        let chunks = split_message(&text, 2);
        assert_eq!(chunks, vec!["éé", "éé", "é"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 2));
    }
}
