//! Append-only interaction records
//!
//! One JSON object per line, one file per record kind, under the records directory
//! (`~/.parakeet/records/` unless configured). Writes are serialized by a mutex so
//! concurrent events never interleave lines. A failed write is logged and dropped.

use crate::feedback::{FeedbackAction, FeedbackKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Feedback,
    Interaction,
    UserInteraction,
}

impl RecordKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            RecordKind::Feedback => "feedback.jsonl",
            RecordKind::Interaction => "interactions.jsonl",
            RecordKind::UserInteraction => "user_interactions.jsonl",
        }
    }
}

/// A thumbs-up/down reaction on a bot reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub user_id: u64,
    /// `None` for DMs.
    pub server_id: Option<u64>,
    pub message_id: u64,
    pub feedback_type: FeedbackKind,
    pub action: FeedbackAction,
    /// Conversation the rated reply belongs to, when still known.
    pub conversation_id: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

/// One prompt/reply exchange with the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub user_id: u64,
    pub server_id: Option<u64>,
    pub conversation_id: u64,
    pub message_id: u64,
    pub prompt: String,
    pub reply: String,
    pub model: String,
    pub latency_ms: u64,
    pub tokens: u32,
    pub timestamp: DateTime<Utc>,
}

/// A user replying to another (non-bot) user's message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInteractionRecord {
    pub replied_to_user_id: u64,
    pub replied_to_user_name: String,
    pub replied_to_message: String,
    pub replying_user_id: u64,
    pub replying_user_name: String,
    pub replying_message: String,
    pub timestamp: DateTime<Utc>,
}

pub struct RecordLog {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl RecordLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: RecordKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    /// Append one record as a JSON line.
    pub fn append<T: Serialize>(&self, kind: RecordKind, record: &T) -> std::io::Result<()> {
        let line = serde_json::to_string(record)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        std::fs::create_dir_all(&self.dir)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(kind))?;
        writeln!(file, "{}", line)?;
        debug!("Records: appended to {}", kind.file_name());
        Ok(())
    }

    fn append_logged<T: Serialize>(&self, kind: RecordKind, record: &T) {
        if let Err(e) = self.append(kind, record) {
            warn!("Records: failed to write {}: {}", self.path(kind).display(), e);
        }
    }

    pub fn record_feedback(&self, record: &FeedbackRecord) {
        self.append_logged(RecordKind::Feedback, record);
    }

    pub fn record_interaction(&self, record: &InteractionRecord) {
        self.append_logged(RecordKind::Interaction, record);
    }

    pub fn record_user_interaction(&self, record: &UserInteractionRecord) {
        self.append_logged(RecordKind::UserInteraction, record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feedback(user_id: u64, action: FeedbackAction) -> FeedbackRecord {
        FeedbackRecord {
            user_id,
            server_id: Some(7),
            message_id: 99,
            feedback_type: FeedbackKind::ThumbsUp,
            action,
            conversation_id: Some(42),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let log = RecordLog::new(dir.path().join("records"));
        log.record_feedback(&feedback(1, FeedbackAction::Added));
        log.record_feedback(&feedback(1, FeedbackAction::Removed));

        let content = std::fs::read_to_string(log.path(RecordKind::Feedback)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["feedback_type"], "thumbs_up");
        assert_eq!(first["action"], "added");
        assert_eq!(first["message_id"], 99);
        let second: FeedbackRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.action, FeedbackAction::Removed);
    }

    #[test]
    fn kinds_go_to_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let log = RecordLog::new(dir.path());
        log.record_user_interaction(&UserInteractionRecord {
            replied_to_user_id: 1,
            replied_to_user_name: "alice".to_string(),
            replied_to_message: "hi".to_string(),
            replying_user_id: 2,
            replying_user_name: "bob".to_string(),
            replying_message: "hello".to_string(),
            timestamp: Utc::now(),
        });
        assert!(log.path(RecordKind::UserInteraction).is_file());
        assert!(!log.path(RecordKind::Feedback).exists());
        assert!(!log.path(RecordKind::Interaction).exists());
    }

    #[test]
    fn write_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let log = RecordLog::new(&blocker);
        assert!(log.append(RecordKind::Feedback, &feedback(1, FeedbackAction::Added)).is_err());
        // The logged variant swallows the error.
        log.record_feedback(&feedback(1, FeedbackAction::Added));
    }
}
