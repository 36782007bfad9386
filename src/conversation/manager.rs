//! Conversation lookup and eviction.
//!
//! The manager owns every live [`ConversationHistory`]. The map of histories and the
//! message-id index share one coarse `std::sync::Mutex` that is never held across an
//! `.await`. Each history additionally sits behind its own `tokio::sync::Mutex`; a
//! [`ConversationLease`] is an owned guard on it, held by one event handler for the
//! whole request (including the completion call). The sweep only `try_lock`s, so a
//! leased history is never evicted from under its handler.

use super::{ConversationHistory, MessageId, Role, SeedPolicy, Turn, UserId};
use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{debug, info};

type SharedHistory = Arc<AsyncMutex<ConversationHistory>>;

/// Inbound message as seen by the conversation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub id: MessageId,
    pub author_id: UserId,
    /// Author is any bot account (maps to the assistant role).
    pub author_is_bot: bool,
    /// Author is this bot.
    pub author_is_self: bool,
    /// Message this one replies to, if any.
    pub reply_to: Option<MessageId>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    /// The referenced message belongs to no live conversation (never existed, deleted or expired).
    #[error("no active conversation for message {0}")]
    NotFound(MessageId),
}

/// Outcome of [`ConversationManager::resolve`].
#[derive(Debug)]
pub enum Resolved {
    /// A new conversation rooted at the inbound message.
    Started(ConversationLease),
    /// A live conversation the inbound message replies into.
    Existing(ConversationLease),
    /// Nothing to track (the bot's own root message).
    Ignored,
}

impl Resolved {
    pub fn into_lease(self) -> Option<ConversationLease> {
        match self {
            Resolved::Started(lease) | Resolved::Existing(lease) => Some(lease),
            Resolved::Ignored => None,
        }
    }
}

/// Exclusive access to one history for the duration of an event.
///
/// Reads go through `Deref`. Writes that must stay visible to lookups go through
/// the manager ([`ConversationManager::append_and_get`], [`ConversationManager::link_reply`]).
pub struct ConversationLease {
    shared: SharedHistory,
    guard: OwnedMutexGuard<ConversationHistory>,
}

impl ConversationLease {
    /// Record the generated reply. It has no platform id until it is delivered.
    pub fn record_reply(&mut self, content: impl Into<String>) {
        self.guard.append(Role::Assistant, content, None);
    }
}

impl Deref for ConversationLease {
    type Target = ConversationHistory;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl std::fmt::Debug for ConversationLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationLease")
            .field("root_id", &self.guard.root_id())
            .field("turns", &self.guard.len())
            .finish()
    }
}

struct Slot {
    /// Copy of the history's `started_by`, readable without locking the history.
    started_by: UserId,
    history: SharedHistory,
}

#[derive(Default)]
struct Registry {
    histories: HashMap<MessageId, Slot>,
    /// Every message id known to belong to a live conversation -> root id.
    message_index: HashMap<MessageId, MessageId>,
}

impl Registry {
    fn is_current(&self, root_id: MessageId, shared: &SharedHistory) -> bool {
        self.histories
            .get(&root_id)
            .map(|slot| Arc::ptr_eq(&slot.history, shared))
            .unwrap_or(false)
    }

    fn remove_roots(&mut self, roots: &HashSet<MessageId>) {
        if roots.is_empty() {
            return;
        }
        for root in roots {
            self.histories.remove(root);
        }
        self.message_index.retain(|_, root| !roots.contains(root));
    }
}

/// Owner of all live conversation histories.
pub struct ConversationManager {
    registry: Mutex<Registry>,
    timeout: Duration,
    seed: SeedPolicy,
}

impl ConversationManager {
    pub fn new(timeout: Duration, seed: SeedPolicy) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            timeout,
            seed,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Registry updates never panic halfway, so a poisoned lock still holds consistent data.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live conversations.
    pub fn len(&self) -> usize {
        self.registry().histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, root_id: MessageId) -> bool {
        self.registry().histories.contains_key(&root_id)
    }

    /// Root of the conversation a message belongs to, if it belongs to a live one.
    pub fn root_of(&self, message_id: MessageId) -> Option<MessageId> {
        self.registry().message_index.get(&message_id).copied()
    }

    /// Map an inbound message to its conversation.
    ///
    /// - Reply to a known message: lease that conversation. Unknown or expired
    ///   reference: [`ConversationError::NotFound`] (no orphan thread is created).
    /// - No reference, authored by this bot: [`Resolved::Ignored`].
    /// - Otherwise a new conversation rooted at this message.
    pub async fn resolve(&self, message: &IncomingMessage) -> Result<Resolved, ConversationError> {
        if let Some(reference) = message.reply_to {
            let lease = self.lease_existing(reference).await?;
            debug!(
                "Conversation: message {} continues conversation {}",
                message.id,
                lease.root_id()
            );
            return Ok(Resolved::Existing(lease));
        }

        if message.author_is_self {
            debug!("Conversation: root message {} is from the bot, not tracked", message.id);
            return Ok(Resolved::Ignored);
        }

        Ok(self.start(message).await)
    }

    /// Create a conversation rooted at `message`. If one already exists under that id
    /// (duplicate event delivery), it is leased instead.
    pub async fn start(&self, message: &IncomingMessage) -> Resolved {
        let root_id = message.id;
        let (shared, created) = {
            let mut registry = self.registry();
            match registry.histories.get(&root_id) {
                Some(slot) => (slot.history.clone(), false),
                None => {
                    let history =
                        ConversationHistory::new(root_id, message.author_id, self.timeout, &self.seed);
                    let shared = Arc::new(AsyncMutex::new(history));
                    registry.histories.insert(
                        root_id,
                        Slot {
                            started_by: message.author_id,
                            history: shared.clone(),
                        },
                    );
                    registry.message_index.insert(root_id, root_id);
                    (shared, true)
                }
            }
        };

        let guard = shared.clone().lock_owned().await;
        let lease = ConversationLease { shared, guard };
        if created {
            info!(
                "Conversation: started {} for user {} ({} live)",
                root_id,
                message.author_id,
                self.len()
            );
            Resolved::Started(lease)
        } else {
            debug!("Conversation: {} already exists, reusing", root_id);
            Resolved::Existing(lease)
        }
    }

    async fn lease_existing(&self, reference: MessageId) -> Result<ConversationLease, ConversationError> {
        let shared = {
            let registry = self.registry();
            registry
                .message_index
                .get(&reference)
                .and_then(|root| registry.histories.get(root))
                .map(|slot| slot.history.clone())
        };
        let Some(shared) = shared else {
            debug!("Conversation: no conversation for referenced message {}", reference);
            return Err(ConversationError::NotFound(reference));
        };

        let guard = shared.clone().lock_owned().await;
        let lease = ConversationLease { shared, guard };
        self.evict_if_expired(&lease)?;
        Ok(lease)
    }

    /// Lazy expiry check, done on every lookup of an existing conversation.
    fn evict_if_expired(&self, lease: &ConversationLease) -> Result<(), ConversationError> {
        let root_id = lease.root_id();
        if !lease.is_expired(Instant::now()) {
            return Ok(());
        }
        let mut registry = self.registry();
        if registry.is_current(root_id, &lease.shared) {
            registry.remove_roots(&HashSet::from([root_id]));
        }
        info!("Conversation: {} expired on access, evicted", root_id);
        Err(ConversationError::NotFound(root_id))
    }

    /// Append the inbound message to the leased conversation and return the prompt-ready turns.
    ///
    /// `None` when the message is already part of the conversation (a redelivered event);
    /// nothing is appended and no reply should be generated.
    pub fn append_and_get(&self, lease: &mut ConversationLease, message: &IncomingMessage) -> Option<Vec<Turn>> {
        if lease.contains_message(message.id) {
            debug!(
                "Conversation: message {} already in conversation {}, skipping",
                message.id,
                lease.root_id()
            );
            return None;
        }
        let role = Role::from_author(message.author_is_bot);
        lease.guard.append(role, message.content.clone(), Some(message.id));
        self.index(lease, message.id);
        Some(lease.guard.snapshot())
    }

    /// Add a reply to a live conversation without asking for a completion.
    ///
    /// Returns the conversation root when the message was appended. Never starts a
    /// conversation: no reference, an unknown or expired one, or a redelivery yields `None`.
    pub async fn observe(&self, message: &IncomingMessage) -> Option<MessageId> {
        let reference = message.reply_to?;
        let mut lease = match self.lease_existing(reference).await {
            Ok(lease) => lease,
            Err(e) => {
                debug!("Conversation: not observing message {}: {}", message.id, e);
                return None;
            }
        };
        self.append_and_get(&mut lease, message)?;
        Some(lease.root_id())
    }

    /// Remember a delivered bot reply so replies to it continue this conversation.
    pub fn link_reply(&self, lease: &mut ConversationLease, message_id: MessageId) {
        lease.guard.link(message_id);
        self.index(lease, message_id);
    }

    fn index(&self, lease: &ConversationLease, message_id: MessageId) {
        let root_id = lease.root_id();
        let mut registry = self.registry();
        // A conversation deleted while leased stays unreachable.
        if registry.is_current(root_id, &lease.shared) {
            registry.message_index.insert(message_id, root_id);
        }
    }

    /// Remove the conversation. No-op when absent.
    pub fn delete(&self, root_id: MessageId) -> bool {
        let mut registry = self.registry();
        if !registry.histories.contains_key(&root_id) {
            debug!("Conversation: delete {} (not present)", root_id);
            return false;
        }
        registry.remove_roots(&HashSet::from([root_id]));
        info!("Conversation: deleted {}", root_id);
        true
    }

    /// Clear the conversation back to its seed, keeping it live. No-op when absent.
    pub async fn reset(&self, root_id: MessageId) -> bool {
        let shared = {
            let registry = self.registry();
            registry.histories.get(&root_id).map(|slot| slot.history.clone())
        };
        let Some(shared) = shared else {
            debug!("Conversation: reset {} (not present)", root_id);
            return false;
        };
        shared.lock().await.reset(&self.seed);
        let mut registry = self.registry();
        registry
            .message_index
            .retain(|id, root| *root != root_id || *id == root_id);
        info!("Conversation: reset {}", root_id);
        true
    }

    /// Remove every conversation whose root message was written by `user_id`.
    pub fn delete_started_by(&self, user_id: UserId) -> usize {
        let mut registry = self.registry();
        let roots: HashSet<MessageId> = registry
            .histories
            .iter()
            .filter(|(_, slot)| slot.started_by == user_id)
            .map(|(root, _)| *root)
            .collect();
        registry.remove_roots(&roots);
        if !roots.is_empty() {
            info!("Conversation: deleted {} conversation(s) started by {}", roots.len(), user_id);
        }
        roots.len()
    }

    /// Evict every expired conversation that is not currently leased.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut registry = self.registry();
        let expired: HashSet<MessageId> = registry
            .histories
            .iter()
            .filter(|(_, slot)| match slot.history.try_lock() {
                Ok(history) => history.is_expired(now),
                Err(_) => false,
            })
            .map(|(root, _)| *root)
            .collect();
        registry.remove_roots(&expired);
        if !expired.is_empty() {
            info!(
                "Conversation: sweep evicted {} ({} live)",
                expired.len(),
                registry.histories.len()
            );
        }
        expired.len()
    }

    /// Run [`sweep`](Self::sweep) every `interval` on the current tokio runtime.
    pub fn spawn_sweeper(manager: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        info!("Conversation: sweeping every {:?}", interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.sweep();
            }
        })
    }
}
