//! Discord Gateway integration.
//!
//! Connects to Discord as a bot and dispatches gateway events:
//! - messages with the command prefix, mentions, replies to the bot and DMs become
//!   [`Command`]s; free text goes through the opt-in gate, the conversation manager
//!   and the response generator, and the reply is sent back in chunks;
//! - 👍/👎 reactions on tracked replies are recorded as feedback;
//! - joining a guild creates the opt-in role and posts a welcome message.
//!
//! The token is never logged.

pub mod commands;
pub mod gate;
pub mod messaging;

pub use commands::Command;
pub use gate::{GateDecision, OptInGate};
pub use messaging::SendError;

use crate::config::BotConfig;
use crate::conversation::{ConversationManager, IncomingMessage};
use crate::feedback::{FeedbackAction, FeedbackKind, FeedbackTracker};
use crate::generator::ResponseGenerator;
use crate::logging::ellipse;
use crate::records::{FeedbackRecord, InteractionRecord, RecordLog, UserInteractionRecord};
use chrono::Utc;
use messaging::{add_feedback_reactions, send_chunks};
use serenity::builder::EditRole;
use serenity::client::{Client, Context, EventHandler};
use serenity::gateway::ShardManager;
use serenity::model::channel::{Message, Reaction, ReactionType};
use serenity::model::gateway::{GatewayIntents, Ready};
use serenity::model::guild::Guild;
use serenity::model::id::{MessageId, UserId};
use serenity::model::permissions::Permissions;
use serenity::model::user::User;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};

/// Shared shard manager for graceful disconnect on shutdown (bot appears offline).
static DISCORD_SHARD_MANAGER: OnceLock<Arc<ShardManager>> = OnceLock::new();

/// Longest prompt/reply excerpt written to the log.
const LOG_MAX: usize = 500;

const APOLOGY: &str = "Sorry, I couldn't generate a reply right now. Please try again later.";

/// Command for a message, or `None` when the bot should not act on it.
///
/// A prefixed message is always a command. Without the prefix, a message addressed to
/// the bot (DM, mention, reply to one of its messages) is free text, with the bot's
/// mentions removed.
pub(crate) fn command_for(prefix: &str, content: &str, bot_id: u64, addressed: bool) -> Option<Command> {
    if let Some(command) = Command::parse(prefix, content) {
        return Some(command);
    }
    if !addressed {
        return None;
    }
    let text = commands::strip_bot_mentions(content, bot_id);
    Some(Command::parse(prefix, &text).unwrap_or(Command::Ask(text)))
}

fn display_name(user: &User) -> &str {
    user.global_name.as_deref().unwrap_or(&user.name)
}

fn welcome_text(guild_name: &str, role_name: Option<&str>, prefix: &str) -> String {
    match role_name {
        Some(role) => format!(
            "Hello {}! I'm your new AI assistant bot. To interact with me, assign yourself the '{}' role. \
             Use `{}help` to see the available commands.",
            guild_name, role, prefix
        ),
        None => format!(
            "Hello {}! I'm your new AI assistant bot. Use `{}help` to see the available commands.",
            guild_name, prefix
        ),
    }
}

pub struct Handler {
    /// Set on Ready, used to filter self and mentions.
    bot_id: OnceLock<UserId>,
    prefix: String,
    privacy_policy: String,
    gate: OptInGate,
    conversations: Arc<ConversationManager>,
    generator: ResponseGenerator,
    feedback: FeedbackTracker,
    records: RecordLog,
}

impl Handler {
    pub fn new(config: &BotConfig, conversations: Arc<ConversationManager>, generator: ResponseGenerator) -> Self {
        let records = RecordLog::new(config.records_dir());
        info!("Discord: records go to {}", records.dir().display());
        Self {
            bot_id: OnceLock::new(),
            prefix: config.command_prefix.clone(),
            privacy_policy: commands::privacy_policy(config.privacy_policy_file.as_deref()),
            gate: OptInGate::new(config.opt_in_role.clone()),
            conversations,
            generator,
            feedback: FeedbackTracker::default(),
            records,
        }
    }

    async fn reply(&self, ctx: &Context, msg: &Message, text: &str) {
        if let Err(e) = send_chunks(&ctx.http, msg.channel_id, Some(msg.id), text).await {
            error!("Discord: failed to reply to {}: {}", msg.id, e);
        }
    }

    async fn send_dm(&self, ctx: &Context, user: &User, text: &str) {
        match user.create_dm_channel(ctx).await {
            Ok(channel) => {
                if let Err(e) = send_chunks(&ctx.http, channel.id, None, text).await {
                    error!("Discord: failed to DM {}: {}", user.id, e);
                }
            }
            Err(e) => error!("Discord: cannot open DM with {}: {}", user.id, e),
        }
    }

    /// A reply that does not ask the bot anything: kept in the conversation it replies to, never answered.
    async fn observe_reply(&self, msg: &Message, reply_to: Option<MessageId>) {
        if reply_to.is_none() {
            return;
        }
        let incoming = IncomingMessage {
            id: msg.id.get(),
            author_id: msg.author.id.get(),
            author_is_bot: msg.author.bot,
            author_is_self: false,
            reply_to: reply_to.map(MessageId::get),
            content: msg.content.clone(),
        };
        if let Some(root) = self.conversations.observe(&incoming).await {
            debug!("Discord: message {} from {} added to conversation {}", msg.id, msg.author.id, root);
        }
    }

    async fn end_conversation(&self, ctx: &Context, msg: &Message, reply_to: Option<MessageId>) {
        let removed = match reply_to.and_then(|id| self.conversations.root_of(id.get())) {
            Some(root) => usize::from(self.conversations.delete(root)),
            None => self.conversations.delete_started_by(msg.author.id.get()),
        };
        info!("Discord: {} ended {} conversation(s)", msg.author.id, removed);
        let text = if removed == 0 {
            "There is no active conversation to end."
        } else {
            "Conversation ended. Start a new one any time."
        };
        self.reply(ctx, msg, text).await;
    }

    async fn converse(&self, ctx: &Context, msg: &Message, text: String, reply_to: Option<MessageId>) {
        if text.is_empty() {
            let hint = format!("What would you like to ask? Try `{}help`.", self.prefix);
            self.reply(ctx, msg, &hint).await;
            return;
        }
        if self.gate.check(ctx, msg).await == GateDecision::Denied {
            info!("Discord: {} denied by opt-in gate", msg.author.id);
            self.reply(ctx, msg, &self.gate.refusal()).await;
            return;
        }

        let incoming = IncomingMessage {
            id: msg.id.get(),
            author_id: msg.author.id.get(),
            author_is_bot: false,
            author_is_self: false,
            reply_to: reply_to.map(MessageId::get),
            content: text,
        };
        let resolved = match self.conversations.resolve(&incoming).await {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!("Discord: {}, starting a new conversation at {}", e, msg.id);
                self.conversations.start(&incoming).await
            }
        };
        let Some(mut lease) = resolved.into_lease() else {
            return;
        };
        if self.conversations.append_and_get(&mut lease, &incoming).is_none() {
            debug!("Discord: message {} already handled, not answering again", msg.id);
            return;
        }

        info!(
            "Discord→{}: conversation {} from {}: {}",
            self.generator.backend_name(),
            lease.root_id(),
            msg.author.name,
            ellipse(&incoming.content, LOG_MAX)
        );
        if let Err(e) = msg.channel_id.broadcast_typing(&ctx.http).await {
            debug!("Discord: typing indicator failed: {}", e);
        }

        let hint = format!(
            "The latest message is from a Discord member named {} (<@{}>).",
            display_name(&msg.author),
            msg.author.id
        );
        let generated = match self.generator.generate(&mut lease, Some(&hint)).await {
            Ok(g) => g,
            Err(e) => {
                error!("Discord: failed to generate reply for conversation {}: {}", lease.root_id(), e);
                self.reply(ctx, msg, APOLOGY).await;
                return;
            }
        };
        info!(
            "Discord←{}: received ({} chars): {}",
            self.generator.backend_name(),
            generated.text.chars().count(),
            ellipse(&generated.text, LOG_MAX)
        );

        match send_chunks(&ctx.http, msg.channel_id, Some(msg.id), &generated.text).await {
            Ok(sent) => {
                for message in &sent {
                    self.conversations.link_reply(&mut lease, message.id.get());
                }
                if let Some(last) = sent.last() {
                    self.feedback.track(last.id.get(), lease.root_id());
                    add_feedback_reactions(&ctx.http, last).await;
                }
            }
            Err(e) => error!("Discord: failed to send reply for conversation {}: {}", lease.root_id(), e),
        }

        self.records.record_interaction(&InteractionRecord {
            user_id: msg.author.id.get(),
            server_id: msg.guild_id.map(|g| g.get()),
            conversation_id: lease.root_id(),
            message_id: msg.id.get(),
            prompt: incoming.content,
            reply: generated.text,
            model: self.generator.model().to_string(),
            latency_ms: u64::try_from(generated.latency.as_millis()).unwrap_or(u64::MAX),
            tokens: generated.token_count,
            timestamp: Utc::now(),
        });
    }

    fn record_user_reply(&self, replied: &Message, msg: &Message) {
        info!("Discord: user {} replied to user {}", msg.author.id, replied.author.id);
        self.records.record_user_interaction(&UserInteractionRecord {
            replied_to_user_id: replied.author.id.get(),
            replied_to_user_name: display_name(&replied.author).to_string(),
            replied_to_message: replied.content.clone(),
            replying_user_id: msg.author.id.get(),
            replying_user_name: display_name(&msg.author).to_string(),
            replying_message: msg.content.clone(),
            timestamp: Utc::now(),
        });
    }

    fn on_feedback(&self, reaction: &Reaction, action: FeedbackAction) {
        let (Some(bot_id), Some(user_id)) = (self.bot_id.get(), reaction.user_id) else {
            return;
        };
        if user_id == *bot_id {
            return;
        }
        let ReactionType::Unicode(emoji) = &reaction.emoji else {
            return;
        };
        let Some(kind) = FeedbackKind::from_emoji(emoji) else {
            return;
        };
        let Some(conversation_id) = self.feedback.conversation_of(reaction.message_id.get()) else {
            debug!("Discord: {} on untracked message {}, ignoring", emoji, reaction.message_id);
            return;
        };
        info!(
            "Discord: feedback {:?} {:?} by {} on message {}",
            kind, action, user_id, reaction.message_id
        );
        self.records.record_feedback(&FeedbackRecord {
            user_id: user_id.get(),
            server_id: reaction.guild_id.map(|g| g.get()),
            message_id: reaction.message_id.get(),
            feedback_type: kind,
            action,
            conversation_id: Some(conversation_id),
            timestamp: Utc::now(),
        });
    }
}

#[serenity::async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, data_about_bot: Ready) {
        let id = data_about_bot.user.id;
        let _ = self.bot_id.set(id);
        info!(
            "Discord: Bot connected as {} (id: {}) in {} guild(s)",
            data_about_bot.user.name,
            id,
            data_about_bot.guilds.len()
        );
    }

    async fn guild_create(&self, ctx: Context, guild: Guild, is_new: Option<bool>) {
        let role_name = self.gate.role_name();
        let mut created = false;
        if let Some(role_name) = role_name {
            if !guild.roles.values().any(|r| r.name == role_name) {
                let builder = EditRole::new()
                    .name(role_name)
                    .permissions(Permissions::empty())
                    .audit_log_reason("Role for interacting with the AI bot");
                match guild.id.create_role(&ctx, builder).await {
                    Ok(role) => {
                        info!("Discord: created role \"{}\" ({}) in guild \"{}\"", role.name, role.id, guild.name);
                        created = true;
                    }
                    Err(e) => error!("Discord: failed to create role \"{}\" in guild \"{}\": {}", role_name, guild.name, e),
                }
            }
        }

        // Without the cache, `is_new` is unknown; a freshly created role marks a first join.
        if !(created || is_new == Some(true)) {
            debug!("Discord: guild \"{}\" ({}) available", guild.name, guild.id);
            return;
        }
        info!("Discord: joined guild \"{}\" ({})", guild.name, guild.id);
        let Some(channel_id) = guild.system_channel_id else {
            warn!("Discord: guild \"{}\" has no system channel, no welcome message", guild.name);
            return;
        };
        let text = welcome_text(&guild.name, role_name, &self.prefix);
        if let Err(e) = channel_id.say(&ctx, text).await {
            error!("Discord: failed to send welcome message to guild \"{}\": {}", guild.name, e);
        }
    }

    async fn message(&self, ctx: Context, new_message: Message) {
        let Some(bot_id) = self.bot_id.get().copied() else {
            debug!("Discord: Ignoring message (bot id not set yet)");
            return;
        };

        // Ignore our own messages
        if new_message.author.id == bot_id {
            return;
        }

        let reply_to = new_message.message_reference.as_ref().and_then(|r| r.message_id);
        if new_message.author.bot {
            self.observe_reply(&new_message, reply_to).await;
            return;
        }

        let replied = new_message.referenced_message.as_deref();
        let is_dm = new_message.guild_id.is_none();
        let mentions_bot = new_message.mentions.iter().any(|u| u.id == bot_id);
        let reply_to_bot = replied.is_some_and(|m| m.author.id == bot_id);
        let addressed = is_dm || mentions_bot || reply_to_bot;

        let Some(command) = command_for(&self.prefix, &new_message.content, bot_id.get(), addressed) else {
            self.observe_reply(&new_message, reply_to).await;
            if let Some(replied) = replied.filter(|m| !m.author.bot) {
                self.record_user_reply(replied, &new_message);
            }
            return;
        };

        info!(
            "Discord: {} from {} (channel {})",
            command.name(),
            new_message.author.name,
            new_message.channel_id
        );
        match command {
            Command::Help => {
                let text = commands::help_text(&self.prefix);
                self.send_dm(&ctx, &new_message.author, &text).await;
            }
            Command::Privacy => {
                self.send_dm(&ctx, &new_message.author, &self.privacy_policy).await;
            }
            Command::End => self.end_conversation(&ctx, &new_message, reply_to).await,
            Command::Ask(text) => self.converse(&ctx, &new_message, text, reply_to).await,
        }
    }

    async fn reaction_add(&self, _ctx: Context, add_reaction: Reaction) {
        self.on_feedback(&add_reaction, FeedbackAction::Added);
    }

    async fn reaction_remove(&self, _ctx: Context, removed_reaction: Reaction) {
        self.on_feedback(&removed_reaction, FeedbackAction::Removed);
    }
}

/// Run the Discord client until the gateway stops. Call from a tokio runtime.
pub async fn run_discord_client(token: &str, handler: Handler) -> Result<(), serenity::Error> {
    info!("Discord: Connecting to Discord Gateway (discord.com)…");

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::DIRECT_MESSAGE_REACTIONS
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(token, intents).event_handler(handler).await?;

    // Store shard manager so we can call shutdown_all() on exit.
    let _ = DISCORD_SHARD_MANAGER.set(client.shard_manager.clone());

    info!("Discord: Gateway client built, starting connection…");
    client.start().await
}

/// Disconnect from Discord so the bot appears offline. Returns false if the gateway
/// was never started. Safe to call more than once.
pub fn disconnect_discord() -> bool {
    let Some(manager) = DISCORD_SHARD_MANAGER.get() else {
        debug!("Discord: No shard manager (gateway was not started), skipping disconnect");
        return false;
    };
    info!("Discord: Logging off (shutting down gateway)…");
    let rt = match tokio::runtime::Runtime::new() {
        Ok(r) => r,
        Err(e) => {
            error!("Discord: Failed to create runtime for shutdown: {}", e);
            return false;
        }
    };
    rt.block_on(manager.shutdown_all());
    info!("Discord: Gateway shut down (bot offline)");
    true
}
