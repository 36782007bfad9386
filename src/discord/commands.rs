//! Bot commands.
//!
//! A message starting with the command prefix (default `gpt:`) is parsed once into
//! a [`Command`]; everything downstream matches on the enum.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::warn;

static USER_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@!?(\d+)>").expect("mention pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send the command list to the author by DM.
    Help,
    /// Send the privacy policy to the author by DM.
    Privacy,
    /// End the conversation (`end` or `clear`).
    End,
    /// Free text for the model.
    Ask(String),
}

impl Command {
    /// Parse a prefixed message. `None` when `content` does not start with `prefix`.
    ///
    /// Keywords match the whole remainder, case-insensitively: `gpt:help` is [`Command::Help`],
    /// `gpt:help me write a poem` is an [`Command::Ask`].
    pub fn parse(prefix: &str, content: &str) -> Option<Command> {
        let rest = content.trim_start().strip_prefix(prefix)?.trim();
        Some(match rest.to_lowercase().as_str() {
            "help" => Command::Help,
            "privacy" => Command::Privacy,
            "end" | "clear" => Command::End,
            _ => Command::Ask(rest.to_string()),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Help => "help",
            Command::Privacy => "privacy",
            Command::End => "end",
            Command::Ask(_) => "ask",
        }
    }
}

/// Remove mentions of `bot_id` from a message and collapse the leftover whitespace.
pub fn strip_bot_mentions(content: &str, bot_id: u64) -> String {
    let stripped = USER_MENTION.replace_all(content, |caps: &regex::Captures| {
        if caps[1].parse::<u64>().ok() == Some(bot_id) {
            String::new()
        } else {
            caps[0].to_string()
        }
    });
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn help_text(prefix: &str) -> String {
    format!(
        "Here are the commands you can use:\n\
         1. `{p}help` - Show this help message\n\
         2. `{p}privacy` - Show the privacy policy\n\
         3. `{p}end` (or `{p}clear`) - End your conversation with the bot\n\
         4. `{p}<your message>` - Send a message to the AI bot\n\
         You can also mention the bot, reply to one of its messages, or send it a DM.\n\
         React with 👍 or 👎 on a reply to tell us how it did.",
        p = prefix
    )
}

pub const DEFAULT_PRIVACY_POLICY: &str = "Privacy policy\n\n\
    Messages you send to this bot (with the command prefix, by mention, by reply or by DM) are \
    forwarded to a third-party language model provider to generate a reply.\n\
    The bot keeps a short-term memory of each conversation in RAM only; it is discarded after a \
    period of inactivity or when you use the end command.\n\
    Prompts, replies, your thumbs-up/down feedback and replies between members are stored with \
    your Discord user id to evaluate and improve the bot.\n\
    In servers, the bot only answers members who hold the opt-in role. Remove the role to opt out.";

/// Privacy policy text: the configured file, or the built-in text when unset or unreadable.
pub fn privacy_policy(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return DEFAULT_PRIVACY_POLICY.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            warn!("Discord: privacy policy file {} is empty, using built-in text", path.display());
            DEFAULT_PRIVACY_POLICY.to_string()
        }
        Err(e) => {
            warn!("Discord: cannot read privacy policy {}: {}", path.display(), e);
            DEFAULT_PRIVACY_POLICY.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keywords() {
        assert_eq!(Command::parse("gpt:", "gpt:help"), Some(Command::Help));
        assert_eq!(Command::parse("gpt:", "  gpt: PRIVACY "), Some(Command::Privacy));
        assert_eq!(Command::parse("gpt:", "gpt:end"), Some(Command::End));
        assert_eq!(Command::parse("gpt:", "gpt:clear"), Some(Command::End));
    }

    #[test]
    fn parse_free_text() {
        assert_eq!(
            Command::parse("gpt:", "gpt: what is rust?"),
            Some(Command::Ask("what is rust?".to_string()))
        );
        assert_eq!(
            Command::parse("gpt:", "gpt:help me write a poem"),
            Some(Command::Ask("help me write a poem".to_string()))
        );
        assert_eq!(Command::parse("gpt:", "gpt:"), Some(Command::Ask(String::new())));
    }

    #[test]
    fn parse_requires_prefix() {
        assert_eq!(Command::parse("gpt:", "hello gpt:help"), None);
        assert_eq!(Command::parse("gpt:", "GPT:help"), None);
        assert_eq!(Command::parse("!ai ", "!ai help"), Some(Command::Help));
    }

    #[test]
    fn strips_only_bot_mentions() {
        assert_eq!(strip_bot_mentions("<@42> hi there", 42), "hi there");
        assert_eq!(strip_bot_mentions("hey <@!42>   ping <@7>", 42), "hey ping <@7>");
        assert_eq!(strip_bot_mentions("<@42>", 42), "");
    }

    #[test]
    fn help_uses_prefix() {
        let help = help_text("!ai ");
        assert!(help.contains("`!ai help`"));
        assert!(help.contains("`!ai clear`"));
    }

    #[test]
    fn privacy_policy_file_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("privacy.txt");
        assert_eq!(privacy_policy(Some(&path)), DEFAULT_PRIVACY_POLICY);
        std::fs::write(&path, "Custom policy").unwrap();
        assert_eq!(privacy_policy(Some(&path)), "Custom policy");
        assert_eq!(privacy_policy(None), DEFAULT_PRIVACY_POLICY);
    }
}
