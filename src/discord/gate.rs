//! Opt-in role gate.
//!
//! In a guild, the bot answers only members holding the configured role. DMs always pass,
//! and no configured role name disables the gate.

use serenity::client::Context;
use serenity::model::channel::Message;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    Denied,
}

#[derive(Debug, Clone, Default)]
pub struct OptInGate {
    role_name: Option<String>,
}

impl OptInGate {
    pub fn new(role_name: Option<String>) -> Self {
        let role_name = role_name.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        Self { role_name }
    }

    pub fn role_name(&self) -> Option<&str> {
        self.role_name.as_deref()
    }

    /// Decide from the names of the member's roles. `in_guild == false` means a DM.
    pub fn decide<'a, I>(&self, in_guild: bool, member_roles: I) -> GateDecision
    where
        I: IntoIterator<Item = &'a str>,
    {
        let Some(required) = self.role_name.as_deref() else {
            return GateDecision::Allowed;
        };
        if !in_guild || member_roles.into_iter().any(|name| name == required) {
            GateDecision::Allowed
        } else {
            GateDecision::Denied
        }
    }

    pub fn refusal(&self) -> String {
        match self.role_name.as_deref() {
            Some(role) => format!(
                "You need to opt in to interact with the bot. Ask a moderator for the `{}` role.",
                role
            ),
            None => "You need to opt in to interact with the bot.".to_string(),
        }
    }

    /// Check the author of `msg`. Role names come from the guild's role list over HTTP.
    /// A lookup failure denies.
    pub async fn check(&self, ctx: &Context, msg: &Message) -> GateDecision {
        let (Some(required), Some(guild_id)) = (self.role_name.as_deref(), msg.guild_id) else {
            return GateDecision::Allowed;
        };

        let role_ids = match msg.member.as_ref() {
            Some(member) => member.roles.clone(),
            None => match guild_id.member(ctx, msg.author.id).await {
                Ok(member) => member.roles,
                Err(e) => {
                    warn!("Discord: cannot fetch member {} in guild {}: {}", msg.author.id, guild_id, e);
                    return GateDecision::Denied;
                }
            },
        };
        let guild_roles = match guild_id.roles(&ctx.http).await {
            Ok(roles) => roles,
            Err(e) => {
                warn!("Discord: cannot fetch roles of guild {}: {}", guild_id, e);
                return GateDecision::Denied;
            }
        };

        let names = role_ids
            .iter()
            .filter_map(|id| guild_roles.get(id))
            .map(|role| role.name.as_str());
        let decision = self.decide(true, names);
        debug!(
            "Discord: gate for {} in guild {} (role {:?}): {:?}",
            msg.author.id, guild_id, required, decision
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_with_role_allowed() {
        let gate = OptInGate::new(Some("AI Trainer".to_string()));
        assert_eq!(gate.decide(true, ["Member", "AI Trainer"]), GateDecision::Allowed);
    }

    #[test]
    fn member_without_role_denied() {
        let gate = OptInGate::new(Some("AI Trainer".to_string()));
        assert_eq!(gate.decide(true, ["Member", "ai trainer"]), GateDecision::Denied);
        assert_eq!(gate.decide(true, std::iter::empty::<&str>()), GateDecision::Denied);
        assert!(gate.refusal().contains("`AI Trainer`"));
    }

    #[test]
    fn dm_bypasses_gate() {
        let gate = OptInGate::new(Some("AI Trainer".to_string()));
        assert_eq!(gate.decide(false, std::iter::empty::<&str>()), GateDecision::Allowed);
    }

    #[test]
    fn no_role_configured_disables_gate() {
        for gate in [OptInGate::new(None), OptInGate::new(Some("  ".to_string()))] {
            assert_eq!(gate.role_name(), None);
            assert_eq!(gate.decide(true, std::iter::empty::<&str>()), GateDecision::Allowed);
        }
    }
}
