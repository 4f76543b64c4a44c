//! Command parsing and dispatch.
//!
//! Non-command text takes the auto-reply path. Command text is matched
//! against a static registry of descriptors; the registry enforces the
//! group-only flag and minimum arity, handlers do the rest. Handler
//! outcomes are rendered uniformly: replies get delivered, failures become
//! user-facing guidance, and nothing escapes a single event's processing.

use tracing::{debug, info, warn};

use crate::bot::commands::{self, HandlerError, Reply};
use crate::bot::event::InboundMessage;
use crate::bot::jid::ChatId;
use crate::bot::media::MediaConverter;
use crate::bot::state::SessionState;
use crate::bot::transport::Transport;

pub const UNKNOWN_REPLY: &str = "Unknown command. Send !menu for the list.";
pub const GROUP_ONLY_REPLY: &str = "That one only works in groups.";

/// A parsed command: lower-cased name plus its arguments in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
}

/// Parse command text. Only text starting with the prefix character parses;
/// a bare prefix with no name does not.
pub fn parse_command(text: &str, prefix: char) -> Option<Command> {
    let rest = text.strip_prefix(prefix)?;
    let mut parts = rest.split_whitespace();
    let name = parts.next()?.to_lowercase();
    let args = parts.map(str::to_string).collect();
    Some(Command { name, args })
}

/// Everything a handler may touch.
pub struct CommandContext<'a> {
    pub msg: &'a InboundMessage,
    pub state: &'a SessionState,
    pub transport: &'a dyn Transport,
    pub media: &'a dyn MediaConverter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Menu,
    SetReply,
    TagAll,
    TagAdmins,
    Ban,
    Kick,
    KickAll,
    Add,
    Mute,
    GroupInfo,
    Status,
    Sticker,
    AutoReply,
    GroupPic,
    Poll,
    Big,
}

/// One registered command.
pub struct CommandSpec {
    pub name: &'static str,
    pub kind: CommandKind,
    pub group_only: bool,
    pub min_args: usize,
    pub usage: &'static str,
    pub help: &'static str,
}

pub static REGISTRY: [CommandSpec; 16] = [
    CommandSpec { name: "menu", kind: CommandKind::Menu, group_only: false, min_args: 0, usage: "!menu", help: "show this menu" },
    CommandSpec { name: "setreply", kind: CommandKind::SetReply, group_only: false, min_args: 1, usage: "!setreply <text>", help: "change the auto-reply text" },
    CommandSpec { name: "tagall", kind: CommandKind::TagAll, group_only: true, min_args: 0, usage: "!tagall", help: "mention everyone in the group" },
    CommandSpec { name: "tagadmins", kind: CommandKind::TagAdmins, group_only: true, min_args: 0, usage: "!tagadmins", help: "mention the group admins" },
    CommandSpec { name: "ban", kind: CommandKind::Ban, group_only: false, min_args: 0, usage: "!ban @user", help: "make me ignore someone" },
    CommandSpec { name: "kick", kind: CommandKind::Kick, group_only: true, min_args: 0, usage: "!kick @user", help: "remove someone from the group" },
    CommandSpec { name: "kickall", kind: CommandKind::KickAll, group_only: true, min_args: 0, usage: "!kickall", help: "remove everyone but you" },
    CommandSpec { name: "add", kind: CommandKind::Add, group_only: true, min_args: 1, usage: "!add <phone>", help: "add a number to the group" },
    CommandSpec { name: "mute", kind: CommandKind::Mute, group_only: true, min_args: 0, usage: "!mute @user", help: "demote someone to plain member" },
    CommandSpec { name: "groupinfo", kind: CommandKind::GroupInfo, group_only: true, min_args: 0, usage: "!groupinfo", help: "show group details" },
    CommandSpec { name: "status", kind: CommandKind::Status, group_only: false, min_args: 0, usage: "!status @user", help: "show someone's presence" },
    CommandSpec { name: "sticker", kind: CommandKind::Sticker, group_only: false, min_args: 0, usage: "!sticker", help: "turn an image or video into a sticker" },
    CommandSpec { name: "autoreply", kind: CommandKind::AutoReply, group_only: false, min_args: 1, usage: "!autoreply on|off", help: "toggle the auto-reply" },
    CommandSpec { name: "grouppic", kind: CommandKind::GroupPic, group_only: true, min_args: 0, usage: "!grouppic", help: "fetch the group photo" },
    CommandSpec { name: "poll", kind: CommandKind::Poll, group_only: false, min_args: 1, usage: "!poll <question>", help: "start a poll" },
    CommandSpec { name: "big", kind: CommandKind::Big, group_only: false, min_args: 0, usage: "!big", help: "shout" },
];

pub fn find(name: &str) -> Option<&'static CommandSpec> {
    REGISTRY.iter().find(|spec| spec.name == name)
}

/// Route one normalized message. Never fails; every outcome ends as a sent
/// reply, a logged warning, or silence.
pub async fn route(
    msg: &InboundMessage,
    state: &SessionState,
    transport: &dyn Transport,
    media: &dyn MediaConverter,
    prefix: char,
) {
    let Some(command) = parse_command(&msg.text, prefix) else {
        auto_reply(msg, state, transport).await;
        return;
    };

    let Some(spec) = find(&command.name) else {
        debug!("Unknown command '{}' from {}", command.name, msg.sender);
        send(transport, &msg.chat, UNKNOWN_REPLY).await;
        return;
    };

    if spec.group_only && !msg.is_group {
        send(transport, &msg.chat, GROUP_ONLY_REPLY).await;
        return;
    }
    if command.args.len() < spec.min_args {
        send(transport, &msg.chat, &format!("Usage: {}", spec.usage)).await;
        return;
    }

    info!("Running !{} for {}", spec.name, msg.sender);
    let ctx = CommandContext {
        msg,
        state,
        transport,
        media,
    };
    match dispatch(spec, &ctx, &command.args).await {
        Ok(reply) => deliver(transport, &msg.chat, reply).await,
        Err(e) => {
            warn!("!{} failed: {e}", spec.name);
            send(transport, &msg.chat, &e.user_text()).await;
        }
    }
}

async fn dispatch(
    spec: &CommandSpec,
    ctx: &CommandContext<'_>,
    args: &[String],
) -> Result<Reply, HandlerError> {
    match spec.kind {
        CommandKind::Menu => commands::menu(ctx, args).await,
        CommandKind::SetReply => commands::setreply(ctx, args).await,
        CommandKind::TagAll => commands::tagall(ctx, args).await,
        CommandKind::TagAdmins => commands::tagadmins(ctx, args).await,
        CommandKind::Ban => commands::ban(ctx, args).await,
        CommandKind::Kick => commands::kick(ctx, args).await,
        CommandKind::KickAll => commands::kickall(ctx, args).await,
        CommandKind::Add => commands::add(ctx, args).await,
        CommandKind::Mute => commands::mute(ctx, args).await,
        CommandKind::GroupInfo => commands::groupinfo(ctx, args).await,
        CommandKind::Status => commands::status(ctx, args).await,
        CommandKind::Sticker => commands::sticker(ctx, args).await,
        CommandKind::AutoReply => commands::autoreply(ctx, args).await,
        CommandKind::GroupPic => commands::grouppic(ctx, args).await,
        CommandKind::Poll => commands::poll(ctx, args).await,
        CommandKind::Big => commands::big(ctx, args).await,
    }
}

/// The plain-message path: auto-reply unless disabled or the sender is
/// banned.
async fn auto_reply(msg: &InboundMessage, state: &SessionState, transport: &dyn Transport) {
    if !state.auto_reply_enabled() || state.is_banned(&msg.sender) {
        return;
    }
    let text = state.auto_reply_text();
    send(transport, &msg.chat, &text).await;
}

async fn deliver(transport: &dyn Transport, chat: &ChatId, reply: Reply) {
    let result = match reply {
        Reply::Silent => return,
        Reply::Text(text) => transport.send_text(chat, &text, &[]).await,
        Reply::Mentions { text, mentions } => {
            transport.send_text(chat, &text, &mentions).await
        }
        Reply::Media { payload, options } => {
            transport.send_media(chat, payload, options).await
        }
    };
    if let Err(e) = result {
        warn!("Failed to deliver reply to {chat}: {e}");
    }
}

async fn send(transport: &dyn Transport, chat: &ChatId, text: &str) {
    if let Err(e) = transport.send_text(chat, text, &[]).await {
        warn!("Failed to send to {chat}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_text_is_not_a_command() {
        assert_eq!(parse_command("hello there", '!'), None);
        assert_eq!(parse_command("", '!'), None);
        assert_eq!(parse_command("ban @5551234", '!'), None);
    }

    #[test]
    fn test_parse_bare_prefix_is_not_a_command() {
        assert_eq!(parse_command("!", '!'), None);
        assert_eq!(parse_command("!   ", '!'), None);
    }

    #[test]
    fn test_parse_name_and_args() {
        let cmd = parse_command("!ban @5551234 spamming", '!').unwrap();
        assert_eq!(cmd.name, "ban");
        assert_eq!(cmd.args, vec!["@5551234", "spamming"]);
    }

    #[test]
    fn test_parse_name_is_case_insensitive() {
        let cmd = parse_command("!MeNu", '!').unwrap();
        assert_eq!(cmd.name, "menu");
    }

    #[test]
    fn test_parse_respects_configured_prefix() {
        assert!(parse_command("!menu", '.').is_none());
        assert_eq!(parse_command(".menu", '.').unwrap().name, "menu");
    }

    #[test]
    fn test_registry_names_are_unique() {
        for (i, a) in REGISTRY.iter().enumerate() {
            for b in REGISTRY.iter().skip(i + 1) {
                assert_ne!(a.name, b.name, "duplicate command name");
            }
        }
    }

    #[test]
    fn test_registry_lookup() {
        assert!(find("menu").is_some());
        assert!(find("tagall").unwrap().group_only);
        assert!(!find("ban").unwrap().group_only);
        assert_eq!(find("setreply").unwrap().min_args, 1);
        assert!(find("frobnicate").is_none());
    }

    #[test]
    fn test_every_group_action_command_is_group_only() {
        for name in ["kick", "kickall", "add", "mute", "tagall", "tagadmins", "groupinfo", "grouppic"] {
            assert!(find(name).unwrap().group_only, "{name} must be group-only");
        }
    }
}
