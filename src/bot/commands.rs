//! Command handlers.
//!
//! One handler per command. Handlers return a typed outcome: a [`Reply`] for
//! the router to deliver, or a [`HandlerError`] the router renders as
//! user-facing guidance. Nothing in here is allowed to take the session down.

use tracing::warn;

use crate::bot::event::{InboundMessage, MembershipChange, MembershipKind};
use crate::bot::jid::{UserId, normalize_phone};
use crate::bot::media::MediaError;
use crate::bot::router::{CommandContext, REGISTRY};
use crate::bot::transport::{
    GroupAction, MediaPayload, SendOptions, Transport, TransportError,
};

const BIG_TEXT: &str = "📢 T H I S   I S   B I G 📢";

/// What a handler wants sent back to the conversation.
#[derive(Debug)]
pub enum Reply {
    /// Nothing. Some moderation commands confirm by their effect.
    Silent,
    Text(String),
    Mentions { text: String, mentions: Vec<UserId> },
    Media { payload: MediaPayload, options: SendOptions },
}

#[derive(Debug)]
pub enum HandlerError {
    /// No mention, quote, or phone-like argument to act on.
    NoTarget,
    /// The command needs an image or video on the message.
    NoMedia,
    BadArgument(&'static str),
    Transport(TransportError),
    Media(MediaError),
}

impl HandlerError {
    /// The line the conversation sees when a handler fails.
    pub fn user_text(&self) -> String {
        match self {
            Self::NoTarget => {
                "Mention someone, reply to their message, or give me a number.".to_string()
            }
            Self::NoMedia => {
                "Send an image or video together with the command.".to_string()
            }
            Self::BadArgument(guidance) => (*guidance).to_string(),
            Self::Transport(TransportError::MissingPrivilege) => {
                "I couldn't do that. Make sure I'm an admin here.".to_string()
            }
            Self::Transport(TransportError::NotFound(_)) => {
                "I couldn't find that chat or user.".to_string()
            }
            Self::Transport(TransportError::Unsupported(what)) => {
                format!("Can't do that on this network ({what}).")
            }
            Self::Transport(_) => {
                "Something went wrong talking to the server. Try again.".to_string()
            }
            Self::Media(_) => "I couldn't turn that into a sticker.".to_string(),
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoTarget => write!(f, "no resolvable target"),
            Self::NoMedia => write!(f, "no media payload"),
            Self::BadArgument(guidance) => write!(f, "bad argument: {guidance}"),
            Self::Transport(e) => write!(f, "{e}"),
            Self::Media(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<TransportError> for HandlerError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<MediaError> for HandlerError {
    fn from(e: MediaError) -> Self {
        Self::Media(e)
    }
}

type HandlerResult = Result<Reply, HandlerError>;

/// Who a moderation command acts on: the first mention, else the sender of
/// the quoted message, else a phone-like argument.
fn resolve_target(msg: &InboundMessage, args: &[String]) -> Result<UserId, HandlerError> {
    if let Some(mentioned) = msg.mentions.first() {
        return Ok(mentioned.clone());
    }
    if let Some(quoted) = &msg.quoted_sender {
        return Ok(quoted.clone());
    }
    args.first()
        .and_then(|arg| normalize_phone(arg))
        .ok_or(HandlerError::NoTarget)
}

pub(crate) async fn menu(_ctx: &CommandContext<'_>, _args: &[String]) -> HandlerResult {
    let mut text = String::from("🤖 Here's what I can do:\n");
    for spec in REGISTRY.iter() {
        text.push_str(&format!("{} — {}\n", spec.usage, spec.help));
    }
    Ok(Reply::Text(text))
}

pub(crate) async fn setreply(ctx: &CommandContext<'_>, args: &[String]) -> HandlerResult {
    let text = args.join(" ");
    ctx.state.set_auto_reply_text(text.clone());
    Ok(Reply::Text(format!("✅ Auto-reply set to: {text}")))
}

pub(crate) async fn tagall(ctx: &CommandContext<'_>, _args: &[String]) -> HandlerResult {
    let meta = ctx.transport.group_metadata(&ctx.msg.chat).await?;
    let text = meta
        .members
        .iter()
        .map(|m| format!("@{}", m.id.local()))
        .collect::<Vec<_>>()
        .join(" ");
    let mentions = meta.members.into_iter().map(|m| m.id).collect();
    Ok(Reply::Mentions { text, mentions })
}

pub(crate) async fn tagadmins(ctx: &CommandContext<'_>, _args: &[String]) -> HandlerResult {
    let meta = ctx.transport.group_metadata(&ctx.msg.chat).await?;
    let admins: Vec<UserId> = meta
        .members
        .into_iter()
        .filter(|m| m.is_admin)
        .map(|m| m.id)
        .collect();
    let text = admins
        .iter()
        .map(|id| format!("@{}", id.local()))
        .collect::<Vec<_>>()
        .join(" ");
    Ok(Reply::Mentions {
        text,
        mentions: admins,
    })
}

pub(crate) async fn ban(ctx: &CommandContext<'_>, args: &[String]) -> HandlerResult {
    let target = resolve_target(ctx.msg, args)?;
    ctx.state.ban(target.clone());
    Ok(Reply::Mentions {
        text: format!("🚫 @{} is banned. I won't reply to them anymore.", target.local()),
        mentions: vec![target],
    })
}

pub(crate) async fn kick(ctx: &CommandContext<'_>, args: &[String]) -> HandlerResult {
    let target = resolve_target(ctx.msg, args)?;
    ctx.transport
        .update_membership(&ctx.msg.chat, std::slice::from_ref(&target), GroupAction::Remove)
        .await?;
    Ok(Reply::Silent)
}

pub(crate) async fn kickall(ctx: &CommandContext<'_>, _args: &[String]) -> HandlerResult {
    let meta = ctx.transport.group_metadata(&ctx.msg.chat).await?;
    // One at a time; the network rejects bulk removals.
    for member in meta.members {
        if member.id == ctx.msg.sender {
            continue;
        }
        ctx.transport
            .update_membership(
                &ctx.msg.chat,
                std::slice::from_ref(&member.id),
                GroupAction::Remove,
            )
            .await?;
    }
    Ok(Reply::Silent)
}

pub(crate) async fn add(ctx: &CommandContext<'_>, args: &[String]) -> HandlerResult {
    let target = args
        .first()
        .and_then(|arg| normalize_phone(arg))
        .ok_or(HandlerError::BadArgument(
            "That doesn't look like a phone number.",
        ))?;
    ctx.transport
        .update_membership(&ctx.msg.chat, &[target], GroupAction::Add)
        .await?;
    Ok(Reply::Silent)
}

pub(crate) async fn mute(ctx: &CommandContext<'_>, args: &[String]) -> HandlerResult {
    let target = resolve_target(ctx.msg, args)?;
    ctx.transport
        .update_membership(&ctx.msg.chat, &[target], GroupAction::Demote)
        .await?;
    Ok(Reply::Silent)
}

pub(crate) async fn groupinfo(ctx: &CommandContext<'_>, _args: &[String]) -> HandlerResult {
    let meta = ctx.transport.group_metadata(&ctx.msg.chat).await?;
    let created = meta
        .created_at
        .and_then(|epoch| chrono::DateTime::from_timestamp(epoch, 0))
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    Ok(Reply::Text(format!(
        "📋 {}\nCreated: {}\nMembers: {}",
        meta.subject,
        created,
        meta.members.len()
    )))
}

pub(crate) async fn status(ctx: &CommandContext<'_>, args: &[String]) -> HandlerResult {
    let target = resolve_target(ctx.msg, args)?;
    let presence = ctx.transport.presence(&target).await?;
    Ok(Reply::Text(
        presence.unwrap_or_else(|| "Unavailable".to_string()),
    ))
}

pub(crate) async fn sticker(ctx: &CommandContext<'_>, _args: &[String]) -> HandlerResult {
    let media = ctx.msg.media.as_ref().ok_or(HandlerError::NoMedia)?;
    let bytes = ctx.media.to_sticker(media).await?;
    Ok(Reply::Media {
        payload: MediaPayload::Sticker(bytes),
        options: SendOptions {
            quote: Some(ctx.msg.id.clone()),
            caption: None,
        },
    })
}

pub(crate) async fn autoreply(ctx: &CommandContext<'_>, args: &[String]) -> HandlerResult {
    let enabled = match args[0].to_lowercase().as_str() {
        "on" => true,
        "off" => false,
        _ => {
            return Err(HandlerError::BadArgument(
                "Say !autoreply on or !autoreply off.",
            ));
        }
    };
    ctx.state.set_auto_reply(enabled);
    Ok(Reply::Text(format!(
        "Auto-reply is now {}.",
        if enabled { "on" } else { "off" }
    )))
}

pub(crate) async fn grouppic(ctx: &CommandContext<'_>, _args: &[String]) -> HandlerResult {
    match ctx.transport.profile_photo_url(&ctx.msg.chat).await? {
        Some(url) => Ok(Reply::Media {
            payload: MediaPayload::ImageUrl(url),
            options: SendOptions::default(),
        }),
        None => Ok(Reply::Text("No group photo set.".to_string())),
    }
}

pub(crate) async fn poll(ctx: &CommandContext<'_>, args: &[String]) -> HandlerResult {
    let question = args.join(" ");
    ctx.state.set_poll(question.clone());
    Ok(Reply::Text(format!("📊 Poll started: {question}")))
}

pub(crate) async fn big(_ctx: &CommandContext<'_>, _args: &[String]) -> HandlerResult {
    Ok(Reply::Text(BIG_TEXT.to_string()))
}

/// Greet members that joined a group. Runs straight off the event loop;
/// membership changes never pass through the router.
pub async fn send_welcome(transport: &dyn Transport, change: &MembershipChange, text: &str) {
    if change.kind != MembershipKind::Joined {
        return;
    }
    for member in &change.members {
        let line = format!("@{} {}", member.local(), text);
        if let Err(e) = transport
            .send_text(&change.chat, &line, std::slice::from_ref(member))
            .await
        {
            warn!("Failed to welcome {}: {e}", member);
        }
    }
}
