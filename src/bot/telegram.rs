//! Telegram transport adapter over teloxide.
//!
//! Maps Bot API updates onto the core's raw events and the core's outbound
//! calls onto Bot API requests. Platform gaps are made explicit: the Bot API
//! cannot enumerate group members (we keep a roster from observed activity),
//! cannot see presence, and cannot invite by phone number.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use teloxide::dispatching::ShutdownToken;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    Chat, ChatKind, ChatMemberStatus, ChatMemberUpdated, FileId, InputFile, MessageEntityKind,
    MessageId, ParseMode, ReplyParameters,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;

use crate::bot::event::{
    ExtendedText, MediaRef, MembershipChange, MembershipKind, MessageContent, RawMessage,
};
use crate::bot::jid::{ChatId, UserId};
use crate::bot::media::{MediaConverter, MediaError};
use crate::bot::transport::{
    Connection, Connector, Credentials, DisconnectReason, GroupAction, GroupMember,
    GroupMetadata, MediaPayload, SendOptions, Transport, TransportError, TransportEvent,
};

const EVENT_BUFFER: usize = 64;

/// Group members seen so far, per chat. The Bot API has no member listing,
/// so the roster grows from observed senders and membership updates.
#[derive(Clone, Default)]
struct Roster(Arc<RwLock<HashMap<ChatId, HashSet<UserId>>>>);

impl Roster {
    fn record(&self, chat: &ChatId, user: UserId) {
        if !chat.is_group() {
            return;
        }
        self.0
            .write()
            .expect("roster lock poisoned")
            .entry(chat.clone())
            .or_default()
            .insert(user);
    }

    fn remove(&self, chat: &ChatId, user: &UserId) {
        if let Some(members) = self.0.write().expect("roster lock poisoned").get_mut(chat) {
            members.remove(user);
        }
    }

    fn members(&self, chat: &ChatId) -> Vec<UserId> {
        self.0
            .read()
            .expect("roster lock poisoned")
            .get(chat)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }
}

pub struct TelegramConnector {
    token: String,
}

impl TelegramConnector {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl Connector for TelegramConnector {
    /// The Bot API is stateless; credentials are carried in the token, so
    /// the blob from the credential store is unused here.
    async fn connect(&self, _credentials: &Credentials) -> Result<Connection, TransportError> {
        let bot = Bot::new(&self.token);
        let me = bot.get_me().await.map_err(map_api_err)?;
        info!("Handshake ok, logged in as @{}", me.username());

        let roster = Roster::default();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let handler = dptree::entry()
            .branch(Update::filter_message().endpoint(on_message))
            .branch(Update::filter_chat_member().endpoint(on_chat_member));

        let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
            .dependencies(dptree::deps![tx.clone(), roster.clone()])
            .build();
        let shutdown = dispatcher.shutdown_token();

        let events_tx = tx.clone();
        let probe_bot = bot.clone();
        tokio::spawn(async move {
            dispatcher.dispatch().await;
            // Long polling ended; probe the API once to work out why.
            let reason = disconnect_reason(probe_bot.get_me().await.map(|_| ()));
            let _ = events_tx
                .send(TransportEvent::Disconnected(reason))
                .await;
        });

        tx.send(TransportEvent::Connected)
            .await
            .map_err(|_| TransportError::NotConnected)?;

        Ok(Connection {
            transport: Arc::new(TelegramTransport {
                bot,
                roster,
                shutdown,
            }),
            events: rx,
        })
    }
}

async fn on_message(
    msg: Message,
    tx: mpsc::Sender<TransportEvent>,
    roster: Roster,
) -> ResponseResult<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let chat = chat_jid(&msg.chat);
    roster.record(&chat, user_jid(user.id));

    let raw = raw_message(&msg, chat);
    if tx.send(TransportEvent::Message(raw)).await.is_err() {
        warn!("Event channel closed, dropping update");
    }
    Ok(())
}

async fn on_chat_member(
    update: ChatMemberUpdated,
    tx: mpsc::Sender<TransportEvent>,
    roster: Roster,
) -> ResponseResult<()> {
    let chat = chat_jid(&update.chat);
    let member = user_jid(update.new_chat_member.user.id);

    use ChatMemberStatus::*;
    let kind = match (update.old_chat_member.status(), update.new_chat_member.status()) {
        (Left | Banned, Member | Administrator | Owner) => Some(MembershipKind::Joined),
        (Member | Administrator | Owner | Restricted, Left | Banned) => {
            Some(MembershipKind::Left)
        }
        (Member | Restricted, Administrator) => Some(MembershipKind::Promoted),
        (Administrator, Member) => Some(MembershipKind::Demoted),
        _ => None,
    };

    match kind {
        Some(MembershipKind::Left) => roster.remove(&chat, &member),
        Some(_) => roster.record(&chat, member.clone()),
        None => {}
    }

    if let Some(kind) = kind {
        let change = MembershipChange {
            chat,
            members: vec![member],
            kind,
        };
        if tx.send(TransportEvent::Membership(change)).await.is_err() {
            warn!("Event channel closed, dropping membership update");
        }
    }
    Ok(())
}

/// Shape a Bot API message into the raw form the classifier expects.
fn raw_message(msg: &Message, chat: ChatId) -> RawMessage {
    let sender = msg
        .from
        .as_ref()
        .map(|u| user_jid(u.id))
        .unwrap_or_else(|| UserId::from_local(0));

    let text = msg.text().map(str::to_string);
    let caption = msg.caption().map(str::to_string);

    let image = msg.photo().and_then(|sizes| sizes.last()).map(|photo| MediaRef {
        id: photo.file.id.0.clone(),
        mime: "image/jpeg".to_string(),
        caption: caption.clone(),
    });
    let video = msg.video().map(|video| MediaRef {
        id: video.file.id.0.clone(),
        mime: video
            .mime_type
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "video/mp4".to_string()),
        caption: caption.clone(),
    });

    let mut mentions = Vec::new();
    for entity in msg
        .entities()
        .into_iter()
        .flatten()
        .chain(msg.caption_entities().into_iter().flatten())
    {
        if let MessageEntityKind::TextMention { user } = &entity.kind {
            mentions.push(user_jid(user.id));
        }
    }
    let quoted_sender = msg
        .reply_to_message()
        .and_then(|reply| reply.from.as_ref())
        .map(|u| user_jid(u.id));

    let extended = if !mentions.is_empty() || quoted_sender.is_some() {
        Some(ExtendedText {
            text: text
                .clone()
                .or_else(|| caption.clone())
                .unwrap_or_default(),
            mentions,
            quoted_sender,
        })
    } else {
        None
    };

    let content = if text.is_none() && extended.is_none() && image.is_none() && video.is_none() {
        None
    } else {
        Some(MessageContent {
            text,
            extended,
            image,
            video,
        })
    };

    RawMessage {
        id: msg.id.0.to_string(),
        chat,
        sender,
        content,
    }
}

pub struct TelegramTransport {
    bot: Bot,
    roster: Roster,
    shutdown: ShutdownToken,
}

impl Drop for TelegramTransport {
    fn drop(&mut self) {
        // Stop the long-poll task tied to this handle; a reconnect builds
        // a fresh one.
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if let Ok(fut) = shutdown.shutdown() {
                fut.await;
            }
        });
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(
        &self,
        chat: &ChatId,
        text: &str,
        mentions: &[UserId],
    ) -> Result<(), TransportError> {
        let chat_id = tg_chat(chat)?;
        if mentions.is_empty() {
            self.bot
                .send_message(chat_id, text)
                .await
                .map_err(map_api_err)?;
        } else {
            self.bot
                .send_message(chat_id, render_mentions(text, mentions))
                .parse_mode(ParseMode::Html)
                .await
                .map_err(map_api_err)?;
        }
        Ok(())
    }

    async fn send_media(
        &self,
        chat: &ChatId,
        payload: MediaPayload,
        options: SendOptions,
    ) -> Result<(), TransportError> {
        let chat_id = tg_chat(chat)?;
        match payload {
            MediaPayload::Sticker(bytes) => {
                let file = InputFile::memory(bytes).file_name("sticker.webp");
                let mut request = self.bot.send_sticker(chat_id, file);
                if let Some(reply) = reply_params(&options) {
                    request = request.reply_parameters(reply);
                }
                request.await.map_err(map_api_err)?;
            }
            MediaPayload::ImageUrl(raw_url) => {
                let parsed = Url::parse(&raw_url)
                    .map_err(|e| TransportError::Api(format!("bad media url: {e}")))?;
                let mut request = self.bot.send_photo(chat_id, InputFile::url(parsed));
                if let Some(caption) = options.caption.clone() {
                    request = request.caption(caption);
                }
                if let Some(reply) = reply_params(&options) {
                    request = request.reply_parameters(reply);
                }
                request.await.map_err(map_api_err)?;
            }
        }
        Ok(())
    }

    async fn group_metadata(&self, chat: &ChatId) -> Result<GroupMetadata, TransportError> {
        let chat_id = tg_chat(chat)?;
        let info = self.bot.get_chat(chat_id).await.map_err(map_api_err)?;
        let subject = info.title().unwrap_or_default().to_string();

        let admins = self
            .bot
            .get_chat_administrators(chat_id)
            .await
            .map_err(map_api_err)?;
        let admin_ids: HashSet<UserId> =
            admins.iter().map(|member| user_jid(member.user.id)).collect();

        let mut members: Vec<GroupMember> = self
            .roster
            .members(chat)
            .into_iter()
            .map(|id| GroupMember {
                is_admin: admin_ids.contains(&id),
                id,
            })
            .collect();
        for admin in &admin_ids {
            if !members.iter().any(|m| &m.id == admin) {
                members.push(GroupMember {
                    id: admin.clone(),
                    is_admin: true,
                });
            }
        }

        // The Bot API does not expose the creation date.
        Ok(GroupMetadata {
            subject,
            created_at: None,
            members,
        })
    }

    async fn update_membership(
        &self,
        chat: &ChatId,
        members: &[UserId],
        action: GroupAction,
    ) -> Result<(), TransportError> {
        let chat_id = tg_chat(chat)?;
        for member in members {
            let user_id = tg_user(member)?;
            match action {
                GroupAction::Add => {
                    return Err(TransportError::Unsupported(
                        "inviting members by phone number",
                    ));
                }
                GroupAction::Remove => {
                    // Kick = ban + immediate unban, so they can rejoin.
                    self.bot
                        .ban_chat_member(chat_id, user_id)
                        .await
                        .map_err(map_api_err)?;
                    self.bot
                        .unban_chat_member(chat_id, user_id)
                        .await
                        .map_err(map_api_err)?;
                    self.roster.remove(chat, member);
                }
                GroupAction::Promote => {
                    self.bot
                        .promote_chat_member(chat_id, user_id)
                        .can_invite_users(true)
                        .can_pin_messages(true)
                        .await
                        .map_err(map_api_err)?;
                }
                GroupAction::Demote => {
                    // Promotion with every right unset is a demotion.
                    self.bot
                        .promote_chat_member(chat_id, user_id)
                        .await
                        .map_err(map_api_err)?;
                }
            }
        }
        Ok(())
    }

    async fn profile_photo_url(
        &self,
        chat: &ChatId,
    ) -> Result<Option<String>, TransportError> {
        let chat_id = tg_chat(chat)?;
        let info = self.bot.get_chat(chat_id).await.map_err(map_api_err)?;
        let Some(photo) = info.photo else {
            return Ok(None);
        };
        let file = self
            .bot
            .get_file(photo.big_file_id.clone())
            .await
            .map_err(map_api_err)?;
        Ok(Some(format!(
            "https://api.telegram.org/file/bot{}/{}",
            self.bot.token(),
            file.path
        )))
    }

    async fn presence(&self, _user: &UserId) -> Result<Option<String>, TransportError> {
        // The Bot API cannot see user presence.
        Ok(None)
    }
}

/// Downloads the referenced file and hands its bytes back as a sticker.
/// Static images pass through; video would need transcoding the platform
/// does not give us.
pub struct TelegramMediaConverter {
    bot: Bot,
}

impl TelegramMediaConverter {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl MediaConverter for TelegramMediaConverter {
    async fn to_sticker(&self, media: &MediaRef) -> Result<Vec<u8>, MediaError> {
        if media.mime.starts_with("video/") {
            return Err(MediaError::Unsupported(media.mime.clone()));
        }
        let file = self
            .bot
            .get_file(FileId(media.id.clone()))
            .await
            .map_err(|e| MediaError::Download(e.to_string()))?;
        let mut data = Vec::new();
        self.bot
            .download_file(&file.path, &mut data)
            .await
            .map_err(|e| MediaError::Download(e.to_string()))?;
        Ok(data)
    }
}

fn chat_jid(chat: &Chat) -> ChatId {
    match chat.kind {
        ChatKind::Public(_) => ChatId::group(chat.id.0),
        ChatKind::Private(_) => ChatId::direct(chat.id.0),
    }
}

fn user_jid(id: teloxide::types::UserId) -> UserId {
    UserId::from_local(id.0)
}

fn tg_chat(chat: &ChatId) -> Result<teloxide::types::ChatId, TransportError> {
    chat.local()
        .parse::<i64>()
        .map(teloxide::types::ChatId)
        .map_err(|_| TransportError::NotFound(chat.to_string()))
}

fn tg_user(user: &UserId) -> Result<teloxide::types::UserId, TransportError> {
    user.local()
        .parse::<u64>()
        .map(teloxide::types::UserId)
        .map_err(|_| TransportError::NotFound(user.to_string()))
}

fn reply_params(options: &SendOptions) -> Option<ReplyParameters> {
    options
        .quote
        .as_ref()
        .and_then(|id| id.parse::<i32>().ok())
        .map(|id| ReplyParameters::new(MessageId(id)))
}

fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Rewrite `@local` tokens as inline mention links.
fn render_mentions(text: &str, mentions: &[UserId]) -> String {
    let mut html = html_escape(text);
    for user in mentions {
        let tag = format!("@{}", user.local());
        let anchor = format!(r#"<a href="tg://user?id={0}">@{0}</a>"#, user.local());
        html = html.replace(&tag, &anchor);
    }
    html
}

/// Decide what a dead update stream means from one API probe: an auth
/// failure is a logout, a conflicting poller replaced us, network trouble
/// is recoverable, and a clean answer means the close itself was clean.
fn disconnect_reason(probe: Result<(), teloxide::RequestError>) -> DisconnectReason {
    use teloxide::{ApiError, RequestError};
    match probe {
        Ok(()) => DisconnectReason::ConnectionClosed,
        Err(RequestError::Api(ApiError::TerminatedByOtherGetUpdates)) => {
            DisconnectReason::StreamReplaced
        }
        Err(RequestError::Api(_)) => DisconnectReason::LoggedOut,
        Err(RequestError::Network(e)) if e.is_timeout() => DisconnectReason::TimedOut,
        Err(_) => DisconnectReason::ConnectionLost,
    }
}

fn map_api_err(e: teloxide::RequestError) -> TransportError {
    let text = e.to_string();
    let lower = text.to_lowercase();
    if lower.contains("not enough rights") || lower.contains("chat_admin_required") {
        TransportError::MissingPrivilege
    } else if lower.contains("not found") {
        TransportError::NotFound(text)
    } else {
        TransportError::Api(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_mentions_links_each_tag() {
        let mentions = vec![UserId::from_local(123), UserId::from_local(456)];
        let html = render_mentions("@123 @456 wake up", &mentions);
        assert!(html.contains(r#"<a href="tg://user?id=123">@123</a>"#));
        assert!(html.contains(r#"<a href="tg://user?id=456">@456</a>"#));
        assert!(html.contains("wake up"));
    }

    #[test]
    fn test_render_mentions_escapes_user_text() {
        let html = render_mentions("<b>@123</b>", &[UserId::from_local(123)]);
        assert!(html.starts_with("&lt;b&gt;"));
        assert!(html.contains(r#"<a href="tg://user?id=123">@123</a>"#));
    }

    #[test]
    fn test_jid_roundtrip() {
        let chat = ChatId::group(-1001234);
        assert_eq!(tg_chat(&chat).unwrap(), teloxide::types::ChatId(-1001234));
        let user = UserId::from_local(42u64);
        assert_eq!(tg_user(&user).unwrap(), teloxide::types::UserId(42));
    }

    #[test]
    fn test_malformed_jid_is_not_found() {
        assert!(matches!(
            tg_chat(&ChatId::new("abc@g")),
            Err(TransportError::NotFound(_))
        ));
    }

    #[test]
    fn test_roster_tracks_group_members_only() {
        let roster = Roster::default();
        let group = ChatId::group(-100);
        let dm = ChatId::direct(5);

        roster.record(&group, UserId::from_local(1u64));
        roster.record(&group, UserId::from_local(1u64));
        roster.record(&group, UserId::from_local(2u64));
        roster.record(&dm, UserId::from_local(3u64));

        assert_eq!(roster.members(&group).len(), 2);
        assert!(roster.members(&dm).is_empty());

        roster.remove(&group, &UserId::from_local(1u64));
        assert_eq!(roster.members(&group), vec![UserId::from_local(2u64)]);
    }
}
