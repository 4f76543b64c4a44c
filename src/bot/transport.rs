//! Contract between the bot core and the messaging network.
//!
//! The network SDK lives behind two traits: a [`Connector`] that performs the
//! handshake and hands back a [`Connection`], and a [`Transport`] for every
//! outbound call the handlers make. Inbound traffic arrives as
//! [`TransportEvent`]s on the connection's channel.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::bot::event::{MembershipChange, RawMessage};
use crate::bot::jid::{ChatId, UserId};

/// Opaque credential blob owned by the network's auth layer.
///
/// The core only moves it between the credential store and the connector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials(pub serde_json::Value);

/// Why a connection went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Explicit logout or credential invalidation. Not survivable.
    LoggedOut,
    ConnectionLost,
    ConnectionClosed,
    TimedOut,
    /// Another client took over the session stream.
    StreamReplaced,
}

impl DisconnectReason {
    /// Only an explicit logout ends the session for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoggedOut => "logged out",
            Self::ConnectionLost => "connection lost",
            Self::ConnectionClosed => "connection closed",
            Self::TimedOut => "timed out",
            Self::StreamReplaced => "stream replaced",
        };
        f.write_str(name)
    }
}

/// Inbound traffic from the network.
#[derive(Debug)]
pub enum TransportEvent {
    /// Handshake finished; the session is usable.
    Connected,
    Disconnected(DisconnectReason),
    Message(RawMessage),
    Membership(MembershipChange),
    /// The auth layer rotated its state; persist it.
    CredentialsUpdated(Credentials),
}

#[derive(Debug, Clone)]
pub struct GroupMember {
    pub id: UserId,
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct GroupMetadata {
    pub subject: String,
    /// Unix epoch seconds, when the network reports it.
    pub created_at: Option<i64>,
    pub members: Vec<GroupMember>,
}

/// Group membership mutations the bot can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAction {
    Add,
    Remove,
    Promote,
    Demote,
}

impl fmt::Display for GroupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Promote => "promote",
            Self::Demote => "demote",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum MediaPayload {
    /// Sticker bytes ready for the network.
    Sticker(Vec<u8>),
    /// An image the network fetches by URL.
    ImageUrl(String),
}

#[derive(Debug, Default)]
pub struct SendOptions {
    /// Message id to quote.
    pub quote: Option<String>,
    pub caption: Option<String>,
}

#[derive(Debug)]
pub enum TransportError {
    NotConnected,
    /// The bot lacks the group privilege for the call.
    MissingPrivilege,
    NotFound(String),
    /// The network cannot express this operation at all.
    Unsupported(&'static str),
    /// SDK-level failure.
    Api(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::MissingPrivilege => write!(f, "missing group privilege"),
            Self::NotFound(what) => write!(f, "not found: {what}"),
            Self::Unsupported(what) => write!(f, "unsupported operation: {what}"),
            Self::Api(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Outbound calls into the messaging network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send text, tagging `mentions` when the network supports it.
    async fn send_text(
        &self,
        chat: &ChatId,
        text: &str,
        mentions: &[UserId],
    ) -> Result<(), TransportError>;

    async fn send_media(
        &self,
        chat: &ChatId,
        payload: MediaPayload,
        options: SendOptions,
    ) -> Result<(), TransportError>;

    async fn group_metadata(&self, chat: &ChatId) -> Result<GroupMetadata, TransportError>;

    async fn update_membership(
        &self,
        chat: &ChatId,
        members: &[UserId],
        action: GroupAction,
    ) -> Result<(), TransportError>;

    async fn profile_photo_url(&self, chat: &ChatId)
    -> Result<Option<String>, TransportError>;

    /// Last known presence line for a user, when the network exposes one.
    async fn presence(&self, user: &UserId) -> Result<Option<String>, TransportError>;
}

/// A live session: one transport handle plus its event stream.
///
/// Dropped and rebuilt on every reconnect.
pub struct Connection {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Builds connections. The lifecycle manager is its only caller.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, credentials: &Credentials) -> Result<Connection, TransportError>;
}
