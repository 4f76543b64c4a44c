//! Inbound event normalization.
//!
//! Raw messages arrive with whichever content fields the network filled in;
//! [`classify`] flattens them into one [`InboundMessage`] per event, or
//! nothing when there is no payload to act on.

use crate::bot::jid::{ChatId, UserId};

/// Opaque handle to a media payload, resolved by the media collaborator.
#[derive(Debug, Clone)]
pub struct MediaRef {
    pub id: String,
    pub mime: String,
    pub caption: Option<String>,
}

/// Rich-text payload: body plus the context needed for target resolution.
#[derive(Debug, Clone)]
pub struct ExtendedText {
    pub text: String,
    pub mentions: Vec<UserId>,
    /// Sender of the quoted message, when this is a reply.
    pub quoted_sender: Option<UserId>,
}

/// Content fields a raw message may carry. All optional; the classifier
/// picks the text in a fixed priority order.
#[derive(Debug, Clone, Default)]
pub struct MessageContent {
    pub text: Option<String>,
    pub extended: Option<ExtendedText>,
    pub image: Option<MediaRef>,
    pub video: Option<MediaRef>,
}

/// A message event as the transport delivered it.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: String,
    pub chat: ChatId,
    pub sender: UserId,
    /// `None` for hollow events (receipts, reactions, protocol noise).
    pub content: Option<MessageContent>,
}

/// One normalized message, ready for the router.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    pub chat: ChatId,
    pub sender: UserId,
    pub is_group: bool,
    /// Extracted text; empty when the message carried none.
    pub text: String,
    pub mentions: Vec<UserId>,
    pub quoted_sender: Option<UserId>,
    pub media: Option<MediaRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipKind {
    Joined,
    Left,
    Promoted,
    Demoted,
}

/// A group membership event. Bypasses the router; only the welcome side
/// effect consumes it.
#[derive(Debug, Clone)]
pub struct MembershipChange {
    pub chat: ChatId,
    pub members: Vec<UserId>,
    pub kind: MembershipKind,
}

/// Normalize a raw message. Returns `None` when the event has no payload.
///
/// Text extraction checks content fields in fixed order: plain text,
/// extended text, image caption, video caption.
pub fn classify(raw: RawMessage) -> Option<InboundMessage> {
    let content = raw.content?;
    let MessageContent {
        text,
        extended,
        image,
        video,
    } = content;

    let (mentions, quoted_sender, extended_text) = match extended {
        Some(ext) => (ext.mentions, ext.quoted_sender, Some(ext.text)),
        None => (Vec::new(), None, None),
    };

    let text = text
        .or(extended_text)
        .or_else(|| image.as_ref().and_then(|m| m.caption.clone()))
        .or_else(|| video.as_ref().and_then(|m| m.caption.clone()))
        .unwrap_or_default();

    let is_group = raw.chat.is_group();
    let media = image.or(video);

    Some(InboundMessage {
        id: raw.id,
        chat: raw.chat,
        sender: raw.sender,
        is_group,
        text,
        mentions,
        quoted_sender,
        media,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(content: Option<MessageContent>) -> RawMessage {
        RawMessage {
            id: "m1".to_string(),
            chat: ChatId::new("12036304@g"),
            sender: UserId::new("5551234@s"),
            content,
        }
    }

    #[test]
    fn test_no_payload_is_discarded() {
        assert!(classify(raw(None)).is_none());
    }

    #[test]
    fn test_plain_text_wins_over_extended() {
        let msg = classify(raw(Some(MessageContent {
            text: Some("plain".to_string()),
            extended: Some(ExtendedText {
                text: "extended".to_string(),
                mentions: vec![],
                quoted_sender: None,
            }),
            ..Default::default()
        })))
        .unwrap();
        assert_eq!(msg.text, "plain");
    }

    #[test]
    fn test_extended_text_wins_over_captions() {
        let msg = classify(raw(Some(MessageContent {
            extended: Some(ExtendedText {
                text: "extended".to_string(),
                mentions: vec![],
                quoted_sender: None,
            }),
            image: Some(MediaRef {
                id: "f1".to_string(),
                mime: "image/jpeg".to_string(),
                caption: Some("caption".to_string()),
            }),
            ..Default::default()
        })))
        .unwrap();
        assert_eq!(msg.text, "extended");
    }

    #[test]
    fn test_image_caption_wins_over_video_caption() {
        let msg = classify(raw(Some(MessageContent {
            image: Some(MediaRef {
                id: "f1".to_string(),
                mime: "image/jpeg".to_string(),
                caption: Some("img".to_string()),
            }),
            video: Some(MediaRef {
                id: "f2".to_string(),
                mime: "video/mp4".to_string(),
                caption: Some("vid".to_string()),
            }),
            ..Default::default()
        })))
        .unwrap();
        assert_eq!(msg.text, "img");
        assert_eq!(msg.media.unwrap().id, "f1");
    }

    #[test]
    fn test_captionless_media_yields_empty_text() {
        let msg = classify(raw(Some(MessageContent {
            video: Some(MediaRef {
                id: "f2".to_string(),
                mime: "video/mp4".to_string(),
                caption: None,
            }),
            ..Default::default()
        })))
        .unwrap();
        assert_eq!(msg.text, "");
        assert!(msg.media.is_some());
    }

    #[test]
    fn test_group_flag_from_chat_domain() {
        let grouped = classify(raw(Some(MessageContent {
            text: Some("hi".to_string()),
            ..Default::default()
        })))
        .unwrap();
        assert!(grouped.is_group);

        let direct = classify(RawMessage {
            id: "m2".to_string(),
            chat: ChatId::new("5551234@s"),
            sender: UserId::new("5551234@s"),
            content: Some(MessageContent {
                text: Some("hi".to_string()),
                ..Default::default()
            }),
        })
        .unwrap();
        assert!(!direct.is_group);
    }

    #[test]
    fn test_mentions_and_quote_are_lifted() {
        let msg = classify(raw(Some(MessageContent {
            extended: Some(ExtendedText {
                text: "!ban @5559999".to_string(),
                mentions: vec![UserId::new("5559999@s")],
                quoted_sender: Some(UserId::new("5558888@s")),
            }),
            ..Default::default()
        })))
        .unwrap();
        assert_eq!(msg.mentions, vec![UserId::new("5559999@s")]);
        assert_eq!(msg.quoted_sender, Some(UserId::new("5558888@s")));
    }
}
