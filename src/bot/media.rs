//! Media collaborator contract.

use std::fmt;

use async_trait::async_trait;

use crate::bot::event::MediaRef;

#[derive(Debug)]
pub enum MediaError {
    /// The payload kind cannot become a sticker.
    Unsupported(String),
    Download(String),
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(mime) => write!(f, "unsupported media type: {mime}"),
            Self::Download(msg) => write!(f, "media download failed: {msg}"),
        }
    }
}

impl std::error::Error for MediaError {}

/// Downloads a referenced payload and converts it to sticker bytes.
#[async_trait]
pub trait MediaConverter: Send + Sync {
    async fn to_sticker(&self, media: &MediaRef) -> Result<Vec<u8>, MediaError>;
}
