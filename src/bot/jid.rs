//! Conversation and user identifiers.
//!
//! Identifiers are `local@domain` strings, the addressing scheme of the
//! underlying network. The domain carries the conversation kind: `g` is a
//! group, `s` is a single user account. A direct chat with a user shares the
//! user's identifier.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Domain suffix of group conversations.
pub const GROUP_DOMAIN: &str = "g";
/// Domain suffix of user accounts (and direct chats).
pub const USER_DOMAIN: &str = "s";

/// A direct or group conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn group(local: impl fmt::Display) -> Self {
        Self(format!("{local}@{GROUP_DOMAIN}"))
    }

    pub fn direct(local: impl fmt::Display) -> Self {
        Self(format!("{local}@{USER_DOMAIN}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Part before the `@`.
    pub fn local(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }

    pub fn is_group(&self) -> bool {
        self.0
            .rsplit_once('@')
            .is_some_and(|(_, domain)| domain == GROUP_DOMAIN)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user account identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_local(local: impl fmt::Display) -> Self {
        Self(format!("{local}@{USER_DOMAIN}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Part before the `@`, used for mention text.
    pub fn local(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }

    /// The direct conversation with this user.
    pub fn as_chat(&self) -> ChatId {
        ChatId::new(self.0.clone())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{6,15}$").expect("phone pattern is valid"))
}

/// Turn a phone-like command argument into a user identifier.
///
/// Accepts an optional leading `@` or `+` and ignores spaces, dots, dashes
/// and parentheses. Returns `None` when the remainder is not 6-15 digits.
pub fn normalize_phone(arg: &str) -> Option<UserId> {
    let trimmed = arg.trim().trim_start_matches(['@', '+']);
    let digits: String = trimmed
        .chars()
        .filter(|c| !matches!(c, ' ' | '.' | '-' | '(' | ')'))
        .collect();
    if phone_pattern().is_match(&digits) {
        Some(UserId::from_local(digits))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_detection_by_domain() {
        assert!(ChatId::new("12036304@g").is_group());
        assert!(!ChatId::new("5551234@s").is_group());
        assert!(!ChatId::new("no-domain").is_group());
    }

    #[test]
    fn test_local_part() {
        assert_eq!(ChatId::new("12036304@g").local(), "12036304");
        assert_eq!(UserId::new("5551234@s").local(), "5551234");
    }

    #[test]
    fn test_user_direct_chat() {
        let user = UserId::from_local("5551234");
        assert_eq!(user.as_chat().as_str(), "5551234@s");
        assert!(!user.as_chat().is_group());
    }

    #[test]
    fn test_normalize_phone_plain_digits() {
        assert_eq!(
            normalize_phone("5551234"),
            Some(UserId::new("5551234@s"))
        );
    }

    #[test]
    fn test_normalize_phone_decorated() {
        assert_eq!(
            normalize_phone("@+1 (555) 123-4567"),
            Some(UserId::new("15551234567@s"))
        );
    }

    #[test]
    fn test_normalize_phone_rejects_garbage() {
        assert_eq!(normalize_phone("hello"), None);
        assert_eq!(normalize_phone("123"), None);
        assert_eq!(normalize_phone(""), None);
        assert_eq!(normalize_phone("12345678901234567890"), None);
    }
}
