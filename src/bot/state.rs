//! Shared moderation/session state.
//!
//! One instance per bot process, shared across concurrently routed events.
//! Every operation is a short, non-suspending critical section; none of them
//! can fail. Nothing here survives a restart.

use std::collections::HashSet;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::bot::jid::UserId;

/// Greeting sent to non-command messages until `setreply` changes it.
pub const DEFAULT_AUTO_REPLY: &str =
    "Hello! I'm a bot. Send !menu to see what I can do.";

pub struct SessionState {
    banned: RwLock<HashSet<UserId>>,
    auto_reply_enabled: AtomicBool,
    auto_reply_text: RwLock<String>,
    /// At most one poll; a new one replaces the old.
    active_poll: RwLock<Option<String>>,
}

impl SessionState {
    pub fn new(auto_reply_text: impl Into<String>) -> Self {
        Self {
            banned: RwLock::new(HashSet::new()),
            auto_reply_enabled: AtomicBool::new(true),
            auto_reply_text: RwLock::new(auto_reply_text.into()),
            active_poll: RwLock::new(None),
        }
    }

    pub fn is_banned(&self, user: &UserId) -> bool {
        self.banned
            .read()
            .expect("ban set lock poisoned")
            .contains(user)
    }

    pub fn ban(&self, user: UserId) {
        self.banned
            .write()
            .expect("ban set lock poisoned")
            .insert(user);
    }

    pub fn auto_reply_enabled(&self) -> bool {
        self.auto_reply_enabled.load(Ordering::Relaxed)
    }

    pub fn set_auto_reply(&self, enabled: bool) {
        self.auto_reply_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn auto_reply_text(&self) -> String {
        self.auto_reply_text
            .read()
            .expect("auto-reply lock poisoned")
            .clone()
    }

    pub fn set_auto_reply_text(&self, text: impl Into<String>) {
        *self
            .auto_reply_text
            .write()
            .expect("auto-reply lock poisoned") = text.into();
    }

    pub fn poll(&self) -> Option<String> {
        self.active_poll
            .read()
            .expect("poll lock poisoned")
            .clone()
    }

    pub fn set_poll(&self, question: impl Into<String>) {
        *self.active_poll.write().expect("poll lock poisoned") = Some(question.into());
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(DEFAULT_AUTO_REPLY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let state = SessionState::default();
        assert!(state.auto_reply_enabled());
        assert_eq!(state.auto_reply_text(), DEFAULT_AUTO_REPLY);
        assert_eq!(state.poll(), None);
        assert!(!state.is_banned(&UserId::new("5551234@s")));
    }

    #[test]
    fn test_ban_is_sticky() {
        let state = SessionState::default();
        let user = UserId::new("5551234@s");
        state.ban(user.clone());
        state.ban(user.clone());
        assert!(state.is_banned(&user));
        assert!(!state.is_banned(&UserId::new("5559999@s")));
    }

    #[test]
    fn test_auto_reply_toggle_and_text() {
        let state = SessionState::default();
        state.set_auto_reply(false);
        assert!(!state.auto_reply_enabled());
        state.set_auto_reply_text("brb");
        assert_eq!(state.auto_reply_text(), "brb");
        state.set_auto_reply(true);
        assert!(state.auto_reply_enabled());
    }

    #[test]
    fn test_poll_last_write_wins() {
        let state = SessionState::default();
        state.set_poll("Pizza or tacos?");
        state.set_poll("Coffee?");
        assert_eq!(state.poll().as_deref(), Some("Coffee?"));
    }
}
