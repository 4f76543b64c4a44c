//! Bot core: connection lifecycle, event classification, command routing,
//! and shared session state.

pub mod auth;
pub mod commands;
pub mod event;
pub mod jid;
pub mod media;
pub mod router;
pub mod session;
pub mod state;
pub mod telegram;
pub mod transport;


pub use auth::CredentialStore;
pub use session::{ReconnectPolicy, Session, SessionConfig};
pub use state::SessionState;
pub use telegram::{TelegramConnector, TelegramMediaConverter};
