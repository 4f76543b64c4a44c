//! Connection lifecycle management.
//!
//! The session owns the transport handle and is the only code that creates
//! one, so at most a single connect is ever in flight. Recoverable
//! disconnects re-enter the connect cycle with exponential backoff; an
//! explicit logout ends the session for good.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::bot::auth::{AuthError, CredentialStore};
use crate::bot::commands;
use crate::bot::event::classify;
use crate::bot::media::MediaConverter;
use crate::bot::router;
use crate::bot::state::SessionState;
use crate::bot::transport::{Connection, Connector, DisconnectReason, TransportEvent};

/// Where the connection currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    ClosedRecoverable,
    ClosedTerminal,
}

impl ConnectionState {
    /// The closed state a disconnect reason maps to. Terminal only for an
    /// explicit logout; every other reason is survivable.
    pub fn on_disconnect(reason: DisconnectReason) -> Self {
        if reason.is_terminal() {
            Self::ClosedTerminal
        } else {
            Self::ClosedRecoverable
        }
    }
}

/// Backoff between reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failures before giving up. 0 = never give up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect `attempt` (1-based): exponential from
    /// `base_delay`, capped at `max_delay`, scaled by ±50% jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let uncapped = self.base_delay.saturating_mul(1u32 << exponent);
        let capped = uncapped.min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        capped.mul_f64(jitter)
    }

    pub fn gives_up(&self, failures: u32) -> bool {
        self.max_attempts != 0 && failures >= self.max_attempts
    }
}

#[derive(Debug)]
pub enum SessionError {
    /// The network logged us out; credentials are no longer valid.
    LoggedOut,
    RetriesExhausted { attempts: u32 },
    Auth(AuthError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoggedOut => {
                write!(f, "logged out by the network; re-authentication required")
            }
            Self::RetriesExhausted { attempts } => {
                write!(f, "gave up after {attempts} reconnect attempts")
            }
            Self::Auth(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Auth(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub command_prefix: char,
    pub welcome_text: String,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_prefix: '!',
            welcome_text: "welcome to the group! 👋".to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// One bot session. Lives until an explicit logout, retry exhaustion, or
/// process exit.
pub struct Session<C> {
    connector: C,
    credentials: CredentialStore,
    state: Arc<SessionState>,
    media: Arc<dyn MediaConverter>,
    config: SessionConfig,
}

impl<C: Connector> Session<C> {
    pub fn new(
        connector: C,
        credentials: CredentialStore,
        state: Arc<SessionState>,
        media: Arc<dyn MediaConverter>,
        config: SessionConfig,
    ) -> Self {
        Self {
            connector,
            credentials,
            state,
            media,
            config,
        }
    }

    /// Connect and keep reconnecting until a terminal condition.
    pub async fn run(self) -> Result<(), SessionError> {
        let mut failures: u32 = 0;
        loop {
            let credentials = self.credentials.load_or_init().map_err(SessionError::Auth)?;
            info!("Connecting…");

            let connection = match self.connector.connect(&credentials).await {
                Ok(connection) => connection,
                Err(e) => {
                    warn!("Connect failed: {e}");
                    failures += 1;
                    if self.config.reconnect.gives_up(failures) {
                        error!("Giving up after {failures} failed connect attempts");
                        return Err(SessionError::RetriesExhausted { attempts: failures });
                    }
                    let delay = self.config.reconnect.delay(failures);
                    warn!("Retrying in {:.1}s", delay.as_secs_f64());
                    sleep(delay).await;
                    continue;
                }
            };

            let (closed, reason) = self.drive(connection, &mut failures).await;
            if closed == ConnectionState::ClosedTerminal {
                error!("Session logged out; reconnecting will not help");
                return Err(SessionError::LoggedOut);
            }

            failures += 1;
            if self.config.reconnect.gives_up(failures) {
                error!("Giving up after {failures} dropped connections");
                return Err(SessionError::RetriesExhausted { attempts: failures });
            }
            let delay = self.config.reconnect.delay(failures);
            match reason {
                Some(reason) => {
                    warn!("Disconnected ({reason}); reconnecting in {:.1}s", delay.as_secs_f64());
                }
                None => {
                    warn!("Event stream ended; reconnecting in {:.1}s", delay.as_secs_f64());
                }
            }
            sleep(delay).await;
        }
    }

    /// Drain one connection's events. Returns the closed state we ended in
    /// and the disconnect reason, when the transport reported one.
    ///
    /// Messages are routed on spawned tasks: one slow handler must not hold
    /// up the stream, and one handler's failure must not reach another's.
    async fn drive(
        &self,
        mut connection: Connection,
        failures: &mut u32,
    ) -> (ConnectionState, Option<DisconnectReason>) {
        let mut state = ConnectionState::Connecting;
        while let Some(event) = connection.events.recv().await {
            match event {
                TransportEvent::Connected => {
                    if state == ConnectionState::Connecting {
                        info!("✅ Connection open");
                    }
                    state = ConnectionState::Open;
                    *failures = 0;
                }
                TransportEvent::Disconnected(reason) => {
                    if state != ConnectionState::Open {
                        debug!("Disconnected before the handshake finished");
                    }
                    return (ConnectionState::on_disconnect(reason), Some(reason));
                }
                TransportEvent::Message(raw) => {
                    let Some(msg) = classify(raw) else {
                        continue;
                    };
                    let transport = Arc::clone(&connection.transport);
                    let state = Arc::clone(&self.state);
                    let media = Arc::clone(&self.media);
                    let prefix = self.config.command_prefix;
                    tokio::spawn(async move {
                        router::route(&msg, &state, transport.as_ref(), media.as_ref(), prefix)
                            .await;
                    });
                }
                TransportEvent::Membership(change) => {
                    let transport = Arc::clone(&connection.transport);
                    let text = self.config.welcome_text.clone();
                    tokio::spawn(async move {
                        commands::send_welcome(transport.as_ref(), &change, &text).await;
                    });
                }
                TransportEvent::CredentialsUpdated(credentials) => {
                    debug!("Credentials rotated");
                    if let Err(e) = self.credentials.save(&credentials) {
                        warn!("Failed to persist credentials: {e}");
                    }
                }
            }
        }
        // Transport dropped its sender without a disconnect event.
        (ConnectionState::ClosedRecoverable, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_logout_is_terminal() {
        assert_eq!(
            ConnectionState::on_disconnect(DisconnectReason::LoggedOut),
            ConnectionState::ClosedTerminal
        );
        for reason in [
            DisconnectReason::ConnectionLost,
            DisconnectReason::ConnectionClosed,
            DisconnectReason::TimedOut,
            DisconnectReason::StreamReplaced,
        ] {
            assert_eq!(
                ConnectionState::on_disconnect(reason),
                ConnectionState::ClosedRecoverable,
                "{reason} must be recoverable"
            );
        }
    }

    #[test]
    fn test_backoff_grows_and_respects_cap() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            max_attempts: 0,
        };
        for attempt in 1..=20 {
            let delay = policy.delay(attempt);
            // Cap plus maximum jitter.
            assert!(delay <= Duration::from_secs(5).mul_f64(1.5));
            assert!(delay >= Duration::from_millis(100).mul_f64(0.5) || attempt == 1);
        }
        // Deep attempts sit at the cap (modulo jitter).
        let deep = policy.delay(20);
        assert!(deep >= Duration::from_secs(5).mul_f64(0.5));
    }

    #[test]
    fn test_backoff_first_attempt_uses_base_delay() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(60),
            max_attempts: 0,
        };
        let delay = policy.delay(1);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(300));
    }

    #[test]
    fn test_gives_up_only_with_finite_cap() {
        let unlimited = ReconnectPolicy::default();
        assert!(!unlimited.gives_up(1_000_000));

        let capped = ReconnectPolicy {
            max_attempts: 3,
            ..ReconnectPolicy::default()
        };
        assert!(!capped.gives_up(2));
        assert!(capped.gives_up(3));
        assert!(capped.gives_up(4));
    }
}
