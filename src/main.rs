mod bot;
mod config;
mod keepalive;
mod operator_log;

use std::sync::Arc;

use teloxide::Bot;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

use bot::{
    CredentialStore, Session, SessionConfig, SessionState, TelegramConnector,
    TelegramMediaConverter,
};
use config::Config;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "warden.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    // Setup logging: stdout plus a non-blocking file under the data dir.
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("warden.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(chat_id) = config.operator_chat_id {
        let alert_bot = Bot::new(&config.bot_token);
        let layer = operator_log::OperatorLogLayer::new(
            alert_bot,
            teloxide::types::ChatId(chat_id),
        );
        registry.with(layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting warden...");
    info!("Loaded config from {config_path}");

    if let Some(port) = config.keepalive_port {
        tokio::spawn(keepalive::serve(port));
    }

    let state = Arc::new(SessionState::new(config.auto_reply_text.clone()));
    let credentials = CredentialStore::new(&config.credentials_dir);
    let connector = TelegramConnector::new(config.bot_token.clone());
    let media = Arc::new(TelegramMediaConverter::new(Bot::new(&config.bot_token)));

    let session = Session::new(
        connector,
        credentials,
        state,
        media,
        SessionConfig {
            command_prefix: config.command_prefix,
            welcome_text: config.welcome_text.clone(),
            reconnect: config.reconnect.clone(),
        },
    );

    if let Err(e) = session.run().await {
        error!("Session ended: {e}");
        std::process::exit(1);
    }
}
