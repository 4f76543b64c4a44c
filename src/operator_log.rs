//! Operator alerting over the chat network.
//!
//! Forwards WARN and ERROR events to a configured chat so a dead session
//! surfaces even when nobody is tailing the log file. INFO stays in the
//! log; the alert chat is for things an operator must act on.

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Chat message size limit, minus room for the level marker.
const MAX_ALERT_CHARS: usize = 4000;

pub struct OperatorLogLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl OperatorLogLayer {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(alert) = rx.recv().await {
                let alert = if alert.chars().count() > MAX_ALERT_CHARS {
                    let truncated: String = alert.chars().take(MAX_ALERT_CHARS).collect();
                    format!("{truncated}...")
                } else {
                    alert
                };
                if let Err(e) = bot.send_message(chat_id, &alert).await {
                    eprintln!("Failed to send operator alert: {e}");
                }
            }
        });

        Self { tx }
    }
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message
                .push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for OperatorLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();

        // Only WARN and ERROR leave the process.
        if level > Level::WARN {
            return;
        }

        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);

        let marker = if level == Level::ERROR { "❌" } else { "⚠️" };
        if self.tx.send(format!("{marker} {}", visitor.message)).is_err() {
            eprintln!("Alert channel closed, message dropped");
        }
    }
}
