//! Batched failure notifications
//!
//! Watchers emit events through a cloneable [`Notifier`]. Events travel over
//! a single mailbox to the [`Aggregator`], which owns the pending queue and
//! decides when a batch is rendered into a [`Report`] and handed to the
//! configured channels.
//!
//! # Architecture
//!
//! ```text
//!   watcher ──┐
//!   watcher ──┼──► mailbox ──► Aggregator ──► Report ──► Channel(s)
//!   watcher ──┘                (debounce)                (webhook)
//! ```
//!
//! # Flush policy
//!
//! - **Quiescence**: no new event within `queue_delay` of the last one.
//! - **Max elapsed**: on arrival, the oldest pending event is at least
//!   `max_elapsed` old.
//! - **Shutdown**: one final flush of whatever is left.

mod aggregator;
pub mod channels;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tokio::sync::mpsc;

pub use aggregator::Aggregator;
pub use channels::webhook::WebhookChannel;
pub use channels::Channel;

/// Severity of a notification event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    /// Informational event (e.g. a node was unsealed)
    Info,
    /// Failure event
    Error,
}

impl EventLevel {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single event waiting to be reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
    /// Severity
    pub level: EventLevel,
    /// Human readable description
    pub message: String,
}

impl NotificationEvent {
    /// Create an event stamped with the current time
    pub fn new(level: EventLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }

    /// Format as a single report line
    pub fn format_line(&self) -> String {
        format!(
            "{} :: {}: {}",
            self.timestamp.format("%d %b %y %H:%M %Z"),
            self.level,
            self.message
        )
    }
}

/// Create a notifier and the mailbox the aggregator reads from
pub fn mailbox() -> (Notifier, mpsc::UnboundedReceiver<NotificationEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Notifier { tx: Some(tx) }, rx)
}

/// Emission handle shared by every watcher
///
/// Every event is logged. When the handle is connected to an aggregator the
/// event is also queued for the next batch.
#[derive(Clone, Debug, Default)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<NotificationEvent>>,
}

impl Notifier {
    /// A notifier that only logs
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emit an error event
    pub fn error(&self, message: impl Into<String>) {
        let event = NotificationEvent::new(EventLevel::Error, message);
        tracing::error!(event = %event.message, "notify-error");
        self.emit(event);
    }

    /// Emit an informational event
    pub fn info(&self, message: impl Into<String>) {
        let event = NotificationEvent::new(EventLevel::Info, message);
        tracing::info!(event = %event.message, "notify-info");
        self.emit(event);
    }

    fn emit(&self, event: NotificationEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                tracing::warn!("notification aggregator has stopped, event dropped");
            }
        }
    }
}

/// A rendered batch, ready for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Short subject line
    pub subject: String,
    /// Full report text
    pub body: String,
    /// Environment the report belongs to
    pub environment: String,
    /// Number of events in the batch
    pub event_count: usize,
}

impl Report {
    /// Render a batch of events, preserving their order
    pub fn render(environment: &str, events: &[NotificationEvent]) -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().into_owned();

        let mut body = String::from(
            "vault-unseal ran into errors when attempting to check seal status/unseal. \
             here are the errors:\n",
        );
        for event in events {
            let _ = write!(body, "\n{}", event.format_line());
        }
        let _ = write!(
            body,
            "\n\nsent from vault-unseal. version: {}, hostname: {}",
            env!("CARGO_PKG_VERSION"),
            hostname
        );

        let environment_label = if environment.is_empty() {
            "default"
        } else {
            environment
        };

        Self {
            subject: format!(
                "vault-unseal: {}: {} errors occurred",
                environment_label,
                events.len()
            ),
            body,
            environment: environment.to_string(),
            event_count: events.len(),
        }
    }

    /// The event lines of the body, in order
    #[cfg(test)]
    pub(crate) fn event_lines(&self) -> impl Iterator<Item = &str> {
        self.body.lines().filter(|line| line.contains(" :: "))
    }
}
