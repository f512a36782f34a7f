//! Debouncing aggregator that turns event bursts into batch reports

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::channels::Channel;
use super::{NotificationEvent, Report};
use crate::config::{Config, ConfigRx};
use crate::error::{Error, UnsealErrorTrait};

struct Pending {
    event: NotificationEvent,
    received: Instant,
}

/// Owner of the pending notification queue
///
/// Only the aggregator task touches the queue; events reach it through the
/// mailbox created by [`super::mailbox`].
pub struct Aggregator {
    inbox: mpsc::UnboundedReceiver<NotificationEvent>,
    config: ConfigRx,
    channels: Vec<Box<dyn Channel>>,
    queue: Vec<Pending>,
    flushes: u64,
}

impl Aggregator {
    /// Create an aggregator reading from `inbox`
    pub fn new(inbox: mpsc::UnboundedReceiver<NotificationEvent>, config: ConfigRx) -> Self {
        Self {
            inbox,
            config,
            channels: Vec::new(),
            queue: Vec::new(),
            flushes: 0,
        }
    }

    /// Add a delivery channel
    pub fn add_channel(&mut self, channel: Box<dyn Channel>) {
        self.channels.push(channel);
    }

    #[cfg(test)]
    fn with_channel(mut self, channel: Box<dyn Channel>) -> Self {
        self.add_channel(channel);
        self
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    fn flushes(&self) -> u64 {
        self.flushes
    }

    fn enqueue(&mut self, event: NotificationEvent) {
        self.queue.push(Pending {
            event,
            received: Instant::now(),
        });
    }

    fn oldest_exceeds(&self, config: &Config) -> bool {
        self.queue
            .first()
            .is_some_and(|oldest| oldest.received.elapsed() >= config.max_elapsed())
    }

    /// Deliver the whole queue as one report and clear it
    ///
    /// Delivery failures are logged; the batch is dropped either way.
    pub async fn flush(&mut self, config: &Config) {
        if self.queue.is_empty() {
            return;
        }

        let events: Vec<NotificationEvent> =
            self.queue.drain(..).map(|pending| pending.event).collect();
        self.flushes += 1;

        tracing::info!(count = events.len(), "attempting to send notifications");
        let report = Report::render(&config.environment, &events);

        for channel in &self.channels {
            match channel.send(&report).await {
                Ok(status) if status.success => {
                    tracing::info!(channel = channel.name(), %status, "successfully sent notifications");
                }
                Ok(status) => {
                    tracing::error!(channel = channel.name(), %status, "unable to send notification");
                }
                Err(e) => {
                    let err = Error::from(e);
                    tracing::error!(
                        channel = channel.name(),
                        category = %err.category(),
                        error = %err,
                        "unable to send notification"
                    );
                }
            }
        }
    }

    /// Run until cancelled or until every notifier is dropped
    ///
    /// On exit, events already in the mailbox are drained and a final flush
    /// is performed.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("starting notifier");

        loop {
            let config = self.config.borrow().clone();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = self.inbox.recv() => match event {
                    Some(event) => {
                        self.enqueue(event);
                        if self.oldest_exceeds(&config) {
                            self.flush(&config).await;
                        }
                    }
                    None => break,
                },
                _ = tokio::time::sleep(config.queue_delay()) => {
                    self.flush(&config).await;
                }
            }
        }

        while let Ok(event) = self.inbox.try_recv() {
            self.enqueue(event);
        }

        let config = self.config.borrow().clone();
        self.flush(&config).await;
        tracing::info!(flushes = self.flushes, "notifier stopped");
    }
}
