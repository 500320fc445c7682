//! Event mailbox connecting the watcher tasks to the supervisor.
//!
//! A bounded multi-producer/single-consumer queue. Delivery is FIFO, but
//! there is no ordering guarantee between the two watchers: crash and exit
//! can occur near-simultaneously, and whichever event is dequeued first
//! wins the arbitration.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// Capacity of the mailbox; each watcher posts at most a handful of events.
const MAILBOX_CAPACITY: usize = 8;

/// An event produced by one of the watcher tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherEvent {
    /// The exit-marker file became readable.
    Exited,
    /// The system event stream reported a crash.
    Crashed,
}

/// Create a connected poster/mailbox pair.
#[must_use]
pub fn mailbox() -> (EventPoster, EventMailbox) {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    (EventPoster { tx }, EventMailbox { rx })
}

/// Cloneable posting handle held by the watcher tasks.
#[derive(Debug, Clone)]
pub struct EventPoster {
    tx: mpsc::Sender<WatcherEvent>,
}

impl EventPoster {
    /// Post an event without blocking.
    ///
    /// A full or closed mailbox drops the event: the consumer either has
    /// enough pending signals to decide the run already, or is gone.
    pub fn post(&self, event: WatcherEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => debug!(?event, "mailbox full; event dropped"),
            Err(TrySendError::Closed(event)) => debug!(?event, "mailbox closed; event dropped"),
        }
    }
}

/// Consuming side held by the supervisor.
#[derive(Debug)]
pub struct EventMailbox {
    rx: mpsc::Receiver<WatcherEvent>,
}

impl EventMailbox {
    /// Await the next event; `None` once every poster has been dropped.
    pub async fn recv(&mut self) -> Option<WatcherEvent> {
        self.rx.recv().await
    }

    /// Non-blocking dequeue.
    pub fn try_recv(&mut self) -> Option<WatcherEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_delivery() {
        let (poster, mut mailbox) = mailbox();
        poster.post(WatcherEvent::Crashed);
        poster.post(WatcherEvent::Exited);

        assert_eq!(mailbox.recv().await, Some(WatcherEvent::Crashed));
        assert_eq!(mailbox.recv().await, Some(WatcherEvent::Exited));
    }

    #[tokio::test]
    async fn test_try_recv_on_empty_mailbox() {
        let (_poster, mut mailbox) = mailbox();
        assert!(mailbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_post_to_full_or_closed_mailbox_is_silent() {
        let (poster, mailbox) = mailbox();
        drop(mailbox);
        poster.post(WatcherEvent::Exited);
    }
}
