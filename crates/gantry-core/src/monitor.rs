//! Crash detection on the system event stream.

use std::sync::Arc;

use regex::Regex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::channel::{ChannelError, RemoteCommandChannel, RemoteStream};
use crate::mailbox::{EventPoster, WatcherEvent};

/// Background task reading the live system event stream, posting
/// [`WatcherEvent::Crashed`] whenever a line matches the crash pattern.
pub struct CrashMonitor {
    killer: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<()>>,
}

impl CrashMonitor {
    /// Open the event stream and start reading it.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`] if the stream cannot be opened.
    pub async fn start(
        channel: Arc<dyn RemoteCommandChannel>,
        stream_args: &[String],
        crash_pattern: Regex,
        poster: EventPoster,
    ) -> Result<Self, ChannelError> {
        let stream = channel.open_stream(stream_args).await?;
        Ok(Self::from_stream(stream, crash_pattern, poster))
    }

    /// Start reading an already-open stream.
    #[must_use]
    pub fn from_stream(mut stream: RemoteStream, crash_pattern: Regex, poster: EventPoster) -> Self {
        let killer = stream.take_killer();
        let reader = tokio::spawn(read_loop(stream, crash_pattern, poster));
        Self {
            killer,
            reader: Some(reader),
        }
    }

    /// Kill the remote stream process and join the reader task.
    ///
    /// Idempotent; bounded by the remote process's kill latency rather than
    /// any poll interval.
    pub async fn shutdown(&mut self) {
        if let Some(killer) = self.killer.take() {
            let _ = killer.send(());
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
    }
}

async fn read_loop(mut stream: RemoteStream, crash_pattern: Regex, poster: EventPoster) {
    while let Some(line) = stream.next_line().await {
        if crash_pattern.is_match(&line) {
            warn!(%line, "crash reported on the event stream");
            poster.post(WatcherEvent::Crashed);
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::mailbox::mailbox;

    fn fabricated_stream() -> (mpsc::Sender<String>, RemoteStream) {
        let (tx, rx) = mpsc::channel(8);
        let (kill_tx, _kill_rx) = oneshot::channel();
        (tx, RemoteStream::new(rx, kill_tx))
    }

    #[tokio::test]
    async fn test_crash_line_posts_event() {
        let (tx, stream) = fabricated_stream();
        let (poster, mut mailbox) = mailbox();
        let mut monitor =
            CrashMonitor::from_stream(stream, Regex::new(r"\*\* ERROR").unwrap(), poster);

        tx.send("routine line".to_string()).await.unwrap();
        tx.send("** ERROR: process 1234 crashed".to_string())
            .await
            .unwrap();

        assert_eq!(mailbox.recv().await, Some(WatcherEvent::Crashed));

        drop(tx);
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_matching_lines_are_ignored() {
        let (tx, stream) = fabricated_stream();
        let (poster, mut mailbox) = mailbox();
        let mut monitor =
            CrashMonitor::from_stream(stream, Regex::new(r"\*\* ERROR").unwrap(), poster);

        tx.send("nothing to see".to_string()).await.unwrap();
        drop(tx);
        monitor.shutdown().await;

        assert!(mailbox.try_recv().is_none());
    }
}
