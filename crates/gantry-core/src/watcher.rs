//! Exit-marker polling.
//!
//! The marker file has been observed to appear in directory listings
//! slightly before its content is readable, so a posted `Exited` event is
//! only a hint: the supervisor verifies it, and on a false positive calls
//! [`ExitSignalWatcher::restart`] to spawn a fresh polling generation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channel::{argv, RemoteCommandChannel};
use crate::mailbox::{EventPoster, WatcherEvent};

/// Background task polling for the remote exit-marker file.
pub struct ExitSignalWatcher {
    channel: Arc<dyn RemoteCommandChannel>,
    marker_path: String,
    poll_interval: Duration,
    poster: EventPoster,
    shutdown: watch::Sender<bool>,
    generations: Vec<JoinHandle<()>>,
}

impl ExitSignalWatcher {
    /// Start polling the given marker path.
    #[must_use]
    pub fn start(
        channel: Arc<dyn RemoteCommandChannel>,
        marker_path: impl Into<String>,
        poll_interval: Duration,
        poster: EventPoster,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut watcher = Self {
            channel,
            marker_path: marker_path.into(),
            poll_interval,
            poster,
            shutdown,
            generations: Vec::new(),
        };
        watcher.spawn_generation();
        watcher
    }

    /// Spawn a fresh polling task after a false-positive exit signal.
    ///
    /// The mailbox and session state are untouched; the new generation
    /// shares the shutdown flag with any predecessors.
    pub fn restart(&mut self) {
        debug!("restarting exit-marker polling");
        self.spawn_generation();
    }

    /// Signal the polling loop to stop and join every spawned generation.
    ///
    /// Idempotent, and safe to call after the loop has already exited. An
    /// in-flight remote read is not interrupted; the loop observes the flag
    /// at its next iteration.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown.send(true);
        for generation in self.generations.drain(..) {
            let _ = generation.await;
        }
    }

    fn spawn_generation(&mut self) {
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.channel),
            self.marker_path.clone(),
            self.poll_interval,
            self.poster.clone(),
            self.shutdown.subscribe(),
        ));
        self.generations.push(handle);
    }
}

async fn poll_loop(
    channel: Arc<dyn RemoteCommandChannel>,
    marker_path: String,
    poll_interval: Duration,
    poster: EventPoster,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        match channel.run(&argv(&["shell", "cat", &marker_path])).await {
            Ok(output) if output.success() => {
                debug!(marker = %marker_path, "exit marker observed");
                poster.post(WatcherEvent::Exited);
                return;
            }
            Ok(_) => {}
            Err(error) => {
                warn!(%error, "exit-marker poll failed");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown.changed() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::channel::{ChannelError, CommandOutput, RemoteStream};
    use crate::mailbox::mailbox;

    /// Channel whose `shell cat` succeeds after a scripted number of polls.
    struct MarkerAfter {
        polls_left: Mutex<u32>,
    }

    #[async_trait]
    impl RemoteCommandChannel for MarkerAfter {
        async fn run(&self, args: &[String]) -> Result<CommandOutput, ChannelError> {
            assert_eq!(args[..2], ["shell", "cat"]);
            let mut left = self.polls_left.lock().unwrap();
            if *left == 0 {
                Ok(CommandOutput {
                    exit_code: 0,
                    stdout: "0\n".to_string(),
                })
            } else {
                *left -= 1;
                Ok(CommandOutput {
                    exit_code: 1,
                    stdout: String::new(),
                })
            }
        }

        async fn open_stream(&self, _args: &[String]) -> Result<RemoteStream, ChannelError> {
            unimplemented!("not used by the watcher")
        }
    }

    #[tokio::test]
    async fn test_posts_exited_once_marker_readable() {
        let channel = Arc::new(MarkerAfter {
            polls_left: Mutex::new(2),
        });
        let (poster, mut mailbox) = mailbox();
        let mut watcher = ExitSignalWatcher::start(
            channel,
            "/data/files/exitcode",
            Duration::from_millis(5),
            poster,
        );

        let event = tokio::time::timeout(Duration::from_secs(1), mailbox.recv())
            .await
            .expect("watcher should post before timeout");
        assert_eq!(event, Some(WatcherEvent::Exited));

        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let channel = Arc::new(MarkerAfter {
            polls_left: Mutex::new(u32::MAX),
        });
        let (poster, _mailbox) = mailbox();
        let mut watcher = ExitSignalWatcher::start(
            channel,
            "/data/files/exitcode",
            Duration::from_millis(5),
            poster,
        );

        watcher.shutdown().await;
        watcher.shutdown().await;
    }
}
