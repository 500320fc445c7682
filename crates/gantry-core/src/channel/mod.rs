//! Remote command channel abstraction.
//!
//! The supervision core never constructs device-specific command syntax; it
//! composes command verbs (`install`, `push`, `shell <subcommand>`, stream
//! variants for log and event reads) and hands them to a
//! [`RemoteCommandChannel`]. One conforming implementation per device family
//! is enough to reuse the whole supervision protocol.
//!
//! # Streams
//!
//! Long-lived remote reads (the live log stream, the system event stream)
//! are exposed as a [`RemoteStream`]: a line receiver plus a kill handle.
//! Killing the stream terminates the remote process, which closes the line
//! channel and unblocks any pending read, so readers never need
//! side-channel traffic to wake up.

pub mod adb;

use std::io;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub use adb::AdbChannel;

/// Errors raised by a channel implementation.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel tool itself could not be started.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// Command line that failed to start.
        command: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// I/O failure while talking to the device.
    #[error("device I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ChannelError {
    /// Create a spawn error for the given command line.
    pub(crate) fn spawn(command: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            command: command.into(),
            source,
        }
    }
}

/// Captured result of one remote command run to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code reported by the channel tool (`-1` if killed by signal).
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
}

impl CommandOutput {
    /// Whether the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A long-lived remote command streaming its output line by line.
///
/// Dropping the stream (or its receiver half) tells the implementation to
/// terminate the remote process; [`RemoteStream::kill`] does so explicitly.
#[derive(Debug)]
pub struct RemoteStream {
    lines: mpsc::Receiver<String>,
    kill: Option<oneshot::Sender<()>>,
}

impl RemoteStream {
    /// Assemble a stream from its line receiver and kill handle.
    ///
    /// Channel implementations are expected to terminate the underlying
    /// remote process when the kill handle fires or the receiver is dropped,
    /// and to close the line channel once the process has exited.
    #[must_use]
    pub fn new(lines: mpsc::Receiver<String>, kill: oneshot::Sender<()>) -> Self {
        Self {
            lines,
            kill: Some(kill),
        }
    }

    /// Receive the next line, or `None` once the stream has closed.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Request termination of the remote process. Idempotent.
    pub fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }

    /// Detach the kill handle so termination can be requested while another
    /// task owns the read side.
    pub(crate) fn take_killer(&mut self) -> Option<oneshot::Sender<()>> {
        self.kill.take()
    }
}

/// Capability to build and run commands against one selected device.
#[async_trait]
pub trait RemoteCommandChannel: Send + Sync {
    /// Run a command to completion, capturing its output.
    async fn run(&self, args: &[String]) -> Result<CommandOutput, ChannelError>;

    /// Start a long-lived command and stream its standard output.
    async fn open_stream(&self, args: &[String]) -> Result<RemoteStream, ChannelError>;
}

/// Convenience constructor for owned argument vectors.
pub(crate) fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_string()).collect()
}

/// Render an argument vector for log and error messages.
pub(crate) fn argv_display(args: &[String]) -> String {
    args.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_closes_after_sender_drop() {
        let (tx, rx) = mpsc::channel(4);
        let (kill_tx, _kill_rx) = oneshot::channel();
        let mut stream = RemoteStream::new(rx, kill_tx);

        tx.send("one".to_string()).await.unwrap();
        drop(tx);

        assert_eq!(stream.next_line().await.as_deref(), Some("one"));
        assert!(stream.next_line().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_kill_is_idempotent() {
        let (_tx, rx) = mpsc::channel::<String>(1);
        let (kill_tx, mut kill_rx) = oneshot::channel();
        let mut stream = RemoteStream::new(rx, kill_tx);

        stream.kill();
        stream.kill();
        assert!(kill_rx.try_recv().is_ok());
    }
}
