//! `adb`-backed channel implementation.
//!
//! Builds `adb [-s <serial>] <args…>` command lines. Every invocation wires
//! its own discard sinks; nothing is opened process-wide.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::{argv_display, ChannelError, CommandOutput, RemoteCommandChannel, RemoteStream};

/// Capacity of the line buffer between the stream pump and its consumer.
const STREAM_BUFFER_LINES: usize = 64;

/// Channel that shells out to the `adb` tool for one selected device.
#[derive(Debug, Clone)]
pub struct AdbChannel {
    program: String,
    serial: Option<String>,
}

impl AdbChannel {
    /// Create a channel for the given device serial, or for the single
    /// connected device when no serial is supplied.
    #[must_use]
    pub fn new(serial: Option<String>) -> Self {
        Self {
            program: "adb".to_string(),
            serial,
        }
    }

    /// Override the tool binary (e.g. an absolute path to `adb`).
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args);
        cmd
    }

    fn command_line(&self, args: &[String]) -> String {
        let mut line = self.program.clone();
        if let Some(serial) = &self.serial {
            line.push_str(" -s ");
            line.push_str(serial);
        }
        line.push(' ');
        line.push_str(&argv_display(args));
        line
    }
}

#[async_trait]
impl RemoteCommandChannel for AdbChannel {
    async fn run(&self, args: &[String]) -> Result<CommandOutput, ChannelError> {
        let line = self.command_line(args);
        debug!(command = %line, "running device command");

        let output = self
            .command(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|source| ChannelError::spawn(line, source))?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }

    async fn open_stream(&self, args: &[String]) -> Result<RemoteStream, ChannelError> {
        let line = self.command_line(args);
        debug!(command = %line, "opening device stream");

        let mut child = self
            .command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ChannelError::spawn(line, source))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ChannelError::Io(std::io::Error::other("child stdout not captured")))?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER_LINES);
        let (kill_tx, mut kill_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = &mut kill_rx => {
                        let _ = child.kill().await;
                        break;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if tx.send(line).await.is_err() {
                                // Consumer is gone; stop the remote process.
                                let _ = child.kill().await;
                                break;
                            }
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
            }
        });

        Ok(RemoteStream::new(rx, kill_tx))
    }
}
