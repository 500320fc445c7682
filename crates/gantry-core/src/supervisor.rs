//! Execution supervision.
//!
//! The supervised binary exposes no process handle; the only signals are
//! the polled exit marker, the system event stream, and the live log
//! stream. The supervisor launches the binary, then arbitrates those
//! signals in a single `select!` loop: watcher events arrive through the
//! mailbox and wake the loop directly, log lines pace it, and stream EOF
//! is the "process vanished" fallback. The first decisive signal wins,
//! except that an exit event whose marker cannot be read back as an
//! integer is treated as a false positive: the watcher is restarted and
//! the loop keeps going, so a pending crash event can still be observed.
//!
//! Cleanup of both watchers runs on every exit path, including launch
//! failure, so no background task outlives a run.

use std::io;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::channel::{argv, ChannelError, RemoteCommandChannel, RemoteStream};
use crate::config::{ConfigError, LauncherConfig};
use crate::deploy::{DeployError, DeploymentManager};
use crate::fingerprint::ArtifactSet;
use crate::mailbox::{mailbox, EventMailbox, WatcherEvent};
use crate::monitor::CrashMonitor;
use crate::session::DeviceSession;
use crate::transcript::LogTranscriber;
use crate::watcher::ExitSignalWatcher;

/// The authoritative result of one run.
///
/// `completed` is only set by a confirmed exit-marker read or a crash
/// event; the pessimistic default survives every other path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Return code reported by the binary, `1` unless confirmed.
    pub return_code: i32,
    /// Whether the binary observably finished (cleanly or by crash).
    pub completed: bool,
    /// Whether the run ended in a crash.
    pub crashed: bool,
}

impl ExecutionOutcome {
    /// The default outcome: nothing confirmed, return code 1.
    #[must_use]
    pub const fn pessimistic() -> Self {
        Self {
            return_code: 1,
            completed: false,
            crashed: false,
        }
    }

    /// Outcome of a confirmed exit-marker read.
    #[must_use]
    pub const fn exited(return_code: i32) -> Self {
        Self {
            return_code,
            completed: true,
            crashed: false,
        }
    }

    /// Outcome of a reported crash.
    #[must_use]
    pub const fn crash() -> Self {
        Self {
            return_code: 1,
            completed: true,
            crashed: true,
        }
    }

    /// Whether the binary completed cleanly with return code zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.completed && !self.crashed && self.return_code == 0
    }
}

/// Errors that terminate a run before an outcome can be decided.
#[derive(Debug, Error)]
pub enum RunError {
    /// Deployment failed; nothing was launched.
    #[error(transparent)]
    Deploy(#[from] DeployError),

    /// A remote command could not be executed at all.
    #[error("device unreachable: {0}")]
    Unreachable(#[from] ChannelError),

    /// A required pre-launch command exited non-zero.
    #[error("device command failed: {detail}")]
    Device {
        /// What went wrong.
        detail: String,
    },

    /// The launch command exited non-zero.
    #[error("launch failed: {detail}")]
    Launch {
        /// What went wrong.
        detail: String,
    },
}

/// Supervises one binary on one device: `{synchronize, run, kill}`.
pub struct Supervisor {
    channel: Arc<dyn RemoteCommandChannel>,
    config: LauncherConfig,
    artifacts: ArtifactSet,
    crash_pattern: Regex,
    transcriber: LogTranscriber,
    sink: Box<dyn io::Write + Send>,
}

impl Supervisor {
    /// Create a supervisor; the transcript goes to stdout unless a sink is
    /// supplied via [`Supervisor::with_output_sink`].
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the profile does not validate.
    pub fn new(
        channel: Arc<dyn RemoteCommandChannel>,
        config: LauncherConfig,
        artifacts: ArtifactSet,
    ) -> Result<Self, ConfigError> {
        let crash_pattern = config.crash_regex()?;
        let transcriber = LogTranscriber::for_tag(&config.log_tag);
        Ok(Self {
            channel,
            config,
            artifacts,
            crash_pattern,
            transcriber,
            sink: Box::new(io::stdout()),
        })
    }

    /// Redirect the transcript to the given sink.
    #[must_use]
    pub fn with_output_sink(mut self, sink: Box<dyn io::Write + Send>) -> Self {
        self.sink = sink;
        self
    }

    /// Bring the device copy up to date.
    ///
    /// # Errors
    ///
    /// Fatal on the first failing deployment step.
    pub async fn synchronize(&self) -> Result<DeviceSession, DeployError> {
        DeploymentManager::new(Arc::clone(&self.channel), &self.config, &self.artifacts)
            .synchronize()
            .await
    }

    /// Deploy, launch, and supervise the binary to an outcome.
    ///
    /// Cancelling the token force-stops the application once; the run then
    /// ends through the log stream's EOF path. Watcher cleanup runs on
    /// every exit path before this returns.
    ///
    /// # Errors
    ///
    /// Returns a [`RunError`] when deployment, a pre-launch command, or the
    /// launch itself fails. A crash, an unreadable exit value, or a closed
    /// log stream is not an error; it is encoded in the outcome.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<ExecutionOutcome, RunError> {
        let session = self.synchronize().await?;

        // Wipe stale signals from any previous run.
        self.checked("log buffer clear", &argv(&["logcat", "-c"]))
            .await?;
        self.checked(
            "marker cleanup",
            &argv(&["shell", "rm", "-f", &session.exit_marker_path]),
        )
        .await?;
        self.checked("log cleanup", &argv(&["shell", "rm", "-f", &session.log_path]))
            .await?;

        let mut stream = self
            .channel
            .open_stream(&argv(&[
                "logcat",
                "-s",
                &format!("{}:*", self.config.log_tag),
            ]))
            .await?;

        let (poster, mut events) = mailbox();
        let mut monitor = CrashMonitor::start(
            Arc::clone(&self.channel),
            &argv(&["shell", "am", "monitor"]),
            self.crash_pattern.clone(),
            poster.clone(),
        )
        .await?;
        let mut watcher = ExitSignalWatcher::start(
            Arc::clone(&self.channel),
            session.exit_marker_path.clone(),
            self.config.poll_interval,
            poster.clone(),
        );
        // `poster` stays alive until cleanup so the mailbox cannot read as
        // closed while the loop is still arbitrating.

        let result = self
            .drive(&session, &mut stream, &mut events, &mut watcher, &cancel)
            .await;

        // Guaranteed cleanup, regardless of how the run ended.
        stream.kill();
        monitor.shutdown().await;
        watcher.shutdown().await;

        result
    }

    /// Force-stop the application on the device.
    ///
    /// Only requests the remote stop; it does not tear down the watcher
    /// tasks, and may be invoked at any time.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`] if the command cannot be executed.
    pub async fn kill(&self) -> Result<(), ChannelError> {
        let output = self
            .channel
            .run(&argv(&["shell", "am", "force-stop", &self.config.package]))
            .await?;
        if !output.success() {
            warn!(exit_code = output.exit_code, "force-stop exited non-zero");
        }
        Ok(())
    }

    async fn drive(
        &mut self,
        session: &DeviceSession,
        stream: &mut RemoteStream,
        events: &mut EventMailbox,
        watcher: &mut ExitSignalWatcher,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, RunError> {
        self.launch(session).await?;

        let mut outcome = ExecutionOutcome::pessimistic();
        let mut kill_requested = false;

        loop {
            tokio::select! {
                () = cancel.cancelled(), if !kill_requested => {
                    info!("cancellation requested; force-stopping the application");
                    kill_requested = true;
                    if let Err(error) = self.kill().await {
                        warn!(%error, "force-stop failed");
                    }
                    // The loop ends once the stopped binary's log stream
                    // closes (the EOF path below).
                }
                event = events.recv() => match event {
                    Some(WatcherEvent::Crashed) => {
                        error!("application crashed");
                        outcome = ExecutionOutcome::crash();
                        break;
                    }
                    Some(WatcherEvent::Exited) => match self.read_exit_marker(session).await {
                        Some(return_code) => {
                            debug!(return_code, "exit marker confirmed");
                            outcome = ExecutionOutcome::exited(return_code);
                            break;
                        }
                        None => {
                            // The marker can be listed before its content is
                            // readable; not a decision, keep arbitrating.
                            debug!("exit marker unreadable; restarting the watcher");
                            watcher.restart();
                        }
                    },
                    None => {
                        warn!("mailbox closed unexpectedly");
                        break;
                    }
                },
                line = stream.next_line() => match line {
                    Some(line) => trace!(target: "gantry::device_log", "{line}"),
                    None => {
                        warn!("log stream closed before an exit signal");
                        break;
                    }
                },
            }
        }

        if outcome.completed && !outcome.crashed {
            self.transcribe(session).await;
        }

        Ok(outcome)
    }

    async fn launch(&self, session: &DeviceSession) -> Result<(), RunError> {
        let mut params = vec![
            format!("--exit-file={}", session.exit_marker_path),
            format!("--log-file={}", session.log_path),
        ];
        params.extend(self.config.extra_args.iter().cloned());
        let params = params.join(",");

        info!(intent = %self.config.start_intent, "launching");
        let output = self
            .channel
            .run(&argv(&[
                "shell",
                "am",
                "start",
                "--esa",
                "args",
                &params,
                &self.config.start_intent,
            ]))
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(RunError::Launch {
                detail: format!("start command exited with code {}", output.exit_code),
            })
        }
    }

    /// Read the exit marker back; `None` means unreadable or unparsable.
    async fn read_exit_marker(&self, session: &DeviceSession) -> Option<i32> {
        let output = self
            .channel
            .run(&argv(&["shell", "cat", &session.exit_marker_path]))
            .await
            .ok()?;
        if !output.success() {
            return None;
        }
        output.stdout.lines().next()?.trim().parse().ok()
    }

    /// Drain the remote log file into the sink. Failures are logged, not
    /// fatal: the outcome is already decided.
    async fn transcribe(&mut self, session: &DeviceSession) {
        match self
            .channel
            .run(&argv(&["shell", "cat", &session.log_path]))
            .await
        {
            Ok(output) if output.success() => {
                if let Err(error) = self.transcriber.transcribe(&output.stdout, &mut self.sink) {
                    warn!(%error, "failed to write the transcript");
                }
            }
            Ok(output) => {
                warn!(exit_code = output.exit_code, "could not drain the log file");
            }
            Err(error) => warn!(%error, "could not drain the log file"),
        }
    }

    async fn checked(&self, operation: &str, args: &[String]) -> Result<(), RunError> {
        let output = self.channel.run(args).await?;
        if output.success() {
            Ok(())
        } else {
            Err(RunError::Device {
                detail: format!("{operation} exited with code {}", output.exit_code),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pessimistic_outcome() {
        let outcome = ExecutionOutcome::pessimistic();
        assert_eq!(outcome.return_code, 1);
        assert!(!outcome.completed);
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_exit_outcome() {
        assert!(ExecutionOutcome::exited(0).is_success());
        let failed = ExecutionOutcome::exited(3);
        assert!(failed.completed);
        assert!(!failed.is_success());
        assert_eq!(failed.return_code, 3);
    }

    #[test]
    fn test_crash_outcome() {
        let outcome = ExecutionOutcome::crash();
        assert!(outcome.completed);
        assert!(outcome.crashed);
        assert_eq!(outcome.return_code, 1);
        assert!(!outcome.is_success());
    }
}
