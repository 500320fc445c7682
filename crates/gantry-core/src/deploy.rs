//! Incremental deployment.
//!
//! Deciding what to push is the expensive half of a run: the content tree
//! can be large, and most runs change nothing but the binary. The manager
//! compares the local artifact fingerprint against the record persisted on
//! the device and only pushes content when they differ. The binary itself
//! is pushed on every run regardless: its identity is not part of the
//! fingerprint, so a binary-only rebuild never retriggers a content push.

use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

use crate::channel::{argv, ChannelError, CommandOutput, RemoteCommandChannel};
use crate::config::LauncherConfig;
use crate::fingerprint::{fingerprint, ArtifactSet, Fingerprint, FingerprintError};
use crate::session::DeviceSession;

/// Matches the fingerprint record line persisted on the device.
static RECORD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Checksum=(\S+)").expect("record pattern"));

/// Matches the data directory line in the package dump.
static DATA_DIR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"dataDir=(\S+)").expect("data dir pattern"));

/// Errors raised during deployment.
#[derive(Debug, Error)]
pub enum DeployError {
    /// A remote command could not be executed at all.
    #[error("device unreachable: {0}")]
    Unreachable(#[from] ChannelError),

    /// A required install/push step exited non-zero.
    #[error("deploy failed: {operation}: {detail}")]
    Failed {
        /// The step that failed.
        operation: String,
        /// What went wrong.
        detail: String,
    },

    /// The local artifact set could not be fingerprinted.
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
}

impl DeployError {
    fn failed(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Failed {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}

/// Decides whether the device copy is stale and pushes what is missing.
pub struct DeploymentManager<'a> {
    channel: Arc<dyn RemoteCommandChannel>,
    config: &'a LauncherConfig,
    artifacts: &'a ArtifactSet,
}

impl<'a> DeploymentManager<'a> {
    /// Create a manager over the given channel, profile, and artifacts.
    #[must_use]
    pub fn new(
        channel: Arc<dyn RemoteCommandChannel>,
        config: &'a LauncherConfig,
        artifacts: &'a ArtifactSet,
    ) -> Self {
        Self {
            channel,
            config,
            artifacts,
        }
    }

    /// Whether the application package is absent from the device.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Unreachable`] if the query cannot run.
    pub async fn needs_install(&self) -> Result<bool, DeployError> {
        let output = self
            .channel
            .run(&argv(&[
                "shell",
                "cmd",
                "package",
                "list",
                "packages",
                "|",
                "grep",
                &self.config.package,
            ]))
            .await?;
        Ok(!output.success())
    }

    /// Whether the device copy differs from the local fingerprint.
    ///
    /// An absent or unparsable record forces a redeploy; a channel failure
    /// while reading it is a hard error, never treated as "no record".
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Unreachable`] if the record cannot be read.
    pub async fn needs_update(
        &self,
        local: &Fingerprint,
        record_path: &str,
    ) -> Result<bool, DeployError> {
        let output = self
            .channel
            .run(&argv(&["shell", "cat", record_path]))
            .await?;
        if !output.success() {
            return Ok(true);
        }
        Ok(match parse_record(&output.stdout) {
            Some(remote) => remote != *local,
            None => true,
        })
    }

    /// Bring the device copy up to date and return the session paths.
    ///
    /// Steps, in order: device readiness, force-stop of any previous
    /// instance, install if absent, data-directory discovery, conditional
    /// content + record push, unconditional binary push.
    ///
    /// # Errors
    ///
    /// Fatal on the first failing step; there are no retries.
    pub async fn synchronize(&self) -> Result<DeviceSession, DeployError> {
        self.checked("wait for device", &argv(&["wait-for-device"]))
            .await?;
        self.checked("restart daemon as root", &argv(&["root"])).await?;
        self.checked("wait for device", &argv(&["wait-for-device"]))
            .await?;
        self.checked(
            "stop previous instance",
            &argv(&["shell", "am", "force-stop", &self.config.package]),
        )
        .await?;

        let needs_install = self.needs_install().await?;
        if needs_install {
            info!(package = %self.config.package, "package absent; installing");
            self.reinstall().await?;
        }

        let data_dir = self.data_dir().await?;
        let session = DeviceSession::new(&data_dir, &self.config.content_dir, &self.config.lib_name);

        let local = fingerprint(self.artifacts)?;
        if self.needs_update(&local, &session.record_path).await? {
            info!(fingerprint = %local, "device copy is stale; pushing content");
            if !needs_install {
                // Reinstall so the pushed content lands in a clean package.
                self.reinstall().await?;
            }
            self.checked(
                "content push",
                &argv(&[
                    "push",
                    &self.artifacts.content_root.to_string_lossy(),
                    &session.content_dir,
                ]),
            )
            .await?;
            // Without this the files dir is not writable by the app.
            self.checked(
                "files chmod",
                &argv(&["shell", "chmod", "a+rwx", &session.files_dir]),
            )
            .await?;
            self.push_record(&local, &session.record_path).await?;
        } else {
            debug!("device copy is current; skipping content push");
        }

        self.checked(
            "binary push",
            &argv(&[
                "push",
                &self.artifacts.binary.to_string_lossy(),
                &session.binary_path,
            ]),
        )
        .await?;

        Ok(session)
    }

    async fn reinstall(&self) -> Result<(), DeployError> {
        let uninstall = self
            .channel
            .run(&argv(&["uninstall", &self.config.package]))
            .await?;
        if !uninstall.success() {
            debug!(
                exit_code = uninstall.exit_code,
                "uninstall reported non-zero; package may not have been present"
            );
        }
        self.checked(
            "package install",
            &argv(&["install", &self.artifacts.package.to_string_lossy()]),
        )
        .await?;
        Ok(())
    }

    async fn data_dir(&self) -> Result<String, DeployError> {
        let output = self
            .checked(
                "package dump",
                &argv(&["shell", "pm", "dump", &self.config.package]),
            )
            .await?;
        output
            .stdout
            .lines()
            .find_map(|line| DATA_DIR_PATTERN.captures(line))
            .map(|captures| captures[1].to_string())
            .ok_or_else(|| {
                DeployError::failed("package dump", "no data directory in package dump")
            })
    }

    async fn push_record(&self, local: &Fingerprint, record_path: &str) -> Result<(), DeployError> {
        let record = format!("Checksum={local}");
        self.checked(
            "record push",
            &argv(&["shell", "echo", &record, ">", record_path]),
        )
        .await?;
        Ok(())
    }

    async fn checked(
        &self,
        operation: &str,
        args: &[String],
    ) -> Result<CommandOutput, DeployError> {
        let output = self.channel.run(args).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(DeployError::failed(
                operation,
                format!("exit code {}", output.exit_code),
            ))
        }
    }
}

fn parse_record(text: &str) -> Option<Fingerprint> {
    text.lines()
        .find_map(|line| RECORD_PATTERN.captures(line.trim()))
        .map(|captures| Fingerprint::from(captures[1].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record() {
        let record = parse_record("Checksum=deadbeef\n").unwrap();
        assert_eq!(record.as_str(), "deadbeef");
    }

    #[test]
    fn test_parse_record_ignores_noise() {
        assert!(parse_record("").is_none());
        assert!(parse_record("cat: no such file\n").is_none());
        assert!(parse_record("Checksum=\n").is_none());
    }

    #[test]
    fn test_parse_record_scans_lines() {
        let record = parse_record("restarting adbd\nChecksum=cafe\n").unwrap();
        assert_eq!(record.as_str(), "cafe");
    }
}
