//! Remote device test supervision.
//!
//! Gantry runs a test binary on a remotely-controlled device that exposes
//! no native process handle. The only observable signals are a polled
//! exit-marker file, a live system-event stream that may report a crash,
//! and a live log stream that terminates when the remote logging subsystem
//! stops. This crate turns those three unreliable signals into one
//! authoritative [`supervisor::ExecutionOutcome`] plus a captured
//! transcript, and avoids redundant transfer to the device by
//! fingerprinting the deployable artifacts.
//!
//! The device command surface is abstracted behind
//! [`channel::RemoteCommandChannel`]; [`channel::AdbChannel`] is the
//! supplied implementation for the Android family. One conforming channel
//! per device family is enough to reuse the whole supervision protocol.

pub mod channel;
pub mod config;
pub mod deploy;
pub mod fingerprint;
pub mod mailbox;
pub mod monitor;
pub mod session;
pub mod supervisor;
pub mod transcript;
pub mod watcher;

pub use channel::{AdbChannel, ChannelError, CommandOutput, RemoteCommandChannel, RemoteStream};
pub use config::{ConfigError, LauncherConfig};
pub use deploy::{DeployError, DeploymentManager};
pub use fingerprint::{fingerprint, ArtifactSet, Fingerprint, FingerprintError};
pub use mailbox::WatcherEvent;
pub use session::DeviceSession;
pub use supervisor::{ExecutionOutcome, RunError, Supervisor};
pub use transcript::LogTranscriber;
