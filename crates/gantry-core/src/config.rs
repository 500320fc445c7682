//! Launch profile parsing and validation.
//!
//! A launch profile is a TOML file naming the application package, the
//! start command target, and the runtime knobs of the supervision protocol.
//! Durations are written in human-readable form (`1s`, `250ms`).

use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading a launch profile.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The profile file could not be read.
    #[error("failed to read profile: {0}")]
    Io(#[from] std::io::Error),

    /// The profile is not valid TOML or is missing required fields.
    #[error("failed to parse profile: {0}")]
    Parse(#[from] toml::de::Error),

    /// The profile parsed but carries an unusable value.
    #[error("invalid profile: {0}")]
    Validation(String),
}

/// Launch profile for one application under supervision.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LauncherConfig {
    /// Application package name installed on the device.
    pub package: String,

    /// Component started to run the binary.
    pub start_intent: String,

    /// Package file name, relative to the build output directory.
    pub package_file: String,

    /// Name of the native library inside the installed package.
    pub lib_name: String,

    /// Log tag the binary writes under; drives the live stream filter and
    /// the transcript prefix strip.
    pub log_tag: String,

    /// Content directory name, both locally and on the device.
    #[serde(default = "default_content_dir")]
    pub content_dir: String,

    /// Pattern marking a crash line on the system event stream.
    #[serde(default = "default_crash_pattern")]
    pub crash_pattern: String,

    /// Exit-marker poll interval.
    #[serde(default = "default_poll_interval")]
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Device serial to target; the single connected device when absent.
    #[serde(default)]
    pub device_serial: Option<String>,

    /// Extra command-line parameters forwarded to the binary.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_content_dir() -> String {
    "content".to_string()
}

fn default_crash_pattern() -> String {
    r"\*\* ERROR".to_string()
}

const fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

impl LauncherConfig {
    /// Load a profile from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a profile from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the profile.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] on empty identifiers or an
    /// uncompilable crash pattern.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("package", &self.package),
            ("start_intent", &self.start_intent),
            ("package_file", &self.package_file),
            ("lib_name", &self.lib_name),
            ("log_tag", &self.log_tag),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{name} must not be empty")));
            }
        }
        self.crash_regex()?;
        Ok(())
    }

    /// Compile the crash pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when the pattern does not compile.
    pub fn crash_regex(&self) -> Result<Regex, ConfigError> {
        Regex::new(&self.crash_pattern).map_err(|err| {
            ConfigError::Validation(format!(
                "crash_pattern `{}` does not compile: {err}",
                self.crash_pattern
            ))
        })
    }
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
package = "com.example.testapp"
start_intent = "com.example.testapp/com.example.app.MainActivity"
package_file = "app-debug.apk"
lib_name = "libapp.so"
log_tag = "testapp"
"#;

    #[test]
    fn test_minimal_profile_defaults() {
        let config = LauncherConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.content_dir, "content");
        assert_eq!(config.crash_pattern, r"\*\* ERROR");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert!(config.device_serial.is_none());
        assert!(config.extra_args.is_empty());
    }

    #[test]
    fn test_poll_interval_is_humantime() {
        let toml = format!("{MINIMAL}poll_interval = \"250ms\"\n");
        let config = LauncherConfig::from_toml(&toml).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_missing_required_field_fails_parse() {
        let err = LauncherConfig::from_toml("package = \"com.example\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_bad_crash_pattern_fails_validation() {
        let toml = format!("{MINIMAL}crash_pattern = \"([unclosed\"\n");
        let err = LauncherConfig::from_toml(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_empty_identifier_fails_validation() {
        let toml = MINIMAL.replace("\"testapp\"", "\" \"");
        let err = LauncherConfig::from_toml(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
