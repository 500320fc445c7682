//! Per-run remote path set.
//!
//! Device paths always use `/` separators, independent of the host OS.

/// Join device path segments with `/`.
#[must_use]
pub fn device_path_join(segments: &[&str]) -> String {
    segments.join("/")
}

/// The remote paths scoped to one run.
///
/// Created once the installed application's data directory is known; the
/// marker and log files are deleted before launch and never reused across
/// runs.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    /// Installed application data directory.
    pub data_dir: String,
    /// Writable files directory under the data directory.
    pub files_dir: String,
    /// Destination of the pushed content tree.
    pub content_dir: String,
    /// Fingerprint record file.
    pub record_path: String,
    /// Exit-marker file written by the binary on completion.
    pub exit_marker_path: String,
    /// Log file written by the binary.
    pub log_path: String,
    /// Install location of the pushed native binary.
    pub binary_path: String,
}

impl DeviceSession {
    /// Derive the session paths from the discovered data directory.
    #[must_use]
    pub fn new(data_dir: &str, content_dir_name: &str, lib_name: &str) -> Self {
        let files_dir = device_path_join(&[data_dir, "files"]);
        Self {
            data_dir: data_dir.to_string(),
            content_dir: device_path_join(&[&files_dir, content_dir_name]),
            record_path: device_path_join(&[&files_dir, "checksum"]),
            exit_marker_path: device_path_join(&[&files_dir, "exitcode"]),
            log_path: device_path_join(&[&files_dir, "log"]),
            binary_path: device_path_join(&[data_dir, "lib", lib_name]),
            files_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_paths() {
        let session = DeviceSession::new("/data/user/0/com.example.app", "content", "libapp.so");
        assert_eq!(session.files_dir, "/data/user/0/com.example.app/files");
        assert_eq!(
            session.exit_marker_path,
            "/data/user/0/com.example.app/files/exitcode"
        );
        assert_eq!(
            session.content_dir,
            "/data/user/0/com.example.app/files/content"
        );
        assert_eq!(
            session.binary_path,
            "/data/user/0/com.example.app/lib/libapp.so"
        );
    }
}
