//! Content fingerprinting for the deployable artifact set.
//!
//! The fingerprint decides whether the copy on the device is stale, so it
//! must be a pure function of artifact identity: the same package and
//! content tree always hash to the same digest, no matter how the
//! filesystem enumerates them. Entries are therefore sorted by their
//! normalized relative path before hashing, and paths are encoded with `/`
//! separators regardless of host OS.
//!
//! The native binary is part of the artifact set but deliberately not part
//! of the digest: the binary is pushed on every run, so a binary-only
//! change must not retrigger a full content push.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// The deployable inputs for one run, as host paths.
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    /// Installable application package.
    pub package: PathBuf,
    /// Native binary pushed over the installed package's copy.
    pub binary: PathBuf,
    /// Directory tree of supporting content files.
    pub content_root: PathBuf,
}

/// Errors raised while fingerprinting the artifact set.
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// A required artifact path does not exist.
    #[error("artifact missing: {}", path.display())]
    ArtifactMissing {
        /// The absent path.
        path: PathBuf,
    },

    /// Local filesystem failure while enumerating or inspecting artifacts.
    #[error("failed to inspect {}: {source}", path.display())]
    Io {
        /// Path that could not be inspected.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

/// A fixed-width hex digest identifying the artifact set's content state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// The hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(digest: String) -> Self {
        Self(digest)
    }
}

/// Compute the fingerprint of an artifact set.
///
/// # Errors
///
/// Returns [`FingerprintError::ArtifactMissing`] when the package, binary,
/// or content root is absent, and [`FingerprintError::Io`] on any local
/// filesystem failure.
pub fn fingerprint(artifacts: &ArtifactSet) -> Result<Fingerprint, FingerprintError> {
    for path in [&artifacts.package, &artifacts.binary, &artifacts.content_root] {
        if !path.exists() {
            return Err(FingerprintError::ArtifactMissing { path: path.clone() });
        }
    }

    let mut hasher = Sha256::new();

    let package_name = artifacts
        .package
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    hasher.update(encode_entry(&package_name, &stat(&artifacts.package)?));

    let mut entries = Vec::new();
    collect_files(&artifacts.content_root, &artifacts.content_root, &mut entries)?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    for (relative, meta) in &entries {
        hasher.update(encode_entry(relative, meta));
    }

    Ok(Fingerprint(format!("{:x}", hasher.finalize())))
}

/// (byte size, mtime seconds, mtime subsecond nanos) identity triple.
type StatTriple = (u64, u64, u32);

fn stat(path: &Path) -> Result<StatTriple, FingerprintError> {
    let meta = fs::metadata(path).map_err(|source| FingerprintError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mtime = meta
        .modified()
        .map_err(|source| FingerprintError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Ok((meta.len(), mtime.as_secs(), mtime.subsec_nanos()))
}

fn encode_entry(relative: &str, &(len, secs, nanos): &StatTriple) -> String {
    format!("{relative}\n{len}\n{secs}.{nanos:09}\n")
}

fn collect_files(
    root: &Path,
    dir: &Path,
    entries: &mut Vec<(String, StatTriple)>,
) -> Result<(), FingerprintError> {
    let reader = fs::read_dir(dir).map_err(|source| FingerprintError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in reader {
        let entry = entry.map_err(|source| FingerprintError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, entries)?;
        } else {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            entries.push((relative, stat(&path)?));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, ArtifactSet) {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("app.pkg");
        let binary = dir.path().join("libtarget.so");
        let content_root = dir.path().join("content");
        fs::write(&package, b"package bytes").unwrap();
        fs::write(&binary, b"binary bytes").unwrap();
        fs::create_dir_all(content_root.join("nested")).unwrap();
        fs::write(content_root.join("a.txt"), b"alpha").unwrap();
        fs::write(content_root.join("nested/b.txt"), b"beta").unwrap();
        (
            dir,
            ArtifactSet {
                package,
                binary,
                content_root,
            },
        )
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let (_dir, artifacts) = fixture();
        let first = fingerprint(&artifacts).unwrap();
        let second = fingerprint(&artifacts).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_survives_relocation() {
        let (dir, artifacts) = fixture();
        let before = fingerprint(&artifacts).unwrap();

        // Moving the whole tree keeps sizes and mtimes; relative paths keep
        // the digest stable across checkouts.
        let moved = dir.path().join("moved");
        fs::create_dir(&moved).unwrap();
        fs::rename(&artifacts.content_root, moved.join("content")).unwrap();
        let relocated = ArtifactSet {
            content_root: moved.join("content"),
            ..artifacts
        };
        let after = fingerprint(&relocated).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_fingerprint_tracks_content_changes() {
        let (_dir, artifacts) = fixture();
        let before = fingerprint(&artifacts).unwrap();
        fs::write(artifacts.content_root.join("a.txt"), b"alpha prime").unwrap();
        let after = fingerprint(&artifacts).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_binary_change_does_not_affect_digest() {
        let (_dir, artifacts) = fixture();
        let before = fingerprint(&artifacts).unwrap();
        fs::write(&artifacts.binary, b"rebuilt binary bytes").unwrap();
        let after = fingerprint(&artifacts).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_missing_artifact_is_an_error() {
        let (_dir, mut artifacts) = fixture();
        artifacts.package = artifacts.package.with_file_name("absent.pkg");
        let err = fingerprint(&artifacts).unwrap_err();
        assert!(matches!(err, FingerprintError::ArtifactMissing { .. }));
    }
}
