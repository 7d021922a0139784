//! Topology snapshot file source.

use sha2::{Digest, Sha256};
use shared_types::TopologySnapshot;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed snapshot {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A decoded snapshot with the digest of the bytes it came from.
#[derive(Debug)]
pub struct SnapshotRead {
    pub snapshot: TopologySnapshot,
    pub fingerprint: String,
}

/// Reads a JSON-encoded `TopologySnapshot` from disk.
pub struct FileSnapshotSource {
    path: PathBuf,
}

impl FileSnapshotSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and decode the file.
    pub async fn read(&self) -> Result<SnapshotRead, SnapshotError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| SnapshotError::Io {
                path: self.path.clone(),
                source,
            })?;

        let fingerprint = hex::encode(Sha256::digest(&bytes));
        let snapshot =
            serde_json::from_slice(&bytes).map_err(|source| SnapshotError::Decode {
                path: self.path.clone(),
                source,
            })?;

        Ok(SnapshotRead {
            snapshot,
            fingerprint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identical_bytes_same_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.json");
        std::fs::write(&path, r#"{"dons": {}, "capabilities": {}, "nodes": {}}"#).unwrap();
        let source = FileSnapshotSource::new(&path);

        let first = source.read().await.unwrap();
        let second = source.read().await.unwrap();
        assert_eq!(first.fingerprint, second.fingerprint);
        assert!(first.snapshot.dons.is_empty());

        std::fs::write(&path, r#"{"dons": {}}"#).unwrap();
        assert_ne!(source.read().await.unwrap().fingerprint, first.fingerprint);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let source = FileSnapshotSource::new("/nonexistent/topology.json");
        assert!(matches!(source.read().await, Err(SnapshotError::Io { .. })));
    }

    #[tokio::test]
    async fn test_garbage_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            FileSnapshotSource::new(&path).read().await,
            Err(SnapshotError::Decode { .. })
        ));
    }
}
