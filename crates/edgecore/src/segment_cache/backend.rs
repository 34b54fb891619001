#![forbid(unsafe_code)]

use crate::domain::SegmentKey;
use crate::error::Error;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Origin of segment bytes behind every cache tier.
#[async_trait]
pub trait SegmentBackend: Send + Sync {
    /// Fetch the full segment. Failures surface as
    /// [`Error::SegmentUnavailable`].
    async fn fetch(&self, key: &SegmentKey) -> Result<Bytes, Error>;
}

/// Serves segments from a local recording archive laid out as
/// `<root>/<task>/<start>_<duration>.seg`.
#[derive(Debug, Clone)]
pub struct FsSegmentBackend {
    root: PathBuf,
}

impl FsSegmentBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &SegmentKey) -> PathBuf {
        self.root
            .join(key.stream_task_id().to_string())
            .join(key.file_name())
    }
}

#[async_trait]
impl SegmentBackend for FsSegmentBackend {
    async fn fetch(&self, key: &SegmentKey) -> Result<Bytes, Error> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(Error::SegmentUnavailable {
                key: *key,
                reason: format!("{} not found in archive", path.display()),
            }),
            Err(err) => Err(Error::SegmentUnavailable {
                key: *key,
                reason: err.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reads_archived_segment() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("42")).unwrap();
        std::fs::write(dir.path().join("42").join("0_10.seg"), b"frames").unwrap();

        let backend = FsSegmentBackend::new(dir.path());
        let key = SegmentKey::new(42, 0, 10).unwrap();
        assert_eq!(backend.fetch(&key).await.unwrap(), Bytes::from_static(b"frames"));
    }

    #[tokio::test]
    async fn missing_segment_is_unavailable() {
        let dir = tempdir().unwrap();
        let backend = FsSegmentBackend::new(dir.path());
        let key = SegmentKey::new(42, 10, 10).unwrap();
        let err = backend.fetch(&key).await.unwrap_err();
        assert!(matches!(err, Error::SegmentUnavailable { key: k, .. } if k == key));
    }
}
