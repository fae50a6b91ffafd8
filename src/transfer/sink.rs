//! Streaming destinations for large received files.

use crate::protocol::FileMetadata;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWrite;

pub type ArtifactStream = Box<dyn AsyncWrite + Send + Unpin>;

/// An opened stream plus where its bytes end up, if that is a path.
pub struct StreamTarget {
    pub writer: ArtifactStream,
    pub location: Option<PathBuf>,
}

impl StreamTarget {
    pub fn new(writer: ArtifactStream) -> Self {
        Self {
            writer,
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Hands the receiver a writable stream for a file that is too large to
/// buffer. Returning an error makes the receiver buffer the file in memory.
pub trait StreamProvider: Send + Sync {
    fn open(&self, metadata: &FileMetadata) -> io::Result<StreamTarget>;
}

/// Creates one file per artifact inside a directory.
#[derive(Debug, Clone)]
pub struct DirectoryStreamProvider {
    root: PathBuf,
}

impl DirectoryStreamProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(sanitize_file_name(name))
    }
}

impl StreamProvider for DirectoryStreamProvider {
    fn open(&self, metadata: &FileMetadata) -> io::Result<StreamTarget> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.path_for(&metadata.name);
        let file = std::fs::File::create(&path)?;
        let writer: ArtifactStream = Box::new(tokio::fs::File::from_std(file));
        Ok(StreamTarget::new(writer).with_location(path))
    }
}

/// Strip path components and separators from a peer-supplied name.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || c == ':' { '_' } else { c })
        .collect();

    match cleaned.trim() {
        "" | "." | ".." => "download".to_string(),
        trimmed => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\temp\\a.txt"), "a.txt");
        assert_eq!(sanitize_file_name(".."), "download");
        assert_eq!(sanitize_file_name(""), "download");
    }

    #[tokio::test]
    async fn test_directory_provider_writes_file() {
        let dir = TempDir::new().unwrap();
        let provider = DirectoryStreamProvider::new(dir.path().join("incoming"));
        let meta = FileMetadata::new("../video.mp4", 5, "video/mp4");

        let mut target = provider.open(&meta).unwrap();
        target.writer.write_all(b"hello").await.unwrap();
        target.writer.flush().await.unwrap();

        let location = target.location.clone().unwrap();
        assert_eq!(location, dir.path().join("incoming").join("video.mp4"));
        assert_eq!(tokio::fs::read(location).await.unwrap(), b"hello");
    }
}
