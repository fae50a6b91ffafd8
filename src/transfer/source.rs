//! Seekable byte sources the sender reads chunks from.

use crate::protocol::FileMetadata;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Random-access read of a file's bytes.
///
/// `read_range` may be called several times for the same range when a read
/// is retried.
pub trait ByteSource: Send + Sync {
    fn metadata(&self) -> &FileMetadata;

    /// Read bytes `[start, end)`.
    fn read_range(&self, start: u64, end: u64) -> BoxFuture<'_, io::Result<Bytes>>;
}

/// Source backed by a buffer already in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    metadata: FileMetadata,
    data: Bytes,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            metadata: FileMetadata::new(name, data.len() as u64, mime_type),
            data,
        }
    }
}

impl ByteSource for MemorySource {
    fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    fn read_range(&self, start: u64, end: u64) -> BoxFuture<'_, io::Result<Bytes>> {
        let len = self.data.len() as u64;
        let result = if start > end || end > len {
            Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {start}..{end} beyond {len} bytes"),
            ))
        } else {
            Ok(self.data.slice(start as usize..end as usize))
        };
        Box::pin(async move { result })
    }
}

/// Source backed by a file on disk. The file is reopened for every range, so
/// a file moved or deleted mid-transfer surfaces as `NotFound`.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    metadata: FileMetadata,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let size = tokio::fs::metadata(&path).await?.len();
        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let mime_type = guess_mime_type(&name);

        Ok(Self {
            metadata: FileMetadata::new(name, size, mime_type),
            path,
        })
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.metadata.mime_type = mime_type.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    fn read_range(&self, start: u64, end: u64) -> BoxFuture<'_, io::Result<Bytes>> {
        Box::pin(async move {
            let mut file = File::open(&self.path).await?;
            file.seek(SeekFrom::Start(start)).await?;
            let mut buf = vec![0u8; end.saturating_sub(start) as usize];
            file.read_exact(&mut buf).await?;
            Ok(Bytes::from(buf))
        })
    }
}

/// MIME type from a file name's extension.
pub fn guess_mime_type(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => DEFAULT_MIME_TYPE,
    }
}
