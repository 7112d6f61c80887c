//! File handles consumed by the pipeline.
//!
//! Every stage reads through [`AssetFile`], which exposes only a name, a size
//! and ranged reads. Nothing ever needs the whole file resident: the full hash
//! streams fixed chunks and the parsers read bounded prefixes.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{ModelprintError, Result};

/// A read-only, immutable file handle.
#[async_trait]
pub trait AssetFile: Send + Sync {
    /// File name including extension (no directory components).
    fn name(&self) -> &str;

    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Fails with `UnreadableFile` if the range runs past the end of the file.
    async fn read_range(&self, offset: u64, len: usize) -> Result<Bytes>;

    /// Lowercased extension without the dot, if any.
    fn extension(&self) -> Option<String> {
        Path::new(self.name())
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
    }
}

/// A file on the local filesystem.
///
/// The size is captured on open; reads run on the blocking pool.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    name: String,
    size: u64,
}

impl LocalFile {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| ModelprintError::io_with_path(e, &path))?;
        if !metadata.is_file() {
            return Err(ModelprintError::UnreadableFile {
                message: "not a regular file".to_string(),
                path: Some(path),
                source: None,
            });
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            path,
            name,
            size: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AssetFile for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, offset: u64, len: usize) -> Result<Bytes> {
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            let mut file =
                std::fs::File::open(&path).map_err(|e| ModelprintError::io_with_path(e, &path))?;
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| ModelprintError::io_with_path(e, &path))?;
            let mut buffer = vec![0u8; len];
            file.read_exact(&mut buffer)
                .map_err(|e| ModelprintError::io_with_path(e, &path))?;
            Ok(Bytes::from(buffer))
        })
        .await
        .map_err(|e| ModelprintError::UnreadableFile {
            message: format!("read task failed: {}", e),
            path: Some(self.path.clone()),
            source: None,
        })?
    }
}

/// An in-memory file, used for uploads already held in memory and in tests.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    name: String,
    data: Bytes,
}

impl MemoryFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl AssetFile for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, offset: u64, len: usize) -> Result<Bytes> {
        let start = usize::try_from(offset).ok();
        let end = start.and_then(|s| s.checked_add(len));
        match (start, end) {
            (Some(start), Some(end)) if end <= self.data.len() => {
                Ok(self.data.slice(start..end))
            }
            _ => Err(ModelprintError::UnreadableFile {
                message: format!(
                    "range {}+{} out of bounds for {} bytes",
                    offset,
                    len,
                    self.data.len()
                ),
                path: None,
                source: None,
            }),
        }
    }
}
