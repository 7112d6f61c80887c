//! Content fingerprints for model files.
//!
//! Files up to the full-hash threshold get a streaming SHA-256 over every byte.
//! Larger files get a quick hash: SHA-256 over the first window followed by the
//! last window. Quick digests carry a literal tag and are never handed out as
//! full-file digests, since registries only know the latter.

use crate::asset::AssetFile;
use crate::config::{FingerprintConfig, HashingConfig};
use crate::error::{ModelprintError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, warn};

/// Which strategy produced a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintAlgorithm {
    FullSha256,
    QuickSha256,
}

/// A computed content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFingerprint {
    pub algorithm: FingerprintAlgorithm,
    /// Lowercase hex digest; quick digests carry the `quick-sha256:` prefix.
    pub digest: String,
}

impl FileFingerprint {
    fn full(hex: String) -> Self {
        Self {
            algorithm: FingerprintAlgorithm::FullSha256,
            digest: hex,
        }
    }

    fn quick(hex: String) -> Self {
        Self {
            algorithm: FingerprintAlgorithm::QuickSha256,
            digest: format!("{}{}", HashingConfig::QUICK_TAG, hex),
        }
    }

    /// The bare hex digest, without any tag.
    pub fn hex(&self) -> &str {
        self.digest
            .strip_prefix(HashingConfig::QUICK_TAG)
            .unwrap_or(&self.digest)
    }

    /// The digest if it covers the whole file, comparable to registry SHA-256 values.
    pub fn full_sha256(&self) -> Option<&str> {
        match self.algorithm {
            FingerprintAlgorithm::FullSha256 => Some(&self.digest),
            FingerprintAlgorithm::QuickSha256 => None,
        }
    }
}

impl fmt::Display for FileFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest)
    }
}

/// Outcome of fingerprinting. `Unavailable` blocks identity lookups only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Fingerprint {
    Computed(FileFingerprint),
    Unavailable { reason: String },
}

impl Fingerprint {
    pub fn computed(&self) -> Option<&FileFingerprint> {
        match self {
            Fingerprint::Computed(fp) => Some(fp),
            Fingerprint::Unavailable { .. } => None,
        }
    }

    pub fn full_sha256(&self) -> Option<&str> {
        self.computed().and_then(FileFingerprint::full_sha256)
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Fingerprint::Computed(_))
    }
}

/// Chooses between full and quick hashing by file size.
#[derive(Debug, Clone, Default)]
pub struct FingerprintEngine {
    config: FingerprintConfig,
}

impl FingerprintEngine {
    pub fn new(config: FingerprintConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FingerprintConfig {
        &self.config
    }

    /// Fingerprint `file`. Never fails: the full path falls back to the quick
    /// path, and a failing quick path yields `Fingerprint::Unavailable`.
    pub async fn fingerprint(&self, file: &dyn AssetFile) -> Fingerprint {
        let size = file.size();

        if size <= self.config.full_hash_threshold {
            match self.full_hash(file).await {
                Ok(hex) => return Fingerprint::Computed(FileFingerprint::full(hex)),
                Err(e) => warn!(
                    "Full hash of {} failed, falling back to quick hash: {}",
                    file.name(),
                    e
                ),
            }
        }

        match self.quick_hash(file).await {
            Ok(hex) => {
                debug!("Quick hash for {} ({} bytes)", file.name(), size);
                Fingerprint::Computed(FileFingerprint::quick(hex))
            }
            Err(e) => {
                warn!("Fingerprint unavailable for {}: {}", file.name(), e);
                Fingerprint::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// SHA-256 over the entire file, streamed in `chunk_size` reads.
    pub async fn full_hash(&self, file: &dyn AssetFile) -> Result<String> {
        let size = file.size();
        let chunk_size = self.config.chunk_size.max(1) as u64;
        let mut hasher = Sha256::new();
        let mut offset = 0u64;

        while offset < size {
            let len = chunk_size.min(size - offset) as usize;
            let chunk = file.read_range(offset, len).await?;
            hasher.update(&chunk);
            offset += len as u64;
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// SHA-256 over (first window ++ last window).
    ///
    /// Each window is clamped to the file size. On files shorter than two
    /// windows the windows overlap and the overlapping bytes are hashed twice.
    pub async fn quick_hash(&self, file: &dyn AssetFile) -> Result<String> {
        let size = file.size();
        let window = (self.config.quick_window_size as u64).min(size);
        if window == 0 && size > 0 {
            return Err(ModelprintError::Config {
                message: "quick hash window is zero".into(),
            });
        }

        let first = file.read_range(0, window as usize).await?;
        let last = file.read_range(size - window, window as usize).await?;

        let mut hasher = Sha256::new();
        hasher.update(&first);
        hasher.update(&last);
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Verify that `file` hashes to `expected` (full SHA-256, case-insensitive).
pub async fn verify_sha256(file: &dyn AssetFile, expected: &str) -> Result<()> {
    let engine = FingerprintEngine::default();
    let actual = engine.full_hash(file).await?;
    let expected_lower = expected.to_lowercase();

    if actual == expected_lower {
        Ok(())
    } else {
        Err(ModelprintError::HashMismatch {
            expected: expected_lower,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{LocalFile, MemoryFile};
    use async_trait::async_trait;
    use bytes::Bytes;

    fn small_engine(threshold: u64, window: usize) -> FingerprintEngine {
        FingerprintEngine::new(FingerprintConfig {
            full_hash_threshold: threshold,
            quick_window_size: window,
            chunk_size: 7,
        })
    }

    #[tokio::test]
    async fn test_full_hash_empty_file() {
        let file = MemoryFile::new("empty.bin", Vec::new());
        let fp = FingerprintEngine::default().fingerprint(&file).await;

        let fp = fp.computed().unwrap();
        assert_eq!(fp.algorithm, FingerprintAlgorithm::FullSha256);
        assert_eq!(
            fp.digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn test_chunked_full_hash_matches_one_shot_digest() {
        let data: Vec<u8> = (0..200u8).collect();
        let expected = hex::encode(Sha256::digest(&data));

        let file = MemoryFile::new("a.bin", data);
        let fp = small_engine(1000, 16).fingerprint(&file).await;
        assert_eq!(fp.full_sha256(), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn test_threshold_boundary_selects_algorithm() {
        let engine = small_engine(100, 16);

        let at_threshold = MemoryFile::new("a.bin", vec![1u8; 100]);
        let over_threshold = MemoryFile::new("b.bin", vec![1u8; 101]);

        let at = engine.fingerprint(&at_threshold).await;
        let over = engine.fingerprint(&over_threshold).await;

        assert_eq!(
            at.computed().unwrap().algorithm,
            FingerprintAlgorithm::FullSha256
        );
        let over = over.computed().unwrap();
        assert_eq!(over.algorithm, FingerprintAlgorithm::QuickSha256);
        assert!(over.digest.starts_with("quick-sha256:"));
        assert_eq!(over.hex().len(), 64);
        assert!(over.full_sha256().is_none());
    }

    #[tokio::test]
    async fn test_quick_hash_ignores_middle_bytes() {
        let engine = small_engine(10, 16);
        let mut data = vec![0u8; 100];
        data[..16].copy_from_slice(&[7u8; 16]);

        let before = engine
            .fingerprint(&MemoryFile::new("m.bin", data.clone()))
            .await;
        data[50] = 0xFF;
        let after = engine.fingerprint(&MemoryFile::new("m.bin", data.clone())).await;
        assert_eq!(before, after);

        data[99] = 0xFF;
        let tail_changed = engine.fingerprint(&MemoryFile::new("m.bin", data)).await;
        assert_ne!(before, tail_changed);
    }

    #[tokio::test]
    async fn test_quick_hash_overlapping_windows_concatenates() {
        let engine = small_engine(4, 16);
        let data: Vec<u8> = (0..20u8).collect();

        let mut concat = data[..16].to_vec();
        concat.extend_from_slice(&data[4..]);
        let expected = format!("quick-sha256:{}", hex::encode(Sha256::digest(&concat)));

        let fp = engine.fingerprint(&MemoryFile::new("o.bin", data)).await;
        assert_eq!(fp.computed().unwrap().digest, expected);
    }

    struct BrokenFile;

    #[async_trait]
    impl AssetFile for BrokenFile {
        fn name(&self) -> &str {
            "broken.safetensors"
        }
        fn size(&self) -> u64 {
            64
        }
        async fn read_range(&self, _offset: u64, _len: usize) -> Result<Bytes> {
            Err(ModelprintError::UnreadableFile {
                message: "device error".into(),
                path: None,
                source: None,
            })
        }
    }

    #[tokio::test]
    async fn test_unreadable_file_is_unavailable_not_error() {
        let fp = FingerprintEngine::default().fingerprint(&BrokenFile).await;
        assert!(!fp.is_available());
        assert!(fp.full_sha256().is_none());
    }

    /// Fails reads past the first window so only the full path breaks.
    struct FlakyTail {
        data: Vec<u8>,
    }

    #[async_trait]
    impl AssetFile for FlakyTail {
        fn name(&self) -> &str {
            "flaky.bin"
        }
        fn size(&self) -> u64 {
            self.data.len() as u64
        }
        async fn read_range(&self, offset: u64, len: usize) -> Result<Bytes> {
            if len > 16 {
                return Err(ModelprintError::UnreadableFile {
                    message: "large read refused".into(),
                    path: None,
                    source: None,
                });
            }
            let start = offset as usize;
            Ok(Bytes::copy_from_slice(&self.data[start..start + len]))
        }
    }

    #[tokio::test]
    async fn test_full_hash_failure_falls_back_to_quick() {
        let engine = FingerprintEngine::new(FingerprintConfig {
            full_hash_threshold: 1000,
            quick_window_size: 16,
            chunk_size: 64,
        });
        let fp = engine
            .fingerprint(&FlakyTail {
                data: vec![3u8; 100],
            })
            .await;
        assert_eq!(
            fp.computed().unwrap().algorithm,
            FingerprintAlgorithm::QuickSha256
        );
    }

    #[tokio::test]
    async fn test_sparse_file_over_one_gib_uses_quick_hash() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.as_file()
            .set_len(HashingConfig::FULL_HASH_THRESHOLD + 1)
            .unwrap();

        let file = LocalFile::open(tmp.path()).await.unwrap();
        let fp = FingerprintEngine::default().fingerprint(&file).await;
        assert_eq!(
            fp.computed().unwrap().algorithm,
            FingerprintAlgorithm::QuickSha256
        );

        // Zero-filled windows: digest of 512 KiB of zeros.
        let zeros = vec![0u8; 2 * HashingConfig::QUICK_WINDOW_SIZE];
        assert_eq!(fp.computed().unwrap().hex(), hex::encode(Sha256::digest(&zeros)));
    }

    #[tokio::test]
    async fn test_verify_sha256() {
        let file = MemoryFile::new("v.bin", b"test content".to_vec());
        let expected = hex::encode(Sha256::digest(b"test content"));

        assert!(verify_sha256(&file, &expected.to_uppercase()).await.is_ok());
        let err = verify_sha256(&file, "wrong_hash").await.unwrap_err();
        assert_eq!(err.kind(), "hash_mismatch");
    }
}
