// /////////////////////////////////////////////////////////////////////////////
// Replifs
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Chunk Store
//!
//! Durable, integrity-checked persistence of opaque chunk blobs on one
//! storage node. Each chunk lives as a pair of files in the storage
//! directory:
//!
//! - `{chunk_id}.chunk`: the payload, DEFLATE-compressed (gzip container,
//!   mid-range level)
//! - `{chunk_id}.checksum`: lowercase-hex SHA-256 of the *uncompressed*
//!   bytes
//!
//! The filenames fully identify content; an inventory is a directory scan.
//!
//! ## Durability Contract
//!
//! - Writes are atomic: payload and sidecar are written to temp files and
//!   renamed into place. A failed write unwinds both files.
//! - Reads re-verify: payload is decompressed (with a fallback that treats
//!   the file as uncompressed, for chunks written before compression was
//!   introduced), the checksum is recomputed and compared against the
//!   sidecar. A mismatch fails with `Corrupted` and is never silently
//!   corrected; the scrub sweep logs such chunks and leaves them for the
//!   operator.
//!
//! ## Concurrency
//!
//! A single async mutex serializes mutating operations (store, delete).
//! Reads take no lock: a concurrent reader observes either the pre-write or
//! the post-write state thanks to the rename, never a torn file. The mutex
//! guards disk work only; pipeline forwarding happens in the caller, outside
//! the critical section.
//!
//! Compression and hashing are CPU-bound and run on the blocking thread
//! pool.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use replifs_domain::services::checksum::sha256_hex;
use replifs_domain::{ChunkId, DfsError};

/// Gzip magic bytes; anything else is treated as a legacy uncompressed
/// payload on the read path.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Mid-range DEFLATE level: the balance point between write latency on the
/// pipeline path and space.
const COMPRESSION_LEVEL: u32 = 6;

/// Result of storing one chunk locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    /// SHA-256 over the uncompressed bytes, lowercase hex.
    pub checksum: String,
}

/// Free/total space and chunk count of the storage directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageInfo {
    pub free_space: u64,
    pub total_space: u64,
    pub chunk_count: u64,
}

/// Per-node chunk persistence.
pub struct ChunkStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl ChunkStore {
    /// Opens (creating if needed) the storage directory.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, DfsError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| DfsError::StorageFailure(format!("create storage dir {:?}: {}", root, e)))?;
        info!("Chunk store opened at {:?}", root);
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// The storage directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chunk_path(&self, chunk_id: ChunkId) -> PathBuf {
        self.root.join(format!("{}.chunk", chunk_id))
    }

    fn checksum_path(&self, chunk_id: ChunkId) -> PathBuf {
        self.root.join(format!("{}.checksum", chunk_id))
    }

    /// Stores a chunk: checksum over the raw bytes, compress, write both
    /// files atomically. Overwriting an existing chunk id is allowed and
    /// atomic (rename replaces).
    ///
    /// # Errors
    /// `DfsError::StorageFailure` on any disk error; partial state is
    /// unwound.
    pub async fn store(&self, chunk_id: ChunkId, data: Vec<u8>) -> Result<StoredChunk, DfsError> {
        let uncompressed_size = data.len() as u64;

        // CPU-bound: hash + compress off the async runtime.
        let (checksum, compressed) = tokio::task::spawn_blocking(move || -> std::io::Result<(String, Vec<u8>)> {
            let checksum = sha256_hex(&data);
            let mut encoder = GzEncoder::new(Vec::new(), Compression::new(COMPRESSION_LEVEL));
            encoder.write_all(&data)?;
            let compressed = encoder.finish()?;
            Ok((checksum, compressed))
        })
        .await
        .map_err(|e| DfsError::Internal(format!("compression task failed: {}", e)))?
        .map_err(|e| DfsError::StorageFailure(format!("compress chunk {}: {}", chunk_id, e)))?;

        let compressed_size = compressed.len() as u64;
        let _guard = self.write_lock.lock().await;

        match self.write_pair(chunk_id, &compressed, &checksum).await {
            Ok(()) => {
                debug!(
                    "Stored chunk {}: {} bytes -> {} bytes compressed",
                    chunk_id, uncompressed_size, compressed_size
                );
                Ok(StoredChunk {
                    uncompressed_size,
                    compressed_size,
                    checksum,
                })
            }
            Err(e) => {
                self.unwind(chunk_id).await;
                Err(e)
            }
        }
    }

    async fn write_pair(&self, chunk_id: ChunkId, payload: &[u8], checksum: &str) -> Result<(), DfsError> {
        let chunk_path = self.chunk_path(chunk_id);
        let checksum_path = self.checksum_path(chunk_id);
        let chunk_tmp = chunk_path.with_extension("chunk.tmp");
        let checksum_tmp = checksum_path.with_extension("checksum.tmp");

        tokio::fs::write(&chunk_tmp, payload)
            .await
            .map_err(|e| DfsError::StorageFailure(format!("write {:?}: {}", chunk_tmp, e)))?;
        tokio::fs::write(&checksum_tmp, checksum)
            .await
            .map_err(|e| DfsError::StorageFailure(format!("write {:?}: {}", checksum_tmp, e)))?;

        tokio::fs::rename(&checksum_tmp, &checksum_path)
            .await
            .map_err(|e| DfsError::StorageFailure(format!("rename checksum for {}: {}", chunk_id, e)))?;
        tokio::fs::rename(&chunk_tmp, &chunk_path)
            .await
            .map_err(|e| DfsError::StorageFailure(format!("rename chunk for {}: {}", chunk_id, e)))?;
        Ok(())
    }

    /// Best-effort removal of all four possible files of a chunk id.
    async fn unwind(&self, chunk_id: ChunkId) {
        for path in [
            self.chunk_path(chunk_id).with_extension("chunk.tmp"),
            self.checksum_path(chunk_id).with_extension("checksum.tmp"),
            self.chunk_path(chunk_id),
            self.checksum_path(chunk_id),
        ] {
            let _ = tokio::fs::remove_file(path).await;
        }
    }

    /// Retrieves and verifies a chunk, returning the uncompressed bytes and
    /// the verified checksum. Lock-free.
    ///
    /// # Errors
    /// - `DfsError::NotFound` when the chunk file is absent
    /// - `DfsError::Corrupted` on checksum mismatch or undecodable gzip
    /// - `DfsError::StorageFailure` on other disk errors
    pub async fn retrieve(&self, chunk_id: ChunkId) -> Result<(Vec<u8>, String), DfsError> {
        let stored = match tokio::fs::read(self.chunk_path(chunk_id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DfsError::NotFound(format!("chunk {}", chunk_id)));
            }
            Err(e) => {
                return Err(DfsError::StorageFailure(format!("read chunk {}: {}", chunk_id, e)));
            }
        };

        let data = tokio::task::spawn_blocking(move || decode_payload(stored))
            .await
            .map_err(|e| DfsError::Internal(format!("decompression task failed: {}", e)))?
            .map_err(|e| DfsError::Corrupted(format!("chunk {}: {}", chunk_id, e)))?;

        let computed = sha256_hex(&data);

        match tokio::fs::read_to_string(self.checksum_path(chunk_id)).await {
            Ok(sidecar) => {
                let expected = sidecar.trim();
                if expected != computed {
                    return Err(DfsError::Corrupted(format!(
                        "chunk {}: checksum mismatch (expected {}, computed {})",
                        chunk_id, expected, computed
                    )));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Pre-sidecar chunk; nothing to verify against.
                warn!("Chunk {} has no checksum sidecar", chunk_id);
            }
            Err(e) => {
                return Err(DfsError::StorageFailure(format!(
                    "read checksum for {}: {}",
                    chunk_id, e
                )));
            }
        }

        Ok((data, computed))
    }

    /// Reads the on-disk payload verbatim (compressed for post-compression
    /// writes). This is what a pipeline hop forwards downstream. Lock-free.
    pub async fn read_compressed(&self, chunk_id: ChunkId) -> Result<Vec<u8>, DfsError> {
        match tokio::fs::read(self.chunk_path(chunk_id)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DfsError::NotFound(format!("chunk {}", chunk_id)))
            }
            Err(e) => Err(DfsError::StorageFailure(format!("read chunk {}: {}", chunk_id, e))),
        }
    }

    /// Deletes a chunk and its sidecar; returns whether the chunk existed.
    pub async fn delete(&self, chunk_id: ChunkId) -> Result<bool, DfsError> {
        let _guard = self.write_lock.lock().await;

        let existed = match tokio::fs::remove_file(self.chunk_path(chunk_id)).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                return Err(DfsError::StorageFailure(format!("delete chunk {}: {}", chunk_id, e)));
            }
        };
        let _ = tokio::fs::remove_file(self.checksum_path(chunk_id)).await;

        if existed {
            info!("Deleted chunk {}", chunk_id);
        }
        Ok(existed)
    }

    /// Scans the storage directory for valid chunk ids. This is the
    /// inventory the heartbeat reports; the single source of truth about
    /// what this node holds.
    pub async fn inventory(&self) -> Result<Vec<ChunkId>, DfsError> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| DfsError::StorageFailure(format!("scan {:?}: {}", self.root, e)))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DfsError::StorageFailure(format!("scan {:?}: {}", self.root, e)))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".chunk") else {
                continue;
            };
            match ChunkId::parse(stem) {
                Ok(id) => ids.push(id),
                Err(_) => warn!("Ignoring foreign file in storage dir: {}", name),
            }
        }
        Ok(ids)
    }

    /// True when the chunk file exists (no integrity check).
    pub async fn contains(&self, chunk_id: ChunkId) -> bool {
        tokio::fs::try_exists(self.chunk_path(chunk_id)).await.unwrap_or(false)
    }

    /// Filesystem capacity plus chunk count, for heartbeats.
    pub async fn storage_info(&self) -> StorageInfo {
        let chunk_count = self.inventory().await.map(|v| v.len() as u64).unwrap_or(0);
        let (free_space, total_space) = filesystem_space(&self.root);
        StorageInfo {
            free_space,
            total_space,
            chunk_count,
        }
    }

    /// Integrity sweep: retrieve every chunk and report the ids that fail
    /// verification. Corrupt chunks are logged and left in place for the
    /// operator; the metadata side prunes the replica once the node stops
    /// reporting it or an operator removes the file.
    pub async fn scrub(&self) -> Result<Vec<ChunkId>, DfsError> {
        let mut corrupted = Vec::new();
        for chunk_id in self.inventory().await? {
            match self.retrieve(chunk_id).await {
                Ok(_) => {}
                Err(DfsError::Corrupted(msg)) => {
                    warn!("Scrub found corrupted chunk: {}", msg);
                    corrupted.push(chunk_id);
                }
                Err(e) => {
                    warn!("Scrub could not verify chunk {}: {}", chunk_id, e);
                }
            }
        }
        if corrupted.is_empty() {
            debug!("Scrub pass clean");
        } else {
            warn!("Scrub found {} corrupted chunk(s)", corrupted.len());
        }
        Ok(corrupted)
    }
}

/// Decompresses a stored payload, treating non-gzip content as a legacy
/// uncompressed chunk.
fn decode_payload(stored: Vec<u8>) -> Result<Vec<u8>, String> {
    if stored.len() >= 2 && stored[..2] == GZIP_MAGIC {
        let mut decoder = GzDecoder::new(stored.as_slice());
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| format!("gzip decode failed: {}", e))?;
        Ok(out)
    } else {
        Ok(stored)
    }
}

#[cfg(unix)]
fn filesystem_space(path: &Path) -> (u64, u64) {
    match nix::sys::statvfs::statvfs(path) {
        Ok(stat) => {
            let frag = stat.fragment_size() as u64;
            (
                stat.blocks_available() as u64 * frag,
                stat.blocks() as u64 * frag,
            )
        }
        Err(e) => {
            warn!("statvfs on {:?} failed: {}", path, e);
            (0, 0)
        }
    }
}

#[cfg(not(unix))]
fn filesystem_space(_path: &Path) -> (u64, u64) {
    (0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, ChunkStore) {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_store_retrieve_round_trip() {
        let (_dir, store) = store().await;
        let chunk_id = ChunkId::new();
        let data = vec![0x78u8; 1024 * 1024];

        let stored = store.store(chunk_id, data.clone()).await.unwrap();
        assert_eq!(stored.uncompressed_size, data.len() as u64);
        // A megabyte of a single byte compresses well.
        assert!(stored.compressed_size < stored.uncompressed_size);

        let (back, checksum) = store.retrieve(chunk_id).await.unwrap();
        assert_eq!(back, data);
        assert_eq!(checksum, stored.checksum);
    }

    #[tokio::test]
    async fn test_retrieve_missing_is_not_found() {
        let (_dir, store) = store().await;
        let err = store.retrieve(ChunkId::new()).await.unwrap_err();
        assert!(matches!(err, DfsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_corrupted_payload_is_detected() {
        let (dir, store) = store().await;
        let chunk_id = ChunkId::new();
        store.store(chunk_id, b"important bytes".to_vec()).await.unwrap();

        // Overwrite the payload behind the store's back.
        std::fs::write(dir.path().join(format!("{}.chunk", chunk_id)), b"garbage").unwrap();

        let err = store.retrieve(chunk_id).await.unwrap_err();
        assert!(matches!(err, DfsError::Corrupted(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_legacy_uncompressed_chunk_is_readable() {
        let (dir, store) = store().await;
        let chunk_id = ChunkId::new();
        let data = b"stored before compression existed".to_vec();

        // Simulate a legacy write: raw payload + sidecar, no gzip.
        std::fs::write(dir.path().join(format!("{}.chunk", chunk_id)), &data).unwrap();
        std::fs::write(
            dir.path().join(format!("{}.checksum", chunk_id)),
            sha256_hex(&data),
        )
        .unwrap();

        let (back, _) = store.retrieve(chunk_id).await.unwrap();
        assert_eq!(back, data);
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let (_dir, store) = store().await;
        let chunk_id = ChunkId::new();
        store.store(chunk_id, b"x".to_vec()).await.unwrap();

        assert!(store.delete(chunk_id).await.unwrap());
        assert!(!store.delete(chunk_id).await.unwrap());
        assert!(matches!(
            store.retrieve(chunk_id).await.unwrap_err(),
            DfsError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_inventory_lists_only_valid_chunk_files() {
        let (dir, store) = store().await;
        let a = ChunkId::new();
        let b = ChunkId::new();
        store.store(a, b"a".to_vec()).await.unwrap();
        store.store(b, b"b".to_vec()).await.unwrap();

        // Noise the scan must skip.
        std::fs::write(dir.path().join("not-a-uuid.chunk"), b"junk").unwrap();
        std::fs::write(dir.path().join("stray.txt"), b"junk").unwrap();

        let mut inventory = store.inventory().await.unwrap();
        inventory.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(inventory, expected);
    }

    #[tokio::test]
    async fn test_overwrite_same_chunk_id() {
        let (_dir, store) = store().await;
        let chunk_id = ChunkId::new();
        store.store(chunk_id, b"first".to_vec()).await.unwrap();
        store.store(chunk_id, b"second".to_vec()).await.unwrap();

        let (back, _) = store.retrieve(chunk_id).await.unwrap();
        assert_eq!(back, b"second");
    }

    #[tokio::test]
    async fn test_scrub_reports_but_keeps_corrupt_chunks() {
        let (dir, store) = store().await;
        let good = ChunkId::new();
        let bad = ChunkId::new();
        store.store(good, b"good".to_vec()).await.unwrap();
        store.store(bad, b"bad".to_vec()).await.unwrap();
        std::fs::write(dir.path().join(format!("{}.chunk", bad)), b"mangled").unwrap();

        let corrupted = store.scrub().await.unwrap();
        assert_eq!(corrupted, vec![bad]);
        // Never auto-deleted.
        assert!(store.contains(bad).await);
    }

    #[tokio::test]
    async fn test_empty_chunk_round_trip() {
        let (_dir, store) = store().await;
        let chunk_id = ChunkId::new();
        store.store(chunk_id, Vec::new()).await.unwrap();
        let (back, _) = store.retrieve(chunk_id).await.unwrap();
        assert!(back.is_empty());
    }

    #[tokio::test]
    async fn test_storage_info_counts_chunks() {
        let (_dir, store) = store().await;
        store.store(ChunkId::new(), b"x".to_vec()).await.unwrap();
        store.store(ChunkId::new(), b"y".to_vec()).await.unwrap();
        let info = store.storage_info().await;
        assert_eq!(info.chunk_count, 2);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(16))]
            /// Store → Retrieve returns identical bytes and a checksum that
            /// matches a fresh hash of the input, for arbitrary payloads.
            #[test]
            fn prop_round_trip_preserves_bytes(data in proptest::collection::vec(any::<u8>(), 0..8192)) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                rt.block_on(async {
                    let dir = TempDir::new().unwrap();
                    let store = ChunkStore::open(dir.path()).await.unwrap();
                    let chunk_id = ChunkId::new();

                    let stored = store.store(chunk_id, data.clone()).await.unwrap();
                    let (back, checksum) = store.retrieve(chunk_id).await.unwrap();

                    assert_eq!(back, data);
                    assert_eq!(checksum, stored.checksum);
                    assert_eq!(checksum, sha256_hex(&data));
                });
            }
        }
    }
}
