// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The cache registry: a bounded, persistent store of texture blobs.
//!
//! Layout on disk is two files per region key: `<region>.idx`, a bincode
//! header carrying a format version and one record per cached texture, and
//! `<region>.dat`, an append-only blob file the records point into. Data is
//! synced before the header references it, so recovery after a crash never
//! trusts a record whose bytes are absent or truncated; when header and data
//! disagree, the record is dropped rather than believed.

use orama_core::texture::TextureId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bumped whenever the header layout changes. A mismatch invalidates the
/// whole registry and forces a rebuild; there is no partial migration.
pub const CACHE_FORMAT_VERSION: u32 = 2;

const CACHE_MAGIC: u32 = 0x4f52_4341;

/// Errors the registry can surface to its owner.
///
/// Read-side corruption is never an error; it reads back as a miss. Only
/// genuine I/O and encoding failures reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Filesystem access failed.
    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// The header could not be encoded.
    #[error("cache header encoding failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    /// A blob larger than the record format can address.
    #[error("cache entry of {0} bytes exceeds the record size limit")]
    EntryTooLarge(usize),
}

/// Tuning knobs for a registry instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry cap; least-recently-used entries are purged beyond it.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 4096 }
    }
}

/// A successful cache read.
#[derive(Debug, Clone)]
pub struct CacheHit {
    /// The cached payload, byte-identical to what was written.
    pub bytes: Vec<u8>,
    /// The discard level the payload achieves.
    pub discard: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeaderRecord {
    id: TextureId,
    discard: u8,
    offset: u64,
    size: u32,
    last_access: u64,
    sequence: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryHeader {
    magic: u32,
    version: u32,
    next_sequence: u64,
    records: Vec<HeaderRecord>,
}

/// Persistent handle-to-blob mapping for one region key.
pub struct CacheRegistry {
    index_path: PathBuf,
    data_path: PathBuf,
    records: HashMap<TextureId, HeaderRecord>,
    next_sequence: u64,
    data_len: u64,
    dirty: bool,
    config: CacheConfig,
}

impl CacheRegistry {
    /// Opens or creates the registry for `region` under `dir`.
    ///
    /// An unreadable header, a magic/version mismatch, or records pointing
    /// past the end of the data file all degrade to an empty registry; none
    /// of them are fatal.
    ///
    /// # Errors
    /// Only genuine filesystem failures (directory creation, truncation).
    pub fn open(dir: &Path, region: &str, config: CacheConfig) -> Result<Self, CacheError> {
        std::fs::create_dir_all(dir)?;
        let index_path = dir.join(format!("{region}.idx"));
        let data_path = dir.join(format!("{region}.dat"));

        let data_len = std::fs::metadata(&data_path).map(|m| m.len()).unwrap_or(0);

        let mut registry = Self {
            index_path,
            data_path,
            records: HashMap::new(),
            next_sequence: 0,
            data_len,
            dirty: false,
            config,
        };

        match registry.load_header() {
            Some(header) => {
                let total = header.records.len();
                registry.next_sequence = header.next_sequence;
                for record in header.records {
                    if record.offset + record.size as u64 <= registry.data_len {
                        registry.records.insert(record.id, record);
                    }
                }
                let dropped = total - registry.records.len();
                if dropped > 0 {
                    log::warn!(
                        "Cache registry {region}: dropped {dropped} record(s) pointing past the data file"
                    );
                    registry.dirty = true;
                }
            }
            None => {
                // Unusable header: rebuild from nothing and reclaim the data
                // file, since nothing references it any more.
                registry.records.clear();
                registry.next_sequence = 0;
                registry.truncate_data()?;
                registry.write_header()?;
            }
        }

        Ok(registry)
    }

    /// Looks up `texture` at a discard at least as fine as `discard`.
    ///
    /// Any disagreement between the record and the data file drops the entry
    /// and reads as a miss; the consumer simply re-fetches from the network
    /// tiers. A hit bumps the entry's access time.
    pub fn get(&mut self, texture: TextureId, discard: u8) -> Option<CacheHit> {
        let record = self.records.get(&texture)?;
        if record.discard > discard {
            return None;
        }
        let (offset, size, stored_discard) = (record.offset, record.size, record.discard);

        match self.read_blob(offset, size) {
            Ok(bytes) => {
                if let Some(record) = self.records.get_mut(&texture) {
                    record.last_access = now_secs();
                }
                self.dirty = true;
                Some(CacheHit {
                    bytes,
                    discard: stored_discard,
                })
            }
            Err(err) => {
                log::warn!("Cache registry: entry for {texture} failed validation ({err}); dropping");
                self.records.remove(&texture);
                self.dirty = true;
                None
            }
        }
    }

    /// Writes a blob for `texture`, replacing any previous entry.
    ///
    /// The data file is appended and synced before the header index is
    /// rewritten; only then is the write durable. Exceeding the entry cap
    /// purges least-recently-used entries, oldest access time first, ties
    /// broken by insertion order.
    pub fn put(&mut self, texture: TextureId, discard: u8, bytes: &[u8]) -> Result<(), CacheError> {
        let size = u32::try_from(bytes.len()).map_err(|_| CacheError::EntryTooLarge(bytes.len()))?;

        let mut data = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.data_path)?;
        let offset = self.data_len;
        data.write_all(bytes)?;
        data.sync_data()?;
        self.data_len += bytes.len() as u64;

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.records.insert(
            texture,
            HeaderRecord {
                id: texture,
                discard,
                offset,
                size,
                last_access: now_secs(),
                sequence,
            },
        );

        self.enforce_entry_cap();
        self.write_header()
    }

    /// Persists any access-time bumps accumulated since the last write.
    pub fn flush(&mut self) -> Result<(), CacheError> {
        if self.dirty {
            self.write_header()?;
        }
        Ok(())
    }

    /// Drops every entry and truncates both files. Manual recovery op.
    pub fn purge(&mut self) -> Result<(), CacheError> {
        self.records.clear();
        self.next_sequence = 0;
        self.truncate_data()?;
        self.write_header()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether an entry exists for `texture` at any discard.
    pub fn contains(&self, texture: TextureId) -> bool {
        self.records.contains_key(&texture)
    }

    fn enforce_entry_cap(&mut self) {
        while self.records.len() > self.config.max_entries {
            let victim = self
                .records
                .values()
                .min_by_key(|r| (r.last_access, r.sequence))
                .map(|r| r.id);
            match victim {
                Some(id) => {
                    self.records.remove(&id);
                    log::debug!("Cache registry: evicted LRU entry {id}");
                }
                None => break,
            }
        }
    }

    fn read_blob(&self, offset: u64, size: u32) -> Result<Vec<u8>, std::io::Error> {
        let mut file = File::open(&self.data_path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut bytes = vec![0u8; size as usize];
        file.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn load_header(&self) -> Option<RegistryHeader> {
        let bytes = std::fs::read(&self.index_path).ok()?;
        if bytes.is_empty() {
            return None;
        }
        let config = bincode::config::standard();
        let (header, _): (RegistryHeader, _) =
            match bincode::serde::decode_from_slice(&bytes, config) {
                Ok(decoded) => decoded,
                Err(err) => {
                    log::warn!("Cache registry: unreadable header ({err}); rebuilding");
                    return None;
                }
            };
        if header.magic != CACHE_MAGIC || header.version != CACHE_FORMAT_VERSION {
            log::warn!(
                "Cache registry: format version {} (expected {}); rebuilding",
                header.version,
                CACHE_FORMAT_VERSION
            );
            return None;
        }
        Some(header)
    }

    fn write_header(&mut self) -> Result<(), CacheError> {
        let header = RegistryHeader {
            magic: CACHE_MAGIC,
            version: CACHE_FORMAT_VERSION,
            next_sequence: self.next_sequence,
            records: self.records.values().cloned().collect(),
        };
        let config = bincode::config::standard();
        let encoded = bincode::serde::encode_to_vec(&header, config)?;

        // Write-then-rename so a crash mid-write leaves the old header
        // intact instead of a torn one.
        let tmp_path = self.index_path.with_extension("idx.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&encoded)?;
            tmp.sync_data()?;
        }
        std::fs::rename(&tmp_path, &self.index_path)?;
        self.dirty = false;
        Ok(())
    }

    fn truncate_data(&mut self) -> Result<(), CacheError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.data_path)?;
        file.set_len(0)?;
        self.data_len = 0;
        Ok(())
    }
}

impl Drop for CacheRegistry {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            log::warn!("Cache registry: flush on drop failed: {err}");
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
