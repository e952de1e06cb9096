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

//! Adapts the persistent cache registry to the `CacheStore` trait the disk
//! worker calls.

use anyhow::{Context, Result};
use orama_cache::{CacheConfig, CacheRegistry};
use orama_core::texture::TextureId;
use orama_core::transport::CacheStore;
use std::path::Path;
use std::sync::Mutex;

/// The on-disk cache as seen by the streaming engine's disk worker.
///
/// The registry is synchronous; the worker thread is the only caller, so a
/// plain mutex is enough. Write failures are logged and swallowed, the cache
/// being strictly advisory.
pub struct FsCacheStore {
    registry: Mutex<CacheRegistry>,
}

impl FsCacheStore {
    /// Opens or creates the cache for `region` under `dir`.
    pub fn open(dir: &Path, region: &str, config: CacheConfig) -> Result<Self> {
        let registry = CacheRegistry::open(dir, region, config)
            .with_context(|| format!("Failed to open texture cache for region '{region}'"))?;
        Ok(Self {
            registry: Mutex::new(registry),
        })
    }

    /// Persists pending access-time bumps.
    pub fn flush(&self) {
        if let Err(err) = self.registry.lock().unwrap().flush() {
            log::warn!("Texture cache flush failed: {err}");
        }
    }
}

impl CacheStore for FsCacheStore {
    fn read_cached(&self, texture: TextureId, discard: u8) -> Option<(Vec<u8>, u8)> {
        let mut registry = self.registry.lock().unwrap();
        registry.get(texture, discard).map(|hit| (hit.bytes, hit.discard))
    }

    fn write_cached(&self, texture: TextureId, discard: u8, bytes: &[u8]) {
        let mut registry = self.registry.lock().unwrap();
        if let Err(err) = registry.put(texture, discard, bytes) {
            log::warn!("Texture cache write for {texture} failed: {err}");
        }
    }
}
