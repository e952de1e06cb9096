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

//! A GPU backend that records instead of uploading.
//!
//! Tracks live handles and resident bytes exactly like a real device layer
//! would, which is what integration tests and headless tools need to observe
//! the ledger's behavior. Can be told to fail the next allocation to stage
//! out-of-memory scenarios.

use orama_core::texture::RawImage;
use orama_core::{GpuTextureBackend, GpuTextureHandle, TextureError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Records create/destroy/bind traffic and resident byte totals.
#[derive(Default)]
pub struct RecordingGpuBackend {
    next_handle: AtomicU64,
    live: Mutex<HashMap<u64, u64>>,
    created: AtomicU64,
    destroyed: AtomicU64,
    bound: AtomicU64,
    fail_next_create: AtomicBool,
}

impl RecordingGpuBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `create_resource` call fail, simulating an allocation
    /// failure under memory pressure.
    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    /// Resources created so far.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    /// Resources destroyed so far.
    pub fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Bind calls observed so far.
    pub fn bound(&self) -> u64 {
        self.bound.load(Ordering::SeqCst)
    }

    /// Currently live resources.
    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}

impl GpuTextureBackend for RecordingGpuBackend {
    fn create_resource(
        &self,
        image: &RawImage,
        _discard: u8,
    ) -> Result<GpuTextureHandle, TextureError> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(TextureError::Backend(
                "simulated allocation failure".to_string(),
            ));
        }
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.live
            .lock()
            .unwrap()
            .insert(id, image.byte_size() as u64);
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(GpuTextureHandle(id))
    }

    fn destroy_resource(&self, handle: GpuTextureHandle) {
        if self.live.lock().unwrap().remove(&handle.0).is_some() {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn bind_resource(&self, _handle: GpuTextureHandle, _unit: u32) {
        self.bound.fetch_add(1, Ordering::SeqCst);
    }

    fn resident_bytes(&self) -> u64 {
        self.live.lock().unwrap().values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> RawImage {
        RawImage::new(16, 16, 4, vec![0; 1024]).unwrap()
    }

    #[test]
    fn tracks_residency_across_create_and_destroy() {
        let backend = RecordingGpuBackend::new();
        let a = backend.create_resource(&image(), 0).unwrap();
        let b = backend.create_resource(&image(), 1).unwrap();
        assert_eq!(backend.resident_bytes(), 2048);
        assert_eq!(backend.live_count(), 2);

        backend.destroy_resource(a);
        assert_eq!(backend.resident_bytes(), 1024);

        // Double destroy is a no-op.
        backend.destroy_resource(a);
        assert_eq!(backend.destroyed(), 1);

        backend.destroy_resource(b);
        assert_eq!(backend.resident_bytes(), 0);
    }

    #[test]
    fn staged_failure_hits_exactly_once() {
        let backend = RecordingGpuBackend::new();
        backend.fail_next_create();
        assert!(matches!(
            backend.create_resource(&image(), 0),
            Err(TextureError::Backend(_))
        ));
        assert!(backend.create_resource(&image(), 0).is_ok());
    }
}
