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

//! Contract with the GPU resource layer.
//!
//! The streaming engine never issues graphics API calls itself. It hands a
//! decoded buffer to the backend and gets an opaque handle back; the resident
//! texture ledger is the only caller of create/destroy, and renderers bind by
//! handle. Implementations live in `orama-infra` or in the host application.

use crate::error::TextureError;
use crate::texture::RawImage;

/// Opaque identity of a GPU-resident texture, issued by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuTextureHandle(pub u64);

/// The capability the streaming engine needs from the graphics layer.
///
/// All calls are made from the main thread. Implementations are expected to
/// be cheap to call; actual upload work may be deferred internally.
pub trait GpuTextureBackend: Send + Sync {
    /// Uploads a decoded buffer and returns a handle to the resident
    /// resource.
    ///
    /// # Errors
    /// Returns [`TextureError::Backend`] when the device rejects the upload,
    /// including allocation failure. The ledger treats an allocation failure
    /// as a memory-pressure signal.
    fn create_resource(
        &self,
        image: &RawImage,
        discard: u8,
    ) -> Result<GpuTextureHandle, TextureError>;

    /// Destroys a resident resource. Destroying an already-destroyed handle
    /// is a no-op.
    fn destroy_resource(&self, handle: GpuTextureHandle);

    /// Binds a resident resource to a texture unit for rendering.
    fn bind_resource(&self, handle: GpuTextureHandle, unit: u32);

    /// Total bytes currently resident on the device for this backend.
    fn resident_bytes(&self) -> u64;
}
