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

//! Foundational types and interface contracts for the texture streaming core.
//!
//! This crate defines the shared vocabulary of the streaming engine: texture
//! identity, the discard-level ladder, raw image buffers, the error taxonomy,
//! and the traits through which the policy engine talks to its external
//! collaborators (GPU backend, network transport, disk cache, image decoder,
//! host memory probe). Concrete implementations live in `orama-infra`; the
//! policy engine itself lives in `orama-streaming`.

pub mod error;
pub mod gpu;
pub mod memory;
pub mod report;
pub mod texture;
pub mod transport;

pub use error::TextureError;
pub use gpu::{GpuTextureBackend, GpuTextureHandle};
pub use memory::SystemMemoryProbe;
pub use report::StreamingReport;
pub use texture::{BoostLevel, RawImage, TextureId, TextureKind};
pub use transport::{
    CacheStore, FetchRequestId, FetchTier, TextureDecoder, TextureTransport, TransportEvent,
    TransportStatus,
};
