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

//! Concrete implementations of the streaming engine's collaborator traits:
//! the `image`-based decoder, the `sysinfo` host memory probe, the disk cache
//! adapter, and the loopback transport and recording GPU backend used by
//! integration tests and headless tools.

pub mod cache_store;
pub mod decode;
pub mod gpu;
pub mod memory_probe;
pub mod transport;

pub use cache_store::FsCacheStore;
pub use decode::ImageCrateDecoder;
pub use gpu::RecordingGpuBackend;
pub use memory_probe::{FixedMemoryProbe, SysinfoMemoryProbe};
pub use transport::LoopbackTransport;

/// Initializes `env_logger` with an info default, once per process.
/// Subsequent calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
