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

//! Persistent on-disk texture cache.
//!
//! One [`CacheRegistry`] per region/grid handle: a bincode header index plus
//! an append-only data file. The registry is bounded by an entry cap with
//! least-recently-used eviction, tolerates truncated or corrupt state by
//! treating it as a miss, and invalidates itself wholesale on a format
//! version mismatch.

mod registry;

pub use registry::{CacheConfig, CacheError, CacheHit, CacheRegistry, CACHE_FORMAT_VERSION};
