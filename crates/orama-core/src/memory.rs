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

//! Contract with the host memory probe.

/// Reports how much headroom the host still has.
///
/// The resident texture ledger polls this on its adjustment interval; a
/// critically low answer triggers the hard brake (discard bias jumped to its
/// maximum and a proactive flush). Implementations live in `orama-infra`.
pub trait SystemMemoryProbe: Send + Sync {
    /// Bytes of memory still available to the process, or `None` when the
    /// platform cannot say. `None` disables the hard brake, never triggers it.
    fn available_bytes(&self) -> Option<u64>;
}
