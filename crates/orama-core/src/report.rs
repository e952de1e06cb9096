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

//! Snapshot report of the streaming engine's state, for telemetry overlays
//! and debugging.

/// A point-in-time snapshot of the streaming engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingReport {
    /// Bytes of GPU-resident texture memory the ledger accounts for.
    pub resident_bytes: u64,
    /// Bytes of decoded raw buffers held on the CPU side.
    pub decoded_bytes: u64,
    /// The global discard bias currently applied to every texture.
    pub discard_bias: f32,
    /// Live entities in the arena.
    pub live_entities: usize,
    /// Fetch requests currently in flight across all tiers.
    pub in_flight_fetches: usize,
    /// Fetches issued since startup.
    pub fetches_issued: u64,
    /// Fetches that completed with data.
    pub fetches_completed: u64,
    /// Fetches that failed at a network tier.
    pub fetches_failed: u64,
    /// Fetches cancelled by the idle timeout.
    pub fetches_timed_out: u64,
    /// Fetches answered by the disk cache tier.
    pub cache_hits: u64,
    /// Raw images produced by the decode worker.
    pub decodes_completed: u64,
    /// Total payload bytes received from the network tiers.
    pub bytes_fetched: u64,
}

impl StreamingReport {
    /// GPU-resident memory in megabytes.
    pub fn resident_mb(&self) -> f64 {
        self.resident_bytes as f64 / (1024.0 * 1024.0)
    }

    /// Decoded CPU-side memory in megabytes.
    pub fn decoded_mb(&self) -> f64 {
        self.decoded_bytes as f64 / (1024.0 * 1024.0)
    }

    /// Fraction of issued fetches answered by the disk cache.
    pub fn cache_hit_rate(&self) -> f64 {
        if self.fetches_issued > 0 {
            self.cache_hits as f64 / self.fetches_issued as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_handles_zero_fetches() {
        let report = StreamingReport::default();
        assert_eq!(report.cache_hit_rate(), 0.0);
    }

    #[test]
    fn megabyte_helpers_convert() {
        let report = StreamingReport {
            resident_bytes: 2 * 1024 * 1024,
            decoded_bytes: 1024 * 1024,
            ..Default::default()
        };
        assert_eq!(report.resident_mb(), 2.0);
        assert_eq!(report.decoded_mb(), 1.0);
    }
}
