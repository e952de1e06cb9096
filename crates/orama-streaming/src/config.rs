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

//! Tuning parameters for the streaming engine.
//!
//! Exact magnitudes are configuration; the ordering relationship between the
//! priority bands (boost above delta-discard above pixel-area) is a contract
//! the defaults must satisfy, checked by [`PriorityBands::tiers_dominate`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Additive weight bands for the decode-priority score.
///
/// The score is `boost_tier * boost_tier_step` plus the secondary terms
/// (pixel area, delta discard, consumer-supplied extra priority). For the
/// boost tiering to dominate, one tier step must exceed the largest possible
/// secondary sum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityBands {
    /// Upper clamp on the pixel-area term.
    pub pixel_area_max: f32,
    /// Score added per level of distance from the desired discard.
    pub delta_discard_step: f32,
    /// Delta levels counted before the term saturates.
    pub delta_discard_cap: u8,
    /// Score added per boost tier. Must exceed every possible secondary sum.
    pub boost_tier_step: f32,
    /// Upper clamp on the consumer-supplied additional-priority term.
    pub additional_max: f32,
    /// Multiplier applied to the secondary terms when the entity already has
    /// something to show (a current buffer or a saved low-discard buffer).
    pub partial_data_multiplier: f32,
}

impl Default for PriorityBands {
    fn default() -> Self {
        Self {
            pixel_area_max: 1_000.0,
            delta_discard_step: 2_000.0,
            delta_discard_cap: 4,
            boost_tier_step: 20_000.0,
            additional_max: 1_000.0,
            partial_data_multiplier: 0.25,
        }
    }
}

impl PriorityBands {
    /// The largest score the secondary terms can reach together.
    pub fn max_secondary(&self) -> f32 {
        self.pixel_area_max
            + self.delta_discard_step * self.delta_discard_cap as f32
            + self.additional_max
    }

    /// Whether one boost tier outranks every possible secondary sum. This is
    /// the load-bearing ordering contract of the priority scheme.
    pub fn tiers_dominate(&self) -> bool {
        self.boost_tier_step > self.max_secondary()
    }
}

/// All tuning knobs of the streaming engine, serde round-trippable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Priority score bands.
    pub bands: PriorityBands,

    /// Relative virtual-size change below which a recomputed desired discard
    /// is ignored in favor of the previous value.
    pub hysteresis_fraction: f32,

    /// Lower clamp of the global discard bias.
    pub bias_min: f32,
    /// Upper clamp of the global discard bias.
    pub bias_max: f32,
    /// Additive step the ledger moves the bias by per adjustment.
    pub bias_step: f32,
    /// Bias level at and above which the ledger proactively flushes
    /// not-recently-bound entities.
    pub bias_flush_threshold: f32,

    /// Minimum milliseconds between ledger adjustments.
    pub ledger_interval_ms: u64,
    /// Cap on GPU-resident texture bytes.
    pub resident_cap_bytes: u64,
    /// Cap on decoded CPU-side bytes.
    pub decoded_cap_bytes: u64,
    /// Usage below `cap * comfort_margin` lets the bias relax back down.
    pub comfort_margin: f32,
    /// Host headroom below this triggers the hard brake.
    pub critical_headroom_bytes: u64,
    /// Minimum milliseconds between user-facing memory advisories.
    pub advisory_interval_ms: u64,

    /// Idle window after which a silent fetch is cancelled.
    pub fetch_idle_timeout_ms: u64,
    /// Window of no binds that makes a resident entity flushable under bias
    /// pressure.
    pub inactivity_flush_ms: u64,
    /// Window of no references and no binds after which an entity becomes a
    /// deletion candidate.
    pub deletion_timeout_ms: u64,

    /// Whether fetches converge on the desired discard over several rounds
    /// instead of jumping straight to it.
    pub progressive: bool,
    /// Discard levels a progressive round moves toward the desired level.
    pub progressive_step: u8,
    /// Upper bound on concurrently in-flight fetches.
    pub max_in_flight: usize,

    /// Largest dimension of the saved low-discard raw buffer.
    pub low_res_max_dimension: u32,

    /// Camera speed above which non-boosted textures take a one-level
    /// penalty, keeping bandwidth for what the camera settles on.
    pub camera_motion_threshold: f32,

    /// Per-frame millisecond budget for the priority recompute pass.
    pub priority_budget_ms: f32,
    /// Per-frame millisecond budget for fetch issuance.
    pub fetch_budget_ms: f32,
    /// Per-frame millisecond budget for GPU resource creation.
    pub upload_budget_ms: f32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            bands: PriorityBands::default(),
            hysteresis_fraction: 0.2,
            bias_min: -2.0,
            bias_max: 8.0,
            bias_step: 0.25,
            bias_flush_threshold: 4.0,
            ledger_interval_ms: 500,
            resident_cap_bytes: 512 * 1024 * 1024,
            decoded_cap_bytes: 768 * 1024 * 1024,
            comfort_margin: 0.85,
            critical_headroom_bytes: 256 * 1024 * 1024,
            advisory_interval_ms: 60_000,
            fetch_idle_timeout_ms: 5_000,
            inactivity_flush_ms: 10_000,
            deletion_timeout_ms: 30_000,
            progressive: true,
            progressive_step: 2,
            max_in_flight: 32,
            low_res_max_dimension: 64,
            camera_motion_threshold: 10.0,
            priority_budget_ms: 1.0,
            fetch_budget_ms: 0.5,
            upload_budget_ms: 1.5,
        }
    }
}

impl StreamingConfig {
    /// The fetch idle timeout as a [`Duration`].
    pub fn fetch_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_idle_timeout_ms)
    }

    /// The ledger adjustment interval as a [`Duration`].
    pub fn ledger_interval(&self) -> Duration {
        Duration::from_millis(self.ledger_interval_ms)
    }

    /// The flush inactivity window as a [`Duration`].
    pub fn inactivity_flush(&self) -> Duration {
        Duration::from_millis(self.inactivity_flush_ms)
    }

    /// The deletion candidacy window as a [`Duration`].
    pub fn deletion_timeout(&self) -> Duration {
        Duration::from_millis(self.deletion_timeout_ms)
    }

    /// The advisory rate limit as a [`Duration`].
    pub fn advisory_interval(&self) -> Duration {
        Duration::from_millis(self.advisory_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bands_satisfy_tier_dominance() {
        let bands = PriorityBands::default();
        assert!(bands.tiers_dominate());
        assert_eq!(bands.max_secondary(), 10_000.0);
    }

    #[test]
    fn dominance_check_catches_bad_tuning() {
        let bands = PriorityBands {
            boost_tier_step: 5_000.0,
            ..Default::default()
        };
        assert!(!bands.tiers_dominate());
    }

    #[test]
    fn config_roundtrips_through_serde() {
        let config = StreamingConfig {
            bias_max: 6.0,
            max_in_flight: 8,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: StreamingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bias_max, 6.0);
        assert_eq!(back.max_in_flight, 8);
        assert_eq!(back.bands.boost_tier_step, config.bands.boost_tier_step);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let back: StreamingConfig = serde_json::from_str(r#"{"bias_step": 0.5}"#).unwrap();
        assert_eq!(back.bias_step, 0.5);
        assert_eq!(back.ledger_interval_ms, 500);
        assert!(back.bands.tiers_dominate());
    }
}
