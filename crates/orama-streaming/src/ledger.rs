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

//! The resident texture ledger: memory budget accounting and the global
//! discard-bias feedback loop.
//!
//! The ledger owns the [`MemoryPressureState`] every priority recompute
//! reads. All mutation happens on the main thread: the byte counters move as
//! resources are created and destroyed, and the bias moves only inside the
//! throttled [`ResidentLedger::maybe_adjust`] step, so readers see at most
//! one recompute cycle of staleness and need no locks.
//!
//! The bias moves additively, a fixed step per interval, which settles
//! instead of oscillating. Critically low host headroom skips the gradual
//! path entirely and slams the bias to its maximum.

use crate::config::StreamingConfig;
use std::collections::VecDeque;
use std::time::Instant;

/// System-wide memory pressure, readable by every priority computation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryPressureState {
    discard_bias: f32,
    resident_bytes: u64,
    decoded_bytes: u64,
}

impl MemoryPressureState {
    /// The global discard bias added to every computed discard level.
    pub fn bias(&self) -> f32 {
        self.discard_bias
    }

    /// Bytes of GPU-resident texture memory.
    pub fn resident_bytes(&self) -> u64 {
        self.resident_bytes
    }

    /// Bytes of decoded CPU-side raw buffers.
    pub fn decoded_bytes(&self) -> u64 {
        self.decoded_bytes
    }
}

/// Advisory events the ledger surfaces to the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureEvent {
    /// Headroom went critical; the host should reduce its view distance.
    ReduceViewDistance,
    /// Allocation has already failed and headroom is critical; tell the user
    /// a crash is likely. Rate-limited.
    AdvisoryLowMemory {
        /// Host bytes still available when the advisory fired.
        available_bytes: u64,
    },
}

/// What an adjustment step decided.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdjustOutcome {
    /// Whether the step actually ran; throttled calls return `false` and
    /// change nothing.
    pub ran: bool,
    /// The bias moved this step.
    pub bias_changed: bool,
    /// The bias sits at or above the flush threshold; the owner should run a
    /// proactive flush of not-recently-bound entities.
    pub flush_wanted: bool,
}

/// Budget accounting and bias control.
pub struct ResidentLedger {
    state: MemoryPressureState,
    last_adjust: Option<Instant>,
    last_advisory: Option<Instant>,
    in_critical: bool,
    allocation_failed: bool,
    events: VecDeque<PressureEvent>,
}

impl ResidentLedger {
    /// Creates a ledger with zeroed counters and bias.
    pub fn new() -> Self {
        Self {
            state: MemoryPressureState::default(),
            last_adjust: None,
            last_advisory: None,
            in_critical: false,
            allocation_failed: false,
            events: VecDeque::new(),
        }
    }

    /// The shared pressure state.
    pub fn pressure(&self) -> &MemoryPressureState {
        &self.state
    }

    /// The current bias value.
    pub fn bias(&self) -> f32 {
        self.state.discard_bias
    }

    /// Accounts a newly created GPU resource.
    pub fn add_resident(&mut self, bytes: u64) {
        self.state.resident_bytes += bytes;
    }

    /// Accounts a destroyed GPU resource.
    pub fn sub_resident(&mut self, bytes: u64) {
        self.state.resident_bytes = self.state.resident_bytes.saturating_sub(bytes);
    }

    /// Accounts a decoded raw buffer entering CPU memory.
    pub fn add_decoded(&mut self, bytes: u64) {
        self.state.decoded_bytes += bytes;
    }

    /// Accounts a released raw buffer.
    pub fn sub_decoded(&mut self, bytes: u64) {
        self.state.decoded_bytes = self.state.decoded_bytes.saturating_sub(bytes);
    }

    /// Records that a GPU allocation failed; unlocks the user-facing
    /// advisory on the next critical interval.
    pub fn note_allocation_failure(&mut self) {
        self.allocation_failed = true;
    }

    /// Next queued advisory event, if any.
    pub fn take_event(&mut self) -> Option<PressureEvent> {
        self.events.pop_front()
    }

    /// Runs one throttled adjustment step.
    ///
    /// No more than one adjustment happens per configured interval; calls in
    /// between return a no-op outcome. `headroom` is the host memory probe's
    /// answer; `None` disables the critical brake.
    pub fn maybe_adjust(
        &mut self,
        now: Instant,
        headroom: Option<u64>,
        config: &StreamingConfig,
    ) -> AdjustOutcome {
        if let Some(last) = self.last_adjust {
            if now.duration_since(last) < config.ledger_interval() {
                return AdjustOutcome::default();
            }
        }
        self.last_adjust = Some(now);

        let old_bias = self.state.discard_bias;

        let critical = headroom.is_some_and(|h| h < config.critical_headroom_bytes);
        if critical {
            // Hard brake: no gradual convergence when the process is close
            // to failing allocations.
            self.state.discard_bias = config.bias_max;
            if !self.in_critical {
                self.events.push_back(PressureEvent::ReduceViewDistance);
                log::warn!(
                    "Memory headroom critical ({} bytes available); discard bias forced to maximum",
                    headroom.unwrap_or(0)
                );
            }
            if self.allocation_failed && self.advisory_due(now, config) {
                self.events.push_back(PressureEvent::AdvisoryLowMemory {
                    available_bytes: headroom.unwrap_or(0),
                });
                self.last_advisory = Some(now);
            }
            self.in_critical = true;
        } else {
            self.in_critical = false;

            let resident_cap = config.resident_cap_bytes;
            let decoded_cap = config.decoded_cap_bytes;
            let over = self.state.resident_bytes > resident_cap
                || self.state.decoded_bytes > decoded_cap;
            let comfortable = (self.state.resident_bytes as f64)
                < resident_cap as f64 * config.comfort_margin as f64
                && (self.state.decoded_bytes as f64)
                    < decoded_cap as f64 * config.comfort_margin as f64;

            if over {
                self.state.discard_bias =
                    (self.state.discard_bias + config.bias_step).min(config.bias_max);
            } else if comfortable && self.state.discard_bias > 0.0 {
                self.state.discard_bias =
                    (self.state.discard_bias - config.bias_step).max(0.0).max(config.bias_min);
            }
        }

        AdjustOutcome {
            ran: true,
            bias_changed: self.state.discard_bias != old_bias,
            flush_wanted: self.state.discard_bias >= config.bias_flush_threshold,
        }
    }

    fn advisory_due(&self, now: Instant, config: &StreamingConfig) -> bool {
        match self.last_advisory {
            Some(last) => now.duration_since(last) >= config.advisory_interval(),
            None => true,
        }
    }
}

impl Default for ResidentLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> StreamingConfig {
        StreamingConfig {
            resident_cap_bytes: 1_000,
            decoded_cap_bytes: 1_000,
            ledger_interval_ms: 500,
            ..Default::default()
        }
    }

    fn step(ledger: &mut ResidentLedger, at: Instant, headroom: Option<u64>, cfg: &StreamingConfig) -> AdjustOutcome {
        ledger.maybe_adjust(at, headroom, cfg)
    }

    #[test]
    fn adjustments_are_throttled_to_the_interval() {
        let cfg = config();
        let mut ledger = ResidentLedger::new();
        ledger.add_resident(2_000);

        let start = Instant::now();
        assert!(step(&mut ledger, start, None, &cfg).bias_changed);
        // Too soon; nothing moves.
        assert!(!step(&mut ledger, start + Duration::from_millis(100), None, &cfg).bias_changed);
        assert!(step(&mut ledger, start + Duration::from_millis(600), None, &cfg).bias_changed);
    }

    #[test]
    fn over_cap_raises_bias_additively_to_the_clamp() {
        let cfg = config();
        let mut ledger = ResidentLedger::new();
        ledger.add_resident(2_000);

        let mut at = Instant::now();
        let mut previous = 0.0;
        for _ in 0..100 {
            step(&mut ledger, at, None, &cfg);
            assert!(ledger.bias() >= previous);
            assert!(ledger.bias() - previous <= cfg.bias_step + f32::EPSILON);
            previous = ledger.bias();
            at += Duration::from_secs(1);
        }
        assert_eq!(ledger.bias(), cfg.bias_max);
    }

    #[test]
    fn comfortable_usage_relaxes_bias_back_to_zero() {
        let cfg = config();
        let mut ledger = ResidentLedger::new();
        ledger.add_resident(2_000);

        let mut at = Instant::now();
        for _ in 0..4 {
            step(&mut ledger, at, None, &cfg);
            at += Duration::from_secs(1);
        }
        assert!(ledger.bias() > 0.0);

        // Drop usage well under the comfort margin and let it unwind.
        ledger.sub_resident(1_900);
        for _ in 0..100 {
            step(&mut ledger, at, None, &cfg);
            at += Duration::from_secs(1);
        }
        assert_eq!(ledger.bias(), 0.0);
    }

    #[test]
    fn bias_does_not_move_in_the_dead_band() {
        let cfg = config();
        let mut ledger = ResidentLedger::new();
        // Between comfort margin (850) and cap (1000): hold steady.
        ledger.add_resident(900);

        let mut at = Instant::now();
        for _ in 0..5 {
            assert!(!step(&mut ledger, at, None, &cfg).bias_changed);
            at += Duration::from_secs(1);
        }
        assert_eq!(ledger.bias(), 0.0);
    }

    #[test]
    fn critical_headroom_slams_bias_and_asks_for_view_distance_once() {
        let cfg = config();
        let mut ledger = ResidentLedger::new();

        let mut at = Instant::now();
        let outcome = step(&mut ledger, at, Some(0), &cfg);
        assert!(outcome.bias_changed);
        assert!(outcome.flush_wanted);
        assert_eq!(ledger.bias(), cfg.bias_max);
        assert_eq!(ledger.take_event(), Some(PressureEvent::ReduceViewDistance));

        // Staying critical does not repeat the event.
        at += Duration::from_secs(1);
        step(&mut ledger, at, Some(0), &cfg);
        assert_eq!(ledger.take_event(), None);

        // Recovering and going critical again does.
        at += Duration::from_secs(1);
        step(&mut ledger, at, Some(u64::MAX), &cfg);
        at += Duration::from_secs(1);
        step(&mut ledger, at, Some(0), &cfg);
        assert_eq!(ledger.take_event(), Some(PressureEvent::ReduceViewDistance));
    }

    #[test]
    fn advisory_waits_for_a_real_allocation_failure() {
        let cfg = config();
        let mut ledger = ResidentLedger::new();
        let mut at = Instant::now();

        step(&mut ledger, at, Some(0), &cfg);
        assert_eq!(ledger.take_event(), Some(PressureEvent::ReduceViewDistance));
        assert_eq!(ledger.take_event(), None, "no advisory before allocation fails");

        ledger.note_allocation_failure();
        at += Duration::from_secs(1);
        step(&mut ledger, at, Some(0), &cfg);
        assert!(matches!(
            ledger.take_event(),
            Some(PressureEvent::AdvisoryLowMemory { .. })
        ));

        // Rate-limited: the next critical interval stays quiet.
        at += Duration::from_secs(1);
        step(&mut ledger, at, Some(0), &cfg);
        assert_eq!(ledger.take_event(), None);
    }

    #[test]
    fn counters_saturate_instead_of_underflowing() {
        let mut ledger = ResidentLedger::new();
        ledger.add_decoded(10);
        ledger.sub_decoded(100);
        assert_eq!(ledger.pressure().decoded_bytes(), 0);
    }
}
