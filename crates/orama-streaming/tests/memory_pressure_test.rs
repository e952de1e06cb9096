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

//! Ledger behavior under load: bias convergence, proactive flushing, the
//! two-stage deletion sweep, eviction safety, and the critical-headroom
//! brake.

mod common;

use common::{encode_asset, pump, test_config, Harness};
use orama_core::texture::{TextureId, TextureKind};
use orama_streaming::{PressureEvent, StreamingConfig, TextureHandle};
use std::collections::HashMap;
use std::time::{Duration, Instant};

const FRAME: Duration = Duration::from_millis(100);

fn pressure_config() -> StreamingConfig {
    StreamingConfig {
        resident_cap_bytes: 2_048,
        ledger_interval_ms: 100,
        bias_flush_threshold: 1.0,
        inactivity_flush_ms: 300,
        deletion_timeout_ms: 60_000,
        ..test_config()
    }
}

/// Loads `count` 64x64 textures to full resolution and returns their handles.
fn load_fleet(
    harness: &mut Harness,
    now: &mut Instant,
    count: usize,
) -> (Vec<TextureHandle>, HashMap<TextureId, Vec<u8>>) {
    let mut assets = HashMap::new();
    let handles: Vec<TextureHandle> = (0..count)
        .map(|i| {
            let id = TextureId::new();
            assets.insert(id, encode_asset(64, 64, i as u8));
            harness.system.acquire(id, TextureKind::Fetched)
        })
        .collect();

    for _ in 0..60 {
        for &handle in &handles {
            harness.system.add_virtual_size(handle, 64.0 * 64.0);
        }
        harness.respond_unseen(&assets);
        pump(&mut harness.system, now, FRAME);
    }
    (handles, assets)
}

#[test]
fn bias_feedback_drives_usage_back_under_the_cap() {
    let config = pressure_config();
    let mut harness = Harness::new(config.clone());
    let mut now = Instant::now();

    // Eight full-resolution 64x64 textures want 32 KiB against a 2 KiB cap.
    let (handles, _assets) = load_fleet(&mut harness, &mut now, 8);

    // Demand stops; the feedback loop flushes, refetches coarse from the
    // cache, and settles.
    for _ in 0..80 {
        pump(&mut harness.system, &mut now, FRAME);
    }

    let report = harness.system.report();
    assert!(
        report.resident_bytes <= config.resident_cap_bytes,
        "still {} resident bytes against a {} cap",
        report.resident_bytes,
        config.resident_cap_bytes
    );
    assert!(report.discard_bias <= config.bias_max);

    // Entities survived as records; nothing holds full resolution any more.
    for handle in handles {
        let entity = harness.system.entity(handle).expect("record must persist");
        if let Some(current) = entity.current_discard() {
            assert!(current > 0, "full-resolution texture survived the squeeze");
        }
    }
}

#[test]
fn two_stage_deletion_flushes_then_removes_idle_entities() {
    let config = StreamingConfig {
        deletion_timeout_ms: 5_000,
        ledger_interval_ms: 100,
        ..test_config()
    };
    let mut harness = Harness::new(config);
    let mut now = Instant::now();

    let (handles, _assets) = load_fleet(&mut harness, &mut now, 1);
    let handle = handles[0];
    let id = harness.system.entity(handle).unwrap().id();
    assert!(harness.system.entity(handle).unwrap().is_resident());

    harness.system.release(handle);

    // Past the deletion window: first sweep destroys the GPU resource while
    // the record persists in the no-data state.
    pump(&mut harness.system, &mut now, Duration::from_secs(6));
    let entity = harness.system.entity(handle).expect("record must persist");
    assert!(!entity.is_resident());
    assert_eq!(entity.current_discard(), None);
    assert!(harness.gpu.destroyed() >= 1);

    // The following sweep removes the record itself.
    pump(&mut harness.system, &mut now, Duration::from_secs(1));
    assert!(harness.system.entity(handle).is_none());
    assert_eq!(harness.system.handle_of(id), None);
}

#[test]
fn referenced_entities_are_never_deletion_candidates() {
    let config = StreamingConfig {
        deletion_timeout_ms: 1_000,
        ledger_interval_ms: 100,
        ..test_config()
    };
    let mut harness = Harness::new(config);
    let mut now = Instant::now();

    let (handles, _assets) = load_fleet(&mut harness, &mut now, 2);
    let kept = handles[0];
    let dropped = handles[1];
    harness.system.release(dropped);

    // Idle far past the window; only the unreferenced entity may go.
    for _ in 0..30 {
        pump(&mut harness.system, &mut now, Duration::from_millis(500));
    }

    assert!(harness.system.entity(kept).is_some());
    assert!(harness.system.entity(dropped).is_none());
}

#[test]
fn pinned_entities_survive_every_sweep() {
    let config = StreamingConfig {
        deletion_timeout_ms: 500,
        ledger_interval_ms: 100,
        ..test_config()
    };
    let mut harness = Harness::new(config);
    let mut now = Instant::now();

    let (handles, _assets) = load_fleet(&mut harness, &mut now, 1);
    let pinned = handles[0];
    harness
        .system
        .set_boost(pinned, orama_core::texture::BoostLevel::Pinned);
    harness.system.release(pinned);

    for _ in 0..20 {
        pump(&mut harness.system, &mut now, Duration::from_millis(500));
    }

    let entity = harness.system.entity(pinned).expect("pinned record vanished");
    assert!(entity.is_resident(), "pinned resource must stay resident");
}

#[test]
fn critical_headroom_slams_the_brake_and_flushes() {
    let config = pressure_config();
    let mut harness = Harness::new(config.clone());
    let mut now = Instant::now();

    let (_handles, _assets) = load_fleet(&mut harness, &mut now, 4);
    assert!(harness.system.report().resident_bytes > 0);

    harness.probe.set_available(Some(0));
    pump(&mut harness.system, &mut now, Duration::from_millis(500));
    pump(&mut harness.system, &mut now, Duration::from_millis(500));

    assert_eq!(harness.system.discard_bias(), config.bias_max);
    assert_eq!(
        harness.system.poll_pressure_event(),
        Some(PressureEvent::ReduceViewDistance)
    );
    assert_eq!(harness.system.report().resident_bytes, 0);
}

#[test]
fn user_advisory_waits_for_a_failed_allocation() {
    let config = pressure_config();
    let mut harness = Harness::new(config);
    let mut now = Instant::now();

    // The very first upload attempt fails, recording the allocation failure;
    // the retry on the next frame succeeds.
    harness.gpu.fail_next_create();
    let (_handles, _assets) = load_fleet(&mut harness, &mut now, 1);

    harness.probe.set_available(Some(0));
    pump(&mut harness.system, &mut now, Duration::from_millis(500));

    let mut events = Vec::new();
    while let Some(event) = harness.system.poll_pressure_event() {
        events.push(event);
    }
    assert!(events.contains(&PressureEvent::ReduceViewDistance));
    assert!(events
        .iter()
        .any(|e| matches!(e, PressureEvent::AdvisoryLowMemory { .. })));

    // Rate-limited: staying critical stays quiet.
    pump(&mut harness.system, &mut now, Duration::from_millis(500));
    assert_eq!(harness.system.poll_pressure_event(), None);
}
