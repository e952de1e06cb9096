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

//! The main-thread facade of the streaming engine.
//!
//! [`TextureStreamingSystem::update_at`] is the once-per-frame pump: drain
//! worker completions, recompute priorities, issue fetches, create GPU
//! resources, then let the ledger adjust the bias and run its sweeps. The
//! priority, issuance, and upload phases each run under an independent
//! millisecond sub-budget, so a heavy frame degrades by doing less work, not
//! by stalling.
//!
//! All mutation of entities, the tracker, and the ledger happens here, on the
//! calling thread. Worker threads and transports only feed the completion
//! queues.

use crate::arena::{TextureArena, TextureHandle};
use crate::config::StreamingConfig;
use crate::entity::{CallbackOutcome, TextureEntity};
use crate::fetch::{next_request_discard, FetchState, FetchTracker};
use crate::ledger::{PressureEvent, ResidentLedger};
use crate::priority;
use crate::workers::{DecodeWorker, DiskWorker};
use crossbeam_channel::Receiver;
use orama_core::texture::{BoostLevel, TextureId, TextureKind};
use orama_core::transport::{
    CacheStore, FetchTier, TextureDecoder, TextureTransport, TransportEvent, TransportStatus,
};
use orama_core::{GpuTextureBackend, StreamingReport, SystemMemoryProbe};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Stats {
    fetches_issued: u64,
    fetches_completed: u64,
    fetches_failed: u64,
    fetches_timed_out: u64,
    cache_hits: u64,
    decodes_completed: u64,
    bytes_fetched: u64,
}

/// A per-phase time budget, checked every few iterations so the check itself
/// stays cheap.
struct PhaseBudget {
    started: Instant,
    limit: Duration,
    processed: usize,
}

impl PhaseBudget {
    fn new(limit_ms: f32) -> Self {
        Self {
            started: Instant::now(),
            limit: Duration::from_secs_f32((limit_ms.max(0.0)) / 1_000.0),
            processed: 0,
        }
    }

    /// True once the budget is spent. Always admits the first item so a
    /// starved phase still makes progress every frame.
    fn exhausted(&mut self) -> bool {
        let processed = self.processed;
        self.processed += 1;
        if processed == 0 {
            return false;
        }
        if processed % 8 != 0 {
            return false;
        }
        self.started.elapsed() >= self.limit
    }
}

/// The texture streaming and discard-level management engine.
pub struct TextureStreamingSystem {
    config: StreamingConfig,
    arena: TextureArena,
    tracker: FetchTracker,
    ledger: ResidentLedger,
    gpu: Arc<dyn GpuTextureBackend>,
    transport: Arc<dyn TextureTransport>,
    transport_events: Receiver<TransportEvent>,
    disk: DiskWorker,
    decode: DecodeWorker,
    probe: Arc<dyn SystemMemoryProbe>,
    frame: u64,
    /// The engine's notion of now: the timestamp of the most recent update.
    /// Entity touch times use this clock so fabricated-time callers stay
    /// consistent with the sweeps.
    clock: Instant,
    paused: bool,
    camera_speed: f32,
    recompute_cursor: usize,
    stats: Stats,
}

impl TextureStreamingSystem {
    /// Wires the engine to its collaborators and spawns the worker threads.
    ///
    /// `transport_events` is the receiving end of the completion channel the
    /// transport was constructed with.
    pub fn new(
        config: StreamingConfig,
        gpu: Arc<dyn GpuTextureBackend>,
        transport: Arc<dyn TextureTransport>,
        transport_events: Receiver<TransportEvent>,
        cache: Arc<dyn CacheStore>,
        decoder: Arc<dyn TextureDecoder>,
        probe: Arc<dyn SystemMemoryProbe>,
    ) -> Self {
        Self {
            config,
            arena: TextureArena::new(),
            tracker: FetchTracker::new(),
            ledger: ResidentLedger::new(),
            gpu,
            transport,
            transport_events,
            disk: DiskWorker::spawn(cache),
            decode: DecodeWorker::spawn(decoder),
            probe,
            frame: 0,
            clock: Instant::now(),
            paused: false,
            camera_speed: 0.0,
            recompute_cursor: 0,
            stats: Stats::default(),
        }
    }

    /// Brackets a consumer's use of a texture, creating the entity on first
    /// contact. A confirmed-missing texture stays missing; acquiring it does
    /// not restart the fetch pipeline.
    pub fn acquire(&mut self, id: TextureId, kind: TextureKind) -> TextureHandle {
        self.acquire_with(id, kind, true)
    }

    /// [`TextureStreamingSystem::acquire`] for categories that must come from
    /// the owning simulator instead of HTTP.
    pub fn acquire_with(
        &mut self,
        id: TextureId,
        kind: TextureKind,
        can_use_http: bool,
    ) -> TextureHandle {
        let now = self.clock;
        if let Some(handle) = self.arena.handle_of(id) {
            if let Some(entity) = self.arena.get_mut(handle) {
                entity.ref_count += 1;
                entity.last_referenced = now;
                return handle;
            }
        }
        let mut entity = TextureEntity::new(id, kind, can_use_http, now);
        entity.ref_count = 1;
        self.arena.insert(entity)
    }

    /// Releases one consumer reference. The eviction clock only starts once
    /// the count reaches zero.
    pub fn release(&mut self, handle: TextureHandle) {
        if let Some(entity) = self.arena.get_mut(handle) {
            entity.ref_count = entity.ref_count.saturating_sub(1);
        }
    }

    /// Accumulates one visible consumer's screen-pixel demand this frame.
    ///
    /// Demand also flows down composite-object links: every child texture
    /// receives the same contribution. The walk follows handles with a
    /// visited set, so cyclic links terminate instead of recursing.
    pub fn add_virtual_size(&mut self, handle: TextureHandle, pixel_area: f32) {
        let frame = self.frame;
        let now = self.clock;
        let Some(entity) = self.arena.get_mut(handle) else {
            return;
        };
        entity.add_virtual_size(pixel_area, frame);
        entity.last_referenced = now;

        let mut stack: Vec<TextureHandle> = entity.children.clone();
        if stack.is_empty() {
            return;
        }
        let mut visited: std::collections::HashSet<u32> = std::collections::HashSet::new();
        visited.insert(handle.index);
        while let Some(next) = stack.pop() {
            if !visited.insert(next.index) {
                continue;
            }
            if let Some(child) = self.arena.get_mut(next) {
                child.add_virtual_size(pixel_area, frame);
                child.last_referenced = now;
                stack.extend(child.children.iter().copied());
            }
        }
    }

    /// Links `child` under `parent` so the parent's on-screen demand carries
    /// its composite children along. Index-based links; a stale handle on
    /// either side makes this a no-op.
    pub fn link_child(&mut self, parent: TextureHandle, child: TextureHandle) {
        if parent == child
            || self.arena.get(parent).is_none()
            || self.arena.get(child).is_none()
        {
            return;
        }
        self.unlink_child(child);
        if let Some(entity) = self.arena.get_mut(child) {
            entity.parent = Some(parent);
        }
        if let Some(entity) = self.arena.get_mut(parent) {
            if !entity.children.contains(&child) {
                entity.children.push(child);
            }
        }
    }

    /// Detaches `child` from its composite parent, if it has one.
    pub fn unlink_child(&mut self, child: TextureHandle) {
        let parent = self
            .arena
            .get_mut(child)
            .and_then(|entity| entity.parent.take());
        if let Some(parent) = parent {
            if let Some(entity) = self.arena.get_mut(parent) {
                entity.children.retain(|&handle| handle != child);
            }
        }
    }

    /// Overrides the direct HTTP source URL for a texture.
    pub fn set_source_url(&mut self, handle: TextureHandle, url: Option<String>) {
        if let Some(entity) = self.arena.get_mut(handle) {
            entity.set_source_url(url);
        }
    }

    /// Overrides the owning simulator host for a texture.
    pub fn set_target_host(&mut self, handle: TextureHandle, host: Option<String>) {
        if let Some(entity) = self.arena.get_mut(handle) {
            entity.set_target_host(host);
        }
    }

    /// Accumulates consumer-signalled extra urgency this frame.
    pub fn add_additional_priority(&mut self, handle: TextureHandle, extra: f32) {
        let frame = self.frame;
        if let Some(entity) = self.arena.get_mut(handle) {
            entity.add_additional_priority(extra, frame);
        }
    }

    /// Overrides the boost tier of a texture.
    pub fn set_boost(&mut self, handle: TextureHandle, boost: BoostLevel) {
        if let Some(entity) = self.arena.get_mut(handle) {
            entity.set_boost(boost);
        }
    }

    /// Registers a completion callback. Fires immediately when the loaded
    /// data already satisfies the request or the asset is already confirmed
    /// missing; otherwise it is invoked from a later update pass.
    pub fn register_callback(
        &mut self,
        handle: TextureHandle,
        desired_discard: u8,
        needs_raw: bool,
        mut callback: Box<dyn FnMut(CallbackOutcome<'_>) + Send>,
    ) {
        let Some(entity) = self.arena.get_mut(handle) else {
            return;
        };
        if entity.is_missing() {
            callback(CallbackOutcome::Missing);
            return;
        }
        if let Some(current) = entity.current_discard() {
            if current <= desired_discard {
                let raw = if needs_raw { entity.raw.as_ref() } else { None };
                callback(CallbackOutcome::Loaded {
                    discard: current,
                    raw,
                });
                return;
            }
        }
        entity.register_callback(desired_discard, needs_raw, callback);
    }

    /// Clears sticky failure state and restarts the fetch pipeline from
    /// nothing. The manual recovery action for corrupted cache entries.
    pub fn force_refetch(&mut self, handle: TextureHandle) {
        if let Some(request) = self.tracker.cancel(handle) {
            if let Some(tier) = request.state.tier() {
                if tier != FetchTier::Cache {
                    self.transport.cancel_fetch(request.id);
                }
            }
        }
        let Some(entity) = self.arena.get_mut(handle) else {
            return;
        };
        if let Some(gpu_handle) = entity.gpu.take() {
            self.gpu.destroy_resource(gpu_handle);
            self.ledger.sub_resident(entity.resident_bytes);
        }
        self.ledger.sub_decoded(Self::decoded_footprint(entity));
        entity.reset_for_refetch();
    }

    /// Binds the texture's GPU resource for rendering. Returns `false` when
    /// nothing is resident yet; the caller renders its fallback instead.
    pub fn bind(&mut self, handle: TextureHandle, unit: u32) -> bool {
        let Some(entity) = self.arena.get_mut(handle) else {
            return false;
        };
        let now = self.clock;
        match entity.gpu {
            Some(gpu_handle) => {
                entity.last_bound = now;
                self.gpu.bind_resource(gpu_handle, unit);
                true
            }
            None => false,
        }
    }

    /// Suspends issuance of new fetches. Completions keep draining.
    pub fn pause_fetching(&mut self) {
        self.paused = true;
    }

    /// Resumes issuance of new fetches.
    pub fn resume_fetching(&mut self) {
        self.paused = false;
    }

    /// Feeds the camera speed used by the motion penalty.
    pub fn set_camera_speed(&mut self, speed: f32) {
        self.camera_speed = speed;
    }

    /// The live handle for a texture id, if the entity exists.
    pub fn handle_of(&self, id: TextureId) -> Option<TextureHandle> {
        self.arena.handle_of(id)
    }

    /// Read access to an entity, primarily for diagnostics and tests.
    pub fn entity(&self, handle: TextureHandle) -> Option<&TextureEntity> {
        self.arena.get(handle)
    }

    /// The current global discard bias.
    pub fn discard_bias(&self) -> f32 {
        self.ledger.bias()
    }

    /// Next queued memory-pressure advisory, if any.
    pub fn poll_pressure_event(&mut self) -> Option<PressureEvent> {
        self.ledger.take_event()
    }

    /// Snapshot of counters and budgets for telemetry overlays.
    pub fn report(&self) -> StreamingReport {
        StreamingReport {
            resident_bytes: self.ledger.pressure().resident_bytes(),
            decoded_bytes: self.ledger.pressure().decoded_bytes(),
            discard_bias: self.ledger.bias(),
            live_entities: self.arena.len(),
            in_flight_fetches: self.tracker.len(),
            fetches_issued: self.stats.fetches_issued,
            fetches_completed: self.stats.fetches_completed,
            fetches_failed: self.stats.fetches_failed,
            fetches_timed_out: self.stats.fetches_timed_out,
            cache_hits: self.stats.cache_hits,
            decodes_completed: self.stats.decodes_completed,
            bytes_fetched: self.stats.bytes_fetched,
        }
    }

    /// Runs one frame of the engine at the wall-clock now.
    pub fn update(&mut self) {
        self.update_at(Instant::now());
    }

    /// Runs one frame of the engine at an explicit timestamp. Timestamps must
    /// be monotonic across calls; tests drive timeouts and sweeps by passing
    /// fabricated instants.
    pub fn update_at(&mut self, now: Instant) {
        self.frame += 1;
        self.clock = self.clock.max(now);

        self.drain_disk_results(now);
        self.drain_transport_events(now);
        self.drain_decode_results();
        self.expire_idle_fetches(now);

        self.priority_pass();
        if !self.paused {
            self.issue_fetches(now);
        }
        self.upload_pass();

        let headroom = self.probe.available_bytes();
        let outcome = self.ledger.maybe_adjust(now, headroom, &self.config);
        if outcome.ran {
            if outcome.flush_wanted {
                self.flush_pass(now);
            }
            self.deletion_sweep(now);
        }
    }

    // ---- frame phases -------------------------------------------------

    fn drain_disk_results(&mut self, now: Instant) {
        while let Some(result) = self.disk.try_recv() {
            if self.arena.get(result.handle).is_none() {
                continue;
            }
            let current = match self.tracker.request_for(result.handle) {
                Some(request) if request.id == result.request => Some(request.target_discard),
                _ => None,
            };
            let Some(target_discard) = current else {
                continue;
            };

            match result.hit {
                Some((bytes, achieved)) => {
                    self.stats.cache_hits += 1;
                    self.tracker
                        .note_activity(result.handle, result.request, bytes.len() as u64, now);
                    // Cached bytes may support a finer level than this round
                    // asked for; decode only what was negotiated.
                    let decode_at = achieved.max(target_discard);
                    self.decode
                        .submit(result.request, result.handle, result.texture, decode_at, bytes);
                }
                None => {
                    // Cache miss: escalate to the network tier this entity
                    // is allowed to use.
                    let can_http = self
                        .arena
                        .get(result.handle)
                        .map(|e| e.can_use_http())
                        .unwrap_or(true);
                    let (tier, state) = if can_http {
                        (FetchTier::Http, FetchState::Http)
                    } else {
                        (FetchTier::Simulator, FetchState::Simulator)
                    };
                    self.tracker.dispatched(result.handle, state);
                    self.tracker
                        .note_activity(result.handle, result.request, 0, now);
                    self.transport
                        .issue_fetch(result.request, result.texture, target_discard, tier);
                }
            }
        }
    }

    fn drain_transport_events(&mut self, now: Instant) {
        while let Ok(event) = self.transport_events.try_recv() {
            let Some(handle) = self.arena.handle_of(event.texture) else {
                continue;
            };
            let is_current = matches!(
                self.tracker.request_for(handle),
                Some(request) if request.id == event.request
            );
            if !is_current {
                // Cancellation already won; the bytes were consumed off the
                // wire but the result is dropped here.
                continue;
            }

            match event.status {
                TransportStatus::Progress => {
                    self.tracker
                        .note_activity(handle, event.request, event.bytes.len() as u64, now);
                }
                TransportStatus::Complete => {
                    self.tracker
                        .note_activity(handle, event.request, event.bytes.len() as u64, now);
                    self.stats.bytes_fetched += event.bytes.len() as u64;
                    if event.bytes.is_empty() {
                        // A clean completion with nothing in it is the
                        // authoritative "no such data" answer.
                        self.tracker.complete(handle, event.request);
                        self.settle_empty_fetch(handle);
                    } else {
                        let target = self
                            .tracker
                            .request_for(handle)
                            .map(|request| request.target_discard)
                            .unwrap_or(event.achieved_discard);
                        self.disk
                            .write(event.texture, event.achieved_discard, event.bytes.clone());
                        self.decode.submit(
                            event.request,
                            handle,
                            event.texture,
                            event.achieved_discard.max(target),
                            event.bytes,
                        );
                    }
                }
                TransportStatus::NotFound => {
                    self.tracker.complete(handle, event.request);
                    self.settle_empty_fetch(handle);
                }
                TransportStatus::Failed(reason) => {
                    self.tracker.complete(handle, event.request);
                    self.stats.fetches_failed += 1;
                    if let Some(entity) = self.arena.get_mut(handle) {
                        entity.requested_discard = None;
                        log::warn!(
                            "Fetch for {} failed at the network tier: {reason}",
                            entity.id()
                        );
                    }
                }
            }
        }
    }

    /// Applies the policy for a fetch that completed with no data: with no
    /// prior successful discard the asset is confirmed missing (sticky);
    /// with prior data the entity simply keeps what it has.
    fn settle_empty_fetch(&mut self, handle: TextureHandle) {
        let Some(entity) = self.arena.get_mut(handle) else {
            return;
        };
        entity.requested_discard = None;
        if entity.current_discard().is_none() && entity.low_res.is_none() {
            entity.missing = true;
            entity.fire_missing_callbacks();
            log::debug!("Texture {} confirmed missing", entity.id());
        }
    }

    fn drain_decode_results(&mut self) {
        while let Some(result) = self.decode.try_recv() {
            let Some(request) = self.tracker.complete(result.handle, result.request) else {
                // Stale: the request was cancelled or replaced while the
                // decoder was busy.
                continue;
            };
            let Some(entity) = self.arena.get_mut(result.handle) else {
                continue;
            };

            match result.result {
                Ok(image) => {
                    entity.requested_discard = None;
                    // Loaded data only ever gets finer here; a coarser decode
                    // than what is already held is dropped.
                    let finer = entity
                        .current_discard()
                        .map_or(true, |current| result.discard < current);
                    if !finer {
                        continue;
                    }
                    self.ledger.sub_decoded(Self::decoded_footprint(entity));
                    entity.apply_decoded(image, result.discard);
                    self.ledger.add_decoded(Self::decoded_footprint(entity));
                    self.stats.decodes_completed += 1;
                    self.stats.fetches_completed += 1;
                    entity.fire_satisfied_callbacks();
                }
                Err(err) => {
                    entity.requested_discard = None;
                    log::warn!(
                        "Texture {} (request {:?}) produced an undecodable payload: {err}",
                        entity.id(),
                        request.id
                    );
                    // Oversized or malformed payloads are treated exactly
                    // like a missing asset; nothing retries them.
                    entity.missing = true;
                    entity.fire_missing_callbacks();
                }
            }
        }
    }

    fn expire_idle_fetches(&mut self, now: Instant) {
        let idle = self.config.fetch_idle_timeout();
        for request in self.tracker.poll_timeouts(now, idle) {
            self.stats.fetches_timed_out += 1;
            if let Some(tier) = request.state.tier() {
                if tier != FetchTier::Cache {
                    self.transport.cancel_fetch(request.id);
                }
            }
            if let Some(entity) = self.arena.get_mut(request.handle) {
                entity.requested_discard = None;
            }
            log::debug!(
                "Fetch {:?} for {} idled out after {:?}",
                request.id,
                request.texture,
                idle
            );
        }
    }

    fn priority_pass(&mut self) {
        let slots = self.arena.slot_count();
        if slots == 0 {
            return;
        }
        let bias = self.ledger.bias();
        let moving = self.camera_speed > self.config.camera_motion_threshold;
        let mut budget = PhaseBudget::new(self.config.priority_budget_ms);

        let mut processed = 0;
        while processed < slots {
            if budget.exhausted() {
                break;
            }
            let index = (self.recompute_cursor + processed) % slots;
            processed += 1;
            let Some(handle) = self.arena.handle_at(index) else {
                continue;
            };
            let Some(entity) = self.arena.get_mut(handle) else {
                continue;
            };
            let penalty = if moving && entity.boost() == BoostLevel::None {
                1
            } else {
                0
            };
            priority::update_desired_discard(entity, &self.config, bias, penalty);
            priority::update_decode_priority(entity, &self.config.bands);
        }
        self.recompute_cursor = (self.recompute_cursor + processed) % slots;
    }

    fn issue_fetches(&mut self, now: Instant) {
        let mut candidates: Vec<(TextureHandle, f32)> = self
            .arena
            .iter()
            .filter(|(_, entity)| priority::is_fetchable(entity.decode_priority()))
            .map(|(handle, entity)| (handle, entity.decode_priority()))
            .collect();
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut budget = PhaseBudget::new(self.config.fetch_budget_ms);
        for (handle, _) in candidates {
            if budget.exhausted() {
                break;
            }

            // A saved low-discard buffer that already satisfies the desired
            // level short-circuits the fetch tiers entirely.
            if self.apply_saved_low_res(handle) {
                continue;
            }

            let Some(entity) = self.arena.get(handle) else {
                continue;
            };
            let texture = entity.id();
            let target = next_request_discard(
                entity.current_discard(),
                entity.desired_discard(),
                entity.max_discard(),
                self.config.progressive,
                self.config.progressive_step,
            );

            if let Some(request) = self.tracker.request_for(handle) {
                if request.target_discard <= target {
                    // An equal-or-better fetch is already pending.
                    continue;
                }
                // The in-flight request became too coarse; cancel it and
                // renegotiate at the current target.
                let (id, state) = (request.id, request.state);
                if let Some(tier) = state.tier() {
                    if tier != FetchTier::Cache {
                        self.transport.cancel_fetch(id);
                    }
                }
                self.tracker.cancel(handle);
                if let Some(entity) = self.arena.get_mut(handle) {
                    entity.requested_discard = None;
                }
            }

            if self.tracker.len() >= self.config.max_in_flight {
                break;
            }

            let Some(request) = self.tracker.begin(handle, texture, target, now) else {
                continue;
            };
            if let Some(entity) = self.arena.get_mut(handle) {
                entity.requested_discard = Some(target);
            }
            self.stats.fetches_issued += 1;

            // Every fetch starts at the cache tier; the disk worker's miss
            // escalates it to the network.
            self.tracker.dispatched(handle, FetchState::Cache);
            self.disk.read(request, handle, texture, target);
        }
    }

    /// Re-derives loaded data from the saved low-discard buffer when it
    /// satisfies the desired level, skipping the fetch tiers. Returns whether
    /// it did.
    ///
    /// Only entities with on-screen demand take the shortcut; re-deriving a
    /// texture nothing is looking at would undo the flush that just
    /// reclaimed it.
    fn apply_saved_low_res(&mut self, handle: TextureHandle) -> bool {
        let Some(entity) = self.arena.get_mut(handle) else {
            return false;
        };
        if entity.virtual_size <= 0.0 {
            return false;
        }
        let Some(saved) = entity.low_res.as_ref() else {
            return false;
        };
        let desired = entity.desired_discard();
        let usable = saved.discard <= desired
            && entity
                .current_discard()
                .map_or(true, |current| saved.discard < current);
        if !usable {
            return false;
        }
        let (image, discard) = (saved.image.clone(), saved.discard);
        self.ledger.sub_decoded(Self::decoded_footprint(entity));
        entity.apply_decoded(image, discard);
        self.ledger.add_decoded(Self::decoded_footprint(entity));
        entity.fire_satisfied_callbacks();
        true
    }

    fn upload_pass(&mut self) {
        let pending: Vec<TextureHandle> = self
            .arena
            .iter()
            .filter(|(_, entity)| {
                entity.raw.is_some() && entity.gpu_discard != entity.current_discard
            })
            .map(|(handle, _)| handle)
            .collect();

        let mut budget = PhaseBudget::new(self.config.upload_budget_ms);
        for handle in pending {
            if budget.exhausted() {
                break;
            }
            let Some(entity) = self.arena.get_mut(handle) else {
                continue;
            };
            let Some(current) = entity.current_discard() else {
                continue;
            };
            let Some(raw) = entity.raw.as_ref() else {
                continue;
            };
            let resident = raw.byte_size() as u64;

            match self.gpu.create_resource(raw, current) {
                Ok(new_handle) => {
                    if let Some(old) = entity.gpu.take() {
                        self.gpu.destroy_resource(old);
                        self.ledger.sub_resident(entity.resident_bytes);
                    }
                    entity.gpu = Some(new_handle);
                    entity.gpu_discard = Some(current);
                    entity.resident_bytes = resident;
                    self.ledger.add_resident(resident);

                    // The raw buffer has served its purpose unless a callback
                    // still needs it; keep only the cheap low-discard copy.
                    self.ledger.sub_decoded(Self::decoded_footprint(entity));
                    entity.save_low_res(self.config.low_res_max_dimension);
                    if !entity.callbacks_need_raw() {
                        entity.raw = None;
                    }
                    self.ledger.add_decoded(Self::decoded_footprint(entity));
                }
                Err(err) => {
                    log::warn!(
                        "GPU upload for {} at discard {current} failed: {err}",
                        entity.id()
                    );
                    self.ledger.note_allocation_failure();
                }
            }
        }
    }

    /// Destroys GPU resources and raw buffers of everything not recently
    /// used, keeping entity records and their saved low-discard buffers.
    /// Runs when the bias crosses the flush threshold.
    fn flush_pass(&mut self, now: Instant) {
        let window = self.config.inactivity_flush();
        let victims: Vec<TextureHandle> = self
            .arena
            .iter()
            .filter(|(_, entity)| {
                (entity.gpu.is_some() || entity.raw.is_some())
                    && !entity.boost().no_delete()
                    && entity.kind() != TextureKind::UiPinned
                    && now.duration_since(entity.last_bound.max(entity.last_referenced)) >= window
            })
            .map(|(handle, _)| handle)
            .collect();

        for handle in victims {
            self.flush_entity(handle);
        }
    }

    /// Two-stage deletion of idle, unreferenced entities: first the GPU
    /// resource goes while the record persists in the no-data state, then a
    /// later sweep removes the record itself once no callback is outstanding.
    fn deletion_sweep(&mut self, now: Instant) {
        let window = self.config.deletion_timeout();
        let candidates: Vec<TextureHandle> = self
            .arena
            .iter()
            .filter(|(_, entity)| {
                entity.ref_count() == 0
                    && !entity.boost().no_delete()
                    && entity.kind() != TextureKind::UiPinned
                    && now.duration_since(entity.last_referenced) >= window
                    && now.duration_since(entity.last_bound) >= window
            })
            .map(|(handle, _)| handle)
            .collect();

        for handle in candidates {
            let Some(entity) = self.arena.get(handle) else {
                continue;
            };
            if entity.gpu.is_some() || entity.raw.is_some() {
                self.flush_entity(handle);
            } else if entity.callbacks.is_empty() {
                if let Some(request) = self.tracker.cancel(handle) {
                    if let Some(tier) = request.state.tier() {
                        if tier != FetchTier::Cache {
                            self.transport.cancel_fetch(request.id);
                        }
                    }
                }
                self.unlink_child(handle);
                if let Some(entity) = self.arena.get_mut(handle) {
                    self.ledger.sub_decoded(Self::decoded_footprint(entity));
                }
                if let Some(entity) = self.arena.remove(handle) {
                    log::debug!("Deleted idle texture entity {}", entity.id());
                }
            }
        }
    }

    /// Destroys the GPU resource and raw buffer, keeping the record and the
    /// saved low-discard buffer. The entity returns to the no-data state.
    fn flush_entity(&mut self, handle: TextureHandle) {
        let Some(entity) = self.arena.get_mut(handle) else {
            return;
        };
        if let Some(gpu_handle) = entity.gpu.take() {
            self.gpu.destroy_resource(gpu_handle);
            self.ledger.sub_resident(entity.resident_bytes);
            entity.resident_bytes = 0;
        }
        self.ledger.sub_decoded(Self::decoded_footprint(entity));
        entity.raw = None;
        self.ledger.add_decoded(Self::decoded_footprint(entity));
        entity.gpu_discard = None;
        entity.current_discard = None;
    }

    /// CPU-side bytes the ledger should account for this entity.
    fn decoded_footprint(entity: &TextureEntity) -> u64 {
        let raw = entity.raw.as_ref().map_or(0, |r| r.byte_size() as u64);
        let low = entity
            .low_res
            .as_ref()
            .map_or(0, |s| s.image.byte_size() as u64);
        raw + low
    }
}
