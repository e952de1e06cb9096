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

//! The texture entity: discard ladder state, raw buffers, GPU residency,
//! and callback registrations.
//!
//! Entities are created when first referenced, live in the
//! [`crate::arena::TextureArena`], and are mutated exclusively from the main
//! thread. The raw buffer is exclusively owned here; at most one current
//! buffer plus an optional small saved low-discard buffer that allows a flushed
//! texture to come back without a refetch.

use crate::arena::TextureHandle;
use orama_core::texture::discard;
use orama_core::texture::{BoostLevel, RawImage, TextureId, TextureKind};
use orama_core::GpuTextureHandle;
use std::time::Instant;

/// What a loaded-callback is told.
pub enum CallbackOutcome<'a> {
    /// Data satisfying the registered discard level is available.
    Loaded {
        /// The discard level now loaded.
        discard: u8,
        /// The raw buffer, present only when the registration asked for it.
        raw: Option<&'a RawImage>,
    },
    /// The asset is confirmed missing; render a fallback.
    Missing,
}

/// One registered completion callback.
pub(crate) struct LoadedCallback {
    pub(crate) desired_discard: u8,
    pub(crate) needs_raw: bool,
    pub(crate) callback: Box<dyn FnMut(CallbackOutcome<'_>) + Send>,
}

/// A raw buffer kept after a flush, small enough to be nearly free.
#[derive(Debug, Clone)]
pub(crate) struct SavedRaw {
    pub(crate) image: RawImage,
    pub(crate) discard: u8,
}

/// The central entity of the streaming engine.
pub struct TextureEntity {
    id: TextureId,
    kind: TextureKind,
    boost: BoostLevel,
    can_use_http: bool,
    /// Optional direct source URL for the HTTP tier.
    source_url: Option<String>,
    /// Owning simulator host for categories that fetch over UDP.
    target_host: Option<String>,

    /// Composite-object links: demand added to this entity also flows to its
    /// children. Handles, not owning pointers, so cycles cannot leak; walks
    /// carry a visited set so they cannot loop either.
    pub(crate) parent: Option<TextureHandle>,
    pub(crate) children: Vec<TextureHandle>,

    /// Full-resolution dimensions, known after the first decode.
    dimensions: Option<(u32, u32)>,

    /// The discard level of the data currently held (raw buffer or GPU).
    /// `None` is the no-data state.
    pub(crate) current_discard: Option<u8>,
    /// What policy wants loaded.
    pub(crate) desired_discard: u8,
    /// Floor set by callbacks: never request coarser than this.
    pub(crate) min_desired_discard: u8,
    /// Target of the in-flight fetch; only meaningful while one exists.
    pub(crate) requested_discard: Option<u8>,

    /// Screen-pixel demand accumulated this frame across all consumers.
    pub(crate) virtual_size: f32,
    /// Rolling counter identifying the frame `virtual_size` belongs to.
    pub(crate) virtual_size_frame: u64,
    /// The virtual size that produced the current desired discard; the
    /// hysteresis baseline.
    pub(crate) stable_virtual_size: f32,
    /// Extra urgency contributed by consumers this frame.
    pub(crate) additional_priority: f32,
    /// The most recently computed decode priority.
    pub(crate) decode_priority: f32,

    pub(crate) raw: Option<RawImage>,
    pub(crate) low_res: Option<SavedRaw>,
    pub(crate) gpu: Option<GpuTextureHandle>,
    pub(crate) gpu_discard: Option<u8>,
    /// Bytes the ledger accounted for this entity's GPU resource.
    pub(crate) resident_bytes: u64,

    pub(crate) callbacks: Vec<LoadedCallback>,
    pub(crate) ref_count: u32,
    pub(crate) missing: bool,

    pub(crate) last_referenced: Instant,
    pub(crate) last_bound: Instant,
}

impl TextureEntity {
    /// Creates an entity in the no-data state.
    pub fn new(id: TextureId, kind: TextureKind, can_use_http: bool, now: Instant) -> Self {
        Self {
            id,
            kind,
            boost: BoostLevel::None,
            can_use_http,
            source_url: None,
            target_host: None,
            parent: None,
            children: Vec::new(),
            dimensions: None,
            current_discard: None,
            desired_discard: discard::MAX_DISCARD_LEVEL,
            min_desired_discard: discard::MAX_DISCARD_LEVEL,
            requested_discard: None,
            virtual_size: 0.0,
            virtual_size_frame: 0,
            stable_virtual_size: 0.0,
            additional_priority: 0.0,
            decode_priority: 0.0,
            raw: None,
            low_res: None,
            gpu: None,
            gpu_discard: None,
            resident_bytes: 0,
            callbacks: Vec::new(),
            ref_count: 0,
            missing: false,
            last_referenced: now,
            last_bound: now,
        }
    }

    /// The stable asset id.
    pub fn id(&self) -> TextureId {
        self.id
    }

    /// The entity's kind.
    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    /// The current boost tier.
    pub fn boost(&self) -> BoostLevel {
        self.boost
    }

    /// Overrides the boost tier.
    pub fn set_boost(&mut self, boost: BoostLevel) {
        self.boost = boost;
    }

    /// Whether this texture may be fetched over HTTP. Some categories must
    /// come from the owning simulator instead. Fixed per entity, never
    /// renegotiated per request.
    pub fn can_use_http(&self) -> bool {
        self.can_use_http
    }

    /// The direct source URL the HTTP tier should use, if any.
    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }

    /// Overrides the HTTP source URL.
    pub fn set_source_url(&mut self, url: Option<String>) {
        self.source_url = url;
    }

    /// The owning simulator host for UDP fetches, if any.
    pub fn target_host(&self) -> Option<&str> {
        self.target_host.as_deref()
    }

    /// Overrides the owning simulator host.
    pub fn set_target_host(&mut self, host: Option<String>) {
        self.target_host = host;
    }

    /// The composite parent, if linked.
    pub fn parent(&self) -> Option<TextureHandle> {
        self.parent
    }

    /// The composite children demand flows down to.
    pub fn children(&self) -> &[TextureHandle] {
        &self.children
    }

    /// This frame's accumulated screen-pixel demand.
    pub fn virtual_size(&self) -> f32 {
        self.virtual_size
    }

    /// Full-resolution dimensions, once known.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    /// The discard level of the loaded data, `None` before any data arrives.
    pub fn current_discard(&self) -> Option<u8> {
        self.current_discard
    }

    /// The discard level policy currently wants.
    pub fn desired_discard(&self) -> u8 {
        self.desired_discard
    }

    /// The most recently computed decode priority.
    pub fn decode_priority(&self) -> f32 {
        self.decode_priority
    }

    /// Whether the asset is confirmed missing.
    pub fn is_missing(&self) -> bool {
        self.missing
    }

    /// Active consumer references.
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// Whether a GPU resource is currently resident.
    pub fn is_resident(&self) -> bool {
        self.gpu.is_some()
    }

    /// The deepest discard this image supports, or the global ceiling while
    /// dimensions are unknown.
    pub fn max_discard(&self) -> u8 {
        match self.dimensions {
            Some((w, h)) => discard::max_discard_for(w, h),
            None => discard::MAX_DISCARD_LEVEL,
        }
    }

    /// Accumulates one consumer's screen-pixel demand for this frame.
    ///
    /// The accumulator resets itself when `frame` moves past the frame it was
    /// collected in, so every consumer simply adds and the first add of a new
    /// frame starts from zero.
    pub fn add_virtual_size(&mut self, pixel_area: f32, frame: u64) {
        if self.virtual_size_frame != frame {
            self.virtual_size = 0.0;
            self.additional_priority = 0.0;
            self.virtual_size_frame = frame;
        }
        self.virtual_size += pixel_area.max(0.0);
    }

    /// Accumulates consumer-signalled extra urgency for this frame.
    pub fn add_additional_priority(&mut self, extra: f32, frame: u64) {
        if self.virtual_size_frame != frame {
            self.virtual_size = 0.0;
            self.additional_priority = 0.0;
            self.virtual_size_frame = frame;
        }
        self.additional_priority += extra.max(0.0);
    }

    /// Registers a completion callback and tightens the desired-discard
    /// floor so policy never requests coarser than the registration needs.
    pub fn register_callback(
        &mut self,
        desired_discard: u8,
        needs_raw: bool,
        callback: Box<dyn FnMut(CallbackOutcome<'_>) + Send>,
    ) {
        self.min_desired_discard = self.min_desired_discard.min(desired_discard);
        self.callbacks.push(LoadedCallback {
            desired_discard,
            needs_raw,
            callback,
        });
    }

    /// Whether any outstanding callback still needs the raw buffer kept.
    pub(crate) fn callbacks_need_raw(&self) -> bool {
        self.callbacks.iter().any(|cb| cb.needs_raw)
    }

    /// Whether the loaded data satisfies a given discard request.
    pub fn satisfies(&self, requested: u8) -> bool {
        matches!(self.current_discard, Some(current) if current <= requested)
    }

    /// Applies a decoded buffer at `achieved` discard, learning full
    /// dimensions on first contact.
    pub(crate) fn apply_decoded(&mut self, image: RawImage, achieved: u8) {
        if self.dimensions.is_none() {
            self.dimensions = Some((image.width << achieved, image.height << achieved));
        }
        self.current_discard = Some(achieved);
        self.raw = Some(image);
    }

    /// Saves a small low-discard copy of the current raw buffer, if one can
    /// be made under `max_dimension`.
    pub(crate) fn save_low_res(&mut self, max_dimension: u32) {
        let (Some(raw), Some(current)) = (&self.raw, self.current_discard) else {
            return;
        };
        let mut levels = 0u8;
        while (raw.width.max(raw.height) >> levels) > max_dimension {
            levels += 1;
        }
        let image = if levels == 0 { raw.clone() } else { raw.downsampled(levels) };
        self.low_res = Some(SavedRaw {
            image,
            discard: current.saturating_add(levels),
        });
    }

    /// Invokes and removes every callback the loaded data now satisfies.
    /// Returns how many fired.
    pub(crate) fn fire_satisfied_callbacks(&mut self) -> usize {
        let Some(current) = self.current_discard else {
            return 0;
        };
        let mut fired = Vec::new();
        let mut index = 0;
        while index < self.callbacks.len() {
            if current <= self.callbacks[index].desired_discard {
                fired.push(self.callbacks.swap_remove(index));
            } else {
                index += 1;
            }
        }
        let count = fired.len();
        for mut cb in fired {
            let raw = if cb.needs_raw { self.raw.as_ref() } else { None };
            (cb.callback)(CallbackOutcome::Loaded {
                discard: current,
                raw,
            });
        }
        count
    }

    /// Invokes and removes every callback with the missing outcome.
    pub(crate) fn fire_missing_callbacks(&mut self) {
        for mut cb in self.callbacks.drain(..) {
            (cb.callback)(CallbackOutcome::Missing);
        }
    }

    /// Clears sticky failure state and drops all loaded data so the entity
    /// re-enters the fetch pipeline from scratch. Resources must already have
    /// been released by the caller; this only resets bookkeeping.
    pub(crate) fn reset_for_refetch(&mut self) {
        self.missing = false;
        self.current_discard = None;
        self.requested_discard = None;
        self.stable_virtual_size = 0.0;
        self.raw = None;
        self.low_res = None;
        self.gpu = None;
        self.gpu_discard = None;
        self.resident_bytes = 0;
    }
}
