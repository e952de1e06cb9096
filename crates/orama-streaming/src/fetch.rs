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

//! The fetch request tracker: one state machine per entity with an in-flight
//! request.
//!
//! The tracker enforces the at-most-one-in-flight invariant (a second request
//! for an entity that already has one is refused), matches completions
//! against the request that is still current so stale results are discarded,
//! and cancels requests that have gone silent past the idle window. Idle
//! timeout is not failure; it never marks an asset missing.

use crate::arena::TextureHandle;
use orama_core::texture::TextureId;
use orama_core::transport::{FetchRequestId, FetchTier};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Where a request currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// Created, not yet dispatched to a tier.
    Requested,
    /// Waiting on the disk cache worker.
    Cache,
    /// Waiting on the HTTP tier.
    Http,
    /// Waiting on the simulator UDP tier.
    Simulator,
}

impl FetchState {
    /// The tier a state is waiting on, if any.
    pub fn tier(self) -> Option<FetchTier> {
        match self {
            FetchState::Requested => None,
            FetchState::Cache => Some(FetchTier::Cache),
            FetchState::Http => Some(FetchTier::Http),
            FetchState::Simulator => Some(FetchTier::Simulator),
        }
    }
}

/// One in-flight fetch. Ephemeral; deleted on completion, failure,
/// cancellation, or idle timeout.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Identity completions must echo to be applied.
    pub id: FetchRequestId,
    /// The entity this fetch belongs to.
    pub handle: TextureHandle,
    /// The asset being fetched.
    pub texture: TextureId,
    /// The discard level this request is negotiating for.
    pub target_discard: u8,
    /// Current state.
    pub state: FetchState,
    /// When the request was created.
    pub issued_at: Instant,
    /// Last time any bytes (or a keep-alive) arrived.
    pub last_activity: Instant,
    /// Payload bytes received so far.
    pub bytes_received: u64,
}

/// Tracks every in-flight request, keyed by entity handle.
#[derive(Default)]
pub struct FetchTracker {
    requests: HashMap<TextureHandle, FetchRequest>,
    next_id: u64,
}

impl FetchTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an entity already has a request in flight.
    pub fn in_flight(&self, handle: TextureHandle) -> bool {
        self.requests.contains_key(&handle)
    }

    /// The in-flight request for an entity, if any.
    pub fn request_for(&self, handle: TextureHandle) -> Option<&FetchRequest> {
        self.requests.get(&handle)
    }

    /// Requests currently in flight.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Opens a request for an entity.
    ///
    /// Returns `None` when the entity already has one in flight; callers are
    /// expected to have checked [`FetchTracker::in_flight`] first, so hitting
    /// this is a caught programming error, logged and refused.
    pub fn begin(
        &mut self,
        handle: TextureHandle,
        texture: TextureId,
        target_discard: u8,
        now: Instant,
    ) -> Option<FetchRequestId> {
        if self.requests.contains_key(&handle) {
            log::error!("Fetch tracker: refused second in-flight request for {texture}");
            return None;
        }
        let id = FetchRequestId(self.next_id);
        self.next_id += 1;
        self.requests.insert(
            handle,
            FetchRequest {
                id,
                handle,
                texture,
                target_discard,
                state: FetchState::Requested,
                issued_at: now,
                last_activity: now,
                bytes_received: 0,
            },
        );
        Some(id)
    }

    /// Moves a request to the state of the tier it was dispatched to.
    pub fn dispatched(&mut self, handle: TextureHandle, state: FetchState) {
        if let Some(request) = self.requests.get_mut(&handle) {
            request.state = state;
        }
    }

    /// Records activity (bytes or keep-alive) for the request, resetting the
    /// idle clock. Ignored for stale request ids.
    pub fn note_activity(&mut self, handle: TextureHandle, id: FetchRequestId, bytes: u64, now: Instant) {
        if let Some(request) = self.requests.get_mut(&handle) {
            if request.id == id {
                request.last_activity = now;
                request.bytes_received += bytes;
            }
        }
    }

    /// Closes the request matching `id` and returns it.
    ///
    /// A completion for any other id is stale (the request was cancelled or
    /// replaced after the result was produced) and yields `None`, which is
    /// the signal to discard the result. This is the ordering guarantee that
    /// a completion is never applied after a more recent cancellation.
    pub fn complete(&mut self, handle: TextureHandle, id: FetchRequestId) -> Option<FetchRequest> {
        match self.requests.get(&handle) {
            Some(request) if request.id == id => self.requests.remove(&handle),
            _ => None,
        }
    }

    /// Cancels an entity's in-flight request, returning it for best-effort
    /// transport cancellation.
    pub fn cancel(&mut self, handle: TextureHandle) -> Option<FetchRequest> {
        self.requests.remove(&handle)
    }

    /// Removes and returns every request whose idle clock has exceeded
    /// `idle_timeout`.
    pub fn poll_timeouts(&mut self, now: Instant, idle_timeout: Duration) -> Vec<FetchRequest> {
        let expired: Vec<TextureHandle> = self
            .requests
            .values()
            .filter(|r| now.duration_since(r.last_activity) >= idle_timeout)
            .map(|r| r.handle)
            .collect();
        expired
            .into_iter()
            .filter_map(|handle| self.requests.remove(&handle))
            .collect()
    }
}

/// The discard level the next fetch round should request.
///
/// With progressive loading the request moves at most `step` levels from what
/// is already held toward the desired level; an entity with no data starts
/// coarse and converges over several rounds, which bounds burst bandwidth and
/// lets a re-prioritization interrupt a fetch that is no longer the most
/// important. Without progressive loading the desired level is requested
/// outright.
pub fn next_request_discard(
    current: Option<u8>,
    desired: u8,
    max_discard: u8,
    progressive: bool,
    step: u8,
) -> u8 {
    if !progressive {
        return desired;
    }
    let have = current.unwrap_or_else(|| max_discard.saturating_add(1));
    have.saturating_sub(step.max(1)).max(desired).min(max_discard)
}
