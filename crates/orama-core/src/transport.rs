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

//! Contracts with the fetch tiers: disk cache, HTTP, and the simulator
//! channel, plus the decoder that turns fetched bytes into raw images.
//!
//! Transports deliver results asynchronously through a completion queue the
//! main thread drains once per frame. The queue's sender is handed to the
//! transport at construction time; this module only defines the event shape.

use crate::error::TextureError;
use crate::texture::{RawImage, TextureId};

/// Which tier a fetch is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchTier {
    /// The local on-disk cache registry.
    Cache,
    /// An asset-server HTTP fetch.
    Http,
    /// The owning simulator's UDP channel, for texture categories that must
    /// not be fetched over HTTP.
    Simulator,
}

/// Identity of one in-flight fetch, minted by the fetch request tracker.
///
/// Completions carry the id back so a result can be matched against the
/// request that is still current; anything else is stale and discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchRequestId(pub u64);

/// Terminal or keep-alive status of a transport delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportStatus {
    /// Bytes arrived and the request is finished.
    Complete,
    /// Partial data arrived; resets the idle timer, request stays open.
    Progress,
    /// The authoritative source confirmed there is no such asset.
    NotFound,
    /// The tier failed (connection error, malformed response). Non-sticky.
    Failed(String),
}

/// One delivery from a network tier, posted to the completion queue.
#[derive(Debug, Clone)]
pub struct TransportEvent {
    /// The request this delivery answers.
    pub request: FetchRequestId,
    /// The texture the bytes belong to.
    pub texture: TextureId,
    /// The discard level the payload actually achieves.
    pub achieved_discard: u8,
    /// Encoded payload; empty for `NotFound` and `Failed`.
    pub bytes: Vec<u8>,
    /// What happened.
    pub status: TransportStatus,
}

/// The capability the engine needs from the HTTP and simulator tiers.
///
/// Implementations receive a `crossbeam_channel::Sender<TransportEvent>` at
/// construction and post every delivery there; the engine never blocks on a
/// transport.
pub trait TextureTransport: Send + Sync {
    /// Starts fetching `texture` down to `discard` from the given tier.
    /// Failures are reported through the completion queue, not returned.
    fn issue_fetch(&self, request: FetchRequestId, texture: TextureId, discard: u8, tier: FetchTier);

    /// Best-effort cancellation. Bytes already on the wire may still arrive
    /// and will be discarded by the stale-completion check.
    fn cancel_fetch(&self, request: FetchRequestId);
}

/// The capability the engine needs from the disk cache, as seen from the
/// dedicated I/O worker thread. Calls are synchronous on that thread.
pub trait CacheStore: Send + Sync {
    /// Returns cached bytes for `texture` at a discard at least as fine as
    /// `discard`, together with the discard level the bytes achieve, or
    /// `None` on a miss. Corrupt entries read back as misses.
    fn read_cached(&self, texture: TextureId, discard: u8) -> Option<(Vec<u8>, u8)>;

    /// Writes fetched bytes through to the cache. Write failures are logged
    /// by the implementation and never surfaced; the cache is advisory.
    fn write_cached(&self, texture: TextureId, discard: u8, bytes: &[u8]);
}

/// Turns encoded bytes into a raw image at a requested discard level.
///
/// Runs on the decode worker thread; must not touch engine state.
pub trait TextureDecoder: Send + Sync {
    /// Decodes `bytes` and reduces the result to `discard`.
    ///
    /// # Errors
    /// [`TextureError::OversizedImage`] or [`TextureError::MalformedImage`]
    /// when the payload violates the hard limits; both are treated like a
    /// missing asset by the policy engine.
    fn decode(&self, bytes: &[u8], discard: u8) -> Result<RawImage, TextureError>;
}
