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

//! A channel-backed transport serving fetches from an in-memory asset table.
//!
//! Stands in for the HTTP and simulator tiers in integration tests, headless
//! tools, and local replays. Deliveries are synchronous with the issue call;
//! the engine still only observes them when it drains its completion queue.

use crossbeam_channel::Sender;
use orama_core::texture::TextureId;
use orama_core::transport::{
    FetchRequestId, FetchTier, TextureTransport, TransportEvent, TransportStatus,
};
use std::collections::HashMap;
use std::sync::Mutex;

/// Serves encoded payloads straight out of a map.
pub struct LoopbackTransport {
    assets: Mutex<HashMap<TextureId, Vec<u8>>>,
    completions: Sender<TransportEvent>,
}

impl LoopbackTransport {
    /// Creates a transport that posts deliveries to `completions`.
    pub fn new(completions: Sender<TransportEvent>) -> Self {
        Self {
            assets: Mutex::new(HashMap::new()),
            completions,
        }
    }

    /// Seeds an asset the transport will serve.
    pub fn insert(&self, texture: TextureId, bytes: Vec<u8>) {
        self.assets.lock().unwrap().insert(texture, bytes);
    }

    /// Removes an asset; subsequent fetches answer `NotFound`.
    pub fn remove(&self, texture: TextureId) {
        self.assets.lock().unwrap().remove(&texture);
    }
}

impl TextureTransport for LoopbackTransport {
    fn issue_fetch(
        &self,
        request: FetchRequestId,
        texture: TextureId,
        discard: u8,
        _tier: FetchTier,
    ) {
        let payload = self.assets.lock().unwrap().get(&texture).cloned();
        let event = match payload {
            Some(bytes) => TransportEvent {
                request,
                texture,
                achieved_discard: discard,
                bytes,
                status: TransportStatus::Complete,
            },
            None => TransportEvent {
                request,
                texture,
                achieved_discard: discard,
                bytes: Vec::new(),
                status: TransportStatus::NotFound,
            },
        };
        let _ = self.completions.send(event);
    }

    fn cancel_fetch(&self, _request: FetchRequestId) {
        // Deliveries are instantaneous; there is never anything in flight
        // to cancel. Stale results are dropped by the engine's request check.
    }
}
