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

//! Shared scaffolding for the streaming integration tests: a scripted
//! transport the tests answer by hand, a header-only decoder, an in-memory
//! cache store, and a harness wiring them to the engine.

// Each test binary compiles its own copy; not every helper is used by all.
#![allow(dead_code)]

use crossbeam_channel::{unbounded, Sender};
use orama_core::texture::discard;
use orama_core::texture::{RawImage, TextureId};
use orama_core::transport::{
    CacheStore, FetchRequestId, FetchTier, TextureDecoder, TextureTransport, TransportEvent,
    TransportStatus,
};
use orama_core::{SystemMemoryProbe, TextureError};
use orama_infra::{FixedMemoryProbe, RecordingGpuBackend};
use orama_streaming::{StreamingConfig, TextureStreamingSystem};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One fetch the engine handed to the transport.
#[derive(Debug, Clone, Copy)]
pub struct IssuedFetch {
    pub request: FetchRequestId,
    pub texture: TextureId,
    pub discard: u8,
    pub tier: FetchTier,
}

/// A transport that records traffic and never answers by itself; tests
/// inject the answers through the harness sender.
#[derive(Default)]
pub struct RecordingTransport {
    issued: Mutex<Vec<IssuedFetch>>,
    unseen: Mutex<VecDeque<IssuedFetch>>,
    cancelled: Mutex<Vec<FetchRequestId>>,
}

impl RecordingTransport {
    pub fn issued_count(&self) -> usize {
        self.issued.lock().unwrap().len()
    }

    pub fn cancelled_count(&self) -> usize {
        self.cancelled.lock().unwrap().len()
    }

    /// Fetches issued since the last call.
    pub fn take_unseen(&self) -> Vec<IssuedFetch> {
        self.unseen.lock().unwrap().drain(..).collect()
    }

    /// Every fetch issued so far, in order.
    pub fn issued(&self) -> Vec<IssuedFetch> {
        self.issued.lock().unwrap().clone()
    }
}

impl TextureTransport for RecordingTransport {
    fn issue_fetch(&self, request: FetchRequestId, texture: TextureId, discard: u8, tier: FetchTier) {
        let fetch = IssuedFetch {
            request,
            texture,
            discard,
            tier,
        };
        self.issued.lock().unwrap().push(fetch);
        self.unseen.lock().unwrap().push_back(fetch);
    }

    fn cancel_fetch(&self, request: FetchRequestId) {
        self.cancelled.lock().unwrap().push(request);
    }
}

/// Payload format: little-endian full width and height, then a fill byte.
pub fn encode_asset(width: u16, height: u16, fill: u8) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(5);
    bytes.extend_from_slice(&width.to_le_bytes());
    bytes.extend_from_slice(&height.to_le_bytes());
    bytes.push(fill);
    bytes
}

/// Decodes the 5-byte header format above into a single-channel image at the
/// requested discard.
pub struct StubDecoder;

impl TextureDecoder for StubDecoder {
    fn decode(&self, bytes: &[u8], discard_level: u8) -> Result<RawImage, TextureError> {
        if bytes.len() < 5 {
            return Err(TextureError::MalformedImage("short header".into()));
        }
        let width = u16::from_le_bytes([bytes[0], bytes[1]]) as u32;
        let height = u16::from_le_bytes([bytes[2], bytes[3]]) as u32;
        let fill = bytes[4];
        if width > discard::MAX_IMAGE_DIMENSION || height > discard::MAX_IMAGE_DIMENSION {
            return Err(TextureError::OversizedImage { width, height });
        }
        let (w, h) = discard::dimensions_at(width, height, discard_level);
        RawImage::new(w, h, 1, vec![fill; (w * h) as usize])
    }
}

/// An in-memory cache store mirroring the registry's contract.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<TextureId, (Vec<u8>, u8)>>,
    reads: Mutex<u64>,
}

impl MemoryStore {
    pub fn read_count(&self) -> u64 {
        *self.reads.lock().unwrap()
    }

    pub fn contains(&self, texture: TextureId) -> bool {
        self.entries.lock().unwrap().contains_key(&texture)
    }
}

impl CacheStore for MemoryStore {
    fn read_cached(&self, texture: TextureId, discard: u8) -> Option<(Vec<u8>, u8)> {
        *self.reads.lock().unwrap() += 1;
        self.entries
            .lock()
            .unwrap()
            .get(&texture)
            .filter(|(_, stored)| *stored <= discard)
            .cloned()
    }

    fn write_cached(&self, texture: TextureId, discard: u8, bytes: &[u8]) {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(&texture) {
            Some((_, stored)) if *stored <= discard => {}
            _ => {
                entries.insert(texture, (bytes.to_vec(), discard));
            }
        }
    }
}

/// The engine wired to recording collaborators.
pub struct Harness {
    pub system: TextureStreamingSystem,
    pub gpu: Arc<RecordingGpuBackend>,
    pub transport: Arc<RecordingTransport>,
    pub store: Arc<MemoryStore>,
    pub probe: Arc<FixedMemoryProbe>,
    pub events: Sender<TransportEvent>,
}

impl Harness {
    pub fn new(config: StreamingConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::default()))
    }

    pub fn with_store(config: StreamingConfig, store: Arc<MemoryStore>) -> Self {
        let (events, completions) = unbounded();
        let gpu = Arc::new(RecordingGpuBackend::new());
        let transport = Arc::new(RecordingTransport::default());
        let probe = Arc::new(FixedMemoryProbe::new(None));
        let system = TextureStreamingSystem::new(
            config,
            gpu.clone(),
            transport.clone(),
            completions,
            store.clone(),
            Arc::new(StubDecoder),
            probe.clone() as Arc<dyn SystemMemoryProbe>,
        );
        Self {
            system,
            gpu,
            transport,
            store,
            probe,
            events,
        }
    }

    /// Answers an issued fetch with a complete payload.
    pub fn send_complete(&self, fetch: IssuedFetch, bytes: Vec<u8>) {
        let _ = self.events.send(TransportEvent {
            request: fetch.request,
            texture: fetch.texture,
            achieved_discard: fetch.discard,
            bytes,
            status: TransportStatus::Complete,
        });
    }

    /// Answers an issued fetch with the authoritative not-found.
    pub fn send_not_found(&self, fetch: IssuedFetch) {
        let _ = self.events.send(TransportEvent {
            request: fetch.request,
            texture: fetch.texture,
            achieved_discard: fetch.discard,
            bytes: Vec::new(),
            status: TransportStatus::NotFound,
        });
    }

    /// Answers every unanswered fetch out of `assets`; textures absent from
    /// the map get not-found.
    pub fn respond_unseen(&self, assets: &HashMap<TextureId, Vec<u8>>) {
        for fetch in self.transport.take_unseen() {
            match assets.get(&fetch.texture) {
                Some(bytes) => self.send_complete(fetch, bytes.clone()),
                None => self.send_not_found(fetch),
            }
        }
    }
}

/// A default config with budgets opened wide so tests are deterministic.
pub fn test_config() -> StreamingConfig {
    StreamingConfig {
        priority_budget_ms: 1_000.0,
        fetch_budget_ms: 1_000.0,
        upload_budget_ms: 1_000.0,
        ..Default::default()
    }
}

/// Advances fabricated time and runs one engine frame, then yields briefly
/// so the worker threads can answer.
pub fn pump(system: &mut TextureStreamingSystem, now: &mut Instant, step: Duration) {
    *now += step;
    system.update_at(*now);
    std::thread::sleep(Duration::from_millis(2));
}
