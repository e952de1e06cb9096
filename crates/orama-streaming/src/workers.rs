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

//! Dedicated worker threads for disk I/O and image decode.
//!
//! Workers only ever consume commands and produce immutable results over
//! channels; they never touch the entity graph. The main thread drains the
//! result queues once per frame. Dropping a worker sends the shutdown command
//! and joins the thread.

use crate::arena::TextureHandle;
use orama_core::texture::{RawImage, TextureId};
use orama_core::transport::{CacheStore, FetchRequestId, TextureDecoder};
use orama_core::TextureError;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

pub(crate) enum DiskCommand {
    Read {
        request: FetchRequestId,
        handle: TextureHandle,
        texture: TextureId,
        discard: u8,
    },
    Write {
        texture: TextureId,
        discard: u8,
        bytes: Vec<u8>,
    },
    Shutdown,
}

pub(crate) struct DiskResult {
    pub request: FetchRequestId,
    pub handle: TextureHandle,
    pub texture: TextureId,
    /// Cached bytes plus the discard they achieve, or `None` on a miss.
    pub hit: Option<(Vec<u8>, u8)>,
}

/// The disk cache worker thread.
pub(crate) struct DiskWorker {
    commands: Sender<DiskCommand>,
    results: Receiver<DiskResult>,
    join: Option<JoinHandle<()>>,
}

impl DiskWorker {
    pub fn spawn(store: Arc<dyn CacheStore>) -> Self {
        let (command_tx, command_rx) = unbounded::<DiskCommand>();
        let (result_tx, result_rx) = unbounded::<DiskResult>();

        let join = std::thread::Builder::new()
            .name("orama-disk".to_string())
            .spawn(move || {
                while let Ok(command) = command_rx.recv() {
                    match command {
                        DiskCommand::Read {
                            request,
                            handle,
                            texture,
                            discard,
                        } => {
                            let hit = store.read_cached(texture, discard);
                            if result_tx
                                .send(DiskResult {
                                    request,
                                    handle,
                                    texture,
                                    hit,
                                })
                                .is_err()
                            {
                                break;
                            }
                        }
                        DiskCommand::Write {
                            texture,
                            discard,
                            bytes,
                        } => {
                            store.write_cached(texture, discard, &bytes);
                        }
                        DiskCommand::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn disk worker thread");

        Self {
            commands: command_tx,
            results: result_rx,
            join: Some(join),
        }
    }

    pub fn read(&self, request: FetchRequestId, handle: TextureHandle, texture: TextureId, discard: u8) {
        let _ = self.commands.send(DiskCommand::Read {
            request,
            handle,
            texture,
            discard,
        });
    }

    pub fn write(&self, texture: TextureId, discard: u8, bytes: Vec<u8>) {
        let _ = self.commands.send(DiskCommand::Write {
            texture,
            discard,
            bytes,
        });
    }

    pub fn try_recv(&self) -> Option<DiskResult> {
        self.results.try_recv().ok()
    }
}

impl Drop for DiskWorker {
    fn drop(&mut self) {
        let _ = self.commands.send(DiskCommand::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

pub(crate) enum DecodeCommand {
    Job {
        request: FetchRequestId,
        handle: TextureHandle,
        texture: TextureId,
        discard: u8,
        bytes: Vec<u8>,
    },
    Shutdown,
}

pub(crate) struct DecodeResult {
    pub request: FetchRequestId,
    pub handle: TextureHandle,
    pub texture: TextureId,
    pub discard: u8,
    pub result: Result<RawImage, TextureError>,
}

/// The image decode worker thread.
pub(crate) struct DecodeWorker {
    commands: Sender<DecodeCommand>,
    results: Receiver<DecodeResult>,
    join: Option<JoinHandle<()>>,
}

impl DecodeWorker {
    pub fn spawn(decoder: Arc<dyn TextureDecoder>) -> Self {
        let (command_tx, command_rx) = unbounded::<DecodeCommand>();
        let (result_tx, result_rx) = unbounded::<DecodeResult>();

        let join = std::thread::Builder::new()
            .name("orama-decode".to_string())
            .spawn(move || {
                while let Ok(command) = command_rx.recv() {
                    match command {
                        DecodeCommand::Job {
                            request,
                            handle,
                            texture,
                            discard,
                            bytes,
                        } => {
                            // The decoder is trusted to validate, but the
                            // hard limits are re-checked here so a misbehaving
                            // implementation cannot push an oversized buffer
                            // into the entity graph.
                            let result = decoder
                                .decode(&bytes, discard)
                                .and_then(|image| image.validate().map(|_| image));
                            if result_tx
                                .send(DecodeResult {
                                    request,
                                    handle,
                                    texture,
                                    discard,
                                    result,
                                })
                                .is_err()
                            {
                                break;
                            }
                        }
                        DecodeCommand::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn decode worker thread");

        Self {
            commands: command_tx,
            results: result_rx,
            join: Some(join),
        }
    }

    pub fn submit(
        &self,
        request: FetchRequestId,
        handle: TextureHandle,
        texture: TextureId,
        discard: u8,
        bytes: Vec<u8>,
    ) {
        let _ = self.commands.send(DecodeCommand::Job {
            request,
            handle,
            texture,
            discard,
            bytes,
        });
    }

    pub fn try_recv(&self) -> Option<DecodeResult> {
        self.results.try_recv().ok()
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        let _ = self.commands.send(DecodeCommand::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    struct MapStore {
        entries: Mutex<HashMap<TextureId, (Vec<u8>, u8)>>,
    }

    impl CacheStore for MapStore {
        fn read_cached(&self, texture: TextureId, discard: u8) -> Option<(Vec<u8>, u8)> {
            let entries = self.entries.lock().unwrap();
            entries
                .get(&texture)
                .filter(|(_, stored)| *stored <= discard)
                .cloned()
        }

        fn write_cached(&self, texture: TextureId, discard: u8, bytes: &[u8]) {
            self.entries
                .lock()
                .unwrap()
                .insert(texture, (bytes.to_vec(), discard));
        }
    }

    fn recv_result(worker: &DiskWorker) -> DiskResult {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(result) = worker.try_recv() {
                return result;
            }
            assert!(std::time::Instant::now() < deadline, "worker never answered");
            std::thread::yield_now();
        }
    }

    #[test]
    fn disk_worker_round_trips_reads_and_writes() {
        let store = Arc::new(MapStore {
            entries: Mutex::new(HashMap::new()),
        });
        let worker = DiskWorker::spawn(store.clone());
        let texture = TextureId::new();
        let handle = TextureHandle {
            index: 0,
            generation: 0,
        };

        worker.write(texture, 2, b"cached payload".to_vec());
        worker.read(FetchRequestId(1), handle, texture, 3);

        let result = recv_result(&worker);
        assert_eq!(result.texture, texture);
        let (bytes, discard) = result.hit.unwrap();
        assert_eq!(bytes, b"cached payload");
        assert_eq!(discard, 2);
    }

    #[test]
    fn disk_worker_reports_misses() {
        let store = Arc::new(MapStore {
            entries: Mutex::new(HashMap::new()),
        });
        let worker = DiskWorker::spawn(store);
        worker.read(
            FetchRequestId(1),
            TextureHandle {
                index: 0,
                generation: 0,
            },
            TextureId::new(),
            0,
        );
        assert!(recv_result(&worker).hit.is_none());
    }

    struct FlatDecoder;

    impl TextureDecoder for FlatDecoder {
        fn decode(&self, bytes: &[u8], _discard: u8) -> Result<RawImage, TextureError> {
            if bytes.is_empty() {
                return Err(TextureError::MalformedImage("empty payload".into()));
            }
            RawImage::new(16, 16, 1, vec![bytes[0]; 256])
        }
    }

    #[test]
    fn decode_worker_produces_images_and_errors() {
        let worker = DecodeWorker::spawn(Arc::new(FlatDecoder));
        let handle = TextureHandle {
            index: 0,
            generation: 0,
        };

        worker.submit(FetchRequestId(1), handle, TextureId::new(), 1, vec![42]);
        worker.submit(FetchRequestId(2), handle, TextureId::new(), 1, Vec::new());

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut results = Vec::new();
        while results.len() < 2 {
            if let Some(result) = worker.try_recv() {
                results.push(result);
            }
            assert!(std::time::Instant::now() < deadline, "decoder never answered");
            std::thread::yield_now();
        }

        results.sort_by_key(|r| r.request.0);
        let image = results[0].result.as_ref().unwrap();
        assert_eq!((image.width, image.height), (16, 16));
        assert!(matches!(
            results[1].result,
            Err(TextureError::MalformedImage(_))
        ));
    }
}
