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

//! The texture streaming policy engine.
//!
//! Every frame, for every candidate texture, this crate decides what deserves
//! GPU memory, at which discard level, fetched from which tier, in what
//! order, under a hard memory budget. The moving parts:
//!
//! - [`arena::TextureArena`]: entity storage addressed by stable generational
//!   handles; consumers hold handles, never pointers.
//! - [`entity::TextureEntity`]: the texture itself, its discard ladder state,
//!   raw buffers, GPU handle, and callback registrations.
//! - [`priority`]: the per-frame desired-discard and decode-priority math.
//! - [`fetch::FetchTracker`]: the per-entity in-flight request state machine.
//! - [`ledger::ResidentLedger`]: memory accounting and the discard-bias
//!   feedback loop.
//! - [`system::TextureStreamingSystem`]: the main-thread facade wiring it all
//!   to the collaborator traits from `orama-core`.
//!
//! All entity, tracker, and ledger mutation happens on the main thread.
//! Worker threads produce immutable byte buffers and post completions over
//! channels drained by [`system::TextureStreamingSystem::update_at`].

pub mod arena;
pub mod config;
pub mod entity;
pub mod fetch;
pub mod ledger;
pub mod priority;
pub mod system;

mod workers;

pub use arena::{TextureArena, TextureHandle};
pub use config::{PriorityBands, StreamingConfig};
pub use entity::{CallbackOutcome, TextureEntity};
pub use fetch::{FetchState, FetchTracker};
pub use ledger::{MemoryPressureState, PressureEvent, ResidentLedger};
pub use system::TextureStreamingSystem;
