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

//! Entity storage addressed by stable generational handles.
//!
//! Consumers hold a [`TextureHandle`], never a pointer. A handle whose entity
//! has been destroyed simply fails the generation check on lookup, so a
//! dangling reference is an `Option::None`, not undefined behavior. Freed
//! slots are recycled through a free list with their generation bumped.

use crate::entity::TextureEntity;
use orama_core::texture::TextureId;
use std::collections::HashMap;

/// A stable, copyable reference to an entity slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Slot-map storage for texture entities plus an id-to-handle index.
#[derive(Default)]
pub struct TextureArena {
    slots: Vec<(TextureHandle, Option<TextureEntity>)>,
    free: Vec<u32>,
    by_id: HashMap<TextureId, TextureHandle>,
}

impl TextureArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entity, recycling a freed slot when one is available.
    pub fn insert(&mut self, entity: TextureEntity) -> TextureHandle {
        let id = entity.id();
        let handle = if let Some(index) = self.free.pop() {
            let (slot_handle, slot) = &mut self.slots[index as usize];
            slot_handle.generation += 1;
            *slot = Some(entity);
            *slot_handle
        } else {
            let handle = TextureHandle {
                index: self.slots.len() as u32,
                generation: 0,
            };
            self.slots.push((handle, Some(entity)));
            handle
        };
        self.by_id.insert(id, handle);
        handle
    }

    /// Resolves a handle, failing on stale generations.
    pub fn get(&self, handle: TextureHandle) -> Option<&TextureEntity> {
        self.slots
            .get(handle.index as usize)
            .and_then(|(slot_handle, entity)| {
                if slot_handle.generation == handle.generation {
                    entity.as_ref()
                } else {
                    None
                }
            })
    }

    /// Mutable counterpart of [`TextureArena::get`].
    pub fn get_mut(&mut self, handle: TextureHandle) -> Option<&mut TextureEntity> {
        self.slots
            .get_mut(handle.index as usize)
            .and_then(|(slot_handle, entity)| {
                if slot_handle.generation == handle.generation {
                    entity.as_mut()
                } else {
                    None
                }
            })
    }

    /// Removes an entity, returning it. The slot is recycled and the handle
    /// becomes permanently stale.
    pub fn remove(&mut self, handle: TextureHandle) -> Option<TextureEntity> {
        let (slot_handle, entity) = self.slots.get_mut(handle.index as usize)?;
        if slot_handle.generation != handle.generation {
            return None;
        }
        let entity = entity.take()?;
        self.by_id.remove(&entity.id());
        self.free.push(handle.index);
        Some(entity)
    }

    /// Finds the live handle for a texture id.
    pub fn handle_of(&self, id: TextureId) -> Option<TextureHandle> {
        self.by_id.get(&id).copied()
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no entities are alive.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Iterates live entities with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (TextureHandle, &TextureEntity)> {
        self.slots
            .iter()
            .filter_map(|(handle, entity)| entity.as_ref().map(|e| (*handle, e)))
    }

    /// Mutable iteration over live entities.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (TextureHandle, &mut TextureEntity)> {
        self.slots
            .iter_mut()
            .filter_map(|(handle, entity)| entity.as_mut().map(|e| (*handle, e)))
    }

    /// Total slots ever created, live or freed. Used by budgeted passes that
    /// walk the arena round-robin.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// The live handle stored at a raw slot index, if the slot is occupied.
    pub fn handle_at(&self, index: usize) -> Option<TextureHandle> {
        self.slots
            .get(index)
            .and_then(|(handle, entity)| entity.as_ref().map(|_| *handle))
    }
}
