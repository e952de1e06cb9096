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

//! Texture identity, category tiers, and raw image buffers.

pub mod discard;

use crate::error::TextureError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use discard::{MAX_DISCARD_LEVEL, MAX_IMAGE_DIMENSION, MIN_DISCARD_DIMENSION};

/// The stable 128-bit identity of a texture asset.
///
/// Ids are either content-addressed by the asset pipeline or minted fresh for
/// locally generated textures (composites, media frames). The id is the key
/// used across the fetch tiers, the disk cache, and the entity arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TextureId(Uuid);

impl TextureId {
    /// Mints a new random texture id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing asset UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TextureId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A priority-tier override for categories of textures that matter regardless
/// of their on-screen size.
///
/// Tiers are strictly ordered. The priority calculator guarantees that any
/// texture at a higher tier outranks every texture at a lower tier, no matter
/// how their pixel-area or delta-discard terms compare.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum BoostLevel {
    /// No override; priority comes entirely from on-screen size.
    #[default]
    None = 0,
    /// Terrain base textures; always wanted at some resolution.
    Terrain = 1,
    /// Textures on the currently selected object.
    Selected = 2,
    /// Avatar appearance composites.
    AvatarBaked = 3,
    /// UI chrome; full resolution, effectively immediately.
    Ui = 4,
    /// Inventory and minimap icons.
    Icon = 5,
    /// Permanently resident; exempt from deletion sweeps.
    Pinned = 6,
}

impl BoostLevel {
    /// The numeric tier used by the priority calculator.
    pub fn tier(self) -> u32 {
        self as u32
    }

    /// Whether this tier is always fetched at full resolution.
    pub fn never_discards(self) -> bool {
        self >= BoostLevel::Ui
    }

    /// Whether entities at this tier are exempt from deletion sweeps.
    pub fn no_delete(self) -> bool {
        self == BoostLevel::Pinned
    }
}

/// The closed set of texture kinds the streaming engine manages.
///
/// Each kind supplies its own desired-discard policy, composed with the shared
/// priority formula by the calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureKind {
    /// An ordinary asset fetched through the cache/network tiers.
    Fetched,
    /// Fetched, but re-evaluates its level every frame without hysteresis
    /// (terrain and other surfaces that track the camera closely).
    LodAdaptive,
    /// UI chrome; always full resolution, never discard-biased.
    UiPinned,
    /// A live media stream; frames arrive at native resolution and are never
    /// re-requested at a coarser level.
    MediaStream,
}

impl TextureKind {
    /// Kinds whose desired discard is pinned to full resolution.
    pub fn fixed_full_resolution(self) -> bool {
        matches!(self, TextureKind::UiPinned | TextureKind::MediaStream)
    }

    /// Kinds that damp frame-to-frame noise with hysteresis.
    pub fn uses_hysteresis(self) -> bool {
        matches!(self, TextureKind::Fetched)
    }
}

/// A decoded image buffer owned by a texture entity.
///
/// Pixels are stored row-major, `components` bytes per texel. The buffer is
/// produced by a [`crate::transport::TextureDecoder`] on a worker thread and
/// handed to the main thread by value; nothing ever aliases it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    /// Width in texels at this buffer's discard level.
    pub width: u32,
    /// Height in texels at this buffer's discard level.
    pub height: u32,
    /// Bytes per texel (1 to 4).
    pub components: u8,
    /// Row-major texel data.
    pub pixels: Vec<u8>,
}

impl RawImage {
    /// Creates a buffer after validating its dimensions.
    ///
    /// # Errors
    /// Returns [`TextureError::OversizedImage`] when either dimension exceeds
    /// [`MAX_IMAGE_DIMENSION`], and [`TextureError::MalformedImage`] for
    /// non-power-of-two dimensions, an unsupported component count, or a
    /// pixel buffer whose length disagrees with the dimensions.
    pub fn new(width: u32, height: u32, components: u8, pixels: Vec<u8>) -> Result<Self, TextureError> {
        let image = Self {
            width,
            height,
            components,
            pixels,
        };
        image.validate()?;
        Ok(image)
    }

    /// Checks the hard limits the decoder and GPU layer rely on.
    pub fn validate(&self) -> Result<(), TextureError> {
        if self.width > MAX_IMAGE_DIMENSION || self.height > MAX_IMAGE_DIMENSION {
            return Err(TextureError::OversizedImage {
                width: self.width,
                height: self.height,
            });
        }
        if self.width == 0 || self.height == 0 {
            return Err(TextureError::MalformedImage("zero dimension".to_string()));
        }
        if !self.width.is_power_of_two() || !self.height.is_power_of_two() {
            return Err(TextureError::MalformedImage(format!(
                "non-power-of-two dimensions {}x{}",
                self.width, self.height
            )));
        }
        if self.components == 0 || self.components > 4 {
            return Err(TextureError::MalformedImage(format!(
                "unsupported component count {}",
                self.components
            )));
        }
        let expected = self.width as usize * self.height as usize * self.components as usize;
        if self.pixels.len() != expected {
            return Err(TextureError::MalformedImage(format!(
                "pixel buffer holds {} bytes, dimensions require {}",
                self.pixels.len(),
                expected
            )));
        }
        Ok(())
    }

    /// Size of the texel data in bytes.
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    /// Returns a copy reduced by `levels` discard steps using a 2x2 box
    /// filter per step.
    ///
    /// This is how a small low-discard buffer is derived from a full decode
    /// without going back to the fetch tiers. Dimensions never drop below one
    /// texel.
    pub fn downsampled(&self, levels: u8) -> RawImage {
        let mut current = self.clone();
        for _ in 0..levels {
            if current.width <= 1 && current.height <= 1 {
                break;
            }
            current = current.halved();
        }
        current
    }

    fn halved(&self) -> RawImage {
        let out_w = (self.width / 2).max(1);
        let out_h = (self.height / 2).max(1);
        let c = self.components as usize;
        let mut pixels = vec![0u8; out_w as usize * out_h as usize * c];
        for y in 0..out_h as usize {
            for x in 0..out_w as usize {
                let sx = (x * 2).min(self.width as usize - 1);
                let sy = (y * 2).min(self.height as usize - 1);
                let sx1 = (sx + 1).min(self.width as usize - 1);
                let sy1 = (sy + 1).min(self.height as usize - 1);
                for ch in 0..c {
                    let sum = self.texel(sx, sy, ch) as u32
                        + self.texel(sx1, sy, ch) as u32
                        + self.texel(sx, sy1, ch) as u32
                        + self.texel(sx1, sy1, ch) as u32;
                    pixels[(y * out_w as usize + x) * c + ch] = (sum / 4) as u8;
                }
            }
        }
        RawImage {
            width: out_w,
            height: out_h,
            components: self.components,
            pixels,
        }
    }

    fn texel(&self, x: usize, y: usize, channel: usize) -> u8 {
        self.pixels[(y * self.width as usize + x) * self.components as usize + channel]
    }
}
