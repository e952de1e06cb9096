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

//! Discard-ladder arithmetic.
//!
//! Images exist at discrete discard levels `0..=max`: level 0 is full
//! resolution, and every further level halves both dimensions, so each level
//! carries a quarter of the texel area of the previous one. Everything here is
//! a pure function; the policy deciding which level to want lives in
//! `orama-streaming`.

/// Hard ceiling on the discard ladder regardless of image size.
pub const MAX_DISCARD_LEVEL: u8 = 5;

/// A discard level is only usable while the larger image dimension stays at
/// or above this many texels.
pub const MIN_DISCARD_DIMENSION: u32 = 8;

/// Largest dimension the decoder and GPU layer accept. Anything bigger is
/// treated as a malformed asset, never decoded.
pub const MAX_IMAGE_DIMENSION: u32 = 2048;

/// Virtual sizes below this many texels are clamped before the logarithm.
const MIN_VIRTUAL_SIZE: f32 = 1.0;

/// The deepest usable discard level for an image of the given dimensions.
pub fn max_discard_for(width: u32, height: u32) -> u8 {
    let largest = width.max(height).max(1);
    let mut level = 0u8;
    while level < MAX_DISCARD_LEVEL && (largest >> (level + 1)) >= MIN_DISCARD_DIMENSION {
        level += 1;
    }
    level
}

/// Image dimensions at a given discard level, clamped to one texel.
pub fn dimensions_at(width: u32, height: u32, discard: u8) -> (u32, u32) {
    ((width >> discard).max(1), (height >> discard).max(1))
}

/// Texel area at a given discard level.
pub fn texel_area_at(width: u32, height: u32, discard: u8) -> u64 {
    let (w, h) = dimensions_at(width, height, discard);
    w as u64 * h as u64
}

/// Converts an accumulated on-screen pixel demand into a fractional discard
/// level for an image of the given full resolution.
///
/// Each discard level is a 4x reduction in texel area, hence the base-4
/// logarithm of the ratio between what the image holds and what the screen
/// needs. The result is non-negative and unclamped at the top; callers clamp
/// against [`max_discard_for`].
pub fn discard_for_virtual_size(width: u32, height: u32, virtual_size: f32) -> f32 {
    let full_area = texel_area_at(width, height, 0) as f32;
    let needed = virtual_size.max(MIN_VIRTUAL_SIZE);
    let ratio = full_area / needed;
    if ratio <= 1.0 {
        return 0.0;
    }
    // log4(x) = log2(x) / 2
    ratio.log2() * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn max_discard_respects_hard_ceiling() {
        assert_eq!(max_discard_for(2048, 2048), MAX_DISCARD_LEVEL);
        assert_eq!(max_discard_for(1024, 512), MAX_DISCARD_LEVEL);
    }

    #[test]
    fn max_discard_shrinks_with_small_images() {
        assert_eq!(max_discard_for(64, 64), 3);
        assert_eq!(max_discard_for(16, 16), 1);
        assert_eq!(max_discard_for(8, 8), 0);
        assert_eq!(max_discard_for(1, 1), 0);
    }

    #[test]
    fn dimensions_halve_per_level() {
        assert_eq!(dimensions_at(256, 128, 0), (256, 128));
        assert_eq!(dimensions_at(256, 128, 3), (32, 16));
        assert_eq!(dimensions_at(2, 2, 5), (1, 1));
    }

    #[test]
    fn area_divides_by_four_per_level() {
        let full = texel_area_at(512, 512, 0);
        for level in 1..=4u8 {
            assert_eq!(texel_area_at(512, 512, level) * 4u64.pow(level as u32), full);
        }
    }

    #[test]
    fn full_visibility_wants_full_resolution() {
        assert_relative_eq!(discard_for_virtual_size(512, 512, 512.0 * 512.0), 0.0);
        // More demand than the image can supply still means level zero.
        assert_relative_eq!(discard_for_virtual_size(64, 64, 1.0e9), 0.0);
    }

    #[test]
    fn quarter_area_demand_is_one_level() {
        let level = discard_for_virtual_size(512, 512, (512.0 * 512.0) / 4.0);
        assert_relative_eq!(level, 1.0, epsilon = 1.0e-4);
        let two = discard_for_virtual_size(512, 512, (512.0 * 512.0) / 16.0);
        assert_relative_eq!(two, 2.0, epsilon = 1.0e-4);
    }

    #[test]
    fn zero_virtual_size_is_finite_and_coarse() {
        let level = discard_for_virtual_size(1024, 1024, 0.0);
        assert!(level.is_finite());
        assert!(level > MAX_DISCARD_LEVEL as f32);
    }
}
